use chrono::NaiveDateTime;
use std::error::Error;
use std::fmt;

use crate::trade::TradeAction;

/// Failures raised by the simulation core.
///
/// Most variants are setup bugs that abort the run. The few that describe
/// "this step cannot act" are flagged by [`SimulationError::is_recoverable`].
#[derive(Debug, Clone, PartialEq)]
pub enum SimulationError {
    MismatchedIndex {
        symbol_x: String,
        symbol_y: String,
        detail: String,
    },
    NonMonotonicTimestamp {
        previous: NaiveDateTime,
        next: NaiveDateTime,
    },
    InvalidTimestamp(String),
    InconsistentAction {
        symbol: String,
        action: TradeAction,
        position: f64,
    },
    MissingBars(String),
    InsufficientHistory {
        needed: usize,
        available: usize,
    },
    DegenerateFit(String),
    PriceUnavailable {
        symbol: String,
        timestamp: Option<NaiveDateTime>,
    },
}

impl SimulationError {
    pub fn is_recoverable(&self) -> bool {
        matches!(self, SimulationError::PriceUnavailable { .. })
    }
}

impl fmt::Display for SimulationError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SimulationError::MismatchedIndex {
                symbol_x,
                symbol_y,
                detail,
            } => write!(
                f,
                "bar index of {} does not match {}: {}",
                symbol_x, symbol_y, detail
            ),
            SimulationError::NonMonotonicTimestamp { previous, next } => write!(
                f,
                "timestamp {} does not follow {} in increasing order",
                next, previous
            ),
            SimulationError::InvalidTimestamp(raw) => {
                write!(f, "invalid timestamp string '{}'", raw)
            }
            SimulationError::InconsistentAction {
                symbol,
                action,
                position,
            } => write!(
                f,
                "{} is not allowed on {} with position {}",
                action, symbol, position
            ),
            SimulationError::MissingBars(symbol) => write!(f, "no bars available for {}", symbol),
            SimulationError::InsufficientHistory { needed, available } => write!(
                f,
                "need at least {} observations, have {}",
                needed, available
            ),
            SimulationError::DegenerateFit(detail) => write!(f, "degenerate regression: {}", detail),
            SimulationError::PriceUnavailable { symbol, timestamp } => match timestamp {
                Some(ts) => write!(f, "no price for {} at {}", symbol, ts),
                None => write!(f, "no price for {}: clock exhausted", symbol),
            },
        }
    }
}

impl Error for SimulationError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_missing_price_is_recoverable() {
        let missing = SimulationError::PriceUnavailable {
            symbol: "AAA".to_string(),
            timestamp: None,
        };
        assert!(missing.is_recoverable());
        assert!(!SimulationError::MissingBars("AAA".to_string()).is_recoverable());
        assert!(!SimulationError::InvalidTimestamp("2024-13-40".to_string()).is_recoverable());
    }

    #[test]
    fn display_names_the_offending_action() {
        let err = SimulationError::InconsistentAction {
            symbol: "AAA".to_string(),
            action: TradeAction::CloseLong,
            position: -3.0,
        };
        assert_eq!(
            err.to_string(),
            "Sell (close long) is not allowed on AAA with position -3"
        );
    }
}
