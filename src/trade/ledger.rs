use chrono::NaiveDateTime;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::SimulationError;
use crate::market::{Calendar, PriceField};
use crate::ports::bar_source::BarSource;

// Positions smaller than this are treated as flat.
const POSITION_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TradeAction {
    /// Buy
    OpenLong,
    /// Sell short
    OpenShort,
    /// Sell
    CloseLong,
    /// Buy to cover
    CloseShort,
}

impl TradeAction {
    /// +1 for actions that add shares, -1 for actions that remove them.
    pub fn direction(self) -> f64 {
        match self {
            TradeAction::OpenLong | TradeAction::CloseShort => 1.0,
            TradeAction::OpenShort | TradeAction::CloseLong => -1.0,
        }
    }

    fn allowed_with(self, position: f64) -> bool {
        match self {
            TradeAction::OpenLong => position >= -POSITION_EPSILON,
            TradeAction::OpenShort => position <= POSITION_EPSILON,
            TradeAction::CloseLong => position > POSITION_EPSILON,
            TradeAction::CloseShort => position < -POSITION_EPSILON,
        }
    }
}

impl fmt::Display for TradeAction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let label = match self {
            TradeAction::OpenLong => "Buy (open long)",
            TradeAction::OpenShort => "Sell Short (open short)",
            TradeAction::CloseLong => "Sell (close long)",
            TradeAction::CloseShort => "Buy to Cover (close short)",
        };
        f.write_str(label)
    }
}

/// Simulated execution venue: owns the clock and per-symbol signed
/// positions. Cash is kept by the caller.
pub struct Ledger {
    calendar: Calendar,
    bars: Arc<dyn BarSource>,
    trade_on: PriceField,
    current: Option<NaiveDateTime>,
    positions: HashMap<String, f64>,
}

impl Ledger {
    pub fn new(
        calendar: Calendar,
        bars: Arc<dyn BarSource>,
        trade_on: PriceField,
        start: NaiveDateTime,
    ) -> Self {
        Self {
            calendar,
            bars,
            trade_on,
            current: Some(start),
            positions: HashMap::new(),
        }
    }

    pub fn current_timestamp(&self) -> Option<NaiveDateTime> {
        self.current
    }

    /// Moves the clock to the next valid trading timestamp. Once the
    /// calendar is exhausted the clock stays at `None`.
    pub fn advance(&mut self) -> Option<NaiveDateTime> {
        let current = self.current?;
        self.current = self.calendar.next_after(current);
        if self.current.is_none() {
            log::warn!("[LEDGER] no trading session after {}", current);
        }
        self.current
    }

    /// Places the clock at `ts`, or the first session after it.
    pub fn seek(&mut self, ts: NaiveDateTime) -> Option<NaiveDateTime> {
        self.current = self.calendar.first_at_or_after(ts);
        self.current
    }

    /// Execution price at the current timestamp; `None` means "cannot trade this step".
    pub fn get_price(&self, symbol: &str) -> Option<f64> {
        let ts = self.current?;
        let series = self.bars.get_bars(symbol)?;
        match series.get(ts) {
            Some(bar) => Some(bar.price(self.trade_on)),
            None => {
                log::warn!("[LEDGER] {} not in bars of {}", ts, symbol);
                None
            }
        }
    }

    pub fn position(&self, symbol: &str) -> f64 {
        self.positions.get(symbol).copied().unwrap_or(0.0)
    }

    /// Executes `action` for `quantity` shares at the current price and
    /// returns the notional (price x quantity).
    pub fn trade(
        &mut self,
        symbol: &str,
        action: TradeAction,
        quantity: f64,
    ) -> Result<f64, SimulationError> {
        let position = self.position(symbol);
        if !action.allowed_with(position) {
            return Err(SimulationError::InconsistentAction {
                symbol: symbol.to_string(),
                action,
                position,
            });
        }
        let closing = matches!(action, TradeAction::CloseLong | TradeAction::CloseShort);
        if closing && quantity > position.abs() + POSITION_EPSILON {
            return Err(SimulationError::InconsistentAction {
                symbol: symbol.to_string(),
                action,
                position,
            });
        }
        let price = self
            .get_price(symbol)
            .ok_or_else(|| SimulationError::PriceUnavailable {
                symbol: symbol.to_string(),
                timestamp: self.current,
            })?;
        let timestamp = self.current.ok_or_else(|| SimulationError::PriceUnavailable {
            symbol: symbol.to_string(),
            timestamp: None,
        })?;

        let mut updated = position + action.direction() * quantity;
        if updated.abs() < POSITION_EPSILON {
            updated = 0.0;
        }
        self.positions.insert(symbol.to_string(), updated);

        let cost = price * quantity;
        log::info!(
            "[LEDGER] {} {:.2} shares of {} performed at a cost of {:.2}",
            action,
            quantity,
            symbol,
            cost
        );
        log::debug!(
            "[LEDGER] position now at {:.2} shares of {} on {}",
            updated,
            symbol,
            timestamp
        );
        Ok(cost)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::{Bar, BarSeries};
    use crate::model::series::parse_timestamp;
    use crate::ports::bar_source::InMemoryBarSource;

    fn ts(raw: &str) -> NaiveDateTime {
        parse_timestamp(raw).unwrap()
    }

    fn bar(day: &str, open: f64) -> Bar {
        Bar {
            timestamp: ts(day),
            open,
            high: open + 2.0,
            low: open - 2.0,
            close: open + 1.0,
            volume: 0.0,
        }
    }

    fn ledger() -> Ledger {
        let source: InMemoryBarSource = [
            BarSeries::from_bars("AAA", [bar("2024-01-02", 10.0), bar("2024-01-03", 12.0)]).unwrap(),
            BarSeries::from_bars("BBB", [bar("2024-01-02", 50.0)]).unwrap(),
        ]
        .into_iter()
        .collect();
        let calendar = Calendar::from_timestamps([ts("2024-01-02"), ts("2024-01-03")]);
        Ledger::new(calendar, Arc::new(source), PriceField::Open, ts("2024-01-02"))
    }

    #[test]
    fn buy_then_sell_round_trip() {
        let mut ledger = ledger();
        let cost = ledger.trade("AAA", TradeAction::OpenLong, 5.0).unwrap();
        assert_eq!(cost, 50.0);
        assert_eq!(ledger.position("AAA"), 5.0);
        ledger.advance();
        let proceeds = ledger.trade("AAA", TradeAction::CloseLong, 5.0).unwrap();
        assert_eq!(proceeds, 60.0);
        assert_eq!(ledger.position("AAA"), 0.0);
    }

    #[test]
    fn short_then_cover() {
        let mut ledger = ledger();
        ledger.trade("BBB", TradeAction::OpenShort, 2.0).unwrap();
        assert_eq!(ledger.position("BBB"), -2.0);
        let cover = ledger.trade("BBB", TradeAction::CloseShort, 2.0).unwrap();
        assert_eq!(cover, 100.0);
        assert_eq!(ledger.position("BBB"), 0.0);
    }

    #[test]
    fn actions_must_match_position_sign() {
        let mut ledger = ledger();
        ledger.trade("AAA", TradeAction::OpenShort, 1.0).unwrap();
        for action in [TradeAction::CloseLong, TradeAction::OpenLong] {
            let err = ledger.trade("AAA", action, 1.0).unwrap_err();
            assert!(matches!(err, SimulationError::InconsistentAction { .. }));
        }
        let err = ledger.trade("BBB", TradeAction::CloseShort, 1.0).unwrap_err();
        assert!(matches!(err, SimulationError::InconsistentAction { .. }));
        assert_eq!(ledger.position("AAA"), -1.0);
    }

    #[test]
    fn closing_more_than_held_is_rejected() {
        let mut ledger = ledger();
        ledger.trade("AAA", TradeAction::OpenLong, 1.0).unwrap();
        assert!(ledger.trade("AAA", TradeAction::CloseLong, 2.0).is_err());
        assert_eq!(ledger.position("AAA"), 1.0);
    }

    #[test]
    fn missing_bar_means_no_price() {
        let mut ledger = ledger();
        ledger.advance();
        assert_eq!(ledger.get_price("BBB"), None);
        assert_eq!(ledger.get_price("CCC"), None);
        let err = ledger.trade("BBB", TradeAction::OpenLong, 1.0).unwrap_err();
        assert!(err.is_recoverable());
        assert_eq!(ledger.position("BBB"), 0.0);
    }

    #[test]
    fn clock_advances_and_exhausts() {
        let mut ledger = ledger();
        assert_eq!(ledger.advance(), Some(ts("2024-01-03")));
        assert_eq!(ledger.advance(), None);
        assert_eq!(ledger.advance(), None);
        assert_eq!(ledger.get_price("AAA"), None);
        assert_eq!(ledger.seek(ts("2024-01-01")), Some(ts("2024-01-02")));
    }
}
