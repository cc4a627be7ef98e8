use serde::Serialize;

use crate::model::stats::mean_std;
use crate::strategy::EquityPoint;

pub const DEFAULT_RISK_FREE_RATE: f64 = 0.06;

/// Turns a fit-phase drawdown into the live-phase stop-loss threshold.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct StopLossPolicy {
    pub min_pct: f64,
    pub max_pct: f64,
    /// Whether the stop-loss is armed while replaying the fit phase.
    pub apply_in_fit_phase: bool,
}

impl Default for StopLossPolicy {
    fn default() -> Self {
        Self {
            min_pct: 1.0,
            max_pct: 50.0,
            apply_in_fit_phase: true,
        }
    }
}

impl StopLossPolicy {
    pub fn clamp(&self, raw_pct: f64) -> f64 {
        if raw_pct.is_nan() {
            return self.max_pct;
        }
        raw_pct.max(self.min_pct).min(self.max_pct)
    }
}

/// Realized equity: the initial buying power followed by the buying power
/// after every exit. Entries and exits alternate in the record, so exits sit
/// at odd indices.
pub fn realized_equity(record: &[EquityPoint], initial_buying_power: f64) -> Vec<f64> {
    std::iter::once(initial_buying_power)
        .chain(record.iter().skip(1).step_by(2).map(|p| p.buying_power))
        .collect()
}

/// Largest peak-to-trough fall of realized equity, in percent of
/// `capital_per_trade`. Zero when equity never fell.
pub fn max_drawdown_pct(record: &[EquityPoint], initial_buying_power: f64, capital_per_trade: f64) -> f64 {
    if capital_per_trade <= 0.0 {
        return 0.0;
    }
    let mut peak = f64::NEG_INFINITY;
    let mut worst = 0.0_f64;
    for equity in realized_equity(record, initial_buying_power) {
        peak = peak.max(equity);
        worst = worst.max(peak - equity);
    }
    worst / capital_per_trade * 100.0
}

/// `(total return - risk_free_rate) / std(returns)` over per-round-trip
/// returns normalised by `capital_per_trade`. `None` when there is not
/// enough history or the returns have no dispersion.
pub fn sharpe_ratio(
    record: &[EquityPoint],
    initial_buying_power: f64,
    capital_per_trade: f64,
    risk_free_rate: f64,
) -> Option<f64> {
    if record.len() < 3 || capital_per_trade <= 0.0 {
        return None;
    }
    let equity = realized_equity(record, initial_buying_power);
    let returns: Vec<f64> = equity
        .windows(2)
        .map(|w| (w[1] - w[0]) / capital_per_trade)
        .collect();
    if returns.len() < 2 {
        return None;
    }
    let (_, std) = mean_std(&returns)?;
    if !std.is_finite() || std == 0.0 {
        return None;
    }
    let total: f64 = returns.iter().sum();
    Some((total - risk_free_rate) / std)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::series::parse_timestamp;

    fn record(values: &[f64]) -> Vec<EquityPoint> {
        let start = parse_timestamp("2024-01-01").unwrap();
        values
            .iter()
            .enumerate()
            .map(|(i, &bp)| EquityPoint {
                timestamp: start + chrono::Duration::days(i as i64),
                buying_power: bp,
            })
            .collect()
    }

    #[test]
    fn clamp_keeps_threshold_in_band() {
        let policy = StopLossPolicy::default();
        assert_eq!(policy.clamp(0.0), 1.0);
        assert_eq!(policy.clamp(12.5), 12.5);
        assert_eq!(policy.clamp(400.0), 50.0);
        assert_eq!(policy.clamp(f64::NAN), 50.0);
    }

    #[test]
    fn drawdown_uses_exit_samples_only() {
        // entry samples (odd positions here) dip to zero but are ignored
        let rec = record(&[0.0, 1100.0, 100.0, 900.0, 0.0, 1000.0]);
        let dd = max_drawdown_pct(&rec, 1000.0, 1000.0);
        assert!((dd - 20.0).abs() < 1e-9);
    }

    #[test]
    fn drawdown_is_zero_for_rising_equity() {
        let rec = record(&[0.0, 1050.0, 50.0, 1100.0]);
        assert_eq!(max_drawdown_pct(&rec, 1000.0, 1000.0), 0.0);
        assert_eq!(max_drawdown_pct(&[], 1000.0, 1000.0), 0.0);
    }

    #[test]
    fn sharpe_not_available_for_short_history() {
        let rec = record(&[0.0, 1100.0]);
        assert_eq!(sharpe_ratio(&rec, 1000.0, 1000.0, DEFAULT_RISK_FREE_RATE), None);
        // three samples but only one closed round-trip
        let rec = record(&[0.0, 1100.0, 100.0]);
        assert_eq!(sharpe_ratio(&rec, 1000.0, 1000.0, DEFAULT_RISK_FREE_RATE), None);
    }

    #[test]
    fn sharpe_over_round_trips() {
        let rec = record(&[0.0, 1100.0, 100.0, 1150.0]);
        // returns 0.1 and 0.05, sample std = 0.0353553...
        let sharpe = sharpe_ratio(&rec, 1000.0, 1000.0, 0.06).unwrap();
        let expected = (0.15 - 0.06) / (0.05_f64 / 2.0_f64.sqrt());
        assert!((sharpe - expected).abs() < 1e-9);
    }

    #[test]
    fn flat_returns_have_no_sharpe() {
        let rec = record(&[0.0, 1100.0, 100.0, 1200.0]);
        assert_eq!(sharpe_ratio(&rec, 1000.0, 1000.0, 0.06), None);
    }
}
