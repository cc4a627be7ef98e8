use chrono::NaiveDateTime;
use serde::Serialize;
use std::sync::Arc;

use crate::error::SimulationError;
use crate::market::{ensure_aligned, BarSeries, Calendar};
use crate::model::{PairModel, PairModelConfig};
use crate::ports::bar_source::BarSource;
use crate::risk::{max_drawdown_pct, sharpe_ratio, StopLossPolicy};
use crate::strategy::{EquityPoint, HedgeConvention, PairsStrategy, StrategyParams, Transition};
use crate::trade::Ledger;

#[derive(Debug, Clone)]
pub struct SimulationConfig {
    pub symbol_x: String,
    pub symbol_y: String,
    pub model: PairModelConfig,
    pub hedge_convention: HedgeConvention,
    /// In-sample bar count used when `cutover` is not given.
    pub fit_bars: usize,
    pub cutover: Option<NaiveDateTime>,
    pub strategy: StrategyParams,
    pub stop_loss: StopLossPolicy,
    pub risk_free_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PhaseReport {
    pub start: Option<NaiveDateTime>,
    pub end: Option<NaiveDateTime>,
    pub steps: usize,
    pub round_trips: usize,
    pub equity_record: Vec<EquityPoint>,
    pub sharpe_ratio: Option<f64>,
    pub max_drawdown_pct: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimulationReport {
    pub symbol_x: String,
    pub symbol_y: String,
    pub cutover: NaiveDateTime,
    pub fit: PhaseReport,
    /// Stop-loss threshold carried into the live phase.
    pub calibrated_max_dd_pct: f64,
    pub live: PhaseReport,
    pub final_buying_power: f64,
    pub stopped: bool,
    pub open_position: bool,
}

impl SimulationReport {
    pub fn pair_label(&self) -> String {
        format!("{}/{}", self.symbol_x, self.symbol_y)
    }
}

/// Runs one pair through the fit phase and the live-test phase.
pub struct Driver {
    cfg: SimulationConfig,
    source: Arc<dyn BarSource>,
    calendar: Calendar,
}

struct PhaseRun {
    start: Option<NaiveDateTime>,
    end: Option<NaiveDateTime>,
    steps: usize,
}

impl Driver {
    pub fn new(cfg: SimulationConfig, source: Arc<dyn BarSource>, calendar: Calendar) -> Self {
        Self {
            cfg,
            source,
            calendar,
        }
    }

    pub fn run(&self) -> Result<SimulationReport, SimulationError> {
        let cfg = &self.cfg;
        let x = self
            .source
            .get_bars(&cfg.symbol_x)
            .ok_or_else(|| SimulationError::MissingBars(cfg.symbol_x.clone()))?;
        let y = self
            .source
            .get_bars(&cfg.symbol_y)
            .ok_or_else(|| SimulationError::MissingBars(cfg.symbol_y.clone()))?;
        ensure_aligned(&x, &y)?;

        let cutover = match cfg.cutover {
            Some(ts) => ts,
            None => x.index().get(cfg.fit_bars).copied().ok_or(
                SimulationError::InsufficientHistory {
                    needed: cfg.fit_bars + 1,
                    available: x.len(),
                },
            )?,
        };
        let split = x.count_before(cutover);
        if split < 2 {
            return Err(SimulationError::InsufficientHistory {
                needed: 2,
                available: split,
            });
        }
        let x_in = BarSeries::from_bars(x.symbol(), x.bars()[..split].iter().copied())?;
        let y_in = BarSeries::from_bars(y.symbol(), y.bars()[..split].iter().copied())?;
        let mut model = PairModel::fit(&x_in, &y_in, cfg.model)?;

        let first = x.index()[0];
        let mut ledger = Ledger::new(
            self.calendar.clone(),
            Arc::clone(&self.source),
            cfg.model.price_field,
            first,
        );
        let mut strategy = PairsStrategy::new(&cfg.symbol_x, &cfg.symbol_y, cfg.strategy);
        strategy.set_stop_loss_enabled(cfg.stop_loss.apply_in_fit_phase);

        log::info!(
            "[FIT] {}/{} replaying {} in-sample bars up to {}",
            cfg.symbol_x,
            cfg.symbol_y,
            split,
            cutover
        );
        let fit_run = self.fit_phase(&model, &mut strategy, &mut ledger, cutover)?;
        let fit_len = strategy.equity_record().len();
        let fit = self.phase_report(&strategy, 0, fit_len, fit_run);

        let calibrated = cfg.stop_loss.clamp(fit.max_drawdown_pct);
        strategy.set_max_dd_pct(calibrated);
        strategy.set_stop_loss_enabled(true);
        log::info!(
            "[FIT] {}/{} done: {} round-trips, drawdown {:.2}%, sharpe {}",
            cfg.symbol_x,
            cfg.symbol_y,
            fit.round_trips,
            fit.max_drawdown_pct,
            format_sharpe(fit.sharpe_ratio)
        );

        let live_run = self.live_phase(&mut model, &x, &y, split, &mut strategy, &mut ledger, cutover)?;
        let total = strategy.equity_record().len();
        let live = self.phase_report(&strategy, fit_len, total, live_run);
        log::info!(
            "[LIVE] {}/{} done: {} round-trips, buying power {:.2}{}",
            cfg.symbol_x,
            cfg.symbol_y,
            live.round_trips,
            strategy.buying_power(),
            if strategy.continue_trading() { "" } else { " (stopped out)" }
        );

        Ok(SimulationReport {
            symbol_x: cfg.symbol_x.clone(),
            symbol_y: cfg.symbol_y.clone(),
            cutover,
            fit,
            calibrated_max_dd_pct: calibrated,
            live,
            final_buying_power: strategy.buying_power(),
            stopped: !strategy.continue_trading(),
            open_position: strategy.side().is_some(),
        })
    }

    fn fit_phase(
        &self,
        model: &PairModel,
        strategy: &mut PairsStrategy,
        ledger: &mut Ledger,
        cutover: NaiveDateTime,
    ) -> Result<PhaseRun, SimulationError> {
        // Skip ahead to the first timestamp with a defined signal.
        let mut ts = ledger.current_timestamp();
        while let Some(t) = ts {
            if t >= cutover || model.get_zscore(t).is_some() {
                break;
            }
            ts = ledger.advance();
        }

        let mut run = PhaseRun {
            start: ts.filter(|t| *t < cutover),
            end: None,
            steps: 0,
        };
        while let Some(t) = ts {
            if t >= cutover {
                break;
            }
            let (Some(beta), Some(z)) = (model.get_beta(t), model.get_zscore(t)) else {
                log::debug!("[FIT] signal undefined at {}, ending phase", t);
                break;
            };
            if !self.step(strategy, ledger, z, beta)? {
                break;
            }
            run.end = Some(t);
            run.steps += 1;
            ts = ledger.advance();
        }
        Ok(run)
    }

    #[allow(clippy::too_many_arguments)]
    fn live_phase(
        &self,
        model: &mut PairModel,
        x: &BarSeries,
        y: &BarSeries,
        mut next_bar: usize,
        strategy: &mut PairsStrategy,
        ledger: &mut Ledger,
        cutover: NaiveDateTime,
    ) -> Result<PhaseRun, SimulationError> {
        let mut ts = ledger.seek(cutover);
        let mut run = PhaseRun {
            start: ts,
            end: None,
            steps: 0,
        };
        while let Some(t) = ts {
            while next_bar < x.len() && x.index()[next_bar] <= t {
                model.update(&x.bars()[next_bar], &y.bars()[next_bar])?;
                next_bar += 1;
            }
            let (Some(beta), Some(z)) = (model.get_beta(t), model.get_zscore(t)) else {
                log::debug!("[LIVE] signal undefined at {}, ending phase", t);
                break;
            };
            if !self.step(strategy, ledger, z, beta)? {
                break;
            }
            run.end = Some(t);
            run.steps += 1;
            ts = ledger.advance();
        }
        Ok(run)
    }

    /// One strategy update. Returns false when the phase has to stop.
    fn step(
        &self,
        strategy: &mut PairsStrategy,
        ledger: &mut Ledger,
        z: f64,
        beta: f64,
    ) -> Result<bool, SimulationError> {
        let (coeff_x, coeff_y) = self.cfg.hedge_convention.coefficients(beta);
        match strategy.update(ledger, z, coeff_x, coeff_y) {
            Ok(Transition::PriceMissing) => {
                log::warn!(
                    "[{}] no price at {:?}, skipping step",
                    self.pair_tag(),
                    ledger.current_timestamp()
                );
                Ok(true)
            }
            Ok(_) => Ok(true),
            Err(e) if e.is_recoverable() => {
                log::warn!("[{}] {}, ending phase", self.pair_tag(), e);
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    fn pair_tag(&self) -> String {
        format!("{}/{}", self.cfg.symbol_x, self.cfg.symbol_y)
    }

    /// Metrics over `record[from..to]`. If the slice opens with an exit the
    /// matching entry is pulled in so entries and exits keep alternating.
    fn phase_report(
        &self,
        strategy: &PairsStrategy,
        from: usize,
        to: usize,
        run: PhaseRun,
    ) -> PhaseReport {
        let record = strategy.equity_record();
        let aligned = from - from % 2;
        let start_equity = match aligned {
            0 => strategy.initial_buying_power(),
            i => record[i - 1].buying_power,
        };
        let metrics = &record[aligned..to];
        let capital = strategy.capital_per_trade();
        PhaseReport {
            start: run.start,
            end: run.end,
            steps: run.steps,
            round_trips: record[from..to]
                .iter()
                .enumerate()
                .filter(|(i, _)| (from + i) % 2 == 1)
                .count(),
            equity_record: record[from..to].to_vec(),
            sharpe_ratio: sharpe_ratio(metrics, start_equity, capital, self.cfg.risk_free_rate),
            max_drawdown_pct: max_drawdown_pct(metrics, start_equity, capital),
        }
    }
}

fn format_sharpe(sharpe: Option<f64>) -> String {
    match sharpe {
        Some(s) => format!("{:.4}", s),
        None => "n/a".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::{Bar, BarInterval, PriceField};
    use crate::model::HedgeMode;
    use crate::ports::bar_source::InMemoryBarSource;
    use crate::ports::synthetic::{generate, SyntheticConfig};
    use crate::risk::DEFAULT_RISK_FREE_RATE;
    use chrono::NaiveDate;

    fn config(mode: HedgeMode) -> SimulationConfig {
        SimulationConfig {
            symbol_x: "XXX".to_string(),
            symbol_y: "YYY".to_string(),
            model: PairModelConfig {
                window_size: 20,
                mode,
                rolling_intercept: false,
                price_field: PriceField::Open,
            },
            hedge_convention: HedgeConvention::DollarNeutral,
            fit_bars: 210,
            cutover: None,
            strategy: StrategyParams {
                initial_buying_power: 1000.0,
                capital_per_trade: 1000.0,
                z_enter: 1.0,
                z_exit: 0.5,
                max_dd_pct: 100.0,
            },
            stop_loss: StopLossPolicy::default(),
            risk_free_rate: DEFAULT_RISK_FREE_RATE,
        }
    }

    fn synthetic(seed: u64) -> Arc<InMemoryBarSource> {
        let symbols = vec!["XXX".to_string(), "YYY".to_string()];
        let cfg = SyntheticConfig {
            seed,
            bars: 252,
            start: NaiveDate::from_ymd_opt(2023, 1, 2).unwrap(),
            interval: BarInterval::Day,
        };
        Arc::new(generate(&symbols, &cfg).unwrap())
    }

    fn run(cfg: SimulationConfig, source: Arc<InMemoryBarSource>) -> Result<SimulationReport, SimulationError> {
        let x = source.get_bars(&cfg.symbol_x).unwrap();
        let calendar = Calendar::from_timestamps(x.index().iter().copied());
        Driver::new(cfg, source, calendar).run()
    }

    fn assert_alternating(record: &[EquityPoint]) {
        assert!(record.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
    }

    #[test]
    fn static_run_is_reproducible() {
        let first = run(config(HedgeMode::Static), synthetic(42)).unwrap();
        let second = run(config(HedgeMode::Static), synthetic(42)).unwrap();
        assert_eq!(first, second);

        let x = synthetic(42).get_bars("XXX").unwrap();
        assert_eq!(first.cutover, x.index()[210]);
        assert!(!first.fit.equity_record.is_empty());
        assert!(first.fit.equity_record.iter().all(|p| p.timestamp < first.cutover));
        assert!(first.live.equity_record.iter().all(|p| p.timestamp >= first.cutover));
        assert_alternating(&first.fit.equity_record);
        assert_alternating(&first.live.equity_record);
        assert!((1.0..=50.0).contains(&first.calibrated_max_dd_pct));
        assert_eq!(first.fit.round_trips, first.fit.equity_record.len() / 2);
        assert_eq!(first.fit.steps, 210 - 20 + 1);
        assert_eq!(first.live.steps, 252 - 210);
    }

    #[test]
    fn rolling_run_completes() {
        let report = run(config(HedgeMode::Rolling), synthetic(3)).unwrap();
        // the rolling beta needs 2W-1 bars before the first signal
        assert_eq!(report.fit.steps, 210 - (2 * 20 - 1) + 1);
        assert_eq!(report.live.steps, 252 - 210);
    }

    #[test]
    fn explicit_cutover_is_honoured() {
        let source = synthetic(5);
        let x = source.get_bars("XXX").unwrap();
        let mut cfg = config(HedgeMode::Static);
        cfg.cutover = Some(x.index()[150]);
        let report = run(cfg, source).unwrap();
        assert_eq!(report.cutover, x.index()[150]);
        assert_eq!(report.live.steps, 252 - 150);
    }

    fn day(i: usize) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2023, 1, 2)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
            + chrono::Duration::days(i as i64)
    }

    fn flat_bar(i: usize, price: f64) -> Bar {
        Bar {
            timestamp: day(i),
            open: price,
            high: price,
            low: price,
            close: price,
            volume: 0.0,
        }
    }

    /// `Y = 2X + 5` over the first `calm` bars, then Y runs away from the
    /// hedge by 10 per bar.
    fn runaway_spread(bars: usize, calm: usize) -> Arc<InMemoryBarSource> {
        let x: Vec<Bar> = (0..bars).map(|i| flat_bar(i, 100.0 + i as f64)).collect();
        let y: Vec<Bar> = (0..bars)
            .map(|i| {
                let drift = 10.0 * i.saturating_sub(calm - 1) as f64;
                flat_bar(i, 2.0 * (100.0 + i as f64) + 5.0 + drift)
            })
            .collect();
        let source: InMemoryBarSource = [
            BarSeries::from_bars("XXX", x).unwrap(),
            BarSeries::from_bars("YYY", y).unwrap(),
        ]
        .into_iter()
        .collect();
        Arc::new(source)
    }

    #[test]
    fn live_phase_stops_out_at_calibrated_floor() {
        let mut cfg = config(HedgeMode::Static);
        cfg.model.window_size = 5;
        cfg.cutover = Some(day(4));
        let report = run(cfg, runaway_spread(10, 4)).unwrap();

        // No in-sample signal, so no fit drawdown and the threshold sits at the floor.
        assert_eq!(report.fit.steps, 0);
        assert!(report.fit.equity_record.is_empty());
        assert_eq!(report.fit.max_drawdown_pct, 0.0);
        assert_eq!(report.calibrated_max_dd_pct, 1.0);

        // Short spread at day 4, stopped out on day 5 at a ~4.75% loss.
        assert!(report.stopped);
        assert!(!report.open_position);
        let record = &report.live.equity_record;
        assert_eq!(record.len(), 2);
        assert_eq!(record[0].timestamp, day(4));
        assert_eq!(record[1].timestamp, day(5));
        assert!(record[1].buying_power < 990.0);
        assert!((report.final_buying_power - 952.5).abs() < 0.1);
        assert_eq!(report.live.round_trips, 1);
        assert!(report.live.max_drawdown_pct > report.calibrated_max_dd_pct);
    }

    #[test]
    fn fit_phase_stop_loss_can_be_disarmed() {
        let baseline = run(config(HedgeMode::Static), synthetic(42)).unwrap();
        assert!(!baseline.fit.equity_record.is_empty());

        // Armed in the fit phase, a hair-trigger threshold ends trading there.
        let mut armed = config(HedgeMode::Static);
        armed.strategy.max_dd_pct = 0.0001;
        let armed = run(armed, synthetic(42)).unwrap();
        assert!(armed.stopped);
        assert_eq!(armed.fit.equity_record.len() % 2, 0);
        assert!(armed.fit.equity_record.len() <= baseline.fit.equity_record.len());
        assert!(armed.live.equity_record.is_empty());
        assert_eq!(armed.live.round_trips, 0);

        // Disarmed, the same threshold never fires before the cutover and the
        // live phase runs with the calibrated one.
        let mut disarmed = config(HedgeMode::Static);
        disarmed.strategy.max_dd_pct = 0.0001;
        disarmed.stop_loss.apply_in_fit_phase = false;
        let disarmed = run(disarmed, synthetic(42)).unwrap();
        assert_eq!(disarmed, baseline);
    }

    #[test]
    fn mismatched_index_aborts() {
        let source = synthetic(1);
        let x = source.get_bars("XXX").unwrap();
        let y = source.get_bars("YYY").unwrap();
        let shifted: Vec<Bar> = y.bars()[1..].to_vec();
        let broken: InMemoryBarSource = [
            (*x).clone(),
            BarSeries::from_bars("YYY", shifted).unwrap(),
        ]
        .into_iter()
        .collect();
        let err = run(config(HedgeMode::Static), Arc::new(broken)).unwrap_err();
        assert!(matches!(err, SimulationError::MismatchedIndex { .. }));
    }

    #[test]
    fn missing_symbol_aborts() {
        let mut cfg = config(HedgeMode::Static);
        cfg.symbol_y = "ZZZ".to_string();
        let err = run(cfg, synthetic(1)).unwrap_err();
        assert_eq!(err, SimulationError::MissingBars("ZZZ".to_string()));
    }

    #[test]
    fn too_few_bars_for_cutover() {
        let mut cfg = config(HedgeMode::Static);
        cfg.fit_bars = 500;
        let err = run(cfg, synthetic(1)).unwrap_err();
        assert!(matches!(err, SimulationError::InsufficientHistory { .. }));
    }
}
