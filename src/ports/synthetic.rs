use anyhow::{anyhow, Result};
use chrono::{Datelike, Duration, NaiveDate, Weekday};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};

use crate::market::{Bar, BarInterval, BarSeries, Calendar};
use crate::ports::bar_source::InMemoryBarSource;

const FACTOR_START: f64 = 50.0;
const FACTOR_STEP_SD: f64 = 0.5;
const IDIO_SD: f64 = 0.3;
const IDIO_PERSISTENCE: f64 = 0.8;
const INTRABAR_SD: f64 = 0.1;

#[derive(Debug, Clone)]
pub struct SyntheticConfig {
    pub seed: u64,
    pub bars: usize,
    pub start: NaiveDate,
    pub interval: BarInterval,
}

/// Generates bars for `symbols` that all load on one random-walk factor, so
/// every pair among them is cointegrated. Symbol `k` follows
/// `10 + 5k + (1 + 0.5k) * factor + AR(1) noise`. Output depends only on the
/// config and the order of `symbols`.
pub fn generate(symbols: &[String], cfg: &SyntheticConfig) -> Result<InMemoryBarSource> {
    if cfg.bars == 0 {
        return Err(anyhow!("synthetic source needs at least one bar"));
    }
    let timestamps = session_timestamps(cfg);
    let factor_step =
        Normal::new(0.0, FACTOR_STEP_SD).map_err(|e| anyhow!("factor distribution: {}", e))?;
    let idio = Normal::new(0.0, IDIO_SD).map_err(|e| anyhow!("noise distribution: {}", e))?;
    let intrabar =
        Normal::new(0.0, INTRABAR_SD).map_err(|e| anyhow!("intrabar distribution: {}", e))?;

    let mut rng = StdRng::seed_from_u64(cfg.seed);
    let mut factor = Vec::with_capacity(cfg.bars);
    let mut level = FACTOR_START;
    for _ in 0..cfg.bars {
        level = (level + factor_step.sample(&mut rng)).max(1.0);
        factor.push(level);
    }

    let mut source = InMemoryBarSource::new();
    for (k, symbol) in symbols.iter().enumerate() {
        let intercept = 10.0 + 5.0 * k as f64;
        let loading = 1.0 + 0.5 * k as f64;
        let mut noise = 0.0;
        let mut series = BarSeries::new(symbol.clone());
        for (ts, f) in timestamps.iter().zip(&factor) {
            noise = IDIO_PERSISTENCE * noise + idio.sample(&mut rng);
            let open = (intercept + loading * f + noise).max(0.01);
            let close = (open + intrabar.sample(&mut rng)).max(0.01);
            let high = open.max(close) + intrabar.sample(&mut rng).abs();
            let low = (open.min(close) - intrabar.sample(&mut rng).abs()).max(0.01);
            let volume = rng.gen_range(50_000.0..150_000.0_f64).round();
            series
                .push(Bar {
                    timestamp: *ts,
                    open,
                    high,
                    low,
                    close,
                    volume,
                })
                .map_err(|e| anyhow!("synthetic bars for {}: {}", symbol, e))?;
        }
        source.insert(series);
    }
    Ok(source)
}

/// Weekday sessions from `cfg.start`, expanded per interval and cut to `cfg.bars`.
pub fn session_timestamps(cfg: &SyntheticConfig) -> Vec<chrono::NaiveDateTime> {
    let per_day = match cfg.interval {
        BarInterval::Day => 1,
        BarInterval::Hour => 7,
    };
    let days_needed = cfg.bars.div_ceil(per_day);
    let mut dates = Vec::with_capacity(days_needed);
    let mut date = cfg.start;
    while dates.len() < days_needed {
        if !matches!(date.weekday(), Weekday::Sat | Weekday::Sun) {
            dates.push(date);
        }
        date += Duration::days(1);
    }
    let calendar = Calendar::from_session_dates(dates, cfg.interval);
    calendar.sessions().iter().take(cfg.bars).copied().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::ensure_aligned;
    use crate::ports::bar_source::BarSource;

    fn cfg(seed: u64, bars: usize) -> SyntheticConfig {
        SyntheticConfig {
            seed,
            bars,
            start: NaiveDate::from_ymd_opt(2023, 1, 2).unwrap(),
            interval: BarInterval::Day,
        }
    }

    fn symbols() -> Vec<String> {
        vec!["XXX".to_string(), "YYY".to_string()]
    }

    #[test]
    fn same_seed_same_bars() {
        let a = generate(&symbols(), &cfg(7, 100)).unwrap();
        let b = generate(&symbols(), &cfg(7, 100)).unwrap();
        let c = generate(&symbols(), &cfg(8, 100)).unwrap();
        let xa = a.get_bars("XXX").unwrap();
        let xb = b.get_bars("XXX").unwrap();
        let xc = c.get_bars("XXX").unwrap();
        assert_eq!(xa.bars(), xb.bars());
        assert_ne!(xa.bars(), xc.bars());
    }

    #[test]
    fn legs_are_aligned_and_skip_weekends() {
        let source = generate(&symbols(), &cfg(1, 20)).unwrap();
        let x = source.get_bars("XXX").unwrap();
        let y = source.get_bars("YYY").unwrap();
        assert_eq!(x.len(), 20);
        assert!(ensure_aligned(&x, &y).is_ok());
        assert!(x
            .index()
            .iter()
            .all(|ts| !matches!(ts.date().weekday(), Weekday::Sat | Weekday::Sun)));
        assert!(x.bars().iter().all(|b| b.low <= b.open && b.open <= b.high));
    }

    #[test]
    fn hourly_sessions_have_seven_bars_per_day() {
        let mut c = cfg(1, 10);
        c.interval = BarInterval::Hour;
        let ts = session_timestamps(&c);
        assert_eq!(ts.len(), 10);
        assert_eq!(ts[0].date(), ts[6].date());
        assert_ne!(ts[6].date(), ts[7].date());
    }
}
