use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use env_logger::Builder;
use log::LevelFilter;
use pairtrade_backtest::config::{BacktestConfig, BarSourceKind, PairSpec};
use pairtrade_backtest::driver::{Driver, SimulationReport};
use pairtrade_backtest::market::Calendar;
use pairtrade_backtest::ports::bar_source::BarSource;
use pairtrade_backtest::ports::csv_bars::CsvDirBarSource;
use pairtrade_backtest::ports::replay_bars::JsonlBarSource;
use pairtrade_backtest::ports::synthetic::{self, SyntheticConfig};
use pairtrade_backtest::report::ReportWriter;
use std::env;
use std::io::Write;
use std::process::ExitCode;
use std::str::FromStr;
use std::sync::Arc;

fn init_logging() -> Result<()> {
    let offset_seconds = env::var("TIMEZONE_OFFSET")
        .unwrap_or_else(|_| "3600".to_string())
        .parse::<i32>()
        .context("Invalid TIMEZONE_OFFSET")?;
    let offset = FixedOffset::east_opt(offset_seconds).ok_or_else(|| anyhow!("Invalid offset"))?;
    Builder::from_default_env()
        .format(move |buf, record| {
            let utc_now: DateTime<Utc> = Utc::now();
            let local_now = utc_now.with_timezone(&offset);
            writeln!(
                buf,
                "{} [{}] - {}",
                local_now.format("%Y-%m-%dT%H:%M:%S%z"),
                record.level(),
                record.args()
            )
        })
        .filter(
            None,
            LevelFilter::from_str(&env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()))
                .unwrap_or(LevelFilter::Info),
        )
        .init();
    Ok(())
}

fn build_source(cfg: &BacktestConfig) -> Result<Arc<dyn BarSource>> {
    let source: Arc<dyn BarSource> = match cfg.bar_source {
        BarSourceKind::Synthetic => {
            let start = NaiveDate::from_ymd_opt(2023, 1, 2)
                .ok_or_else(|| anyhow!("invalid synthetic start date"))?;
            let synthetic_cfg = SyntheticConfig {
                seed: cfg.synthetic_seed,
                bars: cfg.synthetic_bars,
                start,
                interval: cfg.interval,
            };
            log::info!(
                "[BARS] generating {} synthetic bars (seed {})",
                cfg.synthetic_bars,
                cfg.synthetic_seed
            );
            Arc::new(synthetic::generate(&cfg.symbols(), &synthetic_cfg)?)
        }
        BarSourceKind::Jsonl => {
            let path = cfg
                .bars_file
                .as_deref()
                .ok_or_else(|| anyhow!("bars_file is not set"))?;
            let source = JsonlBarSource::new(path)?;
            log::info!("[BARS] replay {} loaded: {:?}", path, source.symbols());
            Arc::new(source)
        }
        BarSourceKind::CsvDir => {
            let dir = cfg
                .bars_dir
                .as_deref()
                .ok_or_else(|| anyhow!("bars_dir is not set"))?;
            Arc::new(CsvDirBarSource::new(dir)?)
        }
    };
    Ok(source)
}

/// The configured session table, or the pair's own bar index.
fn build_calendar(
    cfg: &BacktestConfig,
    source: &dyn BarSource,
    pair: &PairSpec,
) -> Result<Calendar> {
    if let Some(path) = &cfg.calendar_file {
        return Calendar::load(path, cfg.interval);
    }
    let bars = source
        .get_bars(&pair.base)
        .ok_or_else(|| anyhow!("no bars for {}", pair.base))?;
    Ok(Calendar::from_timestamps(bars.index().iter().copied()))
}

fn run_pair(cfg: &BacktestConfig, source: Arc<dyn BarSource>, pair: &PairSpec) -> Result<SimulationReport> {
    let calendar = build_calendar(cfg, source.as_ref(), pair)?;
    let driver = Driver::new(cfg.simulation_config(pair), source, calendar);
    let report = driver
        .run()
        .with_context(|| format!("simulation of {}/{} failed", pair.base, pair.quote))?;
    Ok(report)
}

async fn run(cfg: BacktestConfig) -> Result<usize> {
    let cfg = Arc::new(cfg);
    let source = build_source(&cfg)?;

    let mut handles = Vec::with_capacity(cfg.universe.len());
    for pair in cfg.universe.clone() {
        let cfg = Arc::clone(&cfg);
        let source = Arc::clone(&source);
        let handle = tokio::task::spawn_blocking(move || {
            let result = run_pair(&cfg, source, &pair);
            (pair, result)
        });
        handles.push(handle);
    }

    let writer = cfg.report_dir.as_ref().map(ReportWriter::new);
    let mut failures = 0;
    for handle in handles {
        let (pair, result) = handle.await.context("simulation task panicked")?;
        match result {
            Ok(report) => {
                log::info!(
                    "[RESULT] {} cutover={} fit_trips={} fit_sharpe={} dd={:.2}% live_trips={} live_sharpe={} final_bp={:.2}{}",
                    report.pair_label(),
                    report.cutover,
                    report.fit.round_trips,
                    fmt_opt(report.fit.sharpe_ratio),
                    report.calibrated_max_dd_pct,
                    report.live.round_trips,
                    fmt_opt(report.live.sharpe_ratio),
                    report.final_buying_power,
                    if report.stopped { " STOPPED" } else { "" }
                );
                if let Some(writer) = &writer {
                    if let Err(e) = writer.write(&report) {
                        log::error!("[REPORT] {}/{}: {:#}", pair.base, pair.quote, e);
                        failures += 1;
                    }
                }
            }
            Err(e) => {
                log::error!("[RESULT] {}/{}: {:#}", pair.base, pair.quote, e);
                failures += 1;
            }
        }
    }
    Ok(failures)
}

fn fmt_opt(value: Option<f64>) -> String {
    value
        .map(|v| format!("{:.4}", v))
        .unwrap_or_else(|| "n/a".to_string())
}

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(e) = init_logging() {
        eprintln!("failed to initialise logging: {:#}", e);
        return ExitCode::FAILURE;
    }
    log::info!("Starting pairs backtest...");

    let cfg = match BacktestConfig::from_env_or_yaml() {
        Ok(cfg) => cfg,
        Err(e) => {
            log::error!("[CONFIG] {:#}", e);
            return ExitCode::FAILURE;
        }
    };

    match run(cfg).await {
        Ok(0) => ExitCode::SUCCESS,
        Ok(failures) => {
            log::error!("{} pair(s) failed", failures);
            ExitCode::FAILURE
        }
        Err(e) => {
            log::error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}
