use anyhow::{anyhow, Context, Result};
use chrono::NaiveDateTime;
use serde::Deserialize;
use std::env;
use std::fs::File;
use std::path::Path;

use crate::driver::SimulationConfig;
use crate::market::{BarInterval, PriceField};
use crate::model::series::parse_timestamp;
use crate::model::{HedgeMode, PairModelConfig};
use crate::risk::{StopLossPolicy, DEFAULT_RISK_FREE_RATE};
use crate::strategy::{HedgeConvention, StrategyParams};

const DEFAULT_UNIVERSE_PAIRS: &str = "XXX/YYY";
const DEFAULT_WINDOW_SIZE: usize = 30;
const DEFAULT_FIT_BARS: usize = 210;
const DEFAULT_Z_ENTER: f64 = 2.0;
const DEFAULT_Z_EXIT: f64 = 0.5;
const DEFAULT_CAPITAL_PER_TRADE: f64 = 1_000.0;
const DEFAULT_INITIAL_BUYING_POWER: f64 = 10_000.0;
const DEFAULT_INITIAL_MAX_DD_PCT: f64 = 100.0;
const DEFAULT_SYNTHETIC_SEED: u64 = 42;
const DEFAULT_SYNTHETIC_BARS: usize = 252;

#[derive(Debug, Deserialize, Clone)]
#[serde(untagged)]
enum StringOrVec {
    String(String),
    Vec(Vec<String>),
}

impl StringOrVec {
    fn into_joined(self) -> String {
        match self {
            StringOrVec::String(value) => value,
            StringOrVec::Vec(values) => values.join(","),
        }
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
struct BacktestYaml {
    universe_pairs: Option<StringOrVec>,
    bar_source: Option<String>,
    bars_file: Option<String>,
    bars_dir: Option<String>,
    calendar_file: Option<String>,
    interval: Option<String>,
    price_field: Option<String>,
    window_size: Option<usize>,
    hedge_mode: Option<String>,
    rolling_intercept: Option<bool>,
    hedge_convention: Option<String>,
    fit_bars: Option<usize>,
    cutover: Option<String>,
    z_enter: Option<f64>,
    z_exit: Option<f64>,
    capital_per_trade: Option<f64>,
    initial_buying_power: Option<f64>,
    initial_max_dd_pct: Option<f64>,
    stop_loss_min_pct: Option<f64>,
    stop_loss_max_pct: Option<f64>,
    stop_loss_in_fit_phase: Option<bool>,
    risk_free_rate: Option<f64>,
    report_dir: Option<String>,
    synthetic_seed: Option<u64>,
    synthetic_bars: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairSpec {
    pub base: String,
    pub quote: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BarSourceKind {
    Synthetic,
    Jsonl,
    CsvDir,
}

impl std::str::FromStr for BarSourceKind {
    type Err = ();
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "synthetic" => Ok(BarSourceKind::Synthetic),
            "jsonl" | "replay" => Ok(BarSourceKind::Jsonl),
            "csv_dir" | "csv" => Ok(BarSourceKind::CsvDir),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BacktestConfig {
    pub universe: Vec<PairSpec>,
    pub bar_source: BarSourceKind,
    pub bars_file: Option<String>,
    pub bars_dir: Option<String>,
    pub calendar_file: Option<String>,
    pub interval: BarInterval,
    pub price_field: PriceField,
    pub window_size: usize,
    pub hedge_mode: HedgeMode,
    pub rolling_intercept: bool,
    pub hedge_convention: HedgeConvention,
    pub fit_bars: usize,
    pub cutover: Option<NaiveDateTime>,
    pub z_enter: f64,
    pub z_exit: f64,
    pub capital_per_trade: f64,
    pub initial_buying_power: f64,
    pub initial_max_dd_pct: f64,
    pub stop_loss: StopLossPolicy,
    pub risk_free_rate: f64,
    pub report_dir: Option<String>,
    pub synthetic_seed: u64,
    pub synthetic_bars: usize,
}

impl BacktestConfig {
    pub fn from_env_or_yaml() -> Result<Self> {
        let config_path = env::var("BACKTEST_CONFIG_PATH")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .or_else(|| {
                env::var("PAIRTRADE_CONFIG_PATH")
                    .ok()
                    .filter(|value| !value.trim().is_empty())
            });
        if let Some(path) = config_path {
            return Self::from_yaml_path(path);
        }
        Self::from_env()
    }

    pub fn from_yaml_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_ref = path.as_ref();
        let file = File::open(path_ref)
            .with_context(|| format!("failed to open backtest config {}", path_ref.display()))?;
        let yaml: BacktestYaml = serde_yaml::from_reader(file)
            .with_context(|| format!("failed to parse backtest config {}", path_ref.display()))?;
        let mut cfg = Self::from_yaml(yaml)?;
        cfg.apply_env_overrides()?;
        cfg.validate()?;
        log::info!("[CONFIG] loaded {}", path_ref.display());
        Ok(cfg)
    }

    pub fn from_env() -> Result<Self> {
        let mut cfg = Self::from_yaml(BacktestYaml::default())?;
        cfg.apply_env_overrides()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_yaml(yaml: BacktestYaml) -> Result<Self> {
        let universe_raw = yaml
            .universe_pairs
            .map(StringOrVec::into_joined)
            .unwrap_or_else(|| DEFAULT_UNIVERSE_PAIRS.to_string());
        let defaults = StopLossPolicy::default();

        Ok(BacktestConfig {
            universe: parse_pairs_list(&universe_raw)?,
            bar_source: parse_or(yaml.bar_source.as_deref(), "bar_source", BarSourceKind::Synthetic)?,
            bars_file: yaml.bars_file,
            bars_dir: yaml.bars_dir,
            calendar_file: yaml.calendar_file,
            interval: parse_or(yaml.interval.as_deref(), "interval", BarInterval::Day)?,
            price_field: parse_or(yaml.price_field.as_deref(), "price_field", PriceField::Open)?,
            window_size: yaml.window_size.unwrap_or(DEFAULT_WINDOW_SIZE),
            hedge_mode: parse_or(yaml.hedge_mode.as_deref(), "hedge_mode", HedgeMode::Static)?,
            rolling_intercept: yaml.rolling_intercept.unwrap_or(false),
            hedge_convention: parse_or(
                yaml.hedge_convention.as_deref(),
                "hedge_convention",
                HedgeConvention::DollarNeutral,
            )?,
            fit_bars: yaml.fit_bars.unwrap_or(DEFAULT_FIT_BARS),
            cutover: yaml.cutover.as_deref().map(parse_cutover).transpose()?,
            z_enter: yaml.z_enter.unwrap_or(DEFAULT_Z_ENTER),
            z_exit: yaml.z_exit.unwrap_or(DEFAULT_Z_EXIT),
            capital_per_trade: yaml.capital_per_trade.unwrap_or(DEFAULT_CAPITAL_PER_TRADE),
            initial_buying_power: yaml
                .initial_buying_power
                .unwrap_or(DEFAULT_INITIAL_BUYING_POWER),
            initial_max_dd_pct: yaml.initial_max_dd_pct.unwrap_or(DEFAULT_INITIAL_MAX_DD_PCT),
            stop_loss: StopLossPolicy {
                min_pct: yaml.stop_loss_min_pct.unwrap_or(defaults.min_pct),
                max_pct: yaml.stop_loss_max_pct.unwrap_or(defaults.max_pct),
                apply_in_fit_phase: yaml
                    .stop_loss_in_fit_phase
                    .unwrap_or(defaults.apply_in_fit_phase),
            },
            risk_free_rate: yaml.risk_free_rate.unwrap_or(DEFAULT_RISK_FREE_RATE),
            report_dir: yaml.report_dir,
            synthetic_seed: yaml.synthetic_seed.unwrap_or(DEFAULT_SYNTHETIC_SEED),
            synthetic_bars: yaml.synthetic_bars.unwrap_or(DEFAULT_SYNTHETIC_BARS),
        })
    }

    fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides(|key| env::var(key).ok())
    }

    /// Applies `UPPER_CASE` overrides from `lookup`. Blank values are ignored.
    fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(value) = get("UNIVERSE_PAIRS") {
            self.universe = parse_pairs_list(&value)?;
        }
        if let Some(value) = get("BAR_SOURCE") {
            self.bar_source = parse_named(&value, "BAR_SOURCE")?;
        }
        if let Some(value) = get("BARS_FILE") {
            self.bars_file = Some(value);
        }
        if let Some(value) = get("BARS_DIR") {
            self.bars_dir = Some(value);
        }
        if let Some(value) = get("CALENDAR_FILE") {
            self.calendar_file = Some(value);
        }
        if let Some(value) = get("INTERVAL") {
            self.interval = parse_named(&value, "INTERVAL")?;
        }
        if let Some(value) = get("PRICE_FIELD") {
            self.price_field = parse_named(&value, "PRICE_FIELD")?;
        }
        if let Some(value) = get("WINDOW_SIZE") {
            if let Ok(parsed) = value.parse() {
                self.window_size = parsed;
            }
        }
        if let Some(value) = get("HEDGE_MODE") {
            self.hedge_mode = parse_named(&value, "HEDGE_MODE")?;
        }
        if let Some(value) = get("ROLLING_INTERCEPT") {
            self.rolling_intercept = value.to_lowercase() == "true";
        }
        if let Some(value) = get("HEDGE_CONVENTION") {
            self.hedge_convention = parse_named(&value, "HEDGE_CONVENTION")?;
        }
        if let Some(value) = get("FIT_BARS") {
            if let Ok(parsed) = value.parse() {
                self.fit_bars = parsed;
            }
        }
        if let Some(value) = get("CUTOVER") {
            self.cutover = Some(parse_cutover(&value)?);
        }
        if let Some(value) = get("Z_ENTER") {
            if let Ok(parsed) = value.parse() {
                self.z_enter = parsed;
            }
        }
        if let Some(value) = get("Z_EXIT") {
            if let Ok(parsed) = value.parse() {
                self.z_exit = parsed;
            }
        }
        if let Some(value) = get("CAPITAL_PER_TRADE") {
            if let Ok(parsed) = value.parse() {
                self.capital_per_trade = parsed;
            }
        }
        if let Some(value) = get("INITIAL_BUYING_POWER") {
            if let Ok(parsed) = value.parse() {
                self.initial_buying_power = parsed;
            }
        }
        if let Some(value) = get("INITIAL_MAX_DD_PCT") {
            if let Ok(parsed) = value.parse() {
                self.initial_max_dd_pct = parsed;
            }
        }
        if let Some(value) = get("STOP_LOSS_MIN_PCT") {
            if let Ok(parsed) = value.parse() {
                self.stop_loss.min_pct = parsed;
            }
        }
        if let Some(value) = get("STOP_LOSS_MAX_PCT") {
            if let Ok(parsed) = value.parse() {
                self.stop_loss.max_pct = parsed;
            }
        }
        if let Some(value) = get("STOP_LOSS_IN_FIT_PHASE") {
            self.stop_loss.apply_in_fit_phase = value.to_lowercase() == "true";
        }
        if let Some(value) = get("RISK_FREE_RATE") {
            if let Ok(parsed) = value.parse() {
                self.risk_free_rate = parsed;
            }
        }
        if let Some(value) = get("REPORT_DIR") {
            self.report_dir = Some(value);
        }
        if let Some(value) = get("SYNTHETIC_SEED") {
            if let Ok(parsed) = value.parse() {
                self.synthetic_seed = parsed;
            }
        }
        if let Some(value) = get("SYNTHETIC_BARS") {
            if let Ok(parsed) = value.parse() {
                self.synthetic_bars = parsed;
            }
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.window_size < 2 {
            return Err(anyhow!("window_size must be at least 2, got {}", self.window_size));
        }
        if !(self.z_exit < self.z_enter) {
            return Err(anyhow!(
                "z_exit ({}) must be below z_enter ({})",
                self.z_exit,
                self.z_enter
            ));
        }
        if !(self.capital_per_trade > 0.0) || !(self.initial_buying_power > 0.0) {
            return Err(anyhow!("capital_per_trade and initial_buying_power must be positive"));
        }
        if self.stop_loss.min_pct > self.stop_loss.max_pct {
            return Err(anyhow!(
                "stop_loss_min_pct ({}) exceeds stop_loss_max_pct ({})",
                self.stop_loss.min_pct,
                self.stop_loss.max_pct
            ));
        }
        match self.bar_source {
            BarSourceKind::Jsonl if self.bars_file.is_none() => {
                return Err(anyhow!("bar_source jsonl requires bars_file"));
            }
            BarSourceKind::CsvDir if self.bars_dir.is_none() => {
                return Err(anyhow!("bar_source csv_dir requires bars_dir"));
            }
            _ => {}
        }
        if let Some(pair) = self.universe.iter().find(|p| p.base == p.quote) {
            return Err(anyhow!("pair {}/{} uses the same symbol twice", pair.base, pair.quote));
        }
        Ok(())
    }

    /// Every distinct symbol in the universe, in first-seen order.
    pub fn symbols(&self) -> Vec<String> {
        let mut symbols: Vec<String> = Vec::new();
        for pair in &self.universe {
            for symbol in [&pair.base, &pair.quote] {
                if !symbols.contains(symbol) {
                    symbols.push(symbol.clone());
                }
            }
        }
        symbols
    }

    pub fn simulation_config(&self, pair: &PairSpec) -> SimulationConfig {
        SimulationConfig {
            symbol_x: pair.base.clone(),
            symbol_y: pair.quote.clone(),
            model: PairModelConfig {
                window_size: self.window_size,
                mode: self.hedge_mode,
                rolling_intercept: self.rolling_intercept,
                price_field: self.price_field,
            },
            hedge_convention: self.hedge_convention,
            fit_bars: self.fit_bars,
            cutover: self.cutover,
            strategy: StrategyParams {
                initial_buying_power: self.initial_buying_power,
                capital_per_trade: self.capital_per_trade,
                z_enter: self.z_enter,
                z_exit: self.z_exit,
                max_dd_pct: self.initial_max_dd_pct,
            },
            stop_loss: self.stop_loss,
            risk_free_rate: self.risk_free_rate,
        }
    }
}

fn parse_or<T: std::str::FromStr>(raw: Option<&str>, key: &str, default: T) -> Result<T> {
    match raw {
        Some(value) => parse_named(value, key),
        None => Ok(default),
    }
}

fn parse_named<T: std::str::FromStr>(raw: &str, key: &str) -> Result<T> {
    raw.parse()
        .map_err(|_| anyhow!("invalid {} value: {}", key, raw))
}

fn parse_cutover(raw: &str) -> Result<NaiveDateTime> {
    parse_timestamp(raw).map_err(|e| anyhow!("invalid cutover: {}", e))
}

fn parse_pairs_list(raw: &str) -> Result<Vec<PairSpec>> {
    let mut pairs = Vec::new();
    for part in raw.split(',') {
        let trimmed = part.trim();
        if trimmed.is_empty() {
            continue;
        }
        let mut split = trimmed.split('/');
        let base = split
            .next()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| anyhow!("invalid pair: {}", trimmed))?;
        let quote = split
            .next()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| anyhow!("invalid pair: {}", trimmed))?;
        if split.next().is_some() {
            return Err(anyhow!("invalid pair: {}", trimmed));
        }
        pairs.push(PairSpec {
            base: base.to_string(),
            quote: quote.to_string(),
        });
    }
    if pairs.is_empty() {
        return Err(anyhow!("UNIVERSE_PAIRS produced no valid pairs"));
    }
    Ok(pairs)
}
