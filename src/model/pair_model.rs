use chrono::NaiveDateTime;
use serde::Serialize;
use std::iter;

use crate::error::SimulationError;
use crate::market::{ensure_aligned, Bar, BarSeries, PriceField};
use crate::model::series::{parse_timestamp, TimeIndexed};
use crate::model::stats::{ols, ols_through_origin, zscore_of_last, LinearFit};

/// How the hedge coefficient is estimated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HedgeMode {
    /// One OLS fit over the in-sample window, frozen afterwards.
    #[default]
    Static,
    /// OLS over the trailing window, refitted at every observation.
    Rolling,
}

impl std::str::FromStr for HedgeMode {
    type Err = ();
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "static" => Ok(HedgeMode::Static),
            "rolling" => Ok(HedgeMode::Rolling),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PairModelConfig {
    pub window_size: usize,
    pub mode: HedgeMode,
    /// Rolling mode only: fit an intercept per window instead of regressing
    /// through the origin.
    pub rolling_intercept: bool,
    pub price_field: PriceField,
}

/// One aligned observation and everything derived from it. Undefined
/// quantities are NaN.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PairPoint {
    pub x: f64,
    pub y: f64,
    pub alpha: f64,
    pub beta: f64,
    pub spread: f64,
    pub zscore: f64,
}

#[derive(Debug, Clone)]
pub struct PairModel {
    cfg: PairModelConfig,
    symbol_x: String,
    symbol_y: String,
    static_fit: Option<LinearFit>,
    points: TimeIndexed<PairPoint>,
}

impl PairModel {
    /// Fits the model on aligned in-sample series and computes spread and
    /// z-score for every in-sample timestamp.
    pub fn fit(x: &BarSeries, y: &BarSeries, cfg: PairModelConfig) -> Result<Self, SimulationError> {
        ensure_aligned(x, y)?;
        if cfg.window_size < 2 {
            return Err(SimulationError::InsufficientHistory {
                needed: 2,
                available: cfg.window_size,
            });
        }

        let static_fit = match cfg.mode {
            HedgeMode::Static => {
                if x.len() < 2 {
                    return Err(SimulationError::InsufficientHistory {
                        needed: 2,
                        available: x.len(),
                    });
                }
                let xs: Vec<f64> = x.bars().iter().map(|b| b.price(cfg.price_field)).collect();
                let ys: Vec<f64> = y.bars().iter().map(|b| b.price(cfg.price_field)).collect();
                let fit = ols(&xs, &ys).ok_or_else(|| {
                    SimulationError::DegenerateFit(format!(
                        "{} has no variance over {} in-sample bars",
                        x.symbol(),
                        xs.len()
                    ))
                })?;
                log::info!(
                    "[MODEL] {}/{} static fit over {} bars: alpha={:.6} beta={:.6}",
                    y.symbol(),
                    x.symbol(),
                    xs.len(),
                    fit.alpha,
                    fit.beta
                );
                Some(fit)
            }
            HedgeMode::Rolling => None,
        };

        let mut model = Self {
            cfg,
            symbol_x: x.symbol().to_string(),
            symbol_y: y.symbol().to_string(),
            static_fit,
            points: TimeIndexed::with_capacity(x.len()),
        };
        for (bx, by) in x.bars().iter().zip(y.bars()) {
            model.ingest(bx.timestamp, bx.price(cfg.price_field), by.price(cfg.price_field))?;
        }
        log::info!(
            "[MODEL] {}/{} initialised with {} observations (mode={:?}, window={})",
            model.symbol_y,
            model.symbol_x,
            model.len(),
            cfg.mode,
            cfg.window_size
        );
        Ok(model)
    }

    /// Appends one aligned observation. Work is bounded by the window size.
    pub fn update(&mut self, bar_x: &Bar, bar_y: &Bar) -> Result<PairPoint, SimulationError> {
        if bar_x.timestamp != bar_y.timestamp {
            return Err(SimulationError::MismatchedIndex {
                symbol_x: self.symbol_x.clone(),
                symbol_y: self.symbol_y.clone(),
                detail: format!("update at {} vs {}", bar_x.timestamp, bar_y.timestamp),
            });
        }
        let point = self.ingest(
            bar_x.timestamp,
            bar_x.price(self.cfg.price_field),
            bar_y.price(self.cfg.price_field),
        )?;
        log::debug!(
            "[MODEL] {}/{} {} beta={:.6} spread={:.6} z={:.4}",
            self.symbol_y,
            self.symbol_x,
            bar_x.timestamp,
            point.beta,
            point.spread,
            point.zscore
        );
        Ok(point)
    }

    fn ingest(&mut self, ts: NaiveDateTime, px: f64, py: f64) -> Result<PairPoint, SimulationError> {
        if let Some(previous) = self.points.last_timestamp() {
            if ts <= previous {
                return Err(SimulationError::NonMonotonicTimestamp { previous, next: ts });
            }
        }
        // The new observation plus this history makes up the trailing window.
        let window = self.cfg.window_size;
        let history = self.points.tail(window - 1);
        let full_window = history.len() + 1 >= window;

        let fit = match self.cfg.mode {
            HedgeMode::Static => self.static_fit,
            HedgeMode::Rolling if full_window => {
                let wx: Vec<f64> = history.iter().map(|p| p.x).chain(iter::once(px)).collect();
                let wy: Vec<f64> = history.iter().map(|p| p.y).chain(iter::once(py)).collect();
                if self.cfg.rolling_intercept {
                    ols(&wx, &wy)
                } else {
                    ols_through_origin(&wx, &wy)
                }
            }
            HedgeMode::Rolling => None,
        };

        let spread = fit.map(|f| f.residual(px, py)).unwrap_or(f64::NAN);
        let zscore = if full_window {
            let spreads: Vec<f64> = history
                .iter()
                .map(|p| p.spread)
                .chain(iter::once(spread))
                .collect();
            zscore_of_last(&spreads)
        } else {
            f64::NAN
        };

        let point = PairPoint {
            x: px,
            y: py,
            alpha: fit.map(|f| f.alpha).unwrap_or(f64::NAN),
            beta: fit.map(|f| f.beta).unwrap_or(f64::NAN),
            spread,
            zscore,
        };
        self.points.push(ts, point)?;
        Ok(point)
    }

    /// Z-score at exactly `ts`; `None` when absent or undefined.
    pub fn get_zscore(&self, ts: NaiveDateTime) -> Option<f64> {
        self.points
            .get(ts)
            .map(|p| p.zscore)
            .filter(|z| z.is_finite())
    }

    /// Hedge ratio at `ts`. A static model answers with its fitted beta.
    pub fn get_beta(&self, ts: NaiveDateTime) -> Option<f64> {
        if let Some(fit) = self.static_fit {
            return Some(fit.beta);
        }
        self.points
            .get(ts)
            .map(|p| p.beta)
            .filter(|b| b.is_finite())
    }

    pub fn zscore_at(&self, raw: &str) -> Result<Option<f64>, SimulationError> {
        Ok(self.get_zscore(parse_timestamp(raw)?))
    }

    pub fn beta_at(&self, raw: &str) -> Result<Option<f64>, SimulationError> {
        Ok(self.get_beta(parse_timestamp(raw)?))
    }

    pub fn static_fit(&self) -> Option<LinearFit> {
        self.static_fit
    }

    pub fn last_timestamp(&self) -> Option<NaiveDateTime> {
        self.points.last_timestamp()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Observations needed before the first defined z-score.
    pub fn warmup_len(&self) -> usize {
        match self.cfg.mode {
            HedgeMode::Static => self.cfg.window_size,
            HedgeMode::Rolling => 2 * self.cfg.window_size - 1,
        }
    }
}
