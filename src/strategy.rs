use chrono::NaiveDateTime;
use serde::Serialize;
use std::collections::HashMap;

use crate::error::SimulationError;
use crate::trade::{Ledger, TradeAction};

/// Maps a regression slope to the (coeff_x, coeff_y) pair fed to the strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HedgeConvention {
    /// `(-beta, 1)`: long one unit of Y against beta units of X.
    #[default]
    DollarNeutral,
    /// `(beta, -1)`: the sign-flipped mapping.
    Inverted,
}

impl HedgeConvention {
    pub fn coefficients(self, beta: f64) -> (f64, f64) {
        match self {
            HedgeConvention::DollarNeutral => (-beta, 1.0),
            HedgeConvention::Inverted => (beta, -1.0),
        }
    }
}

impl std::str::FromStr for HedgeConvention {
    type Err = ();
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "dollar_neutral" | "dollar-neutral" => Ok(HedgeConvention::DollarNeutral),
            "inverted" => Ok(HedgeConvention::Inverted),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyState {
    Flat,
    Positioned,
    /// Forced out by the stop-loss. Absorbing.
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SpreadSide {
    /// Entered on z below `-z_enter`.
    Long,
    /// Entered on z above `z_enter`.
    Short,
}

/// Outcome of one `update` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Hold,
    Entered(SpreadSide),
    Exited,
    StoppedOut,
    /// A leg had no price at the current timestamp; nothing was done.
    PriceMissing,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EquityPoint {
    pub timestamp: NaiveDateTime,
    pub buying_power: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StrategyParams {
    pub initial_buying_power: f64,
    pub capital_per_trade: f64,
    pub z_enter: f64,
    pub z_exit: f64,
    pub max_dd_pct: f64,
}

#[derive(Debug, Clone)]
struct OpenLeg {
    symbol: String,
    /// Signed share quantity held since entry.
    quantity: f64,
}

#[derive(Debug, Clone)]
pub struct PairsStrategy {
    symbol_x: String,
    symbol_y: String,
    params: StrategyParams,
    state: StrategyState,
    buying_power: f64,
    max_dd_pct: f64,
    stop_loss_enabled: bool,
    legs: Vec<OpenLeg>,
    committed: f64,
    side: Option<SpreadSide>,
    short_bank: HashMap<String, f64>,
    equity_record: Vec<EquityPoint>,
    round_trips: usize,
}

impl PairsStrategy {
    pub fn new(symbol_x: impl Into<String>, symbol_y: impl Into<String>, params: StrategyParams) -> Self {
        Self {
            symbol_x: symbol_x.into(),
            symbol_y: symbol_y.into(),
            params,
            state: StrategyState::Flat,
            buying_power: params.initial_buying_power,
            max_dd_pct: params.max_dd_pct,
            stop_loss_enabled: true,
            legs: Vec::new(),
            committed: 0.0,
            side: None,
            short_bank: HashMap::new(),
            equity_record: Vec::new(),
            round_trips: 0,
        }
    }

    pub fn state(&self) -> StrategyState {
        self.state
    }

    pub fn continue_trading(&self) -> bool {
        self.state != StrategyState::Stopped
    }

    pub fn buying_power(&self) -> f64 {
        self.buying_power
    }

    pub fn initial_buying_power(&self) -> f64 {
        self.params.initial_buying_power
    }

    pub fn capital_per_trade(&self) -> f64 {
        self.params.capital_per_trade
    }

    pub fn max_dd_pct(&self) -> f64 {
        self.max_dd_pct
    }

    pub fn set_max_dd_pct(&mut self, pct: f64) {
        log::info!(
            "[STRATEGY] {}/{} stop-loss threshold {:.2}% -> {:.2}%",
            self.symbol_y,
            self.symbol_x,
            self.max_dd_pct,
            pct
        );
        self.max_dd_pct = pct;
    }

    pub fn set_stop_loss_enabled(&mut self, enabled: bool) {
        self.stop_loss_enabled = enabled;
    }

    pub fn equity_record(&self) -> &[EquityPoint] {
        &self.equity_record
    }

    pub fn round_trips(&self) -> usize {
        self.round_trips
    }

    pub fn side(&self) -> Option<SpreadSide> {
        self.side
    }

    pub fn short_bank(&self, symbol: &str) -> f64 {
        self.short_bank.get(symbol).copied().unwrap_or(0.0)
    }

    /// Consumes one signal. `coeff_x`/`coeff_y` are the hedge coefficients for
    /// a long-spread position; a short-spread entry uses their negation.
    pub fn update(
        &mut self,
        ledger: &mut Ledger,
        z_score: f64,
        coeff_x: f64,
        coeff_y: f64,
    ) -> Result<Transition, SimulationError> {
        match self.state {
            StrategyState::Stopped => Ok(Transition::Hold),
            StrategyState::Flat => {
                if !z_score.is_finite() {
                    return Ok(Transition::Hold);
                }
                if z_score > self.params.z_enter {
                    self.enter(ledger, -coeff_x, -coeff_y, SpreadSide::Short)
                } else if z_score < -self.params.z_enter {
                    self.enter(ledger, coeff_x, coeff_y, SpreadSide::Long)
                } else {
                    Ok(Transition::Hold)
                }
            }
            StrategyState::Positioned => {
                let Some(value) = self.liquidation_value(ledger) else {
                    log::debug!(
                        "[STRATEGY] {}/{} cannot revalue position at {:?}",
                        self.symbol_y,
                        self.symbol_x,
                        ledger.current_timestamp()
                    );
                    return Ok(Transition::PriceMissing);
                };
                if self.stop_loss_enabled && self.committed > 0.0 {
                    let loss_pct = -(value - self.committed) / self.committed * 100.0;
                    if loss_pct > self.max_dd_pct {
                        log::warn!(
                            "[STRATEGY] {}/{} unrealized loss {:.2}% exceeds {:.2}%, stopping out",
                            self.symbol_y,
                            self.symbol_x,
                            loss_pct,
                            self.max_dd_pct
                        );
                        self.close(ledger)?;
                        self.state = StrategyState::Stopped;
                        self.record(ledger);
                        return Ok(Transition::StoppedOut);
                    }
                }
                if z_score.abs() < self.params.z_exit {
                    self.close(ledger)?;
                    self.state = StrategyState::Flat;
                    self.record(ledger);
                    return Ok(Transition::Exited);
                }
                Ok(Transition::Hold)
            }
        }
    }

    fn enter(
        &mut self,
        ledger: &mut Ledger,
        coeff_x: f64,
        coeff_y: f64,
        side: SpreadSide,
    ) -> Result<Transition, SimulationError> {
        let (Some(px), Some(py)) = (ledger.get_price(&self.symbol_x), ledger.get_price(&self.symbol_y))
        else {
            return Ok(Transition::PriceMissing);
        };
        let multiple = coeff_x.abs() * px + coeff_y.abs() * py;
        if !multiple.is_finite() || multiple <= 0.0 {
            log::warn!(
                "[STRATEGY] {}/{} cannot size entry with coefficients ({}, {})",
                self.symbol_y,
                self.symbol_x,
                coeff_x,
                coeff_y
            );
            return Ok(Transition::Hold);
        }
        let k = self.params.capital_per_trade / multiple;
        let orders = [
            (self.symbol_x.clone(), k * coeff_x),
            (self.symbol_y.clone(), k * coeff_y),
        ];

        self.committed = 0.0;
        for (symbol, quantity) in orders {
            if quantity == 0.0 {
                continue;
            }
            let notional = if quantity > 0.0 {
                ledger.trade(&symbol, TradeAction::OpenLong, quantity)?
            } else {
                let proceeds = ledger.trade(&symbol, TradeAction::OpenShort, -quantity)?;
                *self.short_bank.entry(symbol.clone()).or_insert(0.0) += proceeds;
                proceeds
            };
            self.buying_power -= notional;
            self.committed += notional;
            log::debug!(
                "[STRATEGY] entered {:.4} of {} for {:.2}",
                quantity,
                symbol,
                notional
            );
            self.legs.push(OpenLeg { symbol, quantity });
        }

        self.state = StrategyState::Positioned;
        self.side = Some(side);
        self.record(ledger);
        log::info!(
            "[STRATEGY] {}/{} entered {:?} spread, committed {:.2}, buying power {:.2}",
            self.symbol_y,
            self.symbol_x,
            side,
            self.committed,
            self.buying_power
        );
        Ok(Transition::Entered(side))
    }

    fn close(&mut self, ledger: &mut Ledger) -> Result<(), SimulationError> {
        while let Some(leg) = self.legs.first() {
            let realized = if leg.quantity > 0.0 {
                ledger.trade(&leg.symbol, TradeAction::CloseLong, leg.quantity)?
            } else {
                let cover = ledger.trade(&leg.symbol, TradeAction::CloseShort, -leg.quantity)?;
                let bank = self.short_bank.remove(&leg.symbol).unwrap_or(0.0);
                2.0 * bank - cover
            };
            // A leg leaves the book only once its closing trade has filled.
            let leg = self.legs.remove(0);
            self.buying_power += realized;
            log::debug!(
                "[STRATEGY] exited {:.4} of {} realizing {:.2}",
                leg.quantity,
                leg.symbol,
                realized
            );
        }
        self.committed = 0.0;
        self.side = None;
        self.round_trips += 1;
        log::info!(
            "[STRATEGY] {}/{} closed round-trip #{}, buying power {:.2}",
            self.symbol_y,
            self.symbol_x,
            self.round_trips,
            self.buying_power
        );
        Ok(())
    }

    /// Cash the open legs would return if closed at current prices.
    fn liquidation_value(&self, ledger: &Ledger) -> Option<f64> {
        self.legs.iter().try_fold(0.0, |acc, leg| {
            let price = ledger.get_price(&leg.symbol)?;
            let value = if leg.quantity > 0.0 {
                leg.quantity * price
            } else {
                2.0 * self.short_bank(&leg.symbol) + leg.quantity * price
            };
            Some(acc + value)
        })
    }

    fn record(&mut self, ledger: &Ledger) {
        if let Some(timestamp) = ledger.current_timestamp() {
            self.equity_record.push(EquityPoint {
                timestamp,
                buying_power: self.buying_power,
            });
        }
    }
}
