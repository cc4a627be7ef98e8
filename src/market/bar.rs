use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::error::SimulationError;
use crate::model::series::TimeIndexed;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub timestamp: NaiveDateTime,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Bar {
    pub fn price(&self, field: PriceField) -> f64 {
        match field {
            PriceField::Open => self.open,
            PriceField::High => self.high,
            PriceField::Low => self.low,
            PriceField::Close => self.close,
        }
    }
}

/// Which bar value feeds the regression and prices executions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriceField {
    #[default]
    Open,
    High,
    Low,
    Close,
}

impl std::str::FromStr for PriceField {
    type Err = ();
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "open" => Ok(PriceField::Open),
            "high" => Ok(PriceField::High),
            "low" => Ok(PriceField::Low),
            "close" => Ok(PriceField::Close),
            _ => Err(()),
        }
    }
}

/// Ordered bars for one symbol.
#[derive(Debug, Clone)]
pub struct BarSeries {
    symbol: String,
    bars: TimeIndexed<Bar>,
}

impl BarSeries {
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            bars: TimeIndexed::new(),
        }
    }

    /// Builds a series from bars that must already be in increasing time order.
    pub fn from_bars(
        symbol: impl Into<String>,
        bars: impl IntoIterator<Item = Bar>,
    ) -> Result<Self, SimulationError> {
        let mut series = Self::new(symbol);
        for bar in bars {
            series.push(bar)?;
        }
        Ok(series)
    }

    pub fn push(&mut self, bar: Bar) -> Result<(), SimulationError> {
        self.bars.push(bar.timestamp, bar)
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn get(&self, ts: NaiveDateTime) -> Option<&Bar> {
        self.bars.get(ts)
    }

    pub fn bars(&self) -> &[Bar] {
        self.bars.values()
    }

    pub fn index(&self) -> &[NaiveDateTime] {
        self.bars.index()
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn count_before(&self, ts: NaiveDateTime) -> usize {
        self.bars.count_before(ts)
    }
}

/// Checks that two legs share an identical timestamp index.
pub fn ensure_aligned(x: &BarSeries, y: &BarSeries) -> Result<(), SimulationError> {
    let mismatch = |detail: String| SimulationError::MismatchedIndex {
        symbol_x: x.symbol().to_string(),
        symbol_y: y.symbol().to_string(),
        detail,
    };
    if x.len() != y.len() {
        return Err(mismatch(format!("{} bars vs {} bars", x.len(), y.len())));
    }
    if let Some((i, (tx, ty))) = x
        .index()
        .iter()
        .zip(y.index())
        .enumerate()
        .find(|(_, (tx, ty))| tx != ty)
    {
        return Err(mismatch(format!("row {} has {} vs {}", i, tx, ty)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::series::parse_timestamp;

    fn bar(day: &str, open: f64) -> Bar {
        Bar {
            timestamp: parse_timestamp(day).unwrap(),
            open,
            high: open + 1.0,
            low: open - 1.0,
            close: open + 0.5,
            volume: 1000.0,
        }
    }

    #[test]
    fn price_field_selects_value() {
        let b = bar("2024-01-02", 10.0);
        assert_eq!(b.price(PriceField::Open), 10.0);
        assert_eq!(b.price(PriceField::High), 11.0);
        assert_eq!(b.price(PriceField::Close), 10.5);
        assert_eq!("Close".parse::<PriceField>(), Ok(PriceField::Close));
        assert!("vwap".parse::<PriceField>().is_err());
    }

    #[test]
    fn aligned_series_pass() {
        let x = BarSeries::from_bars("X", [bar("2024-01-02", 1.0), bar("2024-01-03", 2.0)]).unwrap();
        let y = BarSeries::from_bars("Y", [bar("2024-01-02", 3.0), bar("2024-01-03", 4.0)]).unwrap();
        assert!(ensure_aligned(&x, &y).is_ok());
    }

    #[test]
    fn misaligned_series_fail() {
        let x = BarSeries::from_bars("X", [bar("2024-01-02", 1.0), bar("2024-01-03", 2.0)]).unwrap();
        let y = BarSeries::from_bars("Y", [bar("2024-01-02", 3.0), bar("2024-01-04", 4.0)]).unwrap();
        let err = ensure_aligned(&x, &y).unwrap_err();
        assert!(matches!(err, SimulationError::MismatchedIndex { .. }));

        let short = BarSeries::from_bars("Y", [bar("2024-01-02", 3.0)]).unwrap();
        assert!(ensure_aligned(&x, &short).is_err());
    }

    #[test]
    fn out_of_order_bars_are_rejected() {
        let result = BarSeries::from_bars("X", [bar("2024-01-03", 1.0), bar("2024-01-02", 2.0)]);
        assert!(result.is_err());
    }
}
