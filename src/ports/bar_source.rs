use std::collections::HashMap;
use std::sync::Arc;

use crate::market::BarSeries;

/// Read-only access to historical bars, shared across concurrently running pairs.
pub trait BarSource: Send + Sync {
    fn get_bars(&self, symbol: &str) -> Option<Arc<BarSeries>>;
}

#[derive(Debug, Default, Clone)]
pub struct InMemoryBarSource {
    series: HashMap<String, Arc<BarSeries>>,
}

impl InMemoryBarSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, series: BarSeries) {
        self.series
            .insert(series.symbol().to_string(), Arc::new(series));
    }

    pub fn symbols(&self) -> Vec<String> {
        let mut symbols: Vec<String> = self.series.keys().cloned().collect();
        symbols.sort();
        symbols
    }
}

impl FromIterator<BarSeries> for InMemoryBarSource {
    fn from_iter<I: IntoIterator<Item = BarSeries>>(iter: I) -> Self {
        let mut source = Self::new();
        for series in iter {
            source.insert(series);
        }
        source
    }
}

impl BarSource for InMemoryBarSource {
    fn get_bars(&self, symbol: &str) -> Option<Arc<BarSeries>> {
        self.series.get(symbol).cloned()
    }
}
