use anyhow::{anyhow, Context, Result};
use chrono::DateTime;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::Arc;

use crate::market::{Bar, BarSeries};
use crate::ports::bar_source::{BarSource, InMemoryBarSource};

// Data structures that mirror the JSONL dump file
#[derive(Debug, Clone, Deserialize)]
struct DumpedBar {
    open: Decimal,
    high: Decimal,
    low: Decimal,
    close: Decimal,
    #[serde(default)]
    volume: Decimal,
}

#[derive(Debug, Clone, Deserialize)]
struct DumpedDataEntry {
    timestamp: i64,
    bars: HashMap<String, DumpedBar>,
}

/// Bar source backed by a JSONL replay dump: one line per timestamp (unix ms),
/// each carrying the bars of every symbol present at that time.
#[derive(Debug)]
pub struct JsonlBarSource {
    inner: InMemoryBarSource,
}

impl JsonlBarSource {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_ref = path.as_ref();
        let file = File::open(path_ref)
            .with_context(|| format!("failed to open replay file {}", path_ref.display()))?;
        let reader = BufReader::new(file);
        let mut data = Vec::new();

        for line in reader.lines() {
            let line = line.with_context(|| "failed to read replay line")?;
            if line.trim().is_empty() {
                continue;
            }
            let entry: DumpedDataEntry = serde_json::from_str(&line)
                .with_context(|| format!("failed to parse replay entry '{}'", line))?;
            data.push(entry);
        }

        if data.is_empty() {
            return Err(anyhow!("Data dump file is empty or invalid"));
        }
        data.sort_by_key(|e| e.timestamp);

        let mut per_symbol: BTreeMap<String, Vec<Bar>> = BTreeMap::new();
        for entry in data {
            let ts = DateTime::from_timestamp_millis(entry.timestamp)
                .ok_or_else(|| anyhow!("timestamp {} out of range", entry.timestamp))?
                .naive_utc();
            for (symbol, dumped) in entry.bars {
                let bar = Bar {
                    timestamp: ts,
                    open: to_f64(dumped.open, &symbol)?,
                    high: to_f64(dumped.high, &symbol)?,
                    low: to_f64(dumped.low, &symbol)?,
                    close: to_f64(dumped.close, &symbol)?,
                    volume: to_f64(dumped.volume, &symbol)?,
                };
                per_symbol.entry(symbol).or_default().push(bar);
            }
        }

        let mut inner = InMemoryBarSource::new();
        for (symbol, bars) in per_symbol {
            let series = BarSeries::from_bars(symbol.clone(), bars)
                .map_err(|e| anyhow!("replay bars for {}: {}", symbol, e))?;
            log::info!("[REPLAY] loaded {} bars for {}", series.len(), symbol);
            inner.insert(series);
        }
        Ok(Self { inner })
    }

    pub fn symbols(&self) -> Vec<String> {
        self.inner.symbols()
    }
}

fn to_f64(value: Decimal, symbol: &str) -> Result<f64> {
    value
        .to_f64()
        .ok_or_else(|| anyhow!("invalid price {} for {}", value, symbol))
}

impl BarSource for JsonlBarSource {
    fn get_bars(&self, symbol: &str) -> Option<Arc<BarSeries>> {
        self.inner.get_bars(symbol)
    }
}
