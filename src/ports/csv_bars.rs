use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::market::{Bar, BarSeries};
use crate::model::series::parse_timestamp;
use crate::ports::bar_source::BarSource;

#[derive(Debug, Deserialize)]
struct CsvBarRow {
    #[serde(rename = "Datetime", alias = "Date")]
    datetime: String,
    #[serde(rename = "Open")]
    open: f64,
    #[serde(rename = "High")]
    high: f64,
    #[serde(rename = "Low")]
    low: f64,
    #[serde(rename = "Close")]
    close: f64,
    #[serde(rename = "Volume")]
    volume: f64,
}

/// Reads `<dir>/<SYMBOL>.csv` files on first use and caches them per symbol.
/// A symbol that fails to load is cached as absent.
#[derive(Debug)]
pub struct CsvDirBarSource {
    dir: PathBuf,
    cache: Mutex<HashMap<String, Option<Arc<BarSeries>>>>,
}

impl CsvDirBarSource {
    pub fn new<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        if !dir.is_dir() {
            return Err(anyhow!("bar directory {} does not exist", dir.display()));
        }
        Ok(Self {
            dir,
            cache: Mutex::new(HashMap::new()),
        })
    }

    pub fn load(&self, symbol: &str) -> Result<BarSeries> {
        let path = self.dir.join(format!("{}.csv", symbol));
        let mut reader = csv::Reader::from_path(&path)
            .with_context(|| format!("failed to open {}", path.display()))?;
        let mut series = BarSeries::new(symbol);
        for (row_no, row) in reader.deserialize::<CsvBarRow>().enumerate() {
            let row = row.with_context(|| format!("bad row {} in {}", row_no + 1, path.display()))?;
            let timestamp = parse_timestamp(&row.datetime)
                .map_err(|e| anyhow!("{} row {}: {}", path.display(), row_no + 1, e))?;
            series
                .push(Bar {
                    timestamp,
                    open: row.open,
                    high: row.high,
                    low: row.low,
                    close: row.close,
                    volume: row.volume,
                })
                .map_err(|e| anyhow!("{} row {}: {}", path.display(), row_no + 1, e))?;
        }
        Ok(series)
    }
}

impl BarSource for CsvDirBarSource {
    fn get_bars(&self, symbol: &str) -> Option<Arc<BarSeries>> {
        let mut cache = match self.cache.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(cached) = cache.get(symbol) {
            return cached.clone();
        }
        let loaded = match self.load(symbol) {
            Ok(series) => {
                log::debug!("[BARS] loaded {} bars for {}", series.len(), symbol);
                Some(Arc::new(series))
            }
            Err(e) => {
                log::warn!("[BARS] no data for {}: {:#}", symbol, e);
                None
            }
        };
        cache.insert(symbol.to_string(), loaded.clone());
        loaded
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn reads_and_caches_symbol_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("AAA.csv"),
            "Datetime,Open,High,Low,Close,Volume\n\
             2024-10-01 09:30:00,10.0,10.5,9.8,10.2,1000\n\
             2024-10-01 10:30:00,10.2,10.4,10.1,10.3,800\n",
        )
        .unwrap();
        let source = CsvDirBarSource::new(dir.path()).unwrap();
        let first = source.get_bars("AAA").unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(first.bars()[1].open, 10.2);

        fs::remove_file(dir.path().join("AAA.csv")).unwrap();
        let again = source.get_bars("AAA").unwrap();
        assert!(Arc::ptr_eq(&first, &again));
        assert!(source.get_bars("ZZZ").is_none());
    }

    #[test]
    fn date_column_alias_is_accepted() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("BBB.csv"),
            "Date,Open,High,Low,Close,Volume\n2024-01-02,1,2,0.5,1.5,10\n",
        )
        .unwrap();
        let source = CsvDirBarSource::new(dir.path()).unwrap();
        assert_eq!(source.load("BBB").unwrap().len(), 1);
    }

    #[test]
    fn unordered_rows_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("CCC.csv"),
            "Datetime,Open,High,Low,Close,Volume\n2024-01-03,1,1,1,1,1\n2024-01-02,1,1,1,1,1\n",
        )
        .unwrap();
        let source = CsvDirBarSource::new(dir.path()).unwrap();
        assert!(source.load("CCC").is_err());
        assert!(source.get_bars("CCC").is_none());
    }

    #[test]
    fn missing_directory_is_an_error() {
        assert!(CsvDirBarSource::new("/definitely/not/here").is_err());
    }
}
