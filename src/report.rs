use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use serde::Serialize;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::driver::SimulationReport;
use crate::strategy::EquityPoint;

#[derive(Debug, Serialize)]
struct EquityLine<'a> {
    ts: NaiveDateTime,
    buying_power: f64,
    phase: &'a str,
}

/// Writes per-pair summaries and equity curves under one directory.
#[derive(Debug, Clone)]
pub struct ReportWriter {
    dir: PathBuf,
}

impl ReportWriter {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    pub fn summary_path(&self, report: &SimulationReport) -> PathBuf {
        self.dir
            .join(format!("{}_{}_summary.json", report.symbol_x, report.symbol_y))
    }

    pub fn equity_path(&self, report: &SimulationReport) -> PathBuf {
        self.dir
            .join(format!("{}_{}_equity.jsonl", report.symbol_x, report.symbol_y))
    }

    pub fn write(&self, report: &SimulationReport) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("failed to create report dir {}", self.dir.display()))?;

        let summary_path = self.summary_path(report);
        let payload = serde_json::to_string_pretty(report)
            .with_context(|| format!("failed to encode summary for {}", report.pair_label()))?;
        fs::write(&summary_path, payload)
            .with_context(|| format!("failed to write {}", summary_path.display()))?;

        let equity_path = self.equity_path(report);
        let file = File::create(&equity_path)
            .with_context(|| format!("failed to create {}", equity_path.display()))?;
        let mut writer = BufWriter::new(file);
        write_phase(&mut writer, "fit", &report.fit.equity_record)?;
        write_phase(&mut writer, "live", &report.live.equity_record)?;
        writer
            .flush()
            .with_context(|| format!("failed to flush {}", equity_path.display()))?;

        log::info!(
            "[REPORT] {} written to {}",
            report.pair_label(),
            self.dir.display()
        );
        Ok(())
    }
}

fn write_phase<W: Write>(writer: &mut W, phase: &str, record: &[EquityPoint]) -> Result<()> {
    for point in record {
        let line = serde_json::to_string(&EquityLine {
            ts: point.timestamp,
            buying_power: point.buying_power,
            phase,
        })?;
        writeln!(writer, "{line}")?;
    }
    Ok(())
}
