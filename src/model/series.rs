use chrono::{NaiveDate, NaiveDateTime};

use crate::error::SimulationError;

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
];

/// Parses a timestamp string at the system boundary.
///
/// Accepts `YYYY-MM-DD` (midnight) and date-time forms with a space or `T`
/// separator. Anything else is rejected rather than treated as a missing row.
pub fn parse_timestamp(raw: &str) -> Result<NaiveDateTime, SimulationError> {
    let trimmed = raw.trim();
    for fmt in DATETIME_FORMATS {
        if let Ok(ts) = NaiveDateTime::parse_from_str(trimmed, fmt) {
            return Ok(ts);
        }
    }
    NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .ok_or_else(|| SimulationError::InvalidTimestamp(raw.to_string()))
}

/// Append-only series keyed by a strictly increasing timestamp.
#[derive(Debug, Clone)]
pub struct TimeIndexed<T> {
    index: Vec<NaiveDateTime>,
    values: Vec<T>,
}

impl<T> Default for TimeIndexed<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> TimeIndexed<T> {
    pub fn new() -> Self {
        Self {
            index: Vec::new(),
            values: Vec::new(),
        }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            index: Vec::with_capacity(capacity),
            values: Vec::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, ts: NaiveDateTime, value: T) -> Result<(), SimulationError> {
        if let Some(&previous) = self.index.last() {
            if ts <= previous {
                return Err(SimulationError::NonMonotonicTimestamp { previous, next: ts });
            }
        }
        self.index.push(ts);
        self.values.push(value);
        Ok(())
    }

    pub fn position(&self, ts: NaiveDateTime) -> Option<usize> {
        self.index.binary_search(&ts).ok()
    }

    pub fn get(&self, ts: NaiveDateTime) -> Option<&T> {
        self.position(ts).map(|i| &self.values[i])
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn index(&self) -> &[NaiveDateTime] {
        &self.index
    }

    pub fn values(&self) -> &[T] {
        &self.values
    }

    pub fn last_timestamp(&self) -> Option<NaiveDateTime> {
        self.index.last().copied()
    }

    /// The last `n` values (fewer if the series is shorter).
    pub fn tail(&self, n: usize) -> &[T] {
        let start = self.values.len().saturating_sub(n);
        &self.values[start..]
    }

    /// Number of entries strictly before `ts`.
    pub fn count_before(&self, ts: NaiveDateTime) -> usize {
        self.index.partition_point(|t| *t < ts)
    }
}
