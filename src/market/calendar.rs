use anyhow::{anyhow, Context, Result};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// Bar granularity used to expand session dates into trading timestamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BarInterval {
    #[default]
    Day,
    Hour,
}

impl std::str::FromStr for BarInterval {
    type Err = ();
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "1d" | "day" | "daily" => Ok(BarInterval::Day),
            "1h" | "hour" | "hourly" => Ok(BarInterval::Hour),
            _ => Err(()),
        }
    }
}

// Regular-session hourly bar opens: 09:30 through 15:30.
const HOURLY_SESSION_OPENS: &[(u32, u32)] = &[
    (9, 30),
    (10, 30),
    (11, 30),
    (12, 30),
    (13, 30),
    (14, 30),
    (15, 30),
];

/// Sorted, de-duplicated list of valid trading timestamps.
#[derive(Debug, Clone, Default)]
pub struct Calendar {
    sessions: Vec<NaiveDateTime>,
}

impl Calendar {
    pub fn from_timestamps(timestamps: impl IntoIterator<Item = NaiveDateTime>) -> Self {
        let mut sessions: Vec<NaiveDateTime> = timestamps.into_iter().collect();
        sessions.sort();
        sessions.dedup();
        Self { sessions }
    }

    pub fn from_session_dates(
        dates: impl IntoIterator<Item = NaiveDate>,
        interval: BarInterval,
    ) -> Self {
        let timestamps = dates.into_iter().flat_map(|date| {
            let times: Vec<NaiveTime> = match interval {
                BarInterval::Day => NaiveTime::from_hms_opt(0, 0, 0).into_iter().collect(),
                BarInterval::Hour => HOURLY_SESSION_OPENS
                    .iter()
                    .filter_map(|&(h, m)| NaiveTime::from_hms_opt(h, m, 0))
                    .collect(),
            };
            times.into_iter().map(move |t| date.and_time(t))
        });
        Self::from_timestamps(timestamps)
    }

    /// Reads one `YYYY-MM-DD` session date per line. A `market_dates` header
    /// line and blank lines are skipped.
    pub fn load<P: AsRef<Path>>(path: P, interval: BarInterval) -> Result<Self> {
        let path_ref = path.as_ref();
        let file = File::open(path_ref)
            .with_context(|| format!("failed to open calendar {}", path_ref.display()))?;
        let mut dates = Vec::new();
        for (lineno, line) in BufReader::new(file).lines().enumerate() {
            let line = line
                .with_context(|| format!("failed to read calendar {}", path_ref.display()))?;
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("market_dates") {
                continue;
            }
            let date = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d").map_err(|e| {
                anyhow!(
                    "invalid session date '{}' at {}:{}: {}",
                    trimmed,
                    path_ref.display(),
                    lineno + 1,
                    e
                )
            })?;
            dates.push(date);
        }
        if dates.is_empty() {
            return Err(anyhow!("calendar {} is empty", path_ref.display()));
        }
        Ok(Self::from_session_dates(dates, interval))
    }

    /// The first session strictly after `current`, or `None` when exhausted.
    pub fn next_after(&self, current: NaiveDateTime) -> Option<NaiveDateTime> {
        let i = self.sessions.partition_point(|t| *t <= current);
        self.sessions.get(i).copied()
    }

    /// The first session at or after `ts`.
    pub fn first_at_or_after(&self, ts: NaiveDateTime) -> Option<NaiveDateTime> {
        let i = self.sessions.partition_point(|t| *t < ts);
        self.sessions.get(i).copied()
    }

    pub fn sessions(&self) -> &[NaiveDateTime] {
        &self.sessions
    }

    pub fn first(&self) -> Option<NaiveDateTime> {
        self.sessions.first().copied()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
