//! Half-open sync ranges and remote date windows.

use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{HubError, Result};

/// Widest window the remote sales listing accepts in one query.
pub const MAX_WINDOW_DAYS: i64 = 90;

/// `[start, end)` in UTC. Construction guarantees `start < end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "RawRange")]
pub struct SyncRange {
    #[serde(rename = "startDate")]
    start: DateTime<Utc>,
    #[serde(rename = "endDate")]
    end: DateTime<Utc>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawRange {
    start_date: String,
    end_date: String,
}

impl TryFrom<RawRange> for SyncRange {
    type Error = HubError;

    fn try_from(raw: RawRange) -> Result<Self> {
        Self::parse(&raw.start_date, &raw.end_date)
    }
}

impl SyncRange {
    /// # Errors
    ///
    /// Returns [`HubError::InvalidRange`] unless `start < end`.
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self> {
        if start >= end {
            return Err(HubError::InvalidRange(format!(
                "start {} must be before end {}",
                start.to_rfc3339(),
                end.to_rfc3339()
            )));
        }
        Ok(Self { start, end })
    }

    /// Parse RFC 3339 timestamps or plain `YYYY-MM-DD` dates (midnight UTC).
    ///
    /// # Errors
    ///
    /// Returns [`HubError::InvalidRange`] on unparsable bounds or `start >= end`.
    pub fn parse(start: &str, end: &str) -> Result<Self> {
        Self::new(parse_bound(start)?, parse_bound(end)?)
    }

    /// The last `days` days up to and including today: `[today - days, tomorrow)`.
    #[must_use]
    pub fn last_days(now: DateTime<Utc>, days: u32) -> Self {
        let today = now.date_naive();
        let tomorrow = today + TimeDelta::days(1);
        let start = today - TimeDelta::days(i64::from(days.max(1)));
        Self {
            start: midnight(start),
            end: midnight(tomorrow),
        }
    }

    #[must_use]
    pub const fn start(&self) -> DateTime<Utc> {
        self.start
    }

    #[must_use]
    pub const fn end(&self) -> DateTime<Utc> {
        self.end
    }

    #[must_use]
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.start <= at && at < self.end
    }

    /// Split into consecutive windows of at most `max_days`, ascending.
    #[must_use]
    pub fn windows(&self, max_days: i64) -> Vec<Self> {
        let step = TimeDelta::days(max_days.clamp(1, MAX_WINDOW_DAYS));
        let mut windows = Vec::new();
        let mut cursor = self.start;
        while cursor < self.end {
            let next = (cursor + step).min(self.end);
            windows.push(Self {
                start: cursor,
                end: next,
            });
            cursor = next;
        }
        windows
    }

    /// Calendar dates sent as `start_date`/`end_date`. The remote end date is
    /// inclusive, so it is the day holding the last instant of the range.
    #[must_use]
    pub fn remote_dates(&self) -> (NaiveDate, NaiveDate) {
        let last_instant = self.end - TimeDelta::nanoseconds(1);
        (self.start.date_naive(), last_instant.date_naive())
    }

    /// Replace either bound with a parsed value, keeping the other.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::InvalidRange`] on unparsable bounds or when the
    /// result would be empty.
    pub fn with_bounds(&self, start: Option<&str>, end: Option<&str>) -> Result<Self> {
        let start = start.map_or(Ok(self.start), parse_bound)?;
        let end = end.map_or(Ok(self.end), parse_bound)?;
        Self::new(start, end)
    }

    /// Stable key naming this range in watermark storage.
    #[must_use]
    pub fn key(&self) -> String {
        format!("{}..{}", self.start.to_rfc3339(), self.end.to_rfc3339())
    }
}

impl fmt::Display for SyncRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start.to_rfc3339(), self.end.to_rfc3339())
    }
}

fn midnight(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(NaiveTime::MIN).and_utc()
}

fn parse_bound(raw: &str) -> Result<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map(midnight)
        .map_err(|_| HubError::InvalidRange(format!("cannot parse '{raw}' as a date or timestamp")))
}
