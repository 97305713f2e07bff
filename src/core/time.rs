//! Timestamp parsing, flooring and fixed-cadence grids.
//!
//! All timestamps are timezone-naive (`NaiveDateTime`) and handled at
//! minute resolution once they enter the pipeline.

use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};

/// Formats tried, in order, when no explicit format is configured.
const TIMESTAMP_FORMATS: &[&str] = &[
    "%Y/%m/%d %H:%M:%S",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y/%m/%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y/%m/%d %H:%M",
    "%Y-%m-%d %H:%M",
];

/// Date-only formats, interpreted as midnight.
const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d"];

/// Fixed time step used for grids and aggregation buckets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cadence {
    Minute,
    Hour,
    Day,
}

impl Cadence {
    /// Length of one step.
    pub fn step(self) -> Duration {
        match self {
            Cadence::Minute => Duration::minutes(1),
            Cadence::Hour => Duration::hours(1),
            Cadence::Day => Duration::days(1),
        }
    }

    /// Start of the bucket containing `ts`.
    pub fn floor(self, ts: NaiveDateTime) -> NaiveDateTime {
        match self {
            Cadence::Minute => floor_to_minute(ts),
            Cadence::Hour => ts
                .date()
                .and_time(NaiveTime::from_hms_opt(ts.hour(), 0, 0).unwrap_or(NaiveTime::MIN)),
            Cadence::Day => ts.date().and_time(NaiveTime::MIN),
        }
    }
}

impl std::str::FromStr for Cadence {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "min" | "minute" => Ok(Cadence::Minute),
            "h" | "hour" => Ok(Cadence::Hour),
            "d" | "day" => Ok(Cadence::Day),
            other => Err(format!("unknown cadence '{}', expected minute, hour or day", other)),
        }
    }
}

/// Drop seconds and sub-second precision.
#[inline]
pub fn floor_to_minute(ts: NaiveDateTime) -> NaiveDateTime {
    ts.with_second(0)
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(ts)
}

/// Parse a timestamp cell.
///
/// When `format` is given only that format is tried; otherwise the common
/// logger export formats are attempted in turn, followed by date-only forms.
pub fn parse_timestamp(raw: &str, format: Option<&str>) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Some(fmt) = format {
        return NaiveDateTime::parse_from_str(raw, fmt)
            .ok()
            .or_else(|| NaiveDate::parse_from_str(raw, fmt).ok().map(|d| d.and_time(NaiveTime::MIN)));
    }

    TIMESTAMP_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .or_else(|| {
            DATE_FORMATS
                .iter()
                .find_map(|fmt| NaiveDate::parse_from_str(raw, fmt).ok())
                .map(|d| d.and_time(NaiveTime::MIN))
        })
}

/// Parse the inclusive end of a time window.
///
/// A date-only value covers that whole day, so `2025-02-20` ends at the
/// last instant before `2025-02-21 00:00`.
pub fn parse_range_end(raw: &str) -> Option<NaiveDateTime> {
    let trimmed = raw.trim();
    let date_only = DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(trimmed, fmt).ok());
    match date_only {
        Some(date) => date.and_hms_nano_opt(23, 59, 59, 999_999_999),
        None => parse_timestamp(trimmed, None),
    }
}

/// Regular grid from `start` to `end` inclusive at the given step.
///
/// Strictly increasing with a constant step. Returns an empty grid when
/// `end < start` or the step is not positive.
pub fn regular_grid(start: NaiveDateTime, end: NaiveDateTime, step: Duration) -> Vec<NaiveDateTime> {
    if end < start || step <= Duration::zero() {
        return Vec::new();
    }

    let span = (end - start).num_seconds();
    let step_secs = step.num_seconds().max(1);
    let count = (span / step_secs) as usize + 1;

    let mut grid = Vec::with_capacity(count);
    let mut current = start;
    while current <= end {
        grid.push(current);
        current += step;
    }
    grid
}
