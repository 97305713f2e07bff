//! Timestamped measurement series with explicit missing values.

use std::collections::BTreeMap;

use chrono::{NaiveDate, NaiveDateTime};

use super::time::floor_to_minute;

/// A single measurement column aligned to timestamps.
///
/// Missing samples are `None`; they are never dropped silently so that
/// timestamp alignment survives every transform.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TimeSeries {
    /// Sample timestamps.
    pub timestamps: Vec<NaiveDateTime>,
    /// Sample values, `None` where missing.
    pub values: Vec<Option<f64>>,
}

impl TimeSeries {
    /// Creates an empty series.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty series with pre-allocated capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            timestamps: Vec::with_capacity(capacity),
            values: Vec::with_capacity(capacity),
        }
    }

    /// Creates a series from parallel vectors.
    ///
    /// # Panics
    ///
    /// Panics if the vectors differ in length.
    pub fn from_parts(timestamps: Vec<NaiveDateTime>, values: Vec<Option<f64>>) -> Self {
        assert_eq!(
            timestamps.len(),
            values.len(),
            "timestamps and values must have same length"
        );
        Self { timestamps, values }
    }

    /// Creates a series from `(timestamp, value)` pairs.
    pub fn from_pairs<I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (NaiveDateTime, Option<f64>)>,
    {
        let (timestamps, values) = pairs.into_iter().unzip();
        Self { timestamps, values }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    /// Appends a sample.
    #[inline]
    pub fn push(&mut self, ts: NaiveDateTime, value: Option<f64>) {
        self.timestamps.push(ts);
        self.values.push(value);
    }

    /// Iterates over `(timestamp, value)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (NaiveDateTime, Option<f64>)> + '_ {
        self.timestamps.iter().copied().zip(self.values.iter().copied())
    }

    /// Number of non-missing samples.
    pub fn valid_count(&self) -> usize {
        self.values.iter().filter(|v| v.is_some()).count()
    }

    /// Non-missing values in order.
    pub fn valid_values(&self) -> Vec<f64> {
        self.values.iter().flatten().copied().collect()
    }

    /// Arithmetic mean of the non-missing values.
    pub fn mean(&self) -> Option<f64> {
        mean_of(self.values.iter().flatten().copied())
    }

    /// Earliest and latest timestamps, assuming the series is sorted.
    pub fn span(&self) -> Option<(NaiveDateTime, NaiveDateTime)> {
        Some((*self.timestamps.first()?, *self.timestamps.last()?))
    }

    /// Returns a copy with the same timestamps and transformed values.
    pub fn map_values<F>(&self, f: F) -> Self
    where
        F: Fn(Option<f64>) -> Option<f64>,
    {
        Self {
            timestamps: self.timestamps.clone(),
            values: self.values.iter().map(|&v| f(v)).collect(),
        }
    }

    /// Returns the samples whose timestamps fall inside `[start, end]`.
    ///
    /// Either bound may be open.
    pub fn between(&self, start: Option<NaiveDateTime>, end: Option<NaiveDateTime>) -> Self {
        self.iter()
            .filter(|(ts, _)| start.map_or(true, |s| *ts >= s) && end.map_or(true, |e| *ts <= e))
            .collect()
    }

    /// Splits the series into calendar days, preserving order within each day.
    pub fn group_by_day(&self) -> Vec<(NaiveDate, TimeSeries)> {
        let mut days: BTreeMap<NaiveDate, TimeSeries> = BTreeMap::new();
        for (ts, value) in self.iter() {
            days.entry(ts.date()).or_default().push(ts, value);
        }
        days.into_iter().collect()
    }

    /// Floors timestamps to the minute, sorts them and drops duplicates.
    ///
    /// The sort is stable, so among samples sharing a minute the one that
    /// appeared first in the input is kept.
    pub fn normalized(&self) -> Self {
        let floored: Vec<(NaiveDateTime, Option<f64>)> =
            self.iter().map(|(ts, v)| (floor_to_minute(ts), v)).collect();
        let order = stable_dedup_order(floored.iter().map(|(ts, _)| *ts));
        order.into_iter().map(|i| floored[i]).collect()
    }
}

impl FromIterator<(NaiveDateTime, Option<f64>)> for TimeSeries {
    fn from_iter<I: IntoIterator<Item = (NaiveDateTime, Option<f64>)>>(iter: I) -> Self {
        Self::from_pairs(iter)
    }
}

/// Mean of an iterator of values, `None` when it is empty.
pub fn mean_of<I: IntoIterator<Item = f64>>(values: I) -> Option<f64> {
    let (sum, count) = values
        .into_iter()
        .fold((0.0, 0usize), |(s, c), v| (s + v, c + 1));
    if count == 0 {
        None
    } else {
        Some(sum / count as f64)
    }
}

/// Rounds to a fixed number of decimal places.
#[inline]
pub fn round_to(value: f64, decimals: u32) -> f64 {
    let factor = 10f64.powi(decimals as i32);
    (value * factor).round() / factor
}

/// Indices that visit timestamps in sorted order, skipping later duplicates.
///
/// Shared by [`TimeSeries::normalized`] and the table equivalent so both
/// apply the same first-occurrence-wins policy.
pub(crate) fn stable_dedup_order<I>(timestamps: I) -> Vec<usize>
where
    I: IntoIterator<Item = NaiveDateTime>,
{
    let mut indexed: Vec<(usize, NaiveDateTime)> = timestamps.into_iter().enumerate().collect();
    indexed.sort_by_key(|(_, ts)| *ts);

    let mut order = Vec::with_capacity(indexed.len());
    let mut last: Option<NaiveDateTime> = None;
    for (i, ts) in indexed {
        if last != Some(ts) {
            order.push(i);
            last = Some(ts);
        }
    }
    order
}
