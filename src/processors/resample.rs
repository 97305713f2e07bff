//! Aggregation to a coarser cadence.
//!
//! Each bucket's value is the arithmetic mean of its non-missing samples.
//! A bucket without any valid sample yields a missing value, never zero.

use std::collections::BTreeMap;

use chrono::NaiveDateTime;

use crate::core::error::{ProcessingError, Result};
use crate::core::series::TimeSeries;
use crate::core::table::{Column, Table};
use crate::core::time::{regular_grid, Cadence};

/// Which buckets appear in the output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BucketMode {
    /// Every bucket from the first to the last observed one.
    Contiguous,
    /// Only buckets containing at least one row.
    ObservedOnly,
}

/// Running sums for one bucket, one slot per column.
#[derive(Debug, Clone)]
struct Accumulator {
    sums: Vec<f64>,
    counts: Vec<usize>,
}

impl Accumulator {
    fn new(width: usize) -> Self {
        Self {
            sums: vec![0.0; width],
            counts: vec![0; width],
        }
    }

    fn means(&self) -> impl Iterator<Item = Option<f64>> + '_ {
        self.sums
            .iter()
            .zip(&self.counts)
            .map(|(s, &n)| (n > 0).then(|| s / n as f64))
    }
}

fn bucket_table(table: &Table, cadence: Cadence) -> BTreeMap<NaiveDateTime, Accumulator> {
    let width = table.columns.len();
    let mut buckets: BTreeMap<NaiveDateTime, Accumulator> = BTreeMap::new();
    for (row, &ts) in table.timestamps.iter().enumerate() {
        let acc = buckets
            .entry(cadence.floor(ts))
            .or_insert_with(|| Accumulator::new(width));
        for (c, column) in table.columns.iter().enumerate() {
            if let Some(v) = column.values[row] {
                acc.sums[c] += v;
                acc.counts[c] += 1;
            }
        }
    }
    buckets
}

/// Mean of every column per bucket.
///
/// Input rows need not be sorted; output rows are.
///
/// # Errors
///
/// `InvalidInput` when the table has no rows.
pub fn resample_table(table: &Table, cadence: Cadence, mode: BucketMode) -> Result<Table> {
    if table.is_empty() {
        return Err(ProcessingError::InvalidInput(
            "cannot resample a table without rows".to_string(),
        ));
    }

    let buckets = bucket_table(table, cadence);
    let keys: Vec<NaiveDateTime> = match mode {
        BucketMode::ObservedOnly => buckets.keys().copied().collect(),
        BucketMode::Contiguous => match (buckets.keys().next(), buckets.keys().next_back()) {
            (Some(&first), Some(&last)) => regular_grid(first, last, cadence.step()),
            _ => Vec::new(),
        },
    };

    let width = table.columns.len();
    let mut columns: Vec<Vec<Option<f64>>> = vec![Vec::with_capacity(keys.len()); width];
    for key in &keys {
        match buckets.get(key) {
            Some(acc) => {
                for (column, mean) in columns.iter_mut().zip(acc.means()) {
                    column.push(mean);
                }
            }
            None => columns.iter_mut().for_each(|c| c.push(None)),
        }
    }

    Ok(Table {
        time_column: table.time_column.clone(),
        timestamps: keys,
        columns: table
            .columns
            .iter()
            .zip(columns)
            .map(|(c, values)| Column::new(c.name.clone(), values))
            .collect(),
    })
}

/// Mean of a series per bucket.
pub fn resample_series(series: &TimeSeries, cadence: Cadence, mode: BucketMode) -> Result<TimeSeries> {
    let table = Table::from_series("time", "value", series);
    let resampled = resample_table(&table, cadence, mode)?;
    let values = resampled
        .columns
        .into_iter()
        .next()
        .map(|c| c.values)
        .unwrap_or_default();
    Ok(TimeSeries::from_parts(resampled.timestamps, values))
}

/// Per-calendar-day means of the days that have rows.
pub fn daily_means(table: &Table) -> Result<Table> {
    resample_table(table, Cadence::Day, BucketMode::ObservedOnly)
}

/// Per-minute means from sub-minute samples, with empty minutes kept.
pub fn minute_means(table: &Table) -> Result<Table> {
    resample_table(table, Cadence::Minute, BucketMode::Contiguous)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn ts(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").unwrap()
    }

    #[test]
    fn test_minute_means_from_seconds() {
        let start = ts("2025-01-18 00:00:00");
        let timestamps: Vec<NaiveDateTime> = (0..6).map(|i| start + Duration::seconds(i * 20)).collect();
        let table = Table::from_columns(
            "time",
            timestamps,
            vec![Column::new(
                "t",
                vec![Some(1.0), Some(2.0), Some(3.0), None, Some(5.0), Some(7.0)],
            )],
        )
        .unwrap();

        let out = minute_means(&table).unwrap();
        assert_eq!(out.timestamps, vec![start, start + Duration::minutes(1)]);
        assert_eq!(out.column("t").unwrap().values, vec![Some(2.0), Some(6.0)]);
    }

    #[test]
    fn test_day_without_valid_samples_is_missing() {
        let table = Table::from_columns(
            "time",
            vec![
                ts("2025-01-18 10:00:00"),
                ts("2025-01-18 11:00:00"),
                ts("2025-01-19 10:00:00"),
            ],
            vec![Column::new("ice", vec![Some(0.2), Some(0.4), None])],
        )
        .unwrap();

        let out = daily_means(&table).unwrap();
        assert_eq!(out.num_rows(), 2);
        let values = &out.column("ice").unwrap().values;
        assert!((values[0].unwrap() - 0.3).abs() < 1e-12);
        assert_eq!(values[1], None);
    }

    #[test]
    fn test_contiguous_inserts_empty_buckets() {
        let series = TimeSeries::from_pairs(vec![
            (ts("2025-01-20 08:00:00"), Some(1.0)),
            (ts("2025-01-18 08:00:00"), Some(3.0)),
        ]);

        let contiguous = resample_series(&series, Cadence::Day, BucketMode::Contiguous).unwrap();
        assert_eq!(contiguous.values, vec![Some(3.0), None, Some(1.0)]);
        assert_eq!(contiguous.timestamps[0], ts("2025-01-18 00:00:00"));

        let observed = resample_series(&series, Cadence::Day, BucketMode::ObservedOnly).unwrap();
        assert_eq!(observed.len(), 2);
    }

    #[test]
    fn test_empty_table_fails() {
        assert!(resample_table(&Table::new("time"), Cadence::Day, BucketMode::Contiguous).is_err());
    }
}
