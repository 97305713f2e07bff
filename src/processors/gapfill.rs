//! Gap filling on a regular grid.
//!
//! A series is normalized (minute floor, sort, first duplicate wins),
//! reindexed onto the full grid between its first and last timestamp, and
//! every missing value is filled by time-weighted linear interpolation
//! between the nearest valid samples on either side. Values that were
//! present are never modified.

use chrono::{Duration, NaiveDateTime};
use log::debug;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::core::error::{ProcessingError, Result};
use crate::core::series::TimeSeries;
use crate::core::table::{Column, Table};
use crate::core::time::regular_grid;

/// What happens to missing values before the first or after the last
/// valid sample, where only one anchor exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoundaryPolicy {
    /// Leave them missing.
    #[default]
    LeaveMissing,
    /// Repeat the nearest valid value.
    HoldNearest,
}

/// Linear interpolation at `t` between two anchors, bounded by them.
#[inline]
fn interpolate_between(t0: NaiveDateTime, v0: f64, t1: NaiveDateTime, v1: f64, t: NaiveDateTime) -> f64 {
    let span = (t1 - t0).num_milliseconds() as f64;
    if span <= 0.0 {
        return v0;
    }
    let frac = (t - t0).num_milliseconds() as f64 / span;
    (v0 + (v1 - v0) * frac).clamp(v0.min(v1), v0.max(v1))
}

/// Fill missing values in place; returns how many were filled.
///
/// `timestamps` must be sorted ascending.
fn fill_values(timestamps: &[NaiveDateTime], values: &mut [Option<f64>], policy: BoundaryPolicy) -> usize {
    let anchors: Vec<usize> = values
        .iter()
        .enumerate()
        .filter_map(|(i, v)| v.map(|_| i))
        .collect();
    let (first, last) = match (anchors.first(), anchors.last()) {
        (Some(&f), Some(&l)) => (f, l),
        _ => return 0,
    };

    let mut filled = 0usize;
    for pair in anchors.windows(2) {
        let (p, q) = (pair[0], pair[1]);
        if q - p < 2 {
            continue;
        }
        let (Some(v0), Some(v1)) = (values[p], values[q]) else {
            continue;
        };
        for i in p + 1..q {
            values[i] = Some(interpolate_between(timestamps[p], v0, timestamps[q], v1, timestamps[i]));
            filled += 1;
        }
    }

    if policy == BoundaryPolicy::HoldNearest {
        let head = values[first];
        let tail = values[last];
        for v in values[..first].iter_mut() {
            *v = head;
            filled += 1;
        }
        for v in values[last + 1..].iter_mut() {
            *v = tail;
            filled += 1;
        }
    }

    filled
}

/// Interpolate every missing value of a sorted series without regridding.
pub fn interpolate_missing(series: &TimeSeries, policy: BoundaryPolicy) -> TimeSeries {
    let mut values = series.values.clone();
    fill_values(&series.timestamps, &mut values, policy);
    TimeSeries::from_parts(series.timestamps.clone(), values)
}

/// For each grid slot, the row of `sorted` carrying that timestamp.
///
/// Rows that fall between grid slots are not referenced.
fn grid_rows(sorted: &[NaiveDateTime], grid: &[NaiveDateTime]) -> Vec<Option<usize>> {
    let mut rows = Vec::with_capacity(grid.len());
    let mut j = 0usize;
    for &slot in grid {
        while j < sorted.len() && sorted[j] < slot {
            j += 1;
        }
        rows.push((j < sorted.len() && sorted[j] == slot).then_some(j));
    }
    rows
}

fn cadence_step(cadence_minutes: i64) -> Result<Duration> {
    if cadence_minutes <= 0 {
        return Err(ProcessingError::InvalidInput(format!(
            "cadence must be a positive number of minutes, got {}",
            cadence_minutes
        )));
    }
    Ok(Duration::minutes(cadence_minutes))
}

/// Normalize a series and place it on the full grid; absent slots are `None`.
pub fn reindex_to_grid(series: &TimeSeries, cadence_minutes: i64) -> Result<TimeSeries> {
    let step = cadence_step(cadence_minutes)?;
    let normalized = series.normalized();
    let (start, end) = normalized.span().ok_or_else(|| {
        ProcessingError::InvalidInput("cannot reindex an empty series".to_string())
    })?;

    let grid = regular_grid(start, end, step);
    let values = grid_rows(&normalized.timestamps, &grid)
        .into_iter()
        .map(|row| row.and_then(|r| normalized.values[r]))
        .collect();
    Ok(TimeSeries::from_parts(grid, values))
}

/// Outcome of filling a single series.
#[derive(Debug, Clone, PartialEq)]
pub struct FillOutcome {
    pub series: TimeSeries,
    /// Rows after normalization, before reindexing.
    pub original_rows: usize,
    /// Grid slots that had no row in the input.
    pub inserted: usize,
    /// Missing values that received an interpolated value.
    pub interpolated: usize,
    /// Missing values left after filling (boundaries).
    pub unfilled: usize,
}

/// Reindex onto the grid and interpolate every missing value.
pub fn fill_gaps(series: &TimeSeries, cadence_minutes: i64, policy: BoundaryPolicy) -> Result<FillOutcome> {
    let original_rows = series.normalized().len();
    let mut gridded = reindex_to_grid(series, cadence_minutes)?;
    let inserted = gridded.len().saturating_sub(original_rows);

    let interpolated = fill_values(&gridded.timestamps, &mut gridded.values, policy);
    let unfilled = gridded.len() - gridded.valid_count();

    Ok(FillOutcome {
        series: gridded,
        original_rows,
        inserted,
        interpolated,
        unfilled,
    })
}

/// Outcome of filling every column of a table.
#[derive(Debug, Clone, PartialEq)]
pub struct TableFillOutcome {
    pub table: Table,
    pub original_rows: usize,
    pub inserted: usize,
}

impl TableFillOutcome {
    pub fn start(&self) -> Option<NaiveDateTime> {
        self.table.timestamps.first().copied()
    }

    pub fn end(&self) -> Option<NaiveDateTime> {
        self.table.timestamps.last().copied()
    }
}

/// Reindex a table onto the grid and interpolate each column.
///
/// Columns are filled independently in parallel; their order is kept.
pub fn fill_table_gaps(table: &Table, cadence_minutes: i64, policy: BoundaryPolicy) -> Result<TableFillOutcome> {
    let step = cadence_step(cadence_minutes)?;
    let normalized = table.normalized();
    let (start, end) = match (normalized.timestamps.first(), normalized.timestamps.last()) {
        (Some(&s), Some(&e)) => (s, e),
        _ => {
            return Err(ProcessingError::InvalidInput(
                "cannot fill gaps of a table without rows".to_string(),
            ))
        }
    };

    let grid = regular_grid(start, end, step);
    let rows = grid_rows(&normalized.timestamps, &grid);

    let columns: Vec<Column> = normalized
        .columns
        .par_iter()
        .map(|column| {
            let mut values: Vec<Option<f64>> = rows
                .iter()
                .map(|row| row.and_then(|r| column.values[r]))
                .collect();
            let filled = fill_values(&grid, &mut values, policy);
            debug!("Column '{}': {} value(s) interpolated", column.name, filled);
            Column::new(column.name.clone(), values)
        })
        .collect();

    let original_rows = normalized.num_rows();
    let inserted = grid.len().saturating_sub(original_rows);

    Ok(TableFillOutcome {
        table: Table {
            time_column: normalized.time_column,
            timestamps: grid,
            columns,
        },
        original_rows,
        inserted,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> NaiveDateTime {
        NaiveDateTime::parse_from_str("2025-01-18 00:00:00", "%Y-%m-%d %H:%M:%S").unwrap()
    }

    fn at(minute: i64) -> NaiveDateTime {
        base() + Duration::minutes(minute)
    }

    #[test]
    fn test_fill_interior_gap_is_linear() {
        let series = TimeSeries::from_pairs(vec![(at(0), Some(0.0)), (at(4), Some(8.0))]);
        let outcome = fill_gaps(&series, 1, BoundaryPolicy::LeaveMissing).unwrap();

        assert_eq!(outcome.series.len(), 5);
        assert_eq!(outcome.inserted, 3);
        assert_eq!(outcome.interpolated, 3);
        assert_eq!(
            outcome.series.values,
            vec![Some(0.0), Some(2.0), Some(4.0), Some(6.0), Some(8.0)]
        );
    }

    #[test]
    fn test_fill_after_rejection() {
        let mut values = vec![Some(10.0); 10];
        values[4] = None;
        values[5] = None;
        values[9] = Some(1000.0);
        let series = TimeSeries::from_pairs(values.into_iter().enumerate().map(|(i, v)| (at(i as i64), v)));

        let cleaned = crate::processors::denoise::reject_outliers(&series, None).unwrap();
        let outcome = fill_gaps(&cleaned.series, 1, BoundaryPolicy::LeaveMissing).unwrap();

        assert_eq!(outcome.series.values[4], Some(10.0));
        assert_eq!(outcome.series.values[5], Some(10.0));
        assert_eq!(outcome.series.values[9], None);
        assert_eq!(outcome.inserted, 0);
        assert_eq!(outcome.unfilled, 1);
    }

    #[test]
    fn test_time_weighted_not_positional() {
        // a missing value at minute 1 sits between anchors at 0 and 10
        let series = TimeSeries::from_pairs(vec![(at(0), Some(0.0)), (at(1), None), (at(10), Some(10.0))]);
        let filled = interpolate_missing(&series, BoundaryPolicy::LeaveMissing);
        assert_eq!(filled.values[1], Some(1.0));
    }

    #[test]
    fn test_present_values_preserved_and_bounded() {
        let values = [Some(3.7), None, None, Some(-1.2), None, Some(5.5), Some(5.5)];
        let series = TimeSeries::from_pairs(values.iter().enumerate().map(|(i, v)| (at(i as i64), *v)));
        let outcome = fill_gaps(&series, 1, BoundaryPolicy::LeaveMissing).unwrap();

        for (i, v) in values.iter().enumerate() {
            if let Some(v) = v {
                assert_eq!(outcome.series.values[i], Some(*v));
            }
        }
        for i in [1, 2] {
            let v = outcome.series.values[i].unwrap();
            assert!(v > -1.2 && v < 3.7);
        }
        assert!(outcome.series.values[1] > outcome.series.values[2]);
        assert_eq!(outcome.unfilled, 0);
    }

    #[test]
    fn test_boundary_policies() {
        let series = TimeSeries::from_pairs(vec![
            (at(0), None),
            (at(1), Some(2.0)),
            (at(2), None),
            (at(3), Some(4.0)),
            (at(4), None),
        ]);

        let leave = fill_gaps(&series, 1, BoundaryPolicy::LeaveMissing).unwrap();
        assert_eq!(leave.series.values, vec![None, Some(2.0), Some(3.0), Some(4.0), None]);
        assert_eq!(leave.unfilled, 2);

        let hold = fill_gaps(&series, 1, BoundaryPolicy::HoldNearest).unwrap();
        assert_eq!(
            hold.series.values,
            vec![Some(2.0), Some(2.0), Some(3.0), Some(4.0), Some(4.0)]
        );
        assert_eq!(hold.unfilled, 0);
    }

    #[test]
    fn test_all_missing_stays_missing() {
        let series = TimeSeries::from_pairs(vec![(at(0), None), (at(2), None)]);
        let outcome = fill_gaps(&series, 1, BoundaryPolicy::HoldNearest).unwrap();
        assert_eq!(outcome.series.values, vec![None, None, None]);
    }

    #[test]
    fn test_empty_series_fails() {
        assert!(matches!(
            fill_gaps(&TimeSeries::new(), 1, BoundaryPolicy::LeaveMissing),
            Err(ProcessingError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_fill_table_normalizes_first() {
        let table = Table::from_columns(
            "time",
            vec![at(3) + Duration::seconds(20), at(0), at(0) + Duration::seconds(30)],
            vec![
                Column::new("a", vec![Some(3.0), Some(0.0), Some(99.0)]),
                Column::new("b", vec![None, Some(1.0), Some(1.0)]),
            ],
        )
        .unwrap();

        let outcome = fill_table_gaps(&table, 1, BoundaryPolicy::LeaveMissing).unwrap();
        assert_eq!(outcome.original_rows, 2);
        assert_eq!(outcome.inserted, 2);
        assert_eq!(outcome.start(), Some(at(0)));
        assert_eq!(outcome.end(), Some(at(3)));
        assert_eq!(
            outcome.table.column("a").unwrap().values,
            vec![Some(0.0), Some(1.0), Some(2.0), Some(3.0)]
        );
        assert_eq!(
            outcome.table.column("b").unwrap().values,
            vec![Some(1.0), None, None, None]
        );
    }
}
