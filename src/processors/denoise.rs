//! Denoising and outlier rejection.
//!
//! Two strategies are provided:
//! - a median cascade (long median, short median, mean) that turns a noisy
//!   signal into a smooth one, used for daily summaries
//! - baseline-tolerance rejection, which marks samples far from a local
//!   baseline as missing without moving any timestamps
//!
//! Missing values never take part in a rolling statistic.

use std::collections::HashMap;

use chrono::{NaiveDate, NaiveTime};
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::config::{DenoiseConfig, PhysicalRange, RejectionConfig};
use crate::core::error::{ProcessingError, Result};
use crate::core::series::{round_to, TimeSeries};
use crate::core::table::{Column, Table};
use super::rolling::{rolling_mean, rolling_median, RollingWindow};

/// Reference a sample is compared against during rejection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BaselineKind {
    /// Rolling median over `window` samples.
    #[default]
    RollingMedian,
    /// Mean of the sample's calendar day.
    DailyMean,
}

/// Centered median, median, mean cascade over the valid samples.
///
/// Missing samples are removed before filtering and stay missing in the
/// output; every window uses `min_periods = 1`.
pub fn median_cascade(series: &TimeSeries, config: Option<&DenoiseConfig>) -> Result<TimeSeries> {
    let default_config = DenoiseConfig::default();
    let config = config.unwrap_or(&default_config);

    let positions: Vec<usize> = series
        .values
        .iter()
        .enumerate()
        .filter_map(|(i, v)| v.map(|_| i))
        .collect();
    let compact: Vec<Option<f64>> = positions.iter().map(|&i| series.values[i]).collect();

    let global = rolling_median(&compact, RollingWindow::centered(config.median_window_global))?;
    let local = rolling_median(&global, RollingWindow::centered(config.median_window_local))?;
    let smoothed = rolling_mean(&local, RollingWindow::centered(config.smooth_window))?;

    let mut values = vec![None; series.len()];
    for (&i, v) in positions.iter().zip(smoothed) {
        values[i] = v;
    }
    Ok(TimeSeries::from_parts(series.timestamps.clone(), values))
}

/// Filtered mean of one calendar day.
#[derive(Debug, Clone, PartialEq)]
pub struct DailySummary {
    pub date: NaiveDate,
    pub mean: f64,
    /// Valid raw samples that day.
    pub samples: usize,
}

/// Daily summaries plus the days skipped for lack of data.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DailyDenoiseReport {
    pub days: Vec<DailySummary>,
    /// `(date, valid samples)` of each skipped day.
    pub skipped: Vec<(NaiveDate, usize)>,
}

impl DailyDenoiseReport {
    /// One row per summarised day with `value_name` and `samples` columns.
    pub fn to_table(&self, time_column: &str, value_name: &str) -> Table {
        Table {
            time_column: time_column.to_string(),
            timestamps: self.days.iter().map(|d| d.date.and_time(NaiveTime::MIN)).collect(),
            columns: vec![
                Column::new(value_name, self.days.iter().map(|d| Some(d.mean)).collect()),
                Column::new("samples", self.days.iter().map(|d| Some(d.samples as f64)).collect()),
            ],
        }
    }
}

/// Per-day median cascade followed by the day mean.
///
/// Every calendar day from the first to the last sample is considered.
/// Days with fewer than `min_daily_samples` valid samples, including days
/// without any row, are skipped and listed in the report. Means are
/// rounded to `round_decimals`.
pub fn daily_denoised_means(series: &TimeSeries, config: Option<&DenoiseConfig>) -> Result<DailyDenoiseReport> {
    let default_config = DenoiseConfig::default();
    let config = config.unwrap_or(&default_config);
    let mut report = DailyDenoiseReport::default();

    let groups = series.group_by_day();
    let (first, last) = match (groups.first(), groups.last()) {
        (Some((first, _)), Some((last, _))) => (*first, *last),
        _ => return Ok(report),
    };
    let mut by_day: HashMap<NaiveDate, TimeSeries> = groups.into_iter().collect();

    for date in first.iter_days().take_while(|d| *d <= last) {
        let day = by_day.remove(&date).unwrap_or_default();
        let samples = day.valid_count();
        if samples < config.min_daily_samples {
            info!(
                "Skipping {} ({} valid samples, need {})",
                date, samples, config.min_daily_samples
            );
            report.skipped.push((date, samples));
            continue;
        }

        let filtered = median_cascade(&day, Some(config))?;
        let mean = filtered.mean().ok_or_else(|| ProcessingError::InsufficientData {
            operation: format!("daily mean of {}", date),
            required: 1,
            available: 0,
        })?;
        let mean = round_to(mean, config.round_decimals);
        debug!("{}: {} samples, mean {}", date, samples, mean);
        report.days.push(DailySummary { date, mean, samples });
    }

    Ok(report)
}

/// Outcome of baseline-tolerance rejection.
#[derive(Debug, Clone, PartialEq)]
pub struct RejectionOutcome {
    /// Same timestamps as the input; rejected samples are `None`.
    pub series: TimeSeries,
    pub rejected: usize,
    /// Baseline passes run, including the final one that rejected nothing.
    pub passes: usize,
}

/// Lower and upper bound of the tolerance band around `baseline`.
#[inline]
pub fn tolerance_band(baseline: f64, threshold: f64) -> (f64, f64) {
    let a = baseline * (1.0 - threshold);
    let b = baseline * (1.0 + threshold);
    (a.min(b), a.max(b))
}

fn compute_baseline(series: &TimeSeries, config: &RejectionConfig) -> Result<Vec<Option<f64>>> {
    match config.baseline {
        BaselineKind::RollingMedian => {
            let window = RollingWindow::aligned(config.window, config.centered).with_min_periods(config.min_periods);
            rolling_median(&series.values, window)
        }
        BaselineKind::DailyMean => {
            let mut sums: HashMap<NaiveDate, (f64, usize)> = HashMap::new();
            for (ts, value) in series.iter() {
                if let Some(v) = value {
                    let entry = sums.entry(ts.date()).or_insert((0.0, 0));
                    entry.0 += v;
                    entry.1 += 1;
                }
            }
            Ok(series
                .timestamps
                .iter()
                .map(|ts| sums.get(&ts.date()).map(|(sum, n)| sum / *n as f64))
                .collect())
        }
    }
}

/// Mark samples outside `baseline × (1 ± threshold)` as missing.
///
/// The baseline is recomputed without the samples rejected so far and the
/// pass is repeated until nothing more is rejected, so running the filter
/// again on its own output changes nothing. A sample whose baseline is
/// undefined (too few valid neighbours) is kept.
pub fn reject_outliers(series: &TimeSeries, config: Option<&RejectionConfig>) -> Result<RejectionOutcome> {
    let default_config = RejectionConfig::default();
    let config = config.unwrap_or(&default_config);

    if !(config.threshold >= 0.0) {
        return Err(ProcessingError::InvalidInput(format!(
            "rejection threshold must be non-negative, got {}",
            config.threshold
        )));
    }

    let mut current = series.clone();
    let mut rejected = 0usize;
    let mut passes = 0usize;

    loop {
        passes += 1;
        let baseline = compute_baseline(&current, config)?;
        let mut pass_rejected = 0usize;

        for (value, base) in current.values.iter_mut().zip(baseline) {
            if let (Some(v), Some(b)) = (*value, base) {
                let (lo, hi) = tolerance_band(b, config.threshold);
                if v < lo || v > hi {
                    *value = None;
                    pass_rejected += 1;
                }
            }
        }

        debug!("Rejection pass {}: {} sample(s) rejected", passes, pass_rejected);
        rejected += pass_rejected;
        if pass_rejected == 0 {
            break;
        }
    }

    Ok(RejectionOutcome {
        series: current,
        rejected,
        passes,
    })
}

/// Replace samples outside the physical range with missing values.
pub fn clip_to_range(series: &TimeSeries, range: &PhysicalRange) -> TimeSeries {
    series.map_values(|v| v.filter(|x| *x >= range.min && *x <= range.max))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDateTime};

    fn base() -> NaiveDateTime {
        NaiveDateTime::parse_from_str("2025-01-18 00:00:00", "%Y-%m-%d %H:%M:%S").unwrap()
    }

    fn minute_series(values: &[Option<f64>]) -> TimeSeries {
        TimeSeries::from_pairs(
            values
                .iter()
                .enumerate()
                .map(|(i, v)| (base() + Duration::minutes(i as i64), *v)),
        )
    }

    #[test]
    fn test_scenario_marks_spike_missing() {
        let mut values = vec![Some(10.0); 10];
        values[4] = None;
        values[5] = None;
        values[9] = Some(1000.0);

        let outcome = reject_outliers(&minute_series(&values), None).unwrap();
        assert_eq!(outcome.rejected, 1);
        assert_eq!(outcome.series.values[9], None);
        assert_eq!(outcome.series.values[8], Some(10.0));
        assert_eq!(outcome.series.values[4], None);
        assert_eq!(outcome.series.len(), 10);
    }

    #[test]
    fn test_rejection_is_idempotent() {
        let values: Vec<Option<f64>> = (0..200)
            .map(|i| match i % 17 {
                0 => Some(5.0),
                3 => None,
                _ => Some(0.3 + (i as f64 * 0.37).sin() * 0.05),
            })
            .collect();
        let config = RejectionConfig {
            window: 30,
            ..RejectionConfig::default()
        };

        let first = reject_outliers(&minute_series(&values), Some(&config)).unwrap();
        let second = reject_outliers(&first.series, Some(&config)).unwrap();

        assert!(first.rejected > 0);
        assert_eq!(second.rejected, 0);
        assert_eq!(second.passes, 1);
        assert_eq!(second.series, first.series);
    }

    #[test]
    fn test_negative_baseline_band() {
        assert_eq!(tolerance_band(-10.0, 0.1), (-11.0, -9.0));

        let values = vec![Some(-10.0), Some(-10.0), Some(-10.5), Some(-30.0)];
        let outcome = reject_outliers(&minute_series(&values), None).unwrap();
        assert_eq!(outcome.series.values, vec![Some(-10.0), Some(-10.0), Some(-10.5), None]);
    }

    #[test]
    fn test_daily_mean_baseline() {
        let mut values = vec![Some(1.0); 6];
        values[2] = Some(3.0);
        let config = RejectionConfig {
            baseline: BaselineKind::DailyMean,
            threshold: 0.5,
            ..RejectionConfig::default()
        };

        // day mean 1.333, band [0.667, 2.0]
        let outcome = reject_outliers(&minute_series(&values), Some(&config)).unwrap();
        assert_eq!(outcome.rejected, 1);
        assert_eq!(outcome.series.values[2], None);
    }

    #[test]
    fn test_median_cascade_keeps_missing_positions() {
        let values = vec![Some(1.0), None, Some(1.0), Some(50.0), Some(1.0), Some(1.0)];
        let config = DenoiseConfig {
            median_window_global: 3,
            median_window_local: 1,
            smooth_window: 1,
            ..DenoiseConfig::default()
        };

        let out = median_cascade(&minute_series(&values), Some(&config)).unwrap();
        assert_eq!(out.values[1], None);
        assert_eq!(out.values[3], Some(1.0));
        assert_eq!(out.valid_count(), 5);
    }

    #[test]
    fn test_daily_means_skip_sparse_days() {
        let mut series = TimeSeries::new();
        for i in 0..20 {
            series.push(base() + Duration::minutes(i), Some(0.3));
        }
        series.push(base() + Duration::days(1), Some(0.4));
        series.push(base() + Duration::days(2), None);

        let report = daily_denoised_means(&series, None).unwrap();
        assert_eq!(report.days.len(), 1);
        assert_eq!(report.days[0].mean, 0.3);
        assert_eq!(report.days[0].samples, 20);
        assert_eq!(report.skipped.len(), 2);
        assert_eq!(report.skipped[1].1, 0);

        let table = report.to_table("date", "ice_m");
        assert_eq!(table.column("samples").unwrap().values, vec![Some(20.0)]);
    }

    #[test]
    fn test_days_without_rows_are_skipped() {
        let mut series = TimeSeries::new();
        for day in [0, 3] {
            for i in 0..12 {
                series.push(base() + Duration::days(day) + Duration::minutes(i), Some(0.5));
            }
        }

        let report = daily_denoised_means(&series, None).unwrap();
        assert_eq!(report.days.len(), 2);
        let skipped: Vec<(NaiveDate, usize)> = report.skipped.clone();
        assert_eq!(
            skipped,
            vec![
                ((base() + Duration::days(1)).date(), 0),
                ((base() + Duration::days(2)).date(), 0),
            ]
        );
    }

    #[test]
    fn test_clip_to_range() {
        let series = minute_series(&[Some(-0.1), Some(0.2), Some(0.45), None]);
        let clipped = clip_to_range(&series, &PhysicalRange { min: 0.0, max: 0.4 });
        assert_eq!(clipped.values, vec![None, Some(0.2), None, None]);
    }

    #[test]
    fn test_negative_threshold_rejected() {
        let config = RejectionConfig {
            threshold: -0.1,
            ..RejectionConfig::default()
        };
        assert!(reject_outliers(&minute_series(&[Some(1.0)]), Some(&config)).is_err());
    }
}
