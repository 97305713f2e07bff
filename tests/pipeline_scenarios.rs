use std::fs;

use chrono::{Duration, NaiveDateTime};
use lake_sensor_pipeline::core::{load_table, Column, Table, TimeSeries};
use lake_sensor_pipeline::processors::{
    check_continuity, daily_means, fill_gaps, interpolate_profile, reject_outliers, BoundaryPolicy, DepthProfile,
    GapKind, SplineOrder,
};
use tempfile::tempdir;

fn base() -> NaiveDateTime {
    NaiveDateTime::parse_from_str("2025-01-18 00:00:00", "%Y-%m-%d %H:%M:%S").unwrap()
}

fn minute_grid(n: i64) -> Vec<NaiveDateTime> {
    (0..n).map(|i| base() + Duration::minutes(i)).collect()
}

#[test]
fn spike_is_rejected_then_interior_gap_filled() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("ice.csv");
    let mut csv = String::from("time,altimeter\n");
    for (i, ts) in minute_grid(10).iter().enumerate() {
        let value = match i {
            4 | 5 => String::new(),
            9 => "1000".to_string(),
            _ => "10".to_string(),
        };
        csv.push_str(&format!("{},{}\n", ts.format("%Y-%m-%d %H:%M:%S"), value));
    }
    fs::write(&path, csv).unwrap();

    let table = load_table(&path, None).unwrap();
    let series = table.series("altimeter").unwrap();
    assert_eq!(series.len(), 10);

    let cleaned = reject_outliers(&series, None).unwrap();
    assert_eq!(cleaned.rejected, 1);
    assert_eq!(cleaned.series.values[9], None);

    let filled = fill_gaps(&cleaned.series, 1, BoundaryPolicy::LeaveMissing).unwrap();
    assert_eq!(filled.series.values[4], Some(10.0));
    assert_eq!(filled.series.values[5], Some(10.0));
    assert_eq!(filled.series.values[9], None);

    let held = fill_gaps(&cleaned.series, 1, BoundaryPolicy::HoldNearest).unwrap();
    assert_eq!(held.series.values[9], Some(10.0));
    assert_eq!(held.unfilled, 0);
}

#[test]
fn continuity_properties() {
    let full = minute_grid(60);
    let report = check_continuity(&full, 1).unwrap();
    assert_eq!(report.missing_points(), 0);
    assert!((report.completeness() - 1.0).abs() < 1e-12);

    let one_removed: Vec<_> = full.iter().copied().filter(|t| *t != base() + Duration::minutes(30)).collect();
    let report = check_continuity(&one_removed, 1).unwrap();
    assert_eq!(report.gaps.len(), 1);
    assert_eq!(report.gaps[0].kind, GapKind::Single);
    assert_eq!(report.gaps[0].duration_minutes, 1);
    assert!((report.completeness() - 59.0 / 60.0).abs() < 1e-12);

    let run_removed: Vec<_> = full
        .iter()
        .copied()
        .filter(|t| *t < base() + Duration::minutes(10) || *t >= base() + Duration::minutes(17))
        .collect();
    let report = check_continuity(&run_removed, 1).unwrap();
    assert_eq!(report.gaps.len(), 1);
    assert_eq!(report.gaps[0].kind, GapKind::Continuous);
    assert_eq!(report.gaps[0].duration_minutes, 7);
}

#[test]
fn filling_preserves_present_values() {
    let values = vec![Some(1.5), None, None, Some(-2.0), Some(3.25), None, Some(0.0)];
    let series = TimeSeries::from_pairs(minute_grid(7).into_iter().zip(values.clone()));

    let filled = fill_gaps(&series, 1, BoundaryPolicy::LeaveMissing).unwrap();
    for (orig, out) in values.iter().zip(&filled.series.values) {
        if let Some(v) = orig {
            assert_eq!(out, &Some(*v));
        }
    }
    for v in [filled.series.values[1], filled.series.values[2]].into_iter().flatten() {
        assert!((-2.0..=1.5).contains(&v));
    }
}

#[test]
fn day_without_valid_samples_is_missing() {
    let timestamps = vec![
        base(),
        base() + Duration::hours(1),
        base() + Duration::days(1),
        base() + Duration::days(1) + Duration::hours(1),
    ];
    let table = Table::from_columns(
        "time",
        timestamps,
        vec![Column::new("temp", vec![Some(2.0), Some(4.0), None, None])],
    )
    .unwrap();

    let daily = daily_means(&table).unwrap();
    assert_eq!(daily.num_rows(), 2);
    assert_eq!(daily.column("temp").unwrap().values, vec![Some(3.0), None]);
}

#[test]
fn quadratic_profile_passes_through_sensors() {
    let table = Table::from_columns(
        "time",
        vec![base()],
        vec![
            Column::new("t0", vec![Some(-5.0)]),
            Column::new("t20", vec![Some(-3.0)]),
            Column::new("t40", vec![Some(0.0)]),
        ],
    )
    .unwrap();
    let profile = DepthProfile::new(
        vec![0.0, -0.2, -0.4],
        vec!["t0".to_string(), "t20".to_string(), "t40".to_string()],
    )
    .unwrap();

    let field = interpolate_profile(&table, &profile, 0.01, Some(SplineOrder::Quadratic)).unwrap();
    assert_eq!(field.skipped_rows, 0);
    for (depth, expected) in [(0.0, -5.0), (-0.2, -3.0), (-0.4, 0.0)] {
        let idx = field.nearest_depth_index(depth).unwrap();
        let value = field.values[0][idx].unwrap();
        assert!((value - expected).abs() < 1e-9, "{} at {}", value, depth);
    }
}
