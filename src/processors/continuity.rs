//! Continuity checking against a fixed-cadence grid.
//!
//! Timestamps are floored to the minute, sorted and de-duplicated (first
//! occurrence wins) before the grid is built, so the report describes the
//! minutes that actually carry data.

use std::fmt::Write as _;

use chrono::{Duration, NaiveDateTime};

use crate::core::error::{ProcessingError, Result};
use crate::core::series::stable_dedup_order;
use crate::core::time::{floor_to_minute, regular_grid};

const REPORT_TIME_FORMAT: &str = "%Y-%m-%d %H:%M";

/// Single-point or multi-point gap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GapKind {
    Single,
    Continuous,
}

/// A maximal run of consecutive grid timestamps with no data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Gap {
    pub kind: GapKind,
    /// First missing grid timestamp.
    pub start: NaiveDateTime,
    /// Last missing grid timestamp.
    pub end: NaiveDateTime,
    /// Number of missing grid points.
    pub points: usize,
    pub duration_minutes: i64,
}

/// Result of a continuity check.
#[derive(Debug, Clone, PartialEq)]
pub struct ContinuityReport {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    pub cadence_minutes: i64,
    /// Grid points between `start` and `end` inclusive.
    pub expected: usize,
    /// Grid points carrying data.
    pub present: usize,
    pub gaps: Vec<Gap>,
}

impl ContinuityReport {
    /// Fraction of grid points carrying data, in `[0, 1]`.
    pub fn completeness(&self) -> f64 {
        if self.expected == 0 {
            return 1.0;
        }
        self.present as f64 / self.expected as f64
    }

    pub fn missing_points(&self) -> usize {
        self.expected - self.present
    }

    pub fn is_complete(&self) -> bool {
        self.gaps.is_empty()
    }

    /// Longest gap; the earliest wins on ties.
    pub fn longest_gap(&self) -> Option<&Gap> {
        self.gaps
            .iter()
            .fold(None, |best: Option<&Gap>, gap| match best {
                Some(b) if b.points >= gap.points => Some(b),
                _ => Some(gap),
            })
    }

    /// Shortest gap; the earliest wins on ties.
    pub fn shortest_gap(&self) -> Option<&Gap> {
        self.gaps
            .iter()
            .fold(None, |best: Option<&Gap>, gap| match best {
                Some(b) if b.points <= gap.points => Some(b),
                _ => Some(gap),
            })
    }

    /// Plain-text summary suitable for a log file.
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "====== Continuity report ======");
        let _ = writeln!(
            out,
            "Time range: {} to {}",
            self.start.format("%Y-%m-%d %H:%M:%S"),
            self.end.format("%Y-%m-%d %H:%M:%S")
        );
        let _ = writeln!(out, "Cadence: {} min", self.cadence_minutes);
        let _ = writeln!(out, "Expected points: {}", self.expected);
        let _ = writeln!(out, "Present points: {}", self.present);
        let _ = writeln!(out, "Completeness: {:.2}%", self.completeness() * 100.0);
        let _ = writeln!(out);

        let _ = writeln!(out, "====== Gaps ======");
        if self.gaps.is_empty() {
            let _ = writeln!(out, "none");
        }
        for gap in &self.gaps {
            match gap.kind {
                GapKind::Single => {
                    let _ = writeln!(out, "single: {}", gap.start.format(REPORT_TIME_FORMAT));
                }
                GapKind::Continuous => {
                    let _ = writeln!(
                        out,
                        "continuous: {} ~ {}, duration: {} min",
                        gap.start.format(REPORT_TIME_FORMAT),
                        gap.end.format(REPORT_TIME_FORMAT),
                        gap.duration_minutes
                    );
                }
            }
        }

        let _ = writeln!(out);
        let _ = writeln!(out, "====== Summary ======");
        let _ = writeln!(out, "Missing points: {}", self.missing_points());
        let _ = writeln!(out, "Gaps: {}", self.gaps.len());
        for (label, gap) in [("Longest", self.longest_gap()), ("Shortest", self.shortest_gap())] {
            if let Some(gap) = gap {
                let _ = writeln!(
                    out,
                    "{} gap: {} min ({} ~ {})",
                    label,
                    gap.duration_minutes,
                    gap.start.format(REPORT_TIME_FORMAT),
                    gap.end.format(REPORT_TIME_FORMAT)
                );
            }
        }
        out
    }
}

/// Minute-floored, sorted, de-duplicated copy of `timestamps`.
pub fn normalize_timestamps(timestamps: &[NaiveDateTime]) -> Vec<NaiveDateTime> {
    let floored: Vec<NaiveDateTime> = timestamps.iter().map(|&ts| floor_to_minute(ts)).collect();
    stable_dedup_order(floored.iter().copied())
        .into_iter()
        .map(|i| floored[i])
        .collect()
}

/// Compare observed timestamps against the full grid between the first and
/// last of them.
///
/// # Errors
///
/// `InvalidInput` when `timestamps` is empty or the cadence is not positive.
pub fn check_continuity(timestamps: &[NaiveDateTime], cadence_minutes: i64) -> Result<ContinuityReport> {
    if cadence_minutes <= 0 {
        return Err(ProcessingError::InvalidInput(format!(
            "cadence must be a positive number of minutes, got {}",
            cadence_minutes
        )));
    }
    let observed = normalize_timestamps(timestamps);
    let (start, end) = match (observed.first(), observed.last()) {
        (Some(&s), Some(&e)) => (s, e),
        _ => {
            return Err(ProcessingError::InvalidInput(
                "cannot check continuity of an empty time column".to_string(),
            ))
        }
    };

    let step = Duration::minutes(cadence_minutes);
    let grid = regular_grid(start, end, step);

    let mut gaps = Vec::new();
    let mut run: Option<(NaiveDateTime, NaiveDateTime, usize)> = None;
    let mut present = 0usize;
    let mut cursor = observed.iter().peekable();

    for &slot in &grid {
        while cursor.next_if(|&&ts| ts < slot).is_some() {}
        let hit = cursor.next_if(|&&ts| ts == slot).is_some();

        if hit {
            present += 1;
            if let Some(open) = run.take() {
                gaps.push(close_gap(open, cadence_minutes));
            }
        } else {
            run = Some(match run {
                Some((first, _, n)) => (first, slot, n + 1),
                None => (slot, slot, 1),
            });
        }
    }
    // the grid ends on an observed timestamp, so no run is left open
    if let Some(open) = run.take() {
        gaps.push(close_gap(open, cadence_minutes));
    }

    Ok(ContinuityReport {
        start,
        end,
        cadence_minutes,
        expected: grid.len(),
        present,
        gaps,
    })
}

fn close_gap((start, end, points): (NaiveDateTime, NaiveDateTime, usize), cadence_minutes: i64) -> Gap {
    Gap {
        kind: if points == 1 {
            GapKind::Single
        } else {
            GapKind::Continuous
        },
        start,
        end,
        points,
        duration_minutes: points as i64 * cadence_minutes,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minutes(n: i64) -> Vec<NaiveDateTime> {
        let base = NaiveDateTime::parse_from_str("2025-01-18 00:00:00", "%Y-%m-%d %H:%M:%S").unwrap();
        (0..n).map(|m| base + Duration::minutes(m)).collect()
    }

    #[test]
    fn test_complete_series() {
        let report = check_continuity(&minutes(120), 1).unwrap();
        assert!(report.is_complete());
        assert_eq!(report.expected, 120);
        assert_eq!(report.present, 120);
        assert_eq!(report.completeness(), 1.0);
        assert!(report.longest_gap().is_none());
    }

    #[test]
    fn test_single_point_gap() {
        let mut ts = minutes(10);
        ts.remove(4);
        let report = check_continuity(&ts, 1).unwrap();

        assert_eq!(report.gaps.len(), 1);
        let gap = &report.gaps[0];
        assert_eq!(gap.kind, GapKind::Single);
        assert_eq!(gap.duration_minutes, 1);
        assert_eq!(gap.start, minutes(10)[4]);
        assert!((report.completeness() - 9.0 / 10.0).abs() < 1e-12);
    }

    #[test]
    fn test_continuous_gap() {
        let all = minutes(20);
        let ts: Vec<NaiveDateTime> = all
            .iter()
            .enumerate()
            .filter(|(i, _)| !(5..12).contains(i))
            .map(|(_, t)| *t)
            .collect();
        let report = check_continuity(&ts, 1).unwrap();

        assert_eq!(report.gaps.len(), 1);
        let gap = &report.gaps[0];
        assert_eq!(gap.kind, GapKind::Continuous);
        assert_eq!(gap.points, 7);
        assert_eq!(gap.duration_minutes, 7);
        assert_eq!(gap.start, all[5]);
        assert_eq!(gap.end, all[11]);
        assert_eq!(report.missing_points(), 7);
    }

    #[test]
    fn test_unsorted_duplicates_and_seconds() {
        let all = minutes(5);
        let ts = vec![
            all[3] + Duration::seconds(42),
            all[0],
            all[4],
            all[0] + Duration::seconds(5),
            all[1],
        ];
        let report = check_continuity(&ts, 1).unwrap();
        assert_eq!(report.present, 4);
        assert_eq!(report.gaps.len(), 1);
        assert_eq!(report.gaps[0].start, all[2]);
    }

    #[test]
    fn test_longest_and_shortest_ties() {
        let all = minutes(20);
        let keep = [0usize, 2, 5, 7, 10, 13, 19];
        let ts: Vec<NaiveDateTime> = keep.iter().map(|&i| all[i]).collect();
        let report = check_continuity(&ts, 1).unwrap();

        // gaps: 1, 2, 1, 2, 2, 5
        assert_eq!(report.longest_gap().unwrap().points, 5);
        assert_eq!(report.shortest_gap().unwrap().start, all[1]);
    }

    #[test]
    fn test_empty_input_fails() {
        assert!(matches!(
            check_continuity(&[], 1),
            Err(ProcessingError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_render_text() {
        let mut ts = minutes(4);
        ts.remove(1);
        let text = check_continuity(&ts, 1).unwrap().render_text();
        assert!(text.contains("Completeness: 75.00%"));
        assert!(text.contains("single: 2025-01-18 00:01"));
        assert!(text.contains("Longest gap: 1 min (2025-01-18 00:01 ~ 2025-01-18 00:01)"));
    }
}
