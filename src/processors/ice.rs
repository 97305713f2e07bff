//! Ice thickness from daily altimeter readings.
//!
//! The altimeter measures the distance down to the ice surface, so a rising
//! reading means the ice got thinner: each day's thickness is the previous
//! thickness minus the change in reading.

use crate::config::IceConfig;
use crate::core::error::Result;
use crate::core::series::round_to;
use crate::core::table::Table;

pub const THICKNESS_M_COLUMN: &str = "ice_thickness_m";
pub const THICKNESS_CM_COLUMN: &str = "ice_thickness_cm";

/// Running thickness in metres, rounded to 6 decimals at every step.
///
/// The first valid reading gets `initial`. A missing reading yields a
/// missing thickness, and the next valid reading is differenced against
/// the last valid one, so a gap does not break the chain.
pub fn accumulate_thickness(readings: &[Option<f64>], initial: f64) -> Vec<Option<f64>> {
    let mut last: Option<(f64, f64)> = None; // (reading, thickness)
    readings
        .iter()
        .map(|reading| {
            let h = (*reading)?;
            let thickness = match last {
                None => initial,
                Some((prev_h, prev_t)) => round_to(prev_t - (h - prev_h), 6),
            };
            last = Some((h, thickness));
            Some(thickness)
        })
        .collect()
}

/// Add thickness columns (metres and centimetres) to a daily table.
pub fn add_thickness_columns(table: &mut Table, config: Option<&IceConfig>) -> Result<()> {
    let default_config = IceConfig::default();
    let config = config.unwrap_or(&default_config);

    let readings = table.series(&config.altimeter_column)?;
    let metres = accumulate_thickness(&readings.values, config.initial_thickness_m);
    let centimetres = metres.iter().map(|t| t.map(|m| round_to(m * 100.0, 2))).collect();

    table.set_column(THICKNESS_M_COLUMN, metres)?;
    table.set_column(THICKNESS_CM_COLUMN, centimetres)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::ProcessingError;
    use crate::core::table::Column;
    use chrono::{Duration, NaiveDateTime};

    #[test]
    fn test_accumulate_thickness() {
        let readings = [Some(1.50), Some(1.48), Some(1.47), Some(1.49)];
        let thickness = accumulate_thickness(&readings, 0.62);
        assert_eq!(thickness, vec![Some(0.62), Some(0.64), Some(0.65), Some(0.63)]);
    }

    #[test]
    fn test_missing_reading_resumes_chain() {
        let readings = [None, Some(1.50), None, Some(1.45)];
        let thickness = accumulate_thickness(&readings, 0.62);
        assert_eq!(thickness, vec![None, Some(0.62), None, Some(0.67)]);
    }

    #[test]
    fn test_add_thickness_columns() {
        let start = NaiveDateTime::parse_from_str("2025-01-18 00:00:00", "%Y-%m-%d %H:%M:%S").unwrap();
        let mut table = Table::from_columns(
            "date",
            (0..3).map(|d| start + Duration::days(d)).collect(),
            vec![Column::new("altimeter", vec![Some(1.2), Some(1.1875), Some(1.2)])],
        )
        .unwrap();

        add_thickness_columns(&mut table, None).unwrap();

        assert_eq!(
            table.column(THICKNESS_M_COLUMN).unwrap().values,
            vec![Some(0.62), Some(0.6325), Some(0.62)]
        );
        assert_eq!(
            table.column(THICKNESS_CM_COLUMN).unwrap().values,
            vec![Some(62.0), Some(63.25), Some(62.0)]
        );
    }

    #[test]
    fn test_missing_altimeter_column() {
        let mut table = Table::new("date");
        assert!(matches!(
            add_thickness_columns(&mut table, None),
            Err(ProcessingError::SchemaMismatch { .. })
        ));
    }
}
