//! Chart rendering for sensor series and depth fields.
//!
//! Charts are written as PNG files with the plotters bitmap backend. No text
//! is drawn, so rendering does not depend on system fonts; the time axis is
//! measured in hours from the first plotted sample.

use std::path::Path;

use chrono::NaiveDateTime;
use plotters::prelude::*;
use plotters_bitmap::BitMapBackend;
use thiserror::Error;

use crate::config::ColorStop;
use crate::core::series::TimeSeries;
use crate::processors::profile::DepthField;

/// Errors that can occur during visualization.
#[derive(Error, Debug)]
pub enum VisualizationError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Plotting error: {0}")]
    PlottingError(String),

    #[error("Nothing to plot: {0}")]
    EmptyData(String),

    #[error("Invalid colour '{0}': expected #RRGGBB")]
    InvalidColor(String),
}

/// Result type for visualization operations.
pub type Result<T> = std::result::Result<T, VisualizationError>;

/// Width reserved for the heat map colour bar, in pixels.
const COLORBAR_WIDTH: u32 = 60;

/// Colour for cells without data.
const MISSING_COLOR: RGBColor = RGBColor(235, 235, 235);

/// Parse `#RRGGBB` (the leading `#` is optional).
pub fn parse_hex_color(hex: &str) -> Result<RGBColor> {
    let digits = hex.trim().trim_start_matches('#');
    if digits.len() != 6 || !digits.is_ascii() {
        return Err(VisualizationError::InvalidColor(hex.to_string()));
    }
    let channel = |i: usize| {
        u8::from_str_radix(&digits[i..i + 2], 16).map_err(|_| VisualizationError::InvalidColor(hex.to_string()))
    };
    Ok(RGBColor(channel(0)?, channel(2)?, channel(4)?))
}

/// Piecewise-linear colour scale between value stops.
#[derive(Debug, Clone)]
pub struct ColorScale {
    stops: Vec<(f64, RGBColor)>,
    vmin: f64,
    vmax: f64,
}

impl ColorScale {
    /// Build a scale from configured stops, clamped to `[vmin, vmax]`.
    pub fn from_stops(stops: &[ColorStop], vmin: f64, vmax: f64) -> Result<Self> {
        if stops.is_empty() {
            return Err(VisualizationError::EmptyData("colour scale has no stops".to_string()));
        }
        let mut parsed = stops
            .iter()
            .map(|s| Ok((s.value, parse_hex_color(&s.color)?)))
            .collect::<Result<Vec<_>>>()?;
        parsed.sort_by(|a, b| a.0.total_cmp(&b.0));
        Ok(Self {
            stops: parsed,
            vmin: vmin.min(vmax),
            vmax: vmax.max(vmin),
        })
    }

    pub fn range(&self) -> (f64, f64) {
        (self.vmin, self.vmax)
    }

    pub fn color_at(&self, value: f64) -> RGBColor {
        let v = value.clamp(self.vmin, self.vmax);
        let upper = self.stops.partition_point(|(s, _)| *s < v);
        if upper == 0 {
            return self.stops[0].1;
        }
        if upper == self.stops.len() {
            return self.stops[upper - 1].1;
        }

        let (v0, c0) = self.stops[upper - 1];
        let (v1, c1) = self.stops[upper];
        let t = if v1 > v0 { (v - v0) / (v1 - v0) } else { 1.0 };
        let mix = |a: u8, b: u8| (a as f64 + (b as f64 - a as f64) * t).round() as u8;
        RGBColor(mix(c0.0, c1.0), mix(c0.1, c1.1), mix(c0.2, c1.2))
    }
}

/// How a layer of a comparison chart is drawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerStyle {
    Points,
    Line,
}

/// One series of a comparison chart.
#[derive(Debug, Clone)]
pub struct SeriesLayer<'a> {
    pub series: &'a TimeSeries,
    pub color: RGBColor,
    pub style: LayerStyle,
}

#[inline]
fn hours_since(origin: NaiveDateTime, ts: NaiveDateTime) -> f64 {
    (ts - origin).num_seconds() as f64 / 3600.0
}

/// Earliest timestamp, last x in hours and padded y range of all series.
fn series_bounds<'a, I>(series: I) -> Option<(NaiveDateTime, f64, f64, f64)>
where
    I: IntoIterator<Item = &'a TimeSeries>,
{
    let series: Vec<&TimeSeries> = series.into_iter().collect();
    let origin = series.iter().filter_map(|s| s.timestamps.iter().min()).min().copied()?;

    let (mut x_max, mut y_min, mut y_max) = (f64::MIN, f64::MAX, f64::MIN);
    for s in &series {
        for (ts, value) in s.iter() {
            x_max = x_max.max(hours_since(origin, ts));
            if let Some(v) = value {
                y_min = y_min.min(v);
                y_max = y_max.max(v);
            }
        }
    }
    if y_min > y_max {
        return None;
    }
    if (y_max - y_min).abs() < f64::EPSILON {
        y_min -= 1.0;
        y_max += 1.0;
    }
    if x_max <= 0.0 {
        x_max = 1.0;
    }
    let pad = (y_max - y_min) * 0.05;
    Some((origin, x_max, y_min - pad, y_max + pad))
}

/// Contiguous runs of valid samples, so lines break at missing values.
fn valid_runs(series: &TimeSeries, origin: NaiveDateTime) -> Vec<Vec<(f64, f64)>> {
    let mut runs = Vec::new();
    let mut current = Vec::new();
    for (ts, value) in series.iter() {
        match value {
            Some(v) => current.push((hours_since(origin, ts), v)),
            None if !current.is_empty() => runs.push(std::mem::take(&mut current)),
            None => {}
        }
    }
    if !current.is_empty() {
        runs.push(current);
    }
    runs
}

/// Draw several series on one shared time axis.
///
/// # Arguments
///
/// * `output_path` - Path to save the PNG image
/// * `layers` - Series drawn in order, later layers on top
/// * `size` - Image size in pixels
pub fn plot_series_comparison(output_path: &Path, layers: &[SeriesLayer<'_>], size: (u32, u32)) -> Result<()> {
    let (origin, x_max, y_min, y_max) = series_bounds(layers.iter().map(|l| l.series))
        .ok_or_else(|| VisualizationError::EmptyData("no valid samples in any series".to_string()))?;

    let root = BitMapBackend::new(output_path, size).into_drawing_area();
    root.fill(&WHITE).map_err(|e| VisualizationError::PlottingError(e.to_string()))?;

    let mut chart = ChartBuilder::on(&root)
        .margin(20)
        .build_cartesian_2d(0.0..x_max, y_min..y_max)
        .map_err(|e| VisualizationError::PlottingError(e.to_string()))?;

    chart
        .configure_mesh()
        .disable_x_mesh()
        .disable_y_mesh()
        .draw()
        .map_err(|e| VisualizationError::PlottingError(e.to_string()))?;

    for layer in layers {
        match layer.style {
            LayerStyle::Points => {
                chart
                    .draw_series(
                        valid_runs(layer.series, origin)
                            .into_iter()
                            .flatten()
                            .map(|(x, y)| Circle::new((x, y), 2, layer.color.filled())),
                    )
                    .map_err(|e| VisualizationError::PlottingError(e.to_string()))?;
            }
            LayerStyle::Line => {
                for run in valid_runs(layer.series, origin) {
                    chart
                        .draw_series(LineSeries::new(run, layer.color.stroke_width(2)))
                        .map_err(|e| VisualizationError::PlottingError(e.to_string()))?;
                }
            }
        }
    }

    root.present().map_err(|e| VisualizationError::PlottingError(e.to_string()))?;
    Ok(())
}

/// Draw each series in its own panel, stacked vertically on a shared time axis.
pub fn plot_panels(output_path: &Path, panels: &[TimeSeries], colors: &[RGBColor], size: (u32, u32)) -> Result<()> {
    if panels.is_empty() {
        return Err(VisualizationError::EmptyData("no columns selected".to_string()));
    }
    let (origin, x_max, _, _) = series_bounds(panels.iter())
        .ok_or_else(|| VisualizationError::EmptyData("no valid samples in any column".to_string()))?;

    let root = BitMapBackend::new(output_path, size).into_drawing_area();
    root.fill(&WHITE).map_err(|e| VisualizationError::PlottingError(e.to_string()))?;

    for (i, (area, series)) in root.split_evenly((panels.len(), 1)).iter().zip(panels).enumerate() {
        // panels without data stay blank
        let Some((_, _, y_min, y_max)) = series_bounds(std::iter::once(series)) else {
            continue;
        };
        let color = colors.get(i % colors.len().max(1)).copied().unwrap_or(BLUE);

        let mut chart = ChartBuilder::on(area)
            .margin(10)
            .build_cartesian_2d(0.0..x_max, y_min..y_max)
            .map_err(|e| VisualizationError::PlottingError(e.to_string()))?;

        chart
            .configure_mesh()
            .disable_x_mesh()
            .disable_y_mesh()
            .draw()
            .map_err(|e| VisualizationError::PlottingError(e.to_string()))?;

        for run in valid_runs(series, origin) {
            chart
                .draw_series(LineSeries::new(run, color.stroke_width(1)))
                .map_err(|e| VisualizationError::PlottingError(e.to_string()))?;
        }
    }

    root.present().map_err(|e| VisualizationError::PlottingError(e.to_string()))?;
    Ok(())
}

/// Average adjacent time rows so at most `max_rows` remain.
pub(crate) fn downsample_rows(rows: &[Vec<Option<f64>>], max_rows: usize) -> Vec<Vec<Option<f64>>> {
    if rows.len() <= max_rows || max_rows == 0 {
        return rows.to_vec();
    }
    let width = rows.first().map_or(0, Vec::len);
    (0..max_rows)
        .map(|bucket| {
            let start = bucket * rows.len() / max_rows;
            let end = ((bucket + 1) * rows.len() / max_rows).max(start + 1);
            (0..width)
                .map(|d| {
                    let (sum, n) = rows[start..end]
                        .iter()
                        .filter_map(|row| row[d])
                        .fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
                    (n > 0).then(|| sum / n as f64)
                })
                .collect()
        })
        .collect()
}

/// Render a (time × depth) field as a heat map with a colour bar.
///
/// Time runs left to right, depth top (first sensor) to bottom. Original
/// sensor depths are marked with ticks on both sides of the map.
pub fn plot_heatmap(output_path: &Path, field: &DepthField, scale: &ColorScale, size: (u32, u32)) -> Result<()> {
    if field.values.is_empty() || field.depths.is_empty() {
        return Err(VisualizationError::EmptyData("depth field has no rows".to_string()));
    }

    let root = BitMapBackend::new(output_path, size).into_drawing_area();
    root.fill(&WHITE).map_err(|e| VisualizationError::PlottingError(e.to_string()))?;

    let (map_area, bar_area) = root.split_horizontally(size.0.saturating_sub(COLORBAR_WIDTH) as i32);
    let rows = downsample_rows(&field.values, size.0 as usize);
    let n_time = rows.len();
    let n_depth = field.depths.len();

    let mut chart = ChartBuilder::on(&map_area)
        .margin(20)
        .build_cartesian_2d(0..n_time, 0..n_depth)
        .map_err(|e| VisualizationError::PlottingError(e.to_string()))?;

    // row 0 of the axis (first sensor) at the top
    chart
        .draw_series(rows.iter().enumerate().flat_map(|(t, row)| {
            row.iter().enumerate().map(move |(d, value)| {
                let color = value.map_or(MISSING_COLOR, |v| scale.color_at(v));
                let y = n_depth - 1 - d;
                Rectangle::new([(t, y), (t + 1, y + 1)], color.filled())
            })
        }))
        .map_err(|e| VisualizationError::PlottingError(e.to_string()))?;

    let tick = (n_time / 80).max(1);
    let marks: Vec<usize> = field
        .sensor_depths
        .iter()
        .filter_map(|&d| field.nearest_depth_index(d))
        .collect();
    chart
        .draw_series(marks.iter().flat_map(|&d| {
            let y = n_depth - 1 - d;
            [
                Rectangle::new([(0, y), (tick, y + 1)], BLACK.filled()),
                Rectangle::new([(n_time - tick, y), (n_time, y + 1)], BLACK.filled()),
            ]
        }))
        .map_err(|e| VisualizationError::PlottingError(e.to_string()))?;

    let (vmin, vmax) = scale.range();
    let steps = 200usize;
    let mut bar = ChartBuilder::on(&bar_area)
        .margin(20)
        .build_cartesian_2d(0..1usize, 0..steps)
        .map_err(|e| VisualizationError::PlottingError(e.to_string()))?;
    bar.draw_series((0..steps).map(|i| {
        let v = vmin + (vmax - vmin) * (i as f64 + 0.5) / steps as f64;
        Rectangle::new([(0, i), (1, i + 1)], scale.color_at(v).filled())
    }))
    .map_err(|e| VisualizationError::PlottingError(e.to_string()))?;

    root.present().map_err(|e| VisualizationError::PlottingError(e.to_string()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use tempfile::tempdir;

    fn stops() -> Vec<ColorStop> {
        vec![
            ColorStop {
                value: 0.0,
                color: "#FFFF00".to_string(),
            },
            ColorStop {
                value: -10.0,
                color: "#0000FF".to_string(),
            },
            ColorStop {
                value: 10.0,
                color: "#FF0000".to_string(),
            },
        ]
    }

    #[test]
    fn test_parse_hex_color() {
        assert_eq!(parse_hex_color("#5deb69").unwrap(), RGBColor(0x5d, 0xeb, 0x69));
        assert_eq!(parse_hex_color("FF0000").unwrap(), RGBColor(255, 0, 0));
        assert!(parse_hex_color("#12345").is_err());
        assert!(parse_hex_color("#GG0000").is_err());
    }

    #[test]
    fn test_color_scale_interpolates_and_clamps() {
        let scale = ColorScale::from_stops(&stops(), -10.0, 10.0).unwrap();
        assert_eq!(scale.color_at(-10.0), RGBColor(0, 0, 255));
        assert_eq!(scale.color_at(0.0), RGBColor(255, 255, 0));
        assert_eq!(scale.color_at(5.0), RGBColor(255, 128, 0));
        assert_eq!(scale.color_at(-50.0), RGBColor(0, 0, 255));
        assert_eq!(scale.color_at(99.0), RGBColor(255, 0, 0));
    }

    #[test]
    fn test_downsample_rows() {
        let rows: Vec<Vec<Option<f64>>> = (0..10).map(|i| vec![Some(i as f64), None]).collect();
        let out = downsample_rows(&rows, 5);
        assert_eq!(out.len(), 5);
        assert_eq!(out[0], vec![Some(0.5), None]);
        assert_eq!(out[4], vec![Some(8.5), None]);
        assert_eq!(downsample_rows(&rows, 20).len(), 10);
    }

    #[test]
    fn test_valid_runs_break_at_missing() {
        let origin = NaiveDateTime::parse_from_str("2025-01-18 00:00:00", "%Y-%m-%d %H:%M:%S").unwrap();
        let series = TimeSeries::from_pairs(vec![
            (origin, Some(1.0)),
            (origin + Duration::hours(1), None),
            (origin + Duration::hours(2), Some(2.0)),
            (origin + Duration::hours(3), Some(3.0)),
        ]);
        let runs = valid_runs(&series, origin);
        assert_eq!(runs, vec![vec![(0.0, 1.0)], vec![(2.0, 2.0), (3.0, 3.0)]]);
    }

    #[test]
    fn test_plot_heatmap_writes_png() {
        let origin = NaiveDateTime::parse_from_str("2025-01-18 00:00:00", "%Y-%m-%d %H:%M:%S").unwrap();
        let field = DepthField {
            timestamps: (0..30).map(|m| origin + Duration::minutes(m)).collect(),
            depths: vec![0.0, -0.1, -0.2],
            sensor_depths: vec![0.0, -0.2],
            values: (0..30)
                .map(|m| vec![Some(-5.0 + m as f64 * 0.1), None, Some(0.0)])
                .collect(),
            skipped_rows: 0,
        };
        let scale = ColorScale::from_stops(&stops(), -10.0, 10.0).unwrap();
        let dir = tempdir().unwrap();
        let path = dir.path().join("heatmap.png");

        plot_heatmap(&path, &field, &scale, (320, 200)).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_empty_comparison_fails() {
        let dir = tempdir().unwrap();
        let empty = TimeSeries::new();
        let layers = [SeriesLayer {
            series: &empty,
            color: RED,
            style: LayerStyle::Line,
        }];
        assert!(matches!(
            plot_series_comparison(&dir.path().join("x.png"), &layers, (100, 100)),
            Err(VisualizationError::EmptyData(_))
        ));
    }
}
