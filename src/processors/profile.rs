//! Depth-axis spline interpolation for temperature chains.
//!
//! Each row of a temperature-chain table holds one reading per sensor depth.
//! An interpolating B-spline is fitted through the readings of every row and
//! evaluated on a dense depth axis, producing a (time × depth) field for heat
//! maps. The field is an approximation for display only.
//!
//! Knot placement follows the usual interpolation conventions: not-a-knot for
//! odd degrees, interval midpoints for the quadratic case. Outside the sensor
//! range the end polynomial pieces are extended (extrapolation, not clamping).

use chrono::NaiveDateTime;
use log::debug;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::config::ProfileConfig;
use crate::core::error::{ProcessingError, Result};
use crate::core::table::{Column, Table};

/// Polynomial degree of the interpolating spline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SplineOrder {
    Linear,
    Quadratic,
    Cubic,
}

impl SplineOrder {
    pub fn degree(self) -> usize {
        match self {
            SplineOrder::Linear => 1,
            SplineOrder::Quadratic => 2,
            SplineOrder::Cubic => 3,
        }
    }

    /// Minimum number of distinct points needed for a fit.
    pub fn required_points(self) -> usize {
        self.degree() + 1
    }

    /// Highest order supported by `n` points: cubic from four points on.
    pub fn preferred_for(n: usize) -> Option<Self> {
        match n {
            0 | 1 => None,
            2 => Some(SplineOrder::Linear),
            3 => Some(SplineOrder::Quadratic),
            _ => Some(SplineOrder::Cubic),
        }
    }
}

/// An interpolating B-spline of fixed degree.
#[derive(Debug, Clone, PartialEq)]
pub struct BSpline {
    knots: Vec<f64>,
    coefficients: Vec<f64>,
    degree: usize,
}

impl BSpline {
    /// Fit a spline passing through every `(x, y)` point.
    ///
    /// `x` must be strictly increasing.
    ///
    /// # Errors
    ///
    /// `InsufficientData` with fewer than `degree + 1` points, `InvalidInput`
    /// when the inputs disagree in length or `x` is not strictly increasing.
    pub fn interpolate(x: &[f64], y: &[f64], order: SplineOrder) -> Result<Self> {
        let k = order.degree();
        if x.len() != y.len() {
            return Err(ProcessingError::InvalidInput(format!(
                "{} abscissae but {} values",
                x.len(),
                y.len()
            )));
        }
        if x.len() < order.required_points() {
            return Err(ProcessingError::InsufficientData {
                operation: format!("{:?} spline", order).to_lowercase(),
                required: order.required_points(),
                available: x.len(),
            });
        }
        if x.windows(2).any(|w| !(w[0] < w[1])) {
            return Err(ProcessingError::InvalidInput(
                "spline abscissae must be strictly increasing".to_string(),
            ));
        }

        let knots = interpolation_knots(x, k);
        let n = x.len();

        // collocation matrix: row i holds B_j(x_i)
        let mut matrix = vec![vec![0.0; n]; n];
        for (row, &xi) in matrix.iter_mut().zip(x) {
            let span = find_span(&knots, k, n, xi);
            let basis = basis_functions(&knots, k, span, xi);
            for (r, b) in basis.into_iter().enumerate() {
                row[span - k + r] = b;
            }
        }

        let coefficients = solve_linear(matrix, y.to_vec())?;
        Ok(Self {
            knots,
            coefficients,
            degree: k,
        })
    }

    /// Value of the spline at `x`, extrapolating beyond the fitted range.
    pub fn evaluate(&self, x: f64) -> f64 {
        let k = self.degree;
        let n = self.coefficients.len();
        let span = find_span(&self.knots, k, n, x);
        basis_functions(&self.knots, k, span, x)
            .into_iter()
            .enumerate()
            .map(|(r, b)| b * self.coefficients[span - k + r])
            .sum()
    }

    pub fn degree(&self) -> usize {
        self.degree
    }
}

/// Knot vector for interpolation at the sites `x` with degree `k`.
fn interpolation_knots(x: &[f64], k: usize) -> Vec<f64> {
    let n = x.len();
    let (first, last) = (x[0], x[n - 1]);
    let interior: Vec<f64> = if k == 2 {
        // midpoints, dropping the first and last
        x.windows(2)
            .map(|w| (w[0] + w[1]) / 2.0)
            .skip(1)
            .take(n.saturating_sub(3))
            .collect()
    } else {
        // not-a-knot
        let m = (k - 1) / 2;
        x[m + 1..n - m - 1].to_vec()
    };

    let mut knots = Vec::with_capacity(n + k + 1);
    knots.extend(std::iter::repeat(first).take(k + 1));
    knots.extend(interior);
    knots.extend(std::iter::repeat(last).take(k + 1));
    knots
}

/// Knot interval used for `x`, clamped to the valid polynomial pieces.
#[inline]
fn find_span(knots: &[f64], k: usize, n: usize, x: f64) -> usize {
    knots
        .partition_point(|&t| t <= x)
        .saturating_sub(1)
        .clamp(k, n - 1)
}

/// The `k + 1` non-zero basis functions on `span` evaluated at `x`.
fn basis_functions(knots: &[f64], k: usize, span: usize, x: f64) -> Vec<f64> {
    let mut values = vec![0.0; k + 1];
    let mut left = vec![0.0; k + 1];
    let mut right = vec![0.0; k + 1];
    values[0] = 1.0;

    for j in 1..=k {
        left[j] = x - knots[span + 1 - j];
        right[j] = knots[span + j] - x;
        let mut saved = 0.0;
        for r in 0..j {
            let temp = values[r] / (right[r + 1] + left[j - r]);
            values[r] = saved + right[r + 1] * temp;
            saved = left[j - r] * temp;
        }
        values[j] = saved;
    }
    values
}

/// Gaussian elimination with partial pivoting.
fn solve_linear(mut a: Vec<Vec<f64>>, mut b: Vec<f64>) -> Result<Vec<f64>> {
    let n = b.len();
    for col in 0..n {
        let pivot = (col..n)
            .max_by(|&i, &j| a[i][col].abs().total_cmp(&a[j][col].abs()))
            .unwrap_or(col);
        if a[pivot][col].abs() < 1e-300 {
            return Err(ProcessingError::InvalidInput(
                "singular collocation matrix".to_string(),
            ));
        }
        a.swap(col, pivot);
        b.swap(col, pivot);

        for row in col + 1..n {
            let factor = a[row][col] / a[col][col];
            if factor == 0.0 {
                continue;
            }
            for c in col..n {
                a[row][c] -= factor * a[col][c];
            }
            b[row] -= factor * b[col];
        }
    }

    let mut x = vec![0.0; n];
    for row in (0..n).rev() {
        let tail: f64 = (row + 1..n).map(|c| a[row][c] * x[c]).sum();
        x[row] = (b[row] - tail) / a[row][row];
    }
    Ok(x)
}

/// Fixed sensor depths paired with their table columns.
#[derive(Debug, Clone, PartialEq)]
pub struct DepthProfile {
    /// Depths in metres, monotonic in either direction.
    pub depths: Vec<f64>,
    pub columns: Vec<String>,
}

impl DepthProfile {
    pub fn new(depths: Vec<f64>, columns: Vec<String>) -> Result<Self> {
        if depths.len() != columns.len() {
            return Err(ProcessingError::InvalidInput(format!(
                "{} depths but {} sensor columns",
                depths.len(),
                columns.len()
            )));
        }
        if depths.is_empty() {
            return Err(ProcessingError::InvalidInput("depth profile has no sensors".to_string()));
        }
        let increasing = depths.windows(2).all(|w| w[0] < w[1]);
        let decreasing = depths.windows(2).all(|w| w[0] > w[1]);
        if !increasing && !decreasing {
            return Err(ProcessingError::InvalidInput(
                "sensor depths must be strictly monotonic".to_string(),
            ));
        }
        Ok(Self { depths, columns })
    }

    pub fn from_config(config: &ProfileConfig) -> Result<Self> {
        Self::new(config.depths.clone(), config.columns.clone())
    }

    pub fn len(&self) -> usize {
        self.depths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.depths.is_empty()
    }
}

/// Evenly spaced depths from `first` to `last` inclusive.
///
/// The axis runs in the direction of `last`, so a profile listed from the
/// surface downward yields an axis from the surface downward.
pub fn depth_axis(first: f64, last: f64, step: f64) -> Result<Vec<f64>> {
    if !(step > 0.0) {
        return Err(ProcessingError::InvalidInput(format!(
            "depth step must be positive, got {}",
            step
        )));
    }
    let count = ((last - first).abs() / step).round() as usize + 1;
    let sign = if last < first { -1.0 } else { 1.0 };
    Ok((0..count).map(|i| first + sign * step * i as f64).collect())
}

/// Interpolated (time × depth) field.
#[derive(Debug, Clone, PartialEq)]
pub struct DepthField {
    pub timestamps: Vec<NaiveDateTime>,
    /// Dense depth axis.
    pub depths: Vec<f64>,
    /// Original sensor depths.
    pub sensor_depths: Vec<f64>,
    /// One row per timestamp, one value per axis depth.
    pub values: Vec<Vec<Option<f64>>>,
    /// Rows left missing for lack of valid readings.
    pub skipped_rows: usize,
}

impl DepthField {
    /// Axis index closest to `depth`.
    pub fn nearest_depth_index(&self, depth: f64) -> Option<usize> {
        self.depths
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| (*a - depth).abs().total_cmp(&(*b - depth).abs()))
            .map(|(i, _)| i)
    }

    /// Finite values in the field as `(min, max)`.
    pub fn value_range(&self) -> Option<(f64, f64)> {
        self.values
            .iter()
            .flatten()
            .flatten()
            .fold(None, |acc, &v| match acc {
                None => Some((v, v)),
                Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
            })
    }

    /// Field as a wide table with one `<depth>cm` column per axis depth.
    pub fn to_table(&self, time_column: &str) -> Table {
        let columns = self
            .depths
            .iter()
            .enumerate()
            .map(|(d, depth)| {
                Column::new(
                    format!("{:.0}cm", depth.abs() * 100.0),
                    self.values.iter().map(|row| row[d]).collect(),
                )
            })
            .collect();
        Table {
            time_column: time_column.to_string(),
            timestamps: self.timestamps.clone(),
            columns,
        }
    }
}

/// Fit one spline per row of `table` and sample it along the depth axis.
///
/// The order defaults to [`SplineOrder::preferred_for`] the sensor count. A
/// profile with fewer sensors than the order needs is rejected; a row with
/// too few valid readings becomes a missing row and is counted in
/// `skipped_rows`.
pub fn interpolate_profile(
    table: &Table,
    profile: &DepthProfile,
    step: f64,
    order: Option<SplineOrder>,
) -> Result<DepthField> {
    let order = match order.or_else(|| SplineOrder::preferred_for(profile.len())) {
        Some(order) => order,
        None => {
            return Err(ProcessingError::InsufficientData {
                operation: "depth profile interpolation".to_string(),
                required: 2,
                available: profile.len(),
            })
        }
    };
    if profile.len() < order.required_points() {
        return Err(ProcessingError::InsufficientData {
            operation: format!("{:?} depth profile", order).to_lowercase(),
            required: order.required_points(),
            available: profile.len(),
        });
    }

    let sensor_columns = profile
        .columns
        .iter()
        .map(|name| {
            table.column(name).ok_or_else(|| ProcessingError::SchemaMismatch {
                column: name.clone(),
                available: table.column_names(),
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let first = profile.depths[0];
    let last = profile.depths[profile.len() - 1];
    let axis = depth_axis(first, last, step)?;

    // fit in ascending depth order
    let mut sensor_order: Vec<usize> = (0..profile.len()).collect();
    sensor_order.sort_by(|&a, &b| profile.depths[a].total_cmp(&profile.depths[b]));

    let rows: Vec<Option<Vec<Option<f64>>>> = (0..table.num_rows())
        .into_par_iter()
        .map(|row| {
            let (xs, ys): (Vec<f64>, Vec<f64>) = sensor_order
                .iter()
                .filter_map(|&s| sensor_columns[s].values[row].map(|v| (profile.depths[s], v)))
                .unzip();
            BSpline::interpolate(&xs, &ys, order)
                .ok()
                .map(|spline| axis.iter().map(|&d| Some(spline.evaluate(d))).collect())
        })
        .collect();

    let skipped_rows = rows.iter().filter(|r| r.is_none()).count();
    if skipped_rows > 0 {
        debug!(
            "{} of {} profile rows lack {} valid readings",
            skipped_rows,
            rows.len(),
            order.required_points()
        );
    }

    let values = rows
        .into_iter()
        .map(|r| r.unwrap_or_else(|| vec![None; axis.len()]))
        .collect();

    Ok(DepthField {
        timestamps: table.timestamps.clone(),
        depths: axis,
        sensor_depths: profile.depths.clone(),
        values,
        skipped_rows,
    })
}
