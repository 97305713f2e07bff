//! Sliding-window statistics over series with missing values.
//!
//! Windows are counted in samples. Missing values never enter a window:
//! they are skipped when the window advances, and `min_periods` counts only
//! the valid samples present. Centered windows place the label at offset
//! `(size - 1) / 2` from the window start, so an even window leans towards
//! the past by one sample.

use crate::core::error::{ProcessingError, Result};
use crate::core::series::TimeSeries;

/// Where the output label sits relative to the window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowAlignment {
    /// Window ends at the labelled sample.
    Trailing,
    /// Window is centered on the labelled sample.
    Centered,
}

/// Size, alignment and edge behaviour of a rolling window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RollingWindow {
    pub size: usize,
    pub alignment: WindowAlignment,
    /// Minimum number of valid samples required to emit a value.
    pub min_periods: usize,
}

impl RollingWindow {
    pub fn trailing(size: usize) -> Self {
        Self {
            size,
            alignment: WindowAlignment::Trailing,
            min_periods: 1,
        }
    }

    pub fn centered(size: usize) -> Self {
        Self {
            size,
            alignment: WindowAlignment::Centered,
            min_periods: 1,
        }
    }

    pub fn aligned(size: usize, centered: bool) -> Self {
        if centered {
            Self::centered(size)
        } else {
            Self::trailing(size)
        }
    }

    pub fn with_min_periods(mut self, min_periods: usize) -> Self {
        self.min_periods = min_periods;
        self
    }

    /// Inclusive-exclusive index range covered by the window labelled `i`.
    fn bounds(&self, i: usize, len: usize) -> (usize, usize) {
        let lead = match self.alignment {
            WindowAlignment::Trailing => 0,
            WindowAlignment::Centered => (self.size - 1) / 2,
        };
        let end = (i + lead + 1).min(len);
        let start = (i + lead + 1).saturating_sub(self.size);
        (start, end)
    }
}

/// A statistic that can be maintained incrementally as a window slides.
pub trait WindowStatistic: Default {
    fn insert(&mut self, value: f64);
    fn remove(&mut self, value: f64);
    fn count(&self) -> usize;
    /// Current statistic, `None` for an empty window.
    fn value(&self) -> Option<f64>;
}

/// Running mean.
#[derive(Debug, Default)]
pub struct SlidingMean {
    sum: f64,
    count: usize,
}

impl WindowStatistic for SlidingMean {
    #[inline]
    fn insert(&mut self, value: f64) {
        self.sum += value;
        self.count += 1;
    }

    #[inline]
    fn remove(&mut self, value: f64) {
        self.sum -= value;
        self.count -= 1;
        if self.count == 0 {
            // reset accumulated rounding error
            self.sum = 0.0;
        }
    }

    #[inline]
    fn count(&self) -> usize {
        self.count
    }

    fn value(&self) -> Option<f64> {
        (self.count > 0).then(|| self.sum / self.count as f64)
    }
}

/// Running median over a sorted buffer.
///
/// Insertion and removal are binary searches plus a shift, which stays cheap
/// for the window sizes used on minute data (a few thousand samples).
#[derive(Debug, Default)]
pub struct SlidingMedian {
    sorted: Vec<f64>,
}

impl WindowStatistic for SlidingMedian {
    fn insert(&mut self, value: f64) {
        let pos = self.sorted.partition_point(|x| x.total_cmp(&value).is_lt());
        self.sorted.insert(pos, value);
    }

    fn remove(&mut self, value: f64) {
        let pos = self.sorted.partition_point(|x| x.total_cmp(&value).is_lt());
        if pos < self.sorted.len() && self.sorted[pos].total_cmp(&value).is_eq() {
            self.sorted.remove(pos);
        }
    }

    #[inline]
    fn count(&self) -> usize {
        self.sorted.len()
    }

    fn value(&self) -> Option<f64> {
        let n = self.sorted.len();
        match n {
            0 => None,
            _ if n % 2 == 1 => Some(self.sorted[n / 2]),
            _ => Some((self.sorted[n / 2 - 1] + self.sorted[n / 2]) / 2.0),
        }
    }
}

/// Apply a sliding statistic to a value vector.
///
/// The output has the same length as the input. A position yields `None`
/// when its window holds fewer than `min_periods` valid samples (at least
/// one is always required).
pub fn rolling<S: WindowStatistic>(values: &[Option<f64>], window: RollingWindow) -> Result<Vec<Option<f64>>> {
    if window.size == 0 {
        return Err(ProcessingError::InvalidInput(
            "rolling window size must be at least 1".to_string(),
        ));
    }

    let len = values.len();
    let min_periods = window.min_periods.max(1);
    let mut stat = S::default();
    let mut out = Vec::with_capacity(len);
    let (mut lo, mut hi) = (0usize, 0usize);

    for i in 0..len {
        let (start, end) = window.bounds(i, len);
        while hi < end {
            if let Some(v) = values[hi] {
                stat.insert(v);
            }
            hi += 1;
        }
        while lo < start {
            if let Some(v) = values[lo] {
                stat.remove(v);
            }
            lo += 1;
        }
        out.push(if stat.count() >= min_periods {
            stat.value()
        } else {
            None
        });
    }

    Ok(out)
}

pub fn rolling_median(values: &[Option<f64>], window: RollingWindow) -> Result<Vec<Option<f64>>> {
    rolling::<SlidingMedian>(values, window)
}

pub fn rolling_mean(values: &[Option<f64>], window: RollingWindow) -> Result<Vec<Option<f64>>> {
    rolling::<SlidingMean>(values, window)
}

/// Rolling statistic of a series, keeping its timestamps.
pub fn rolling_series<S: WindowStatistic>(series: &TimeSeries, window: RollingWindow) -> Result<TimeSeries> {
    Ok(TimeSeries::from_parts(
        series.timestamps.clone(),
        rolling::<S>(&series.values, window)?,
    ))
}
