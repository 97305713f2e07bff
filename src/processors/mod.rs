//! Data processing modules.

pub mod batch;
pub mod continuity;
pub mod denoise;
pub mod gapfill;
pub mod ice;
pub mod profile;
pub mod resample;
pub mod rolling;

// Re-export key types for convenience
pub use batch::{
    daily_average_directory, fill_directory, merge_directory, merge_files, scan_directory, BatchError,
    FileSelector, RunReport,
};
pub use continuity::{check_continuity, ContinuityReport, Gap, GapKind};
pub use denoise::{
    clip_to_range, daily_denoised_means, median_cascade, reject_outliers, BaselineKind, DailyDenoiseReport,
    RejectionOutcome,
};
pub use gapfill::{fill_gaps, fill_table_gaps, interpolate_missing, reindex_to_grid, BoundaryPolicy, FillOutcome};
pub use ice::add_thickness_columns;
pub use profile::{interpolate_profile, BSpline, DepthField, DepthProfile, SplineOrder};
pub use resample::{daily_means, minute_means, resample_table, BucketMode};
pub use rolling::{rolling_mean, rolling_median, RollingWindow, WindowAlignment};
