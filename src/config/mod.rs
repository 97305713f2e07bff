//! Configuration types for the sensor pipeline.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::core::writers::CsvFormat;
use crate::processors::denoise::BaselineKind;
use crate::processors::gapfill::BoundaryPolicy;
use crate::processors::profile::SplineOrder;

/// A column addressed by header name or zero-based position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ColumnRef {
    Index(usize),
    Name(String),
}

impl fmt::Display for ColumnRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnRef::Index(i) => write!(f, "#{}", i),
            ColumnRef::Name(name) => write!(f, "{}", name),
        }
    }
}

impl Default for ColumnRef {
    fn default() -> Self {
        ColumnRef::Index(0)
    }
}

/// Default input and output locations; CLI arguments take precedence.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IoConfig {
    #[serde(default)]
    pub input: Option<PathBuf>,

    #[serde(default)]
    pub output: Option<PathBuf>,
}

/// Column mapping for input files.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InputConfig {
    /// Timestamp column (name or index)
    #[serde(default)]
    pub time_column: ColumnRef,

    /// Measurement columns to keep; empty keeps every non-time column
    #[serde(default)]
    pub value_columns: Vec<String>,

    /// Header renames applied after loading
    #[serde(default)]
    pub rename: BTreeMap<String, String>,

    /// Explicit chrono format for the timestamp column
    #[serde(default)]
    pub time_format: Option<String>,

    /// Workbook sheets read and concatenated in order; empty reads the
    /// first sheet
    #[serde(default)]
    pub sheets: Vec<String>,
}

/// Formatting of written tables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    #[serde(default = "default_time_format")]
    pub time_format: String,

    #[serde(default = "default_date_format")]
    pub date_format: String,

    /// Fixed decimals for values; shortest exact form when absent
    #[serde(default)]
    pub precision: Option<usize>,
}

fn default_time_format() -> String {
    "%Y/%m/%d %H:%M:%S".to_string()
}

fn default_date_format() -> String {
    "%Y-%m-%d".to_string()
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            time_format: default_time_format(),
            date_format: default_date_format(),
            precision: None,
        }
    }
}

impl OutputConfig {
    /// CSV format for minute-resolution tables.
    pub fn csv_format(&self) -> CsvFormat<'_> {
        CsvFormat {
            time_format: &self.time_format,
            precision: self.precision,
        }
    }

    /// CSV format for per-day tables.
    pub fn daily_csv_format(&self) -> CsvFormat<'_> {
        CsvFormat {
            time_format: &self.date_format,
            precision: self.precision,
        }
    }
}

/// Grid used for continuity checks and gap filling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContinuityConfig {
    #[serde(default = "default_cadence_minutes")]
    pub cadence_minutes: i64,
}

fn default_cadence_minutes() -> i64 {
    1
}

impl Default for ContinuityConfig {
    fn default() -> Self {
        Self {
            cadence_minutes: default_cadence_minutes(),
        }
    }
}

/// Two-stage median cascade used for the daily ice-thickness summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DenoiseConfig {
    /// Long median window in samples (suppresses multi-hour excursions)
    #[serde(default = "default_median_window_global")]
    pub median_window_global: usize,

    /// Short median window in samples (point noise)
    #[serde(default = "default_median_window_local")]
    pub median_window_local: usize,

    /// Final rolling-mean window in samples
    #[serde(default = "default_smooth_window")]
    pub smooth_window: usize,

    /// Days with fewer valid samples are skipped
    #[serde(default = "default_min_daily_samples")]
    pub min_daily_samples: usize,

    #[serde(default = "default_round_decimals")]
    pub round_decimals: u32,
}

fn default_median_window_global() -> usize {
    61
}

fn default_median_window_local() -> usize {
    3
}

fn default_smooth_window() -> usize {
    5
}

fn default_min_daily_samples() -> usize {
    10
}

fn default_round_decimals() -> u32 {
    3
}

impl Default for DenoiseConfig {
    fn default() -> Self {
        Self {
            median_window_global: default_median_window_global(),
            median_window_local: default_median_window_local(),
            smooth_window: default_smooth_window(),
            min_daily_samples: default_min_daily_samples(),
            round_decimals: default_round_decimals(),
        }
    }
}

/// Baseline-tolerance outlier rejection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RejectionConfig {
    /// Relative half-width of the tolerance band (0.1 = ±10%)
    #[serde(default = "default_threshold")]
    pub threshold: f64,

    /// Rolling baseline window in samples
    #[serde(default = "default_rejection_window")]
    pub window: usize,

    #[serde(default)]
    pub baseline: BaselineKind,

    /// Center the rolling baseline instead of trailing it
    #[serde(default)]
    pub centered: bool,

    #[serde(default = "default_min_periods")]
    pub min_periods: usize,

    /// Rolling-mean window applied to the cleaned, filled series
    #[serde(default = "default_rejection_smooth_window")]
    pub smooth_window: usize,
}

fn default_threshold() -> f64 {
    0.1
}

fn default_rejection_window() -> usize {
    4800
}

fn default_min_periods() -> usize {
    1
}

fn default_rejection_smooth_window() -> usize {
    120
}

impl Default for RejectionConfig {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
            window: default_rejection_window(),
            baseline: BaselineKind::default(),
            centered: false,
            min_periods: default_min_periods(),
            smooth_window: default_rejection_smooth_window(),
        }
    }
}

/// Gap filling behaviour.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GapFillConfig {
    #[serde(default)]
    pub boundary: BoundaryPolicy,
}

/// Physically plausible bounds; samples outside become missing.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PhysicalRange {
    pub min: f64,
    pub max: f64,
}

/// Inclusive time window applied before plotting or export.
///
/// Bounds accept any logger timestamp form or a bare date; a bare `end`
/// date includes that whole day.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DateRange {
    #[serde(
        default,
        deserialize_with = "range_bound::deserialize_start",
        serialize_with = "range_bound::serialize"
    )]
    pub start: Option<NaiveDateTime>,

    #[serde(
        default,
        deserialize_with = "range_bound::deserialize_end",
        serialize_with = "range_bound::serialize"
    )]
    pub end: Option<NaiveDateTime>,
}

mod range_bound {
    use chrono::NaiveDateTime;
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};

    use crate::core::time::{parse_range_end, parse_timestamp};

    const FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

    fn parse_with<'de, D>(
        deserializer: D,
        parse: fn(&str) -> Option<NaiveDateTime>,
    ) -> Result<Option<NaiveDateTime>, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Option::<String>::deserialize(deserializer)? {
            None => Ok(None),
            Some(raw) => parse(&raw).map(Some).ok_or_else(|| {
                D::Error::custom(format!(
                    "invalid date '{}' (expected e.g. 2025-01-20 or 2025-01-20 12:00:00)",
                    raw
                ))
            }),
        }
    }

    pub fn deserialize_start<'de, D>(deserializer: D) -> Result<Option<NaiveDateTime>, D::Error>
    where
        D: Deserializer<'de>,
    {
        parse_with(deserializer, |raw| parse_timestamp(raw, None))
    }

    pub fn deserialize_end<'de, D>(deserializer: D) -> Result<Option<NaiveDateTime>, D::Error>
    where
        D: Deserializer<'de>,
    {
        parse_with(deserializer, parse_range_end)
    }

    pub fn serialize<S>(value: &Option<NaiveDateTime>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(ts) => serializer.serialize_some(&ts.format(FORMAT).to_string()),
            None => serializer.serialize_none(),
        }
    }
}

/// One stop of a heat-map colour scale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColorStop {
    pub value: f64,
    /// Hex colour, e.g. "#00FFFF"
    pub color: String,
}

/// Temperature-chain depth profile and heat-map settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileConfig {
    /// Sensor depths in metres (negative below the surface)
    #[serde(default = "default_depths")]
    pub depths: Vec<f64>,

    /// Sensor column for each depth, same order as `depths`
    #[serde(default = "default_profile_columns")]
    pub columns: Vec<String>,

    /// Step of the dense depth axis in metres
    #[serde(default = "default_depth_step")]
    pub step: f64,

    /// Spline order; chosen from the sensor count when absent
    #[serde(default)]
    pub order: Option<SplineOrder>,

    #[serde(default = "default_vmin")]
    pub vmin: f64,

    #[serde(default = "default_vmax")]
    pub vmax: f64,

    #[serde(default = "default_color_stops")]
    pub color_stops: Vec<ColorStop>,
}

fn default_depths() -> Vec<f64> {
    vec![0.0, -0.2, -0.4, -0.6, -0.8]
}

fn default_profile_columns() -> Vec<String> {
    ["temp_0cm", "temp_20cm", "temp_40cm", "temp_60cm", "temp_80cm"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_depth_step() -> f64 {
    0.01
}

fn default_vmin() -> f64 {
    -18.0
}

fn default_vmax() -> f64 {
    6.0
}

fn default_color_stops() -> Vec<ColorStop> {
    [
        (-18.0, "#0000FF"), // deep blue
        (-11.0, "#00FFFF"), // cyan
        (-4.0, "#5DEB69"),  // green
        (0.0, "#FFFF00"),   // yellow
        (2.25, "#FD6A0F"),  // orange
        (6.0, "#FF0000"),   // red
    ]
    .iter()
    .map(|&(value, color)| ColorStop {
        value,
        color: color.to_string(),
    })
    .collect()
}

impl Default for ProfileConfig {
    fn default() -> Self {
        Self {
            depths: default_depths(),
            columns: default_profile_columns(),
            step: default_depth_step(),
            order: None,
            vmin: default_vmin(),
            vmax: default_vmax(),
            color_stops: default_color_stops(),
        }
    }
}

/// Ice thickness accumulation from altimeter readings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IceConfig {
    #[serde(default = "default_altimeter_column")]
    pub altimeter_column: String,

    /// Thickness on the first day, in metres
    #[serde(default = "default_initial_thickness")]
    pub initial_thickness_m: f64,
}

fn default_altimeter_column() -> String {
    "altimeter".to_string()
}

fn default_initial_thickness() -> f64 {
    0.62
}

impl Default for IceConfig {
    fn default() -> Self {
        Self {
            altimeter_column: default_altimeter_column(),
            initial_thickness_m: default_initial_thickness(),
        }
    }
}

/// Directory scanning and batch output naming.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    /// File extension to match (case-insensitive)
    #[serde(default = "default_extension")]
    pub extension: String,

    /// Only files whose name contains this text
    #[serde(default)]
    pub name_contains: Option<String>,

    /// Only files whose name matches this regex
    #[serde(default)]
    pub name_pattern: Option<String>,

    /// Files starting with this prefix are skipped (editor lock files)
    #[serde(default = "default_exclude_prefix")]
    pub exclude_prefix: String,

    /// Appended to the stem of gap-filled outputs
    #[serde(default = "default_filled_suffix")]
    pub filled_suffix: String,

    /// Name marker of per-minute files in the daily-average batch
    #[serde(default = "default_per_minute_marker")]
    pub per_minute_marker: String,

    /// Replacement marker for the daily outputs
    #[serde(default = "default_daily_marker")]
    pub daily_marker: String,

    /// Columns extracted by the merge; empty keeps all
    #[serde(default)]
    pub merge_columns: Vec<String>,
}

fn default_extension() -> String {
    "csv".to_string()
}

fn default_exclude_prefix() -> String {
    "~$".to_string()
}

fn default_filled_suffix() -> String {
    "_filled".to_string()
}

fn default_per_minute_marker() -> String {
    "(per-minute)".to_string()
}

fn default_daily_marker() -> String {
    "(daily)".to_string()
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            extension: default_extension(),
            name_contains: None,
            name_pattern: None,
            exclude_prefix: default_exclude_prefix(),
            filled_suffix: default_filled_suffix(),
            per_minute_marker: default_per_minute_marker(),
            daily_marker: default_daily_marker(),
            merge_columns: Vec::new(),
        }
    }
}

/// Rendered image settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlotConfig {
    #[serde(default = "default_width")]
    pub width: u32,

    #[serde(default = "default_height")]
    pub height: u32,

    /// Line colours cycled across panels
    #[serde(default = "default_line_colors")]
    pub line_colors: Vec<String>,
}

fn default_width() -> u32 {
    1920
}

fn default_height() -> u32 {
    1080
}

fn default_line_colors() -> Vec<String> {
    vec!["#E63946".to_string(), "#1D3557".to_string()]
}

impl Default for PlotConfig {
    fn default() -> Self {
        Self {
            width: default_width(),
            height: default_height(),
            line_colors: default_line_colors(),
        }
    }
}

/// Main pipeline configuration combining all sub-configs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub io: IoConfig,

    #[serde(default)]
    pub input: InputConfig,

    #[serde(default)]
    pub output: OutputConfig,

    #[serde(default)]
    pub continuity: ContinuityConfig,

    #[serde(default)]
    pub denoise: DenoiseConfig,

    #[serde(default)]
    pub rejection: RejectionConfig,

    #[serde(default)]
    pub gap_fill: GapFillConfig,

    #[serde(default)]
    pub physical_range: Option<PhysicalRange>,

    #[serde(default)]
    pub date_range: DateRange,

    #[serde(default)]
    pub profile: ProfileConfig,

    #[serde(default)]
    pub ice: IceConfig,

    #[serde(default)]
    pub batch: BatchConfig,

    #[serde(default)]
    pub plot: PlotConfig,
}

impl PipelineConfig {
    /// Load configuration from a YAML file.
    pub fn from_yaml<P: AsRef<Path>>(path: P) -> Result<Self, Box<dyn std::error::Error>> {
        let content = std::fs::read_to_string(path)?;
        let config: PipelineConfig = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a YAML file.
    pub fn to_yaml<P: AsRef<Path>>(&self, path: P) -> Result<(), Box<dyn std::error::Error>> {
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}
