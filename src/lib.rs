//! Processing pipeline for lake ice and temperature-chain logger data.
//!
//! This crate provides tools for:
//! - Loading minute-level sensor exports and checking their time continuity
//! - Median denoising and rolling-baseline outlier rejection
//! - Gap filling, resampling and daily aggregation
//! - Ice thickness accumulation and depth-profile heat maps
//!
//! # Example
//!
//! ```no_run
//! use lake_sensor_pipeline::{core::load_table, processors::check_continuity};
//!
//! let table = load_table("logger.csv", None).unwrap();
//! let report = check_continuity(&table.timestamps, 1).unwrap();
//! println!("{}", report.render_text());
//! ```

pub mod cli;
pub mod config;
pub mod core;
pub mod processors;
pub mod visualization;

pub use config::{PipelineConfig, ProfileConfig, RejectionConfig};
pub use core::{Table, TimeSeries};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
