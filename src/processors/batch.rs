//! Directory-driven batch jobs: gap filling, daily averages and merging.
//!
//! File lists are always sorted by name, so outputs do not depend on the
//! platform's directory iteration order. Each file gets its own outcome in a
//! [`RunReport`]; a failing file is logged and skipped without stopping the
//! batch.

use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::{info, warn};
use rayon::prelude::*;
use regex::Regex;
use thiserror::Error;

use crate::config::{BatchConfig, InputConfig, PipelineConfig};
use crate::core::loaders::load_table;
use crate::core::table::Table;
use crate::core::writers::{write_table_csv, write_text_report};
use super::gapfill::fill_table_gaps;
use super::resample::daily_means;

/// Name of the plain-text log written next to batch outputs.
pub const PROCESSING_LOG: &str = "processing_log.txt";

/// Errors that can occur while selecting batch inputs.
#[derive(Debug, Error)]
pub enum BatchError {
    #[error("Directory not found: {0}")]
    DirectoryNotFound(PathBuf),

    #[error("Invalid file name pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("Failed to list directory: {0}")]
    Io(#[from] std::io::Error),
}

/// Filename filter for directory scans.
#[derive(Debug, Clone)]
pub struct FileSelector {
    extension: String,
    name_contains: Option<String>,
    pattern: Option<Regex>,
    exclude_prefix: String,
}

impl FileSelector {
    pub fn from_config(config: &BatchConfig) -> std::result::Result<Self, BatchError> {
        let pattern = config
            .name_pattern
            .as_deref()
            .map(|p| {
                Regex::new(p).map_err(|source| BatchError::InvalidPattern {
                    pattern: p.to_string(),
                    source,
                })
            })
            .transpose()?;
        Ok(Self {
            extension: config.extension.trim_start_matches('.').to_string(),
            name_contains: config.name_contains.clone(),
            pattern,
            exclude_prefix: config.exclude_prefix.clone(),
        })
    }

    /// Additionally require `marker` in the file name.
    pub fn containing(mut self, marker: &str) -> Self {
        self.name_contains = Some(marker.to_string());
        self
    }

    pub fn matches(&self, path: &Path) -> bool {
        let name = match path.file_name().and_then(|n| n.to_str()) {
            Some(name) => name,
            None => return false,
        };
        let extension_ok = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case(self.extension.as_str()))
            .unwrap_or(false);

        extension_ok
            && (self.exclude_prefix.is_empty() || !name.starts_with(&self.exclude_prefix))
            && self.name_contains.as_deref().map_or(true, |m| name.contains(m))
            && self.pattern.as_ref().map_or(true, |re| re.is_match(name))
    }
}

/// Files in `dir` accepted by `selector`, sorted by path.
pub fn scan_directory(dir: &Path, selector: &FileSelector) -> std::result::Result<Vec<PathBuf>, BatchError> {
    if !dir.is_dir() {
        return Err(BatchError::DirectoryNotFound(dir.to_path_buf()));
    }

    let mut files: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && selector.matches(path))
        .collect();

    files.sort();
    Ok(files)
}

/// Result of processing one file.
#[derive(Debug, Clone, PartialEq)]
pub enum FileStatus {
    /// Detail lines for the log.
    Succeeded(Vec<String>),
    Failed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct FileOutcome {
    pub path: PathBuf,
    pub output: Option<PathBuf>,
    pub status: FileStatus,
}

impl FileOutcome {
    fn from_result(path: &Path, result: Result<(Option<PathBuf>, Vec<String>)>) -> Self {
        match result {
            Ok((output, details)) => Self {
                path: path.to_path_buf(),
                output,
                status: FileStatus::Succeeded(details),
            },
            Err(e) => {
                warn!("Skipping {}: {:#}", display_name(path), e);
                Self {
                    path: path.to_path_buf(),
                    output: None,
                    status: FileStatus::Failed(format!("{:#}", e)),
                }
            }
        }
    }

    pub fn succeeded(&self) -> bool {
        matches!(self.status, FileStatus::Succeeded(_))
    }
}

/// Per-file outcomes of a batch run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub title: String,
    pub input_dir: Option<PathBuf>,
    pub output: Option<PathBuf>,
    pub outcomes: Vec<FileOutcome>,
}

impl RunReport {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            input_dir: None,
            output: None,
            outcomes: Vec::new(),
        }
    }

    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.succeeded()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.succeeded()
    }

    /// Plain-text log listing every file.
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "====== {} ======", self.title);
        if let Some(dir) = &self.input_dir {
            let _ = writeln!(out, "Input: {}", dir.display());
        }
        if let Some(output) = &self.output {
            let _ = writeln!(out, "Output: {}", output.display());
        }
        let _ = writeln!(out, "Files found: {}", self.outcomes.len());
        let _ = writeln!(out, "{}", "=".repeat(30));

        for outcome in &self.outcomes {
            let _ = writeln!(out);
            let _ = writeln!(out, "File: {}", display_name(&outcome.path));
            match &outcome.status {
                FileStatus::Succeeded(details) => {
                    let _ = writeln!(out, "OK");
                    for line in details {
                        let _ = writeln!(out, "  {}", line);
                    }
                    if let Some(path) = &outcome.output {
                        let _ = writeln!(out, "  Saved: {}", path.display());
                    }
                }
                FileStatus::Failed(reason) => {
                    let _ = writeln!(out, "FAILED: {}", reason);
                }
            }
        }

        let _ = writeln!(out);
        let _ = writeln!(
            out,
            "Processed: {}, succeeded: {}, failed: {}",
            self.outcomes.len(),
            self.succeeded(),
            self.failed()
        );
        out
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Gap-fill every selected file of `input_dir` into `output_dir`.
///
/// Outputs are named `<stem><filled_suffix>.csv`; a processing log is
/// written to `output_dir` as well.
pub fn fill_directory(input_dir: &Path, output_dir: &Path, config: &PipelineConfig) -> Result<RunReport> {
    let selector = FileSelector::from_config(&config.batch)?;
    let files = scan_directory(input_dir, &selector)?;
    info!("Found {} file(s) to fill in {}", files.len(), input_dir.display());

    let format = config.output.csv_format();
    let outcomes: Vec<FileOutcome> = files
        .par_iter()
        .map(|path| {
            let result = (|| -> Result<(Option<PathBuf>, Vec<String>)> {
                let table = load_table(path, Some(&config.input))?;
                let filled = fill_table_gaps(&table, config.continuity.cadence_minutes, config.gap_fill.boundary)
                    .with_context(|| format!("filling {}", display_name(path)))?;

                let output = output_dir.join(format!("{}{}.csv", file_stem(path), config.batch.filled_suffix));
                write_table_csv(&output, &filled.table, &format)?;

                let fmt = "%Y-%m-%d %H:%M:%S";
                let mut details = Vec::with_capacity(4);
                if let (Some(start), Some(end)) = (filled.start(), filled.end()) {
                    details.push(format!("Time range: {} to {}", start.format(fmt), end.format(fmt)));
                }
                details.push(format!("Original rows: {}", filled.original_rows));
                details.push(format!("Filled rows: {}", filled.table.num_rows()));
                details.push(format!("Inserted points: {}", filled.inserted));
                Ok((Some(output), details))
            })();
            FileOutcome::from_result(path, result)
        })
        .collect();

    let report = RunReport {
        title: "Gap filling".to_string(),
        input_dir: Some(input_dir.to_path_buf()),
        output: Some(output_dir.to_path_buf()),
        outcomes,
    };
    write_text_report(&output_dir.join(PROCESSING_LOG), &report.render_text())?;
    Ok(report)
}

/// Daily means of every per-minute file of `input_dir`.
///
/// Only files whose name carries the per-minute marker are taken; outputs
/// replace that marker with the daily marker and are written as CSV next to
/// a processing log.
pub fn daily_average_directory(input_dir: &Path, output_dir: &Path, config: &PipelineConfig) -> Result<RunReport> {
    let selector = FileSelector::from_config(&config.batch)?.containing(&config.batch.per_minute_marker);
    let files = scan_directory(input_dir, &selector)?;
    info!("Found {} per-minute file(s) in {}", files.len(), input_dir.display());

    let format = config.output.daily_csv_format();
    let outcomes: Vec<FileOutcome> = files
        .par_iter()
        .map(|path| {
            let result = (|| -> Result<(Option<PathBuf>, Vec<String>)> {
                let table = load_table(path, Some(&config.input))?;
                let daily = daily_means(&table)?;

                let stem = file_stem(path).replace(&config.batch.per_minute_marker, &config.batch.daily_marker);
                let output = output_dir.join(format!("{}.csv", stem));
                write_table_csv(&output, &daily, &format)?;
                Ok((Some(output), vec![format!("Days: {}", daily.num_rows())]))
            })();
            FileOutcome::from_result(path, result)
        })
        .collect();

    let report = RunReport {
        title: "Daily averages".to_string(),
        input_dir: Some(input_dir.to_path_buf()),
        output: Some(output_dir.to_path_buf()),
        outcomes,
    };
    write_text_report(&output_dir.join(PROCESSING_LOG), &report.render_text())?;
    Ok(report)
}

/// Read the given files and concatenate them in order.
///
/// Files are read in parallel. With `batch.merge_columns` set only those
/// columns are extracted. A file that fails to load, or whose columns do
/// not match the first loaded file, is reported and skipped.
pub fn merge_files(paths: &[PathBuf], config: &PipelineConfig) -> (Option<Table>, RunReport) {
    let input = InputConfig {
        value_columns: if config.batch.merge_columns.is_empty() {
            config.input.value_columns.clone()
        } else {
            config.batch.merge_columns.clone()
        },
        ..config.input.clone()
    };

    let loaded: Vec<Result<Table>> = paths
        .par_iter()
        .map(|path| load_table(path, Some(&input)).map_err(anyhow::Error::from))
        .collect();

    let mut merged: Option<Table> = None;
    let mut report = RunReport::new("Merge");
    for (path, result) in paths.iter().zip(loaded) {
        let result = result.and_then(|table| {
            let rows = table.num_rows();
            match merged.as_mut() {
                Some(acc) => acc.append(table)?,
                None => merged = Some(table),
            }
            Ok((None, vec![format!("Rows: {}", rows)]))
        });
        report.outcomes.push(FileOutcome::from_result(path, result));
    }

    (merged, report)
}

/// Whether two paths name the same file; falls back to plain comparison
/// when either cannot be resolved.
fn same_file(a: &Path, b: &Path) -> bool {
    match (fs::canonicalize(a), fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

/// Merge every selected file of `input_dir` into one CSV at `output`.
///
/// A previous merge result lying inside `input_dir` is not merged again.
pub fn merge_directory(input_dir: &Path, output: &Path, config: &PipelineConfig) -> Result<RunReport> {
    let selector = FileSelector::from_config(&config.batch)?;
    let mut files = scan_directory(input_dir, &selector)?;
    files.retain(|path| !same_file(path, output));
    info!("Merging {} file(s) from {}", files.len(), input_dir.display());

    let (merged, mut report) = merge_files(&files, config);
    report.input_dir = Some(input_dir.to_path_buf());

    let merged = merged.with_context(|| {
        format!(
            "no file in {} could be merged ({} found)",
            input_dir.display(),
            files.len()
        )
    })?;
    write_table_csv(output, &merged, &config.output.csv_format())?;
    report.output = Some(output.to_path_buf());
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_file(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        let mut file = File::create(&path).unwrap();
        write!(file, "{}", content).unwrap();
        path
    }

    #[test]
    fn test_scan_sorted_and_filtered() {
        let temp = TempDir::new().unwrap();
        write_file(temp.path(), "b_site.csv", "");
        write_file(temp.path(), "a_site.CSV", "");
        write_file(temp.path(), "~$a_site.csv", "");
        write_file(temp.path(), "notes.txt", "");
        fs::create_dir(temp.path().join("sub.csv")).unwrap();

        let selector = FileSelector::from_config(&BatchConfig::default()).unwrap();
        let files = scan_directory(temp.path(), &selector).unwrap();
        let names: Vec<String> = files.iter().map(|p| display_name(p)).collect();
        assert_eq!(names, vec!["a_site.CSV", "b_site.csv"]);
    }

    #[test]
    fn test_selector_pattern_and_marker() {
        let config = BatchConfig {
            name_pattern: Some(r"^logger\d+".to_string()),
            ..BatchConfig::default()
        };
        let selector = FileSelector::from_config(&config).unwrap().containing("(per-minute)");
        assert!(selector.matches(Path::new("logger2 (per-minute).csv")));
        assert!(!selector.matches(Path::new("logger2.csv")));
        assert!(!selector.matches(Path::new("site (per-minute).csv")));

        let bad = BatchConfig {
            name_pattern: Some("(".to_string()),
            ..BatchConfig::default()
        };
        assert!(matches!(
            FileSelector::from_config(&bad),
            Err(BatchError::InvalidPattern { .. })
        ));
    }

    #[test]
    fn test_missing_directory() {
        let selector = FileSelector::from_config(&BatchConfig::default()).unwrap();
        assert!(matches!(
            scan_directory(Path::new("/no/such/dir"), &selector),
            Err(BatchError::DirectoryNotFound(_))
        ));
    }

    #[test]
    fn test_fill_directory_reports_each_file() {
        let input = TempDir::new().unwrap();
        let output = TempDir::new().unwrap();
        write_file(
            input.path(),
            "a.csv",
            "time,v\n2025/01/18 00:00:00,1\n2025/01/18 00:03:00,4\n",
        );
        write_file(input.path(), "b.csv", "time,v\nnot a time,1\n");

        let report = fill_directory(input.path(), output.path(), &PipelineConfig::default()).unwrap();
        assert_eq!(report.succeeded(), 1);
        assert_eq!(report.failed(), 1);
        assert!(!report.outcomes[1].succeeded());

        let filled = load_table(output.path().join("a_filled.csv"), None).unwrap();
        let values = &filled.column("v").unwrap().values;
        assert_eq!(values.len(), 4);
        for (value, expected) in values.iter().zip([1.0, 2.0, 3.0, 4.0]) {
            assert!((value.unwrap() - expected).abs() < 1e-9);
        }

        let log = fs::read_to_string(output.path().join(PROCESSING_LOG)).unwrap();
        assert!(log.contains("Inserted points: 2"));
        assert!(log.contains("FAILED"));
    }

    #[test]
    fn test_daily_average_directory_renames() {
        let input = TempDir::new().unwrap();
        let output = TempDir::new().unwrap();
        write_file(
            input.path(),
            "ice (per-minute).csv",
            "time,ice\n2025/01/18 00:00:00,0.2\n2025/01/18 12:00:00,0.4\n2025/01/19 00:00:00,0.5\n",
        );
        write_file(input.path(), "ice.csv", "time,ice\n2025/01/18 00:00:00,9\n");

        let report = daily_average_directory(input.path(), output.path(), &PipelineConfig::default()).unwrap();
        assert_eq!(report.outcomes.len(), 1);

        let content = fs::read_to_string(output.path().join("ice (daily).csv")).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[1].starts_with("2025-01-18,0.3"));
        assert_eq!(lines[2], "2025-01-19,0.5");

        let log = fs::read_to_string(output.path().join(PROCESSING_LOG)).unwrap();
        assert!(log.contains("Daily averages"));
        assert!(log.contains("ice (per-minute).csv"));
        assert!(log.contains("Days: 2"));
    }

    #[test]
    fn test_merge_keeps_name_order_and_skips_bad_files() {
        let input = TempDir::new().unwrap();
        write_file(input.path(), "02.csv", "time,v,x\n2025/01/18 00:01:00,2,0\n");
        write_file(input.path(), "01.csv", "time,v,x\n2025/01/18 00:00:00,1,0\n");
        write_file(input.path(), "03.csv", "time,w\n2025/01/18 00:02:00,3\n");

        let mut config = PipelineConfig::default();
        config.batch.merge_columns = vec!["v".to_string()];
        let output = input.path().join("merged").join("all.csv");

        let report = merge_directory(input.path(), &output, &config).unwrap();
        assert_eq!(report.succeeded(), 2);
        assert_eq!(report.failed(), 1);

        let merged = load_table(&output, None).unwrap();
        assert_eq!(merged.column_names(), vec!["v"]);
        assert_eq!(merged.column("v").unwrap().values, vec![Some(1.0), Some(2.0)]);
    }

    #[test]
    fn test_rerun_merge_skips_previous_output() {
        let input = TempDir::new().unwrap();
        write_file(input.path(), "01.csv", "time,v
2025/01/18 00:00:00,1
");
        write_file(input.path(), "02.csv", "time,v
2025/01/18 00:01:00,2
");
        let output = input.path().join("merged.csv");
        let config = PipelineConfig::default();

        merge_directory(input.path(), &output, &config).unwrap();
        let report = merge_directory(input.path(), &output, &config).unwrap();

        assert_eq!(report.outcomes.len(), 2);
        let merged = load_table(&output, None).unwrap();
        assert_eq!(merged.column("v").unwrap().values, vec![Some(1.0), Some(2.0)]);
    }
}
