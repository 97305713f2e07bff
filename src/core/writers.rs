//! Data writers for tables and plain-text reports.
//!
//! This module provides functions for writing pipeline results:
//! - CSV tables with a formatted timestamp column
//! - Plain-text summary logs (gap statistics, batch run reports)

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

use thiserror::Error;

use super::table::Table;

/// Errors that can occur during write operations.
#[derive(Error, Debug)]
pub enum WriteError {
    /// Failed to create parent directories.
    #[error("failed to create parent directories for '{path}': {source}")]
    CreateDirectory {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Failed to create or open file for writing.
    #[error("failed to create file '{path}': {source}")]
    CreateFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Failed to write data to file.
    #[error("failed to write to file '{path}': {source}")]
    WriteFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// CSV writing error.
    #[error("CSV write error for '{path}': {source}")]
    CsvError {
        path: String,
        #[source]
        source: csv::Error,
    },
}

/// Result type for write operations.
pub type Result<T> = std::result::Result<T, WriteError>;

/// How timestamps and values are rendered in CSV output.
#[derive(Debug, Clone)]
pub struct CsvFormat<'a> {
    /// chrono format string for the timestamp column.
    pub time_format: &'a str,
    /// Fixed number of decimals, or shortest round-trip representation if None.
    pub precision: Option<usize>,
}

impl Default for CsvFormat<'_> {
    fn default() -> Self {
        Self {
            time_format: "%Y/%m/%d %H:%M:%S",
            precision: None,
        }
    }
}

/// Creates parent directories for a file path if they don't exist.
fn ensure_parent_dirs(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent).map_err(|e| WriteError::CreateDirectory {
                path: parent.display().to_string(),
                source: e,
            })?;
        }
    }
    Ok(())
}

/// Creates a buffered writer for the given path.
fn create_buffered_writer(path: &Path) -> Result<BufWriter<File>> {
    let file = File::create(path).map_err(|e| WriteError::CreateFile {
        path: path.display().to_string(),
        source: e,
    })?;
    Ok(BufWriter::new(file))
}

/// Render one cell; missing values become empty cells.
fn format_value(value: Option<f64>, precision: Option<usize>) -> String {
    match (value, precision) {
        (None, _) => String::new(),
        (Some(v), Some(p)) => format!("{:.*}", p, v),
        (Some(v), None) => v.to_string(),
    }
}

/// Write a table to CSV.
///
/// The header row is the timestamp header followed by the column names.
/// Missing values are written as empty cells so the file reloads with the
/// same missing pattern.
///
/// # Arguments
///
/// * `path` - Output file path (parent directories will be created if needed)
/// * `table` - Table to write
/// * `format` - Timestamp format and value precision
///
/// # Errors
///
/// Returns an error if:
/// - Parent directories cannot be created
/// - File cannot be created or written to
pub fn write_table_csv(path: &Path, table: &Table, format: &CsvFormat<'_>) -> Result<()> {
    ensure_parent_dirs(path)?;

    let buf_writer = create_buffered_writer(path)?;
    let mut csv_writer = csv::Writer::from_writer(buf_writer);
    let path_str = path.display().to_string();

    let mut header = Vec::with_capacity(table.columns.len() + 1);
    header.push(table.time_column.clone());
    header.extend(table.column_names());
    csv_writer
        .write_record(&header)
        .map_err(|e| WriteError::CsvError {
            path: path_str.clone(),
            source: e,
        })?;

    let mut record = Vec::with_capacity(header.len());
    for (row, ts) in table.timestamps.iter().enumerate() {
        record.clear();
        record.push(ts.format(format.time_format).to_string());
        for column in &table.columns {
            record.push(format_value(column.values[row], format.precision));
        }
        csv_writer
            .write_record(&record)
            .map_err(|e| WriteError::CsvError {
                path: path_str.clone(),
                source: e,
            })?;
    }

    csv_writer.flush().map_err(|e| WriteError::WriteFile {
        path: path_str,
        source: e,
    })?;

    Ok(())
}

/// Write a plain-text report (UTF-8).
pub fn write_text_report(path: &Path, content: &str) -> Result<()> {
    ensure_parent_dirs(path)?;
    let mut writer = create_buffered_writer(path)?;
    let path_str = path.display().to_string();

    writer
        .write_all(content.as_bytes())
        .and_then(|_| writer.flush())
        .map_err(|e| WriteError::WriteFile {
            path: path_str,
            source: e,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::loaders::load_table;
    use crate::core::table::Column;
    use chrono::NaiveDateTime;
    use std::fs;
    use tempfile::tempdir;

    fn ts(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").unwrap()
    }

    fn create_test_table() -> Table {
        Table::from_columns(
            "time",
            vec![ts("2025-01-18 00:00:00"), ts("2025-01-18 00:01:00")],
            vec![
                Column::new("ice", vec![Some(0.3124), None]),
                Column::new("temp", vec![Some(-1.0), Some(-1.5)]),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_write_table_csv() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.csv");

        write_table_csv(&path, &create_test_table(), &CsvFormat::default()).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines[0], "time,ice,temp");
        assert_eq!(lines[1], "2025/01/18 00:00:00,0.3124,-1");
        assert_eq!(lines[2], "2025/01/18 00:01:00,,-1.5");
    }

    #[test]
    fn test_write_with_precision_and_date_format() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("daily.csv");
        let format = CsvFormat {
            time_format: "%Y-%m-%d",
            precision: Some(3),
        };

        write_table_csv(&path, &create_test_table(), &format).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        assert!(content.lines().nth(1).unwrap().starts_with("2025-01-18,0.312,"));
    }

    #[test]
    fn test_written_table_reloads() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("roundtrip.csv");
        let table = create_test_table();

        write_table_csv(&path, &table, &CsvFormat::default()).unwrap();
        let reloaded = load_table(&path, None).unwrap();

        assert_eq!(reloaded, table);
    }

    #[test]
    fn test_write_text_report() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("logs").join("report.txt");

        write_text_report(&path, "line one\nline two\n").unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "line one\nline two\n");
    }
}
