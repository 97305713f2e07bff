//! Data loaders for logger exports.
//!
//! Inputs are either CSV exports or spreadsheet workbooks (`.xlsx`, `.xlsm`,
//! `.xls`, `.xlsb`, `.ods`) of the field loggers: one header row, a
//! timestamp column (addressed by name or position) and any number of
//! numeric measurement columns. Empty or non-numeric cells load as missing.
//! CSV text is read as UTF-8 and falls back to GBK, the encoding older
//! exports were written in.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use calamine::{open_workbook_auto, Data, Range, Reader};
use chrono::{Duration, NaiveDateTime, Timelike};
use csv::{ReaderBuilder, Trim};
use encoding_rs::GBK;
use log::{debug, warn};
use thiserror::Error;

use crate::config::{ColumnRef, InputConfig};
use super::error::ProcessingError;
use super::table::{Column, Table};
use super::time::parse_timestamp;

/// Errors that can occur during file loading.
#[derive(Error, Debug)]
pub enum LoaderError {
    #[error("input file not found: {0} (check the path and that the file is not open in another program)")]
    FileNotFound(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV parsing error: {0}")]
    Csv(#[from] csv::Error),

    #[error("spreadsheet error: {0}")]
    Spreadsheet(#[from] calamine::Error),

    #[error("cannot decode {path} after byte {valid_up_to}: expected UTF-8 or GBK encoded CSV (re-export the sheet as UTF-8)")]
    Decode { path: PathBuf, valid_up_to: usize },

    #[error("{path} has no sheet '{sheet}'; available sheets: {available:?}")]
    MissingSheet {
        path: PathBuf,
        sheet: String,
        available: Vec<String>,
    },

    #[error("{path} is missing column(s) {missing:?}; available columns: {available:?}")]
    MissingColumns {
        path: PathBuf,
        missing: Vec<String>,
        available: Vec<String>,
    },

    #[error("{path} row {row}: cannot parse timestamp '{value}' (expected e.g. 2025/01/18 12:00:00)")]
    InvalidTimestamp {
        path: PathBuf,
        row: usize,
        value: String,
    },

    #[error("time column of {0} is empty or has no valid timestamps")]
    EmptyTimeColumn(PathBuf),

    #[error("sheets of {path} do not line up: {source}")]
    SheetMismatch {
        path: PathBuf,
        #[source]
        source: ProcessingError,
    },
}

/// Result type for loader operations.
pub type Result<T> = std::result::Result<T, LoaderError>;

const WORKBOOK_EXTENSIONS: &[&str] = &["xlsx", "xlsm", "xls", "xlsb", "ods"];

/// Whether `path` is read as a spreadsheet workbook rather than CSV.
pub fn is_workbook(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| WORKBOOK_EXTENSIONS.iter().any(|w| ext.eq_ignore_ascii_case(w)))
        .unwrap_or(false)
}

/// One cell before it is typed as a timestamp or a measurement.
#[derive(Debug, Clone, PartialEq)]
enum RawCell {
    Text(String),
    Number(f64),
    Time(NaiveDateTime),
    Empty,
}

impl RawCell {
    fn from_text(cell: &str) -> Self {
        let cell = cell.trim();
        if cell.is_empty() {
            RawCell::Empty
        } else {
            RawCell::Text(cell.to_string())
        }
    }

    fn from_data(cell: &Data) -> Self {
        match cell {
            Data::Int(i) => RawCell::Number(*i as f64),
            Data::Float(f) => RawCell::Number(*f),
            Data::String(s) | Data::DateTimeIso(s) => RawCell::from_text(s),
            Data::DateTime(dt) => dt.as_datetime().map(|t| RawCell::Time(round_to_second(t))).unwrap_or(RawCell::Empty),
            _ => RawCell::Empty,
        }
    }

    fn is_empty(&self) -> bool {
        matches!(self, RawCell::Empty)
    }

    fn timestamp(&self, format: Option<&str>) -> Option<NaiveDateTime> {
        match self {
            RawCell::Time(ts) => Some(*ts),
            RawCell::Text(s) => parse_timestamp(s, format),
            RawCell::Number(_) | RawCell::Empty => None,
        }
    }

    /// Empty, non-numeric and non-finite cells are missing.
    fn value(&self) -> Option<f64> {
        match self {
            RawCell::Number(v) => Some(*v),
            RawCell::Text(s) => s.parse::<f64>().ok(),
            RawCell::Time(_) | RawCell::Empty => None,
        }
        .filter(|v| v.is_finite())
    }

    fn describe(&self) -> String {
        match self {
            RawCell::Text(s) => s.clone(),
            RawCell::Number(v) => v.to_string(),
            RawCell::Time(ts) => ts.to_string(),
            RawCell::Empty => String::new(),
        }
    }
}

/// Excel serial day fractions carry float noise below a second.
fn round_to_second(ts: NaiveDateTime) -> NaiveDateTime {
    let whole = ts.with_nanosecond(0).unwrap_or(ts);
    if ts.nanosecond() >= 500_000_000 {
        whole + Duration::seconds(1)
    } else {
        whole
    }
}

/// Header row plus data rows of one CSV file or worksheet.
#[derive(Debug, Default)]
struct RawSheet {
    headers: Vec<String>,
    rows: Vec<Vec<RawCell>>,
}

/// Read the text of a CSV file, stripping a leading byte-order mark.
///
/// Bytes that are not valid UTF-8 are decoded as GBK; only input that is
/// neither is rejected.
fn read_text(path: &Path) -> Result<String> {
    if !path.exists() {
        return Err(LoaderError::FileNotFound(path.to_path_buf()));
    }
    let bytes = fs::read(path)?;
    let text = match String::from_utf8(bytes) {
        Ok(text) => text,
        Err(e) => {
            let valid_up_to = e.utf8_error().valid_up_to();
            let bytes = e.into_bytes();
            let (decoded, had_errors) = GBK.decode_without_bom_handling(&bytes);
            if had_errors {
                return Err(LoaderError::Decode {
                    path: path.to_path_buf(),
                    valid_up_to,
                });
            }
            debug!("{} is not UTF-8, decoded as GBK", path.display());
            decoded.into_owned()
        }
    };
    Ok(match text.strip_prefix('\u{feff}') {
        Some(stripped) => stripped.to_string(),
        None => text,
    })
}

fn read_csv_sheet(path: &Path) -> Result<RawSheet> {
    let text = read_text(path)?;
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(Trim::All)
        .from_reader(text.as_bytes());

    let headers = reader.headers()?.iter().map(str::to_string).collect();
    let mut rows = Vec::with_capacity(4096);
    for result in reader.records() {
        let record = result?;
        rows.push(record.iter().map(RawCell::from_text).collect());
    }
    Ok(RawSheet { headers, rows })
}

fn sheet_from_range(range: &Range<Data>) -> RawSheet {
    let mut rows = range.rows();
    let headers = rows
        .next()
        .map(|row| row.iter().map(|cell| cell.to_string().trim().to_string()).collect())
        .unwrap_or_default();
    RawSheet {
        headers,
        rows: rows.map(|row| row.iter().map(RawCell::from_data).collect()).collect(),
    }
}

/// Read the configured sheets of a workbook in order; the first sheet when
/// none are configured.
fn read_workbook_sheets(path: &Path, sheets: &[String]) -> Result<Vec<(String, RawSheet)>> {
    if !path.exists() {
        return Err(LoaderError::FileNotFound(path.to_path_buf()));
    }
    let mut workbook = open_workbook_auto(path)?;
    let available = workbook.sheet_names();

    let names: Vec<String> = if sheets.is_empty() {
        available.first().cloned().into_iter().collect()
    } else {
        if let Some(missing) = sheets.iter().find(|name| !available.contains(name)) {
            return Err(LoaderError::MissingSheet {
                path: path.to_path_buf(),
                sheet: missing.clone(),
                available,
            });
        }
        sheets.to_vec()
    };

    names
        .into_iter()
        .map(|name| {
            let range = workbook.worksheet_range(&name)?;
            Ok((name, sheet_from_range(&range)))
        })
        .collect()
}

/// Read only the header row of a CSV file or of a workbook's first sheet.
pub fn read_headers<P: AsRef<Path>>(path: P) -> Result<Vec<String>> {
    let path = path.as_ref();
    if is_workbook(path) {
        let sheets = read_workbook_sheets(path, &[])?;
        return Ok(sheets.into_iter().next().map(|(_, sheet)| sheet.headers).unwrap_or_default());
    }
    let text = read_text(path)?;
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .trim(Trim::All)
        .from_reader(text.as_bytes());
    Ok(reader.headers()?.iter().map(str::to_string).collect())
}

/// Load a logger export into a [`Table`].
///
/// CSV files and workbooks are told apart by extension. For a workbook the
/// sheets listed in `config.sheets` are loaded and concatenated in that
/// order (the first sheet when the list is empty); they must share a
/// header layout.
///
/// # Arguments
///
/// * `path` - Path to the CSV file or workbook
/// * `config` - Column mapping (uses defaults if None: first column is the
///   timestamp, every other column is a measurement)
///
/// # Errors
///
/// Returns an error if the file is missing, cannot be decoded, lacks the
/// expected sheets or columns, contains an unparsable timestamp, or has no
/// timestamps at all. Rows whose timestamp cell is empty are dropped with a
/// warning.
pub fn load_table<P: AsRef<Path>>(path: P, config: Option<&InputConfig>) -> Result<Table> {
    let path = path.as_ref();
    let default_config = InputConfig::default();
    let config = config.unwrap_or(&default_config);

    if !is_workbook(path) {
        return build_table(path, read_csv_sheet(path)?, config);
    }

    let mut combined: Option<Table> = None;
    for (name, sheet) in read_workbook_sheets(path, &config.sheets)? {
        debug!("{}: reading sheet '{}'", path.display(), name);
        let table = build_table(path, sheet, config)?;
        match combined.as_mut() {
            Some(acc) => acc.append(table).map_err(|source| LoaderError::SheetMismatch {
                path: path.to_path_buf(),
                source,
            })?,
            None => combined = Some(table),
        }
    }
    combined.ok_or_else(|| LoaderError::EmptyTimeColumn(path.to_path_buf()))
}

/// Map the columns of a raw sheet and type its cells.
fn build_table(path: &Path, sheet: RawSheet, config: &InputConfig) -> Result<Table> {
    let RawSheet { headers, rows } = sheet;
    let index_of: HashMap<&str, usize> = headers
        .iter()
        .enumerate()
        .map(|(i, name)| (name.as_str(), i))
        .collect();

    let time_idx = match &config.time_column {
        ColumnRef::Index(i) if *i < headers.len() => *i,
        ColumnRef::Name(name) if index_of.contains_key(name.as_str()) => index_of[name.as_str()],
        other => {
            return Err(LoaderError::MissingColumns {
                path: path.to_path_buf(),
                missing: vec![other.to_string()],
                available: headers.clone(),
            })
        }
    };

    let value_idx: Vec<usize> = if config.value_columns.is_empty() {
        (0..headers.len()).filter(|&i| i != time_idx).collect()
    } else {
        let missing: Vec<String> = config
            .value_columns
            .iter()
            .filter(|name| !index_of.contains_key(name.as_str()))
            .cloned()
            .collect();
        if !missing.is_empty() {
            return Err(LoaderError::MissingColumns {
                path: path.to_path_buf(),
                missing,
                available: headers.clone(),
            });
        }
        config
            .value_columns
            .iter()
            .map(|name| index_of[name.as_str()])
            .collect()
    };

    let mut timestamps = Vec::with_capacity(rows.len());
    let mut values: Vec<Vec<Option<f64>>> = vec![Vec::with_capacity(rows.len()); value_idx.len()];
    let mut dropped = 0usize;
    let empty = RawCell::Empty;

    for (row, record) in rows.iter().enumerate() {
        let time_cell = record.get(time_idx).unwrap_or(&empty);

        let ts = match time_cell.timestamp(config.time_format.as_deref()) {
            Some(ts) => ts,
            None if time_cell.is_empty() => {
                dropped += 1;
                continue;
            }
            None => {
                return Err(LoaderError::InvalidTimestamp {
                    path: path.to_path_buf(),
                    row: row + 2,
                    value: time_cell.describe(),
                })
            }
        };

        timestamps.push(ts);
        for (column, &idx) in values.iter_mut().zip(value_idx.iter()) {
            column.push(record.get(idx).and_then(RawCell::value));
        }
    }

    if timestamps.is_empty() {
        return Err(LoaderError::EmptyTimeColumn(path.to_path_buf()));
    }
    if dropped > 0 {
        warn!(
            "{}: dropped {} row(s) with an empty timestamp",
            path.display(),
            dropped
        );
    }

    let rename = |name: &str| -> String {
        config
            .rename
            .get(name)
            .cloned()
            .unwrap_or_else(|| name.to_string())
    };

    let columns: Vec<Column> = value_idx
        .iter()
        .zip(values)
        .map(|(&idx, column)| Column::new(rename(&headers[idx]), column))
        .collect();

    debug!(
        "Loaded {} rows x {} columns from {}",
        timestamps.len(),
        columns.len(),
        path.display()
    );

    Ok(Table {
        time_column: rename(&headers[time_idx]),
        timestamps,
        columns,
    })
}

/// Load several files and concatenate their rows in the given order.
///
/// Used for logger exports split across several sheets that share a
/// header layout.
pub fn load_tables<P: AsRef<Path>>(paths: &[P], config: Option<&InputConfig>) -> anyhow::Result<Table> {
    let mut combined: Option<Table> = None;
    for path in paths {
        let table = load_table(path, config)?;
        match combined.as_mut() {
            Some(acc) => acc.append(table)?,
            None => combined = Some(table),
        }
    }
    combined.ok_or_else(|| anyhow::anyhow!("no input files given"))
}
