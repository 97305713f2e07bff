//! Core data types and I/O operations.

pub mod error;
pub mod loaders;
pub mod series;
pub mod table;
pub mod time;
pub mod writers;

pub use error::ProcessingError;
pub use loaders::{load_table, load_tables, LoaderError};
pub use series::TimeSeries;
pub use table::{Column, Table};
pub use time::Cadence;
pub use writers::{write_table_csv, write_text_report, CsvFormat, WriteError};
