//! Errors raised by the in-memory transforms.

use thiserror::Error;

/// Errors that can occur while transforming series and tables.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProcessingError {
    /// Empty input, all-missing time column or inconsistent arguments.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Too few points for the requested operation.
    #[error("insufficient data for {operation}: need at least {required} points, got {available}")]
    InsufficientData {
        operation: String,
        required: usize,
        available: usize,
    },

    /// An expected column is absent.
    #[error("column '{column}' not found (available columns: {})", available.join(", "))]
    SchemaMismatch {
        column: String,
        available: Vec<String>,
    },
}

/// Result type for processing operations.
pub type Result<T> = std::result::Result<T, ProcessingError>;
