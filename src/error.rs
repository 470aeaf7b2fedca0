//! Error types for the nodeshift library.

use thiserror::Error;

/// Main error type for the library.
#[derive(Error, Debug)]
pub enum ShiftError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV parsing error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Invalid value '{value}' at row {row}, column '{column}'")]
    InvalidValue {
        value: String,
        row: usize,
        column: String,
    },

    #[error("Unknown level '{value}' for '{column}' at row {row}")]
    UnknownLevel {
        value: String,
        row: usize,
        column: String,
    },

    #[error("Missing column '{0}' in input")]
    MissingColumn(String),

    #[error("Nesting violation: {0}")]
    Nesting(String),

    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Grouping '{grouping}' has {levels} distinct level(s); at least 2 are required")]
    InsufficientLevels { grouping: String, levels: usize },

    #[error("Empty data: {0}")]
    EmptyData(String),

    #[error("Numerical error: {0}")]
    Numerical(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Invalid pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("Plotting error: {0}")]
    Plot(String),

    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for library operations.
pub type Result<T> = std::result::Result<T, ShiftError>;
