use std::time::Duration;

use polars::prelude::PolarsError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("column '{0}' not found")]
    MissingColumn(String),
    #[error("column lengths are inconsistent")]
    LengthMismatch,
    #[error("low > high at row {row} (low={low}, high={high})")]
    InvertedRange { row: usize, low: f64, high: f64 },
    #[error("unsupported timestamp at row {row}: {value}")]
    UnsupportedTimestamp { row: usize, value: String },
    #[error("invalid numeric value in column '{column}' at row {row}: {value}")]
    InvalidNumber {
        column: String,
        row: usize,
        value: String,
    },
    #[error("row {row} has no symbol and no default symbol was given")]
    MissingSymbol { row: usize },
    #[error(transparent)]
    Polars(#[from] PolarsError),
}

/// A raw storage row that cannot become a [`crate::Tick`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecordError {
    #[error("missing required field '{0}'")]
    Missing(&'static str),
    #[error("invalid value for '{field}': {value}")]
    Invalid { field: &'static str, value: String },
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no storage backend available")]
    NoBackend,
    #[error("disk path is required to use disk-backed storage")]
    MissingDiskPath,
    #[error("store lock poisoned")]
    Poisoned,
    #[error("timestamp out of range: {0}")]
    TimestampRange(i128),
    #[error("duckdb error: {0}")]
    DuckDb(#[from] duckdb::Error),
}

/// Transient failure of one fetch cycle. Never fatal to the polling loop.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("fetch timed out after {0:?}")]
    Timeout(Duration),
    #[error("fetch task failed: {0}")]
    Join(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value} ({reason})")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}
