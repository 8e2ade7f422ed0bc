//! Error taxonomy for loading, querying and writing reports.

use std::path::PathBuf;

use polars::prelude::PolarsError;
use thiserror::Error;

/// Errors raised while producing customer analytics reports.
#[derive(Error, Debug)]
pub enum ReportError {
    /// A required input CSV is not present at the expected location.
    #[error("missing input file for table '{table}': {}", path.display())]
    MissingInputFile { table: &'static str, path: PathBuf },

    /// A loaded table lacks a column one of the queries reads.
    #[error("table '{table}' has no column '{column}'")]
    MissingColumn {
        table: &'static str,
        column: &'static str,
    },

    /// The CSV reader rejected an input file.
    #[error("failed to load table '{table}': {source}")]
    Load {
        table: &'static str,
        #[source]
        source: PolarsError,
    },

    /// A report query failed to execute.
    #[error("query '{query}' failed: {message}")]
    Query { query: &'static str, message: String },

    /// Failed to create the output directory or write a file.
    #[error("failed to write '{}': {source}", path.display())]
    OutputWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// CSV header read or row write error.
    #[error("CSV error for '{}': {source}", path.display())]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    /// Chart rendering error.
    #[error("failed to render chart '{}': {message}", path.display())]
    Chart { path: PathBuf, message: String },

    /// Configuration file could not be read or parsed.
    #[error("invalid config '{}': {message}", path.display())]
    Config { path: PathBuf, message: String },
}

impl ReportError {
    /// Wrap a polars failure raised while running the named query.
    pub fn query(query: &'static str, err: impl std::fmt::Display) -> Self {
        ReportError::Query {
            query,
            message: err.to_string(),
        }
    }

    /// Whether this error means an input file was absent.
    pub fn is_missing_input(&self) -> bool {
        matches!(self, ReportError::MissingInputFile { .. })
    }
}

/// Result type used throughout the library.
pub type Result<T> = std::result::Result<T, ReportError>;
