//! Error type shared by every stage of the analysis

use std::path::PathBuf;

use polars::error::PolarsError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AnalysisError {
    /// Input file missing, unreadable, or not a delimited table
    #[error("failed to load {}: {reason}", path.display())]
    Load { path: PathBuf, reason: String },

    #[error("input is missing required column '{0}'")]
    MissingColumn(String),

    /// A structurally malformed value that downstream date math cannot tolerate
    #[error("row {row}: cannot parse '{value}': {reason}")]
    Parse {
        row: usize,
        value: String,
        reason: String,
    },

    #[error("no transactions left after cleaning")]
    EmptyInput,

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("chart rendering failed: {0}")]
    Chart(String),

    #[error(transparent)]
    Polars(#[from] PolarsError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, AnalysisError>;
