// Error types for the statistics pipeline
// Library operations return StatsError; the binary wraps it in anyhow

use std::path::PathBuf;

/// Errors raised while walking, parsing, aggregating or rendering
#[derive(Debug, thiserror::Error)]
pub enum StatsError {
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed request metrics table {path:?}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("Malformed MFU file {path:?}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Column '{column}' not found in {path:?}")]
    MissingColumn { path: PathBuf, column: String },

    #[error("Non-numeric value in column '{column}' of {path:?} at row {row}: {value:?}")]
    InvalidDelayValue {
        path: PathBuf,
        column: String,
        row: usize,
        value: String,
    },

    #[error("Invalid experiment name '{name}': {reason}")]
    InvalidExperimentName { name: String, reason: String },

    #[error("Invalid MFU value for key '{key}' in {path:?}: {reason}")]
    InvalidMfuValue {
        path: PathBuf,
        key: String,
        reason: String,
    },

    #[error("Unknown dimension '{0}' (expected replica, batch or qps)")]
    InvalidDimension(String),

    #[error("Render failed for {path:?}: {reason}")]
    Render { path: PathBuf, reason: String },
}

impl StatsError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StatsError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn experiment_name(name: &str, reason: impl Into<String>) -> Self {
        StatsError::InvalidExperimentName {
            name: name.to_string(),
            reason: reason.into(),
        }
    }
}

pub type Result<T, E = StatsError> = std::result::Result<T, E>;
