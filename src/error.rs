use std::path::PathBuf;

use thiserror::Error;

/// Every way a whisper operation can fail.
///
/// Mirrors the exception taxonomy of the original implementation, but as a
/// closed enum: callers match on `WhisperError` instead of catching a
/// hierarchy of exception classes.
#[derive(Debug, Error)]
pub enum WhisperError {
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("invalid aggregation method: {0}")]
    InvalidAggregationMethod(String),

    #[error("invalid xFilesFactor: {0}")]
    InvalidXFilesFactor(String),

    #[error("invalid time interval: from time {from} is after until time {until}")]
    InvalidTimeInterval { from: i64, until: i64 },

    #[error("timestamp not covered by any archives in this database")]
    TimestampNotCovered,

    #[error("invalid granularity: no archive has secondsPerPoint {0}")]
    InvalidGranularity(u32),

    #[error("corrupt whisper file {path}: {reason}")]
    CorruptWhisperFile { path: PathBuf, reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, WhisperError>;

impl WhisperError {
    pub fn corrupt<P: Into<PathBuf>, S: Into<String>>(path: P, reason: S) -> Self {
        WhisperError::CorruptWhisperFile {
            path: path.into(),
            reason: reason.into(),
        }
    }
}
