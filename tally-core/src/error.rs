//! Error types for Tally

use crate::MetricKind;
use thiserror::Error;

/// Result type alias for Tally operations
pub type Result<T> = std::result::Result<T, TallyError>;

/// Tally error types
#[derive(Error, Debug)]
pub enum TallyError {
    /// IO operation failed
    #[error("IO error during {op}: {source}")]
    Io {
        op: &'static str,
        #[source]
        source: std::io::Error,
    },

    /// Metric fails validation (bad kind, name or value)
    #[error("Invalid metric: {0}")]
    InvalidMetric(String),

    /// Metric has no binary form
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// Malformed or truncated WAL record
    #[error("Corrupt record: {0}")]
    CorruptRecord(String),

    /// Checksum mismatch
    #[error("Checksum mismatch: expected {expected:#010x}, got {actual:#010x}")]
    ChecksumMismatch { expected: u32, actual: u32 },

    /// A partial write could not be cut off the end of the log
    #[error("WAL {0} has a torn write at its end; refusing further writes")]
    TornWrite(String),

    /// Save called without metrics
    #[error("Empty input: no metrics given")]
    EmptyInput,

    /// Metric name already bound to another kind
    #[error("Conflict: metric {name} is a {existing}, cannot write it as a {incoming}")]
    Conflict {
        name: String,
        existing: MetricKind,
        incoming: MetricKind,
    },

    /// Metric not found
    #[error("Metric not found: {0}")]
    NotFound(String),

    /// Storage already closed
    #[error("Storage closed")]
    StorageClosed,

    /// Caller gave up before the storage lock was acquired
    #[error("Operation cancelled")]
    Cancelled,

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl TallyError {
    /// Wrap an IO error with the step that failed
    pub fn io(op: &'static str, source: std::io::Error) -> Self {
        TallyError::Io { op, source }
    }

    /// Check if the same operation may succeed when tried again
    pub fn is_retryable(&self) -> bool {
        matches!(self, TallyError::Io { .. })
    }

    /// Check if error indicates corruption
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            TallyError::CorruptRecord(_)
                | TallyError::ChecksumMismatch { .. }
                | TallyError::TornWrite(_)
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, TallyError::NotFound(_))
    }
}
