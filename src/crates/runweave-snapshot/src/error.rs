//! Error types for snapshot operations

use thiserror::Error;

/// Result type for snapshot operations
pub type Result<T> = std::result::Result<T, SnapshotError>;

/// Errors that can occur while persisting or loading run snapshots
#[derive(Error, Debug)]
pub enum SnapshotError {
    /// No snapshot exists for the requested run
    #[error("Snapshot not found for run '{0}'")]
    NotFound(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Storage backend error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Snapshot record is malformed or from an incompatible version
    #[error("Invalid snapshot: {0}")]
    Invalid(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
