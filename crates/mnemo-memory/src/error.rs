//! Error types for the memory crate.

use thiserror::Error;

/// Errors that can occur in the memory crate.
#[derive(Debug, Error)]
pub enum MemoryError {
    /// The requested record does not exist (or was hard-deleted).
    #[error("Not found: {0}")]
    NotFound(String),

    /// Caller supplied an unusable argument (empty text, bad metadata,
    /// wrong embedding dimensionality, ...).
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The embedding provider could not produce a vector.
    #[error("Embedding provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// Underlying SQLite operation failed.
    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    /// Serialization/deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A stored row could not be decoded.
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// Configuration could not be loaded or is inconsistent.
    #[error("Config error: {0}")]
    Config(String),

    /// Filesystem error (database directory, analytics files).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl MemoryError {
    /// Whether this error reports a missing record.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

impl From<uuid::Error> for MemoryError {
    fn from(err: uuid::Error) -> Self {
        MemoryError::InvalidData(format!("Invalid UUID: {err}"))
    }
}

/// Result type alias for memory operations.
pub type Result<T> = std::result::Result<T, MemoryError>;
