//! Storage error types.

use thiserror::Error;

/// Storage operation errors.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("invalid record id: {0}")]
    InvalidId(String),

    #[error("record already exists: {0}")]
    AlreadyExists(String),

    #[error("record header is {size} bytes, limit is {limit}")]
    HeaderTooLarge { size: u64, limit: u64 },

    #[error("malformed record {id}: {reason}")]
    MalformedRecord { id: String, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StorageError {
    pub(crate) fn malformed(id: &str, reason: impl Into<String>) -> Self {
        Self::MalformedRecord {
            id: id.to_string(),
            reason: reason.into(),
        }
    }
}

/// Result type for storage operations.
pub type StorageResult<T> = std::result::Result<T, StorageError>;
