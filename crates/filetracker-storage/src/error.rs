//! Storage error types

use filetracker_core::sink::SinkError;

/// Errors produced by the sled change log
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    /// A stored record could not be encoded or decoded
    #[error("record serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Creating the database directory failed
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, StorageError>;

impl From<StorageError> for SinkError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Serialization(e) => SinkError::Serialization(e),
            other => SinkError::storage(other.to_string()),
        }
    }
}
