//! Error types for the catalog.
//!
//! `StorageError` covers infrastructure faults (sled, filesystem, codec, timeouts).
//! `ApiError` is what every `TreeService` operation returns; its variants map one
//! to one onto the failure kinds a caller is expected to distinguish.

use crate::types::NodeId;
use thiserror::Error;

/// Infrastructure-level failure in the metadata store or the blob store
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("row codec error: {0}")]
    Codec(#[from] bincode::Error),

    #[error("{operation} timed out after {millis}ms")]
    Timeout { operation: String, millis: u64 },

    #[error("transaction failed: {0}")]
    Transaction(String),

    #[error("invalid storage path: {0}")]
    InvalidPath(String),
}

/// Errors surfaced by catalog operations
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("node not found: {0}")]
    NotFound(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    /// The stored tree violates one of its structural invariants
    #[error("corrupt catalog state: {0}")]
    CorruptState(String),

    #[error("storage failure: {0}")]
    StorageFailure(#[from] StorageError),

    /// A lock on the affected nodes could not be acquired in time
    #[error("catalog busy: {0}")]
    Busy(String),

    /// A compensating action failed; the catalog needs operator attention
    #[error("unrecoverable failure: {0}")]
    Unrecoverable(String),

    #[error("configuration error: {0}")]
    ConfigError(String),
}

impl ApiError {
    pub fn node_not_found(id: &NodeId) -> Self {
        ApiError::NotFound(id.to_string())
    }

    /// Whether the caller can correct the request and try again
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            ApiError::NotFound(_) | ApiError::InvalidInput(_) | ApiError::InvalidPayload(_)
        )
    }
}

impl From<config::ConfigError> for ApiError {
    fn from(err: config::ConfigError) -> Self {
        ApiError::ConfigError(err.to_string())
    }
}
