//! Error types for the sync layer.

use clustermirror_storage::StorageError;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

#[derive(Debug, Error)]
pub enum SyncError {
    /// Connection, list or watch failure. Always retried with backoff.
    #[error("transient error: {0}")]
    Transient(String),

    /// The watch cursor is too old for the cluster (HTTP 410); a relist is needed.
    #[error("resource version expired: {0}")]
    Expired(String),

    /// A response or watch event could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),

    /// Persistent storage failure after the bounded write retries.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// The cluster does not serve the requested resource.
    #[error("resource not served: {0}")]
    NotServed(String),

    /// The worker owning a command channel has stopped.
    #[error("channel closed")]
    ChannelClosed,
}

impl SyncError {
    /// Whether the failure is absorbed by the list/watch retry loop.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::Expired(_) | Self::Decode(_))
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::Decode(err.to_string())
        } else {
            Self::Transient(err.to_string())
        }
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(err.to_string())
    }
}
