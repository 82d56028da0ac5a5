//! Error types for the storage layer.
//!
//! Backend failures are normalized into a small taxonomy. Every variant
//! except `Unsupported` is tagged with the context it happened in
//! (a cluster name, or `cluster/group/version/resource`).

use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Debug, Error)]
pub enum StorageError {
    /// The requested object or row does not exist.
    #[error("{context}: not found: {message}")]
    NotFound { context: String, message: String },

    /// An identity collision inconsistent with the expected version.
    #[error("{context}: conflict: {message}")]
    Conflict { context: String, message: String },

    /// The backend cannot represent the request (collection, selector, size).
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// Backend or codec failure.
    #[error("{context}: internal error: {message}")]
    Internal { context: String, message: String },
}

impl StorageError {
    pub fn not_found(context: impl Into<String>, message: impl Into<String>) -> Self {
        Self::NotFound {
            context: context.into(),
            message: message.into(),
        }
    }

    pub fn conflict(context: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Conflict {
            context: context.into(),
            message: message.into(),
        }
    }

    pub fn internal(context: impl Into<String>, message: impl ToString) -> Self {
        Self::Internal {
            context: context.into(),
            message: message.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    pub fn is_unsupported(&self) -> bool {
        matches!(self, Self::Unsupported(_))
    }
}

/// Normalizes a rusqlite error raised while working on `context`.
pub(crate) fn interpret(context: impl Into<String>) -> impl FnOnce(rusqlite::Error) -> StorageError {
    let context = context.into();
    move |err| match err {
        rusqlite::Error::QueryReturnedNoRows => StorageError::not_found(context, "no rows"),
        rusqlite::Error::SqliteFailure(e, msg)
            if e.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            StorageError::conflict(context, msg.unwrap_or_else(|| e.to_string()))
        }
        other => StorageError::internal(context, other),
    }
}
