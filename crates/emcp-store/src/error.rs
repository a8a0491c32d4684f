//! Store error types.

use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors from transaction store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backend rejected or failed an operation.
    #[error("Store operation failed: {operation}: {message}")]
    Backend {
        /// The operation that failed (e.g., "hset", "connect").
        operation: String,
        /// Error message.
        message: String,
    },

    /// An update targeted a row that does not exist.
    #[error("{kind} not found: {key}")]
    NotFound {
        /// Row kind ("transaction", "device status").
        kind: &'static str,
        /// The row key.
        key: String,
    },

    /// A stored row could not be decoded.
    #[error("Corrupt row {key}: {message}")]
    Corrupt {
        /// The row key.
        key: String,
        /// What was wrong with it.
        message: String,
    },

    /// JSON encoding of a record failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// Creates a backend error.
    pub fn backend(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Backend {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Creates a corrupt row error.
    pub fn corrupt(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Corrupt {
            key: key.into(),
            message: message.into(),
        }
    }

    /// Returns true if retrying the operation later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Backend { .. })
    }
}

#[cfg(feature = "redis")]
impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        StoreError::backend("redis", err.to_string())
    }
}
