//! Storage-specific error types.
//!
//! All storage operations return [`StorageError`] on failure, which can be
//! matched to determine the underlying cause (database, channel, encoding, etc.).

use thiserror::Error;

/// Errors that can occur in the storage layer.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Database operation failed, including a write transaction that could not commit.
    #[error("database error: {0}")]
    Database(#[from] duckdb::Error),

    /// Failed to send command to writer actor.
    #[error("failed to send command to writer actor")]
    ChannelSend,

    /// JSON serialization/deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Internal error (e.g., thread spawn or join failure).
    #[error("internal error: {0}")]
    Internal(String),

    /// Invalid data in database (e.g., malformed key).
    #[error("invalid data: {0}")]
    InvalidData(String),
}
