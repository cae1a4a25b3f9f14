use thiserror::Error;

/// Errors produced by the persistence layer.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying SQLite failure.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Could not obtain a pooled connection.
    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    /// A stored row could not be decoded back into domain types.
    #[error("corrupt stored row: {0}")]
    Corrupt(String),

    /// Payload serialization failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The store could not be reached at all. Callers degrade to
    /// memory-only operation rather than failing the session.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}
