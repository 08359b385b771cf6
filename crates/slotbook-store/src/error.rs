//! Error types for the key-value store.

use thiserror::Error;

/// Errors that can occur in store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// SQLite error.
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A thread panicked while holding the store lock.
    #[error("store lock poisoned")]
    LockPoisoned,
}
