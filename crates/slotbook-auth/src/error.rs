//! Error types for authentication.

use thiserror::Error;

use crate::CredentialsId;

/// Errors that can occur while authenticating.
#[derive(Debug, Error)]
pub enum AuthError {
    /// No credentials stored under this ID.
    #[error("credentials not found: {0}")]
    CredentialsNotFound(CredentialsId),

    /// Encryption key could not be parsed.
    #[error("invalid encryption key: {0}")]
    InvalidKey(String),

    /// Sealing a secret failed.
    #[error("failed to encrypt secret")]
    Encryption,

    /// A stored secret did not open with this key.
    #[error("failed to decrypt stored secret; wrong encryption key?")]
    Decryption,

    /// Booking platform error.
    #[error("login: {0}")]
    Api(#[from] slotbook_client::ApiError),

    /// Storage error.
    #[error("storage error: {0}")]
    Store(#[from] slotbook_store::StoreError),
}
