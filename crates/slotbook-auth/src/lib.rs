//! Authentication for Slotbook.
//!
//! Turns a stored credential into a live booking platform session,
//! transparently logging in when no cached token is still valid.
//! Passwords and session tokens are stored encrypted with an
//! [`EncryptionKey`].

mod context;
mod credentials;
mod error;
mod key;
mod service;
mod tokens;

pub use context::AuthContext;
pub use credentials::{Credentials, CredentialsId, CredentialsStore};
pub use error::AuthError;
pub use key::EncryptionKey;
pub use service::{AuthenticationService, Authenticator, DEFAULT_SESSION_TTL};
pub use tokens::{Token, TokenStore};
