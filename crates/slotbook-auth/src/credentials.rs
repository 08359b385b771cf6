//! Stored platform credentials.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use slotbook_store::{KvOp, KvStore, StoreError, get_json};

use crate::{AuthError, EncryptionKey};

/// Identifier of a stored credential; also the owner identity of jobs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CredentialsId(String);

impl CredentialsId {
    /// Generate a fresh random ID.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CredentialsId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CredentialsId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for CredentialsId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Login and password for the booking platform.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub id: CredentialsId,
    pub login: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("id", &self.id)
            .field("login", &self.login)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Stored form of [`Credentials`]; the password is sealed.
#[derive(Serialize, Deserialize)]
struct EncodedCredentials {
    id: CredentialsId,
    login: String,
    password: String,
}

/// Credentials persisted under `credentials/{id}` with a `logins/{login}`
/// lookup key pointing back at the ID.
#[derive(Clone)]
pub struct CredentialsStore {
    kv: Arc<dyn KvStore>,
    key: EncryptionKey,
}

impl CredentialsStore {
    pub fn new(kv: Arc<dyn KvStore>, key: EncryptionKey) -> Self {
        Self { kv, key }
    }

    /// Insert or replace credentials.
    pub fn insert(&self, credentials: &Credentials) -> Result<(), AuthError> {
        let encoded = EncodedCredentials {
            id: credentials.id.clone(),
            login: credentials.login.clone(),
            password: self.key.seal(&credentials.password)?,
        };
        let data = serde_json::to_vec(&encoded).map_err(StoreError::from)?;
        self.kv.batch(vec![
            KvOp::put(id_key(&credentials.id), data),
            KvOp::put(
                login_key(&credentials.login),
                credentials.id.as_str().as_bytes().to_vec(),
            ),
        ])?;
        Ok(())
    }

    pub fn find_by_id(&self, id: &CredentialsId) -> Result<Credentials, AuthError> {
        self.load(id)?
            .ok_or_else(|| AuthError::CredentialsNotFound(id.clone()))
    }

    /// Returns `None` when no credentials use this login.
    pub fn find_by_login(&self, login: &str) -> Result<Option<Credentials>, AuthError> {
        let Some(raw_id) = self.kv.get(&login_key(login))? else {
            return Ok(None);
        };
        let id = CredentialsId(String::from_utf8_lossy(&raw_id).into_owned());
        self.load(&id)
    }

    fn load(&self, id: &CredentialsId) -> Result<Option<Credentials>, AuthError> {
        let Some(encoded) = get_json::<EncodedCredentials>(self.kv.as_ref(), &id_key(id))? else {
            return Ok(None);
        };
        Ok(Some(Credentials {
            id: encoded.id,
            login: encoded.login,
            password: self.key.open(&encoded.password)?,
        }))
    }
}

fn id_key(id: &CredentialsId) -> String {
    format!("credentials/{}", id)
}

fn login_key(login: &str) -> String {
    format!("logins/{}", login)
}
