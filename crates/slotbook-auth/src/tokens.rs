//! Cached platform session tokens.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use slotbook_store::{KvOp, KvStore, StoreError, put_json};
use tracing::{debug, warn};

use crate::{AuthError, CredentialsId, EncryptionKey};

/// A session token obtained by logging in with some credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub credentials_id: CredentialsId,
    pub token: String,
    pub expires: DateTime<Utc>,
}

/// Stored form of [`Token`]; the session value is sealed.
#[derive(Serialize, Deserialize)]
struct EncodedToken {
    credentials_id: CredentialsId,
    token: String,
    expires: DateTime<Utc>,
}

/// Tokens persisted under `tokens/{credentials_id}/{expires_unix}`.
#[derive(Clone)]
pub struct TokenStore {
    kv: Arc<dyn KvStore>,
    key: EncryptionKey,
}

impl TokenStore {
    pub fn new(kv: Arc<dyn KvStore>, key: EncryptionKey) -> Self {
        Self { kv, key }
    }

    pub fn insert(&self, token: &Token) -> Result<(), AuthError> {
        let key = format!(
            "tokens/{}/{}",
            token.credentials_id,
            token.expires.timestamp()
        );
        let encoded = EncodedToken {
            credentials_id: token.credentials_id.clone(),
            token: self.key.seal(&token.token)?,
            expires: token.expires,
        };
        put_json(self.kv.as_ref(), &key, &encoded)?;
        Ok(())
    }

    /// First token for these credentials that has not expired at `now`.
    ///
    /// Tokens already expired at `now` are deleted on the way.
    pub fn find_valid(
        &self,
        credentials_id: &CredentialsId,
        now: DateTime<Utc>,
    ) -> Result<Option<Token>, AuthError> {
        let prefix = format!("tokens/{}/", credentials_id);
        let mut expired = Vec::new();
        let mut valid = None;
        for (key, value) in self.kv.scan_prefix(&prefix)? {
            let Some(expires) = key
                .rsplit('/')
                .next()
                .and_then(|ts| ts.parse::<i64>().ok())
                .and_then(|ts| DateTime::<Utc>::from_timestamp(ts, 0))
            else {
                warn!(key = %key, "skipping token with malformed key");
                continue;
            };

            if expires <= now {
                expired.push(KvOp::delete(key));
            } else if valid.is_none() {
                valid = Some(value);
            }
        }

        if !expired.is_empty() {
            debug!(
                credentials_id = %credentials_id,
                count = expired.len(),
                "pruning expired tokens"
            );
            if let Err(e) = self.kv.batch(expired) {
                warn!(error = %e, "failed to prune expired tokens");
            }
        }

        let Some(value) = valid else {
            return Ok(None);
        };
        let encoded: EncodedToken = serde_json::from_slice(&value).map_err(StoreError::from)?;
        Ok(Some(Token {
            credentials_id: encoded.credentials_id,
            token: self.key.open(&encoded.token)?,
            expires: encoded.expires,
        }))
    }
}
