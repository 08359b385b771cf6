//! Authentication service.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use slotbook_client::{BookingApi, LoginData, Session};
use tracing::{debug, info};

use crate::{AuthContext, AuthError, Credentials, CredentialsId, CredentialsStore, Token, TokenStore};

/// Lifetime given to session cookies that arrive without an expiry.
pub const DEFAULT_SESSION_TTL: Duration = Duration::hours(1);

/// Produces live platform sessions for stored credentials.
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn authenticate(&self, credentials_id: &CredentialsId) -> Result<Session, AuthError>;
}

/// Token cache in front of the platform login.
pub struct AuthenticationService {
    tokens: TokenStore,
    credentials: CredentialsStore,
    api: Arc<dyn BookingApi>,
}

impl AuthenticationService {
    pub fn new(tokens: TokenStore, credentials: CredentialsStore, api: Arc<dyn BookingApi>) -> Self {
        Self {
            tokens,
            credentials,
            api,
        }
    }

    /// Log in with a login and password, remembering the credentials.
    ///
    /// Signing in again with a known login keeps its credentials ID and
    /// replaces the stored password.
    #[tracing::instrument(skip(self, password))]
    pub async fn sign_in(&self, login: &str, password: &str) -> Result<AuthContext, AuthError> {
        let id = match self.credentials.find_by_login(login)? {
            Some(existing) => existing.id,
            None => CredentialsId::generate(),
        };
        let credentials = Credentials {
            id,
            login: login.to_string(),
            password: password.to_string(),
        };

        self.login(&credentials).await?;
        self.credentials.insert(&credentials)?;

        info!(credentials_id = %credentials.id, "signed in");
        Ok(AuthContext::authenticated(credentials.id))
    }

    async fn login(&self, credentials: &Credentials) -> Result<Token, AuthError> {
        let cookie = self
            .api
            .login(&LoginData {
                login: credentials.login.clone(),
                password: credentials.password.clone(),
            })
            .await?;

        let token = Token {
            credentials_id: credentials.id.clone(),
            token: cookie.value,
            expires: cookie
                .expires
                .unwrap_or_else(|| Utc::now() + DEFAULT_SESSION_TTL),
        };
        self.tokens.insert(&token)?;
        Ok(token)
    }
}

#[async_trait]
impl Authenticator for AuthenticationService {
    async fn authenticate(&self, credentials_id: &CredentialsId) -> Result<Session, AuthError> {
        if let Some(token) = self.tokens.find_valid(credentials_id, Utc::now())? {
            debug!(credentials_id = %credentials_id, "using cached session token");
            return Ok(Session::new(token.token));
        }

        let credentials = self.credentials.find_by_id(credentials_id)?;
        let token = self.login(&credentials).await?;
        info!(credentials_id = %credentials_id, expires = %token.expires, "logged in");
        Ok(Session::new(token.token))
    }
}
