//! The caller's authenticated identity.

use crate::CredentialsId;

/// Identity of whoever is making a request.
///
/// Handlers build one from the request's session; everything that must act
/// on behalf of a user (job creation, ownership checks) reads it from here.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthContext {
    identity: Option<CredentialsId>,
}

impl AuthContext {
    /// A caller that has not signed in.
    pub fn anonymous() -> Self {
        Self { identity: None }
    }

    /// A caller signed in as `credentials_id`.
    pub fn authenticated(credentials_id: CredentialsId) -> Self {
        Self {
            identity: Some(credentials_id),
        }
    }

    pub fn identity(&self) -> Option<&CredentialsId> {
        self.identity.as_ref()
    }

    /// True when the caller is signed in as `owner`.
    pub fn is(&self, owner: &CredentialsId) -> bool {
        self.identity.as_ref() == Some(owner)
    }
}
