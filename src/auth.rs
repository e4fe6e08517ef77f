//! Bearer credential sources.
//!
//! The dispatcher reads a [`CredentialProvider`] on every call flagged as
//! requiring authentication. Issuing or refreshing tokens is left to a
//! collaborator: it reacts to [`DispatchError::is_unauthorized`] and writes
//! the new token into a [`SharedCredentials`] handle.
//!
//! [`DispatchError::is_unauthorized`]: crate::error::DispatchError::is_unauthorized

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::{Arc, RwLock};

/// A bearer token with an optional expiry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    token: String,
    expires_at: Option<DateTime<Utc>>,
}

impl Credential {
    pub fn bearer(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            expires_at: None,
        }
    }

    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    /// A credential is usable when the token is not blank and has not
    /// expired at `now`.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        !self.token.trim().is_empty() && self.expires_at.map_or(true, |exp| exp > now)
    }
}

/// Source of the process-wide credential.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Current credential, if any. Validity is checked by the caller.
    async fn credential(&self) -> Option<Credential>;
}

/// Provider for deployments without authentication.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoCredentials;

#[async_trait]
impl CredentialProvider for NoCredentials {
    async fn credential(&self) -> Option<Credential> {
        None
    }
}

/// Reads a bearer token from an environment variable at call time.
#[derive(Debug, Clone)]
pub struct EnvCredentials {
    var: String,
}

impl EnvCredentials {
    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }

    pub fn var(&self) -> &str {
        &self.var
    }
}

#[async_trait]
impl CredentialProvider for EnvCredentials {
    async fn credential(&self) -> Option<Credential> {
        std::env::var(&self.var).ok().map(Credential::bearer)
    }
}

/// Cloneable handle to a credential shared by every dispatcher in the
/// process.
///
/// All clones observe the same value, so a refresh performed through one
/// handle is seen by the next authenticated call on any dispatcher.
#[derive(Debug, Clone, Default)]
pub struct SharedCredentials {
    inner: Arc<RwLock<Option<Credential>>>,
}

impl SharedCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_credential(credential: Credential) -> Self {
        let shared = Self::new();
        shared.set(credential);
        shared
    }

    pub fn set(&self, credential: Credential) {
        let mut guard = self.inner.write().unwrap_or_else(|e| e.into_inner());
        *guard = Some(credential);
    }

    pub fn clear(&self) {
        let mut guard = self.inner.write().unwrap_or_else(|e| e.into_inner());
        *guard = None;
    }

    pub fn current(&self) -> Option<Credential> {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl CredentialProvider for SharedCredentials {
    async fn credential(&self) -> Option<Credential> {
        self.current()
    }
}
