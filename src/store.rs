//! Credential store: the single source of truth for the session credential
//!
//! The store is an explicitly constructed service shared as
//! `Arc<CredentialStore>` between the [`ApiClient`](crate::ApiClient), the
//! [`RefreshCoordinator`](crate::RefreshCoordinator) and the
//! [`RouteGuard`](crate::RouteGuard). `is_authenticated` is computed on every
//! read, so a reader can never observe a stale flag.
//!
//! When a [`SessionPersistence`] is attached, every update is written through
//! to it. Persistence failures are logged and swallowed: store operations
//! themselves never fail.

use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::credential::{Credential, bearer};
use crate::persist::SessionPersistence;

/// Holds the current credential pair
#[derive(Default)]
pub struct CredentialStore {
    credential: RwLock<Option<Credential>>,
    persistence: Option<Arc<dyn SessionPersistence>>,
}

impl std::fmt::Debug for CredentialStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialStore")
            .field("authenticated", &self.is_authenticated())
            .field("persistent", &self.persistence.is_some())
            .finish()
    }
}

impl CredentialStore {
    /// Create an empty, memory-only store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty store that writes every update through to `persistence`
    #[must_use]
    pub fn with_persistence(persistence: Arc<dyn SessionPersistence>) -> Self {
        Self {
            credential: RwLock::new(None),
            persistence: Some(persistence),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Option<Credential>> {
        self.credential
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Option<Credential>> {
        self.credential
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Store an access/refresh pair with no known expiry
    pub fn set_credential(&self, access_token: impl Into<String>, refresh_token: impl Into<String>) {
        self.set(Credential::new(access_token, refresh_token));
    }

    /// Store a credential, replacing any previous one
    pub fn set(&self, credential: Credential) {
        if let Some(persistence) = &self.persistence {
            if let Err(e) = persistence.save(&credential.access_token, &credential.refresh_token) {
                tracing::warn!("Failed to persist session credential: {e}");
            }
        }
        *self.write() = Some(credential);
        tracing::debug!("Credential updated");
    }

    /// Drop the current credential. Safe to call when already cleared.
    pub fn clear_credential(&self) {
        let previous = self.write().take();
        if let Some(persistence) = &self.persistence {
            if let Err(e) = persistence.clear() {
                tracing::warn!("Failed to clear persisted session: {e}");
            }
        }
        if previous.is_some() {
            tracing::debug!("Credential cleared");
        }
    }

    /// True iff an access credential is present
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.read().is_some()
    }

    /// Current access token
    #[must_use]
    pub fn access_token(&self) -> Option<String> {
        self.read().as_ref().map(|c| c.access_token.clone())
    }

    /// Current refresh token
    #[must_use]
    pub fn refresh_token(&self) -> Option<String> {
        self.read().as_ref().map(|c| c.refresh_token.clone())
    }

    /// Snapshot of the current credential
    #[must_use]
    pub fn current(&self) -> Option<Credential> {
        self.read().clone()
    }

    /// `Bearer <access>` for the current credential
    #[must_use]
    pub fn authorization_header(&self) -> Option<String> {
        self.read().as_ref().map(|c| bearer(&c.access_token))
    }
}
