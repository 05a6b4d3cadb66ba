//! Session bootstrap and lifecycle
//!
//! [`restore_session`] installs a persisted credential pair into the store at
//! startup. [`Session`] bundles the store, API client, OAuth client and route
//! guard that one signed-in dashboard user needs, and implements login and
//! logout on top of them.

use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};

use crate::client::ApiClient;
use crate::config::ClientConfig;
use crate::error::Result;
use crate::guard::RouteGuard;
use crate::navigator::{LogNavigator, Navigator};
use crate::oauth::OAuthClient;
use crate::persist::{PersistError, SessionPersistence};
use crate::store::CredentialStore;
use crate::utils::join_url;

/// Restore a persisted session into `store`.
///
/// Returns `true` if both tokens were found and installed. Storage errors and
/// half-written sessions are logged and treated as "no session"; the store is
/// left cleared in that case.
pub fn restore_session(store: &CredentialStore, persistence: &dyn SessionPersistence) -> bool {
    let persisted = match persistence.load() {
        Ok(persisted) => persisted,
        Err(e) => {
            tracing::warn!("Could not read persisted session: {e}");
            store.clear_credential();
            return false;
        }
    };

    if let Some((access_token, refresh_token)) = persisted.pair() {
        store.set_credential(access_token, refresh_token);
        tracing::debug!("Restored persisted session");
        return true;
    }

    if persisted.access_token.is_some() || persisted.refresh_token.is_some() {
        let e = PersistError::Malformed("only one of the two tokens is present".to_string());
        tracing::warn!("Ignoring persisted session: {e}");
        store.clear_credential();
    } else {
        tracing::debug!("No persisted session found");
    }
    false
}

/// Profile of the signed-in user as returned by the `/me` endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    /// User ID
    pub id: serde_json::Value,
    /// Login email
    #[serde(default)]
    pub email: Option<String>,
    /// Given name
    #[serde(default)]
    pub first_name: Option<String>,
    /// Family name
    #[serde(default)]
    pub last_name: Option<String>,
    /// Role names
    #[serde(default)]
    pub user_roles: Vec<String>,
    /// Capability flags keyed by name
    #[serde(default)]
    pub capabilities: serde_json::Map<String, serde_json::Value>,
}

impl UserProfile {
    /// Whether the user has the named role
    #[must_use]
    pub fn has_role(&self, role: &str) -> bool {
        self.user_roles.iter().any(|r| r == role)
    }

    /// Whether the user has the named capability
    #[must_use]
    pub fn has_capability(&self, capability: &str) -> bool {
        self.capabilities.contains_key(capability)
    }
}

/// Everything one dashboard session needs, wired together
#[derive(Clone)]
pub struct Session {
    store: Arc<CredentialStore>,
    persistence: Arc<dyn SessionPersistence>,
    client: ApiClient,
    oauth: OAuthClient,
    guard: RouteGuard,
    profile_url: String,
    profile: Arc<RwLock<Option<UserProfile>>>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("client", &self.client)
            .field("guard", &self.guard)
            .field("profile_url", &self.profile_url)
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Build a session and restore any persisted credential
    ///
    /// # Errors
    /// Returns `InvalidConfig` if the configuration does not validate.
    pub fn bootstrap(config: &ClientConfig, persistence: Arc<dyn SessionPersistence>) -> Result<Self> {
        Self::bootstrap_with_navigator(config, persistence, Arc::new(LogNavigator))
    }

    /// Like [`bootstrap`](Self::bootstrap) with a custom navigator
    ///
    /// # Errors
    /// Returns `InvalidConfig` if the configuration does not validate.
    pub fn bootstrap_with_navigator(
        config: &ClientConfig,
        persistence: Arc<dyn SessionPersistence>,
        navigator: Arc<dyn Navigator>,
    ) -> Result<Self> {
        let store = Arc::new(CredentialStore::with_persistence(persistence.clone()));
        let client = ApiClient::from_config_with_navigator(config, store.clone(), navigator)?;
        Ok(Self::assemble(config, store, persistence, client))
    }

    /// Assemble a session from an existing client; restores the persisted credential
    #[must_use]
    pub fn assemble(
        config: &ClientConfig,
        store: Arc<CredentialStore>,
        persistence: Arc<dyn SessionPersistence>,
        client: ApiClient,
    ) -> Self {
        restore_session(&store, persistence.as_ref());

        Self {
            guard: RouteGuard::new(store.clone(), &config.login_path, &config.home_path),
            oauth: OAuthClient::new(config),
            profile_url: join_url(&config.oauth_url, "me"),
            store,
            persistence,
            client,
            profile: Arc::new(RwLock::new(None)),
        }
    }

    /// The credential store
    #[must_use]
    pub fn store(&self) -> &Arc<CredentialStore> {
        &self.store
    }

    /// The authenticated API client
    #[must_use]
    pub fn client(&self) -> &ApiClient {
        &self.client
    }

    /// The route guard
    #[must_use]
    pub fn guard(&self) -> &RouteGuard {
        &self.guard
    }

    /// Whether a credential is present
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.store.is_authenticated()
    }

    /// Re-read the persisted credential (e.g. after another process logged in)
    pub fn reload(&self) -> bool {
        restore_session(&self.store, self.persistence.as_ref())
    }

    /// Profile kept by the last [`fetch_user_profile`](Self::fetch_user_profile),
    /// while the session is still authenticated
    #[must_use]
    pub fn profile(&self) -> Option<UserProfile> {
        if !self.store.is_authenticated() {
            return None;
        }
        self.profile
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_profile(&self, profile: Option<UserProfile>) {
        *self.profile.write().unwrap_or_else(PoisonError::into_inner) = profile;
    }

    /// Log in with username and password
    ///
    /// # Errors
    /// Returns `TokenEndpoint` if the server rejects the credentials.
    pub async fn login(&self, username: &str, password: &str) -> Result<()> {
        let credential = self.oauth.login(username, password).await?;
        self.set_profile(None);
        self.store.set(credential);
        tracing::info!("Logged in");
        Ok(())
    }

    /// Complete an authorization-code login
    ///
    /// # Errors
    /// Returns `TokenEndpoint` if the code is rejected.
    pub async fn exchange_code(&self, code: &str) -> Result<()> {
        let credential = self.oauth.exchange_code(code).await?;
        self.set_profile(None);
        self.store.set(credential);
        tracing::info!("Logged in with authorization code");
        Ok(())
    }

    /// Revoke the access token (best effort) and clear the local session,
    /// cached profile included. The local session is cleared even if
    /// revocation fails.
    pub async fn logout(&self) {
        if let Some(access_token) = self.store.access_token() {
            if let Err(e) = self.oauth.revoke(&access_token).await {
                tracing::warn!("Error during logout: {e}");
            }
        }
        self.store.clear_credential();
        self.set_profile(None);
        tracing::info!("Logged out");
    }

    /// Fetch the signed-in user's profile through the authenticated client
    /// and keep it for [`profile`](Self::profile)
    ///
    /// # Errors
    /// Any client error; `RefreshFailed` if the session could not be refreshed.
    pub async fn fetch_user_profile(&self) -> Result<UserProfile> {
        let profile: UserProfile = self.client.get(&self.profile_url).await?;
        self.set_profile(Some(profile.clone()));
        Ok(profile)
    }
}
