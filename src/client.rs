//! Authenticated API client
//!
//! [`ApiClient`] wraps an [`HttpTransport`] with:
//! - request interceptors (the [`BearerAuth`] interceptor is always first),
//! - 401 handling through the shared [`RefreshCoordinator`],
//! - a one-shot replay of the failed request with the new credential.
//!
//! ```text
//!  send(request)
//!     │ credential past expiry? ──► refresh first
//!     │ intercept (Authorization: Bearer <access>)
//!     ▼
//!  transport ──► non-401 ───────────────────────────────► returned as is
//!     │
//!     └─► 401, not yet retried
//!            │ store holds a token other than the one sent? ──► replay with it
//!            │ otherwise wait on the coordinator (single-flight refresh)
//!            ▼
//!         replay once ──► any response (401 included) ──► returned
//! ```
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use galantis_client::{ApiClient, ApiRequest, ClientConfig, CredentialStore};
//!
//! # async fn example() -> galantis_client::Result<()> {
//! let config = ClientConfig::from_env()?;
//! let store = Arc::new(CredentialStore::new());
//! let client = ApiClient::from_config(&config, store)?;
//!
//! let page: serde_json::Value = client
//!     .execute(ApiRequest::get("/events/").query("page", 1).query("page_size", 25))
//!     .await?;
//! println!("{page}");
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::config::{ClientConfig, DEFAULT_LOGIN_PATH, DEFAULT_REFRESH_TIMEOUT};
use crate::error::{ClientError, Result};
use crate::interceptor::{BearerAuth, RequestInterceptor};
use crate::navigator::{LogNavigator, Navigator};
use crate::oauth::{OAuthClient, ProxyRefresher, TokenRefresher};
use crate::refresh::RefreshCoordinator;
use crate::store::CredentialStore;
use crate::transport::{ApiRequest, ApiResponse, HttpTransport, ReqwestTransport};

/// Builder for [`ApiClient`]
pub struct ApiClientBuilder {
    base_url: String,
    store: Arc<CredentialStore>,
    transport: Option<Arc<dyn HttpTransport>>,
    refresher: Option<Arc<dyn TokenRefresher>>,
    navigator: Option<Arc<dyn Navigator>>,
    interceptors: Vec<Arc<dyn RequestInterceptor>>,
    login_path: String,
    refresh_timeout: Duration,
}

impl ApiClientBuilder {
    /// Create a builder for a client of the API at `base_url`
    pub fn new(base_url: impl Into<String>, store: Arc<CredentialStore>) -> Self {
        Self {
            base_url: base_url.into(),
            store,
            transport: None,
            refresher: None,
            navigator: None,
            interceptors: Vec::new(),
            login_path: DEFAULT_LOGIN_PATH.to_string(),
            refresh_timeout: DEFAULT_REFRESH_TIMEOUT,
        }
    }

    /// Use a custom transport (default: [`ReqwestTransport`])
    #[must_use]
    pub fn transport(mut self, transport: Arc<dyn HttpTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Set how credentials are refreshed (required)
    #[must_use]
    pub fn refresher(mut self, refresher: Arc<dyn TokenRefresher>) -> Self {
        self.refresher = Some(refresher);
        self
    }

    /// Set who is told to show the login screen (default: [`LogNavigator`])
    #[must_use]
    pub fn navigator(mut self, navigator: Arc<dyn Navigator>) -> Self {
        self.navigator = Some(navigator);
        self
    }

    /// Add an interceptor; runs after the bearer interceptor, in insertion order
    #[must_use]
    pub fn interceptor(mut self, interceptor: Arc<dyn RequestInterceptor>) -> Self {
        self.interceptors.push(interceptor);
        self
    }

    /// Login path handed to the navigator when the session ends
    #[must_use]
    pub fn login_path(mut self, path: impl Into<String>) -> Self {
        self.login_path = path.into();
        self
    }

    /// Upper bound on one refresh call
    #[must_use]
    pub fn refresh_timeout(mut self, timeout: Duration) -> Self {
        self.refresh_timeout = timeout;
        self
    }

    /// Build the client
    ///
    /// # Errors
    /// Returns `InvalidConfig` if no refresher was set.
    pub fn build(self) -> Result<ApiClient> {
        let refresher = self
            .refresher
            .ok_or_else(|| ClientError::invalid_config("a token refresher is required"))?;
        let navigator = self
            .navigator
            .unwrap_or_else(|| Arc::new(LogNavigator));
        let transport = self
            .transport
            .unwrap_or_else(|| Arc::new(ReqwestTransport::new()));

        let coordinator = Arc::new(RefreshCoordinator::new(
            self.store.clone(),
            refresher,
            navigator,
            self.login_path,
            self.refresh_timeout,
        ));

        let mut interceptors: Vec<Arc<dyn RequestInterceptor>> =
            vec![Arc::new(BearerAuth::new(self.store.clone()))];
        interceptors.extend(self.interceptors);

        Ok(ApiClient {
            base_url: self.base_url,
            transport,
            store: self.store,
            coordinator,
            interceptors,
        })
    }
}

/// HTTP client for the Galantis API with automatic credential refresh
#[derive(Clone)]
pub struct ApiClient {
    base_url: String,
    transport: Arc<dyn HttpTransport>,
    store: Arc<CredentialStore>,
    coordinator: Arc<RefreshCoordinator>,
    interceptors: Vec<Arc<dyn RequestInterceptor>>,
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("base_url", &self.base_url)
            .field("store", &self.store)
            .field("coordinator", &self.coordinator)
            .field("interceptors", &self.interceptors.len())
            .finish_non_exhaustive()
    }
}

impl ApiClient {
    /// Create a builder
    pub fn builder(base_url: impl Into<String>, store: Arc<CredentialStore>) -> ApiClientBuilder {
        ApiClientBuilder::new(base_url, store)
    }

    /// Create a client from configuration.
    ///
    /// Refreshes go through `refresh_proxy_url` when configured, otherwise
    /// straight to the token endpoint.
    ///
    /// # Errors
    /// Returns `InvalidConfig` if the configuration does not validate.
    pub fn from_config(config: &ClientConfig, store: Arc<CredentialStore>) -> Result<Self> {
        Self::from_config_with_navigator(config, store, Arc::new(LogNavigator))
    }

    /// Like [`from_config`](Self::from_config) with a custom navigator
    ///
    /// # Errors
    /// Returns `InvalidConfig` if the configuration does not validate.
    pub fn from_config_with_navigator(
        config: &ClientConfig,
        store: Arc<CredentialStore>,
        navigator: Arc<dyn Navigator>,
    ) -> Result<Self> {
        config.validate()?;

        let http_client = reqwest::Client::new();
        let refresher: Arc<dyn TokenRefresher> = match &config.refresh_proxy_url {
            Some(url) => Arc::new(ProxyRefresher::with_http_client(url, http_client.clone())),
            None => Arc::new(OAuthClient::with_http_client(config, http_client.clone())),
        };

        Self::builder(&config.api_url, store)
            .transport(Arc::new(ReqwestTransport::with_client(http_client)))
            .refresher(refresher)
            .navigator(navigator)
            .login_path(&config.login_path)
            .refresh_timeout(config.refresh_timeout)
            .build()
    }

    /// The credential store this client reads from
    #[must_use]
    pub fn store(&self) -> &Arc<CredentialStore> {
        &self.store
    }

    /// The refresh coordinator shared by all clones of this client
    #[must_use]
    pub fn coordinator(&self) -> &Arc<RefreshCoordinator> {
        &self.coordinator
    }

    /// API base URL
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn intercepted(&self, request: &ApiRequest) -> ApiRequest {
        let mut request = request.clone();
        for interceptor in &self.interceptors {
            interceptor.intercept(&mut request);
        }
        request
    }

    async fn dispatch(&self, request: &ApiRequest) -> Result<ApiResponse> {
        match request.cancellation() {
            Some(cancel) => {
                if cancel.is_cancelled() {
                    return Err(ClientError::Cancelled);
                }
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => Err(ClientError::Cancelled),
                    response = self.transport.send(&self.base_url, request) => response,
                }
            }
            None => self.transport.send(&self.base_url, request).await,
        }
    }

    /// Send a request, refreshing the credential and replaying once on 401.
    ///
    /// A credential already past its expiry is refreshed before the first
    /// send. Responses other than 401 are returned unchanged whatever their
    /// status; so is a 401 on the replay.
    ///
    /// # Errors
    /// `Network` on transport failure, `Cancelled` if the request's token
    /// fires, `RefreshFailed` if the session could not be refreshed.
    pub async fn send(&self, request: ApiRequest) -> Result<ApiResponse> {
        if self.store.current().is_some_and(|c| c.is_expired()) {
            tracing::debug!(path = %request.path, "Credential expired; refreshing before send");
            self.coordinator
                .refresh_with_cancel(request.cancellation())
                .await?;
        }

        let attempt = self.intercepted(&request);
        let response = self.dispatch(&attempt).await?;

        if !response.is_unauthorized() || attempt.is_retried() {
            return Ok(response);
        }

        // The header that actually went out decides whether the 401 is stale.
        let access_token = match self.store.current() {
            Some(current)
                if attempt.authorization() != Some(current.authorization_header().as_str()) =>
            {
                tracing::debug!(path = %request.path, "Credential changed while request was in flight; replaying");
                current.access_token
            }
            _ => {
                tracing::debug!(path = %request.path, "Request unauthorized; waiting for refresh");
                self.coordinator
                    .refresh_with_cancel(request.cancellation())
                    .await?
            }
        };

        if request.is_cancelled() {
            return Err(ClientError::Cancelled);
        }

        let mut replay = self.intercepted(&request);
        replay.mark_retried();
        replay.set_bearer(&access_token);
        self.dispatch(&replay).await
    }

    /// Send a request and decode a successful JSON body
    ///
    /// # Errors
    /// As [`send`](Self::send), plus `Unauthorized`/`Status` for non-2xx
    /// responses and `Json` for undecodable bodies.
    pub async fn execute<T: DeserializeOwned>(&self, request: ApiRequest) -> Result<T> {
        self.send(request).await?.error_for_status()?.json()
    }

    /// `GET path` and decode the JSON body
    ///
    /// # Errors
    /// As [`execute`](Self::execute).
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.execute(ApiRequest::get(path)).await
    }

    /// `POST path` with a JSON body and decode the JSON reply
    ///
    /// # Errors
    /// As [`execute`](Self::execute).
    pub async fn post<B, T>(&self, path: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.execute(ApiRequest::post(path).json(body)?).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credential::Credential;
    use async_trait::async_trait;

    struct NeverRefresh;

    #[async_trait]
    impl TokenRefresher for NeverRefresh {
        async fn refresh(&self, _refresh_token: &str) -> Result<Credential> {
            Err(ClientError::token_endpoint("not in this test"))
        }
    }

    #[test]
    fn test_builder_requires_refresher() {
        let store = Arc::new(CredentialStore::new());
        let result = ApiClient::builder("https://api.galantis.test", store).build();
        assert!(matches!(result, Err(ClientError::InvalidConfig(_))));
    }

    #[test]
    fn test_builder_puts_bearer_first() {
        let store = Arc::new(CredentialStore::new());
        store.set_credential("at", "rt");
        let client = ApiClient::builder("https://api.galantis.test", store)
            .refresher(Arc::new(NeverRefresh))
            .interceptor(Arc::new(|req: &mut ApiRequest| {
                // Later interceptors see the header the bearer interceptor set.
                let seen = req.authorization().unwrap_or("none").to_string();
                req.query.push(("seen".to_string(), seen));
            }))
            .build()
            .unwrap();

        let request = client.intercepted(&ApiRequest::get("/events"));
        assert_eq!(
            request.query,
            vec![("seen".to_string(), "Bearer at".to_string())]
        );
    }

    #[test]
    fn test_from_config_rejects_invalid() {
        let config = ClientConfig::builder()
            .api_url("nope")
            .oauth_url("https://oauth.galantis.test")
            .client_id("dashboard")
            .build();
        let store = Arc::new(CredentialStore::new());
        assert!(ApiClient::from_config(&config, store).is_err());
    }
}
