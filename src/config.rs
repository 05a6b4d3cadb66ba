//! Client configuration
//!
//! Build a [`ClientConfig`] with its builder, or load one from `GALANTIS_*`
//! environment variables with [`ClientConfig::from_env`].

use std::time::Duration;
use typed_builder::TypedBuilder;

use crate::error::{ClientError, Result};

/// Default bound on a single refresh call
pub const DEFAULT_REFRESH_TIMEOUT: Duration = Duration::from_secs(30);
/// Default login entry point
pub const DEFAULT_LOGIN_PATH: &str = "/auth/login";
/// Default landing page for authenticated users
pub const DEFAULT_HOME_PATH: &str = "/my-events";

const ENV_API_URL: &str = "GALANTIS_API_URL";
const ENV_OAUTH_URL: &str = "GALANTIS_OAUTH_URL";
const ENV_CLIENT_ID: &str = "GALANTIS_CLIENT_ID";
const ENV_CLIENT_SECRET: &str = "GALANTIS_CLIENT_SECRET";
const ENV_REDIRECT_URI: &str = "GALANTIS_REDIRECT_URI";
const ENV_REFRESH_PROXY_URL: &str = "GALANTIS_REFRESH_PROXY_URL";
const ENV_REFRESH_TIMEOUT_SECS: &str = "GALANTIS_REFRESH_TIMEOUT_SECS";

/// Endpoints, OAuth client identity and session behaviour
#[derive(Clone, TypedBuilder)]
#[builder(
    builder_method(doc = "Create a new builder for ClientConfig"),
    builder_type(doc = "Builder for ClientConfig", vis = "pub"),
    build_method(doc = "Build the ClientConfig")
)]
pub struct ClientConfig {
    /// Base URL of the Galantis API
    #[builder(setter(into))]
    pub api_url: String,

    /// Base URL of the OAuth server (`/token`, `/destroy/` live under it)
    #[builder(setter(into))]
    pub oauth_url: String,

    /// OAuth client ID
    #[builder(setter(into))]
    pub client_id: String,

    /// OAuth client secret; only needed when talking to the token endpoint directly
    #[builder(default, setter(strip_option, into))]
    pub client_secret: Option<String>,

    /// Redirect URI registered for the authorization-code grant
    #[builder(default, setter(strip_option, into))]
    pub redirect_uri: Option<String>,

    /// Server-side refresh route. When set, refreshes go through it instead of
    /// the token endpoint, keeping the client secret off this process.
    #[builder(default, setter(strip_option, into))]
    pub refresh_proxy_url: Option<String>,

    /// Upper bound on one refresh call
    #[builder(default = DEFAULT_REFRESH_TIMEOUT)]
    pub refresh_timeout: Duration,

    /// Where to send the user when the session ends
    #[builder(default = DEFAULT_LOGIN_PATH.to_string(), setter(into))]
    pub login_path: String,

    /// Where to send an authenticated user who opens the login page
    #[builder(default = DEFAULT_HOME_PATH.to_string(), setter(into))]
    pub home_path: String,
}

impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("api_url", &self.api_url)
            .field("oauth_url", &self.oauth_url)
            .field("client_id", &self.client_id)
            .field("client_secret", &self.client_secret.as_ref().map(|_| "<redacted>"))
            .field("redirect_uri", &self.redirect_uri)
            .field("refresh_proxy_url", &self.refresh_proxy_url)
            .field("refresh_timeout", &self.refresh_timeout)
            .field("login_path", &self.login_path)
            .field("home_path", &self.home_path)
            .finish()
    }
}

impl ClientConfig {
    /// Load configuration from `GALANTIS_*` environment variables
    ///
    /// # Errors
    /// Returns `InvalidConfig` if a required variable is missing or a value is invalid.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup
    ///
    /// # Errors
    /// Returns `InvalidConfig` if a required key is missing or a value is invalid.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let require = |key: &str| {
            get(key).ok_or_else(|| ClientError::invalid_config(format!("{key} is not set")))
        };

        let refresh_timeout = match get(ENV_REFRESH_TIMEOUT_SECS) {
            Some(raw) => raw
                .trim()
                .parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|e| {
                    ClientError::invalid_config(format!("{ENV_REFRESH_TIMEOUT_SECS}={raw:?}: {e}"))
                })?,
            None => DEFAULT_REFRESH_TIMEOUT,
        };

        let config = Self {
            api_url: require(ENV_API_URL)?,
            oauth_url: require(ENV_OAUTH_URL)?,
            client_id: require(ENV_CLIENT_ID)?,
            client_secret: get(ENV_CLIENT_SECRET),
            redirect_uri: get(ENV_REDIRECT_URI),
            refresh_proxy_url: get(ENV_REFRESH_PROXY_URL),
            refresh_timeout,
            login_path: DEFAULT_LOGIN_PATH.to_string(),
            home_path: DEFAULT_HOME_PATH.to_string(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Check URLs and timeouts
    ///
    /// # Errors
    /// Returns `InvalidConfig` describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        check_url("api_url", &self.api_url)?;
        check_url("oauth_url", &self.oauth_url)?;
        if let Some(proxy) = &self.refresh_proxy_url {
            check_url("refresh_proxy_url", proxy)?;
        }
        if self.client_id.trim().is_empty() {
            return Err(ClientError::invalid_config("client_id is empty"));
        }
        if self.refresh_timeout.is_zero() {
            return Err(ClientError::invalid_config("refresh_timeout must be non-zero"));
        }
        if !self.login_path.starts_with('/') {
            return Err(ClientError::invalid_config("login_path must start with '/'"));
        }
        Ok(())
    }
}

fn check_url(field: &str, value: &str) -> Result<()> {
    let url = reqwest::Url::parse(value)
        .map_err(|e| ClientError::invalid_config(format!("{field} {value:?}: {e}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ClientError::invalid_config(format!(
            "{field} must be http or https, got {}",
            url.scheme()
        )));
    }
    Ok(())
}
