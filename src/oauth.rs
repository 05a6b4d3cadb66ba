//! OAuth token endpoint client
//!
//! Talks to the OAuth server's `/token` and `/destroy/` endpoints with
//! form-encoded grants, and to an optional server-side refresh proxy that
//! keeps the client secret out of this process.
//!
//! Refreshing goes through the [`TokenRefresher`] trait so the
//! [`RefreshCoordinator`](crate::RefreshCoordinator) does not care which of
//! the two routes is in use.

use async_trait::async_trait;
use serde::Deserialize;

use crate::config::ClientConfig;
use crate::credential::{Credential, TokenResponse};
use crate::error::{ClientError, Result};
use crate::utils::{body_for_display, join_url};

/// Error response from the token endpoint
#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

/// Exchanges a refresh token for a new credential
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    /// Perform one refresh call
    ///
    /// # Errors
    /// Any error fails the refresh and ends the session.
    async fn refresh(&self, refresh_token: &str) -> Result<Credential>;
}

/// Turn a token endpoint reply into a credential.
///
/// OAuth error bodies win over the status code; a 2xx body that is not a
/// token response is `InvalidResponse`.
fn parse_token_reply(
    status: reqwest::StatusCode,
    body: &[u8],
    previous_refresh: Option<&str>,
) -> Result<Credential> {
    if let Ok(error) = serde_json::from_slice::<ErrorResponse>(body) {
        let msg = error.error_description.unwrap_or(error.error);
        return Err(ClientError::token_endpoint(msg));
    }

    if !status.is_success() {
        return Err(ClientError::token_endpoint(format!(
            "status {status}: {}",
            body_for_display(body)
        )));
    }

    let response: TokenResponse = serde_json::from_slice(body).map_err(|e| {
        ClientError::invalid_response(format!("Failed to parse token response: {e}"))
    })?;

    Credential::from_token_response(response, previous_refresh)
        .ok_or_else(|| ClientError::invalid_response("Token response carries no refresh token"))
}

/// Client for the OAuth server
#[derive(Debug, Clone)]
pub struct OAuthClient {
    token_url: String,
    destroy_url: String,
    client_id: String,
    client_secret: Option<String>,
    redirect_uri: Option<String>,
    http_client: reqwest::Client,
}

impl OAuthClient {
    /// Create a client from the OAuth part of `config`
    #[must_use]
    pub fn new(config: &ClientConfig) -> Self {
        Self::with_http_client(config, reqwest::Client::new())
    }

    /// Create a client sharing an existing `reqwest::Client`
    #[must_use]
    pub fn with_http_client(config: &ClientConfig, http_client: reqwest::Client) -> Self {
        Self {
            token_url: join_url(&config.oauth_url, "token"),
            destroy_url: join_url(&config.oauth_url, "destroy/"),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            redirect_uri: config.redirect_uri.clone(),
            http_client,
        }
    }

    /// Token endpoint URL
    #[must_use]
    pub fn token_url(&self) -> &str {
        &self.token_url
    }

    async fn token_grant(
        &self,
        mut params: Vec<(&'static str, String)>,
        previous_refresh: Option<&str>,
    ) -> Result<Credential> {
        params.push(("client_id", self.client_id.clone()));
        if let Some(secret) = &self.client_secret {
            params.push(("client_secret", secret.clone()));
        }

        let response = self
            .http_client
            .post(&self.token_url)
            .form(&params)
            .send()
            .await?;
        let status = response.status();
        let body = response.bytes().await?;

        parse_token_reply(status, &body, previous_refresh)
    }

    /// Resource-owner password grant
    ///
    /// # Errors
    /// Returns `TokenEndpoint` if the server rejects the credentials.
    pub async fn login(&self, username: &str, password: &str) -> Result<Credential> {
        tracing::debug!("Requesting token with password grant");
        self.token_grant(
            vec![
                ("grant_type", "password".to_string()),
                ("username", username.to_string()),
                ("password", password.to_string()),
            ],
            None,
        )
        .await
    }

    /// Authorization-code grant
    ///
    /// # Errors
    /// Returns `InvalidConfig` without a redirect URI, `TokenEndpoint` if the
    /// server rejects the code.
    pub async fn exchange_code(&self, code: &str) -> Result<Credential> {
        let redirect_uri = self.redirect_uri.clone().ok_or_else(|| {
            ClientError::invalid_config("redirect_uri is required for the authorization-code grant")
        })?;

        tracing::debug!("Exchanging authorization code for tokens");
        self.token_grant(
            vec![
                ("grant_type", "authorization_code".to_string()),
                ("code", code.to_string()),
                ("redirect_uri", redirect_uri),
            ],
            None,
        )
        .await
    }

    /// Refresh-token grant
    ///
    /// # Errors
    /// Returns `TokenEndpoint` if the refresh token is rejected.
    pub async fn refresh_token(&self, refresh_token: &str) -> Result<Credential> {
        self.token_grant(
            vec![
                ("grant_type", "refresh_token".to_string()),
                ("refresh_token", refresh_token.to_string()),
            ],
            Some(refresh_token),
        )
        .await
    }

    /// Revoke an access token (`POST /destroy/`)
    ///
    /// # Errors
    /// Returns an error if the server cannot be reached or refuses.
    pub async fn revoke(&self, access_token: &str) -> Result<()> {
        let response = self
            .http_client
            .post(&self.destroy_url)
            .json(&serde_json::json!({ "token": access_token }))
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            let body = response.bytes().await.unwrap_or_default();
            Err(ClientError::status(status, body_for_display(&body)))
        }
    }
}

#[async_trait]
impl TokenRefresher for OAuthClient {
    async fn refresh(&self, refresh_token: &str) -> Result<Credential> {
        self.refresh_token(refresh_token).await
    }
}

/// Refreshes through a server-side route that holds the client secret.
///
/// Sends `{"refresh_token": ...}` as JSON and expects the token endpoint's
/// response shape back.
#[derive(Debug, Clone)]
pub struct ProxyRefresher {
    url: String,
    http_client: reqwest::Client,
}

impl ProxyRefresher {
    /// Create a refresher posting to `url`
    pub fn new(url: impl Into<String>) -> Self {
        Self::with_http_client(url, reqwest::Client::new())
    }

    /// Create a refresher sharing an existing `reqwest::Client`
    pub fn with_http_client(url: impl Into<String>, http_client: reqwest::Client) -> Self {
        Self {
            url: url.into(),
            http_client,
        }
    }
}

#[async_trait]
impl TokenRefresher for ProxyRefresher {
    async fn refresh(&self, refresh_token: &str) -> Result<Credential> {
        let response = self
            .http_client
            .post(&self.url)
            .json(&serde_json::json!({ "refresh_token": refresh_token }))
            .send()
            .await?;
        let status = response.status();
        let body = response.bytes().await?;

        parse_token_reply(status, &body, Some(refresh_token))
    }
}
