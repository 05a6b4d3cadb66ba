//! Error types for the Galantis client

use reqwest::StatusCode;
use thiserror::Error;

/// Main error type for the Galantis client
#[derive(Error, Debug)]
pub enum ClientError {
    /// Transport-level failure (connection refused, DNS, TLS, body read)
    #[error("Network error: {0}")]
    Network(String),

    /// The API answered with a non-success status
    #[error("Request failed with status {status}: {body}")]
    Status {
        /// HTTP status code
        status: StatusCode,
        /// Response body, truncated for display
        body: String,
    },

    /// The API rejected the credential and the request was already retried once
    #[error("Unauthorized: the API rejected the refreshed credential")]
    Unauthorized,

    /// Credential refresh failed; the session has been cleared
    #[error("Session expired: credential refresh failed: {0}")]
    RefreshFailed(String),

    /// A refresh was needed but no session is available
    #[error("Not authenticated. Log in or restore a session first.")]
    NotAuthenticated,

    /// The OAuth server returned an error body
    #[error("Token endpoint error: {0}")]
    TokenEndpoint(String),

    /// A response could not be interpreted
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// The request was cancelled through its cancellation token
    #[error("Request cancelled")]
    Cancelled,

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// JSON encode/decode error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for client operations
pub type Result<T> = std::result::Result<T, ClientError>;

impl ClientError {
    /// Create a network error
    pub fn network(msg: impl Into<String>) -> Self {
        Self::Network(msg.into())
    }

    /// Create a status error
    pub fn status(status: StatusCode, body: impl Into<String>) -> Self {
        Self::Status {
            status,
            body: body.into(),
        }
    }

    /// Create a refresh failure
    pub fn refresh_failed(msg: impl Into<String>) -> Self {
        Self::RefreshFailed(msg.into())
    }

    /// Create a token endpoint error
    pub fn token_endpoint(msg: impl Into<String>) -> Self {
        Self::TokenEndpoint(msg.into())
    }

    /// Create an invalid response error
    pub fn invalid_response(msg: impl Into<String>) -> Self {
        Self::InvalidResponse(msg.into())
    }

    /// Create an invalid configuration error
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Whether this error ended the session (caller should show the login screen)
    #[must_use]
    pub fn is_session_expired(&self) -> bool {
        matches!(self, Self::RefreshFailed(_) | Self::NotAuthenticated)
    }

    /// HTTP status carried by this error, if any
    #[must_use]
    pub fn status_code(&self) -> Option<StatusCode> {
        match self {
            Self::Status { status, .. } => Some(*status),
            Self::Unauthorized => Some(StatusCode::UNAUTHORIZED),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        Self::Network(err.to_string())
    }
}
