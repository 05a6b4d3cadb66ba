//! Credential pair and token endpoint response

use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Seconds before `expires_at` at which a credential already counts as expired
const EXPIRY_SKEW_SECS: u64 = 60;

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_secs()
}

/// Access/refresh credential pair held by the [`CredentialStore`](crate::CredentialStore)
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    /// Short-lived bearer token for API calls
    pub access_token: String,

    /// Longer-lived token used to obtain a new access token
    pub refresh_token: String,

    /// Unix timestamp when the access token expires, if the server said so
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<u64>,
}

// Tokens stay out of Debug output so they never reach logs.
impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

impl Credential {
    /// Create a credential without a known expiry
    pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
            expires_at: None,
        }
    }

    /// Build a credential from a token endpoint response.
    ///
    /// `previous_refresh` is kept when the server did not rotate the refresh
    /// token. Returns `None` if neither carries a refresh token.
    #[must_use]
    pub fn from_token_response(response: TokenResponse, previous_refresh: Option<&str>) -> Option<Self> {
        let refresh_token = response
            .refresh_token
            .filter(|token| !token.is_empty())
            .or_else(|| previous_refresh.map(str::to_string))?;

        Some(Self {
            access_token: response.access_token,
            refresh_token,
            expires_at: response
                .expires_in
                .map(|seconds| now_secs().saturating_add(seconds)),
        })
    }

    /// Check if the access token is expired (with a 60 second buffer)
    #[must_use]
    pub fn is_expired(&self) -> bool {
        match self.expires_at {
            Some(expires_at) => now_secs() + EXPIRY_SKEW_SECS >= expires_at,
            None => false,
        }
    }

    /// Get the Authorization header value
    #[must_use]
    pub fn authorization_header(&self) -> String {
        bearer(&self.access_token)
    }

    /// Get remaining validity duration, if known
    #[must_use]
    pub fn remaining_validity(&self) -> Option<Duration> {
        let expires_at = self.expires_at?;
        let now = now_secs();
        (expires_at > now).then(|| Duration::from_secs(expires_at - now))
    }
}

/// Format a bearer Authorization header value
#[must_use]
pub fn bearer(access_token: &str) -> String {
    format!("Bearer {access_token}")
}

/// Successful response from the OAuth token endpoint (or the refresh proxy)
#[derive(Clone, Deserialize, Serialize)]
pub struct TokenResponse {
    /// New access token
    pub access_token: String,
    /// New refresh token; absent when the server does not rotate it
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Lifetime of the access token in seconds
    #[serde(default)]
    pub expires_in: Option<u64>,
    /// Token type, normally `Bearer`
    #[serde(default)]
    pub token_type: Option<String>,
    /// Granted scopes
    #[serde(default)]
    pub scope: Option<String>,
}

impl std::fmt::Debug for TokenResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenResponse")
            .field("expires_in", &self.expires_in)
            .field("token_type", &self.token_type)
            .field("scope", &self.scope)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(refresh: Option<&str>, expires_in: Option<u64>) -> TokenResponse {
        TokenResponse {
            access_token: "at2".to_string(),
            refresh_token: refresh.map(str::to_string),
            expires_in,
            token_type: Some("Bearer".to_string()),
            scope: None,
        }
    }

    #[test]
    fn test_from_token_response_rotated() {
        let cred = Credential::from_token_response(response(Some("rt2"), Some(3600)), Some("rt1"))
            .unwrap();
        assert_eq!(cred.access_token, "at2");
        assert_eq!(cred.refresh_token, "rt2");
        assert!(cred.expires_at.is_some());
        assert!(!cred.is_expired());
    }

    #[test]
    fn test_from_token_response_keeps_previous_refresh() {
        let cred = Credential::from_token_response(response(None, None), Some("rt1")).unwrap();
        assert_eq!(cred.refresh_token, "rt1");
        assert_eq!(cred.expires_at, None);

        let cred = Credential::from_token_response(response(Some(""), None), Some("rt1")).unwrap();
        assert_eq!(cred.refresh_token, "rt1");
    }

    #[test]
    fn test_huge_expires_in_saturates() {
        let cred = Credential::from_token_response(response(Some("rt2"), Some(u64::MAX)), None)
            .unwrap();
        assert_eq!(cred.expires_at, Some(u64::MAX));
        assert!(!cred.is_expired());

        let parsed: TokenResponse = serde_json::from_str(
            r#"{"access_token":"at2","refresh_token":"rt2","expires_in":18446744073709551615}"#,
        )
        .unwrap();
        assert!(Credential::from_token_response(parsed, None).is_some());
    }

    #[test]
    fn test_from_token_response_without_any_refresh() {
        assert!(Credential::from_token_response(response(None, None), None).is_none());
    }

    #[test]
    fn test_expiry_buffer() {
        let mut cred = Credential::new("at", "rt");
        assert!(!cred.is_expired());
        assert!(cred.remaining_validity().is_none());

        cred.expires_at = Some(now_secs() + 30);
        assert!(cred.is_expired());
        assert!(cred.remaining_validity().is_some());

        cred.expires_at = Some(now_secs() - 100);
        assert!(cred.is_expired());
        assert!(cred.remaining_validity().is_none());
    }

    #[test]
    fn test_authorization_header() {
        assert_eq!(Credential::new("abc", "def").authorization_header(), "Bearer abc");
    }

    #[test]
    fn test_debug_redacts_tokens() {
        let shown = format!("{:?}", Credential::new("secret-at", "secret-rt"));
        assert!(!shown.contains("secret"));
    }

    #[test]
    fn test_token_response_minimal_json() {
        let parsed: TokenResponse = serde_json::from_str(r#"{"access_token":"x"}"#).unwrap();
        assert_eq!(parsed.access_token, "x");
        assert!(parsed.refresh_token.is_none());
    }
}
