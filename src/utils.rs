//! Small helpers shared by the client, the OAuth endpoints and the error types.

/// Maximum number of body bytes kept when a response body ends up in an error.
pub const MAX_ERROR_BODY_BYTES: usize = 512;

/// Join an API base URL and a path with exactly one `/` between them.
///
/// Absolute `http://` / `https://` paths are returned unchanged so a request
/// can target a host other than the API base (e.g. the OAuth server).
///
/// # Example
/// ```
/// use galantis_client::utils::join_url;
///
/// assert_eq!(join_url("https://api.example.com/v1/", "/events"), "https://api.example.com/v1/events");
/// assert_eq!(join_url("https://api.example.com", "https://oauth.example.com/me"), "https://oauth.example.com/me");
/// ```
#[must_use]
pub fn join_url(base: &str, path: &str) -> String {
    if path.starts_with("http://") || path.starts_with("https://") {
        return path.to_string();
    }
    if path.is_empty() {
        return base.to_string();
    }
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

/// Cut `s` to at most `max_bytes` bytes without splitting a character.
///
/// # Example
/// ```
/// use galantis_client::utils::safe_truncate;
///
/// // "é" takes two bytes; a 4-byte cut would split it.
/// assert_eq!(safe_truncate("Café Zürich", 4), "Caf");
/// assert_eq!(safe_truncate("Café Zürich", 5), "Café");
/// assert_eq!(safe_truncate("short", 64), "short");
/// ```
#[inline]
#[must_use]
pub fn safe_truncate(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let end = (0..=max_bytes)
        .rev()
        .find(|&i| s.is_char_boundary(i))
        .unwrap_or(0);
    &s[..end]
}

/// Render a response body for an error message: lossy UTF-8, trimmed, and
/// capped at [`MAX_ERROR_BODY_BYTES`] with a trailing `...` when cut.
#[must_use]
pub fn body_for_display(body: &[u8]) -> String {
    let text = String::from_utf8_lossy(body);
    let text = text.trim();
    let truncated = safe_truncate(text, MAX_ERROR_BODY_BYTES);
    if truncated.len() < text.len() {
        format!("{truncated}...")
    } else {
        truncated.to_string()
    }
}
