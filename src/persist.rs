//! Durable storage for the session credential pair
//!
//! The client only needs get/set/clear on two strings: the access token
//! (`gala_at`) and the refresh token (`gala_rt`). [`FilePersistence`] keeps them
//! in a JSON file under the platform config directory; [`MemoryPersistence`]
//! is for tests and embedders that manage storage themselves.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;

/// Field name of the persisted access token
pub const ACCESS_TOKEN_KEY: &str = "gala_at";
/// Field name of the persisted refresh token
pub const REFRESH_TOKEN_KEY: &str = "gala_rt";

/// Errors that can occur while reading or writing the persisted session
#[derive(Debug, Error)]
pub enum PersistError {
    /// Stored value exists but cannot be used
    #[error("Malformed session data: {0}")]
    Malformed(String),

    /// I/O error during storage operations
    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// The two persisted session values
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedSession {
    /// Access token, if one was saved
    #[serde(rename = "gala_at", default)]
    pub access_token: Option<String>,
    /// Refresh token, if one was saved
    #[serde(rename = "gala_rt", default)]
    pub refresh_token: Option<String>,
}

impl std::fmt::Debug for PersistedSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistedSession")
            .field(ACCESS_TOKEN_KEY, &self.access_token.as_ref().map(|_| "<redacted>"))
            .field(REFRESH_TOKEN_KEY, &self.refresh_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl PersistedSession {
    /// Both values, if both are present and non-empty
    #[must_use]
    pub fn pair(&self) -> Option<(&str, &str)> {
        match (self.access_token.as_deref(), self.refresh_token.as_deref()) {
            (Some(at), Some(rt)) if !at.is_empty() && !rt.is_empty() => Some((at, rt)),
            _ => None,
        }
    }
}

/// Get/set/clear access to the persisted session pair
pub trait SessionPersistence: Send + Sync {
    /// Read the persisted values. A missing session is `Ok` with both fields `None`.
    ///
    /// # Errors
    /// Returns an error if the storage cannot be read or holds malformed data.
    fn load(&self) -> Result<PersistedSession, PersistError>;

    /// Replace the persisted values
    ///
    /// # Errors
    /// Returns an error if the storage cannot be written.
    fn save(&self, access_token: &str, refresh_token: &str) -> Result<(), PersistError>;

    /// Remove the persisted values. Clearing an empty storage is not an error.
    ///
    /// # Errors
    /// Returns an error if existing data cannot be removed.
    fn clear(&self) -> Result<(), PersistError>;
}

/// In-process storage
#[derive(Debug, Default)]
pub struct MemoryPersistence {
    session: Mutex<PersistedSession>,
}

impl MemoryPersistence {
    /// Create an empty storage
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a storage pre-filled with a session pair
    pub fn with_session(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            session: Mutex::new(PersistedSession {
                access_token: Some(access_token.into()),
                refresh_token: Some(refresh_token.into()),
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, PersistedSession> {
        self.session
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl SessionPersistence for MemoryPersistence {
    fn load(&self) -> Result<PersistedSession, PersistError> {
        Ok(self.lock().clone())
    }

    fn save(&self, access_token: &str, refresh_token: &str) -> Result<(), PersistError> {
        *self.lock() = PersistedSession {
            access_token: Some(access_token.to_string()),
            refresh_token: Some(refresh_token.to_string()),
        };
        Ok(())
    }

    fn clear(&self) -> Result<(), PersistError> {
        *self.lock() = PersistedSession::default();
        Ok(())
    }
}

/// JSON file storage with user-only permissions
#[derive(Debug, Clone)]
pub struct FilePersistence {
    path: PathBuf,
}

impl Default for FilePersistence {
    fn default() -> Self {
        Self::new()
    }
}

impl FilePersistence {
    /// Storage at `<config dir>/galantis/session.json`
    #[must_use]
    pub fn new() -> Self {
        let dir = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("galantis");

        Self {
            path: dir.join("session.json"),
        }
    }

    /// Storage at a custom path
    #[must_use]
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Get the storage path
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SessionPersistence for FilePersistence {
    fn load(&self) -> Result<PersistedSession, PersistError> {
        if !self.path.exists() {
            return Ok(PersistedSession::default());
        }

        let content = std::fs::read_to_string(&self.path)?;
        if content.trim().is_empty() {
            return Ok(PersistedSession::default());
        }
        let session: PersistedSession = serde_json::from_str(&content)?;
        Ok(session)
    }

    fn save(&self, access_token: &str, refresh_token: &str) -> Result<(), PersistError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let session = PersistedSession {
            access_token: Some(access_token.to_string()),
            refresh_token: Some(refresh_token.to_string()),
        };
        std::fs::write(&self.path, serde_json::to_string_pretty(&session)?)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&self.path, std::fs::Permissions::from_mode(0o600))?;
        }

        Ok(())
    }

    fn clear(&self) -> Result<(), PersistError> {
        if self.path.exists() {
            std::fs::remove_file(&self.path)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_memory_roundtrip_and_clear() {
        let storage = MemoryPersistence::new();
        assert_eq!(storage.load().unwrap().pair(), None);

        storage.save("at", "rt").unwrap();
        assert_eq!(storage.load().unwrap().pair(), Some(("at", "rt")));

        storage.clear().unwrap();
        storage.clear().unwrap();
        assert_eq!(storage.load().unwrap(), PersistedSession::default());
    }

    #[test]
    fn test_pair_requires_both_values() {
        let half = PersistedSession {
            access_token: Some("at".to_string()),
            refresh_token: None,
        };
        assert_eq!(half.pair(), None);

        let empty = PersistedSession {
            access_token: Some(String::new()),
            refresh_token: Some("rt".to_string()),
        };
        assert_eq!(empty.pair(), None);
    }

    #[test]
    fn test_file_save_load_uses_cookie_names() {
        let dir = TempDir::new().unwrap();
        let storage = FilePersistence::with_path(dir.path().join("nested").join("session.json"));

        storage.save("access", "refresh").unwrap();
        let raw = std::fs::read_to_string(storage.path()).unwrap();
        assert!(raw.contains("gala_at"));
        assert!(raw.contains("gala_rt"));

        assert_eq!(storage.load().unwrap().pair(), Some(("access", "refresh")));

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(storage.path()).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[test]
    fn test_file_missing_is_empty_session() {
        let dir = TempDir::new().unwrap();
        let storage = FilePersistence::with_path(dir.path().join("none.json"));
        assert_eq!(storage.load().unwrap(), PersistedSession::default());
        storage.clear().unwrap();
    }

    #[test]
    fn test_file_malformed_is_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("session.json");
        std::fs::write(&path, "{not json").unwrap();

        let storage = FilePersistence::with_path(path);
        assert!(matches!(storage.load(), Err(PersistError::Json(_))));
    }

    #[test]
    fn test_debug_redacts_values() {
        let shown = format!("{:?}", MemoryPersistence::with_session("secret1", "secret2"));
        assert!(!shown.contains("secret"));
    }
}
