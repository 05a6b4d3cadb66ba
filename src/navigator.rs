//! Navigation hook for forced logouts
//!
//! When a refresh fails the session is over and the UI must show the login
//! screen. The client does not know how the host application navigates, so it
//! calls a [`Navigator`].

use std::sync::Mutex;

/// Receives forced navigation requests
pub trait Navigator: Send + Sync {
    /// Navigate to `path` (e.g. the login entry point)
    fn navigate_to(&self, path: &str);
}

impl<F> Navigator for F
where
    F: Fn(&str) + Send + Sync,
{
    fn navigate_to(&self, path: &str) {
        self(path);
    }
}

/// Navigator that only logs
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNavigator;

impl Navigator for LogNavigator {
    fn navigate_to(&self, path: &str) {
        tracing::info!(path, "Session ended; navigation requested");
    }
}

/// Navigator that records every requested path
#[derive(Debug, Default)]
pub struct RecordingNavigator {
    visited: Mutex<Vec<String>>,
}

impl RecordingNavigator {
    /// Create an empty recorder
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Paths requested so far, oldest first
    #[must_use]
    pub fn visited(&self) -> Vec<String> {
        self.visited
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }
}

impl Navigator for RecordingNavigator {
    fn navigate_to(&self, path: &str) {
        self.visited
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(path.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_navigator() {
        let nav = RecordingNavigator::new();
        nav.navigate_to("/auth/login");
        nav.navigate_to("/my-events");
        assert_eq!(nav.visited(), vec!["/auth/login", "/my-events"]);
    }
}
