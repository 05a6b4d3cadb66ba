//! Navigation guard
//!
//! Decides whether the dashboard may show a path given the current
//! authentication state. The guard only reads the store; it never changes it.

use std::sync::Arc;

use crate::store::CredentialStore;

/// Paths reachable whether or not the user is signed in
const PUBLIC_PATHS: &[&str] = &["/authorize", "/auth/logout"];
/// Paths an anonymous user may open
const ANONYMOUS_PATHS: &[&str] = &["/"];

/// Outcome of a navigation check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardDecision {
    /// Show the requested path
    Allow,
    /// Navigate to this path instead
    Redirect(String),
}

impl GuardDecision {
    /// Whether navigation may proceed
    #[must_use]
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow)
    }
}

/// Route guard for authenticated pages
#[derive(Debug, Clone)]
pub struct RouteGuard {
    store: Arc<CredentialStore>,
    login_path: String,
    home_path: String,
}

impl RouteGuard {
    /// Create a guard reading `store`
    pub fn new(
        store: Arc<CredentialStore>,
        login_path: impl Into<String>,
        home_path: impl Into<String>,
    ) -> Self {
        Self {
            store,
            login_path: login_path.into(),
            home_path: home_path.into(),
        }
    }

    /// Check navigation to `path`. Query strings and fragments are ignored.
    #[must_use]
    pub fn check(&self, path: &str) -> GuardDecision {
        let path = path
            .split(['?', '#'])
            .next()
            .unwrap_or_default();

        if PUBLIC_PATHS.contains(&path) {
            return GuardDecision::Allow;
        }

        let is_login = path == self.login_path;
        if self.store.is_authenticated() {
            if is_login {
                return GuardDecision::Redirect(self.home_path.clone());
            }
            return GuardDecision::Allow;
        }

        if is_login || ANONYMOUS_PATHS.contains(&path) {
            GuardDecision::Allow
        } else {
            tracing::debug!(path, "Unauthenticated navigation redirected to login");
            GuardDecision::Redirect(self.login_path.clone())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn guard() -> (RouteGuard, Arc<CredentialStore>) {
        let store = Arc::new(CredentialStore::new());
        (RouteGuard::new(store.clone(), "/auth/login", "/my-events"), store)
    }

    #[test]
    fn test_public_paths_always_allowed() {
        let (guard, store) = guard();
        assert!(guard.check("/authorize?code=abc").is_allowed());
        assert!(guard.check("/auth/logout").is_allowed());
        store.set_credential("at", "rt");
        assert!(guard.check("/authorize").is_allowed());
    }

    #[test]
    fn test_anonymous_redirected_to_login() {
        let (guard, _) = guard();
        assert_eq!(
            guard.check("/events/42/registrations"),
            GuardDecision::Redirect("/auth/login".to_string())
        );
        assert!(guard.check("/").is_allowed());
        assert!(guard.check("/auth/login").is_allowed());
    }

    #[test]
    fn test_authenticated_kept_off_login() {
        let (guard, store) = guard();
        store.set_credential("at", "rt");
        assert_eq!(
            guard.check("/auth/login"),
            GuardDecision::Redirect("/my-events".to_string())
        );
        assert!(guard.check("/events/42/checkins#top").is_allowed());
    }

    #[test]
    fn test_follows_store_changes() {
        let (guard, store) = guard();
        store.set_credential("at", "rt");
        assert!(guard.check("/my-events").is_allowed());
        store.clear_credential();
        assert!(!guard.check("/my-events").is_allowed());
    }
}
