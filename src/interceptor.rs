//! Request interceptors
//!
//! Interceptors run in registration order on every outgoing request,
//! including replays. They only mutate the request; they never send,
//! retry or fail.

use std::sync::Arc;

use crate::store::CredentialStore;
use crate::transport::ApiRequest;

/// Mutates an outgoing request before it is sent
pub trait RequestInterceptor: Send + Sync {
    /// Adjust `request` in place
    fn intercept(&self, request: &mut ApiRequest);
}

impl<F> RequestInterceptor for F
where
    F: Fn(&mut ApiRequest) + Send + Sync,
{
    fn intercept(&self, request: &mut ApiRequest) {
        self(request);
    }
}

/// Attaches `Authorization: Bearer <access>` from the credential store.
///
/// Requests pass through untouched when the store holds no credential, so
/// token exchange calls can share the pipeline.
#[derive(Debug, Clone)]
pub struct BearerAuth {
    store: Arc<CredentialStore>,
}

impl BearerAuth {
    /// Create an interceptor reading from `store`
    #[must_use]
    pub fn new(store: Arc<CredentialStore>) -> Self {
        Self { store }
    }
}

impl RequestInterceptor for BearerAuth {
    fn intercept(&self, request: &mut ApiRequest) {
        if let Some(token) = self.store.access_token() {
            request.set_bearer(&token);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bearer_attached_when_authenticated() {
        let store = Arc::new(CredentialStore::new());
        store.set_credential("at1", "rt1");

        let mut req = ApiRequest::get("/me");
        BearerAuth::new(store).intercept(&mut req);
        assert_eq!(req.authorization(), Some("Bearer at1"));
    }

    #[test]
    fn test_unauthenticated_request_passes_through() {
        let store = Arc::new(CredentialStore::new());
        let mut req = ApiRequest::post("/token")
            .header("Authorization", "Basic abc")
            .unwrap();
        BearerAuth::new(store).intercept(&mut req);
        assert_eq!(req.authorization(), Some("Basic abc"));
    }

    #[test]
    fn test_closure_interceptor() {
        let interceptor = |req: &mut ApiRequest| {
            req.query.push(("lang".to_string(), "en".to_string()));
        };
        let mut req = ApiRequest::get("/events");
        interceptor.intercept(&mut req);
        assert_eq!(req.query, vec![("lang".to_string(), "en".to_string())]);
    }
}
