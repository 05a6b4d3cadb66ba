//! Single-flight credential refresh
//!
//! Many requests can fail with 401 at the same moment when an access token
//! expires. The [`RefreshCoordinator`] makes sure only one refresh call is in
//! flight for all of them:
//!
//! ```text
//!            first 401                       refresh settles
//!   Idle ──────────────────► Refreshing ─────────────────────► Idle
//!   (queue empty)            (every caller, the first one       (queue drained FIFO,
//!                             included, waits in the queue)      store updated first)
//! ```
//!
//! The refresh runs on its own tokio task. The caller that started it is
//! just the first entry in the queue, so dropping that caller (timeouts,
//! `select!`, cancelled UI work) cannot leave the others waiting forever.
//! The refresh call itself is bounded by a timeout for the same reason.
//!
//! On success the new credential is stored before any waiter is woken, so
//! replays always see it. On failure the store is cleared, every waiter
//! gets [`ClientError::RefreshFailed`], and the [`Navigator`] is sent to the
//! login path.

use std::collections::VecDeque;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::credential::Credential;
use crate::error::{ClientError, Result};
use crate::navigator::Navigator;
use crate::oauth::TokenRefresher;
use crate::store::CredentialStore;

/// What every waiter receives: the new access token or the failure message
type RefreshOutcome = std::result::Result<String, String>;

#[derive(Default)]
struct RefreshState {
    refreshing: bool,
    queue: VecDeque<oneshot::Sender<RefreshOutcome>>,
}

/// Coordinates credential refreshes so at most one is in flight
pub struct RefreshCoordinator {
    store: Arc<CredentialStore>,
    refresher: Arc<dyn TokenRefresher>,
    navigator: Arc<dyn Navigator>,
    login_path: String,
    timeout: Duration,
    state: Mutex<RefreshState>,
    refreshes: AtomicU64,
}

impl std::fmt::Debug for RefreshCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshCoordinator")
            .field("refreshing", &self.is_refreshing())
            .field("pending", &self.pending())
            .field("refreshes", &self.refreshes_started())
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl RefreshCoordinator {
    /// Create a coordinator updating `store` with credentials from `refresher`
    pub fn new(
        store: Arc<CredentialStore>,
        refresher: Arc<dyn TokenRefresher>,
        navigator: Arc<dyn Navigator>,
        login_path: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            refresher,
            navigator,
            login_path: login_path.into(),
            timeout,
            state: Mutex::new(RefreshState::default()),
            refreshes: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RefreshState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Whether a refresh is in flight
    #[must_use]
    pub fn is_refreshing(&self) -> bool {
        self.lock().refreshing
    }

    /// Number of callers waiting on the in-flight refresh
    #[must_use]
    pub fn pending(&self) -> usize {
        self.lock().queue.len()
    }

    /// Number of refresh calls started since creation
    #[must_use]
    pub fn refreshes_started(&self) -> u64 {
        self.refreshes.load(Ordering::Relaxed)
    }

    /// Wait for a fresh access token, starting a refresh if none is in flight.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    /// Returns `RefreshFailed` if the refresh fails or times out.
    pub async fn refresh(self: &Arc<Self>) -> Result<String> {
        self.refresh_with_cancel(None).await
    }

    /// Like [`refresh`](Self::refresh), but gives up with `Cancelled` as soon
    /// as `cancel` fires. The refresh itself keeps running for the other waiters.
    ///
    /// # Errors
    /// Returns `Cancelled` or `RefreshFailed`.
    pub async fn refresh_with_cancel(
        self: &Arc<Self>,
        cancel: Option<&CancellationToken>,
    ) -> Result<String> {
        let receiver = self.enqueue();

        let outcome = match cancel {
            Some(cancel) => {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => return Err(ClientError::Cancelled),
                    outcome = receiver => outcome,
                }
            }
            None => receiver.await,
        };

        match outcome {
            Ok(Ok(access_token)) => Ok(access_token),
            Ok(Err(msg)) => Err(ClientError::RefreshFailed(msg)),
            Err(_) => Err(ClientError::refresh_failed(
                "refresh task ended without a result",
            )),
        }
    }

    /// Queue the caller and, if idle, start the refresh. Check and enqueue
    /// happen under one lock.
    fn enqueue(self: &Arc<Self>) -> oneshot::Receiver<RefreshOutcome> {
        let (sender, receiver) = oneshot::channel();
        let mut state = self.lock();
        state.queue.push_back(sender);

        if state.refreshing {
            tracing::debug!(pending = state.queue.len(), "Refresh in flight; queued");
        } else {
            state.refreshing = true;
            self.refreshes.fetch_add(1, Ordering::Relaxed);
            tracing::debug!("Starting credential refresh");
            let this = Arc::clone(self);
            tokio::spawn(async move { this.run().await });
        }

        receiver
    }

    async fn run(&self) {
        let outcome = match AssertUnwindSafe(self.perform()).catch_unwind().await {
            Ok(outcome) => outcome,
            Err(_) => Err("refresh task panicked".to_string()),
        };
        self.settle(outcome);
    }

    async fn perform(&self) -> std::result::Result<Credential, String> {
        let Some(refresh_token) = self.store.refresh_token() else {
            return Err(ClientError::NotAuthenticated.to_string());
        };

        match tokio::time::timeout(self.timeout, self.refresher.refresh(&refresh_token)).await {
            Ok(Ok(credential)) => Ok(credential),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err(format!("refresh timed out after {:?}", self.timeout)),
        }
    }

    /// Apply the outcome to the store, go back to idle and wake every waiter
    /// in FIFO order.
    ///
    /// The store and the navigator call into host code. A panic there is
    /// logged and the queue is still drained.
    fn settle(&self, outcome: std::result::Result<Credential, String>) {
        let shared: RefreshOutcome = match outcome {
            Ok(credential) => {
                let access_token = credential.access_token.clone();
                let valid_for = credential.remaining_validity();
                match catch_unwind(AssertUnwindSafe(|| self.store.set(credential))) {
                    Ok(()) => {
                        tracing::info!(?valid_for, "Credential refreshed");
                        Ok(access_token)
                    }
                    Err(_) => {
                        tracing::error!("Storing the refreshed credential panicked");
                        self.end_session();
                        Err("storing the refreshed credential panicked".to_string())
                    }
                }
            }
            Err(msg) => {
                tracing::warn!("Credential refresh failed: {msg}");
                self.end_session();
                Err(msg)
            }
        };

        let waiters = {
            let mut state = self.lock();
            state.refreshing = false;
            std::mem::take(&mut state.queue)
        };

        tracing::debug!(waiters = waiters.len(), "Refresh settled");
        for waiter in waiters {
            // A waiter that gave up has dropped its receiver.
            let _ = waiter.send(shared.clone());
        }
    }

    fn end_session(&self) {
        if catch_unwind(AssertUnwindSafe(|| self.store.clear_credential())).is_err() {
            tracing::error!("Clearing the credential store panicked");
        }
        if catch_unwind(AssertUnwindSafe(|| self.navigator.navigate_to(&self.login_path))).is_err() {
            tracing::error!(path = %self.login_path, "Navigator panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::navigator::RecordingNavigator;
    use crate::persist::{PersistError, PersistedSession, SessionPersistence};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    struct CountingRefresher {
        calls: AtomicUsize,
        delay: Duration,
        fail: bool,
    }

    impl CountingRefresher {
        fn new(delay: Duration, fail: bool) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                delay,
                fail,
            })
        }
    }

    #[async_trait]
    impl TokenRefresher for CountingRefresher {
        async fn refresh(&self, refresh_token: &str) -> Result<Credential> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            tokio::time::sleep(self.delay).await;
            if self.fail {
                Err(ClientError::token_endpoint("invalid_grant"))
            } else {
                Ok(Credential::new(format!("at{}", n + 1), refresh_token))
            }
        }
    }

    fn coordinator(
        refresher: Arc<CountingRefresher>,
        timeout: Duration,
    ) -> (Arc<RefreshCoordinator>, Arc<CredentialStore>, Arc<RecordingNavigator>) {
        let store = Arc::new(CredentialStore::new());
        store.set_credential("at1", "rt1");
        let navigator = Arc::new(RecordingNavigator::new());
        let coordinator = Arc::new(RefreshCoordinator::new(
            store.clone(),
            refresher,
            navigator.clone(),
            "/auth/login",
            timeout,
        ));
        (coordinator, store, navigator)
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_refresh() {
        let refresher = CountingRefresher::new(Duration::from_millis(20), false);
        let (coordinator, store, navigator) = coordinator(refresher.clone(), Duration::from_secs(5));

        let results =
            futures::future::join_all((0..5).map(|_| coordinator.refresh())).await;

        assert_eq!(refresher.calls.load(Ordering::SeqCst), 1);
        assert_eq!(coordinator.refreshes_started(), 1);
        for result in results {
            assert_eq!(result.unwrap(), "at2");
        }
        assert_eq!(store.access_token().as_deref(), Some("at2"));
        assert!(!coordinator.is_refreshing());
        assert_eq!(coordinator.pending(), 0);
        assert!(navigator.visited().is_empty());
    }

    #[tokio::test]
    async fn test_sequential_refreshes_are_separate() {
        let refresher = CountingRefresher::new(Duration::ZERO, false);
        let (coordinator, store, _) = coordinator(refresher.clone(), Duration::from_secs(5));

        assert_eq!(coordinator.refresh().await.unwrap(), "at2");
        assert_eq!(coordinator.refresh().await.unwrap(), "at3");
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 2);
        assert_eq!(store.access_token().as_deref(), Some("at3"));
    }

    #[tokio::test]
    async fn test_failure_rejects_everyone_and_logs_out() {
        let refresher = CountingRefresher::new(Duration::from_millis(10), true);
        let (coordinator, store, navigator) = coordinator(refresher.clone(), Duration::from_secs(5));

        let results =
            futures::future::join_all((0..3).map(|_| coordinator.refresh())).await;

        assert_eq!(refresher.calls.load(Ordering::SeqCst), 1);
        for result in results {
            assert!(matches!(result, Err(ClientError::RefreshFailed(_))));
        }
        assert!(!store.is_authenticated());
        assert_eq!(navigator.visited(), vec!["/auth/login"]);
    }

    #[tokio::test]
    async fn test_hung_refresh_times_out() {
        let refresher = CountingRefresher::new(Duration::from_secs(60), false);
        let (coordinator, store, navigator) = coordinator(refresher, Duration::from_millis(50));

        let results =
            futures::future::join_all((0..2).map(|_| coordinator.refresh())).await;

        for result in results {
            match result {
                Err(ClientError::RefreshFailed(msg)) => assert!(msg.contains("timed out")),
                other => panic!("unexpected: {other:?}"),
            }
        }
        assert!(!store.is_authenticated());
        assert!(!coordinator.is_refreshing());
        assert_eq!(navigator.visited().len(), 1);
    }

    #[tokio::test]
    async fn test_missing_refresh_token_fails_without_calling_server() {
        let refresher = CountingRefresher::new(Duration::ZERO, false);
        let (coordinator, store, navigator) = coordinator(refresher.clone(), Duration::from_secs(5));
        store.clear_credential();

        let result = coordinator.refresh().await;
        assert!(matches!(result, Err(ClientError::RefreshFailed(_))));
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 0);
        assert_eq!(navigator.visited(), vec!["/auth/login"]);
    }

    #[tokio::test]
    async fn test_cancelled_waiter_leaves_refresh_running() {
        let refresher = CountingRefresher::new(Duration::from_millis(50), false);
        let (coordinator, store, _) = coordinator(refresher, Duration::from_secs(5));

        let cancel = CancellationToken::new();
        let waiting = {
            let coordinator = coordinator.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { coordinator.refresh_with_cancel(Some(&cancel)).await })
        };
        let other = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.refresh().await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        cancel.cancel();

        assert!(matches!(waiting.await.unwrap(), Err(ClientError::Cancelled)));
        assert_eq!(other.await.unwrap().unwrap(), "at2");
        assert_eq!(store.access_token().as_deref(), Some("at2"));
    }

    struct PanickingNavigator;

    impl Navigator for PanickingNavigator {
        fn navigate_to(&self, _path: &str) {
            panic!("router gone");
        }
    }

    /// Accepts the initial pair, panics on any later write
    struct PanickingPersistence;

    impl SessionPersistence for PanickingPersistence {
        fn load(&self) -> std::result::Result<PersistedSession, PersistError> {
            Ok(PersistedSession::default())
        }
        fn save(&self, access_token: &str, _: &str) -> std::result::Result<(), PersistError> {
            if access_token != "at1" {
                panic!("disk gone");
            }
            Ok(())
        }
        fn clear(&self) -> std::result::Result<(), PersistError> {
            panic!("disk gone");
        }
    }

    #[tokio::test]
    async fn test_panicking_navigator_still_settles_waiters() {
        let refresher = CountingRefresher::new(Duration::from_millis(10), true);
        let store = Arc::new(CredentialStore::new());
        store.set_credential("at1", "rt1");
        let coordinator = Arc::new(RefreshCoordinator::new(
            store.clone(),
            refresher.clone(),
            Arc::new(PanickingNavigator),
            "/auth/login",
            Duration::from_secs(5),
        ));

        let results = tokio::time::timeout(
            Duration::from_secs(5),
            futures::future::join_all((0..3).map(|_| coordinator.refresh())),
        )
        .await
        .expect("waiters must be settled");

        for result in results {
            assert!(matches!(result, Err(ClientError::RefreshFailed(_))));
        }
        assert!(!store.is_authenticated());
        assert!(!coordinator.is_refreshing());
        assert_eq!(coordinator.pending(), 0);

        // The coordinator is usable again.
        store.set_credential("at1", "rt1");
        let again = tokio::time::timeout(Duration::from_secs(5), coordinator.refresh())
            .await
            .expect("second refresh must settle");
        assert!(again.is_err());
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_panicking_persistence_still_settles_waiters() {
        let refresher = CountingRefresher::new(Duration::ZERO, false);
        let store = Arc::new(CredentialStore::with_persistence(Arc::new(PanickingPersistence)));
        store.set_credential("at1", "rt1");
        let navigator = Arc::new(RecordingNavigator::new());
        let coordinator = Arc::new(RefreshCoordinator::new(
            store.clone(),
            refresher,
            navigator.clone(),
            "/auth/login",
            Duration::from_secs(5),
        ));

        let result = tokio::time::timeout(Duration::from_secs(5), coordinator.refresh())
            .await
            .expect("waiter must be settled");

        assert!(matches!(result, Err(ClientError::RefreshFailed(_))));
        assert!(!store.is_authenticated());
        assert!(!coordinator.is_refreshing());
        assert_eq!(navigator.visited(), vec!["/auth/login"]);
    }

    /// Holds the refresh until the test opens the gate
    struct GatedRefresher {
        gate: tokio::sync::Notify,
    }

    #[async_trait]
    impl TokenRefresher for GatedRefresher {
        async fn refresh(&self, refresh_token: &str) -> Result<Credential> {
            self.gate.notified().await;
            Ok(Credential::new("at2", refresh_token))
        }
    }

    #[tokio::test]
    async fn test_waiters_settle_in_fifo_order() {
        let refresher = Arc::new(GatedRefresher {
            gate: tokio::sync::Notify::new(),
        });
        let store = Arc::new(CredentialStore::new());
        store.set_credential("at1", "rt1");
        let coordinator = Arc::new(RefreshCoordinator::new(
            store,
            refresher.clone(),
            Arc::new(RecordingNavigator::new()),
            "/auth/login",
            Duration::from_secs(5),
        ));

        let order = Arc::new(Mutex::new(Vec::new()));
        let mut handles = Vec::new();
        for i in 0..5usize {
            let waiter = coordinator.clone();
            let order = order.clone();
            handles.push(tokio::spawn(async move {
                waiter.refresh().await.unwrap();
                order.lock().unwrap().push(i);
            }));
            // Queue the next waiter only once this one is enqueued.
            while coordinator.pending() < i + 1 {
                tokio::task::yield_now().await;
            }
        }

        assert_eq!(coordinator.refreshes_started(), 1);
        refresher.gate.notify_one();
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    }
}
