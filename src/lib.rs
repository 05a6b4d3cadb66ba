//! # Galantis API client
//!
//! Authenticated HTTP client for the Galantis event-management API.
//! Async/await, tokio-based.
//!
//! The interesting part is credential handling: every request carries the
//! current bearer token, and when the API answers 401 the client refreshes the
//! token **once** for all concurrently failing requests, replays each of them
//! with the new token, and ends the session if the refresh fails.
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use galantis_client::{ApiRequest, ClientConfig, FilePersistence, Session};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ClientConfig::from_env()?;
//!
//!     // Restores the persisted session, if any
//!     let session = Session::bootstrap(&config, Arc::new(FilePersistence::new()))?;
//!     if !session.is_authenticated() {
//!         session.login("organizer@example.com", "password").await?;
//!     }
//!
//!     let registrations: serde_json::Value = session
//!         .client()
//!         .execute(
//!             ApiRequest::get("/events/42/registrations/")
//!                 .query("page", 1)
//!                 .query("ordering", "-created_at"),
//!         )
//!         .await?;
//!     println!("{registrations}");
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! - [`store`]: [`CredentialStore`], the single source of truth for the credential
//! - [`interceptor`]: request interceptors, [`BearerAuth`]
//! - [`refresh`]: [`RefreshCoordinator`], the single-flight refresh queue
//! - [`client`]: [`ApiClient`], send / detect 401 / refresh / replay
//! - [`session`]: session restore at startup, login and logout
//! - [`guard`]: [`RouteGuard`] navigation decisions
//! - [`oauth`]: token endpoint grants, revoke, refresh proxy
//! - [`transport`]: request/response descriptors and the HTTP transport seam
//! - [`persist`]: durable storage for the credential pair
//! - [`config`]: [`ClientConfig`] and environment loading
//! - [`error`]: [`ClientError`]
//!
//! ## Logging
//!
//! This crate uses [`tracing`](https://crates.io/crates/tracing) for structured logging.
//! Tokens are never logged. To see logs, attach a subscriber:
//!
//! ```rust,ignore
//! tracing_subscriber::fmt::init();
//! ```
//!
//! ## Error Handling
//!
//! All fallible operations return [`Result<T, ClientError>`](Result). A refresh
//! failure ends the session; check for it with
//! [`ClientError::is_session_expired`]:
//!
//! ```no_run
//! # use galantis_client::{ApiClient, ClientError};
//! # async fn example(client: &ApiClient) {
//! match client.get::<serde_json::Value>("/events/").await {
//!     Ok(events) => println!("{events}"),
//!     Err(e) if e.is_session_expired() => eprintln!("Please log in again"),
//!     Err(e) => eprintln!("Error: {e}"),
//! }
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod client;
pub mod config;
pub mod credential;
pub mod error;
pub mod guard;
pub mod interceptor;
pub mod navigator;
pub mod oauth;
pub mod persist;
pub mod refresh;
pub mod session;
pub mod store;
pub mod transport;
pub mod utils;

// Re-export commonly used types
pub use client::{ApiClient, ApiClientBuilder};
pub use config::ClientConfig;
pub use credential::{Credential, TokenResponse};
pub use error::{ClientError, Result};
pub use guard::{GuardDecision, RouteGuard};
pub use interceptor::{BearerAuth, RequestInterceptor};
pub use navigator::{LogNavigator, Navigator, RecordingNavigator};
pub use oauth::{OAuthClient, ProxyRefresher, TokenRefresher};
pub use persist::{FilePersistence, MemoryPersistence, PersistError, SessionPersistence};
pub use refresh::RefreshCoordinator;
pub use session::{Session, UserProfile, restore_session};
pub use store::CredentialStore;
pub use transport::{ApiRequest, ApiResponse, HttpTransport, ReqwestTransport};

/// Version of the crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
