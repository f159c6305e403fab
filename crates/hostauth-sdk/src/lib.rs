//! Client-side session SDK
//!
//! This crate keeps an app signed in against a hosted identity provider:
//! - PKCE authorization-code login through an external or embedded browser
//! - Secure token storage that survives process restarts
//! - Proactive refresh on a foreground timer or a platform background job
//! - Deferred retries replayed when connectivity returns
//! - An observable session state for the UI
//!
//! ```no_run
//! use hostauth_sdk::{AuthSdk, Collaborators, SessionConfig};
//!
//! # async fn example() -> hostauth_sdk::AuthResult<()> {
//! let sdk = AuthSdk::new(Collaborators::default());
//! let manager = sdk
//!     .configure(SessionConfig::new(
//!         "https://auth.example.com",
//!         "client-id",
//!         "com.example.app",
//!     ))
//!     .await?;
//!
//! let url = manager.start_pkce_flow(None, None).await?;
//! println!("open {url}");
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod config;
pub mod connectivity;
pub mod error;
pub mod jwt;
pub mod lifecycle;
pub mod manager;
pub mod pkce;
pub mod queue;
pub mod scheduler;
pub mod sdk;
pub mod state;
pub mod store;

// Re-export commonly used types
pub use api::{HttpIdentityApi, IdentityApi, Profile, Tenant, TokenResponse};
pub use config::{CallbackMechanism, Endpoint, Region, SessionConfig};
pub use connectivity::{ConnectivityListener, ConnectivityMonitor, NetworkProbe};
pub use error::{AuthError, AuthResult};
pub use lifecycle::{AppLifecycle, AppState};
pub use manager::{CallbackOptions, SessionManager, SessionManagerBuilder};
pub use pkce::DirectLoginAction;
pub use queue::{DeferredQueue, Priority};
pub use scheduler::{adaptive_offset, RefreshScheduler, Scheduler};
pub use sdk::{AuthSdk, Collaborators};
pub use state::{Observable, SessionState};
pub use store::{CredentialKey, CredentialStore, FileCredentialStore, MemoryCredentialStore};
