//! Entry point for host applications

use crate::api::IdentityApi;
use crate::config::SessionConfig;
use crate::connectivity::{ConnectivityListener, ConnectivityMonitor, NetworkProbe};
use crate::error::{AuthError, AuthResult};
use crate::lifecycle::AppLifecycle;
use crate::manager::{SessionCookies, SessionManager};
use crate::scheduler::BackgroundJobs;
use crate::store::CredentialStore;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::{Arc, Weak};
use tracing::{info, warn};

/// Collaborators shared by every manager the SDK builds
#[derive(Default, Clone)]
pub struct Collaborators {
    pub api: Option<Arc<dyn IdentityApi>>,
    pub store: Option<Arc<dyn CredentialStore>>,
    pub jobs: Option<Arc<dyn BackgroundJobs>>,
    pub cookies: Option<Arc<dyn SessionCookies>>,
    pub probe: Option<Arc<dyn NetworkProbe>>,
}

struct SdkInner {
    collaborators: Collaborators,
    lifecycle: AppLifecycle,
    connectivity: ConnectivityMonitor,
    config: RwLock<Option<SessionConfig>>,
    manager: RwLock<Option<SessionManager>>,
    configure_lock: tokio::sync::Mutex<()>,
}

/// The SDK: a cached configuration plus the session built from it
///
/// `configure` may fail because the network is down. The configuration is
/// then kept and re-applied once connectivity comes back.
#[derive(Clone)]
pub struct AuthSdk {
    inner: Arc<SdkInner>,
}

impl AuthSdk {
    pub fn new(collaborators: Collaborators) -> Self {
        let lifecycle = AppLifecycle::default();
        // Until configured there is no base URL to probe; assume routable
        let probe: Arc<dyn NetworkProbe> = collaborators
            .probe
            .clone()
            .unwrap_or_else(|| Arc::new(AlwaysGood));
        let connectivity =
            ConnectivityMonitor::new(probe, SessionConfig::default().debounce());

        let inner = Arc::new(SdkInner {
            collaborators,
            lifecycle,
            connectivity,
            config: RwLock::new(None),
            manager: RwLock::new(None),
            configure_lock: tokio::sync::Mutex::new(()),
        });
        let listener = Arc::downgrade(&inner) as Weak<dyn ConnectivityListener>;
        inner.connectivity.set_listener(listener);
        Self { inner }
    }

    /// Validate, cache and apply a configuration
    ///
    /// Configuration errors are returned as-is and nothing is cached. A
    /// network failure while restoring the session leaves the SDK
    /// unconfigured with the configuration cached for the next restore.
    pub async fn configure(&self, config: SessionConfig) -> AuthResult<SessionManager> {
        config.validate()?;
        *self.inner.config.write() = Some(config.clone());
        self.inner.apply(config).await
    }

    /// The configured session
    pub fn manager(&self) -> AuthResult<SessionManager> {
        self.inner
            .manager
            .read()
            .clone()
            .ok_or(AuthError::NotConfigured)
    }

    pub fn is_configured(&self) -> bool {
        self.inner.manager.read().is_some()
    }

    pub fn cached_config(&self) -> Option<SessionConfig> {
        self.inner.config.read().clone()
    }

    pub fn lifecycle(&self) -> &AppLifecycle {
        &self.inner.lifecycle
    }

    pub fn connectivity(&self) -> &ConnectivityMonitor {
        &self.inner.connectivity
    }

    /// Tear down the current session manager
    pub fn shutdown(&self) {
        if let Some(manager) = self.inner.manager.write().take() {
            manager.shutdown();
        }
    }
}

impl SdkInner {
    async fn apply(&self, config: SessionConfig) -> AuthResult<SessionManager> {
        let _configuring = self.configure_lock.lock().await;

        self.connectivity.set_debounce(config.debounce());

        let mut builder = SessionManager::builder(config)
            .lifecycle(self.lifecycle.clone())
            .connectivity(self.connectivity.clone());
        if self.collaborators.probe.is_none() {
            builder = builder.probe_active_region();
        }
        if let Some(api) = &self.collaborators.api {
            builder = builder.api(api.clone());
        }
        if let Some(store) = &self.collaborators.store {
            builder = builder.store(store.clone());
        }
        if let Some(jobs) = &self.collaborators.jobs {
            builder = builder.background_jobs(jobs.clone());
        }
        if let Some(cookies) = &self.collaborators.cookies {
            builder = builder.cookies(cookies.clone());
        }
        let manager = builder.build()?;

        if let Err(e) = manager.initialize().await {
            if e.is_transient() {
                warn!(error = %e, "Session restore needs the network, will retry when it returns");
            } else {
                warn!(error = %e, "Session restore failed");
            }
            return Err(e);
        }

        manager.start();
        if let Some(previous) = self.manager.write().replace(manager.clone()) {
            previous.shutdown();
        }
        info!("SDK configured");
        Ok(manager)
    }
}

#[async_trait]
impl ConnectivityListener for SdkInner {
    async fn on_network_restored(&self) -> AuthResult<()> {
        let manager = self.manager.read().clone();
        match manager {
            Some(manager) => manager.on_network_restored().await,
            None => {
                let cached = self.config.read().clone();
                match cached {
                    Some(config) => {
                        info!("Re-applying cached configuration after network restore");
                        self.apply(config).await.map(|_| ())
                    }
                    None => Ok(()),
                }
            }
        }
    }
}

struct AlwaysGood;

#[async_trait]
impl NetworkProbe for AlwaysGood {
    async fn is_network_good(&self) -> bool {
        true
    }
}
