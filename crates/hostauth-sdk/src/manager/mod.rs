//! Session lifecycle manager
//!
//! [`SessionManager`] is the only writer of [`SessionState`]. It runs the
//! PKCE flow, redeems codes and refresh tokens, keeps the credential store
//! in step with memory and re-arms the refresh scheduler after every change.
//!
//! Results of in-flight network calls are committed through a single async
//! lock and tagged with the session epoch they started in. Every clear bumps
//! the epoch, so a refresh that completes after a logout is dropped instead
//! of bringing the old session back.

mod credentials;
mod login;
mod refresh;
mod tenant;

pub use login::{BrowserView, CallbackOptions, CompletionCallback, LoginSurface};
pub use refresh::REFRESH_RETRY_ID;
pub use tenant::{LogoutCallback, SessionCookies};

use crate::api::{HttpIdentityApi, IdentityApi};
use crate::config::{Endpoint, SessionConfig};
use crate::connectivity::{ConnectivityMonitor, HttpNetworkProbe, NetworkProbe};
use crate::error::{AuthError, AuthResult};
use crate::lifecycle::{AppLifecycle, AppState};
use crate::queue::DeferredQueue;
use crate::scheduler::{BackgroundJobs, DueRefresh, RefreshScheduler, Scheduler, TokioJobRunner};
use crate::state::{Observable, SessionState};
use crate::store::CredentialStore;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Attempts the in-process job runner makes before giving up
const JOB_RUNNER_ATTEMPTS: u32 = 3;

pub(crate) struct SessionInner {
    config: SessionConfig,
    endpoint: RwLock<Endpoint>,
    selected_region: RwLock<Option<String>>,
    api: Arc<dyn IdentityApi>,
    store: Arc<dyn CredentialStore>,
    state: Observable<SessionState>,
    scheduler: RefreshScheduler,
    signals: Mutex<Option<mpsc::UnboundedReceiver<DueRefresh>>>,
    queue: DeferredQueue,
    connectivity: ConnectivityMonitor,
    lifecycle: AppLifecycle,
    cookies: Option<Arc<dyn SessionCookies>>,
    /// Probe timeout when the connectivity probe targets the active region
    region_probe: Option<Duration>,
    /// Bumped by every clear
    epoch: AtomicU64,
    commit_lock: tokio::sync::Mutex<()>,
    refreshing: AtomicBool,
    /// A refresh failed for lack of network and should be retried
    refresh_owed: AtomicBool,
    event_loop: Mutex<Option<JoinHandle<()>>>,
}

/// Handle to the session; cheap to clone
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<SessionInner>,
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("endpoint", &*self.inner.endpoint.read())
            .field("store", &self.inner.store.name())
            .finish()
    }
}

/// Builder for [`SessionManager`]
///
/// Every collaborator has a production default; tests swap in fakes.
pub struct SessionManagerBuilder {
    config: SessionConfig,
    api: Option<Arc<dyn IdentityApi>>,
    store: Option<Arc<dyn CredentialStore>>,
    jobs: Option<Arc<dyn BackgroundJobs>>,
    lifecycle: Option<AppLifecycle>,
    connectivity: Option<ConnectivityMonitor>,
    cookies: Option<Arc<dyn SessionCookies>>,
    probe_active_region: bool,
}

impl SessionManagerBuilder {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            api: None,
            store: None,
            jobs: None,
            lifecycle: None,
            connectivity: None,
            cookies: None,
            probe_active_region: false,
        }
    }

    pub fn api(mut self, api: Arc<dyn IdentityApi>) -> Self {
        self.api = Some(api);
        self
    }

    pub fn store(mut self, store: Arc<dyn CredentialStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Platform job service used while the app is backgrounded
    pub fn background_jobs(mut self, jobs: Arc<dyn BackgroundJobs>) -> Self {
        self.jobs = Some(jobs);
        self
    }

    pub fn lifecycle(mut self, lifecycle: AppLifecycle) -> Self {
        self.lifecycle = Some(lifecycle);
        self
    }

    pub fn connectivity(mut self, connectivity: ConnectivityMonitor) -> Self {
        self.connectivity = Some(connectivity);
        self
    }

    /// Keep the connectivity probe aimed at the active region's host
    ///
    /// Implied when no monitor is supplied.
    pub fn probe_active_region(mut self) -> Self {
        self.probe_active_region = true;
        self
    }

    /// Cookie jar of the embedded browser, needed for remote logout
    pub fn cookies(mut self, cookies: Arc<dyn SessionCookies>) -> Self {
        self.cookies = Some(cookies);
        self
    }

    pub fn build(self) -> AuthResult<SessionManager> {
        self.config.validate()?;

        let endpoint = self.config.endpoint(self.config.regions.first().map(|r| r.key.as_str()))?;
        let selected_region = self.config.regions.first().map(|r| r.key.clone());

        let api: Arc<dyn IdentityApi> = match self.api {
            Some(api) => api,
            None => Arc::new(HttpIdentityApi::new(self.config.request_timeout())?),
        };
        let store: Arc<dyn CredentialStore> = match self.store {
            Some(store) => store,
            None => default_store()?,
        };
        let jobs: Arc<dyn BackgroundJobs> = self
            .jobs
            .unwrap_or_else(|| Arc::new(TokioJobRunner::new(JOB_RUNNER_ATTEMPTS)));
        let lifecycle = self.lifecycle.unwrap_or_default();
        let probe_timeout = self.config.probe_timeout();
        let region_probe = (self.probe_active_region || self.connectivity.is_none())
            .then_some(probe_timeout);
        let connectivity = match self.connectivity {
            Some(connectivity) => {
                if self.probe_active_region {
                    connectivity.set_probe(region_probe_for(&endpoint, probe_timeout)?);
                }
                connectivity
            }
            None => ConnectivityMonitor::new(
                region_probe_for(&endpoint, probe_timeout)?,
                self.config.debounce(),
            ),
        };

        let (scheduler, signals) =
            RefreshScheduler::new(lifecycle.clone(), jobs, &self.config.refresh);

        info!(
            base_url = %endpoint.base_url,
            store = store.name(),
            multi_region = self.config.is_multi_region(),
            "Session manager created"
        );

        Ok(SessionManager {
            inner: Arc::new(SessionInner {
                config: self.config,
                endpoint: RwLock::new(endpoint),
                selected_region: RwLock::new(selected_region),
                api,
                store,
                state: Observable::default(),
                scheduler,
                signals: Mutex::new(Some(signals)),
                queue: DeferredQueue::new(),
                connectivity,
                lifecycle,
                cookies: self.cookies,
                region_probe,
                epoch: AtomicU64::new(0),
                commit_lock: tokio::sync::Mutex::new(()),
                refreshing: AtomicBool::new(false),
                refresh_owed: AtomicBool::new(false),
                event_loop: Mutex::new(None),
            }),
        })
    }
}

fn region_probe_for(endpoint: &Endpoint, timeout: Duration) -> AuthResult<Arc<dyn NetworkProbe>> {
    Ok(Arc::new(HttpNetworkProbe::new(endpoint.base_url.clone(), timeout)?))
}

#[cfg(feature = "system-keyring")]
fn default_store() -> AuthResult<Arc<dyn CredentialStore>> {
    Ok(Arc::new(crate::store::KeyringCredentialStore::new()))
}

#[cfg(not(feature = "system-keyring"))]
fn default_store() -> AuthResult<Arc<dyn CredentialStore>> {
    Ok(Arc::new(crate::store::FileCredentialStore::in_default_location()?))
}

impl SessionManager {
    pub fn builder(config: SessionConfig) -> SessionManagerBuilder {
        SessionManagerBuilder::new(config)
    }

    /// Current state snapshot
    pub fn state(&self) -> SessionState {
        self.inner.state.get()
    }

    /// Receiver that yields the current state first, then every change
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.inner.state.subscribe()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    /// Endpoint calls currently go to
    pub fn endpoint(&self) -> Endpoint {
        self.inner.endpoint.read().clone()
    }

    pub fn selected_region(&self) -> Option<String> {
        self.inner.selected_region.read().clone()
    }

    pub fn queue(&self) -> &DeferredQueue {
        &self.inner.queue
    }

    pub fn connectivity(&self) -> &ConnectivityMonitor {
        &self.inner.connectivity
    }

    pub fn lifecycle(&self) -> &AppLifecycle {
        &self.inner.lifecycle
    }

    /// Whether a refresh is armed on either scheduling mechanism
    pub fn is_refresh_scheduled(&self) -> bool {
        self.inner.scheduler.is_armed()
    }

    /// Whether a refresh failed for lack of network and is still owed
    pub fn is_refresh_owed(&self) -> bool {
        self.inner.refresh_owed.load(Ordering::Acquire)
    }

    fn epoch(&self) -> u64 {
        self.inner.epoch.load(Ordering::Acquire)
    }

    /// Re-aim the connectivity probe after the active region changed
    fn follow_region(&self) -> AuthResult<()> {
        let Some(timeout) = self.inner.region_probe else {
            return Ok(());
        };
        let endpoint = self.endpoint();
        self.inner
            .connectivity
            .set_probe(region_probe_for(&endpoint, timeout)?);
        debug!(base_url = %endpoint.base_url, "Connectivity probe follows active region");
        Ok(())
    }

    fn access_token(&self) -> AuthResult<String> {
        self.inner
            .state
            .with(|s| s.access_token.clone())
            .ok_or(AuthError::NotAuthenticated)
    }

    /// Spawn the task reacting to scheduler signals and lifecycle edges
    ///
    /// Calling it again while running is a no-op.
    pub fn start(&self) {
        let mut event_loop = self.inner.event_loop.lock();
        if event_loop.as_ref().is_some_and(|h| !h.is_finished()) {
            return;
        }
        let Some(mut signals) = self.inner.signals.lock().take() else {
            warn!("Session event loop already consumed its signal channel");
            return;
        };

        let weak = Arc::downgrade(&self.inner);
        let mut lifecycle = self.inner.lifecycle.subscribe();
        *event_loop = Some(tokio::spawn(async move {
            debug!("Session event loop started");
            loop {
                tokio::select! {
                    due = signals.recv() => {
                        let Some(due) = due else { break };
                        let Some(inner) = weak.upgrade() else { break };
                        debug!(signal = ?due.signal, "Scheduled refresh due");
                        let manager = SessionManager { inner };
                        let succeeded = match manager.refresh(false).await {
                            Ok(()) => true,
                            Err(e) => {
                                debug!(error = %e, "Scheduled refresh did not complete");
                                !e.is_transient()
                            }
                        };
                        due.report(succeeded);
                    }
                    changed = lifecycle.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let app_state = *lifecycle.borrow_and_update();
                        let Some(inner) = weak.upgrade() else { break };
                        let manager = SessionManager { inner };
                        manager.on_lifecycle_change(app_state).await;
                    }
                }
            }
            debug!("Session event loop stopped");
        }));
    }

    /// Stop the event loop and cancel any armed refresh
    pub fn shutdown(&self) {
        if let Some(handle) = self.inner.event_loop.lock().take() {
            handle.abort();
        }
        self.inner.scheduler.cancel();
        info!("Session manager shut down");
    }

    async fn on_lifecycle_change(&self, app_state: AppState) {
        debug!(?app_state, "Re-evaluating refresh after lifecycle change");
        // Re-arming moves the pending refresh onto the mechanism for the new state
        if let Err(e) = self.refresh_token_when_needed().await {
            debug!(error = %e, "Refresh re-evaluation failed");
        }
    }
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        if let Some(handle) = self.event_loop.get_mut().take() {
            handle.abort();
        }
    }
}
