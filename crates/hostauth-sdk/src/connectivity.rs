//! Network availability tracking

use crate::error::AuthResult;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, info, warn};

/// One-shot "can we actually reach anything" check
#[async_trait]
pub trait NetworkProbe: Send + Sync {
    async fn is_network_good(&self) -> bool;
}

/// Told when the network is back and verified
#[async_trait]
pub trait ConnectivityListener: Send + Sync {
    async fn on_network_restored(&self) -> AuthResult<()>;
}

/// Probe that sends a `HEAD` to the identity provider
///
/// Any HTTP answer counts as routable, even an error status.
#[derive(Debug, Clone)]
pub struct HttpNetworkProbe {
    client: reqwest::Client,
    url: String,
}

impl HttpNetworkProbe {
    pub fn new(url: impl Into<String>, timeout: Duration) -> AuthResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| {
                crate::AuthError::ConfigError(format!("Failed to build probe client: {}", e))
            })?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl NetworkProbe for HttpNetworkProbe {
    async fn is_network_good(&self) -> bool {
        match self.client.head(&self.url).send().await {
            Ok(response) => {
                debug!(status = %response.status(), "Network probe answered");
                true
            }
            Err(e) => {
                debug!(error = %e, "Network probe failed");
                false
            }
        }
    }
}

struct MonitorInner {
    offline: AtomicBool,
    generation: AtomicU64,
    debounce: RwLock<Duration>,
    probe: RwLock<Arc<dyn NetworkProbe>>,
    listener: RwLock<Option<Weak<dyn ConnectivityListener>>>,
}

/// Connectivity monitor
///
/// The host forwards its platform network callbacks to
/// [`on_network_lost`](Self::on_network_lost) and
/// [`on_network_available`](Self::on_network_available).
#[derive(Clone)]
pub struct ConnectivityMonitor {
    inner: Arc<MonitorInner>,
}

impl ConnectivityMonitor {
    pub fn new(probe: Arc<dyn NetworkProbe>, debounce: Duration) -> Self {
        Self {
            inner: Arc::new(MonitorInner {
                offline: AtomicBool::new(false),
                generation: AtomicU64::new(0),
                debounce: RwLock::new(debounce),
                probe: RwLock::new(probe),
                listener: RwLock::new(None),
            }),
        }
    }

    /// Lock-free
    pub fn is_offline(&self) -> bool {
        self.inner.offline.load(Ordering::Acquire)
    }

    pub fn set_listener(&self, listener: Weak<dyn ConnectivityListener>) {
        *self.inner.listener.write() = Some(listener);
    }

    /// Swap the probe, e.g. after the base URL changed
    pub fn set_probe(&self, probe: Arc<dyn NetworkProbe>) {
        *self.inner.probe.write() = probe;
    }

    pub fn set_debounce(&self, debounce: Duration) {
        *self.inner.debounce.write() = debounce;
    }

    pub fn on_network_lost(&self) {
        // Also invalidates any restore still waiting out its debounce
        self.inner.generation.fetch_add(1, Ordering::AcqRel);
        if !self.inner.offline.swap(true, Ordering::AcqRel) {
            info!("Network lost");
        }
    }

    /// Debounced: only the last call of a burst probes and notifies
    pub fn on_network_available(&self) {
        let generation = self.inner.generation.fetch_add(1, Ordering::AcqRel) + 1;
        let monitor = self.clone();
        let debounce = *self.inner.debounce.read();
        tokio::spawn(async move {
            tokio::time::sleep(debounce).await;
            if monitor.inner.generation.load(Ordering::Acquire) != generation {
                debug!("Network availability superseded during debounce");
                return;
            }
            monitor.validate_and_restore().await;
        });
    }

    /// Probe now and, when routable, clear the offline flag and notify
    ///
    /// Returns whether the network was found usable.
    pub async fn validate_and_restore(&self) -> bool {
        let probe = self.inner.probe.read().clone();
        if !probe.is_network_good().await {
            debug!("Network reported available but probe failed");
            return false;
        }

        self.inner.offline.store(false, Ordering::Release);
        info!("Network restored");

        let listener = self.inner.listener.read().as_ref().and_then(Weak::upgrade);
        if let Some(listener) = listener {
            if let Err(e) = listener.on_network_restored().await {
                if e.is_transient() {
                    debug!(error = %e, "Still unable to reach identity provider");
                } else {
                    warn!(error = %e, "Network restore handling failed");
                }
            }
        }
        true
    }
}
