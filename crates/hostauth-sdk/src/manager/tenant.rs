use super::SessionManager;
use crate::api::Tenant;
use crate::error::AuthResult;
use crate::scheduler::Scheduler;
use crate::store::CredentialKey;
use tracing::{debug, info, warn};

/// Cookie jar of the embedded browser
pub trait SessionCookies: Send + Sync {
    /// `Cookie` header value for the identity provider at `base_url`
    fn cookies(&self, base_url: &str) -> Option<String>;
}

/// Invoked once logout has finished
pub type LogoutCallback = Box<dyn FnOnce() + Send>;

impl SessionManager {
    /// Sign out
    ///
    /// Local credentials are always cleared, whether or not the remote
    /// logout was possible or succeeded.
    pub async fn logout(&self, callback: Option<LogoutCallback>) {
        self.inner.state.update(|s| s.is_loading = true);
        self.inner.scheduler.cancel();
        self.inner.queue.clear();

        let endpoint = self.endpoint();
        let access_token = self.inner.state.with(|s| s.access_token.clone());
        let cookies = self
            .inner
            .cookies
            .as_ref()
            .and_then(|jar| jar.cookies(&endpoint.base_url));

        // Store emptied before the signed-out state is observable
        {
            let _commit = self.inner.commit_lock.lock().await;
            self.wipe_store().await;
            self.clear_locked().await;
        }

        match (access_token, cookies) {
            (Some(access_token), Some(cookies)) => {
                if let Err(e) = self
                    .inner
                    .api
                    .logout(&endpoint, &access_token, &cookies)
                    .await
                {
                    warn!(error = %e, "Remote logout failed");
                }
            }
            _ => debug!("Skipping remote logout, no browser session"),
        }

        self.inner.state.update(|s| s.is_loading = false);
        info!("Logged out");

        if let Some(callback) = callback {
            callback();
        }
    }

    /// Clear every stored key except the region selection
    ///
    /// Caller holds the commit lock
    async fn wipe_store(&self) {
        let store = &self.inner.store;
        let region = match store.get(CredentialKey::SelectedRegion).await {
            Ok(region) => region,
            Err(e) => {
                warn!(error = %e, "Failed to read selected region before wipe");
                None
            }
        };
        if let Err(e) = store.clear().await {
            warn!(error = %e, "Failed to clear credential store");
            return;
        }
        if let Some(region) = region {
            if let Err(e) = store.set(CredentialKey::SelectedRegion, &region).await {
                warn!(error = %e, "Failed to keep selected region across logout");
            }
        }
    }

    /// Tenants the signed-in user belongs to
    pub async fn fetch_tenants(&self) -> AuthResult<Vec<Tenant>> {
        let access_token = self.access_token()?;
        self.inner
            .api
            .fetch_tenants(&self.endpoint(), &access_token)
            .await
    }

    /// Tenant chosen by the last successful [`switch_tenant`](Self::switch_tenant)
    pub async fn current_tenant_id(&self) -> AuthResult<Option<String>> {
        self.inner.store.get(CredentialKey::CurrentTenantId).await
    }

    /// Move the session to another tenant
    ///
    /// Returns false without touching the session when the switch is
    /// refused. On success the token is refreshed right away so it carries
    /// the new tenant, and the refresh outcome is returned.
    pub async fn switch_tenant(&self, tenant_id: &str) -> bool {
        let access_token = match self.access_token() {
            Ok(token) => token,
            Err(e) => {
                warn!(error = %e, "Cannot switch tenant");
                return false;
            }
        };

        self.inner.state.update(|s| s.is_loading = true);
        let switched = self
            .inner
            .api
            .switch_tenant(&self.endpoint(), &access_token, tenant_id)
            .await;
        self.inner.state.update(|s| s.is_loading = false);

        if let Err(e) = switched {
            warn!(tenant_id, error = %e, "Tenant switch failed");
            return false;
        }
        info!(tenant_id, "Switched tenant");

        if let Err(e) = self
            .inner
            .store
            .set(CredentialKey::CurrentTenantId, tenant_id)
            .await
        {
            warn!(error = %e, "Failed to persist current tenant");
        }

        self.send_refresh_token(true).await
    }

    /// Point the session at another region
    ///
    /// Tokens from the previous region mean nothing to the new one, so the
    /// session is cleared.
    pub async fn select_region(&self, key: &str) -> AuthResult<()> {
        let endpoint = self.inner.config.endpoint(Some(key))?;
        self.inner
            .store
            .set(CredentialKey::SelectedRegion, key)
            .await?;

        self.inner.scheduler.cancel();
        *self.inner.endpoint.write() = endpoint;
        *self.inner.selected_region.write() = Some(key.to_string());
        self.follow_region()?;
        self.inner.queue.clear();
        self.clear_credentials().await;
        info!(region = key, "Region selected");
        Ok(())
    }
}
