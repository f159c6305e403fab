use super::{SessionInner, SessionManager};
use crate::error::{AuthError, AuthResult};
use crate::jwt::{current_time_ms, decode_claims};
use crate::queue::{DeferredAction, Priority};
use crate::scheduler::{adaptive_offset, Scheduler};
use crate::store::CredentialKey;
use futures::FutureExt;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Queue id of the deferred refresh retry
pub const REFRESH_RETRY_ID: &str = "refresh_token";

/// Holds the single in-flight refresh slot until dropped
struct RefreshSlot<'a>(&'a SessionInner);

impl<'a> RefreshSlot<'a> {
    fn acquire(inner: &'a SessionInner) -> Option<Self> {
        inner
            .refreshing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()?;
        inner.state.update(|s| s.refreshing_token = true);
        Some(Self(inner))
    }
}

impl Drop for RefreshSlot<'_> {
    fn drop(&mut self) {
        self.0.state.update(|s| s.refreshing_token = false);
        self.0.refreshing.store(false, Ordering::Release);
    }
}

impl SessionManager {
    /// Redeem the refresh token for a new pair
    ///
    /// Returns false when there is nothing to refresh, another refresh is
    /// already in flight, or the refresh failed. A definitive rejection
    /// clears the session. Transient failures leave it alone; unless
    /// `is_manual`, a retry is queued for when the network comes back.
    pub async fn send_refresh_token(&self, is_manual: bool) -> bool {
        match self.refresh(is_manual).await {
            Ok(()) => true,
            Err(AuthError::RefreshInProgress) => {
                debug!("Refresh already in flight, not starting another");
                false
            }
            Err(e) => {
                debug!(error = %e, "Refresh failed");
                false
            }
        }
    }

    pub(super) async fn refresh(&self, is_manual: bool) -> AuthResult<()> {
        let Some(_slot) = RefreshSlot::acquire(&self.inner) else {
            return Err(AuthError::RefreshInProgress);
        };
        let epoch = self.epoch();

        let refresh_token = match self.inner.state.with(|s| s.refresh_token.clone()) {
            Some(token) => token,
            None => self
                .inner
                .store
                .get(CredentialKey::RefreshToken)
                .await?
                .ok_or(AuthError::NotAuthenticated)?,
        };

        if !is_manual && self.inner.connectivity.is_offline() {
            self.defer_refresh();
            return Err(AuthError::NetworkError("network is offline".to_string()));
        }

        let endpoint = self.endpoint();
        debug!(manual = is_manual, "Refreshing access token");
        match self.inner.api.refresh_token(&endpoint, &refresh_token).await {
            Ok(tokens) => {
                self.commit_credentials(&tokens.access_token, &tokens.refresh_token, epoch)
                    .await?;
                self.inner.refresh_owed.store(false, Ordering::Release);
                info!("Access token refreshed");
                Ok(())
            }
            Err(e) if e.is_definitive_rejection() => {
                warn!(error = %e, "Refresh token rejected, signing out");
                self.clear_credentials_from(epoch).await;
                Err(e)
            }
            Err(e) if e.is_transient() => {
                warn!(error = %e, "Refresh failed, keeping current session");
                if is_manual {
                    self.inner.refresh_owed.store(true, Ordering::Release);
                } else {
                    self.defer_refresh();
                }
                Err(e)
            }
            Err(e) => {
                warn!(error = %e, "Refresh returned an unusable response");
                Err(e)
            }
        }
    }

    /// Mark the refresh owed and queue a retry for the next network restore
    fn defer_refresh(&self) {
        self.inner.refresh_owed.store(true, Ordering::Release);
        let action = refresh_retry(Arc::downgrade(&self.inner));
        if self
            .inner
            .queue
            .enqueue_unique(REFRESH_RETRY_ID, action, Priority::High)
        {
            debug!("Refresh deferred until the network returns");
        }
    }

    /// Decide whether the token needs refreshing now or later
    ///
    /// Runs on every lifecycle edge because background timing is coarse and
    /// the previous schedule may have been missed.
    pub async fn refresh_token_when_needed(&self) -> AuthResult<()> {
        let access_token = self.inner.state.with(|s| s.access_token.clone());

        let Some(access_token) = access_token else {
            let has_refresh_token = self.inner.state.with(|s| s.refresh_token.is_some())
                || self
                    .inner
                    .store
                    .get(CredentialKey::RefreshToken)
                    .await?
                    .is_some();
            if has_refresh_token {
                // A background refresh failed without leaving an access token behind
                info!("Refresh token without access token, refreshing now");
                return self.refresh(false).await;
            }
            return Ok(());
        };

        let offset = match decode_claims(&access_token) {
            Ok(claims) => adaptive_offset(claims.exp, current_time_ms(), &self.inner.config.refresh),
            Err(e) => {
                warn!(error = %e, "Access token expiry is unreadable, refreshing now");
                Duration::ZERO
            }
        };

        if offset.is_zero() {
            return self.refresh(false).await;
        }
        self.inner.scheduler.schedule(offset);
        Ok(())
    }

    /// Replay deferred work and settle an owed refresh
    pub async fn on_network_restored(&self) -> AuthResult<()> {
        let expired = self
            .inner
            .queue
            .remove_expired(self.inner.config.max_queue_age());
        if expired > 0 {
            debug!(expired, "Dropped stale deferred actions");
        }
        let replayed = self.inner.queue.process_all().await;
        debug!(replayed, "Replayed deferred actions");

        if self.is_refresh_owed() {
            info!("Network restored, running owed refresh");
            return match self.refresh(true).await {
                Err(AuthError::RefreshInProgress) => Ok(()),
                other => other,
            };
        }
        Ok(())
    }
}

fn refresh_retry(inner: Weak<SessionInner>) -> DeferredAction {
    Arc::new(move || {
        let inner = inner.clone();
        async move {
            match inner.upgrade() {
                Some(inner) => match (SessionManager { inner }).refresh(true).await {
                    Err(AuthError::RefreshInProgress) => Ok(()),
                    other => other,
                },
                None => Ok(()),
            }
        }
        .boxed()
    })
}
