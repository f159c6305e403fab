use super::SessionManager;
use crate::api::Profile;
use crate::error::{AuthError, AuthResult};
use crate::jwt::{current_time_ms, decode_claims};
use crate::scheduler::{adaptive_offset, Scheduler};
use crate::store::CredentialKey;
use std::sync::atomic::Ordering;
use tracing::{debug, error, info, warn};

impl SessionManager {
    /// Adopt a new token pair
    ///
    /// Both tokens are persisted before anything else happens; if the store
    /// refuses them the whole session is cleared. The profile is fetched
    /// with the new access token and the next refresh is armed.
    pub async fn update_credentials(&self, access_token: &str, refresh_token: &str) -> AuthResult<()> {
        self.commit_credentials(access_token, refresh_token, self.epoch())
            .await
    }

    /// [`update_credentials`](Self::update_credentials) for a result obtained in `epoch`
    pub(super) async fn commit_credentials(
        &self,
        access_token: &str,
        refresh_token: &str,
        epoch: u64,
    ) -> AuthResult<()> {
        if access_token.trim().is_empty() {
            return Err(AuthError::InvalidArgument("access token is blank".to_string()));
        }
        if refresh_token.trim().is_empty() {
            return Err(AuthError::InvalidArgument("refresh token is blank".to_string()));
        }

        {
            let _commit = self.inner.commit_lock.lock().await;
            if self.epoch() != epoch {
                debug!("Discarding credentials from a cleared session");
                return Err(AuthError::SessionCleared);
            }
            if let Err(e) = self.persist_tokens(access_token, refresh_token).await {
                error!(error = %e, "Failed to persist credentials, clearing session");
                self.clear_locked().await;
                return Err(e);
            }
        }

        let claims = decode_claims(access_token);
        if let Err(e) = &claims {
            warn!(error = %e, "Access token expiry is unreadable, refreshing early");
        }

        let user = match self.fetch_user(access_token).await {
            Ok(user) => user,
            Err(e) => {
                warn!(error = %e, "Identity provider rejected the new access token");
                self.clear_credentials_from(epoch).await;
                return Err(e);
            }
        };

        let offset = match claims {
            Ok(claims) => adaptive_offset(claims.exp, current_time_ms(), &self.inner.config.refresh),
            Err(_) => std::time::Duration::ZERO,
        };

        // Armed under the lock so a concurrent clear always gets to cancel it
        let _commit = self.inner.commit_lock.lock().await;
        if self.epoch() != epoch {
            debug!("Session cleared while fetching profile, dropping credentials");
            return Err(AuthError::SessionCleared);
        }
        self.inner.state.update(|s| {
            s.access_token = Some(access_token.to_string());
            s.refresh_token = Some(refresh_token.to_string());
            s.user = user;
            s.is_authenticated = true;
            s.is_loading = false;
            s.initializing = false;
        });
        self.inner.scheduler.cancel();
        self.inner.scheduler.schedule(offset);
        info!(offset_ms = offset.as_millis() as u64, "Credentials updated, next refresh armed");
        Ok(())
    }

    async fn persist_tokens(&self, access_token: &str, refresh_token: &str) -> AuthResult<()> {
        self.inner
            .store
            .set(CredentialKey::AccessToken, access_token)
            .await?;
        self.inner
            .store
            .set(CredentialKey::RefreshToken, refresh_token)
            .await
    }

    /// Profile for a freshly issued token
    ///
    /// An unreachable provider keeps whatever user we already had; a
    /// definitive rejection is returned as an error.
    async fn fetch_user(&self, access_token: &str) -> AuthResult<Option<Profile>> {
        let endpoint = self.endpoint();
        match self.inner.api.fetch_profile(&endpoint, access_token).await {
            Ok(profile) => Ok(Some(profile)),
            Err(e) if e.is_definitive_rejection() => Err(e),
            Err(e) => {
                warn!(error = %e, "Profile fetch failed, keeping previous user");
                Ok(self.inner.state.with(|s| s.user.clone()))
            }
        }
    }

    /// Drop the session in memory and in the store
    pub async fn clear_credentials(&self) {
        let _commit = self.inner.commit_lock.lock().await;
        self.clear_locked().await;
    }

    /// Clear unless another clear already ended the session `epoch` belonged to
    pub(super) async fn clear_credentials_from(&self, epoch: u64) {
        let _commit = self.inner.commit_lock.lock().await;
        if self.epoch() == epoch {
            self.clear_locked().await;
        }
    }

    /// Caller holds the commit lock
    pub(super) async fn clear_locked(&self) {
        self.inner.epoch.fetch_add(1, Ordering::AcqRel);
        self.inner.scheduler.cancel();
        self.inner.refresh_owed.store(false, Ordering::Release);

        for key in [CredentialKey::AccessToken, CredentialKey::RefreshToken] {
            if let Err(e) = self.inner.store.remove(key).await {
                warn!(key = %key, error = %e, "Failed to remove credential");
            }
        }
        self.inner.state.update(|s| {
            s.clear_credentials();
            s.is_loading = false;
            s.initializing = false;
        });
        info!("Session cleared");
    }

    /// Restore the session persisted by a previous run
    ///
    /// Ends with `initializing == false` whatever happens. Returns a
    /// network error only when a stored session exists but could neither
    /// be refreshed nor adopted offline.
    pub async fn initialize(&self) -> AuthResult<()> {
        let result = self.restore().await;
        self.inner.state.update(|s| {
            s.initializing = false;
            s.is_loading = false;
        });
        result
    }

    async fn restore(&self) -> AuthResult<()> {
        let store = &self.inner.store;

        if self.inner.config.is_multi_region() {
            if let Some(key) = store.get(CredentialKey::SelectedRegion).await? {
                match self.inner.config.endpoint(Some(&key)) {
                    Ok(endpoint) => {
                        debug!(region = %key, "Restoring selected region");
                        *self.inner.endpoint.write() = endpoint;
                        *self.inner.selected_region.write() = Some(key);
                        self.follow_region()?;
                    }
                    Err(e) => warn!(error = %e, "Stored region is no longer configured"),
                }
            }
        }

        let access_token = store.get(CredentialKey::AccessToken).await?;
        let refresh_token = store.get(CredentialKey::RefreshToken).await?;

        let Some(refresh_token) = refresh_token else {
            if access_token.is_some() {
                warn!("Stored access token has no refresh token, discarding");
                store.remove(CredentialKey::AccessToken).await?;
            }
            debug!("No stored session");
            return Ok(());
        };

        let valid_access_token = access_token.filter(|token| {
            decode_claims(token)
                .map(|claims| !claims.is_expired(current_time_ms()))
                .unwrap_or(false)
        });

        if self.inner.connectivity.is_offline() {
            return match valid_access_token {
                Some(access_token) => {
                    info!("Offline, adopting stored session until the network returns");
                    self.adopt_offline(access_token, refresh_token);
                    Ok(())
                }
                None => {
                    self.inner.refresh_owed.store(true, Ordering::Release);
                    Err(AuthError::NetworkError(
                        "offline with an expired stored session".to_string(),
                    ))
                }
            };
        }

        match self.refresh(true).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_transient() => match valid_access_token {
                Some(access_token) => {
                    info!(error = %e, "Refresh unavailable, adopting stored session");
                    self.adopt_offline(access_token, refresh_token);
                    Ok(())
                }
                None => Err(e),
            },
            Err(e) if e.is_definitive_rejection() => {
                debug!("Stored session was revoked");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Use stored tokens as-is without contacting the provider
    fn adopt_offline(&self, access_token: String, refresh_token: String) {
        let offset = decode_claims(&access_token)
            .map(|claims| adaptive_offset(claims.exp, current_time_ms(), &self.inner.config.refresh))
            .unwrap_or_default();
        self.inner.state.update(|s| {
            s.access_token = Some(access_token);
            s.refresh_token = Some(refresh_token);
            s.is_authenticated = true;
        });
        self.inner.refresh_owed.store(true, Ordering::Release);
        self.inner.scheduler.cancel();
        self.inner.scheduler.schedule(offset);
    }
}
