use super::SessionManager;
use crate::error::AuthResult;
use crate::jwt::{current_time_ms, decode_claims, AMR_MFA};
use crate::pkce::{build_authorization_url, AuthorizationParams, DirectLoginAction, STEP_UP_ACR_VALUE};
use crate::store::CredentialKey;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Embedded browser showing the hosted login page
pub trait BrowserView: Send + Sync {
    fn navigate(&self, url: &str);
}

/// Host surface able to start a top-level login from scratch
pub trait LoginSurface: Send + Sync {
    fn start_login(&self);
}

/// Receives the outcome of a dispatched code exchange
pub type CompletionCallback = Box<dyn FnOnce(AuthResult<()>) + Send>;

/// What to do around a hosted login callback
#[derive(Default)]
pub struct CallbackOptions {
    /// Keep the verifier after a successful exchange
    pub preserve_verifier: bool,
    /// Re-navigated to a fresh authorize URL when the exchange fails
    pub browser: Option<Arc<dyn BrowserView>>,
    /// Restarts login when the exchange fails and there is no browser or completion
    pub surface: Option<Arc<dyn LoginSurface>>,
    pub completion: Option<CompletionCallback>,
}

impl SessionManager {
    /// Start an authorization-code flow and return the URL to open
    ///
    /// The code verifier is in the store before the URL is returned, so the
    /// flow can be completed by a process recreated while the browser was up.
    pub async fn start_pkce_flow(
        &self,
        login_hint: Option<&str>,
        direct_login_action: Option<&DirectLoginAction>,
    ) -> AuthResult<String> {
        self.authorization_url(login_hint, direct_login_action, Vec::new())
            .await
    }

    async fn authorization_url(
        &self,
        login_hint: Option<&str>,
        direct_login_action: Option<&DirectLoginAction>,
        extra: Vec<(&str, String)>,
    ) -> AuthResult<String> {
        let endpoint = self.endpoint();
        let redirect_uri = self.inner.config.redirect_uri(&endpoint)?;

        let request = build_authorization_url(&AuthorizationParams {
            base_url: &endpoint.base_url,
            client_id: &endpoint.client_id,
            redirect_uri: &redirect_uri,
            scopes: &self.inner.config.scopes,
            login_hint,
            direct_login_action,
            extra,
        })?;

        self.inner
            .store
            .set(CredentialKey::CodeVerifier, &request.code_verifier)
            .await?;
        debug!("Authorization request prepared");
        Ok(request.url)
    }

    /// Handle the `?code=` redirect of the hosted login page
    ///
    /// Returns true once the stored verifier was found and the exchange was
    /// dispatched. The exchange result arrives through the session state and
    /// `options.completion`, not through the return value.
    pub async fn complete_hosted_login_callback(&self, code: &str, options: CallbackOptions) -> bool {
        let verifier = match self.inner.store.get(CredentialKey::CodeVerifier).await {
            Ok(Some(verifier)) => verifier,
            Ok(None) => {
                warn!("Login callback without a pending code verifier");
                return false;
            }
            Err(e) => {
                warn!(error = %e, "Failed to read code verifier");
                return false;
            }
        };

        let manager = self.clone();
        let code = code.to_string();
        tokio::spawn(async move {
            manager.exchange_code(code, verifier, options).await;
        });
        true
    }

    async fn exchange_code(&self, code: String, verifier: String, options: CallbackOptions) {
        let CallbackOptions {
            preserve_verifier,
            browser,
            surface,
            completion,
        } = options;

        let epoch = self.epoch();
        self.inner.state.update(|s| s.is_loading = true);

        let result = self.redeem_code(&code, &verifier, epoch).await;
        match &result {
            Ok(()) => {
                info!("Hosted login completed");
                if !preserve_verifier {
                    if let Err(e) = self.inner.store.remove(CredentialKey::CodeVerifier).await {
                        warn!(error = %e, "Failed to remove used code verifier");
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "Code exchange failed");
                self.inner.state.update(|s| s.is_loading = false);
                if let Some(browser) = &browser {
                    match self.start_pkce_flow(None, None).await {
                        Ok(url) => browser.navigate(&url),
                        Err(e) => warn!(error = %e, "Failed to restart login in browser"),
                    }
                } else if let (Some(surface), None) = (&surface, &completion) {
                    surface.start_login();
                }
            }
        }

        if let Some(completion) = completion {
            completion(result);
        }
    }

    async fn redeem_code(&self, code: &str, verifier: &str, epoch: u64) -> AuthResult<()> {
        let endpoint = self.endpoint();
        let redirect_uri = self.inner.config.redirect_uri(&endpoint)?;
        let tokens = self
            .inner
            .api
            .exchange_code(&endpoint, code, &redirect_uri, verifier)
            .await?;
        self.commit_credentials(&tokens.access_token, &tokens.refresh_token, epoch)
            .await
    }

    /// Ask for a stronger authentication and return the URL to open
    ///
    /// The resulting login completes through
    /// [`complete_hosted_login_callback`](Self::complete_hosted_login_callback)
    /// like any other.
    pub async fn start_step_up(&self, max_age: Option<Duration>) -> AuthResult<String> {
        let access_token = self.access_token()?;
        let endpoint = self.endpoint();
        self.inner
            .api
            .generate_step_up_session(&endpoint, &access_token)
            .await?;

        let mut extra = vec![("acr_values", STEP_UP_ACR_VALUE.to_string())];
        if let Some(max_age) = max_age {
            extra.push(("max_age", max_age.as_secs().to_string()));
        }
        self.authorization_url(None, None, extra).await
    }

    /// Whether the current access token carries a multi-factor login
    /// not older than `max_age`
    pub fn is_stepped_up(&self, max_age: Option<Duration>) -> bool {
        let Ok(access_token) = self.access_token() else {
            return false;
        };
        let Ok(claims) = decode_claims(&access_token) else {
            return false;
        };

        let multi_factor = claims.acr.as_deref() == Some(STEP_UP_ACR_VALUE)
            && claims.amr.iter().any(|m| m == AMR_MFA);
        if !multi_factor {
            return false;
        }

        match (max_age, claims.auth_time) {
            (None, _) => true,
            (Some(max_age), Some(auth_time)) => {
                let age_ms = current_time_ms().saturating_sub(auth_time.saturating_mul(1000));
                age_ms <= max_age.as_millis() as u64
            }
            (Some(_), None) => false,
        }
    }

    /// Assertion options for signing in with a passkey
    pub async fn passkey_login_options(&self, identifier: &str) -> AuthResult<Value> {
        self.inner
            .api
            .webauthn_prelogin(&self.endpoint(), identifier)
            .await
    }

    /// Trade a signed passkey assertion for a session
    pub async fn complete_passkey_login(&self, assertion: &Value) -> AuthResult<()> {
        let epoch = self.epoch();
        self.inner.state.update(|s| s.is_loading = true);
        let result = async {
            let tokens = self
                .inner
                .api
                .webauthn_postlogin(&self.endpoint(), assertion)
                .await?;
            self.commit_credentials(&tokens.access_token, &tokens.refresh_token, epoch)
                .await
        }
        .await;
        if result.is_err() {
            self.inner.state.update(|s| s.is_loading = false);
        }
        result
    }

    /// Creation options for registering a new passkey on this device
    pub async fn passkey_registration_options(&self) -> AuthResult<Value> {
        let access_token = self.access_token()?;
        self.inner
            .api
            .webauthn_register_options(&self.endpoint(), &access_token)
            .await
    }

    pub async fn verify_passkey_registration(&self, attestation: &Value) -> AuthResult<()> {
        let access_token = self.access_token()?;
        self.inner
            .api
            .webauthn_verify_registration(&self.endpoint(), &access_token, attestation)
            .await?;
        info!("Passkey registered");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_callback_options_default() {
        let options = CallbackOptions::default();
        assert!(!options.preserve_verifier);
        assert!(options.browser.is_none());
        assert!(options.surface.is_none());
        assert!(options.completion.is_none());
    }
}
