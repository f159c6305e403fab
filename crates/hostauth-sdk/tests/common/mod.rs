//! Fakes shared by the integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use hostauth_sdk::api::{IdentityApi, Profile, Tenant, TokenResponse};
use hostauth_sdk::config::{Endpoint, SessionConfig};
use hostauth_sdk::connectivity::{ConnectivityMonitor, NetworkProbe};
use hostauth_sdk::jwt::current_time_ms;
use hostauth_sdk::manager::{BrowserView, LoginSurface, SessionCookies};
use hostauth_sdk::scheduler::TokioJobRunner;
use hostauth_sdk::store::{CredentialKey, CredentialStore, MemoryCredentialStore};
use hostauth_sdk::{AuthError, AuthResult, SessionManager, SessionState};
use parking_lot::Mutex;
use reqwest::header::HeaderMap;
use reqwest::StatusCode;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

pub const BASE_URL: &str = "https://auth.example.com";
pub const BUNDLE_ID: &str = "com.example.app";

/// Unsigned JWT expiring `lifetime` from now
pub fn token_expiring_in(lifetime: Duration, subject: &str) -> String {
    let exp = current_time_ms() / 1000 + lifetime.as_secs();
    token_with_claims(json!({ "exp": exp, "sub": subject }))
}

pub fn expired_token() -> String {
    let exp = current_time_ms() / 1000 - 60;
    token_with_claims(json!({ "exp": exp, "sub": "expired" }))
}

pub fn token_with_claims(claims: Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
    format!("{header}.{payload}.signature")
}

pub fn rejection(status: u16) -> AuthError {
    AuthError::Authentication {
        status: StatusCode::from_u16(status).unwrap(),
        headers: HeaderMap::new(),
        body: "rejected".to_string(),
    }
}

pub fn offline() -> AuthError {
    AuthError::NetworkError("connection refused".to_string())
}

/// Scripted outcome of a fake call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Ok,
    Rejected(u16),
    Offline,
}

impl Outcome {
    fn check(self) -> AuthResult<()> {
        match self {
            Outcome::Ok => Ok(()),
            Outcome::Rejected(status) => Err(rejection(status)),
            Outcome::Offline => Err(offline()),
        }
    }
}

pub struct FakeIdentityApi {
    pub exchange_calls: AtomicUsize,
    pub refresh_calls: AtomicUsize,
    pub profile_calls: AtomicUsize,
    pub logout_calls: AtomicUsize,
    pub switch_calls: AtomicUsize,
    pub step_up_calls: AtomicUsize,
    pub last_verifier: Mutex<Option<String>>,
    pub exchange: Mutex<Outcome>,
    pub refresh: Mutex<Outcome>,
    pub profile: Mutex<Outcome>,
    pub logout: Mutex<Outcome>,
    pub switch: Mutex<Outcome>,
    pub token_lifetime: Mutex<Duration>,
    pub logout_delay: Mutex<Duration>,
    hold_refresh: AtomicBool,
    release: Notify,
    hold_profile: AtomicBool,
    profile_release: Notify,
    issued: AtomicUsize,
}

impl Default for FakeIdentityApi {
    fn default() -> Self {
        Self {
            exchange_calls: AtomicUsize::new(0),
            refresh_calls: AtomicUsize::new(0),
            profile_calls: AtomicUsize::new(0),
            logout_calls: AtomicUsize::new(0),
            switch_calls: AtomicUsize::new(0),
            step_up_calls: AtomicUsize::new(0),
            last_verifier: Mutex::new(None),
            exchange: Mutex::new(Outcome::Ok),
            refresh: Mutex::new(Outcome::Ok),
            profile: Mutex::new(Outcome::Ok),
            logout: Mutex::new(Outcome::Ok),
            switch: Mutex::new(Outcome::Ok),
            token_lifetime: Mutex::new(Duration::from_secs(3600)),
            logout_delay: Mutex::new(Duration::ZERO),
            hold_refresh: AtomicBool::new(false),
            release: Notify::new(),
            hold_profile: AtomicBool::new(false),
            profile_release: Notify::new(),
            issued: AtomicUsize::new(0),
        }
    }
}

impl FakeIdentityApi {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Park refresh calls until [`release_refresh`](Self::release_refresh)
    pub fn hold_refresh(&self) {
        self.hold_refresh.store(true, Ordering::SeqCst);
    }

    pub fn release_refresh(&self) {
        self.hold_refresh.store(false, Ordering::SeqCst);
        self.release.notify_waiters();
    }

    /// Park profile fetches until [`release_profile`](Self::release_profile)
    pub fn hold_profile(&self) {
        self.hold_profile.store(true, Ordering::SeqCst);
    }

    pub fn release_profile(&self) {
        self.hold_profile.store(false, Ordering::SeqCst);
        self.profile_release.notify_waiters();
    }

    pub fn calls(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }

    fn issue(&self) -> TokenResponse {
        let n = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
        let lifetime = *self.token_lifetime.lock();
        TokenResponse {
            access_token: token_expiring_in(lifetime, &format!("user-{n}")),
            refresh_token: format!("refresh-{n}"),
            id_token: None,
            token_type: "Bearer".to_string(),
        }
    }
}

#[async_trait]
impl IdentityApi for FakeIdentityApi {
    async fn exchange_code(
        &self,
        _endpoint: &Endpoint,
        _code: &str,
        _redirect_uri: &str,
        code_verifier: &str,
    ) -> AuthResult<TokenResponse> {
        self.exchange_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_verifier.lock() = Some(code_verifier.to_string());
        let outcome = *self.exchange.lock();
        outcome.check()?;
        Ok(self.issue())
    }

    async fn refresh_token(
        &self,
        _endpoint: &Endpoint,
        _refresh_token: &str,
    ) -> AuthResult<TokenResponse> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        if self.hold_refresh.load(Ordering::SeqCst) {
            let released = self.release.notified();
            tokio::pin!(released);
            released.as_mut().enable();
            if self.hold_refresh.load(Ordering::SeqCst) {
                released.await;
            }
        }
        let outcome = *self.refresh.lock();
        outcome.check()?;
        Ok(self.issue())
    }

    async fn fetch_profile(&self, _endpoint: &Endpoint, _access_token: &str) -> AuthResult<Profile> {
        self.profile_calls.fetch_add(1, Ordering::SeqCst);
        if self.hold_profile.load(Ordering::SeqCst) {
            let released = self.profile_release.notified();
            tokio::pin!(released);
            released.as_mut().enable();
            if self.hold_profile.load(Ordering::SeqCst) {
                released.await;
            }
        }
        let outcome = *self.profile.lock();
        outcome.check()?;
        Ok(Profile {
            id: "user-1".to_string(),
            email: "jane@example.com".to_string(),
            name: Some("Jane".to_string()),
            profile_picture_url: None,
            verified: Some(true),
            tenant_id: Some("t-1".to_string()),
            tenant_ids: vec!["t-1".to_string(), "t-2".to_string()],
            tenants: Vec::new(),
            roles: Vec::new(),
        })
    }

    async fn fetch_tenants(&self, _endpoint: &Endpoint, _access_token: &str) -> AuthResult<Vec<Tenant>> {
        Ok(vec![
            Tenant {
                tenant_id: "t-1".to_string(),
                name: Some("Acme".to_string()),
            },
            Tenant {
                tenant_id: "t-2".to_string(),
                name: Some("Globex".to_string()),
            },
        ])
    }

    async fn switch_tenant(
        &self,
        _endpoint: &Endpoint,
        _access_token: &str,
        _tenant_id: &str,
    ) -> AuthResult<()> {
        self.switch_calls.fetch_add(1, Ordering::SeqCst);
        let outcome = *self.switch.lock();
        outcome.check()
    }

    async fn logout(&self, _endpoint: &Endpoint, _access_token: &str, _cookies: &str) -> AuthResult<()> {
        self.logout_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.logout_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let outcome = *self.logout.lock();
        outcome.check()
    }

    async fn generate_step_up_session(&self, _endpoint: &Endpoint, _access_token: &str) -> AuthResult<Value> {
        self.step_up_calls.fetch_add(1, Ordering::SeqCst);
        Ok(json!({ "ok": true }))
    }

    async fn webauthn_prelogin(&self, _endpoint: &Endpoint, identifier: &str) -> AuthResult<Value> {
        Ok(json!({ "challenge": "abc", "user": identifier }))
    }

    async fn webauthn_postlogin(&self, _endpoint: &Endpoint, _assertion: &Value) -> AuthResult<TokenResponse> {
        Ok(self.issue())
    }

    async fn webauthn_register_options(&self, _endpoint: &Endpoint, _access_token: &str) -> AuthResult<Value> {
        Ok(json!({ "challenge": "register" }))
    }

    async fn webauthn_verify_registration(
        &self,
        _endpoint: &Endpoint,
        _access_token: &str,
        _attestation: &Value,
    ) -> AuthResult<()> {
        Ok(())
    }
}

/// Memory store whose writes can be made to fail
#[derive(Default)]
pub struct FlakyStore {
    inner: MemoryCredentialStore,
    pub fail_writes: AtomicBool,
}

impl FlakyStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl CredentialStore for FlakyStore {
    async fn get(&self, key: CredentialKey) -> AuthResult<Option<String>> {
        self.inner.get(key).await
    }

    async fn set(&self, key: CredentialKey, value: &str) -> AuthResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(AuthError::StorageError("keystore locked".to_string()));
        }
        self.inner.set(key, value).await
    }

    async fn remove(&self, key: CredentialKey) -> AuthResult<()> {
        self.inner.remove(key).await
    }

    async fn clear(&self) -> AuthResult<()> {
        self.inner.clear().await
    }

    fn name(&self) -> &str {
        "flaky"
    }
}

pub struct FixedProbe(pub AtomicBool);

#[async_trait]
impl NetworkProbe for FixedProbe {
    async fn is_network_good(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

pub fn good_probe() -> Arc<FixedProbe> {
    Arc::new(FixedProbe(AtomicBool::new(true)))
}

pub struct StaticCookies(pub Option<String>);

impl SessionCookies for StaticCookies {
    fn cookies(&self, _base_url: &str) -> Option<String> {
        self.0.clone()
    }
}

#[derive(Default)]
pub struct RecordingBrowser {
    pub urls: Mutex<Vec<String>>,
}

impl BrowserView for RecordingBrowser {
    fn navigate(&self, url: &str) {
        self.urls.lock().push(url.to_string());
    }
}

#[derive(Default)]
pub struct RecordingSurface {
    pub started: AtomicBool,
}

impl LoginSurface for RecordingSurface {
    fn start_login(&self) {
        self.started.store(true, Ordering::SeqCst);
    }
}

/// Route SDK events to the test output; RUST_LOG overrides the filter
pub fn init_tracing() {
    let _ = hostauth_common::logging::init_logging("hostauth_sdk=debug");
}

pub fn config() -> SessionConfig {
    SessionConfig::new(BASE_URL, "client-1", BUNDLE_ID)
}

pub fn connectivity() -> ConnectivityMonitor {
    ConnectivityMonitor::new(good_probe(), Duration::from_millis(500))
}

pub fn build_manager(api: Arc<FakeIdentityApi>, store: Arc<dyn CredentialStore>) -> SessionManager {
    build_manager_with(config(), api, store)
}

pub fn build_manager_with(
    config: SessionConfig,
    api: Arc<FakeIdentityApi>,
    store: Arc<dyn CredentialStore>,
) -> SessionManager {
    init_tracing();
    SessionManager::builder(config)
        .api(api)
        .store(store)
        .background_jobs(Arc::new(TokioJobRunner::new(1)))
        .connectivity(connectivity())
        .cookies(Arc::new(StaticCookies(Some("fe_refresh=abc".to_string()))))
        .build()
        .unwrap()
}

/// Signed-in manager backed by a memory store
pub async fn signed_in(api: Arc<FakeIdentityApi>) -> (SessionManager, Arc<MemoryCredentialStore>) {
    let store = Arc::new(MemoryCredentialStore::new());
    let manager = build_manager(api, store.clone());
    manager
        .update_credentials(
            &token_expiring_in(Duration::from_secs(3600), "user-0"),
            "refresh-0",
        )
        .await
        .unwrap();
    (manager, store)
}

/// Tokens present together or absent together, and only when authenticated
pub fn assert_token_invariant(state: &SessionState) {
    assert_eq!(state.access_token.is_some(), state.refresh_token.is_some());
    assert_eq!(state.access_token.is_some(), state.is_authenticated);
    if state.access_token.is_none() {
        assert!(state.user.is_none());
    }
}

/// Poll until `condition` holds or two seconds pass
pub async fn wait_for(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}
