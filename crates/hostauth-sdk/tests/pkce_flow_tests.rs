mod common;

use common::*;
use hostauth_sdk::manager::CallbackOptions;
use hostauth_sdk::pkce::{generate_code_challenge, STEP_UP_ACR_VALUE};
use hostauth_sdk::store::{CredentialKey, CredentialStore, FileCredentialStore, MemoryCredentialStore};
use hostauth_sdk::{AuthResult, DirectLoginAction};
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use url::Url;

fn query(url: &str) -> HashMap<String, String> {
    Url::parse(url)
        .unwrap()
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect()
}

fn completion() -> (CallbackOptions, oneshot::Receiver<AuthResult<()>>) {
    let (tx, rx) = oneshot::channel();
    let options = CallbackOptions {
        completion: Some(Box::new(move |result| {
            let _ = tx.send(result);
        })),
        ..CallbackOptions::default()
    };
    (options, rx)
}

#[tokio::test]
async fn test_start_pkce_flow_persists_verifier_first() {
    let api = FakeIdentityApi::new();
    let store = Arc::new(MemoryCredentialStore::new());
    let manager = build_manager(api, store.clone());

    let action = DirectLoginAction {
        kind: "social-login".to_string(),
        data: "google".to_string(),
        additional_query_params: None,
    };
    let url = manager
        .start_pkce_flow(Some("jane@example.com"), Some(&action))
        .await
        .unwrap();
    let params = query(&url);

    let verifier = store
        .get(CredentialKey::CodeVerifier)
        .await
        .unwrap()
        .expect("verifier stored");
    assert!(url.starts_with("https://auth.example.com/oauth/authorize?"));
    assert_eq!(params["response_type"], "code");
    assert_eq!(params["client_id"], "client-1");
    assert_eq!(params["code_challenge"], generate_code_challenge(&verifier));
    assert_eq!(params["code_challenge_method"], "S256");
    assert_eq!(
        params["redirect_uri"],
        "com.example.app://auth.example.com/oauth/callback"
    );
    assert_eq!(params["login_hint"], "jane@example.com");
    assert!(params.contains_key("login_direct_action"));
    assert!(params.contains_key("nonce"));
    assert!(params.contains_key("state"));
}

#[tokio::test]
async fn test_login_survives_process_restart() {
    let dir = tempfile::tempdir().unwrap();
    let api = FakeIdentityApi::new();

    let url = {
        let manager = build_manager(api.clone(), Arc::new(FileCredentialStore::new(dir.path())));
        manager.start_pkce_flow(None, None).await.unwrap()
    };

    // Fresh process: nothing in memory, only what reached the disk
    let store = Arc::new(FileCredentialStore::new(dir.path()));
    let manager = build_manager(api.clone(), store.clone());
    let (options, rx) = completion();
    assert!(
        manager
            .complete_hosted_login_callback("auth-code", options)
            .await
    );
    rx.await.unwrap().unwrap();

    let verifier = api.last_verifier.lock().clone().unwrap();
    assert_eq!(query(&url)["code_challenge"], generate_code_challenge(&verifier));

    let state = manager.state();
    assert_token_invariant(&state);
    assert!(state.is_authenticated);
    // Used verifier is gone, tokens are on disk
    assert!(store.get(CredentialKey::CodeVerifier).await.unwrap().is_none());
    assert!(store.get(CredentialKey::RefreshToken).await.unwrap().is_some());
}

#[tokio::test]
async fn test_callback_without_verifier_fails_fast() {
    let api = FakeIdentityApi::new();
    let manager = build_manager(api.clone(), Arc::new(MemoryCredentialStore::new()));

    assert!(
        !manager
            .complete_hosted_login_callback("auth-code", CallbackOptions::default())
            .await
    );
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(FakeIdentityApi::calls(&api.exchange_calls), 0);
}

#[tokio::test]
async fn test_preserve_verifier() {
    let api = FakeIdentityApi::new();
    let store = Arc::new(MemoryCredentialStore::new());
    let manager = build_manager(api, store.clone());
    manager.start_pkce_flow(None, None).await.unwrap();

    let (mut options, rx) = completion();
    options.preserve_verifier = true;
    assert!(manager.complete_hosted_login_callback("code", options).await);
    rx.await.unwrap().unwrap();
    assert!(store.get(CredentialKey::CodeVerifier).await.unwrap().is_some());
}

#[tokio::test]
async fn test_failed_exchange_restarts_in_browser() {
    let api = FakeIdentityApi::new();
    *api.exchange.lock() = Outcome::Rejected(400);
    let store = Arc::new(MemoryCredentialStore::new());
    let manager = build_manager(api.clone(), store.clone());
    manager.start_pkce_flow(None, None).await.unwrap();
    let first_verifier = store.get(CredentialKey::CodeVerifier).await.unwrap();

    let browser = Arc::new(RecordingBrowser::default());
    let (mut options, rx) = completion();
    options.browser = Some(browser.clone());

    // Dispatched, so plausible, even though the exchange will fail
    assert!(manager.complete_hosted_login_callback("bad-code", options).await);
    assert!(rx.await.unwrap().is_err());

    let urls = browser.urls.lock().clone();
    assert_eq!(urls.len(), 1);
    let new_verifier = store.get(CredentialKey::CodeVerifier).await.unwrap();
    assert_ne!(new_verifier, first_verifier);
    assert_eq!(
        query(&urls[0])["code_challenge"],
        generate_code_challenge(&new_verifier.unwrap())
    );

    let state = manager.state();
    assert_token_invariant(&state);
    assert!(!state.is_loading);
}

#[tokio::test]
async fn test_failed_exchange_restarts_login_surface() {
    let api = FakeIdentityApi::new();
    *api.exchange.lock() = Outcome::Rejected(400);
    let manager = build_manager(api, Arc::new(MemoryCredentialStore::new()));
    manager.start_pkce_flow(None, None).await.unwrap();

    let surface = Arc::new(RecordingSurface::default());
    let options = CallbackOptions {
        surface: Some(surface.clone()),
        ..CallbackOptions::default()
    };
    assert!(manager.complete_hosted_login_callback("bad-code", options).await);
    wait_for(|| surface.started.load(Ordering::SeqCst)).await;
}

#[tokio::test]
async fn test_step_up_flow() {
    let api = FakeIdentityApi::new();
    let (manager, _store) = signed_in(api.clone()).await;
    assert!(!manager.is_stepped_up(None));

    let url = manager
        .start_step_up(Some(Duration::from_secs(300)))
        .await
        .unwrap();
    let params = query(&url);
    assert_eq!(params["acr_values"], STEP_UP_ACR_VALUE);
    assert_eq!(params["max_age"], "300");
    assert_eq!(FakeIdentityApi::calls(&api.step_up_calls), 1);

    let now = hostauth_sdk::jwt::current_time_ms() / 1000;
    let stepped_up = token_with_claims(json!({
        "exp": now + 3600,
        "auth_time": now - 60,
        "acr": STEP_UP_ACR_VALUE,
        "amr": ["pwd", "mfa"],
    }));
    manager
        .update_credentials(&stepped_up, "refresh-mfa")
        .await
        .unwrap();

    assert!(manager.is_stepped_up(None));
    assert!(manager.is_stepped_up(Some(Duration::from_secs(300))));
    assert!(!manager.is_stepped_up(Some(Duration::from_secs(30))));
}

#[tokio::test]
async fn test_passkey_login_and_registration() {
    let api = FakeIdentityApi::new();
    let manager = build_manager(api, Arc::new(MemoryCredentialStore::new()));

    let options = manager
        .passkey_login_options("jane@example.com")
        .await
        .unwrap();
    assert_eq!(options["user"], "jane@example.com");

    manager
        .complete_passkey_login(&json!({ "id": "cred", "response": {} }))
        .await
        .unwrap();
    assert!(manager.state().is_authenticated);

    let creation = manager.passkey_registration_options().await.unwrap();
    assert_eq!(creation["challenge"], "register");
    manager
        .verify_passkey_registration(&json!({ "id": "new-cred" }))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_login_started_during_slow_logout_survives() {
    let api = FakeIdentityApi::new();
    *api.logout_delay.lock() = Duration::from_millis(300);
    let (manager, store) = signed_in(api.clone()).await;

    let logout = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.logout(None).await })
    };
    wait_for(|| !manager.state().is_authenticated).await;

    manager.start_pkce_flow(None, None).await.unwrap();
    logout.await.unwrap();
    assert_eq!(FakeIdentityApi::calls(&api.logout_calls), 1);
    assert!(store
        .get(CredentialKey::CodeVerifier)
        .await
        .unwrap()
        .is_some());

    let (options, rx) = completion();
    assert!(manager.complete_hosted_login_callback("code-1", options).await);
    rx.await.unwrap().unwrap();
    assert!(manager.state().is_authenticated);
    assert!(store
        .get(CredentialKey::RefreshToken)
        .await
        .unwrap()
        .is_some());
}
