//! OAuth 2.0 authorization-code-with-PKCE request building
//!
//! Produces the verifier/challenge/state/nonce quadruple and the authorize
//! URL handed to the external browser. Token exchange lives in the API
//! client; this module never touches the network.

use crate::error::{AuthError, AuthResult};
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use oauth2::{basic::BasicClient, AuthUrl, ClientId, CsrfToken, RedirectUrl, Scope};
use rand::Rng;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use tracing::debug;

/// Path of the authorize endpoint below the base URL
pub const AUTHORIZE_PATH: &str = "oauth/authorize";

/// `acr_values` requested for step-up authentication
pub const STEP_UP_ACR_VALUE: &str = "http://schemas.openid.net/pape/policies/2007/06/multi-factor";

/// Generate cryptographically secure random 32-byte verifier
pub fn generate_code_verifier() -> String {
    let verifier_bytes: [u8; 32] = rand::thread_rng().gen();
    URL_SAFE_NO_PAD.encode(verifier_bytes)
}

/// Create SHA256 hash of verifier in base64url encoding
pub fn generate_code_challenge(verifier: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(hasher.finalize())
}

/// Generate random state parameter
pub fn generate_state() -> String {
    let state_bytes: [u8; 32] = rand::thread_rng().gen();
    URL_SAFE_NO_PAD.encode(state_bytes)
}

/// Generate random OpenID nonce
pub fn generate_nonce() -> String {
    let nonce_bytes: [u8; 16] = rand::thread_rng().gen();
    URL_SAFE_NO_PAD.encode(nonce_bytes)
}

/// Skip the hosted login page and jump straight to a login method
/// (social provider, SSO connection, ...)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectLoginAction {
    #[serde(rename = "type")]
    pub kind: String,
    pub data: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub additional_query_params: Option<HashMap<String, String>>,
}

impl DirectLoginAction {
    fn encode(&self) -> AuthResult<String> {
        Ok(STANDARD.encode(serde_json::to_vec(self)?))
    }
}

/// Inputs for one authorize URL
#[derive(Debug, Clone, Default)]
pub struct AuthorizationParams<'a> {
    pub base_url: &'a str,
    pub client_id: &'a str,
    pub redirect_uri: &'a str,
    pub scopes: &'a [String],
    pub login_hint: Option<&'a str>,
    pub direct_login_action: Option<&'a DirectLoginAction>,
    /// Extra parameters appended verbatim (step-up `acr_values`, `max_age`)
    pub extra: Vec<(&'a str, String)>,
}

/// A freshly generated authorization attempt
#[derive(Debug, Clone)]
pub struct AuthorizationRequest {
    pub url: String,
    pub state: String,
    pub nonce: String,
    pub code_verifier: String,
    pub code_challenge: String,
}

/// Generate a new PKCE context and the authorize URL binding it
pub fn build_authorization_url(params: &AuthorizationParams<'_>) -> AuthResult<AuthorizationRequest> {
    debug!(client_id = params.client_id, "Building authorization URL");

    let code_verifier = generate_code_verifier();
    let code_challenge = generate_code_challenge(&code_verifier);
    let state = generate_state();
    let nonce = generate_nonce();

    let auth_endpoint = format!("{}/{}", params.base_url.trim_end_matches('/'), AUTHORIZE_PATH);
    let client = BasicClient::new(
        ClientId::new(params.client_id.to_string()),
        None, // No client secret for PKCE flow
        AuthUrl::new(auth_endpoint)
            .map_err(|e| AuthError::ConfigError(format!("Invalid auth endpoint: {}", e)))?,
        None,
    )
    .set_redirect_uri(
        RedirectUrl::new(params.redirect_uri.to_string())
            .map_err(|e| AuthError::ConfigError(format!("Invalid redirect URI: {}", e)))?,
    );

    let state_for_request = state.clone();
    let mut auth_request = client
        .authorize_url(move || CsrfToken::new(state_for_request))
        .add_extra_param("code_challenge", code_challenge.clone())
        .add_extra_param("code_challenge_method", "S256")
        .add_extra_param("nonce", nonce.clone());

    for scope in params.scopes {
        auth_request = auth_request.add_scope(Scope::new(scope.clone()));
    }

    if let Some(hint) = params.login_hint {
        auth_request = auth_request.add_extra_param("login_hint", hint.to_string());
    }

    if let Some(action) = params.direct_login_action {
        auth_request = auth_request.add_extra_param("login_direct_action", action.encode()?);
    }

    for (key, value) in &params.extra {
        auth_request = auth_request.add_extra_param(*key, value.clone());
    }

    let (auth_url, _csrf_token) = auth_request.url();

    Ok(AuthorizationRequest {
        url: auth_url.to_string(),
        state,
        nonce,
        code_verifier,
        code_challenge,
    })
}
