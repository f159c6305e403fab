//! Remote identity provider client
//!
//! The client is stateless: every call receives the [`Endpoint`] to talk to,
//! so switching region only changes what the session manager passes in.

mod http;
mod types;

pub use http::HttpIdentityApi;
pub use types::{Profile, Tenant, TokenResponse};

use crate::config::Endpoint;
use crate::error::AuthResult;
use async_trait::async_trait;
use serde_json::Value;

/// Request functions against the identity provider
///
/// Every method raises [`crate::AuthError::Authentication`] on a non-success
/// status and [`crate::AuthError::NetworkError`] when no response arrived.
#[async_trait]
pub trait IdentityApi: Send + Sync {
    /// `POST /oauth/token` with `grant_type=authorization_code`
    async fn exchange_code(
        &self,
        endpoint: &Endpoint,
        code: &str,
        redirect_uri: &str,
        code_verifier: &str,
    ) -> AuthResult<TokenResponse>;

    /// `POST /oauth/token` with `grant_type=refresh_token`
    async fn refresh_token(&self, endpoint: &Endpoint, refresh_token: &str)
        -> AuthResult<TokenResponse>;

    /// `GET /users/me`
    async fn fetch_profile(&self, endpoint: &Endpoint, access_token: &str) -> AuthResult<Profile>;

    /// `GET /users/tenants`
    async fn fetch_tenants(&self, endpoint: &Endpoint, access_token: &str)
        -> AuthResult<Vec<Tenant>>;

    /// `PUT /tenant`
    async fn switch_tenant(
        &self,
        endpoint: &Endpoint,
        access_token: &str,
        tenant_id: &str,
    ) -> AuthResult<()>;

    /// `POST /oauth/logout/token`, authenticated by the hosted-login cookie
    async fn logout(&self, endpoint: &Endpoint, access_token: &str, cookies: &str)
        -> AuthResult<()>;

    /// `POST /users/step-up/generate`
    async fn generate_step_up_session(
        &self,
        endpoint: &Endpoint,
        access_token: &str,
    ) -> AuthResult<Value>;

    /// `POST /webauthn/prelogin`: assertion options for the platform authenticator
    async fn webauthn_prelogin(&self, endpoint: &Endpoint, identifier: &str) -> AuthResult<Value>;

    /// `POST /webauthn/postlogin`: trade a signed assertion for tokens
    async fn webauthn_postlogin(
        &self,
        endpoint: &Endpoint,
        assertion: &Value,
    ) -> AuthResult<TokenResponse>;

    /// `POST /webauthn/register`: creation options for a new passkey
    async fn webauthn_register_options(
        &self,
        endpoint: &Endpoint,
        access_token: &str,
    ) -> AuthResult<Value>;

    /// `POST /webauthn/verify`: store the attestation of a new passkey
    async fn webauthn_verify_registration(
        &self,
        endpoint: &Endpoint,
        access_token: &str,
        attestation: &Value,
    ) -> AuthResult<()>;
}
