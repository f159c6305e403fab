//! reqwest-backed identity provider client

use super::types::{Profile, Tenant, TokenResponse};
use super::IdentityApi;
use crate::config::Endpoint;
use crate::error::{AuthError, AuthResult};
use async_trait::async_trait;
use reqwest::{header, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, warn};

// User agent for all HTTP requests
const USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

/// Header scoping a call to one application of the tenant
pub const APPLICATION_ID_HEADER: &str = "x-application-id";

/// Default timeout for identity provider calls
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// HTTP client for the identity provider
#[derive(Debug, Clone)]
pub struct HttpIdentityApi {
    http_client: reqwest::Client,
}

impl Default for HttpIdentityApi {
    fn default() -> Self {
        Self {
            http_client: reqwest::Client::new(),
        }
    }
}

impl HttpIdentityApi {
    /// Create a client with the given request timeout
    pub fn new(timeout: Duration) -> AuthResult<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| AuthError::ConfigError(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { http_client })
    }

    /// Reuse an existing reqwest client (connection pool, proxies, ...)
    pub fn with_client(http_client: reqwest::Client) -> Self {
        Self { http_client }
    }

    fn request(
        &self,
        method: reqwest::Method,
        endpoint: &Endpoint,
        path: &str,
        access_token: Option<&str>,
    ) -> RequestBuilder {
        let mut request = self
            .http_client
            .request(method, endpoint.url(path))
            .header(header::ACCEPT, "application/json");

        if let Some(token) = access_token {
            request = request.bearer_auth(token);
        }
        if let Some(application_id) = &endpoint.application_id {
            request = request.header(APPLICATION_ID_HEADER, application_id);
        }
        request
    }

    /// Send and turn non-success statuses into typed failures
    async fn send(&self, request: RequestBuilder) -> AuthResult<Response> {
        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let headers = response.headers().clone();
        let body = response.text().await.unwrap_or_default();
        warn!(%status, "Identity provider rejected request");
        Err(AuthError::Authentication {
            status,
            headers,
            body,
        })
    }

    async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> AuthResult<T> {
        let response = self.send(request).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| AuthError::InvalidResponse(format!("Failed to parse response: {}", e)))
    }
}

#[async_trait]
impl IdentityApi for HttpIdentityApi {
    async fn exchange_code(
        &self,
        endpoint: &Endpoint,
        code: &str,
        redirect_uri: &str,
        code_verifier: &str,
    ) -> AuthResult<TokenResponse> {
        debug!("Exchanging authorization code for tokens");
        let request = self
            .request(reqwest::Method::POST, endpoint, "oauth/token", None)
            .json(&json!({
                "grant_type": "authorization_code",
                "code": code,
                "redirect_uri": redirect_uri,
                "code_verifier": code_verifier,
                "client_id": endpoint.client_id,
            }));
        self.send_json(request).await
    }

    async fn refresh_token(
        &self,
        endpoint: &Endpoint,
        refresh_token: &str,
    ) -> AuthResult<TokenResponse> {
        debug!("Refreshing access token");
        let request = self
            .request(reqwest::Method::POST, endpoint, "oauth/token", None)
            .json(&json!({
                "grant_type": "refresh_token",
                "refresh_token": refresh_token,
                "client_id": endpoint.client_id,
            }));
        self.send_json(request).await
    }

    async fn fetch_profile(&self, endpoint: &Endpoint, access_token: &str) -> AuthResult<Profile> {
        let request = self.request(reqwest::Method::GET, endpoint, "users/me", Some(access_token));
        self.send_json(request).await
    }

    async fn fetch_tenants(
        &self,
        endpoint: &Endpoint,
        access_token: &str,
    ) -> AuthResult<Vec<Tenant>> {
        let request = self.request(
            reqwest::Method::GET,
            endpoint,
            "users/tenants",
            Some(access_token),
        );
        self.send_json(request).await
    }

    async fn switch_tenant(
        &self,
        endpoint: &Endpoint,
        access_token: &str,
        tenant_id: &str,
    ) -> AuthResult<()> {
        let request = self
            .request(reqwest::Method::PUT, endpoint, "tenant", Some(access_token))
            .json(&json!({ "tenantId": tenant_id }));
        self.send(request).await.map(|_| ())
    }

    async fn logout(
        &self,
        endpoint: &Endpoint,
        access_token: &str,
        cookies: &str,
    ) -> AuthResult<()> {
        let request = self
            .request(
                reqwest::Method::POST,
                endpoint,
                "oauth/logout/token",
                Some(access_token),
            )
            .header(header::COOKIE, cookies)
            .json(&json!({}));
        self.send(request).await.map(|_| ())
    }

    async fn generate_step_up_session(
        &self,
        endpoint: &Endpoint,
        access_token: &str,
    ) -> AuthResult<Value> {
        let request = self
            .request(
                reqwest::Method::POST,
                endpoint,
                "users/step-up/generate",
                Some(access_token),
            )
            .json(&json!({}));
        self.send_json(request).await
    }

    async fn webauthn_prelogin(&self, endpoint: &Endpoint, identifier: &str) -> AuthResult<Value> {
        let request = self
            .request(reqwest::Method::POST, endpoint, "webauthn/prelogin", None)
            .json(&json!({ "identifier": identifier }));
        self.send_json(request).await
    }

    async fn webauthn_postlogin(
        &self,
        endpoint: &Endpoint,
        assertion: &Value,
    ) -> AuthResult<TokenResponse> {
        let request = self
            .request(reqwest::Method::POST, endpoint, "webauthn/postlogin", None)
            .json(assertion);
        self.send_json(request).await
    }

    async fn webauthn_register_options(
        &self,
        endpoint: &Endpoint,
        access_token: &str,
    ) -> AuthResult<Value> {
        let request = self
            .request(
                reqwest::Method::POST,
                endpoint,
                "webauthn/register",
                Some(access_token),
            )
            .json(&json!({}));
        self.send_json(request).await
    }

    async fn webauthn_verify_registration(
        &self,
        endpoint: &Endpoint,
        access_token: &str,
        attestation: &Value,
    ) -> AuthResult<()> {
        let request = self
            .request(
                reqwest::Method::POST,
                endpoint,
                "webauthn/verify",
                Some(access_token),
            )
            .json(attestation);
        self.send(request).await.map(|_| ())
    }
}
