//! SDK configuration
//!
//! Configuration is passed explicitly at construction. [`SessionConfig`]
//! also implements the shared layered loader so hosts can keep it in a TOML
//! file with `HOSTAUTH_` environment overrides.

use crate::error::{AuthError, AuthResult};
use hostauth_common::{ConfigLoader, ConfigurationError};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use url::Url;

/// How the identity provider redirects back into the app
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CallbackMechanism {
    /// Verified https link owned by the app
    AppLink,
    /// `{bundle_id}://` custom URL scheme
    #[default]
    CustomScheme,
}

/// One deployment of the identity provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub key: String,
    pub base_url: String,
    pub client_id: String,
    #[serde(default)]
    pub application_id: Option<String>,
}

/// Where API calls go and who they are made as
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub base_url: String,
    pub client_id: String,
    pub application_id: Option<String>,
}

impl Endpoint {
    /// Join a path onto the base URL
    pub fn url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    fn host(&self) -> AuthResult<String> {
        let parsed = Url::parse(&self.base_url)
            .map_err(|e| AuthError::ConfigError(format!("Invalid base URL: {}", e)))?;
        let host = parsed
            .host_str()
            .ok_or_else(|| AuthError::ConfigError("Base URL has no host".to_string()))?;
        Ok(match parsed.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        })
    }
}

impl From<&Region> for Endpoint {
    fn from(region: &Region) -> Self {
        Self {
            base_url: region.base_url.clone(),
            client_id: region.client_id.clone(),
            application_id: region.application_id.clone(),
        }
    }
}

/// Refresh timing knobs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefreshSettings {
    /// Tokens with less lifetime left than this refresh immediately
    #[serde(default = "default_min_window_ms")]
    pub min_window_ms: u64,
    /// Fraction of the remaining lifetime to wait before refreshing
    #[serde(default = "default_refresh_ratio")]
    pub ratio: f64,
    /// Deferred retries older than this are dropped unexecuted
    #[serde(default = "default_max_queue_age_ms")]
    pub max_queue_age_ms: u64,
    /// Linear backoff step handed to the platform job scheduler
    #[serde(default = "default_job_backoff_secs")]
    pub job_backoff_secs: u64,
}

fn default_min_window_ms() -> u64 {
    20_000
}
fn default_refresh_ratio() -> f64 {
    0.8
}
fn default_max_queue_age_ms() -> u64 {
    300_000
}
fn default_job_backoff_secs() -> u64 {
    30
}

impl Default for RefreshSettings {
    fn default() -> Self {
        Self {
            min_window_ms: default_min_window_ms(),
            ratio: default_refresh_ratio(),
            max_queue_age_ms: default_max_queue_age_ms(),
            job_backoff_secs: default_job_backoff_secs(),
        }
    }
}

/// Connectivity monitor knobs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectivitySettings {
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
}

fn default_debounce_ms() -> u64 {
    500
}
fn default_probe_timeout_ms() -> u64 {
    3_000
}

impl Default for ConnectivitySettings {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            probe_timeout_ms: default_probe_timeout_ms(),
        }
    }
}

/// Complete SDK configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Identity provider base URL (used when no region is selected)
    pub base_url: String,
    pub client_id: String,
    #[serde(default)]
    pub application_id: Option<String>,
    /// Application package / bundle identifier
    pub bundle_id: String,
    #[serde(default)]
    pub callback: CallbackMechanism,
    #[serde(default = "default_scopes")]
    pub scopes: Vec<String>,
    #[serde(default)]
    pub regions: Vec<Region>,
    #[serde(default)]
    pub refresh: RefreshSettings,
    #[serde(default)]
    pub connectivity: ConnectivitySettings,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_scopes() -> Vec<String> {
    vec!["openid".to_string(), "email".to_string(), "profile".to_string()]
}
fn default_request_timeout_secs() -> u64 {
    30
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            client_id: String::new(),
            application_id: None,
            bundle_id: "com.example.app".to_string(),
            callback: CallbackMechanism::default(),
            scopes: default_scopes(),
            regions: Vec::new(),
            refresh: RefreshSettings::default(),
            connectivity: ConnectivitySettings::default(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl ConfigLoader<SessionConfig> for SessionConfig {
    const ENV_PREFIX: &'static str = "HOSTAUTH_";
    const DEFAULT_FILE: &'static str = "hostauth.toml";
}

impl SessionConfig {
    /// Single-region configuration with defaults for everything else
    pub fn new(
        base_url: impl Into<String>,
        client_id: impl Into<String>,
        bundle_id: impl Into<String>,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            client_id: client_id.into(),
            bundle_id: bundle_id.into(),
            ..Self::default()
        }
    }

    /// Load from a TOML file layered over defaults and env overrides, then validate
    pub fn from_file(path: &Path) -> AuthResult<Self> {
        let config = <SessionConfig as ConfigLoader<SessionConfig>>::load_from_file(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the session core cannot run with
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.regions.is_empty() {
            Self::validate_endpoint("base_url", &self.base_url, &self.client_id)?;
        }

        let mut seen = HashSet::new();
        for region in &self.regions {
            if region.key.trim().is_empty() {
                return Err(ConfigurationError::invalid("regions.key", "must not be empty"));
            }
            if !seen.insert(region.key.as_str()) {
                return Err(ConfigurationError::invalid(
                    "regions.key",
                    format!("duplicate region '{}'", region.key),
                ));
            }
            Self::validate_endpoint(
                &format!("regions.{}.base_url", region.key),
                &region.base_url,
                &region.client_id,
            )?;
        }

        if self.bundle_id.trim().is_empty() {
            return Err(ConfigurationError::invalid("bundle_id", "must not be empty"));
        }
        if !(self.refresh.ratio > 0.0 && self.refresh.ratio <= 1.0) {
            return Err(ConfigurationError::invalid(
                "refresh.ratio",
                "must be within (0, 1]",
            ));
        }
        Ok(())
    }

    fn validate_endpoint(
        key: &str,
        base_url: &str,
        client_id: &str,
    ) -> Result<(), ConfigurationError> {
        if base_url.trim().is_empty() {
            return Err(ConfigurationError::invalid(key, "must not be empty"));
        }
        Url::parse(base_url).map_err(|e| ConfigurationError::invalid(key, e.to_string()))?;
        if client_id.trim().is_empty() {
            return Err(ConfigurationError::invalid("client_id", "must not be empty"));
        }
        Ok(())
    }

    /// Whether this is a multi-region deployment
    pub fn is_multi_region(&self) -> bool {
        !self.regions.is_empty()
    }

    pub fn region(&self, key: &str) -> AuthResult<&Region> {
        self.regions
            .iter()
            .find(|r| r.key == key)
            .ok_or_else(|| AuthError::InvalidRegion(key.to_string()))
    }

    /// Endpoint for the given region, or the top-level one when `None`
    pub fn endpoint(&self, region: Option<&str>) -> AuthResult<Endpoint> {
        match region {
            Some(key) => self.region(key).map(Endpoint::from),
            None => Ok(Endpoint {
                base_url: self.base_url.clone(),
                client_id: self.client_id.clone(),
                application_id: self.application_id.clone(),
            }),
        }
    }

    /// Redirect URI the identity provider sends the authorization code to
    pub fn redirect_uri(&self, endpoint: &Endpoint) -> AuthResult<String> {
        let host = endpoint.host()?;
        Ok(match self.callback {
            CallbackMechanism::AppLink => {
                format!("https://{}/oauth/account/redirect/{}", host, self.bundle_id)
            }
            CallbackMechanism::CustomScheme => {
                format!("{}://{}/oauth/callback", self.bundle_id, host)
            }
        })
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.connectivity.debounce_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.connectivity.probe_timeout_ms)
    }

    pub fn max_queue_age(&self) -> Duration {
        Duration::from_millis(self.refresh.max_queue_age_ms)
    }
}
