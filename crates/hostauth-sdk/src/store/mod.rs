//! Secure credential storage
//!
//! The session core only needs get/set/remove/clear over a fixed key space.
//! Backends decide how the bytes are protected at rest.

pub mod file;
#[cfg(feature = "system-keyring")]
pub mod keyring;
pub mod memory;

pub use file::FileCredentialStore;
#[cfg(feature = "system-keyring")]
pub use self::keyring::KeyringCredentialStore;
pub use memory::MemoryCredentialStore;

use crate::error::AuthResult;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

/// Keys the session core persists
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CredentialKey {
    AccessToken,
    RefreshToken,
    CodeVerifier,
    SelectedRegion,
    CurrentTenantId,
}

impl CredentialKey {
    pub const ALL: [CredentialKey; 5] = [
        CredentialKey::AccessToken,
        CredentialKey::RefreshToken,
        CredentialKey::CodeVerifier,
        CredentialKey::SelectedRegion,
        CredentialKey::CurrentTenantId,
    ];

    /// Stable storage name
    pub fn as_str(&self) -> &'static str {
        match self {
            CredentialKey::AccessToken => "ACCESS_TOKEN",
            CredentialKey::RefreshToken => "REFRESH_TOKEN",
            CredentialKey::CodeVerifier => "CODE_VERIFIER",
            CredentialKey::SelectedRegion => "SELECTED_REGION",
            CredentialKey::CurrentTenantId => "CURRENT_TENANT_ID",
        }
    }
}

impl fmt::Display for CredentialKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Durable key-value store for credentials
///
/// Implementations must be safe to share across tasks.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn get(&self, key: CredentialKey) -> AuthResult<Option<String>>;

    async fn set(&self, key: CredentialKey, value: &str) -> AuthResult<()>;

    async fn remove(&self, key: CredentialKey) -> AuthResult<()>;

    /// Remove every key
    async fn clear(&self) -> AuthResult<()>;

    /// Backend name for logging
    fn name(&self) -> &str;
}

#[async_trait]
impl<T: CredentialStore + ?Sized> CredentialStore for Arc<T> {
    async fn get(&self, key: CredentialKey) -> AuthResult<Option<String>> {
        (**self).get(key).await
    }
    async fn set(&self, key: CredentialKey, value: &str) -> AuthResult<()> {
        (**self).set(key, value).await
    }
    async fn remove(&self, key: CredentialKey) -> AuthResult<()> {
        (**self).remove(key).await
    }
    async fn clear(&self) -> AuthResult<()> {
        (**self).clear().await
    }
    fn name(&self) -> &str {
        (**self).name()
    }
}
