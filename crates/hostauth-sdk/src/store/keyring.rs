//! OS keychain credential store.

use super::{CredentialKey, CredentialStore};
use crate::error::{AuthError, AuthResult};
use async_trait::async_trait;
use tracing::{instrument, warn};

/// One keychain entry per [`CredentialKey`] under a shared service name
///
/// The keychain has no multi-entry transaction, so `clear` removes every
/// entry and reports the first failure after attempting all of them.
#[derive(Debug, Clone)]
pub struct KeyringCredentialStore {
    service: String,
}

impl Default for KeyringCredentialStore {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyringCredentialStore {
    const SERVICE_NAME: &'static str = "hostauth-sdk";

    pub fn new() -> Self {
        Self::with_service(Self::SERVICE_NAME)
    }

    /// Namespace entries, e.g. per application id
    pub fn with_service(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    fn entry(&self, key: CredentialKey) -> AuthResult<::keyring::Entry> {
        ::keyring::Entry::new(&self.service, key.as_str())
            .map_err(|e| AuthError::StorageError(format!("Failed to open keyring entry: {}", e)))
    }

    fn delete(&self, key: CredentialKey) -> AuthResult<()> {
        match self.entry(key)?.delete_credential() {
            Ok(()) | Err(::keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(AuthError::StorageError(format!("Keyring error: {}", e))),
        }
    }
}

#[async_trait]
impl CredentialStore for KeyringCredentialStore {
    #[instrument(skip(self))]
    async fn get(&self, key: CredentialKey) -> AuthResult<Option<String>> {
        match self.entry(key)?.get_password() {
            Ok(value) => Ok(Some(value)),
            Err(::keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(AuthError::StorageError(format!("Keyring error: {}", e))),
        }
    }

    #[instrument(skip(self, value))]
    async fn set(&self, key: CredentialKey, value: &str) -> AuthResult<()> {
        self.entry(key)?
            .set_password(value)
            .map_err(|e| AuthError::StorageError(format!("Keyring error: {}", e)))
    }

    #[instrument(skip(self))]
    async fn remove(&self, key: CredentialKey) -> AuthResult<()> {
        self.delete(key)
    }

    async fn clear(&self) -> AuthResult<()> {
        let mut first_error = None;
        for key in CredentialKey::ALL {
            if let Err(e) = self.delete(key) {
                warn!(%key, error = %e, "Failed to clear keyring entry");
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn name(&self) -> &str {
        "keyring"
    }
}
