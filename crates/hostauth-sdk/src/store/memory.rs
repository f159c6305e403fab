//! In-memory credential store.

use super::{CredentialKey, CredentialStore};
use crate::error::AuthResult;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;

/// Process-local store
///
/// Nothing survives a restart, which makes it the store of choice for tests
/// and for hosts that bring their own persistence layer.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    entries: Mutex<HashMap<CredentialKey, String>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn get(&self, key: CredentialKey) -> AuthResult<Option<String>> {
        Ok(self.entries.lock().get(&key).cloned())
    }

    async fn set(&self, key: CredentialKey, value: &str) -> AuthResult<()> {
        self.entries.lock().insert(key, value.to_string());
        Ok(())
    }

    async fn remove(&self, key: CredentialKey) -> AuthResult<()> {
        self.entries.lock().remove(&key);
        Ok(())
    }

    async fn clear(&self) -> AuthResult<()> {
        self.entries.lock().clear();
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}
