//! File-backed credential store.

use super::{CredentialKey, CredentialStore};
use crate::error::{AuthError, AuthResult};
use async_trait::async_trait;
use etcetera::{choose_base_strategy, BaseStrategy};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, instrument};

/// File permissions for the credentials file (Unix only): owner read/write.
#[cfg(unix)]
const FILE_MODE: u32 = 0o600;

const FILE_NAME: &str = "credentials.json";

/// Stores every key in one JSON document
///
/// Writes go to a temp file that is renamed over the original, so a crash
/// mid-write leaves either the old or the new document, never a torn one.
/// `clear` is a single file removal and therefore atomic across keys.
#[derive(Debug)]
pub struct FileCredentialStore {
    path: PathBuf,
    // Serializes read-modify-write cycles
    lock: Mutex<()>,
}

impl FileCredentialStore {
    /// Store in `dir/credentials.json`
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            path: dir.into().join(FILE_NAME),
            lock: Mutex::new(()),
        }
    }

    /// Store under the platform data directory (e.g. ~/.local/share/hostauth)
    pub fn in_default_location() -> AuthResult<Self> {
        let strategy = choose_base_strategy().map_err(|e| {
            AuthError::ConfigError(format!("Failed to determine base directories: {}", e))
        })?;
        Ok(Self::new(strategy.data_dir().join("hostauth")))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_document(&self) -> AuthResult<BTreeMap<String, String>> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => {
                return Err(AuthError::StorageError(format!(
                    "Failed to read '{}': {}",
                    self.path.display(),
                    e
                )))
            }
        };

        if content.trim().is_empty() {
            return Ok(BTreeMap::new());
        }

        serde_json::from_str(&content).map_err(|e| {
            AuthError::StorageError(format!("Failed to parse '{}': {}", self.path.display(), e))
        })
    }

    async fn write_document(&self, document: &BTreeMap<String, String>) -> AuthResult<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                AuthError::StorageError(format!(
                    "Failed to create '{}': {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let content = serde_json::to_vec_pretty(document)?;
        let temp_path = self.path.with_extension("tmp");

        let mut options = tokio::fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        options.mode(FILE_MODE);

        let mut file = options.open(&temp_path).await.map_err(|e| {
            AuthError::StorageError(format!("Failed to open '{}': {}", temp_path.display(), e))
        })?;
        file.write_all(&content).await.map_err(|e| {
            AuthError::StorageError(format!("Failed to write '{}': {}", temp_path.display(), e))
        })?;
        file.sync_all().await.map_err(|e| {
            AuthError::StorageError(format!("Failed to sync '{}': {}", temp_path.display(), e))
        })?;
        drop(file);

        tokio::fs::rename(&temp_path, &self.path).await.map_err(|e| {
            AuthError::StorageError(format!(
                "Failed to replace '{}': {}",
                self.path.display(),
                e
            ))
        })
    }
}

#[async_trait]
impl CredentialStore for FileCredentialStore {
    #[instrument(skip(self))]
    async fn get(&self, key: CredentialKey) -> AuthResult<Option<String>> {
        let _guard = self.lock.lock().await;
        Ok(self.read_document().await?.remove(key.as_str()))
    }

    #[instrument(skip(self, value))]
    async fn set(&self, key: CredentialKey, value: &str) -> AuthResult<()> {
        let _guard = self.lock.lock().await;
        let mut document = self.read_document().await?;
        document.insert(key.as_str().to_string(), value.to_string());
        self.write_document(&document).await
    }

    #[instrument(skip(self))]
    async fn remove(&self, key: CredentialKey) -> AuthResult<()> {
        let _guard = self.lock.lock().await;
        let mut document = self.read_document().await?;
        if document.remove(key.as_str()).is_some() {
            self.write_document(&document).await?;
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn clear(&self) -> AuthResult<()> {
        let _guard = self.lock.lock().await;
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => {
                debug!(path = %self.path.display(), "Credentials file removed");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(AuthError::StorageError(format!(
                "Failed to remove '{}': {}",
                self.path.display(),
                e
            ))),
        }
    }

    fn name(&self) -> &str {
        "file"
    }
}
