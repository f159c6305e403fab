//! Layered configuration loading
//!
//! Configuration structs implement [`ConfigLoader`] to get the standard
//! layering: serialized defaults, then a TOML file, then prefixed
//! environment variables (`PREFIX_SECTION__FIELD`).

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{de::DeserializeOwned, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors raised while loading or validating configuration
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("Failed to parse configuration: {details}")]
    ParseError { details: String },

    #[error("Invalid value for '{key}': {reason}")]
    InvalidValue { key: String, reason: String },
}

impl ConfigurationError {
    pub fn invalid(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            key: key.into(),
            reason: reason.into(),
        }
    }
}

/// Layered loader shared by every configuration type
pub trait ConfigLoader<T>
where
    T: Serialize + DeserializeOwned + Default,
{
    /// Environment variable prefix, e.g. `HOSTAUTH_`
    const ENV_PREFIX: &'static str;

    /// File consulted when no explicit path is given
    const DEFAULT_FILE: &'static str;

    /// Load from an optional path, falling back to [`Self::DEFAULT_FILE`]
    fn load(path: Option<PathBuf>) -> Result<T, ConfigurationError> {
        let path = path.unwrap_or_else(|| PathBuf::from(Self::DEFAULT_FILE));
        Self::load_from_file(&path)
    }

    /// Load defaults, merge `path` (if it exists), then environment overrides
    fn load_from_file(path: &Path) -> Result<T, ConfigurationError> {
        let figment = Figment::from(Serialized::defaults(T::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(Self::ENV_PREFIX).split("__"));

        figment.extract().map_err(|e| ConfigurationError::ParseError {
            details: e.to_string(),
        })
    }

    /// Re-apply environment overrides on top of an existing value
    fn apply_env_overrides(config: &mut T, prefix: &str) -> Result<(), ConfigurationError> {
        let figment = Figment::from(Serialized::defaults(&*config))
            .merge(Env::prefixed(prefix).split("__"));

        *config = figment.extract().map_err(|e| ConfigurationError::ParseError {
            details: e.to_string(),
        })?;

        Ok(())
    }

    /// Render the defaults as TOML, for generating example files
    fn generate_example() -> Result<String, ConfigurationError> {
        toml::to_string_pretty(&T::default()).map_err(|e| ConfigurationError::ParseError {
            details: format!("Failed to serialize config: {e}"),
        })
    }
}
