//! Shared plumbing for the hostauth crates
//!
//! Holds the ambient concerns every hostauth crate needs: logging bootstrap
//! and the layered configuration loader.

pub mod config;
pub mod logging;

pub use config::{ConfigLoader, ConfigurationError};
