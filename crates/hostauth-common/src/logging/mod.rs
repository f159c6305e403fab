//! Unified logging initialization for hosts embedding the SDK
//!
//! The filter is resolved in this order:
//! 1. RUST_LOG environment variable
//! 2. The caller-supplied default filter
//!
//! Hosts that already install their own `tracing` subscriber should skip
//! these helpers entirely; the SDK only emits events.

use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn resolve_filter(default_filter: &str) -> Result<EnvFilter> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => Ok(EnvFilter::try_new(default_filter)?),
    }
}

/// Initialize compact human-readable logging.
///
/// Returns `Ok(false)` when a global subscriber was already installed.
///
/// ```no_run
/// hostauth_common::logging::init_logging("hostauth_sdk=info").unwrap();
/// ```
pub fn init_logging(default_filter: &str) -> Result<bool> {
    let filter = resolve_filter(default_filter)?;

    let installed = tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true) // Show module path
                .with_file(true) // Show source file
                .with_line_number(true) // Show line number
                .compact(), // Use compact format
        )
        .try_init()
        .is_ok();

    Ok(installed)
}

/// Initialize JSON logging, one event per line, for log shipping.
///
/// Returns `Ok(false)` when a global subscriber was already installed.
pub fn init_json_logging(default_filter: &str) -> Result<bool> {
    let filter = resolve_filter(default_filter)?;

    let installed = tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_target(true),
        )
        .try_init()
        .is_ok();

    Ok(installed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_is_noop() {
        let _ = init_logging("hostauth_common=debug").unwrap();
        let second = init_logging("hostauth_common=debug").unwrap();
        assert!(!second);
    }

    #[test]
    fn test_invalid_default_filter_is_rejected() {
        if std::env::var("RUST_LOG").is_ok() {
            return;
        }
        assert!(init_json_logging("hostauth_common=notalevel").is_err());
    }
}
