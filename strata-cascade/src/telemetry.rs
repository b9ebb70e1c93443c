//! Tracing subscriber setup for hosts embedding the cascade.
//!
//! The library never installs a subscriber on its own; binaries and test
//! harnesses call [`init_tracing`] once at startup.

use strata_core::StrataConfig;
use thiserror::Error;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("Invalid log filter {filter:?}: {reason}")]
    InvalidFilter { filter: String, reason: String },

    #[error("Failed to init subscriber: {0}")]
    Init(String),
}

/// Build the filter: `RUST_LOG` if set, otherwise `config.log_filter`.
pub fn env_filter(config: &StrataConfig) -> Result<EnvFilter, TelemetryError> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(&config.log_filter).map_err(|e| {
            TelemetryError::InvalidFilter {
                filter: config.log_filter.clone(),
                reason: e.to_string(),
            }
        }),
    }
}

/// Install a global `fmt` subscriber, JSON-formatted if `config.log_json`.
///
/// Fails if a global subscriber is already installed.
pub fn init_tracing(config: &StrataConfig) -> Result<(), TelemetryError> {
    let filter = env_filter(config)?;
    let registry = tracing_subscriber::registry().with(filter);

    let result = if config.log_json {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
    } else {
        registry.with(tracing_subscriber::fmt::layer()).try_init()
    };
    result.map_err(|e| TelemetryError::Init(e.to_string()))?;

    tracing::info!(
        filter = %config.log_filter,
        json = config.log_json,
        "Tracing initialized"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_fallback_filter_rejected() {
        if std::env::var("RUST_LOG").is_ok() {
            return;
        }
        let config = StrataConfig {
            log_filter: "strata=notalevel".to_string(),
            ..Default::default()
        };
        let err = env_filter(&config).unwrap_err();
        assert!(matches!(err, TelemetryError::InvalidFilter { .. }));
    }

    #[test]
    fn test_second_init_fails() {
        let config = StrataConfig::default();
        let _ = init_tracing(&config);
        assert!(matches!(init_tracing(&config), Err(TelemetryError::Init(_))));
    }
}
