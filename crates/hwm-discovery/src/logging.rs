//! Structured logging setup.
//!
//! Installs a global `tracing-subscriber` fmt subscriber. `RUST_LOG` wins
//! over the configured level when set.

use thiserror::Error;
use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

/// Logging setup errors.
#[derive(Debug, Error)]
pub enum LoggingError {
    /// The level string is not a valid filter directive.
    #[error("invalid log filter {directive:?}: {reason}")]
    InvalidFilter {
        /// Offending directive
        directive: String,
        /// Parser message
        reason: String,
    },

    /// A global subscriber is already installed.
    #[error("global subscriber already installed: {0}")]
    AlreadyInitialized(String),
}

/// Build the filter: `RUST_LOG` if set, else `config.level`.
pub fn build_filter(config: &LoggingConfig) -> Result<EnvFilter, LoggingError> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    EnvFilter::try_new(&config.level).map_err(|e| LoggingError::InvalidFilter {
        directive: config.level.clone(),
        reason: e.to_string(),
    })
}

/// Initialize logging.
pub fn init_logging(config: &LoggingConfig) -> Result<(), LoggingError> {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(build_filter(config)?)
        .with_target(true)
        .with_thread_ids(config.with_thread_ids);

    let result = if config.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    result.map_err(|e| LoggingError::AlreadyInitialized(e.to_string()))?;

    tracing::debug!(
        level = %config.level,
        json = config.json,
        "[discovery] logging initialized"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_level_rejected() {
        if std::env::var("RUST_LOG").is_ok() {
            return;
        }
        let config = LoggingConfig {
            level: "hwm_discovery=notalevel".to_string(),
            ..LoggingConfig::default()
        };
        assert!(matches!(
            build_filter(&config),
            Err(LoggingError::InvalidFilter { .. })
        ));
    }

    #[test]
    fn test_second_init_reports_error() {
        let config = LoggingConfig::default();
        let _ = init_logging(&config);
        assert!(matches!(
            init_logging(&config),
            Err(LoggingError::AlreadyInitialized(_))
        ));
    }
}
