//! # Discovery Configuration
//!
//! Loaded from TOML, then overridden from the environment:
//!
//! | Variable | Field |
//! |----------|-------|
//! | `HWM_RECHECK_INTERVAL_SECS` | `recheck_interval_secs` |
//! | `HWM_PROBE_TIMEOUT_SECS` | `probe_timeout_secs` |
//! | `HWM_LOG_LEVEL` | `logging.level` |

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{
    HandlerRegistry, HardwareFamily, DEFAULT_PROBE_TIMEOUT_SECS, DEFAULT_RECHECK_INTERVAL_SECS,
    DEFAULT_UNKNOWN_TTL_SECS,
};
use crate::state::EvictionPolicy;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// File could not be read.
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    /// File is not valid TOML for this schema.
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value is out of range.
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Extra service registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandlerRegistration {
    /// Announced service identifier
    pub service: String,
    /// Driver family
    pub family: HardwareFamily,
}

/// Logging settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
    /// Include thread ids.
    pub with_thread_ids: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            with_thread_ids: true,
        }
    }
}

/// Engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Period of the reconciliation sweep.
    pub recheck_interval_secs: u64,
    /// Bound on each probe, preconfig and config call.
    pub probe_timeout_secs: u64,
    /// Lifetime of an unresolved address. 0 keeps entries forever.
    pub unknown_ttl_secs: u64,
    /// Lifetime of a pending node. 0 (the default) keeps entries forever.
    pub pending_ttl_secs: u64,
    /// Capacity of the notification broadcast channel.
    pub notification_capacity: usize,
    /// Registrations added to the built-in service table.
    pub handlers: Vec<HandlerRegistration>,
    /// Logging.
    pub logging: LoggingConfig,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            recheck_interval_secs: DEFAULT_RECHECK_INTERVAL_SECS,
            probe_timeout_secs: DEFAULT_PROBE_TIMEOUT_SECS,
            unknown_ttl_secs: DEFAULT_UNKNOWN_TTL_SECS,
            pending_ttl_secs: 0,
            notification_capacity: 256,
            handlers: Vec::new(),
            logging: LoggingConfig::default(),
        }
    }
}

impl DiscoveryConfig {
    /// Short timers for tests.
    pub fn for_testing() -> Self {
        Self {
            recheck_interval_secs: 60,
            probe_timeout_secs: 5,
            unknown_ttl_secs: 0,
            pending_ttl_secs: 0,
            notification_capacity: 64,
            handlers: Vec::new(),
            logging: LoggingConfig {
                level: "debug".to_string(),
                ..LoggingConfig::default()
            },
        }
    }

    /// Parse and validate TOML.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Read a TOML file, apply environment overrides, validate.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        let mut config: Self = toml::from_str(&text)?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `HWM_*` environment variables.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary lookup.
    pub fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(value) = lookup("HWM_RECHECK_INTERVAL_SECS") {
            self.recheck_interval_secs = parse_secs("HWM_RECHECK_INTERVAL_SECS", &value)?;
        }
        if let Some(value) = lookup("HWM_PROBE_TIMEOUT_SECS") {
            self.probe_timeout_secs = parse_secs("HWM_PROBE_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = lookup("HWM_LOG_LEVEL") {
            self.logging.level = value;
        }
        Ok(())
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.recheck_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "recheck_interval_secs must be positive".to_string(),
            ));
        }
        if self.probe_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "probe_timeout_secs must be positive".to_string(),
            ));
        }
        if self.notification_capacity == 0 {
            return Err(ConfigError::Invalid(
                "notification_capacity must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Sweep period.
    pub fn recheck_interval(&self) -> Duration {
        Duration::from_secs(self.recheck_interval_secs)
    }

    /// Driver call bound.
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    /// TTLs for the detection cache.
    pub fn eviction_policy(&self) -> EvictionPolicy {
        EvictionPolicy {
            unknown_ttl_secs: self.unknown_ttl_secs,
            pending_ttl_secs: self.pending_ttl_secs,
        }
    }

    /// Built-in service table plus configured registrations.
    pub fn handler_registry(&self) -> HandlerRegistry {
        let mut registry = HandlerRegistry::with_defaults();
        for registration in &self.handlers {
            registry.register(registration.service.clone(), registration.family);
        }
        registry
    }
}

fn parse_secs(key: &str, value: &str) -> Result<u64, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::Invalid(format!("{key}: expected seconds, got {value:?}")))
}
