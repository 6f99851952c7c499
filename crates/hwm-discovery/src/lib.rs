//! # HWM Discovery
//!
//! Discovery reconciliation engine for hardware management endpoints
//! (baseboard management controllers and enclosure managers).
//!
//! **Architecture:** Hexagonal (DDD + Ports/Adapters)
//!
//! ## Purpose
//!
//! Scanners announce devices as they appear on the management network. The
//! engine turns those raw, duplicated, out-of-order announcements into
//! configured nodes:
//! - Deduplicates by hardware address and probes each device once
//! - Resolves identity through switch correlation or enclosure bay inventory
//! - Bootstraps trust in the device certificate under the node's discovery policy
//! - Re-walks unresolved and policy-blocked devices until they converge
//!
//! ## Discovery Policy
//!
//! | Policy | Behaviour |
//! |--------|-----------|
//! | `open` | Trust the live certificate; re-trust on change |
//! | `permissive` | Trust the first certificate, then lock |
//! | `secure` / `manual` / unrecognised | Never configure automatically |
//!
//! ## Module Structure
//!
//! ```text
//! hwm-discovery/
//! ├── domain/          # Events, identity records, policy decision, errors
//! ├── ports/           # API trait (inbound) + store, locator, driver traits (outbound)
//! ├── state/           # Detection cache and the actor that owns it
//! ├── application/     # DiscoveryService: intake, evaluate, policy gate, sweeps
//! ├── adapters/        # In-memory store, static locator, clock, notifications
//! ├── config.rs        # DiscoveryConfig
//! └── logging.rs       # tracing-subscriber setup
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod logging;
pub mod ports;
pub mod state;

/// Test utilities (MockHandlerFactory, ManualTimeSource, etc.)
/// Requires feature: `test-utils`
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

// Re-exports
pub use adapters::{
    InMemoryAttributeStore, NotificationPublisher, StaticNodeLocator, SystemTimeSource,
};
pub use application::{DiscoveryService, ReconciliationLoop, SweepReport};
pub use config::{ConfigError, DiscoveryConfig, HandlerRegistration, LoggingConfig};
pub use domain::{
    decide, AttributeFilter, DecisionReason, DetectionEvent, DetectionOutcome, DiscoveredNode,
    DiscoveryError, DiscoveryNotification, DiscoveryPolicy, DiscoveryResult, DiscoveryStats,
    DriverStage, EvaluationOutcome, EvictedEntry, FailureKind, Fingerprint,
    FingerprintConfidence, FingerprintRole, HandlerError, HandlerRegistry, HardwareAddress,
    HardwareFamily, PendingEntry, PolicyDecision, RewalkOutcome, StoreError, SweepTrigger,
    Timestamp, UnknownEntry,
};
pub use logging::{init_logging, LoggingError};
pub use ports::{
    AttributeChange, AttributeStore, DiscoveryApi, HandlerFactory, HardwareHandler,
    NodeAttributes, NodeLocator, NodeSetChange, TimeSource, WatchHandle,
};
pub use state::{DetectionCache, EvictionPolicy, StateHandle};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
