//! # Domain Errors
//!
//! Error types for the discovery reconciliation engine.
//!
//! Three layers report failures here:
//! - the driver layer (`HandlerError`), wrapped with the stage and device
//! - the attribute store (`StoreError`)
//! - the engine itself (`DiscoveryError`)
//!
//! Policy refusal is deliberately absent: a declined trust decision is an
//! expected outcome (see `PolicyDecision`), not an error.

use std::fmt;

use thiserror::Error;

use super::value_objects::HardwareAddress;

/// Result alias used throughout the engine.
pub type DiscoveryResult<T> = Result<T, DiscoveryError>;

/// Driver call that was in progress when a failure occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DriverStage {
    /// Active unicast interrogation after detection.
    Probe,
    /// Family-specific prerequisite setup.
    Preconfig,
    /// Baseline configuration push.
    Config,
}

impl fmt::Display for DriverStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Probe => write!(f, "probe"),
            Self::Preconfig => write!(f, "preconfig"),
            Self::Config => write!(f, "config"),
        }
    }
}

/// Broad failure classes, stable enough for callers and tests to match on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// Network or driver error (including timeouts) talking to a device.
    TransientProbeFailure,
    /// Enclosure bay correlation did not resolve to exactly one node.
    AmbiguousInventory,
    /// Attribute values rejected by the store.
    ValidationError,
    /// Attribute store is not writable.
    QuorumUnavailable,
    /// Anything else: lookup failures, malformed input, engine shutdown.
    Internal,
}

/// Errors raised by hardware-family drivers.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HandlerError {
    /// Device did not answer.
    #[error("endpoint unreachable: {0}")]
    Unreachable(String),

    /// Device answered with something the driver could not use.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Device refused the requested operation.
    #[error("operation rejected by endpoint: {0}")]
    Rejected(String),
}

/// Errors raised by the attribute store.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// A value failed attribute validation.
    #[error("invalid value for {key}: {reason}")]
    Validation {
        /// Attribute name
        key: String,
        /// Why it was rejected
        reason: String,
    },

    /// The store cannot accept writes right now.
    #[error("configuration store quorum unavailable")]
    QuorumUnavailable,

    /// Write addressed a node that does not exist.
    #[error("unknown node: {0}")]
    UnknownNode(String),

    /// Backend failure.
    #[error("store backend error: {0}")]
    Backend(String),
}

/// Engine error type.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DiscoveryError {
    /// A driver call failed.
    #[error("{stage} failed for {hwaddr}: {source}")]
    Driver {
        /// Device being handled
        hwaddr: HardwareAddress,
        /// Driver call in progress
        stage: DriverStage,
        /// Driver failure
        #[source]
        source: HandlerError,
    },

    /// A driver call exceeded the configured bound.
    #[error("{stage} timed out for {hwaddr} after {timeout_secs}s")]
    DriverTimeout {
        /// Device being handled
        hwaddr: HardwareAddress,
        /// Driver call in progress
        stage: DriverStage,
        /// Bound that was exceeded
        timeout_secs: u64,
    },

    /// Enclosure bay lookup matched zero or several nodes.
    #[error(
        "ambiguous inventory: manager {manager} bay {bay} matched {count} nodes",
        count = .candidates.len()
    )]
    AmbiguousInventory {
        /// Node the enclosure manager was located as
        manager: String,
        /// Bay reported by the device
        bay: String,
        /// Nodes that matched (empty or more than one)
        candidates: Vec<String>,
    },

    /// Attribute validation failed.
    #[error("attribute validation failed: {0}")]
    Validation(String),

    /// Attribute store not writable.
    #[error("configuration store quorum unavailable")]
    QuorumUnavailable,

    /// Other attribute store failure.
    #[error("attribute store error: {0}")]
    Store(String),

    /// Identity resolver failure.
    #[error("identity resolution failed: {0}")]
    Locator(String),

    /// Malformed link-layer address.
    #[error("invalid hardware address: {0}")]
    InvalidHardwareAddress(String),

    /// Malformed certificate fingerprint.
    #[error("invalid fingerprint: {0}")]
    InvalidFingerprint(String),

    /// Event reached a stage that needs a hardware address without one.
    #[error("detection event carries no hardware address")]
    MissingHardwareAddress,

    /// The state actor has shut down.
    #[error("discovery state is no longer running")]
    StateUnavailable,

    /// A dispatched unit of work panicked or was cancelled.
    #[error("discovery task failed: {0}")]
    TaskFailed(String),
}

impl DiscoveryError {
    /// Classify this error.
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Driver { .. } | Self::DriverTimeout { .. } => FailureKind::TransientProbeFailure,
            Self::AmbiguousInventory { .. } => FailureKind::AmbiguousInventory,
            Self::Validation(_) => FailureKind::ValidationError,
            Self::QuorumUnavailable => FailureKind::QuorumUnavailable,
            _ => FailureKind::Internal,
        }
    }
}

impl From<StoreError> for DiscoveryError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Validation { .. } => Self::Validation(err.to_string()),
            StoreError::QuorumUnavailable => Self::QuorumUnavailable,
            other => Self::Store(other.to_string()),
        }
    }
}
