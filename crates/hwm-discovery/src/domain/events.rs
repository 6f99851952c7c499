//! # Discovery Events
//!
//! Notifications published while the engine works, and the triggers that
//! start a reconciliation sweep.

use std::fmt;

use super::entities::EvictedEntry;
use super::errors::DriverStage;
use super::policy::DecisionReason;
use super::value_objects::HardwareAddress;

/// Operator-facing notification.
///
/// Delivered over a broadcast channel; nobody listening is not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryNotification {
    /// Configuration pushed and identity attributes persisted.
    NodeConfigured {
        /// Configured node
        node: String,
        /// Device address
        hwaddr: HardwareAddress,
    },
    /// Policy declined; the node waits in Pending.
    NodePending {
        /// Blocked node
        node: String,
        /// Device address
        hwaddr: HardwareAddress,
        /// Why the gate declined
        reason: DecisionReason,
    },
    /// Enclosure bay did not resolve to exactly one node.
    InventoryFault {
        /// Node the enclosure manager was located as
        manager: String,
        /// Bay reported by the device
        bay: String,
        /// Matching nodes (zero or several)
        candidates: Vec<String>,
    },
    /// A driver call failed or timed out.
    ProbeFailed {
        /// Device address
        hwaddr: HardwareAddress,
        /// Call that failed
        stage: DriverStage,
        /// Rendered error
        error: String,
    },
    /// Eviction removed a cache entry.
    EntryEvicted(EvictedEntry),
}

/// What started a sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SweepTrigger {
    /// Periodic timer.
    Timer,
    /// A watched attribute changed.
    AttributeChange,
    /// Nodes were added or removed.
    NodeSetChange,
    /// Explicit request.
    Manual,
}

impl fmt::Display for SweepTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timer => write!(f, "timer"),
            Self::AttributeChange => write!(f, "attribute-change"),
            Self::NodeSetChange => write!(f, "node-set-change"),
            Self::Manual => write!(f, "manual"),
        }
    }
}
