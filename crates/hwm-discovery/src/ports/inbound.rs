//! # Inbound Ports
//!
//! API exposed by the discovery engine to scanners, operators and tests.

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::application::SweepReport;
use crate::domain::{
    DetectionEvent, DetectionOutcome, DiscoveredNode, DiscoveryNotification, DiscoveryResult,
    DiscoveryStats, Fingerprint, FingerprintRole, HardwareAddress, PendingEntry, SweepTrigger,
    UnknownEntry,
};

/// Discovery engine API - inbound port.
#[async_trait]
pub trait DiscoveryApi: Send + Sync {
    /// Run one raw detection through intake and wait for the outcome.
    async fn process_detection(&self, event: DetectionEvent) -> DiscoveryResult<DetectionOutcome>;

    /// Evict expired entries and dispatch a re-walk of Unknown and Pending.
    async fn reconcile(&self, trigger: SweepTrigger) -> DiscoveryResult<SweepReport>;

    /// Record a fingerprint confirmed by a secure validator.
    ///
    /// Returns false if no identity is recorded for `hwaddr`.
    async fn add_validated_fingerprint(
        &self,
        hwaddr: &HardwareAddress,
        role: FingerprintRole,
        fingerprint: Fingerprint,
    ) -> DiscoveryResult<bool>;

    /// Identity record of a probed device.
    async fn discovered_node(&self, hwaddr: &HardwareAddress)
        -> DiscoveryResult<Option<DiscoveredNode>>;

    /// Devices waiting for identity resolution.
    async fn unknown_entries(&self) -> DiscoveryResult<Vec<UnknownEntry>>;

    /// Nodes blocked by policy.
    async fn pending_entries(&self) -> DiscoveryResult<Vec<PendingEntry>>;

    /// Cache sizes.
    async fn stats(&self) -> DiscoveryResult<DiscoveryStats>;

    /// Subscribe to notifications.
    fn subscribe(&self) -> broadcast::Receiver<DiscoveryNotification>;
}
