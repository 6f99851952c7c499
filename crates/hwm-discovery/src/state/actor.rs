//! # State Actor
//!
//! Single owner of the [`DetectionCache`]. Every read and mutation is a
//! [`StateCommand`] on one queue, so no two cache operations interleave and
//! no task ever holds cache state across a driver or store call.
//!
//! ```text
//! intake task ─┐
//! sweep task  ─┼── StateHandle ──mpsc──> actor ── DetectionCache
//! loop        ─┘        ^                  │
//!                       └─── oneshot ──────┘
//! ```

use std::collections::BTreeSet;

use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use super::cache::{DetectionCache, EvictionPolicy};
use crate::domain::{
    DiscoveredNode, DiscoveryError, DiscoveryResult, DiscoveryStats, EvictedEntry, Fingerprint,
    FingerprintConfidence, FingerprintRole, HardwareAddress, PendingEntry, Timestamp,
    UnknownEntry,
};

/// Requests accepted by the state actor.
#[derive(Debug)]
pub enum StateCommand {
    /// Dedup gate.
    AdmitIfNew {
        /// Address to admit
        hwaddr: HardwareAddress,
        /// True on first admission
        reply: oneshot::Sender<bool>,
    },
    /// Park an unresolved device.
    StoreUnknown(UnknownEntry),
    /// Un-park a device.
    RemoveUnknown {
        /// Address to remove
        hwaddr: HardwareAddress,
        /// Removed entry
        reply: oneshot::Sender<Option<UnknownEntry>>,
    },
    /// Forget an admitted address.
    Forget(HardwareAddress),
    /// Block a node.
    StorePending {
        /// Entry to store
        entry: PendingEntry,
        /// True if newly pending
        reply: oneshot::Sender<bool>,
    },
    /// Unblock a node.
    RemovePending {
        /// Node to remove
        node: String,
        /// Removed entry
        reply: oneshot::Sender<Option<PendingEntry>>,
    },
    /// Copy of Unknown.
    UnknownSnapshot {
        /// Entries ordered by address
        reply: oneshot::Sender<Vec<UnknownEntry>>,
    },
    /// Copy of Pending.
    PendingSnapshot {
        /// Entries ordered by node
        reply: oneshot::Sender<Vec<PendingEntry>>,
    },
    /// Apply TTLs.
    EvictExpired {
        /// Current time
        now: Timestamp,
        /// TTLs
        policy: EvictionPolicy,
        /// What was evicted
        reply: oneshot::Sender<Vec<EvictedEntry>>,
    },
    /// Forget Pending entries of deleted nodes.
    DropPendingFor {
        /// Deleted nodes
        removed: BTreeSet<String>,
        /// What was dropped
        reply: oneshot::Sender<Vec<EvictedEntry>>,
    },
    /// Store a probed identity.
    RecordDiscovered(Box<DiscoveredNode>),
    /// Look up a probed identity.
    Discovered {
        /// Device address
        hwaddr: HardwareAddress,
        /// Clone of the record
        reply: oneshot::Sender<Option<DiscoveredNode>>,
    },
    /// Add a fingerprint to a probed identity.
    AddFingerprint {
        /// Device address
        hwaddr: HardwareAddress,
        /// Certificate role
        role: FingerprintRole,
        /// Digest
        fingerprint: Fingerprint,
        /// Confidence
        confidence: FingerprintConfidence,
        /// False if refused
        reply: oneshot::Sender<bool>,
    },
    /// Start an evaluation.
    TryLease {
        /// Device address
        hwaddr: HardwareAddress,
        /// False if already in flight
        reply: oneshot::Sender<bool>,
    },
    /// End an evaluation.
    Release(HardwareAddress),
    /// Current sizes.
    Stats {
        /// Sizes
        reply: oneshot::Sender<DiscoveryStats>,
    },
}

fn handle(cache: &mut DetectionCache, command: StateCommand) {
    // A dropped reply receiver means the requester gave up; nothing to do.
    match command {
        StateCommand::AdmitIfNew { hwaddr, reply } => {
            let _ = reply.send(cache.admit_if_new(&hwaddr));
        }
        StateCommand::StoreUnknown(entry) => cache.store_unknown(entry),
        StateCommand::RemoveUnknown { hwaddr, reply } => {
            let _ = reply.send(cache.remove_unknown(&hwaddr));
        }
        StateCommand::Forget(hwaddr) => {
            cache.forget(&hwaddr);
        }
        StateCommand::StorePending { entry, reply } => {
            let _ = reply.send(cache.store_pending(entry));
        }
        StateCommand::RemovePending { node, reply } => {
            let _ = reply.send(cache.remove_pending(&node));
        }
        StateCommand::UnknownSnapshot { reply } => {
            let _ = reply.send(cache.unknown_snapshot());
        }
        StateCommand::PendingSnapshot { reply } => {
            let _ = reply.send(cache.pending_snapshot());
        }
        StateCommand::EvictExpired { now, policy, reply } => {
            let _ = reply.send(cache.evict_expired(now, policy));
        }
        StateCommand::DropPendingFor { removed, reply } => {
            let _ = reply.send(cache.drop_pending_for(&removed));
        }
        StateCommand::RecordDiscovered(node) => cache.record_discovered(*node),
        StateCommand::Discovered { hwaddr, reply } => {
            let _ = reply.send(cache.discovered(&hwaddr).cloned());
        }
        StateCommand::AddFingerprint {
            hwaddr,
            role,
            fingerprint,
            confidence,
            reply,
        } => {
            let _ = reply.send(cache.add_fingerprint(&hwaddr, role, fingerprint, confidence));
        }
        StateCommand::TryLease { hwaddr, reply } => {
            let _ = reply.send(cache.try_lease(&hwaddr));
        }
        StateCommand::Release(hwaddr) => cache.release(&hwaddr),
        StateCommand::Stats { reply } => {
            let _ = reply.send(cache.stats());
        }
    }
}

async fn run(mut cache: DetectionCache, mut rx: mpsc::UnboundedReceiver<StateCommand>) {
    while let Some(command) = rx.recv().await {
        handle(&mut cache, command);
    }
    debug!("[discovery] state actor stopped, all handles dropped");
}

/// Cloneable handle to the state actor.
///
/// The actor runs until the last handle is dropped.
#[derive(Debug, Clone)]
pub struct StateHandle {
    tx: mpsc::UnboundedSender<StateCommand>,
}

impl StateHandle {
    /// Spawn an actor over an empty cache. Requires a tokio runtime.
    pub fn spawn() -> Self {
        Self::spawn_with(DetectionCache::new())
    }

    /// Spawn an actor over an existing cache.
    pub fn spawn_with(cache: DetectionCache) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run(cache, rx));
        Self { tx }
    }

    fn send(&self, command: StateCommand) -> DiscoveryResult<()> {
        self.tx
            .send(command)
            .map_err(|_| DiscoveryError::StateUnavailable)
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> StateCommand,
    ) -> DiscoveryResult<T> {
        let (reply, rx) = oneshot::channel();
        self.send(build(reply))?;
        rx.await.map_err(|_| DiscoveryError::StateUnavailable)
    }

    /// True exactly once per address.
    pub async fn admit_if_new(&self, hwaddr: &HardwareAddress) -> DiscoveryResult<bool> {
        let hwaddr = hwaddr.clone();
        self.request(|reply| StateCommand::AdmitIfNew { hwaddr, reply })
            .await
    }

    /// Park an unresolved device.
    pub fn store_unknown(&self, entry: UnknownEntry) -> DiscoveryResult<()> {
        self.send(StateCommand::StoreUnknown(entry))
    }

    /// Un-park a device.
    pub async fn remove_unknown(
        &self,
        hwaddr: &HardwareAddress,
    ) -> DiscoveryResult<Option<UnknownEntry>> {
        let hwaddr = hwaddr.clone();
        self.request(|reply| StateCommand::RemoveUnknown { hwaddr, reply })
            .await
    }

    /// Forget an admitted address so it can be admitted again.
    pub fn forget(&self, hwaddr: &HardwareAddress) -> DiscoveryResult<()> {
        self.send(StateCommand::Forget(hwaddr.clone()))
    }

    /// Block a node. True if it was not already pending.
    pub async fn store_pending(&self, entry: PendingEntry) -> DiscoveryResult<bool> {
        self.request(|reply| StateCommand::StorePending { entry, reply })
            .await
    }

    /// Unblock a node.
    pub async fn remove_pending(&self, node: &str) -> DiscoveryResult<Option<PendingEntry>> {
        let node = node.to_string();
        self.request(|reply| StateCommand::RemovePending { node, reply })
            .await
    }

    /// Copy of Unknown.
    pub async fn unknown_snapshot(&self) -> DiscoveryResult<Vec<UnknownEntry>> {
        self.request(|reply| StateCommand::UnknownSnapshot { reply })
            .await
    }

    /// Copy of Pending.
    pub async fn pending_snapshot(&self) -> DiscoveryResult<Vec<PendingEntry>> {
        self.request(|reply| StateCommand::PendingSnapshot { reply })
            .await
    }

    /// Apply TTLs.
    pub async fn evict_expired(
        &self,
        now: Timestamp,
        policy: EvictionPolicy,
    ) -> DiscoveryResult<Vec<EvictedEntry>> {
        self.request(|reply| StateCommand::EvictExpired { now, policy, reply })
            .await
    }

    /// Forget Pending entries of deleted nodes.
    pub async fn drop_pending_for(
        &self,
        removed: BTreeSet<String>,
    ) -> DiscoveryResult<Vec<EvictedEntry>> {
        self.request(|reply| StateCommand::DropPendingFor { removed, reply })
            .await
    }

    /// Store a probed identity.
    pub fn record_discovered(&self, node: DiscoveredNode) -> DiscoveryResult<()> {
        self.send(StateCommand::RecordDiscovered(Box::new(node)))
    }

    /// Look up a probed identity.
    pub async fn discovered(
        &self,
        hwaddr: &HardwareAddress,
    ) -> DiscoveryResult<Option<DiscoveredNode>> {
        let hwaddr = hwaddr.clone();
        self.request(|reply| StateCommand::Discovered { hwaddr, reply })
            .await
    }

    /// Add a fingerprint to a probed identity.
    pub async fn add_fingerprint(
        &self,
        hwaddr: &HardwareAddress,
        role: FingerprintRole,
        fingerprint: Fingerprint,
        confidence: FingerprintConfidence,
    ) -> DiscoveryResult<bool> {
        let hwaddr = hwaddr.clone();
        self.request(|reply| StateCommand::AddFingerprint {
            hwaddr,
            role,
            fingerprint,
            confidence,
            reply,
        })
        .await
    }

    /// Lease `hwaddr` for evaluation. `None` if another task holds it.
    pub async fn try_lease(
        &self,
        hwaddr: &HardwareAddress,
    ) -> DiscoveryResult<Option<EvaluationLease>> {
        let key = hwaddr.clone();
        let acquired = self
            .request(|reply| StateCommand::TryLease { hwaddr: key, reply })
            .await?;
        Ok(acquired.then(|| EvaluationLease {
            hwaddr: hwaddr.clone(),
            tx: self.tx.clone(),
        }))
    }

    /// Current sizes.
    pub async fn stats(&self) -> DiscoveryResult<DiscoveryStats> {
        self.request(|reply| StateCommand::Stats { reply }).await
    }
}

/// In-flight marker for one device, released on drop (including unwinding).
#[derive(Debug)]
pub struct EvaluationLease {
    hwaddr: HardwareAddress,
    tx: mpsc::UnboundedSender<StateCommand>,
}

impl EvaluationLease {
    /// Leased address.
    pub fn hwaddr(&self) -> &HardwareAddress {
        &self.hwaddr
    }
}

impl Drop for EvaluationLease {
    fn drop(&mut self) {
        let _ = self.tx.send(StateCommand::Release(self.hwaddr.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::DetectionEvent;

    fn mac(last: u8) -> HardwareAddress {
        format!("00:1a:2b:3c:4d:{last:02x}").parse().unwrap()
    }

    #[tokio::test]
    async fn test_admit_through_handle() {
        let state = StateHandle::spawn();
        assert!(state.admit_if_new(&mac(1)).await.unwrap());
        assert!(!state.admit_if_new(&mac(1)).await.unwrap());
    }

    #[tokio::test]
    async fn test_fire_and_forget_commands_are_ordered() {
        let state = StateHandle::spawn();
        state
            .store_unknown(UnknownEntry {
                hwaddr: mac(1),
                event: DetectionEvent::new(mac(1)),
                since: Timestamp::new(0),
            })
            .unwrap();
        let snapshot = state.unknown_snapshot().await.unwrap();
        assert_eq!(snapshot.len(), 1);
    }

    #[tokio::test]
    async fn test_lease_released_on_drop() {
        let state = StateHandle::spawn();
        let lease = state.try_lease(&mac(1)).await.unwrap();
        assert!(lease.is_some());
        assert!(state.try_lease(&mac(1)).await.unwrap().is_none());
        assert_eq!(state.stats().await.unwrap().in_flight, 1);

        drop(lease);
        assert_eq!(state.stats().await.unwrap().in_flight, 0);
        assert!(state.try_lease(&mac(1)).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_concurrent_admission_is_exclusive() {
        let state = StateHandle::spawn();
        let mut tasks = Vec::new();
        for _ in 0..16 {
            let state = state.clone();
            tasks.push(tokio::spawn(async move { state.admit_if_new(&mac(9)).await }));
        }
        let mut admitted = 0;
        for task in tasks {
            if task.await.unwrap().unwrap() {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 1);
    }
}
