//! # Detection Cache
//!
//! The engine's only shared mutable state: dedup, Unknown and Pending
//! registries, discovered identity records and the in-flight set.
//!
//! Plain synchronous data. The state actor owns the single instance and
//! serialises every mutation, so nothing here locks or awaits.

use std::collections::{BTreeSet, HashMap, HashSet};

use crate::domain::{
    DiscoveredNode, DiscoveryStats, EvictedEntry, Fingerprint, FingerprintConfidence,
    FingerprintRole, HardwareAddress, PendingEntry, Timestamp, UnknownEntry,
};

/// Per-address dedup state. An address is either Known or Unknown, never both.
#[derive(Debug, Clone)]
enum AddressState {
    Known,
    Unknown(UnknownEntry),
}

/// Time-to-live settings applied at the start of each sweep. Zero disables.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EvictionPolicy {
    /// Lifetime of an unresolved address.
    pub unknown_ttl_secs: u64,
    /// Lifetime of a pending node.
    pub pending_ttl_secs: u64,
}

fn expired(since: Timestamp, now: Timestamp, ttl_secs: u64) -> bool {
    ttl_secs > 0 && since.age_at(now) >= ttl_secs
}

/// Dedup, Unknown and Pending registries.
#[derive(Debug, Default)]
pub struct DetectionCache {
    addresses: HashMap<HardwareAddress, AddressState>,
    pending: HashMap<String, PendingEntry>,
    discovered: HashMap<HardwareAddress, DiscoveredNode>,
    in_flight: HashSet<HardwareAddress>,
}

impl DetectionCache {
    /// Empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `hwaddr` as Known. True exactly once per address.
    pub fn admit_if_new(&mut self, hwaddr: &HardwareAddress) -> bool {
        if self.addresses.contains_key(hwaddr) {
            return false;
        }
        self.addresses.insert(hwaddr.clone(), AddressState::Known);
        true
    }

    /// Whether `hwaddr` has been admitted (Known or Unknown).
    pub fn is_admitted(&self, hwaddr: &HardwareAddress) -> bool {
        self.addresses.contains_key(hwaddr)
    }

    /// Drop every trace of `hwaddr` from dedup so its next announcement is
    /// admitted again. Returns whether it was admitted.
    pub fn forget(&mut self, hwaddr: &HardwareAddress) -> bool {
        self.addresses.remove(hwaddr).is_some()
    }

    /// Move an address into Unknown. An existing entry keeps its original
    /// timestamp and takes the newer event.
    pub fn store_unknown(&mut self, mut entry: UnknownEntry) {
        if let Some(AddressState::Unknown(existing)) = self.addresses.get(&entry.hwaddr) {
            entry.since = existing.since;
        }
        self.addresses
            .insert(entry.hwaddr.clone(), AddressState::Unknown(entry));
    }

    /// Take an address out of Unknown; it stays admitted.
    pub fn remove_unknown(&mut self, hwaddr: &HardwareAddress) -> Option<UnknownEntry> {
        let state = self.addresses.get_mut(hwaddr)?;
        if !matches!(state, AddressState::Unknown(_)) {
            return None;
        }
        match std::mem::replace(state, AddressState::Known) {
            AddressState::Unknown(entry) => Some(entry),
            AddressState::Known => None,
        }
    }

    /// Whether `hwaddr` is waiting for identity resolution.
    pub fn is_unknown(&self, hwaddr: &HardwareAddress) -> bool {
        matches!(self.addresses.get(hwaddr), Some(AddressState::Unknown(_)))
    }

    /// Place a node in Pending. The device leaves Unknown since it now has an
    /// identity; a node already pending keeps its original timestamp.
    ///
    /// Returns true if the node was not pending before.
    pub fn store_pending(&mut self, mut entry: PendingEntry) -> bool {
        if let Some(hwaddr) = entry.event.hwaddr.clone() {
            self.remove_unknown(&hwaddr);
        }
        let newly_pending = match self.pending.get(&entry.node) {
            Some(existing) => {
                entry.since = existing.since;
                false
            }
            None => true,
        };
        self.pending.insert(entry.node.clone(), entry);
        newly_pending
    }

    /// Take a node out of Pending.
    pub fn remove_pending(&mut self, node: &str) -> Option<PendingEntry> {
        self.pending.remove(node)
    }

    /// Whether `node` is blocked.
    pub fn is_pending(&self, node: &str) -> bool {
        self.pending.contains_key(node)
    }

    /// Point-in-time copy of Unknown, ordered by address.
    pub fn unknown_snapshot(&self) -> Vec<UnknownEntry> {
        let mut entries: Vec<UnknownEntry> = self
            .addresses
            .values()
            .filter_map(|state| match state {
                AddressState::Unknown(entry) => Some(entry.clone()),
                AddressState::Known => None,
            })
            .collect();
        entries.sort_by(|a, b| a.hwaddr.cmp(&b.hwaddr));
        entries
    }

    /// Point-in-time copy of Pending, ordered by node name.
    pub fn pending_snapshot(&self) -> Vec<PendingEntry> {
        let mut entries: Vec<PendingEntry> = self.pending.values().cloned().collect();
        entries.sort_by(|a, b| a.node.cmp(&b.node));
        entries
    }

    /// Apply the eviction policy. An evicted Unknown address is forgotten
    /// entirely so a later announcement re-enters the pipeline.
    pub fn evict_expired(&mut self, now: Timestamp, policy: EvictionPolicy) -> Vec<EvictedEntry> {
        let mut evicted = Vec::new();

        let stale: Vec<HardwareAddress> = self
            .addresses
            .iter()
            .filter_map(|(hwaddr, state)| match state {
                AddressState::Unknown(entry)
                    if expired(entry.since, now, policy.unknown_ttl_secs)
                        && !self.in_flight.contains(hwaddr) =>
                {
                    Some(hwaddr.clone())
                }
                _ => None,
            })
            .collect();
        for hwaddr in stale {
            self.addresses.remove(&hwaddr);
            evicted.push(EvictedEntry::Unknown(hwaddr));
        }

        let stale: Vec<String> = self
            .pending
            .values()
            .filter(|entry| expired(entry.since, now, policy.pending_ttl_secs))
            .filter(|entry| entry.hwaddr().map_or(true, |h| !self.in_flight.contains(h)))
            .map(|entry| entry.node.clone())
            .collect();
        for node in stale {
            self.pending.remove(&node);
            evicted.push(EvictedEntry::Pending(node));
        }

        evicted
    }

    /// Drop Pending entries that refer to deleted nodes.
    pub fn drop_pending_for(&mut self, removed: &BTreeSet<String>) -> Vec<EvictedEntry> {
        let doomed: Vec<String> = self
            .pending
            .values()
            .filter(|e| removed.contains(&e.node) || removed.contains(&e.located_node))
            .map(|e| e.node.clone())
            .collect();
        doomed
            .into_iter()
            .filter_map(|node| self.pending.remove(&node))
            .map(|e| EvictedEntry::Pending(e.node))
            .collect()
    }

    /// Store a probed identity, merging with any previous record.
    pub fn record_discovered(&mut self, node: DiscoveredNode) {
        let Some(hwaddr) = node.hwaddr.clone() else {
            return;
        };
        let merged = match self.discovered.remove(&hwaddr) {
            Some(previous) => node.supersede(previous),
            None => node,
        };
        self.discovered.insert(hwaddr, merged);
    }

    /// Identity record for `hwaddr`.
    pub fn discovered(&self, hwaddr: &HardwareAddress) -> Option<&DiscoveredNode> {
        self.discovered.get(hwaddr)
    }

    /// Add a fingerprint to an existing identity record.
    ///
    /// Returns false when there is no record or the stored confidence is higher.
    pub fn add_fingerprint(
        &mut self,
        hwaddr: &HardwareAddress,
        role: FingerprintRole,
        fingerprint: Fingerprint,
        confidence: FingerprintConfidence,
    ) -> bool {
        self.discovered
            .get_mut(hwaddr)
            .map_or(false, |node| node.add_fingerprint(role, fingerprint, confidence))
    }

    /// Mark `hwaddr` as being evaluated. False if it already is.
    pub fn try_lease(&mut self, hwaddr: &HardwareAddress) -> bool {
        self.in_flight.insert(hwaddr.clone())
    }

    /// End an evaluation.
    pub fn release(&mut self, hwaddr: &HardwareAddress) {
        self.in_flight.remove(hwaddr);
    }

    /// Current sizes.
    pub fn stats(&self) -> DiscoveryStats {
        let unknown = self
            .addresses
            .values()
            .filter(|s| matches!(s, AddressState::Unknown(_)))
            .count();
        DiscoveryStats {
            known: self.addresses.len() - unknown,
            unknown,
            pending: self.pending.len(),
            discovered: self.discovered.len(),
            in_flight: self.in_flight.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::DetectionEvent;

    fn mac(last: u8) -> HardwareAddress {
        format!("00:1a:2b:3c:4d:{last:02x}").parse().unwrap()
    }

    fn unknown(last: u8, since: u64) -> UnknownEntry {
        UnknownEntry {
            hwaddr: mac(last),
            event: DetectionEvent::new(mac(last)),
            since: Timestamp::new(since),
        }
    }

    fn pending(node: &str, last: u8, since: u64) -> PendingEntry {
        PendingEntry {
            node: node.to_string(),
            located_node: node.to_string(),
            event: DetectionEvent::new(mac(last)),
            since: Timestamp::new(since),
        }
    }

    #[test]
    fn test_admit_once() {
        let mut cache = DetectionCache::new();
        assert!(cache.admit_if_new(&mac(1)));
        assert!(!cache.admit_if_new(&mac(1)));
        assert!(cache.admit_if_new(&mac(2)));
    }

    #[test]
    fn test_unknown_address_still_deduplicated() {
        let mut cache = DetectionCache::new();
        assert!(cache.admit_if_new(&mac(1)));
        cache.store_unknown(unknown(1, 0));
        assert!(cache.is_unknown(&mac(1)));
        assert!(!cache.admit_if_new(&mac(1)));
        assert_eq!(cache.stats().known, 0);
        assert_eq!(cache.stats().unknown, 1);
    }

    #[test]
    fn test_remove_unknown_returns_to_known() {
        let mut cache = DetectionCache::new();
        cache.admit_if_new(&mac(1));
        cache.store_unknown(unknown(1, 0));
        assert!(cache.remove_unknown(&mac(1)).is_some());
        assert!(cache.remove_unknown(&mac(1)).is_none());
        assert!(!cache.is_unknown(&mac(1)));
        assert!(cache.is_admitted(&mac(1)));
    }

    #[test]
    fn test_forget_allows_readmission() {
        let mut cache = DetectionCache::new();
        assert!(cache.admit_if_new(&mac(1)));
        assert!(cache.forget(&mac(1)));
        assert!(!cache.forget(&mac(1)));
        assert!(cache.admit_if_new(&mac(1)));
    }

    #[test]
    fn test_store_pending_leaves_unknown() {
        let mut cache = DetectionCache::new();
        cache.admit_if_new(&mac(1));
        cache.store_unknown(unknown(1, 0));
        cache.store_pending(pending("n1", 1, 5));
        assert!(!cache.is_unknown(&mac(1)));
        assert!(cache.is_pending("n1"));
    }

    #[test]
    fn test_repeat_store_keeps_original_timestamp() {
        let mut cache = DetectionCache::new();
        assert!(cache.store_pending(pending("n1", 1, 5)));
        assert!(!cache.store_pending(pending("n1", 1, 50)));
        assert_eq!(cache.pending_snapshot()[0].since, Timestamp::new(5));

        cache.store_unknown(unknown(2, 7));
        cache.store_unknown(unknown(2, 70));
        assert_eq!(cache.unknown_snapshot()[0].since, Timestamp::new(7));
    }

    #[test]
    fn test_snapshots_are_sorted_copies() {
        let mut cache = DetectionCache::new();
        cache.store_unknown(unknown(3, 0));
        cache.store_unknown(unknown(1, 0));
        let snap = cache.unknown_snapshot();
        cache.remove_unknown(&mac(1));
        assert_eq!(snap.len(), 2);
        assert_eq!(snap[0].hwaddr, mac(1));
    }

    #[test]
    fn test_unknown_eviction_forgets_address() {
        let mut cache = DetectionCache::new();
        cache.admit_if_new(&mac(1));
        cache.store_unknown(unknown(1, 100));
        let policy = EvictionPolicy {
            unknown_ttl_secs: 60,
            pending_ttl_secs: 0,
        };

        assert!(cache.evict_expired(Timestamp::new(150), policy).is_empty());
        let evicted = cache.evict_expired(Timestamp::new(160), policy);
        assert_eq!(evicted, vec![EvictedEntry::Unknown(mac(1))]);
        assert!(cache.admit_if_new(&mac(1)));
    }

    #[test]
    fn test_pending_never_expires_by_default() {
        let mut cache = DetectionCache::new();
        cache.store_pending(pending("n1", 1, 0));
        let policy = EvictionPolicy {
            unknown_ttl_secs: 60,
            pending_ttl_secs: 0,
        };
        assert!(cache.evict_expired(Timestamp::new(1_000_000), policy).is_empty());

        let policy = EvictionPolicy {
            unknown_ttl_secs: 0,
            pending_ttl_secs: 10,
        };
        let evicted = cache.evict_expired(Timestamp::new(10), policy);
        assert_eq!(evicted, vec![EvictedEntry::Pending("n1".to_string())]);
    }

    #[test]
    fn test_in_flight_entries_not_evicted() {
        let mut cache = DetectionCache::new();
        cache.store_unknown(unknown(1, 0));
        assert!(cache.try_lease(&mac(1)));
        let policy = EvictionPolicy {
            unknown_ttl_secs: 1,
            pending_ttl_secs: 0,
        };
        assert!(cache.evict_expired(Timestamp::new(100), policy).is_empty());
        cache.release(&mac(1));
        assert_eq!(cache.evict_expired(Timestamp::new(100), policy).len(), 1);
    }

    #[test]
    fn test_drop_pending_for_removed_nodes() {
        let mut cache = DetectionCache::new();
        cache.store_pending(pending("n1", 1, 0));
        cache.store_pending(pending("n2", 2, 0));
        let removed: BTreeSet<String> = ["n2".to_string()].into();
        let dropped = cache.drop_pending_for(&removed);
        assert_eq!(dropped, vec![EvictedEntry::Pending("n2".to_string())]);
        assert!(cache.is_pending("n1"));
    }

    #[test]
    fn test_lease_is_exclusive() {
        let mut cache = DetectionCache::new();
        assert!(cache.try_lease(&mac(1)));
        assert!(!cache.try_lease(&mac(1)));
        cache.release(&mac(1));
        assert!(cache.try_lease(&mac(1)));
    }

    #[test]
    fn test_validated_fingerprint_survives_reprobe() {
        let mut cache = DetectionCache::new();
        let event = DetectionEvent::new(mac(1)).with_certificate(b"cert".to_vec());
        cache.record_discovered(DiscoveredNode::from_event(&event));
        assert!(cache.add_fingerprint(
            &mac(1),
            FingerprintRole::Manager,
            Fingerprint::of_certificate(b"cert"),
            FingerprintConfidence::Validated,
        ));

        let reprobe = DetectionEvent::new(mac(1)).with_certificate(b"spoof".to_vec());
        cache.record_discovered(DiscoveredNode::from_event(&reprobe));

        let node = cache.discovered(&mac(1)).unwrap();
        let manager = node.fingerprint(FingerprintRole::Manager).unwrap();
        assert_eq!(manager.confidence, FingerprintConfidence::Validated);
        assert!(manager.fingerprint.matches_certificate(b"cert"));
    }
}
