//! # Domain Invariants
//!
//! Attribute names, defaults and the rules the engine must always uphold.

use super::errors::DiscoveryError;

/// Per-node discovery policy.
pub const ATTR_DISCOVERY_POLICY: &str = "discovery.policy";

/// Trusted management-controller certificate fingerprint.
pub const ATTR_TLS_FINGERPRINT: &str = "pubkeys.tls_hardwaremanager";

/// System UUID persisted on configuration.
pub const ATTR_UUID: &str = "id.uuid";

/// Node name of the enclosure manager a bay belongs to.
pub const ATTR_ENCLOSURE_MANAGER: &str = "enclosure.manager";

/// Bay number within the enclosure.
pub const ATTR_ENCLOSURE_BAY: &str = "enclosure.bay";

/// Switch the management port is cabled to.
pub const ATTR_HWM_SWITCH: &str = "hardwaremanagement.switch";

/// Management controller address.
pub const ATTR_HWM_MANAGER: &str = "hardwaremanagement.manager";

/// Switch port the management port is cabled to.
pub const ATTR_HWM_SWITCHPORT: &str = "hardwaremanagement.switchport";

/// Attributes whose change triggers an immediate re-walk.
pub const WATCHED_ATTRIBUTES: [&str; 5] = [
    ATTR_DISCOVERY_POLICY,
    ATTR_HWM_SWITCH,
    ATTR_HWM_MANAGER,
    ATTR_HWM_SWITCHPORT,
    ATTR_TLS_FINGERPRINT,
];

/// Default sweep period in seconds.
pub const DEFAULT_RECHECK_INTERVAL_SECS: u64 = 900;

/// Default bound on a single driver call in seconds.
pub const DEFAULT_PROBE_TIMEOUT_SECS: u64 = 30;

/// Default lifetime of an unresolved address (one day).
pub const DEFAULT_UNKNOWN_TTL_SECS: u64 = 86_400;

/// Invariant: an enclosure bay resolves to exactly one node.
///
/// Zero or several matches is an inventory fault, never a transient one.
pub fn invariant_single_enclosure_candidate(
    manager: &str,
    bay: &str,
    mut candidates: Vec<String>,
) -> Result<String, DiscoveryError> {
    if candidates.len() == 1 {
        if let Some(node) = candidates.pop() {
            return Ok(node);
        }
    }
    Err(DiscoveryError::AmbiguousInventory {
        manager: manager.to_string(),
        bay: bay.to_string(),
        candidates,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::errors::FailureKind;

    #[test]
    fn test_single_candidate_resolves() {
        let node = invariant_single_enclosure_candidate("smm1", "3", vec!["n3".into()]).unwrap();
        assert_eq!(node, "n3");
    }

    #[test]
    fn test_zero_or_many_candidates_fault() {
        let none = invariant_single_enclosure_candidate("smm1", "3", vec![]).unwrap_err();
        assert_eq!(none.kind(), FailureKind::AmbiguousInventory);

        let many =
            invariant_single_enclosure_candidate("smm1", "3", vec!["a".into(), "b".into()])
                .unwrap_err();
        assert_eq!(many.kind(), FailureKind::AmbiguousInventory);
    }

    #[test]
    fn test_watched_attributes_include_policy_and_fingerprint() {
        assert!(WATCHED_ATTRIBUTES.contains(&ATTR_DISCOVERY_POLICY));
        assert!(WATCHED_ATTRIBUTES.contains(&ATTR_TLS_FINGERPRINT));
    }
}
