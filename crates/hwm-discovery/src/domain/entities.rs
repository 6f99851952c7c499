//! # Domain Entities
//!
//! Detection events, discovered-node identity records and the outcome types
//! returned by each pipeline stage.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::errors::{DiscoveryError, DiscoveryResult};
use super::policy::DecisionReason;
use super::value_objects::{
    Fingerprint, FingerprintConfidence, FingerprintRole, HardwareAddress, Timestamp,
};

/// One observation of a management endpoint.
///
/// Scanners produce a raw event; a driver's probe returns an enriched copy.
/// Enrichment never mutates a value another task may hold: every `with_*`
/// builder consumes `self` and returns the new event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectionEvent {
    /// Primary dedup key. Raw events without one are discarded.
    pub hwaddr: Option<HardwareAddress>,
    /// Announced service identifiers, in announcement order.
    #[serde(default)]
    pub services: Vec<String>,
    /// Bay number when the device sits in a managed enclosure.
    #[serde(default)]
    pub enclosure_bay: Option<String>,
    /// System UUID as it appears in the DMI table.
    #[serde(default)]
    pub uuid: Option<Uuid>,
    /// Vendor serial number.
    #[serde(default)]
    pub serial: Option<String>,
    /// Human readable model name.
    #[serde(default)]
    pub model: Option<String>,
    /// Vendor model number.
    #[serde(default)]
    pub model_number: Option<String>,
    /// DER certificate presented by the endpoint, filled in by probe.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate: Option<Vec<u8>>,
    /// Any other protocol-furnished fields.
    #[serde(default)]
    pub extra: BTreeMap<String, String>,
}

impl DetectionEvent {
    /// Event for a device seen at `hwaddr`.
    pub fn new(hwaddr: HardwareAddress) -> Self {
        Self {
            hwaddr: Some(hwaddr),
            ..Default::default()
        }
    }

    /// Append an announced service.
    pub fn with_service(mut self, service: impl Into<String>) -> Self {
        self.services.push(service.into());
        self
    }

    /// Set the enclosure bay.
    pub fn with_enclosure_bay(mut self, bay: impl Into<String>) -> Self {
        self.enclosure_bay = Some(bay.into());
        self
    }

    /// Set the system UUID.
    pub fn with_uuid(mut self, uuid: Uuid) -> Self {
        self.uuid = Some(uuid);
        self
    }

    /// Set the serial number.
    pub fn with_serial(mut self, serial: impl Into<String>) -> Self {
        self.serial = Some(serial.into());
        self
    }

    /// Set model name and number.
    pub fn with_model(mut self, name: impl Into<String>, number: impl Into<String>) -> Self {
        self.model = Some(name.into());
        self.model_number = Some(number.into());
        self
    }

    /// Attach the endpoint certificate.
    pub fn with_certificate(mut self, certificate: impl Into<Vec<u8>>) -> Self {
        self.certificate = Some(certificate.into());
        self
    }

    /// Add a protocol-specific field.
    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    /// Hardware address, or an error for stages that cannot proceed without it.
    pub fn require_hwaddr(&self) -> DiscoveryResult<&HardwareAddress> {
        self.hwaddr
            .as_ref()
            .ok_or(DiscoveryError::MissingHardwareAddress)
    }
}

/// Fingerprint together with how far it has been confirmed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedFingerprint {
    /// Digest
    pub fingerprint: Fingerprint,
    /// Confidence level
    pub confidence: FingerprintConfidence,
}

/// Validated identity record of a probed device.
///
/// Created on first successful probe. Fingerprints accumulate as validators
/// confirm them and are never replaced by a lower-confidence value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredNode {
    /// System UUID
    pub uuid: Option<Uuid>,
    /// Serial number
    pub serial: Option<String>,
    /// Primary hardware address
    pub hwaddr: Option<HardwareAddress>,
    /// Model name
    pub model: Option<String>,
    /// Model number
    pub model_number: Option<String>,
    fingerprints: BTreeMap<FingerprintRole, RecordedFingerprint>,
}

impl DiscoveredNode {
    /// Identity record with no fingerprints.
    pub fn new(uuid: Option<Uuid>, hwaddr: Option<HardwareAddress>) -> Self {
        Self {
            uuid,
            serial: None,
            hwaddr,
            model: None,
            model_number: None,
            fingerprints: BTreeMap::new(),
        }
    }

    /// Build from an enriched event. A presented certificate is recorded as
    /// an observed manager fingerprint.
    pub fn from_event(event: &DetectionEvent) -> Self {
        let mut node = Self {
            uuid: event.uuid,
            serial: event.serial.clone(),
            hwaddr: event.hwaddr.clone(),
            model: event.model.clone(),
            model_number: event.model_number.clone(),
            fingerprints: BTreeMap::new(),
        };
        if let Some(cert) = &event.certificate {
            node.add_fingerprint(
                FingerprintRole::Manager,
                Fingerprint::of_certificate(cert),
                FingerprintConfidence::Observed,
            );
        }
        node
    }

    /// Record a fingerprint for `role`.
    ///
    /// Returns `false` (and changes nothing) if the role already holds a
    /// fingerprint of higher confidence.
    pub fn add_fingerprint(
        &mut self,
        role: FingerprintRole,
        fingerprint: Fingerprint,
        confidence: FingerprintConfidence,
    ) -> bool {
        if let Some(existing) = self.fingerprints.get(&role) {
            if existing.confidence > confidence {
                return false;
            }
        }
        self.fingerprints.insert(
            role,
            RecordedFingerprint {
                fingerprint,
                confidence,
            },
        );
        true
    }

    /// Fingerprint recorded for `role`.
    pub fn fingerprint(&self, role: FingerprintRole) -> Option<&RecordedFingerprint> {
        self.fingerprints.get(&role)
    }

    /// All recorded fingerprints.
    pub fn fingerprints(&self) -> impl Iterator<Item = (&FingerprintRole, &RecordedFingerprint)> {
        self.fingerprints.iter()
    }

    /// Supersede `previous` with this record, keeping any of its fingerprints
    /// that outrank what this probe observed.
    pub fn supersede(mut self, previous: DiscoveredNode) -> Self {
        for (role, recorded) in previous.fingerprints {
            let keep_previous = self
                .fingerprints
                .get(&role)
                .map_or(true, |current| recorded.confidence > current.confidence);
            if keep_previous {
                self.fingerprints.insert(role, recorded);
            }
        }
        self
    }
}

/// Result of the trust-and-configure path for one node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EvaluationOutcome {
    /// Configuration pushed and identity attributes persisted.
    Configured {
        /// Node that was configured
        node: String,
    },
    /// Policy declined; the event waits in Pending.
    Pending {
        /// Node the event is pending under
        node: String,
        /// Why the gate declined
        reason: DecisionReason,
    },
    /// Live certificate already trusted; nothing to push.
    AlreadyTrusted {
        /// Node that is already trusted
        node: String,
    },
    /// Identity came from a path not trusted for configuration.
    NotApplicable,
}

/// Result of running one raw detection through intake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DetectionOutcome {
    /// No hardware address on the event.
    MissingHardwareAddress,
    /// No registered driver for any announced service.
    Unsupported,
    /// Address already admitted.
    Duplicate,
    /// Another task holds the evaluation lease for this address.
    InFlight,
    /// Probed, but no node identity yet; stored in Unknown.
    Unresolved,
    /// Identity resolved and evaluated.
    Evaluated(EvaluationOutcome),
}

/// Result of re-driving one cache entry during a sweep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RewalkOutcome {
    /// Unknown entry still has no identity.
    Unresolved,
    /// Entry was evaluated.
    Evaluated(EvaluationOutcome),
}

/// Device waiting for identity resolution, keyed by hardware address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownEntry {
    /// Dedup key
    pub hwaddr: HardwareAddress,
    /// Enriched event from the last probe
    pub event: DetectionEvent,
    /// When the entry was first stored
    pub since: Timestamp,
}

/// Resolved device blocked by policy, keyed by node name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingEntry {
    /// Node the device resolved to (the bay node for enclosure members)
    pub node: String,
    /// Node the locator returned; the enclosure manager for bay lookups
    pub located_node: String,
    /// Enriched event
    pub event: DetectionEvent,
    /// When the node first became pending
    pub since: Timestamp,
}

impl PendingEntry {
    /// Hardware address of the blocked device, if the event carries one.
    pub fn hwaddr(&self) -> Option<&HardwareAddress> {
        self.event.hwaddr.as_ref()
    }
}

/// Cache entry removed by the eviction policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EvictedEntry {
    /// Unresolved address, forgotten entirely
    Unknown(HardwareAddress),
    /// Pending node
    Pending(String),
}

/// Snapshot of engine state sizes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiscoveryStats {
    /// Addresses admitted and not currently unresolved
    pub known: usize,
    /// Addresses awaiting identity resolution
    pub unknown: usize,
    /// Nodes blocked from configuration
    pub pending: usize,
    /// Identity records held
    pub discovered: usize,
    /// Devices with an evaluation running
    pub in_flight: usize,
}
