//! # Discovery Policy
//!
//! The trust decision made before any configuration is pushed to a device.
//!
//! | Policy | Stored fingerprint | Live certificate | Result |
//! |--------|--------------------|------------------|--------|
//! | `permissive` | present | any | decline (locked) |
//! | `open` / `permissive` | matches | present | decline (already trusted) |
//! | `open` / `permissive` | absent or different | present | apply |
//! | `open` / `permissive` | absent or different | absent | apply, UUID only |
//! | `open` / `permissive` | any | absent, `id.uuid` already recorded | decline (already trusted) |
//! | `secure` / `manual` / unset | any | any | decline (strict) |
//!
//! The function is pure: it reads already-fetched attribute values and never
//! touches the store, which keeps repeated evaluation of an unchanged node a
//! no-op.

use std::fmt;

use super::value_objects::Fingerprint;

/// Per-node `discovery.policy` setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiscoveryPolicy {
    /// Trust whatever certificate the device presents, and follow changes.
    Open,
    /// Trust on first use, then lock.
    Permissive,
    /// Require out-of-band verification.
    Secure,
    /// Attribute absent or empty.
    Unset,
}

impl DiscoveryPolicy {
    /// Interpret a raw attribute value.
    ///
    /// `manual` is an alias of `secure`. Unrecognised values fall back to the
    /// strict behaviour rather than silently loosening trust.
    pub fn from_attribute(value: Option<&str>) -> Self {
        let Some(raw) = value.map(str::trim).filter(|v| !v.is_empty()) else {
            return Self::Unset;
        };
        match raw.to_ascii_lowercase().as_str() {
            "open" => Self::Open,
            "permissive" => Self::Permissive,
            _ => Self::Secure,
        }
    }

    /// Whether this policy allows the automatic bootstrap path at all.
    pub fn allows_bootstrap(&self) -> bool {
        matches!(self, Self::Open | Self::Permissive)
    }
}

impl fmt::Display for DiscoveryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Open => write!(f, "open"),
            Self::Permissive => write!(f, "permissive"),
            Self::Secure => write!(f, "secure"),
            Self::Unset => write!(f, "unset"),
        }
    }
}

/// Why the gate reached its decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DecisionReason {
    /// Permissive node already has a trusted fingerprint.
    PermissiveLocked,
    /// Live certificate matches the stored fingerprint.
    AlreadyTrusted,
    /// Device presented no certificate; only its UUID is recorded.
    NoLiveCertificate,
    /// Policy requires manual verification.
    StrictPolicy,
    /// First trust establishment.
    TrustBootstrap,
    /// Open policy and the device certificate changed.
    CertificateChanged,
}

impl fmt::Display for DecisionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::PermissiveLocked => "permissive policy with stored fingerprint",
            Self::AlreadyTrusted => "certificate already trusted",
            Self::NoLiveCertificate => "no certificate presented, identity only",
            Self::StrictPolicy => "policy requires manual verification",
            Self::TrustBootstrap => "trust bootstrap",
            Self::CertificateChanged => "certificate changed under open policy",
        };
        f.write_str(text)
    }
}

/// Ephemeral result of a trust evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PolicyDecision {
    /// Push configuration and persist identity attributes.
    pub apply: bool,
    /// Explanation
    pub reason: DecisionReason,
}

impl PolicyDecision {
    fn apply(reason: DecisionReason) -> Self {
        Self {
            apply: true,
            reason,
        }
    }

    fn decline(reason: DecisionReason) -> Self {
        Self {
            apply: false,
            reason,
        }
    }
}

/// Decide whether to configure a device.
///
/// `stored` is the raw `pubkeys.tls_hardwaremanager` value; empty counts as
/// absent, and a value that does not parse never matches any certificate.
/// `uuid_recorded` is true when the node's `id.uuid` already equals the UUID
/// the device reported; it only matters for devices without a certificate.
pub fn decide(
    policy: DiscoveryPolicy,
    stored: Option<&str>,
    live_certificate: Option<&[u8]>,
    uuid_recorded: bool,
) -> PolicyDecision {
    let stored = stored.map(str::trim).filter(|s| !s.is_empty());

    if !policy.allows_bootstrap() {
        return PolicyDecision::decline(DecisionReason::StrictPolicy);
    }
    if policy == DiscoveryPolicy::Permissive && stored.is_some() {
        return PolicyDecision::decline(DecisionReason::PermissiveLocked);
    }
    let Some(certificate) = live_certificate else {
        return if uuid_recorded {
            PolicyDecision::decline(DecisionReason::AlreadyTrusted)
        } else {
            PolicyDecision::apply(DecisionReason::NoLiveCertificate)
        };
    };

    match stored {
        None => PolicyDecision::apply(DecisionReason::TrustBootstrap),
        Some(text) => {
            let matches = text
                .parse::<Fingerprint>()
                .map(|fp| fp.matches_certificate(certificate))
                .unwrap_or(false);
            if matches {
                PolicyDecision::decline(DecisionReason::AlreadyTrusted)
            } else {
                PolicyDecision::apply(DecisionReason::CertificateChanged)
            }
        }
    }
}
