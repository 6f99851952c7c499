//! # Value Objects
//!
//! Small immutable types shared by every layer: hardware addresses,
//! timestamps, hardware families, certificate fingerprints and attribute
//! filters.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256, Sha512};

use super::errors::DiscoveryError;

/// Link-layer address of a management endpoint.
///
/// Stored normalised as six lowercase, colon-separated octets so that
/// `00-1A-2B-3C-4D-5E` and `00:1a:2b:3c:4d:5e` deduplicate to the same key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct HardwareAddress(String);

impl HardwareAddress {
    /// Borrow the normalised form.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for HardwareAddress {
    type Err = DiscoveryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let octets: Vec<&str> = s.trim().split(|c: char| c == ':' || c == '-').collect();
        let well_formed = octets.len() == 6
            && octets
                .iter()
                .all(|o| o.len() == 2 && o.chars().all(|c| c.is_ascii_hexdigit()));
        if !well_formed {
            return Err(DiscoveryError::InvalidHardwareAddress(s.to_string()));
        }
        Ok(Self(octets.join(":").to_ascii_lowercase()))
    }
}

impl TryFrom<String> for HardwareAddress {
    type Error = DiscoveryError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<HardwareAddress> for String {
    fn from(addr: HardwareAddress) -> Self {
        addr.0
    }
}

impl fmt::Display for HardwareAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Seconds since the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Timestamp(u64);

impl Timestamp {
    /// Create a timestamp from seconds.
    pub fn new(secs: u64) -> Self {
        Self(secs)
    }

    /// Seconds since the epoch.
    pub fn as_secs(&self) -> u64 {
        self.0
    }

    /// Seconds elapsed from `self` until `now` (zero if `now` is earlier).
    pub fn age_at(&self, now: Timestamp) -> u64 {
        now.0.saturating_sub(self.0)
    }
}

/// Closed set of hardware families the engine knows how to drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HardwareFamily {
    /// Chassis/enclosure manager fronting several compute bays.
    EnclosureManager,
    /// Vendor controller with switch-correlated identity.
    XClarityController,
    /// Generic standalone baseboard management controller.
    Bmc,
}

impl HardwareFamily {
    /// Stable lowercase name, matching the serde form.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EnclosureManager => "enclosure_manager",
            Self::XClarityController => "x_clarity_controller",
            Self::Bmc => "bmc",
        }
    }
}

impl fmt::Display for HardwareFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Digest algorithm used for a fingerprint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HashAlgorithm {
    /// SHA-256 (32-byte digest)
    Sha256,
    /// SHA-512 (64-byte digest)
    Sha512,
}

impl HashAlgorithm {
    /// Attribute-store prefix.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sha256 => "sha256",
            Self::Sha512 => "sha512",
        }
    }

    /// Digest length in bytes.
    pub fn digest_len(&self) -> usize {
        match self {
            Self::Sha256 => 32,
            Self::Sha512 => 64,
        }
    }

    fn digest(&self, data: &[u8]) -> Vec<u8> {
        match self {
            Self::Sha256 => Sha256::digest(data).to_vec(),
            Self::Sha512 => Sha512::digest(data).to_vec(),
        }
    }
}

impl FromStr for HashAlgorithm {
    type Err = DiscoveryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sha256" => Ok(Self::Sha256),
            "sha512" => Ok(Self::Sha512),
            other => Err(DiscoveryError::InvalidFingerprint(format!(
                "unsupported algorithm {other}"
            ))),
        }
    }
}

/// Certificate fingerprint, rendered as `"<algorithm>$<hex digest>"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    algorithm: HashAlgorithm,
    digest: Vec<u8>,
}

impl Fingerprint {
    /// Fingerprint used when recording a live endpoint certificate.
    pub fn of_certificate(certificate: &[u8]) -> Self {
        Self::compute(HashAlgorithm::Sha512, certificate)
    }

    /// Hash `data` with `algorithm`.
    pub fn compute(algorithm: HashAlgorithm, data: &[u8]) -> Self {
        Self {
            algorithm,
            digest: algorithm.digest(data),
        }
    }

    /// Whether `certificate` hashes to this fingerprint under its own algorithm.
    pub fn matches_certificate(&self, certificate: &[u8]) -> bool {
        self.algorithm.digest(certificate) == self.digest
    }

    /// Digest algorithm.
    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    /// Raw digest bytes.
    pub fn digest(&self) -> &[u8] {
        &self.digest
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}${}", self.algorithm.as_str(), hex::encode(&self.digest))
    }
}

impl FromStr for Fingerprint {
    type Err = DiscoveryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (algorithm, digest) = s
            .trim()
            .split_once('$')
            .ok_or_else(|| DiscoveryError::InvalidFingerprint(s.to_string()))?;
        let algorithm: HashAlgorithm = algorithm.parse()?;
        let digest = hex::decode(digest)
            .map_err(|e| DiscoveryError::InvalidFingerprint(format!("{s}: {e}")))?;
        if digest.len() != algorithm.digest_len() {
            return Err(DiscoveryError::InvalidFingerprint(format!(
                "{s}: expected {} digest bytes, got {}",
                algorithm.digest_len(),
                digest.len()
            )));
        }
        Ok(Self { algorithm, digest })
    }
}

/// Which certificate a fingerprint identifies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FingerprintRole {
    /// Management controller (BMC / enclosure manager) certificate.
    Manager,
    /// In-band system certificate.
    System,
}

/// How much a fingerprint is trusted. Ordered: `Observed < Trusted < Validated`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FingerprintConfidence {
    /// Seen on the wire during probe, not confirmed by anyone.
    Observed,
    /// Accepted by the node's discovery policy (trust on first use).
    Trusted,
    /// Confirmed by a secure validator (switch publication, enclosure manager).
    Validated,
}

/// Single `key=value` predicate over node attributes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AttributeFilter {
    /// Attribute name
    pub key: String,
    /// Required value
    pub value: String,
}

impl AttributeFilter {
    /// Build an equality filter.
    pub fn equals(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Whether an attribute value satisfies the filter.
    pub fn matches(&self, value: Option<&String>) -> bool {
        value.map_or(false, |v| *v == self.value)
    }
}

impl FromStr for AttributeFilter {
    type Err = DiscoveryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('=') {
            Some((key, value)) if !key.trim().is_empty() => {
                Ok(Self::equals(key.trim(), value.trim()))
            }
            _ => Err(DiscoveryError::Validation(format!(
                "bad attribute expression: {s}"
            ))),
        }
    }
}

impl fmt::Display for AttributeFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.key, self.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hardware_address_normalises() {
        let a: HardwareAddress = "00-1A-2B-3C-4D-5E".parse().unwrap();
        let b: HardwareAddress = "00:1a:2b:3c:4d:5e".parse().unwrap();
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "00:1a:2b:3c:4d:5e");
    }

    #[test]
    fn test_hardware_address_rejects_garbage() {
        assert!("00:1a:2b:3c:4d".parse::<HardwareAddress>().is_err());
        assert!("00:1a:2b:3c:4d:zz".parse::<HardwareAddress>().is_err());
        assert!("".parse::<HardwareAddress>().is_err());
    }

    #[test]
    fn test_timestamp_age_saturates() {
        let t = Timestamp::new(100);
        assert_eq!(t.age_at(Timestamp::new(160)), 60);
        assert_eq!(t.age_at(Timestamp::new(50)), 0);
    }

    #[test]
    fn test_fingerprint_matches_its_certificate() {
        let fp = Fingerprint::of_certificate(b"cert-a");
        assert!(fp.matches_certificate(b"cert-a"));
        assert!(!fp.matches_certificate(b"cert-b"));
        assert_eq!(fp.algorithm(), HashAlgorithm::Sha512);
    }

    #[test]
    fn test_fingerprint_text_form() {
        let fp = Fingerprint::compute(HashAlgorithm::Sha256, b"cert-a");
        let text = fp.to_string();
        assert!(text.starts_with("sha256$"));
        assert_eq!(text.parse::<Fingerprint>().unwrap(), fp);
    }

    #[test]
    fn test_fingerprint_rejects_wrong_length() {
        assert!("sha256$abcd".parse::<Fingerprint>().is_err());
        assert!("md5$abcd".parse::<Fingerprint>().is_err());
        assert!("no-separator".parse::<Fingerprint>().is_err());
    }

    #[test]
    fn test_sha256_fingerprint_still_matches() {
        let fp = Fingerprint::compute(HashAlgorithm::Sha256, b"legacy");
        let parsed: Fingerprint = fp.to_string().parse().unwrap();
        assert!(parsed.matches_certificate(b"legacy"));
    }

    #[test]
    fn test_confidence_ordering() {
        assert!(FingerprintConfidence::Observed < FingerprintConfidence::Trusted);
        assert!(FingerprintConfidence::Trusted < FingerprintConfidence::Validated);
    }

    #[test]
    fn test_attribute_filter_parse() {
        let f: AttributeFilter = "enclosure.bay=3".parse().unwrap();
        assert_eq!(f, AttributeFilter::equals("enclosure.bay", "3"));
        assert!(f.matches(Some(&"3".to_string())));
        assert!(!f.matches(None));
        assert!("=3".parse::<AttributeFilter>().is_err());
    }
}
