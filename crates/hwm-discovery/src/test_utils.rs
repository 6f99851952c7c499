//! Test utilities for the discovery engine.
//!
//! Scripted drivers and controllable clocks for deterministic testing.
//! Enable with the `test-utils` feature flag.
//!
//! # Example
//!
//! ```rust
//! use hwm_discovery::test_utils::ManualTimeSource;
//! use hwm_discovery::TimeSource;
//!
//! let time = ManualTimeSource::new(1000);
//! time.advance(60);
//! assert_eq!(time.now().as_secs(), 1060);
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use uuid::Uuid;

use crate::domain::{
    DetectionEvent, DriverStage, HandlerError, HardwareAddress, HardwareFamily, Timestamp,
};
use crate::ports::{AttributeStore, HandlerFactory, HardwareHandler, TimeSource};

/// A time source that returns a fixed timestamp.
#[derive(Debug, Clone)]
pub struct FixedTimeSource {
    timestamp: u64,
}

impl FixedTimeSource {
    /// Create a fixed time source (seconds).
    pub fn new(timestamp: u64) -> Self {
        Self { timestamp }
    }
}

impl TimeSource for FixedTimeSource {
    fn now(&self) -> Timestamp {
        Timestamp::new(self.timestamp)
    }
}

/// A time source moved forward by hand. Shared clones see the same time.
#[derive(Debug, Clone, Default)]
pub struct ManualTimeSource {
    secs: Arc<AtomicU64>,
}

impl ManualTimeSource {
    /// Start at `secs`.
    pub fn new(secs: u64) -> Self {
        Self {
            secs: Arc::new(AtomicU64::new(secs)),
        }
    }

    /// Move forward by `secs`.
    pub fn advance(&self, secs: u64) {
        self.secs.fetch_add(secs, Ordering::SeqCst);
    }

    /// Jump to `secs`.
    pub fn set(&self, secs: u64) {
        self.secs.store(secs, Ordering::SeqCst);
    }
}

impl TimeSource for ManualTimeSource {
    fn now(&self) -> Timestamp {
        Timestamp::new(self.secs.load(Ordering::SeqCst))
    }
}

/// How a scripted device behaves.
#[derive(Debug, Clone, Default)]
pub struct DeviceScript {
    /// Certificate presented over TLS
    pub certificate: Option<Vec<u8>>,
    /// UUID reported by probe
    pub uuid: Option<Uuid>,
    /// Serial reported by probe
    pub serial: Option<String>,
    /// Whether switch correlation identifies this device
    pub discoverable_by_switch: bool,
    /// Probe answers with an error
    pub fail_probe: bool,
    /// Preconfig answers with an error
    pub fail_preconfig: bool,
    /// Config answers with an error
    pub fail_config: bool,
    /// Probe sleeps this long before answering
    pub probe_delay: Option<Duration>,
    /// Hardware address the driver reports, if it differs
    pub reported_hwaddr: Option<HardwareAddress>,
}

impl DeviceScript {
    /// Healthy, switch-discoverable device presenting `certificate`.
    pub fn with_certificate(certificate: impl Into<Vec<u8>>) -> Self {
        Self {
            certificate: Some(certificate.into()),
            discoverable_by_switch: true,
            ..Self::default()
        }
    }

    /// Set the reported UUID.
    pub fn uuid(mut self, uuid: Uuid) -> Self {
        self.uuid = Some(uuid);
        self
    }

    /// Set the reported serial.
    pub fn serial(mut self, serial: impl Into<String>) -> Self {
        self.serial = Some(serial.into());
        self
    }

    /// Not identifiable by switch correlation.
    pub fn not_switch_discoverable(mut self) -> Self {
        self.discoverable_by_switch = false;
        self
    }

    /// Report `hwaddr` instead of the announced address.
    pub fn reporting_hwaddr(mut self, hwaddr: HardwareAddress) -> Self {
        self.reported_hwaddr = Some(hwaddr);
        self
    }

    /// Make every probe fail.
    pub fn failing_probe(mut self) -> Self {
        self.fail_probe = true;
        self
    }

    /// Make every preconfig fail.
    pub fn failing_preconfig(mut self) -> Self {
        self.fail_preconfig = true;
        self
    }

    /// Make every config fail.
    pub fn failing_config(mut self) -> Self {
        self.fail_config = true;
        self
    }

    /// Delay every probe.
    pub fn probe_delay(mut self, delay: Duration) -> Self {
        self.probe_delay = Some(delay);
        self
    }
}

/// One recorded driver call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverCall {
    /// Device the driver was built for
    pub hwaddr: Option<HardwareAddress>,
    /// Call made
    pub stage: DriverStage,
    /// Node passed to config
    pub node: Option<String>,
}

/// Builds [`MockHandler`]s from per-address scripts and records every call.
#[derive(Debug, Default)]
pub struct MockHandlerFactory {
    scripts: Mutex<HashMap<HardwareAddress, DeviceScript>>,
    default_script: Mutex<DeviceScript>,
    calls: Arc<Mutex<Vec<DriverCall>>>,
}

impl MockHandlerFactory {
    /// Factory whose unscripted devices use `DeviceScript::default()`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Script `hwaddr`. Drivers created afterwards use the new script.
    pub fn script(&self, hwaddr: HardwareAddress, script: DeviceScript) {
        self.scripts.lock().insert(hwaddr, script);
    }

    /// Script for devices without their own.
    pub fn set_default_script(&self, script: DeviceScript) {
        *self.default_script.lock() = script;
    }

    /// Every call so far, in order.
    pub fn calls(&self) -> Vec<DriverCall> {
        self.calls.lock().clone()
    }

    /// Number of calls made at `stage`.
    pub fn call_count(&self, stage: DriverStage) -> usize {
        self.calls.lock().iter().filter(|c| c.stage == stage).count()
    }

    /// Number of config pushes to `node`.
    pub fn config_calls(&self, node: &str) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.stage == DriverStage::Config && c.node.as_deref() == Some(node))
            .count()
    }
}

impl HandlerFactory for MockHandlerFactory {
    fn create(
        &self,
        family: HardwareFamily,
        event: &DetectionEvent,
        _store: Arc<dyn AttributeStore>,
    ) -> Box<dyn HardwareHandler> {
        let script = event
            .hwaddr
            .as_ref()
            .and_then(|h| self.scripts.lock().get(h).cloned())
            .unwrap_or_else(|| self.default_script.lock().clone());
        Box::new(MockHandler {
            family,
            event: event.clone(),
            script,
            calls: Arc::clone(&self.calls),
        })
    }
}

/// Scripted driver for one device.
#[derive(Debug)]
pub struct MockHandler {
    family: HardwareFamily,
    event: DetectionEvent,
    script: DeviceScript,
    calls: Arc<Mutex<Vec<DriverCall>>>,
}

impl MockHandler {
    fn record(&self, stage: DriverStage, node: Option<&str>) {
        self.calls.lock().push(DriverCall {
            hwaddr: self.event.hwaddr.clone(),
            stage,
            node: node.map(str::to_string),
        });
    }
}

#[async_trait]
impl HardwareHandler for MockHandler {
    fn family(&self) -> HardwareFamily {
        self.family
    }

    async fn probe(&mut self) -> Result<DetectionEvent, HandlerError> {
        self.record(DriverStage::Probe, None);
        if let Some(delay) = self.script.probe_delay {
            tokio::time::sleep(delay).await;
        }
        if self.script.fail_probe {
            return Err(HandlerError::Unreachable("no response to probe".to_string()));
        }
        let mut enriched = self.event.clone();
        if let Some(cert) = &self.script.certificate {
            enriched.certificate = Some(cert.clone());
        }
        if let Some(uuid) = self.script.uuid {
            enriched.uuid = Some(uuid);
        }
        if let Some(serial) = &self.script.serial {
            enriched.serial = Some(serial.clone());
        }
        if let Some(hwaddr) = &self.script.reported_hwaddr {
            enriched.hwaddr = Some(hwaddr.clone());
        }
        self.event = enriched.clone();
        Ok(enriched)
    }

    async fn preconfig(&mut self) -> Result<(), HandlerError> {
        self.record(DriverStage::Preconfig, None);
        if self.script.fail_preconfig {
            return Err(HandlerError::Protocol("preconfig refused".to_string()));
        }
        Ok(())
    }

    async fn config(&mut self, node: &str) -> Result<(), HandlerError> {
        self.record(DriverStage::Config, Some(node));
        if self.script.fail_config {
            return Err(HandlerError::Rejected("config refused".to_string()));
        }
        Ok(())
    }

    fn discoverable_by_switch(&self) -> bool {
        self.script.discoverable_by_switch
    }

    fn tls_certificate(&self) -> Option<&[u8]> {
        self.script
            .certificate
            .as_deref()
            .or(self.event.certificate.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::InMemoryAttributeStore;

    fn mac() -> HardwareAddress {
        "00:1a:2b:3c:4d:5e".parse().unwrap()
    }

    #[test]
    fn test_manual_time_source_shared_between_clones() {
        let time = ManualTimeSource::new(100);
        let clone = time.clone();
        time.advance(50);
        assert_eq!(clone.now().as_secs(), 150);
        clone.set(10);
        assert_eq!(time.now().as_secs(), 10);
    }

    #[tokio::test]
    async fn test_mock_probe_enriches_event() {
        let factory = MockHandlerFactory::new();
        let uuid = Uuid::from_u128(7);
        factory.script(mac(), DeviceScript::with_certificate(b"cert".to_vec()).uuid(uuid));

        let store: Arc<dyn AttributeStore> = Arc::new(InMemoryAttributeStore::new());
        let mut handler = factory.create(
            HardwareFamily::XClarityController,
            &DetectionEvent::new(mac()),
            store,
        );
        let enriched = handler.probe().await.unwrap();

        assert_eq!(enriched.uuid, Some(uuid));
        assert_eq!(enriched.certificate.as_deref(), Some(&b"cert"[..]));
        assert_eq!(handler.tls_certificate(), Some(&b"cert"[..]));
        assert_eq!(factory.call_count(DriverStage::Probe), 1);
    }

    #[tokio::test]
    async fn test_mock_records_config_target() {
        let factory = MockHandlerFactory::new();
        factory.set_default_script(DeviceScript::default().failing_config());
        let store: Arc<dyn AttributeStore> = Arc::new(InMemoryAttributeStore::new());
        let mut handler =
            factory.create(HardwareFamily::Bmc, &DetectionEvent::new(mac()), store);

        assert!(handler.config("n1").await.is_err());
        assert_eq!(factory.config_calls("n1"), 1);
        assert_eq!(factory.config_calls("n2"), 0);
    }
}
