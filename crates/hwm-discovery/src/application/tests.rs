use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use uuid::Uuid;

use super::DiscoveryService;
use crate::adapters::{InMemoryAttributeStore, StaticNodeLocator};
use crate::config::DiscoveryConfig;
use crate::domain::{
    DecisionReason, DetectionEvent, DetectionOutcome, DiscoveryError, DiscoveryNotification,
    DriverStage, EvaluationOutcome, FailureKind, Fingerprint, FingerprintConfidence,
    FingerprintRole, HardwareAddress, HardwareFamily, SweepTrigger, ATTR_DISCOVERY_POLICY, ATTR_TLS_FINGERPRINT,
    ATTR_UUID, SERVICE_XCLARITY_CONTROLLER,
};
use crate::ports::{DiscoveryApi, HandlerFactory};
use crate::test_utils::{DeviceScript, ManualTimeSource, MockHandlerFactory};

const CERT: &[u8] = b"xcc certificate";

struct Harness {
    service: DiscoveryService,
    store: Arc<InMemoryAttributeStore>,
    locator: Arc<StaticNodeLocator>,
    drivers: Arc<MockHandlerFactory>,
}

fn harness() -> Harness {
    let store = Arc::new(InMemoryAttributeStore::with_nodes(["n1", "n2"]));
    let locator = Arc::new(StaticNodeLocator::new());
    let drivers = Arc::new(MockHandlerFactory::new());
    drivers.set_default_script(DeviceScript::with_certificate(CERT));
    let service = DiscoveryService::new(
        DiscoveryConfig::for_testing(),
        store.clone(),
        locator.clone(),
        drivers.clone(),
        Arc::new(ManualTimeSource::new(1_000)),
    );
    Harness {
        service,
        store,
        locator,
        drivers,
    }
}

fn mac(last: u8) -> HardwareAddress {
    format!("40:f2:e9:00:00:{last:02x}").parse().unwrap()
}

fn xcc(hwaddr: HardwareAddress) -> DetectionEvent {
    DetectionEvent::new(hwaddr).with_service(SERVICE_XCLARITY_CONTROLLER)
}

fn drain(rx: &mut broadcast::Receiver<DiscoveryNotification>) -> Vec<DiscoveryNotification> {
    let mut seen = Vec::new();
    while let Ok(n) = rx.try_recv() {
        seen.push(n);
    }
    seen
}

#[tokio::test]
async fn test_missing_hwaddr_discarded() {
    let h = harness();
    let event = DetectionEvent::default().with_service(SERVICE_XCLARITY_CONTROLLER);

    let outcome = h.service.process_detection(event).await.unwrap();

    assert_eq!(outcome, DetectionOutcome::MissingHardwareAddress);
    assert!(h.drivers.calls().is_empty());
}

#[tokio::test]
async fn test_unsupported_service_ignored() {
    let h = harness();
    let event = DetectionEvent::new(mac(1)).with_service("service:printer");

    let outcome = h.service.process_detection(event).await.unwrap();

    assert_eq!(outcome, DetectionOutcome::Unsupported);
    assert!(h.drivers.calls().is_empty());
    assert_eq!(h.service.stats().await.unwrap().known, 0);
}

#[tokio::test]
async fn test_duplicate_announcement_probed_once() {
    let h = harness();

    let first = h.service.process_detection(xcc(mac(1))).await.unwrap();
    let second = h.service.process_detection(xcc(mac(1))).await.unwrap();

    assert_eq!(first, DetectionOutcome::Unresolved);
    assert_eq!(second, DetectionOutcome::Duplicate);
    assert_eq!(h.drivers.call_count(DriverStage::Probe), 1);
}

#[tokio::test]
async fn test_unlocated_device_parked_as_unknown() {
    let h = harness();

    h.service.process_detection(xcc(mac(1))).await.unwrap();

    let unknown = h.service.unknown_entries().await.unwrap();
    assert_eq!(unknown.len(), 1);
    assert_eq!(unknown[0].hwaddr, mac(1));
    assert_eq!(unknown[0].since.as_secs(), 1_000);
    assert_eq!(unknown[0].event.certificate.as_deref(), Some(CERT));
}

#[tokio::test]
async fn test_open_policy_configures_and_persists_identity() {
    let h = harness();
    let uuid = Uuid::from_u128(0x42);
    h.drivers
        .script(mac(1), DeviceScript::with_certificate(CERT).uuid(uuid));
    h.store.set_attribute("n1", ATTR_DISCOVERY_POLICY, "open").unwrap();
    h.locator.bind(mac(1), "n1");
    let mut rx = h.service.subscribe();

    let outcome = h.service.process_detection(xcc(mac(1))).await.unwrap();

    assert_eq!(
        outcome,
        DetectionOutcome::Evaluated(EvaluationOutcome::Configured {
            node: "n1".to_string()
        })
    );
    assert_eq!(
        h.store.attribute("n1", ATTR_TLS_FINGERPRINT),
        Some(Fingerprint::of_certificate(CERT).to_string())
    );
    assert_eq!(h.store.attribute("n1", ATTR_UUID), Some(uuid.to_string()));
    assert_eq!(h.store.write_count(), 1);
    assert_eq!(h.drivers.config_calls("n1"), 1);

    let record = h.service.discovered_node(&mac(1)).await.unwrap().unwrap();
    let manager = record.fingerprint(FingerprintRole::Manager).unwrap();
    assert_eq!(manager.confidence, FingerprintConfidence::Trusted);

    assert_eq!(
        drain(&mut rx),
        vec![DiscoveryNotification::NodeConfigured {
            node: "n1".to_string(),
            hwaddr: mac(1),
        }]
    );
}

#[tokio::test]
async fn test_certificate_less_device_configured_with_uuid_only() {
    let h = harness();
    let uuid = Uuid::from_u128(0x77);
    let script = DeviceScript {
        uuid: Some(uuid),
        discoverable_by_switch: true,
        ..DeviceScript::default()
    };
    h.drivers.script(mac(1), script);
    h.store.set_attribute("n1", ATTR_DISCOVERY_POLICY, "open").unwrap();
    h.locator.bind(mac(1), "n1");

    let outcome = h.service.process_detection(xcc(mac(1))).await.unwrap();

    assert_eq!(
        outcome,
        DetectionOutcome::Evaluated(EvaluationOutcome::Configured {
            node: "n1".to_string()
        })
    );
    assert_eq!(h.store.attribute("n1", ATTR_UUID), Some(uuid.to_string()));
    assert_eq!(h.store.attribute("n1", ATTR_TLS_FINGERPRINT), None);
    assert_eq!(h.store.write_count(), 1);
    assert_eq!(h.drivers.config_calls("n1"), 1);
    let record = h.service.discovered_node(&mac(1)).await.unwrap().unwrap();
    assert!(record.fingerprint(FingerprintRole::Manager).is_none());

    // Same device again: the recorded UUID already matches.
    let event = xcc(mac(1)).with_uuid(uuid);
    let mut handler =
        h.drivers
            .create(HardwareFamily::XClarityController, &event, h.store.clone());
    let again = h
        .service
        .evaluate(handler.as_mut(), &event, "n1")
        .await
        .unwrap();

    assert_eq!(
        again,
        EvaluationOutcome::AlreadyTrusted {
            node: "n1".to_string()
        }
    );
    assert_eq!(h.store.write_count(), 1);
    assert_eq!(h.drivers.config_calls("n1"), 1);
}

#[tokio::test]
async fn test_policy_trust_does_not_override_validated_fingerprint() {
    let h = harness();
    h.store.set_attribute("n1", ATTR_DISCOVERY_POLICY, "open").unwrap();
    h.service.process_detection(xcc(mac(1))).await.unwrap();

    let validated = Fingerprint::of_certificate(b"validated out of band");
    let added = h
        .service
        .add_validated_fingerprint(&mac(1), FingerprintRole::Manager, validated.clone())
        .await
        .unwrap();
    assert!(added);

    h.locator.bind(mac(1), "n1");
    let report = h.service.reconcile(SweepTrigger::Manual).await.unwrap();
    let results = report.wait().await;
    assert_eq!(results.len(), 1);
    assert!(results[0].is_ok());

    assert_eq!(
        h.store.attribute("n1", ATTR_TLS_FINGERPRINT),
        Some(Fingerprint::of_certificate(CERT).to_string())
    );
    let record = h.service.discovered_node(&mac(1)).await.unwrap().unwrap();
    let manager = record.fingerprint(FingerprintRole::Manager).unwrap();
    assert_eq!(manager.fingerprint, validated);
    assert_eq!(manager.confidence, FingerprintConfidence::Validated);
}

#[tokio::test]
async fn test_announcement_during_held_lease_is_skipped() {
    let h = harness();
    let lease = h.service.state().try_lease(&mac(1)).await.unwrap();
    assert!(lease.is_some());

    let outcome = h.service.process_detection(xcc(mac(1))).await.unwrap();

    assert_eq!(outcome, DetectionOutcome::InFlight);
    assert_eq!(h.drivers.call_count(DriverStage::Probe), 0);
    assert!(h.service.unknown_entries().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_driver_answer_keeps_admitted_address() {
    let h = harness();
    h.drivers.script(
        mac(1),
        DeviceScript::with_certificate(CERT).reporting_hwaddr(mac(9)),
    );

    h.service.process_detection(xcc(mac(1))).await.unwrap();

    let unknown = h.service.unknown_entries().await.unwrap();
    assert_eq!(unknown.len(), 1);
    assert_eq!(unknown[0].hwaddr, mac(1));
    assert_eq!(unknown[0].event.hwaddr, Some(mac(1)));
    assert!(h.service.discovered_node(&mac(1)).await.unwrap().is_some());
    assert!(h.service.discovered_node(&mac(9)).await.unwrap().is_none());
}

#[tokio::test]
async fn test_secure_policy_parks_node_pending() {
    let h = harness();
    h.store.set_attribute("n1", ATTR_DISCOVERY_POLICY, "secure").unwrap();
    h.locator.bind(mac(1), "n1");

    let outcome = h.service.process_detection(xcc(mac(1))).await.unwrap();

    assert_eq!(
        outcome,
        DetectionOutcome::Evaluated(EvaluationOutcome::Pending {
            node: "n1".to_string(),
            reason: DecisionReason::StrictPolicy,
        })
    );
    assert_eq!(h.store.write_count(), 0);
    assert_eq!(h.drivers.config_calls("n1"), 0);
    let pending = h.service.pending_entries().await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].node, "n1");
    assert_eq!(pending[0].located_node, "n1");
}

#[tokio::test]
async fn test_probe_failure_forgets_address() {
    let h = harness();
    h.drivers
        .script(mac(1), DeviceScript::with_certificate(CERT).failing_probe());
    let mut rx = h.service.subscribe();

    let err = h.service.process_detection(xcc(mac(1))).await.unwrap_err();
    assert_eq!(err.kind(), FailureKind::TransientProbeFailure);
    assert!(matches!(
        drain(&mut rx).as_slice(),
        [DiscoveryNotification::ProbeFailed {
            stage: DriverStage::Probe,
            ..
        }]
    ));

    h.drivers.script(mac(1), DeviceScript::with_certificate(CERT));
    let retry = h.service.process_detection(xcc(mac(1))).await.unwrap();
    assert_eq!(retry, DetectionOutcome::Unresolved);
    assert_eq!(h.drivers.call_count(DriverStage::Probe), 2);
}

#[tokio::test(start_paused = true)]
async fn test_slow_probe_times_out() {
    let h = harness();
    h.drivers.script(
        mac(1),
        DeviceScript::with_certificate(CERT).probe_delay(Duration::from_secs(60)),
    );

    let err = h.service.process_detection(xcc(mac(1))).await.unwrap_err();

    assert!(matches!(
        err,
        DiscoveryError::DriverTimeout {
            stage: DriverStage::Probe,
            timeout_secs: 5,
            ..
        }
    ));
    assert_eq!(h.service.stats().await.unwrap().known, 0);
}

#[tokio::test]
async fn test_device_not_switch_discoverable_is_not_applicable() {
    let h = harness();
    h.drivers.script(
        mac(1),
        DeviceScript::with_certificate(CERT).not_switch_discoverable(),
    );
    h.store.set_attribute("n1", ATTR_DISCOVERY_POLICY, "open").unwrap();
    h.locator.bind(mac(1), "n1");

    let outcome = h.service.process_detection(xcc(mac(1))).await.unwrap();

    assert_eq!(
        outcome,
        DetectionOutcome::Evaluated(EvaluationOutcome::NotApplicable)
    );
    assert_eq!(h.drivers.call_count(DriverStage::Preconfig), 1);
    assert_eq!(h.store.write_count(), 0);
}

#[tokio::test]
async fn test_add_validated_fingerprint() {
    let h = harness();
    let fp = Fingerprint::of_certificate(b"system certificate");

    let before = h
        .service
        .add_validated_fingerprint(&mac(1), FingerprintRole::System, fp.clone())
        .await
        .unwrap();
    assert!(!before);

    h.service.process_detection(xcc(mac(1))).await.unwrap();
    let added = h
        .service
        .add_validated_fingerprint(&mac(1), FingerprintRole::System, fp.clone())
        .await
        .unwrap();
    assert!(added);

    let record = h.service.discovered_node(&mac(1)).await.unwrap().unwrap();
    let system = record.fingerprint(FingerprintRole::System).unwrap();
    assert_eq!(system.fingerprint, fp);
    assert_eq!(system.confidence, FingerprintConfidence::Validated);
}

#[tokio::test]
async fn test_sweep_skipped_without_quorum() {
    let h = harness();
    h.service.process_detection(xcc(mac(1))).await.unwrap();
    h.locator.bind(mac(1), "n1");
    h.store.set_quorum(false);

    let report = h.service.reconcile(SweepTrigger::Manual).await.unwrap();

    assert!(!report.ran);
    assert_eq!(report.dispatched, 0);
    assert_eq!(h.service.unknown_entries().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_on_detected_contains_failures() {
    let h = harness();
    h.drivers
        .script(mac(1), DeviceScript::with_certificate(CERT).failing_probe());

    h.service.on_detected(xcc(mac(1))).await.unwrap();

    assert_eq!(h.service.stats().await.unwrap().known, 0);
}
