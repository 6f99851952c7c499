//! Property tests over arbitrary announcement streams.

use std::collections::BTreeSet;
use std::sync::Arc;

use hwm_discovery::domain::{SERVICE_ENCLOSURE_MANAGER, SERVICE_XCLARITY_CONTROLLER};
use hwm_discovery::test_utils::{DeviceScript, FixedTimeSource, MockHandlerFactory};
use hwm_discovery::{
    DetectionEvent, DiscoveryApi, DiscoveryConfig, DiscoveryService, DriverStage,
    HardwareAddress, InMemoryAttributeStore, StaticNodeLocator,
};
use proptest::prelude::*;

fn mac(last: u8) -> HardwareAddress {
    format!("a4:bf:01:00:00:{last:02x}").parse().unwrap()
}

fn announcement(last: u8, service: &str) -> DetectionEvent {
    DetectionEvent::new(mac(last)).with_service(service)
}

fn run<F: std::future::Future>(fut: F) -> F::Output {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
        .block_on(fut)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// However often and in whatever order devices are announced, each
    /// supported address is probed exactly once.
    #[test]
    fn prop_each_address_probed_once(
        stream in proptest::collection::vec((0u8..8, 0usize..3), 1..48),
    ) {
        let services = [
            SERVICE_XCLARITY_CONTROLLER,
            SERVICE_ENCLOSURE_MANAGER,
            "service:unsupported",
        ];
        let (probes, unknown) = run(async {
            let drivers = Arc::new(MockHandlerFactory::new());
            drivers.set_default_script(DeviceScript::with_certificate(b"cert".to_vec()));
            let service = DiscoveryService::new(
                DiscoveryConfig::for_testing(),
                Arc::new(InMemoryAttributeStore::new()),
                Arc::new(StaticNodeLocator::new()),
                drivers.clone(),
                Arc::new(FixedTimeSource::new(0)),
            );
            let tasks: Vec<_> = stream
                .iter()
                .map(|(last, svc)| service.on_detected(announcement(*last, services[*svc])))
                .collect();
            for task in tasks {
                task.await.unwrap();
            }
            let unknown = service.unknown_entries().await.unwrap().len();
            (drivers.call_count(DriverStage::Probe), unknown)
        });

        // The first supported announcement of an address admits it.
        let supported: BTreeSet<u8> = stream
            .iter()
            .filter(|(_, svc)| *svc < 2)
            .map(|(last, _)| *last)
            .collect();
        prop_assert_eq!(probes, supported.len());
        prop_assert_eq!(unknown, supported.len());
    }
}
