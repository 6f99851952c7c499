//! # Handler Registry
//!
//! Service identifier to hardware family lookup. Built once at startup and
//! shared read-only afterwards.

use std::collections::HashMap;

use super::value_objects::HardwareFamily;

/// Service announced by enclosure managers.
pub const SERVICE_ENCLOSURE_MANAGER: &str = "service:lenovo-smm";

/// Service announced by XClarity controllers.
pub const SERVICE_XCLARITY_CONTROLLER: &str =
    "service:management-hardware.Lenovo:lenovo-xclarity-controller";

/// Explicit registration table of supported services.
#[derive(Debug, Clone, Default)]
pub struct HandlerRegistry {
    families: HashMap<String, HardwareFamily>,
}

impl HandlerRegistry {
    /// Empty registry; every device is unsupported.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in service table.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(SERVICE_ENCLOSURE_MANAGER, HardwareFamily::EnclosureManager);
        registry.register(
            SERVICE_XCLARITY_CONTROLLER,
            HardwareFamily::XClarityController,
        );
        registry
    }

    /// Add or replace a registration.
    pub fn register(&mut self, service: impl Into<String>, family: HardwareFamily) {
        self.families.insert(service.into(), family);
    }

    /// Family registered for exactly `service`.
    pub fn family_for(&self, service: &str) -> Option<HardwareFamily> {
        self.families.get(service).copied()
    }

    /// First announced service, in announcement order, that has a driver.
    ///
    /// `None` means the device is unsupported; callers ignore it silently.
    pub fn resolve(&self, services: &[String]) -> Option<(String, HardwareFamily)> {
        services
            .iter()
            .find_map(|s| self.family_for(s).map(|family| (s.clone(), family)))
    }

    /// Number of registered services.
    pub fn len(&self) -> usize {
        self.families.len()
    }

    /// Whether nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.families.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_registered_service_wins() {
        let registry = HandlerRegistry::with_defaults();
        let services = vec![
            "service:printer".to_string(),
            SERVICE_XCLARITY_CONTROLLER.to_string(),
            SERVICE_ENCLOSURE_MANAGER.to_string(),
        ];
        let (service, family) = registry.resolve(&services).unwrap();
        assert_eq!(service, SERVICE_XCLARITY_CONTROLLER);
        assert_eq!(family, HardwareFamily::XClarityController);
    }

    #[test]
    fn test_unsupported_device() {
        let registry = HandlerRegistry::with_defaults();
        assert!(registry.resolve(&["service:printer".to_string()]).is_none());
        assert!(registry.resolve(&[]).is_none());
    }

    #[test]
    fn test_custom_registration() {
        let mut registry = HandlerRegistry::new();
        assert!(registry.is_empty());
        registry.register("service:ipmi", HardwareFamily::Bmc);
        assert_eq!(registry.family_for("service:ipmi"), Some(HardwareFamily::Bmc));
        assert_eq!(registry.len(), 1);
    }
}
