//! Table-driven identity locator.
//!
//! Stands in for switch/MAC correlation: bindings are added as topology data
//! becomes available, so an address can be unresolved on one sweep and
//! resolved on the next.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::domain::{DiscoveryResult, HardwareAddress};
use crate::ports::NodeLocator;

/// Mutable `hwaddr -> node` table.
#[derive(Debug, Default)]
pub struct StaticNodeLocator {
    bindings: RwLock<HashMap<HardwareAddress, String>>,
}

impl StaticNodeLocator {
    /// Empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Map `hwaddr` to `node`, replacing any earlier binding.
    pub fn bind(&self, hwaddr: HardwareAddress, node: impl Into<String>) {
        self.bindings.write().insert(hwaddr, node.into());
    }

    /// Forget a binding.
    pub fn unbind(&self, hwaddr: &HardwareAddress) -> Option<String> {
        self.bindings.write().remove(hwaddr)
    }
}

#[async_trait]
impl NodeLocator for StaticNodeLocator {
    async fn find_node_by_hwaddr(&self, hwaddr: &HardwareAddress) -> DiscoveryResult<Option<String>> {
        Ok(self.bindings.read().get(hwaddr).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bind_and_unbind() {
        let locator = StaticNodeLocator::new();
        let mac: HardwareAddress = "00:1a:2b:3c:4d:5e".parse().unwrap();
        assert_eq!(locator.find_node_by_hwaddr(&mac).await.unwrap(), None);

        locator.bind(mac.clone(), "n1");
        assert_eq!(
            locator.find_node_by_hwaddr(&mac).await.unwrap().as_deref(),
            Some("n1")
        );

        assert_eq!(locator.unbind(&mac).as_deref(), Some("n1"));
        assert_eq!(locator.find_node_by_hwaddr(&mac).await.unwrap(), None);
    }
}
