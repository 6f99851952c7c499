//! # Outbound Ports
//!
//! Traits for the collaborators the engine drives: the attribute store, the
//! identity locator, hardware-family drivers and the clock.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc::UnboundedSender;

use crate::domain::{
    AttributeFilter, DetectionEvent, DiscoveryResult, HandlerError, HardwareAddress,
    HardwareFamily, StoreError, Timestamp,
};

/// `node -> (attribute -> value)`.
pub type NodeAttributes = HashMap<String, HashMap<String, String>>;

/// Registration returned by [`AttributeStore::watch_attributes`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WatchHandle(u64);

impl WatchHandle {
    /// Wrap a store-assigned identifier.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Store-assigned identifier.
    pub fn id(&self) -> u64 {
        self.0
    }
}

/// A watched attribute changed on a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeChange {
    /// Node whose attribute changed
    pub node: String,
    /// Attribute name
    pub attribute: String,
}

/// Nodes were added to or removed from the inventory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeSetChange {
    /// Newly defined nodes
    pub added: BTreeSet<String>,
    /// Deleted nodes
    pub removed: BTreeSet<String>,
}

/// Configuration/attribute store - outbound port.
///
/// Persistence, quorum and expression expansion live behind this trait.
/// Change notifications are delivered on the supplied channels.
#[async_trait]
pub trait AttributeStore: Send + Sync {
    /// All defined nodes.
    async fn list_nodes(&self) -> Result<BTreeSet<String>, StoreError>;

    /// Values of `keys` for each of `nodes`. Unset attributes are omitted.
    async fn get_node_attributes(
        &self,
        nodes: &[String],
        keys: &[&str],
    ) -> Result<NodeAttributes, StoreError>;

    /// Write a batch of attributes. Fails as a whole on any invalid value.
    async fn set_node_attributes(&self, updates: NodeAttributes) -> Result<(), StoreError>;

    /// Nodes matching `filter`, restricted to `base` when given.
    async fn filter_nodes(
        &self,
        filter: &AttributeFilter,
        base: Option<&BTreeSet<String>>,
    ) -> Result<BTreeSet<String>, StoreError>;

    /// Deliver a change on `sink` whenever one of `keys` changes on one of `nodes`.
    async fn watch_attributes(
        &self,
        nodes: &BTreeSet<String>,
        keys: &[&str],
        sink: UnboundedSender<AttributeChange>,
    ) -> Result<WatchHandle, StoreError>;

    /// Cancel a watch.
    async fn remove_watcher(&self, handle: WatchHandle) -> Result<(), StoreError>;

    /// Deliver node additions and removals on `sink`.
    async fn watch_node_collection(
        &self,
        sink: UnboundedSender<NodeSetChange>,
    ) -> Result<(), StoreError>;

    /// Fails with [`StoreError::QuorumUnavailable`] when writes would be refused.
    async fn check_quorum(&self) -> Result<(), StoreError>;
}

/// Network-to-node identity mapping (switch/MAC correlation) - outbound port.
#[async_trait]
pub trait NodeLocator: Send + Sync {
    /// Node cabled to the port where `hwaddr` was seen, if known yet.
    async fn find_node_by_hwaddr(&self, hwaddr: &HardwareAddress) -> DiscoveryResult<Option<String>>;
}

/// Hardware-family driver for one device.
///
/// Constructed per unit of work from a detection event; holds no state
/// beyond that event and whatever `probe` learned.
#[async_trait]
pub trait HardwareHandler: Send + Sync {
    /// Family this driver speaks.
    fn family(&self) -> HardwareFamily;

    /// Interrogate the device and return the enriched event.
    async fn probe(&mut self) -> Result<DetectionEvent, HandlerError>;

    /// Family-specific prerequisite setup, run before every evaluation.
    async fn preconfig(&mut self) -> Result<(), HandlerError>;

    /// Push baseline configuration for `node`.
    async fn config(&mut self, node: &str) -> Result<(), HandlerError>;

    /// Whether switch correlation is an acceptable identity source.
    fn discoverable_by_switch(&self) -> bool;

    /// DER certificate currently presented by the device.
    fn tls_certificate(&self) -> Option<&[u8]>;
}

/// Builds drivers - outbound port.
pub trait HandlerFactory: Send + Sync {
    /// Driver for `family` over `event`.
    fn create(
        &self,
        family: HardwareFamily,
        event: &DetectionEvent,
        store: Arc<dyn AttributeStore>,
    ) -> Box<dyn HardwareHandler>;
}

/// Clock - outbound port.
pub trait TimeSource: Send + Sync {
    /// Current time.
    fn now(&self) -> Timestamp;
}
