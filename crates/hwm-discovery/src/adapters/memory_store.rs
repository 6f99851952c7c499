//! # In-Memory Attribute Store
//!
//! Reference [`AttributeStore`] for single-process deployments and tests.
//! Validates the attributes the engine writes, tracks quorum as a switch,
//! and delivers change notifications after the write lock is released.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::mpsc::UnboundedSender;
use tracing::debug;

use crate::domain::{
    AttributeFilter, Fingerprint, StoreError, ATTR_DISCOVERY_POLICY, ATTR_TLS_FINGERPRINT,
};
use crate::ports::{AttributeChange, AttributeStore, NodeAttributes, NodeSetChange, WatchHandle};

struct Watcher {
    nodes: BTreeSet<String>,
    keys: Vec<String>,
    sink: UnboundedSender<AttributeChange>,
}

impl Watcher {
    fn covers(&self, node: &str, key: &str) -> bool {
        self.nodes.contains(node) && self.keys.iter().any(|k| k == key)
    }
}

struct Inner {
    nodes: BTreeMap<String, HashMap<String, String>>,
    watchers: HashMap<u64, Watcher>,
    collection_watchers: Vec<UnboundedSender<NodeSetChange>>,
    next_watch: u64,
    quorum: bool,
}

/// Pending notifications collected under the lock, sent after it is dropped.
#[derive(Default)]
struct Outbox {
    attributes: Vec<(UnboundedSender<AttributeChange>, AttributeChange)>,
    collection: Vec<(UnboundedSender<NodeSetChange>, NodeSetChange)>,
}

impl Outbox {
    fn deliver(self) {
        // Closed sinks belong to watchers that went away; skip them.
        for (sink, change) in self.attributes {
            let _ = sink.send(change);
        }
        for (sink, change) in self.collection {
            let _ = sink.send(change);
        }
    }
}

impl Inner {
    fn changed(&self, outbox: &mut Outbox, node: &str, key: &str) {
        for watcher in self.watchers.values().filter(|w| w.covers(node, key)) {
            outbox.attributes.push((
                watcher.sink.clone(),
                AttributeChange {
                    node: node.to_string(),
                    attribute: key.to_string(),
                },
            ));
        }
    }

    fn collection_changed(&self, outbox: &mut Outbox, change: NodeSetChange) {
        for sink in &self.collection_watchers {
            outbox.collection.push((sink.clone(), change.clone()));
        }
    }

    /// Write one value; empty clears. Returns whether anything changed.
    fn put(&mut self, outbox: &mut Outbox, node: &str, key: &str, value: String) -> bool {
        let Some(attrs) = self.nodes.get_mut(node) else {
            return false;
        };
        let changed = if value.is_empty() {
            attrs.remove(key).is_some()
        } else {
            attrs.insert(key.to_string(), value.clone()) != Some(value)
        };
        if changed {
            self.changed(outbox, node, key);
        }
        changed
    }
}

fn validate(key: &str, value: &str) -> Result<(), StoreError> {
    let reject = |reason: String| StoreError::Validation {
        key: key.to_string(),
        reason,
    };
    match key {
        ATTR_DISCOVERY_POLICY => match value {
            "" | "open" | "permissive" | "secure" | "manual" => Ok(()),
            other => Err(reject(format!("unsupported policy {other:?}"))),
        },
        ATTR_TLS_FINGERPRINT if !value.is_empty() => value
            .parse::<Fingerprint>()
            .map(|_| ())
            .map_err(|e| reject(e.to_string())),
        _ => Ok(()),
    }
}

/// Attribute store held in process memory.
pub struct InMemoryAttributeStore {
    inner: RwLock<Inner>,
    writes: AtomicU64,
}

impl Default for InMemoryAttributeStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryAttributeStore {
    /// Empty store with quorum.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                nodes: BTreeMap::new(),
                watchers: HashMap::new(),
                collection_watchers: Vec::new(),
                next_watch: 1,
                quorum: true,
            }),
            writes: AtomicU64::new(0),
        }
    }

    /// Store pre-populated with nodes.
    pub fn with_nodes<I, S>(nodes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let store = Self::new();
        {
            let mut inner = store.inner.write();
            for node in nodes {
                inner.nodes.insert(node.into(), HashMap::new());
            }
        }
        store
    }

    /// Define a node. Returns false if it already exists.
    pub fn add_node(&self, node: impl Into<String>) -> bool {
        let node = node.into();
        let mut outbox = Outbox::default();
        {
            let mut inner = self.inner.write();
            if inner.nodes.contains_key(&node) {
                return false;
            }
            inner.nodes.insert(node.clone(), HashMap::new());
            let change = NodeSetChange {
                added: [node].into(),
                removed: BTreeSet::new(),
            };
            inner.collection_changed(&mut outbox, change);
        }
        outbox.deliver();
        true
    }

    /// Delete a node. Returns false if it did not exist.
    pub fn remove_node(&self, node: &str) -> bool {
        let mut outbox = Outbox::default();
        {
            let mut inner = self.inner.write();
            if inner.nodes.remove(node).is_none() {
                return false;
            }
            let change = NodeSetChange {
                added: BTreeSet::new(),
                removed: [node.to_string()].into(),
            };
            inner.collection_changed(&mut outbox, change);
        }
        outbox.deliver();
        true
    }

    /// Operator write of a single attribute. Empty value clears it.
    pub fn set_attribute(
        &self,
        node: &str,
        key: &str,
        value: impl Into<String>,
    ) -> Result<(), StoreError> {
        let value = value.into();
        validate(key, &value)?;
        let mut outbox = Outbox::default();
        {
            let mut inner = self.inner.write();
            if !inner.nodes.contains_key(node) {
                return Err(StoreError::UnknownNode(node.to_string()));
            }
            inner.put(&mut outbox, node, key, value);
        }
        outbox.deliver();
        Ok(())
    }

    /// Operator action clearing attributes, e.g. a trusted fingerprint.
    pub fn clear_node_attributes(&self, node: &str, keys: &[&str]) -> Result<(), StoreError> {
        let mut outbox = Outbox::default();
        {
            let mut inner = self.inner.write();
            if !inner.nodes.contains_key(node) {
                return Err(StoreError::UnknownNode(node.to_string()));
            }
            for key in keys {
                inner.put(&mut outbox, node, key, String::new());
            }
        }
        outbox.deliver();
        Ok(())
    }

    /// Current value of one attribute.
    pub fn attribute(&self, node: &str, key: &str) -> Option<String> {
        self.inner
            .read()
            .nodes
            .get(node)
            .and_then(|attrs| attrs.get(key).cloned())
    }

    /// Toggle writability.
    pub fn set_quorum(&self, available: bool) {
        self.inner.write().quorum = available;
    }

    /// Accepted `set_node_attributes` batches so far.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    /// Registered attribute watches.
    pub fn watcher_count(&self) -> usize {
        self.inner.read().watchers.len()
    }
}

#[async_trait]
impl AttributeStore for InMemoryAttributeStore {
    async fn list_nodes(&self) -> Result<BTreeSet<String>, StoreError> {
        Ok(self.inner.read().nodes.keys().cloned().collect())
    }

    async fn get_node_attributes(
        &self,
        nodes: &[String],
        keys: &[&str],
    ) -> Result<NodeAttributes, StoreError> {
        let inner = self.inner.read();
        let mut result = NodeAttributes::new();
        for node in nodes {
            let Some(attrs) = inner.nodes.get(node) else {
                continue;
            };
            let selected: HashMap<String, String> = keys
                .iter()
                .filter_map(|k| attrs.get(*k).map(|v| (k.to_string(), v.clone())))
                .collect();
            result.insert(node.clone(), selected);
        }
        Ok(result)
    }

    async fn set_node_attributes(&self, updates: NodeAttributes) -> Result<(), StoreError> {
        for attrs in updates.values() {
            for (key, value) in attrs {
                validate(key, value)?;
            }
        }
        let mut outbox = Outbox::default();
        {
            let mut inner = self.inner.write();
            if !inner.quorum {
                return Err(StoreError::QuorumUnavailable);
            }
            if let Some(missing) = updates.keys().find(|n| !inner.nodes.contains_key(*n)) {
                return Err(StoreError::UnknownNode(missing.clone()));
            }
            for (node, attrs) in updates {
                for (key, value) in attrs {
                    inner.put(&mut outbox, &node, &key, value);
                }
            }
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        outbox.deliver();
        Ok(())
    }

    async fn filter_nodes(
        &self,
        filter: &AttributeFilter,
        base: Option<&BTreeSet<String>>,
    ) -> Result<BTreeSet<String>, StoreError> {
        let inner = self.inner.read();
        Ok(inner
            .nodes
            .iter()
            .filter(|(node, _)| base.map_or(true, |b| b.contains(*node)))
            .filter(|(_, attrs)| filter.matches(attrs.get(&filter.key)))
            .map(|(node, _)| node.clone())
            .collect())
    }

    async fn watch_attributes(
        &self,
        nodes: &BTreeSet<String>,
        keys: &[&str],
        sink: UnboundedSender<AttributeChange>,
    ) -> Result<WatchHandle, StoreError> {
        let mut inner = self.inner.write();
        let id = inner.next_watch;
        inner.next_watch += 1;
        inner.watchers.insert(
            id,
            Watcher {
                nodes: nodes.clone(),
                keys: keys.iter().map(|k| k.to_string()).collect(),
                sink,
            },
        );
        debug!("[discovery] store watch {} registered over {} nodes", id, nodes.len());
        Ok(WatchHandle::new(id))
    }

    async fn remove_watcher(&self, handle: WatchHandle) -> Result<(), StoreError> {
        self.inner.write().watchers.remove(&handle.id());
        Ok(())
    }

    async fn watch_node_collection(
        &self,
        sink: UnboundedSender<NodeSetChange>,
    ) -> Result<(), StoreError> {
        self.inner.write().collection_watchers.push(sink);
        Ok(())
    }

    async fn check_quorum(&self) -> Result<(), StoreError> {
        if self.inner.read().quorum {
            Ok(())
        } else {
            Err(StoreError::QuorumUnavailable)
        }
    }
}
