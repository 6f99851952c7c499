//! # Policy Gate
//!
//! Trust-and-configure for one node. Reads policy, stored fingerprint and
//! stored UUID, decides with [`decide`], and on apply pushes configuration
//! and persists identity attributes in one batch. A device without a
//! certificate gets a UUID-only batch.

use std::collections::HashMap;

use tracing::{debug, info};
use uuid::Uuid;

use super::service::DiscoveryService;
use crate::domain::{
    decide, DetectionEvent, DiscoveryNotification, DiscoveryPolicy, DiscoveryResult,
    DriverStage, Fingerprint, FingerprintConfidence, FingerprintRole, PolicyDecision,
    ATTR_DISCOVERY_POLICY, ATTR_TLS_FINGERPRINT, ATTR_UUID,
};
use crate::ports::{HardwareHandler, NodeAttributes};

impl DiscoveryService {
    /// Decide whether to configure `node` from `event`, and do it if so.
    ///
    /// Returns the decision; `apply == true` means configuration was pushed
    /// and attributes written. A declined decision performs no writes.
    /// Repeating the call on an unchanged node and device declines with
    /// `AlreadyTrusted`.
    pub async fn discover_node(
        &self,
        handler: &mut dyn HardwareHandler,
        event: &DetectionEvent,
        node: &str,
    ) -> DiscoveryResult<PolicyDecision> {
        let hwaddr = event.require_hwaddr()?.clone();
        let attrs = self
            .ctx
            .store
            .get_node_attributes(
                &[node.to_string()],
                &[ATTR_DISCOVERY_POLICY, ATTR_TLS_FINGERPRINT, ATTR_UUID],
            )
            .await?;
        let node_attrs = attrs.get(node);
        let policy = DiscoveryPolicy::from_attribute(
            node_attrs
                .and_then(|a| a.get(ATTR_DISCOVERY_POLICY))
                .map(String::as_str),
        );
        let stored = node_attrs
            .and_then(|a| a.get(ATTR_TLS_FINGERPRINT))
            .map(String::as_str);
        let uuid_recorded = event.uuid.map_or(false, |uuid| {
            node_attrs
                .and_then(|a| a.get(ATTR_UUID))
                .and_then(|s| s.trim().parse::<Uuid>().ok())
                == Some(uuid)
        });
        let certificate = handler.tls_certificate().map(<[u8]>::to_vec);

        let decision = decide(policy, stored, certificate.as_deref(), uuid_recorded);
        if !decision.apply {
            debug!(
                hwaddr = %hwaddr,
                node = node,
                policy = %policy,
                "[discovery] not configuring: {}",
                decision.reason
            );
            return Ok(decision);
        }

        self.ctx.store.check_quorum().await?;
        self.bounded(DriverStage::Config, &hwaddr, handler.config(node))
            .await?;

        let fingerprint = certificate.as_deref().map(Fingerprint::of_certificate);
        let mut values = HashMap::new();
        if let Some(uuid) = event.uuid {
            values.insert(ATTR_UUID.to_string(), uuid.to_string());
        }
        if let Some(fp) = &fingerprint {
            values.insert(ATTR_TLS_FINGERPRINT.to_string(), fp.to_string());
        }
        if !values.is_empty() {
            let mut updates = NodeAttributes::new();
            updates.insert(node.to_string(), values);
            self.ctx.store.set_node_attributes(updates).await?;
        }

        self.ctx.state.remove_unknown(&hwaddr).await?;
        self.ctx.state.remove_pending(node).await?;
        if let Some(fp) = fingerprint {
            self.ctx
                .state
                .add_fingerprint(
                    &hwaddr,
                    FingerprintRole::Manager,
                    fp,
                    FingerprintConfidence::Trusted,
                )
                .await?;
        }

        info!(
            hwaddr = %hwaddr,
            node = node,
            policy = %policy,
            "[discovery] configured ({})",
            decision.reason
        );
        self.ctx
            .publisher
            .publish(DiscoveryNotification::NodeConfigured {
                node: node.to_string(),
                hwaddr,
            });
        Ok(decision)
    }
}
