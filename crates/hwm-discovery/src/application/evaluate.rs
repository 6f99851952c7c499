//! # Evaluation
//!
//! Preconfig, enclosure bay resolution and the hand-off to the policy gate.

use tracing::{debug, error, info};

use super::service::DiscoveryService;
use crate::domain::{
    invariant_single_enclosure_candidate, AttributeFilter, DecisionReason, DetectionEvent,
    DiscoveryNotification, DiscoveryResult, DriverStage, EvaluationOutcome, PendingEntry,
    ATTR_ENCLOSURE_BAY, ATTR_ENCLOSURE_MANAGER,
};
use crate::ports::HardwareHandler;

impl DiscoveryService {
    /// Evaluate a located device.
    ///
    /// `node` is what the locator returned. For a device in an enclosure bay
    /// that is the enclosure manager, and the bay's node is looked up from
    /// inventory. Otherwise the device must be switch-discoverable to be
    /// considered for configuration at all.
    pub async fn evaluate(
        &self,
        handler: &mut dyn HardwareHandler,
        event: &DetectionEvent,
        node: &str,
    ) -> DiscoveryResult<EvaluationOutcome> {
        let hwaddr = event.require_hwaddr()?.clone();
        self.bounded(DriverStage::Preconfig, &hwaddr, handler.preconfig())
            .await?;

        if let Some(bay) = &event.enclosure_bay {
            let target = self.resolve_enclosure_bay(node, bay).await?;
            debug!(hwaddr = %hwaddr, "[discovery] bay {} of {} is {}", bay, node, target);
            return self.apply_or_defer(handler, event, &target, node).await;
        }
        if handler.discoverable_by_switch() {
            return self.apply_or_defer(handler, event, node, node).await;
        }

        debug!(
            hwaddr = %hwaddr,
            node = node,
            "[discovery] identity not authorized for configuration"
        );
        Ok(EvaluationOutcome::NotApplicable)
    }

    /// The single node whose `enclosure.manager` is `manager` and whose
    /// `enclosure.bay` is `bay`.
    async fn resolve_enclosure_bay(&self, manager: &str, bay: &str) -> DiscoveryResult<String> {
        let managed = self
            .ctx
            .store
            .filter_nodes(&AttributeFilter::equals(ATTR_ENCLOSURE_MANAGER, manager), None)
            .await?;
        let candidates = self
            .ctx
            .store
            .filter_nodes(&AttributeFilter::equals(ATTR_ENCLOSURE_BAY, bay), Some(&managed))
            .await?;

        let candidates: Vec<String> = candidates.into_iter().collect();
        if candidates.len() != 1 {
            error!(
                "[discovery] enclosure {} bay {} matched {} nodes {:?}",
                manager,
                bay,
                candidates.len(),
                candidates
            );
            self.ctx.publisher.publish(DiscoveryNotification::InventoryFault {
                manager: manager.to_string(),
                bay: bay.to_string(),
                candidates: candidates.clone(),
            });
        }
        invariant_single_enclosure_candidate(manager, bay, candidates)
    }

    /// Run the policy gate for `node`; park the device in Pending on decline.
    async fn apply_or_defer(
        &self,
        handler: &mut dyn HardwareHandler,
        event: &DetectionEvent,
        node: &str,
        located_node: &str,
    ) -> DiscoveryResult<EvaluationOutcome> {
        let hwaddr = event.require_hwaddr()?.clone();
        let decision = self.discover_node(handler, event, node).await?;
        if decision.apply {
            return Ok(EvaluationOutcome::Configured {
                node: node.to_string(),
            });
        }

        if decision.reason == DecisionReason::AlreadyTrusted {
            self.ctx.state.remove_unknown(&hwaddr).await?;
            self.ctx.state.remove_pending(node).await?;
            return Ok(EvaluationOutcome::AlreadyTrusted {
                node: node.to_string(),
            });
        }

        let newly_pending = self
            .ctx
            .state
            .store_pending(PendingEntry {
                node: node.to_string(),
                located_node: located_node.to_string(),
                event: event.clone(),
                since: self.ctx.time.now(),
            })
            .await?;
        if newly_pending {
            info!(
                hwaddr = %hwaddr,
                node = node,
                "[discovery] pending: {}",
                decision.reason
            );
            self.ctx.publisher.publish(DiscoveryNotification::NodePending {
                node: node.to_string(),
                hwaddr,
                reason: decision.reason,
            });
        }
        Ok(EvaluationOutcome::Pending {
            node: node.to_string(),
            reason: decision.reason,
        })
    }
}
