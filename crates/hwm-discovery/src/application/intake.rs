//! # Detection Intake
//!
//! Raw detection → dedup → driver selection → probe → identity resolution.
//!
//! ```text
//! event ─> hwaddr? ─> registered service? ─> first sighting? ─> probe
//!                                                                 │
//!                          locator: node? ── yes ─> evaluate      │
//!                                    └────── no ──> Unknown  <────┘
//! ```
//!
//! An intake that fails after admission forgets the address, so the next
//! announcement of the device starts over.

use tracing::{debug, info, warn};

use super::service::DiscoveryService;
use crate::domain::{
    DetectionEvent, DetectionOutcome, DiscoveredNode, DiscoveryResult, DriverStage,
    HardwareAddress, HardwareFamily, UnknownEntry,
};

impl DiscoveryService {
    pub(crate) async fn intake(&self, event: DetectionEvent) -> DiscoveryResult<DetectionOutcome> {
        let Some(hwaddr) = event.hwaddr.clone() else {
            debug!("[discovery] ignoring detection without hardware address");
            return Ok(DetectionOutcome::MissingHardwareAddress);
        };
        let Some((service, family)) = self.ctx.registry.resolve(&event.services) else {
            debug!(hwaddr = %hwaddr, "[discovery] no driver for announced services");
            return Ok(DetectionOutcome::Unsupported);
        };
        if !self.ctx.state.admit_if_new(&hwaddr).await? {
            debug!(hwaddr = %hwaddr, "[discovery] duplicate announcement");
            return Ok(DetectionOutcome::Duplicate);
        }
        debug!(hwaddr = %hwaddr, service = %service, "[discovery] admitted {} device", family);

        let result = self.probe_and_route(&hwaddr, family, event).await;
        if result.is_err() {
            if let Err(e) = self.ctx.state.forget(&hwaddr) {
                warn!(hwaddr = %hwaddr, "[discovery] could not forget failed address: {}", e);
            }
        }
        result
    }

    async fn probe_and_route(
        &self,
        hwaddr: &HardwareAddress,
        family: HardwareFamily,
        event: DetectionEvent,
    ) -> DiscoveryResult<DetectionOutcome> {
        let Some(_lease) = self.ctx.state.try_lease(hwaddr).await? else {
            debug!(hwaddr = %hwaddr, "[discovery] evaluation already in flight, skipping");
            return Ok(DetectionOutcome::InFlight);
        };

        let mut handler = self
            .ctx
            .drivers
            .create(family, &event, self.ctx.store.clone());
        let mut enriched = self
            .bounded(DriverStage::Probe, hwaddr, handler.probe())
            .await?;
        // Later stages key on the admitted address, whatever the driver reports.
        enriched.hwaddr = Some(hwaddr.clone());
        self.ctx
            .state
            .record_discovered(DiscoveredNode::from_event(&enriched))?;

        match self.ctx.locator.find_node_by_hwaddr(hwaddr).await? {
            Some(node) => {
                let outcome = self.evaluate(handler.as_mut(), &enriched, &node).await?;
                Ok(DetectionOutcome::Evaluated(outcome))
            }
            None => {
                self.ctx.state.store_unknown(UnknownEntry {
                    hwaddr: hwaddr.clone(),
                    event: enriched,
                    since: self.ctx.time.now(),
                })?;
                info!(hwaddr = %hwaddr, "[discovery] no node identity yet, parked as unknown");
                Ok(DetectionOutcome::Unresolved)
            }
        }
    }
}
