//! # Discovery Service
//!
//! Application service wiring the state actor, the outbound ports and the
//! notification publisher. Cheap to clone; every dispatched task holds its
//! own clone.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::reconcile::SweepReport;
use crate::adapters::NotificationPublisher;
use crate::config::DiscoveryConfig;
use crate::domain::{
    DetectionEvent, DetectionOutcome, DiscoveredNode, DiscoveryError, DiscoveryNotification,
    DiscoveryResult, DiscoveryStats, DriverStage, FailureKind, Fingerprint,
    FingerprintConfidence, FingerprintRole, HandlerError, HandlerRegistry, HardwareAddress,
    PendingEntry, SweepTrigger, UnknownEntry,
};
use crate::ports::{AttributeStore, DiscoveryApi, HandlerFactory, NodeLocator, TimeSource};
use crate::state::StateHandle;

/// Everything a unit of work needs, shared behind one `Arc`.
pub(crate) struct EngineContext {
    pub(crate) config: DiscoveryConfig,
    pub(crate) registry: HandlerRegistry,
    pub(crate) store: Arc<dyn AttributeStore>,
    pub(crate) locator: Arc<dyn NodeLocator>,
    pub(crate) drivers: Arc<dyn HandlerFactory>,
    pub(crate) time: Arc<dyn TimeSource>,
    pub(crate) state: StateHandle,
    pub(crate) publisher: NotificationPublisher,
}

/// Discovery reconciliation engine.
#[derive(Clone)]
pub struct DiscoveryService {
    pub(crate) ctx: Arc<EngineContext>,
}

impl DiscoveryService {
    /// Create the engine and spawn its state actor.
    ///
    /// Must be called inside a tokio runtime.
    pub fn new(
        config: DiscoveryConfig,
        store: Arc<dyn AttributeStore>,
        locator: Arc<dyn NodeLocator>,
        drivers: Arc<dyn HandlerFactory>,
        time: Arc<dyn TimeSource>,
    ) -> Self {
        let registry = config.handler_registry();
        let publisher = NotificationPublisher::with_capacity(config.notification_capacity);
        info!(
            "[discovery] engine created: {} services registered, recheck every {}s",
            registry.len(),
            config.recheck_interval_secs
        );
        Self {
            ctx: Arc::new(EngineContext {
                config,
                registry,
                store,
                locator,
                drivers,
                time,
                state: StateHandle::spawn(),
                publisher,
            }),
        }
    }

    /// Active configuration.
    pub fn config(&self) -> &DiscoveryConfig {
        &self.ctx.config
    }

    /// Service table in use.
    pub fn registry(&self) -> &HandlerRegistry {
        &self.ctx.registry
    }

    /// Handle to the state actor.
    pub fn state(&self) -> &StateHandle {
        &self.ctx.state
    }

    /// Scanner callback: run intake for `event` as its own task.
    ///
    /// Failures are logged here and never reach the caller.
    pub fn on_detected(&self, event: DetectionEvent) -> JoinHandle<()> {
        let service = self.clone();
        tokio::spawn(async move {
            let hwaddr = event.hwaddr.clone();
            if let Err(e) = service.process_detection(event).await {
                service.log_failure(hwaddr.as_ref(), &e);
            }
        })
    }

    /// Consume a scanner channel until it closes or `shutdown` flips to true.
    pub fn attach_scanner(
        &self,
        mut events: mpsc::Receiver<DetectionEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let service = self.clone();
        tokio::spawn(async move {
            info!("[discovery] scanner attached");
            loop {
                tokio::select! {
                    received = events.recv() => match received {
                        Some(event) => {
                            service.on_detected(event);
                        }
                        None => {
                            info!("[discovery] scanner channel closed");
                            break;
                        }
                    },
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            debug!("[discovery] scanner detached");
        })
    }

    /// Run a driver call under the configured bound.
    ///
    /// Failures and timeouts become [`DiscoveryError::Driver`] /
    /// [`DiscoveryError::DriverTimeout`] and are published as `ProbeFailed`.
    pub(crate) async fn bounded<T, F>(
        &self,
        stage: DriverStage,
        hwaddr: &HardwareAddress,
        call: F,
    ) -> DiscoveryResult<T>
    where
        F: Future<Output = Result<T, HandlerError>>,
    {
        let err = match tokio::time::timeout(self.ctx.config.probe_timeout(), call).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(source)) => DiscoveryError::Driver {
                hwaddr: hwaddr.clone(),
                stage,
                source,
            },
            Err(_) => DiscoveryError::DriverTimeout {
                hwaddr: hwaddr.clone(),
                stage,
                timeout_secs: self.ctx.config.probe_timeout_secs,
            },
        };
        self.ctx.publisher.publish(DiscoveryNotification::ProbeFailed {
            hwaddr: hwaddr.clone(),
            stage,
            error: err.to_string(),
        });
        Err(err)
    }

    /// Log a failure at the boundary of its unit of work.
    pub(crate) fn log_failure(&self, hwaddr: Option<&HardwareAddress>, err: &DiscoveryError) {
        let hwaddr = hwaddr.map(|h| h.to_string()).unwrap_or_else(|| "-".to_string());
        match err.kind() {
            FailureKind::TransientProbeFailure => {
                warn!(hwaddr = %hwaddr, "[discovery] {}", err);
            }
            FailureKind::ValidationError | FailureKind::QuorumUnavailable => {
                warn!(hwaddr = %hwaddr, "[discovery] attribute update failed: {}", err);
            }
            FailureKind::AmbiguousInventory => {
                error!(hwaddr = %hwaddr, "[discovery] inventory fault: {}", err);
            }
            FailureKind::Internal => {
                error!(hwaddr = %hwaddr, "[discovery] unexpected failure: {}", err);
            }
        }
    }
}

#[async_trait]
impl DiscoveryApi for DiscoveryService {
    async fn process_detection(&self, event: DetectionEvent) -> DiscoveryResult<DetectionOutcome> {
        self.intake(event).await
    }

    async fn reconcile(&self, trigger: SweepTrigger) -> DiscoveryResult<SweepReport> {
        self.sweep(trigger).await
    }

    async fn add_validated_fingerprint(
        &self,
        hwaddr: &HardwareAddress,
        role: FingerprintRole,
        fingerprint: Fingerprint,
    ) -> DiscoveryResult<bool> {
        let added = self
            .ctx
            .state
            .add_fingerprint(hwaddr, role, fingerprint, FingerprintConfidence::Validated)
            .await?;
        if added {
            debug!(hwaddr = %hwaddr, "[discovery] validated {:?} fingerprint recorded", role);
        }
        Ok(added)
    }

    async fn discovered_node(
        &self,
        hwaddr: &HardwareAddress,
    ) -> DiscoveryResult<Option<DiscoveredNode>> {
        self.ctx.state.discovered(hwaddr).await
    }

    async fn unknown_entries(&self) -> DiscoveryResult<Vec<UnknownEntry>> {
        self.ctx.state.unknown_snapshot().await
    }

    async fn pending_entries(&self) -> DiscoveryResult<Vec<PendingEntry>> {
        self.ctx.state.pending_snapshot().await
    }

    async fn stats(&self) -> DiscoveryResult<DiscoveryStats> {
        self.ctx.state.stats().await
    }

    fn subscribe(&self) -> broadcast::Receiver<DiscoveryNotification> {
        self.ctx.publisher.subscribe()
    }
}
