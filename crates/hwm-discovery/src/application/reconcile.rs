//! # Reconciliation
//!
//! Re-walks Unknown and Pending so devices blocked on topology data or
//! policy eventually converge. A sweep is started by the periodic timer, by
//! a watched attribute changing, or by the node set changing.
//!
//! Every entry becomes its own task. A failing entry stays where it is and
//! is retried by the next sweep; it never delays the others.

use std::collections::BTreeSet;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::service::DiscoveryService;
use crate::domain::{
    DiscoveryError, DiscoveryNotification, DiscoveryResult, EvaluationOutcome, HardwareFamily,
    PendingEntry, RewalkOutcome, SweepTrigger, UnknownEntry, WATCHED_ATTRIBUTES,
};
use crate::ports::{AttributeChange, NodeSetChange, WatchHandle};

/// What a sweep did. Dispatched tasks keep running if the report is dropped.
#[derive(Debug)]
pub struct SweepReport {
    /// What started the sweep
    pub trigger: SweepTrigger,
    /// False if the store had no quorum and the sweep was skipped
    pub ran: bool,
    /// Entries removed by the eviction policy
    pub evicted: usize,
    /// Entries dispatched for re-evaluation
    pub dispatched: usize,
    /// Entries with no registered driver, left in place
    pub skipped: usize,
    /// Entries already being evaluated by another task
    pub in_flight: usize,
    /// One task per dispatched entry
    pub tasks: Vec<JoinHandle<DiscoveryResult<RewalkOutcome>>>,
}

impl SweepReport {
    fn new(trigger: SweepTrigger) -> Self {
        Self {
            trigger,
            ran: false,
            evicted: 0,
            dispatched: 0,
            skipped: 0,
            in_flight: 0,
            tasks: Vec::new(),
        }
    }

    /// Wait for every dispatched task.
    pub async fn wait(self) -> Vec<DiscoveryResult<RewalkOutcome>> {
        let mut results = Vec::with_capacity(self.tasks.len());
        for task in self.tasks {
            results.push(match task.await {
                Ok(result) => result,
                Err(e) => Err(DiscoveryError::TaskFailed(e.to_string())),
            });
        }
        results
    }
}

impl DiscoveryService {
    pub(crate) async fn sweep(&self, trigger: SweepTrigger) -> DiscoveryResult<SweepReport> {
        let mut report = SweepReport::new(trigger);
        if let Err(e) = self.ctx.store.check_quorum().await {
            warn!("[discovery] skipping {} sweep: {}", trigger, e);
            return Ok(report);
        }
        report.ran = true;

        let evicted = self
            .ctx
            .state
            .evict_expired(self.ctx.time.now(), self.ctx.config.eviction_policy())
            .await?;
        report.evicted = evicted.len();
        for entry in evicted {
            info!("[discovery] evicted {:?}", entry);
            self.ctx
                .publisher
                .publish(DiscoveryNotification::EntryEvicted(entry));
        }

        for entry in self.ctx.state.unknown_snapshot().await? {
            let Some((_, family)) = self.ctx.registry.resolve(&entry.event.services) else {
                report.skipped += 1;
                continue;
            };
            let Some(lease) = self.ctx.state.try_lease(&entry.hwaddr).await? else {
                report.in_flight += 1;
                continue;
            };
            let service = self.clone();
            report.tasks.push(tokio::spawn(async move {
                let _lease = lease;
                let hwaddr = entry.hwaddr.clone();
                let result = service.rewalk_unknown(entry, family).await;
                if let Err(e) = &result {
                    service.log_failure(Some(&hwaddr), e);
                }
                result
            }));
            report.dispatched += 1;
        }

        for entry in self.ctx.state.pending_snapshot().await? {
            let Some((_, family)) = self.ctx.registry.resolve(&entry.event.services) else {
                report.skipped += 1;
                continue;
            };
            let Some(hwaddr) = entry.hwaddr().cloned() else {
                report.skipped += 1;
                continue;
            };
            let Some(lease) = self.ctx.state.try_lease(&hwaddr).await? else {
                report.in_flight += 1;
                continue;
            };
            let service = self.clone();
            report.tasks.push(tokio::spawn(async move {
                let _lease = lease;
                let result = service.rewalk_pending(entry, family).await;
                if let Err(e) = &result {
                    service.log_failure(Some(&hwaddr), e);
                }
                result
            }));
            report.dispatched += 1;
        }

        debug!(
            "[discovery] {} sweep: dispatched={} skipped={} in_flight={} evicted={}",
            trigger, report.dispatched, report.skipped, report.in_flight, report.evicted
        );
        Ok(report)
    }

    async fn rewalk_unknown(
        &self,
        entry: UnknownEntry,
        family: HardwareFamily,
    ) -> DiscoveryResult<RewalkOutcome> {
        let Some(node) = self.ctx.locator.find_node_by_hwaddr(&entry.hwaddr).await? else {
            return Ok(RewalkOutcome::Unresolved);
        };
        debug!(hwaddr = %entry.hwaddr, node = %node, "[discovery] unknown device located");

        let mut handler = self
            .ctx
            .drivers
            .create(family, &entry.event, self.ctx.store.clone());
        let outcome = self.evaluate(handler.as_mut(), &entry.event, &node).await?;
        if outcome == EvaluationOutcome::NotApplicable {
            self.ctx.state.remove_unknown(&entry.hwaddr).await?;
        }
        Ok(RewalkOutcome::Evaluated(outcome))
    }

    async fn rewalk_pending(
        &self,
        entry: PendingEntry,
        family: HardwareFamily,
    ) -> DiscoveryResult<RewalkOutcome> {
        let mut handler = self
            .ctx
            .drivers
            .create(family, &entry.event, self.ctx.store.clone());
        let outcome = self
            .evaluate(handler.as_mut(), &entry.event, &entry.located_node)
            .await?;
        if outcome == EvaluationOutcome::NotApplicable {
            self.ctx.state.remove_pending(&entry.node).await?;
        }
        Ok(RewalkOutcome::Evaluated(outcome))
    }

    /// Drop Pending entries of deleted nodes and publish the evictions.
    pub async fn forget_nodes(&self, removed: BTreeSet<String>) -> DiscoveryResult<usize> {
        if removed.is_empty() {
            return Ok(0);
        }
        let dropped = self.ctx.state.drop_pending_for(removed).await?;
        let count = dropped.len();
        for entry in dropped {
            info!("[discovery] node deleted, dropped {:?}", entry);
            self.ctx
                .publisher
                .publish(DiscoveryNotification::EntryEvicted(entry));
        }
        Ok(count)
    }
}

/// Drives sweeps from the timer and from store notifications.
///
/// Owns the attribute watch; on node-set changes a new watch over the new
/// node set is registered before the old one is removed.
pub struct ReconciliationLoop {
    service: DiscoveryService,
    shutdown: watch::Receiver<bool>,
    watch: Option<WatchHandle>,
}

impl ReconciliationLoop {
    /// Spawn the loop. It stops when `shutdown` becomes true or its sender drops.
    pub fn spawn(service: DiscoveryService, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let reconciler = Self {
            service,
            shutdown,
            watch: None,
        };
        tokio::spawn(reconciler.run())
    }

    async fn run(mut self) {
        let (attr_tx, mut attr_rx) = mpsc::unbounded_channel::<AttributeChange>();
        let (nodes_tx, mut nodes_rx) = mpsc::unbounded_channel::<NodeSetChange>();

        self.rewatch(&attr_tx).await;
        if let Err(e) = self.service.ctx.store.watch_node_collection(nodes_tx).await {
            warn!("[discovery] node collection watch failed: {}", e);
        }

        let period = self.service.ctx.config.recheck_interval();
        let mut timer = interval_at(Instant::now() + period, period);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            "[discovery] reconciliation loop started, interval {}s",
            period.as_secs()
        );

        loop {
            tokio::select! {
                _ = timer.tick() => {
                    self.sweep(SweepTrigger::Timer).await;
                }
                Some(change) = attr_rx.recv() => {
                    debug!(
                        node = %change.node,
                        "[discovery] watched attribute {} changed",
                        change.attribute
                    );
                    while attr_rx.try_recv().is_ok() {}
                    self.sweep(SweepTrigger::AttributeChange).await;
                }
                Some(change) = nodes_rx.recv() => {
                    let mut removed = change.removed;
                    while let Ok(more) = nodes_rx.try_recv() {
                        removed.extend(more.removed);
                    }
                    if let Err(e) = self.service.forget_nodes(removed).await {
                        warn!("[discovery] failed to drop pending entries: {}", e);
                    }
                    self.rewatch(&attr_tx).await;
                    self.sweep(SweepTrigger::NodeSetChange).await;
                }
                changed = self.shutdown.changed() => {
                    if changed.is_err() || *self.shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        if let Some(handle) = self.watch.take() {
            let _ = self.service.ctx.store.remove_watcher(handle).await;
        }
        info!("[discovery] reconciliation loop stopped");
    }

    /// Watch the current node set, then drop the previous watch.
    async fn rewatch(&mut self, sink: &mpsc::UnboundedSender<AttributeChange>) {
        let store = &self.service.ctx.store;
        let nodes = match store.list_nodes().await {
            Ok(nodes) => nodes,
            Err(e) => {
                warn!("[discovery] cannot list nodes for attribute watch: {}", e);
                return;
            }
        };
        let handle = match store
            .watch_attributes(&nodes, &WATCHED_ATTRIBUTES, sink.clone())
            .await
        {
            Ok(handle) => handle,
            Err(e) => {
                warn!("[discovery] attribute watch failed: {}", e);
                return;
            }
        };
        if let Some(old) = self.watch.replace(handle) {
            if let Err(e) = store.remove_watcher(old).await {
                warn!("[discovery] failed to remove previous watch: {}", e);
            }
        }
        debug!("[discovery] watching {} nodes", nodes.len());
    }

    async fn sweep(&self, trigger: SweepTrigger) {
        match self.service.sweep(trigger).await {
            Ok(report) => {
                if report.dispatched > 0 {
                    debug!(
                        "[discovery] {} sweep dispatched {} entries",
                        trigger, report.dispatched
                    );
                }
            }
            Err(e) => warn!("[discovery] {} sweep failed: {}", trigger, e),
        }
    }
}
