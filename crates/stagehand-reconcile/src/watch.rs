//! Orchestrator watch consumer.
//!
//! Pulls delta batches from the orchestrator and folds them into the state
//! store. Units entering `error` produce [`UnitRetry`] events; machines that
//! receive a concrete instance id get exactly one bare-metal watcher. A
//! tracked machine the provisioner could not allocate fails the run.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, trace, warn};

use stagehand_core::{WorkloadStatus, is_top_level_machine};
use stagehand_orchestrator::status::PENDING_INSTANCE;
use stagehand_orchestrator::{ApplicationDelta, ChangeKind, Delta, Entity, MachineDelta, Orchestrator, UnitDelta};
use stagehand_provisioner::{BareMetalWatcher, FailureEvent, Provisioner};
use stagehand_state::{ClaimOutcome, StateStore, Unit};

use crate::error::{ReconcileError, ReconcileResult};
use crate::events::UnitRetry;
use crate::supervisor::Supervisor;

/// What to do with one delta.
#[derive(Debug, PartialEq)]
pub enum Action<'a> {
    Unit(&'a UnitDelta),
    Machine(&'a MachineDelta),
    Application(&'a ApplicationDelta),
    /// Removals and other change kinds are not acted on.
    Ignore,
}

/// Dispatch a delta by entity kind. Only `change` deltas are routed.
pub fn route(delta: &Delta) -> Action<'_> {
    if delta.change != ChangeKind::Change {
        return Action::Ignore;
    }
    match &delta.entity {
        Entity::Unit(unit) => Action::Unit(unit),
        Entity::Machine(machine) => Action::Machine(machine),
        Entity::Application(application) => Action::Application(application),
    }
}

/// Starts bare-metal watchers inside the task group.
#[derive(Clone)]
pub struct WatcherSpawner {
    provisioner: Arc<dyn Provisioner>,
    failures: mpsc::UnboundedSender<FailureEvent>,
    supervisor: Supervisor,
    interval: Duration,
}

impl WatcherSpawner {
    pub fn new(
        provisioner: Arc<dyn Provisioner>,
        failures: mpsc::UnboundedSender<FailureEvent>,
        supervisor: Supervisor,
    ) -> Self {
        Self {
            provisioner,
            failures,
            supervisor,
            interval: Duration::from_secs(5),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn spawn(&self, instance_id: &str) {
        let watcher = BareMetalWatcher::new(self.provisioner.clone(), self.failures.clone())
            .with_interval(self.interval);
        let instance_id = instance_id.to_string();
        self.supervisor
            .spawn(format!("bare-metal watcher {instance_id}"), async move {
                watcher.watch(&instance_id).await?;
                Ok(())
            });
    }
}

pub struct WatchConsumer {
    store: StateStore,
    orchestrator: Arc<dyn Orchestrator>,
    watchers: WatcherSpawner,
    retries: mpsc::UnboundedSender<UnitRetry>,
    token: String,
    hosts: Option<watch::Sender<()>>,
}

impl WatchConsumer {
    pub fn new(
        store: StateStore,
        orchestrator: Arc<dyn Orchestrator>,
        watchers: WatcherSpawner,
        retries: mpsc::UnboundedSender<UnitRetry>,
        token: &str,
    ) -> Self {
        Self {
            store,
            orchestrator,
            watchers,
            retries,
            token: token.to_string(),
            hosts: None,
        }
    }

    /// Signal `requests` after every batch that touched a unit. The
    /// receiving end is a [`HostsFile::run`](crate::hosts::HostsFile::run) task.
    pub fn with_hosts_refresh(mut self, requests: watch::Sender<()>) -> Self {
        self.hosts = Some(requests);
        self
    }

    /// Consume the delta stream until it fails or the task is cancelled.
    pub async fn run(self) -> ReconcileResult<()> {
        let mut stream = self.orchestrator.watch().await?;
        info!(token = %self.token, "watching orchestrator deltas");
        loop {
            let batch = stream.next_batch().await?;
            self.process_batch(&batch).await?;
        }
    }

    /// Apply one batch of deltas in order. Fails when a tracked machine
    /// reports an allocation error.
    pub async fn process_batch(&self, batch: &[Delta]) -> ReconcileResult<()> {
        let mut units_seen = false;
        for delta in batch {
            match route(delta) {
                Action::Unit(unit) => units_seen |= self.observe_unit(unit),
                Action::Machine(machine) => self.observe_machine(machine).await?,
                Action::Application(application) => {
                    debug!(application = %application.name, "application changed");
                }
                Action::Ignore => trace!(?delta, "delta ignored"),
            }
        }

        if units_seen {
            if let Some(hosts) = &self.hosts {
                hosts.send_replace(());
            }
        }
        Ok(())
    }

    /// Fold a unit delta into the cache. Returns false when the unit does
    /// not belong to this deployment.
    fn observe_unit(&self, delta: &UnitDelta) -> bool {
        if !delta.application.contains(&self.token) {
            return false;
        }
        if self.store.is_retired_unit(&delta.name) {
            trace!(unit = %delta.name, "unit of a replaced machine, ignored");
            return false;
        }

        let current = WorkloadStatus::parse(&delta.workload);
        let event = self.store.update_unit(&delta.name, |slot| {
            let entering_error = current.is_error() && !slot.as_ref().is_some_and(|u| u.status.is_error());
            let unit = slot.get_or_insert_with(|| {
                Unit::new(&delta.name, &delta.application, &delta.machine_id, current.clone())
            });
            if unit.status != current {
                debug!(unit = %delta.name, from = %unit.status, to = %current, "unit status changed");
            }
            unit.status = current.clone();
            unit.message = delta.message.clone();
            unit.machine_id = delta.machine_id.clone();

            entering_error.then(|| {
                unit.retries += 1;
                UnitRetry {
                    unit: unit.name.clone(),
                    retries: unit.retries,
                    message: unit.message.clone(),
                }
            })
        });

        if let Some(event) = event {
            info!(unit = %event.unit, retries = event.retries, message = %event.message, "unit entered error");
            if self.retries.send(event).is_err() {
                warn!(unit = %delta.name, "unit retry queue closed");
            }
        }

        if is_top_level_machine(&delta.machine_id) {
            self.store
                .record_affinity(&delta.machine_id, &delta.application, &delta.name);
        }
        true
    }

    async fn observe_machine(&self, delta: &MachineDelta) -> ReconcileResult<()> {
        if !delta.error.is_empty() {
            return match self.store.get_machine(&delta.id) {
                Some(machine) if machine.is_tracked() => {
                    error!(machine_id = %delta.id, error = %delta.error, "machine allocation failed");
                    Err(ReconcileError::AllocationFailed {
                        series: delta.series.clone(),
                        reason: format!("machine {}: {}", delta.id, delta.error),
                    })
                }
                _ => {
                    debug!(machine_id = %delta.id, error = %delta.error, "untracked machine failed allocation");
                    Ok(())
                }
            };
        }
        if delta.instance_id.is_empty() || delta.instance_id == PENDING_INSTANCE {
            trace!(machine_id = %delta.id, "machine has no instance yet");
            return Ok(());
        }

        self.reconcile_deleted().await;

        match self
            .store
            .claim_for_watch(&delta.id, &delta.instance_id, &delta.series)
        {
            ClaimOutcome::Claimed(machine) => {
                info!(
                    machine_id = %machine.machine_id,
                    instance_id = %delta.instance_id,
                    applications = ?machine.applications,
                    "starting bare-metal watcher"
                );
                self.watchers.spawn(&delta.instance_id);
            }
            ClaimOutcome::Deleted => {
                debug!(machine_id = %delta.id, instance_id = %delta.instance_id, "instance is cycling out, not watched");
            }
            ClaimOutcome::AlreadyAnalyzed => {
                trace!(machine_id = %delta.id, "machine already watched");
            }
            ClaimOutcome::Untracked => {
                trace!(machine_id = %delta.id, "machine not part of this deployment");
            }
        }
        Ok(())
    }

    /// Drop deleted instance ids that no longer appear in live status.
    async fn reconcile_deleted(&self) {
        if self.store.deleted_instances().is_empty() {
            return;
        }
        match self.orchestrator.status(None).await {
            Ok(status) => {
                let gone = self.store.reconcile_deleted(&status.live_instance_ids());
                if !gone.is_empty() {
                    debug!(instances = ?gone, "deleted instances gone from status");
                }
            }
            Err(e) => warn!(error = %e, "status query failed, deleted set not reconciled"),
        }
    }
}
