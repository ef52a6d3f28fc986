//! Failure event consumer.

use tokio::sync::mpsc;
use tracing::{debug, warn};

use stagehand_provisioner::FailureEvent;
use stagehand_state::StateStore;

use crate::error::ReconcileResult;
use crate::events::CorrelatedFailure;
use crate::recovery::RecoveryOrchestrator;

/// Resolve a failure event against the machine cache.
///
/// `None` when either the instance id or its machine id is unknown, which
/// happens for stale or duplicate events after a replacement.
pub fn correlate(store: &StateStore, event: &FailureEvent) -> Option<CorrelatedFailure> {
    let machine_id = store.machine_id_for_instance(&event.instance_id)?;
    let machine = store.get_machine(&machine_id)?;
    Some(CorrelatedFailure {
        instance_id: event.instance_id.clone(),
        system_id: event.system_id.clone(),
        status: event.status,
        machine,
    })
}

/// Drains failure events into the recovery orchestrator.
pub struct FailureConsumer {
    store: StateStore,
    recovery: RecoveryOrchestrator,
    events: mpsc::UnboundedReceiver<FailureEvent>,
}

impl FailureConsumer {
    pub fn new(
        store: StateStore,
        recovery: RecoveryOrchestrator,
        events: mpsc::UnboundedReceiver<FailureEvent>,
    ) -> Self {
        Self {
            store,
            recovery,
            events,
        }
    }

    /// Run until the queue closes or recovery fails fatally.
    pub async fn run(mut self) -> ReconcileResult<()> {
        while let Some(event) = self.events.recv().await {
            match correlate(&self.store, &event) {
                Some(failure) => {
                    self.recovery.recover(&failure).await?;
                }
                None => warn!(
                    instance_id = %event.instance_id,
                    status = %event.status,
                    "failure event matches no tracked machine, discarded"
                ),
            }
        }
        debug!("failure queue closed");
        Ok(())
    }
}
