//! Recovery orchestrator: replaces machines that failed deployment.
//!
//! # Protocol
//!
//! ```text
//! CorrelatedFailure
//!   ├── bump the replacement counter of every hosted application
//!   │     attempt = max over those counters
//!   ├── attempt > budget → MachineRetriesExhausted (fatal)
//!   └── otherwise
//!         ├── add_machine(series, tags)        None or error is fatal
//!         ├── add_unit(app, new) per app       best-effort
//!         ├── retire old machine (instance id → deleted set)
//!         ├── drop stale unit records
//!         └── destroy_machines([old], force)   best-effort
//! ```

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, error, info, warn};

use stagehand_orchestrator::{Constraints, Orchestrator};
use stagehand_state::{MachineId, StateStore};

use crate::error::{ReconcileError, ReconcileResult};
use crate::events::CorrelatedFailure;

/// Where an (application, machine) pair is in the replacement protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ReplacementPhase {
    Healthy,
    /// Budget consumed, replacement in progress.
    Replacing,
    Replaced,
    /// Budget exceeded; the deployment is failing.
    Exhausted,
}

#[derive(Clone)]
pub struct RecoveryOrchestrator {
    store: StateStore,
    orchestrator: Arc<dyn Orchestrator>,
    max_retries: u32,
    phases: Arc<Mutex<HashMap<(String, MachineId), ReplacementPhase>>>,
}

impl RecoveryOrchestrator {
    pub fn new(store: StateStore, orchestrator: Arc<dyn Orchestrator>, max_retries: u32) -> Self {
        Self {
            store,
            orchestrator,
            max_retries,
            phases: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Current phase of `application` on `machine_id`.
    pub fn phase(&self, application: &str, machine_id: &str) -> ReplacementPhase {
        self.phases
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(application.to_string(), machine_id.to_string()))
            .copied()
            .unwrap_or(ReplacementPhase::Healthy)
    }

    fn set_phase(&self, failure: &CorrelatedFailure, phase: ReplacementPhase) {
        let mut phases = self.phases.lock().unwrap_or_else(PoisonError::into_inner);
        for app in &failure.machine.applications {
            phases.insert((app.clone(), failure.machine.machine_id.clone()), phase);
        }
    }

    /// Replace the failed machine. Returns the new machine id.
    pub async fn recover(&self, failure: &CorrelatedFailure) -> ReconcileResult<MachineId> {
        let machine = &failure.machine;
        let attempt = self.store.bump_app_retries(&machine.applications);

        if attempt > self.max_retries {
            self.set_phase(failure, ReplacementPhase::Exhausted);
            error!(
                instance_id = %failure.instance_id,
                status = %failure.status,
                attempt,
                budget = self.max_retries,
                "machine replacement budget exhausted"
            );
            return Err(ReconcileError::MachineRetriesExhausted {
                instance_id: failure.instance_id.clone(),
                status: failure.status,
                attempt,
            });
        }

        self.set_phase(failure, ReplacementPhase::Replacing);
        info!(
            machine_id = %machine.machine_id,
            instance_id = %failure.instance_id,
            attempt,
            applications = ?machine.applications,
            "replacing failed machine"
        );

        let constraints = Constraints::with_tags(machine.tags.iter().cloned());
        let new_machine = match self.orchestrator.add_machine(&machine.series, &constraints).await {
            Ok(Some(id)) => id,
            Ok(None) => {
                return Err(ReconcileError::AllocationFailed {
                    series: machine.series.clone(),
                    reason: "orchestrator returned no machine".to_string(),
                });
            }
            Err(e) => {
                return Err(ReconcileError::AllocationFailed {
                    series: machine.series.clone(),
                    reason: e.to_string(),
                });
            }
        };
        debug!(%new_machine, "replacement machine allocated");

        for app in &machine.applications {
            if let Err(e) = self.orchestrator.add_unit(app, &new_machine).await {
                warn!(application = %app, %new_machine, error = %e, "failed to add unit on replacement machine");
            }
        }

        // Retire before dropping units so no delta in between can bring
        // the old placement back.
        let mut stale: BTreeSet<String> = machine.units.clone();
        if let Some(retired) = self.store.retire_machine(&machine.machine_id) {
            stale.extend(retired.units);
        }
        let dropped = self.store.delete_units(&stale);
        debug!(machine_id = %machine.machine_id, dropped, "stale units dropped");

        let old = [machine.machine_id.clone()];
        if let Err(e) = self.orchestrator.destroy_machines(&old, true).await {
            warn!(machine_id = %machine.machine_id, error = %e, "failed to destroy machine");
        }

        self.set_phase(failure, ReplacementPhase::Replaced);
        info!(
            old_machine = %machine.machine_id,
            %new_machine,
            "machine replaced"
        );
        Ok(new_machine)
    }
}
