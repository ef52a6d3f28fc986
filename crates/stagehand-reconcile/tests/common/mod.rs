//! In-process orchestrator and provisioner doubles.

#![allow(dead_code)]

use std::collections::HashMap;
use std::future::Future;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::mpsc;

use stagehand_core::BoxFuture;
use stagehand_orchestrator::{
    Constraints, Delta, DeltaStream, Entity, MachineDelta, Orchestrator, OrchestratorError, OrchestratorResult,
    StatusSnapshot, UnitDelta,
};
use stagehand_provisioner::{NodeStatus, Provisioner, ProvisionerError, ProvisionerResult};

// ── Orchestrator ───────────────────────────────────────────────────

struct OrchestratorState {
    calls: Vec<String>,
    status: StatusSnapshot,
    next_machine: u32,
    failing: Vec<String>,
    allocate: bool,
    stuck: bool,
    addresses: HashMap<String, String>,
    hanging: Vec<String>,
}

/// Records every mutating call as a string and serves scripted deltas.
pub struct MockOrchestrator {
    state: Mutex<OrchestratorState>,
    batches_tx: mpsc::UnboundedSender<Vec<Delta>>,
    batches_rx: Mutex<Option<mpsc::UnboundedReceiver<Vec<Delta>>>>,
}

impl Default for MockOrchestrator {
    fn default() -> Self {
        let (batches_tx, batches_rx) = mpsc::unbounded_channel();
        Self {
            state: Mutex::new(OrchestratorState {
                calls: Vec::new(),
                status: StatusSnapshot::default(),
                next_machine: 100,
                failing: Vec::new(),
                allocate: true,
                stuck: false,
                addresses: HashMap::new(),
                hanging: Vec::new(),
            }),
            batches_tx,
            batches_rx: Mutex::new(Some(batches_rx)),
        }
    }
}

impl MockOrchestrator {
    /// `add_machine` accepts the request but returns no machine.
    pub fn without_allocation(self) -> Self {
        self.state.lock().unwrap().allocate = false;
        self
    }

    /// Calls whose rendering starts with `prefix` return an error.
    pub fn failing(self, prefix: &str) -> Self {
        self.state.lock().unwrap().failing.push(prefix.to_string());
        self
    }

    /// Destroyed machines never leave the status.
    pub fn with_stuck_machines(self) -> Self {
        self.state.lock().unwrap().stuck = true;
        self
    }

    pub fn with_status(self, status: StatusSnapshot) -> Self {
        self.state.lock().unwrap().status = status;
        self
    }

    pub fn with_address(self, unit: &str, address: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .addresses
            .insert(unit.to_string(), address.to_string());
        self
    }

    /// Address lookups for `unit` never complete.
    pub fn with_hanging_address(self, unit: &str) -> Self {
        self.state.lock().unwrap().hanging.push(unit.to_string());
        self
    }

    pub fn set_status(&self, status: StatusSnapshot) {
        self.state.lock().unwrap().status = status;
    }

    /// Queue a batch on the delta stream.
    pub fn push(&self, batch: Vec<Delta>) {
        self.batches_tx.send(batch).unwrap();
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn calls_starting_with(&self, prefix: &str) -> usize {
        self.calls().iter().filter(|c| c.starts_with(prefix)).count()
    }

    fn record(&self, call: String) -> OrchestratorResult<()> {
        let mut state = self.state.lock().unwrap();
        let fails = state.failing.iter().any(|p| call.starts_with(p.as_str()));
        state.calls.push(call.clone());
        if fails {
            return Err(OrchestratorError::Command {
                command: call,
                code: Some(1),
                stderr: "mock failure".to_string(),
            });
        }
        Ok(())
    }
}

struct MockStream {
    rx: mpsc::UnboundedReceiver<Vec<Delta>>,
}

impl DeltaStream for MockStream {
    fn next_batch(&mut self) -> BoxFuture<'_, OrchestratorResult<Vec<Delta>>> {
        Box::pin(async move {
            match self.rx.recv().await {
                Some(batch) => Ok(batch),
                // Idle forever once the test stops feeding.
                None => std::future::pending().await,
            }
        })
    }
}

impl Orchestrator for MockOrchestrator {
    fn watch(&self) -> BoxFuture<'_, OrchestratorResult<Box<dyn DeltaStream>>> {
        Box::pin(async move {
            let rx = self
                .batches_rx
                .lock()
                .unwrap()
                .take()
                .ok_or(OrchestratorError::StreamClosed)?;
            let stream: Box<dyn DeltaStream> = Box::new(MockStream { rx });
            Ok(stream)
        })
    }

    fn status<'a>(&'a self, _filter: Option<&'a str>) -> BoxFuture<'a, OrchestratorResult<StatusSnapshot>> {
        Box::pin(async move { Ok(self.state.lock().unwrap().status.clone()) })
    }

    fn add_machine<'a>(
        &'a self,
        series: &'a str,
        constraints: &'a Constraints,
    ) -> BoxFuture<'a, OrchestratorResult<Option<String>>> {
        Box::pin(async move {
            let call = format!("add_machine {series} {}", constraints.to_juju());
            self.record(call.trim_end().to_string())?;
            let mut state = self.state.lock().unwrap();
            if !state.allocate {
                return Ok(None);
            }
            let id = state.next_machine;
            state.next_machine += 1;
            Ok(Some(id.to_string()))
        })
    }

    fn add_unit<'a>(&'a self, application: &'a str, machine_id: &'a str) -> BoxFuture<'a, OrchestratorResult<()>> {
        Box::pin(async move { self.record(format!("add_unit {application} {machine_id}")) })
    }

    fn destroy_machines<'a>(&'a self, machine_ids: &'a [String], force: bool) -> BoxFuture<'a, OrchestratorResult<()>> {
        Box::pin(async move {
            let flag = if force { " force" } else { "" };
            self.record(format!("destroy_machines {}{flag}", machine_ids.join(",")))?;
            let mut state = self.state.lock().unwrap();
            if !state.stuck {
                for id in machine_ids {
                    state.status.machines.remove(id);
                }
            }
            Ok(())
        })
    }

    fn destroy_service<'a>(&'a self, application: &'a str) -> BoxFuture<'a, OrchestratorResult<()>> {
        Box::pin(async move {
            self.record(format!("destroy_service {application}"))?;
            self.state.lock().unwrap().status.applications.remove(application);
            Ok(())
        })
    }

    fn resolved<'a>(&'a self, unit: &'a str) -> BoxFuture<'a, OrchestratorResult<()>> {
        Box::pin(async move { self.record(format!("resolved {unit}")) })
    }

    fn private_address<'a>(&'a self, unit: &'a str) -> BoxFuture<'a, OrchestratorResult<String>> {
        Box::pin(async move {
            let hangs = self.state.lock().unwrap().hanging.iter().any(|u| u == unit);
            if hangs {
                std::future::pending::<()>().await;
            }
            self.state
                .lock()
                .unwrap()
                .addresses
                .get(unit)
                .cloned()
                .ok_or_else(|| OrchestratorError::UnexpectedOutput(format!("no address for {unit}")))
        })
    }

    fn deploy_bundle<'a>(&'a self, bundle: &'a Path) -> BoxFuture<'a, OrchestratorResult<()>> {
        Box::pin(async move { self.record(format!("deploy_bundle {}", bundle.display())) })
    }
}

// ── Provisioner ────────────────────────────────────────────────────

/// Serves a fixed status per instance id.
pub struct MockProvisioner {
    default: NodeStatus,
    statuses: Mutex<HashMap<String, NodeStatus>>,
    broken: Mutex<Vec<String>>,
    queries: Mutex<HashMap<String, usize>>,
}

impl MockProvisioner {
    /// Every unknown instance reports `default`.
    pub fn new(default: NodeStatus) -> Self {
        Self {
            default,
            statuses: Mutex::new(HashMap::new()),
            broken: Mutex::new(Vec::new()),
            queries: Mutex::new(HashMap::new()),
        }
    }

    pub fn set(&self, instance_id: &str, status: NodeStatus) {
        self.statuses
            .lock()
            .unwrap()
            .insert(instance_id.to_string(), status);
    }

    /// Status queries for `instance_id` fail.
    pub fn break_instance(&self, instance_id: &str) {
        self.broken.lock().unwrap().push(instance_id.to_string());
    }

    pub fn queries(&self, instance_id: &str) -> usize {
        self.queries
            .lock()
            .unwrap()
            .get(instance_id)
            .copied()
            .unwrap_or(0)
    }
}

impl Provisioner for MockProvisioner {
    fn node_status<'a>(&'a self, instance_id: &'a str) -> BoxFuture<'a, ProvisionerResult<NodeStatus>> {
        Box::pin(async move {
            *self
                .queries
                .lock()
                .unwrap()
                .entry(instance_id.to_string())
                .or_default() += 1;
            if self.broken.lock().unwrap().iter().any(|b| b == instance_id) {
                return Err(ProvisionerError::Connect {
                    address: "maas".to_string(),
                    reason: "connection refused".to_string(),
                });
            }
            Ok(self
                .statuses
                .lock()
                .unwrap()
                .get(instance_id)
                .copied()
                .unwrap_or(self.default))
        })
    }
}

// ── Delta builders ─────────────────────────────────────────────────

pub fn unit(name: &str, machine_id: &str, workload: &str) -> Delta {
    unit_with_message(name, machine_id, workload, "")
}

pub fn unit_with_message(name: &str, machine_id: &str, workload: &str, message: &str) -> Delta {
    Delta::change(Entity::Unit(UnitDelta {
        name: name.to_string(),
        application: stagehand_core::application_of(name).to_string(),
        machine_id: machine_id.to_string(),
        workload: workload.to_string(),
        message: message.to_string(),
    }))
}

pub fn machine(id: &str, instance_id: &str) -> Delta {
    Delta::change(Entity::Machine(MachineDelta {
        id: id.to_string(),
        instance_id: instance_id.to_string(),
        series: "trusty".to_string(),
        error: String::new(),
    }))
}

/// A machine the provisioner could not allocate.
pub fn failed_machine(id: &str, error: &str) -> Delta {
    Delta::change(Entity::Machine(MachineDelta {
        id: id.to_string(),
        instance_id: "pending".to_string(),
        series: "trusty".to_string(),
        error: error.to_string(),
    }))
}

/// Poll `condition` until it holds, panicking after five seconds.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    let waited = tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "condition not reached in time");
}

/// Run `future` with a five second cap.
pub async fn bounded<T>(future: impl Future<Output = T>) -> T {
    tokio::time::timeout(Duration::from_secs(5), future)
        .await
        .expect("test timed out")
}
