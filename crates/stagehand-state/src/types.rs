//! Domain types held by the state store.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

pub use stagehand_core::WorkloadStatus;

/// Unit name, `application/ordinal`.
pub type UnitName = String;

/// Orchestrator machine id (`"3"`).
pub type MachineId = String;

/// Provisioner instance id as reported by the orchestrator.
pub type InstanceId = String;

// ── Unit ───────────────────────────────────────────────────────────

/// A deployed workload instance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Unit {
    pub name: UnitName,
    pub application: String,
    /// Last observed workload status.
    pub status: WorkloadStatus,
    /// Last observed workload message (the error text when in `error`).
    pub message: String,
    /// Resolve-in-place attempts consumed so far.
    pub retries: u32,
    pub machine_id: MachineId,
}

impl Unit {
    pub fn new(name: &str, application: &str, machine_id: &str, status: WorkloadStatus) -> Self {
        Self {
            name: name.to_string(),
            application: application.to_string(),
            status,
            message: String::new(),
            retries: 0,
            machine_id: machine_id.to_string(),
        }
    }
}

// ── Machine ────────────────────────────────────────────────────────

/// A compute node hosting units of this deployment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Machine {
    pub machine_id: MachineId,
    /// Set once the orchestrator reports a concrete instance id.
    pub instance_id: Option<InstanceId>,
    pub series: String,
    /// Placement tags used when allocating a replacement.
    pub tags: Vec<String>,
    pub applications: BTreeSet<String>,
    pub units: BTreeSet<UnitName>,
    /// A bare-metal watcher has been started for this machine.
    pub analyzed: bool,
}

impl Machine {
    pub fn new(machine_id: &str) -> Self {
        Self {
            machine_id: machine_id.to_string(),
            ..Self::default()
        }
    }

    /// Whether any unit of this deployment was ever placed here.
    pub fn is_tracked(&self) -> bool {
        !self.applications.is_empty() || !self.units.is_empty()
    }
}
