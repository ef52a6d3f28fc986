//! Status snapshot as returned by `juju status --format=json`.
//!
//! Only the fields the engine reads are modelled; everything else in the
//! orchestrator's output is ignored.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

/// Instance id reported for machines the provisioner has not allocated yet.
pub const PENDING_INSTANCE: &str = "pending";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    #[serde(default)]
    pub machines: BTreeMap<String, MachineStatus>,
    #[serde(default)]
    pub applications: BTreeMap<String, ApplicationStatus>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MachineStatus {
    #[serde(default, rename = "instance-id")]
    pub instance_id: String,
    #[serde(default)]
    pub series: String,
    /// Hardware characteristics, e.g. `arch=amd64 cores=4 tags=hyperv,ci`.
    #[serde(default)]
    pub hardware: String,
    /// Provisioning state; carries the provisioner's error when allocation failed.
    #[serde(default, rename = "machine-status")]
    pub machine_status: StatusInfo,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatusInfo {
    #[serde(default)]
    pub current: String,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApplicationStatus {
    #[serde(default)]
    pub units: BTreeMap<String, UnitStatus>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UnitStatus {
    #[serde(default)]
    pub machine: String,
    #[serde(default, rename = "workload-status")]
    pub workload: WorkloadInfo,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkloadInfo {
    #[serde(default)]
    pub current: String,
    #[serde(default)]
    pub message: String,
}

impl MachineStatus {
    /// Whether the provisioner has assigned a concrete instance.
    pub fn has_instance(&self) -> bool {
        !self.instance_id.is_empty() && self.instance_id != PENDING_INSTANCE
    }

    /// The provisioner's error if it failed to allocate this machine.
    pub fn allocation_error(&self) -> Option<&str> {
        match self.machine_status.current.as_str() {
            "error" | "provisioning error" if !self.machine_status.message.is_empty() => {
                Some(self.machine_status.message.as_str())
            }
            current @ ("error" | "provisioning error") => Some(current),
            _ => None,
        }
    }

    /// Tags listed in the hardware characteristics.
    pub fn tags(&self) -> Vec<&str> {
        self.hardware
            .split_whitespace()
            .find_map(|kv| kv.strip_prefix("tags="))
            .map(|tags| tags.split(',').filter(|t| !t.is_empty()).collect())
            .unwrap_or_default()
    }
}

impl StatusSnapshot {
    pub fn from_json(raw: &str) -> serde_json::Result<Self> {
        serde_json::from_str(raw)
    }

    /// Concrete instance ids of every machine in the snapshot.
    pub fn live_instance_ids(&self) -> HashSet<String> {
        self.machines
            .values()
            .filter(|m| m.has_instance())
            .map(|m| m.instance_id.clone())
            .collect()
    }

    /// Whether any machine is still waiting for an instance.
    pub fn has_pending_machines(&self) -> bool {
        self.machines
            .values()
            .any(|m| m.instance_id == PENDING_INSTANCE)
    }

    /// Machine ids that host at least one unit.
    pub fn used_machine_ids(&self) -> HashSet<&str> {
        self.applications
            .values()
            .flat_map(|app| app.units.values())
            .map(|u| u.machine.as_str())
            .filter(|m| !m.is_empty())
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.machines.is_empty() && self.applications.is_empty()
    }
}
