//! Delta events emitted by the orchestrator watch stream.

use serde::{Deserialize, Serialize};

use crate::status::StatusSnapshot;

/// What happened to the entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Change,
    Remove,
}

/// A single entry of the delta stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Delta {
    pub change: ChangeKind,
    pub entity: Entity,
}

/// The entity a delta describes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Entity {
    Unit(UnitDelta),
    Machine(MachineDelta),
    Application(ApplicationDelta),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitDelta {
    pub name: String,
    pub application: String,
    pub machine_id: String,
    /// Raw workload status (`active`, `error`, `waiting`, ...).
    pub workload: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MachineDelta {
    pub id: String,
    pub instance_id: String,
    pub series: String,
    /// Allocation error reported by the provisioner, empty when none.
    #[serde(default)]
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationDelta {
    pub name: String,
}

impl Delta {
    pub fn change(entity: Entity) -> Self {
        Self {
            change: ChangeKind::Change,
            entity,
        }
    }

    pub fn remove(entity: Entity) -> Self {
        Self {
            change: ChangeKind::Remove,
            entity,
        }
    }
}

/// Compute the deltas that turn `prev` into `next`.
///
/// Order within a batch is applications, then units, then machines, each
/// sorted by key, so a machine's units are known by the time its instance
/// id is seen.
pub fn diff(prev: &StatusSnapshot, next: &StatusSnapshot) -> Vec<Delta> {
    let mut deltas = Vec::new();

    for name in next.applications.keys() {
        if !prev.applications.contains_key(name) {
            deltas.push(Delta::change(Entity::Application(ApplicationDelta {
                name: name.clone(),
            })));
        }
    }
    for name in prev.applications.keys() {
        if !next.applications.contains_key(name) {
            deltas.push(Delta::remove(Entity::Application(ApplicationDelta {
                name: name.clone(),
            })));
        }
    }

    let prev_units = || {
        prev.applications
            .iter()
            .flat_map(|(app, a)| a.units.iter().map(move |(name, u)| (name, (app, u))))
    };
    for (app, application) in &next.applications {
        for (name, unit) in &application.units {
            let unchanged = prev_units().any(|(n, (_, u))| n == name && u == unit);
            if !unchanged {
                deltas.push(Delta::change(Entity::Unit(UnitDelta {
                    name: name.clone(),
                    application: app.clone(),
                    machine_id: unit.machine.clone(),
                    workload: unit.workload.current.clone(),
                    message: unit.workload.message.clone(),
                })));
            }
        }
    }
    for (name, (app, unit)) in prev_units() {
        let still_present = next
            .applications
            .get(app)
            .is_some_and(|a| a.units.contains_key(name));
        if !still_present {
            deltas.push(Delta::remove(Entity::Unit(UnitDelta {
                name: name.clone(),
                application: app.clone(),
                machine_id: unit.machine.clone(),
                workload: unit.workload.current.clone(),
                message: unit.workload.message.clone(),
            })));
        }
    }

    for (id, machine) in &next.machines {
        if prev.machines.get(id) != Some(machine) {
            deltas.push(Delta::change(Entity::Machine(MachineDelta {
                id: id.clone(),
                instance_id: machine.instance_id.clone(),
                series: machine.series.clone(),
                error: machine.allocation_error().unwrap_or_default().to_string(),
            })));
        }
    }
    for (id, machine) in &prev.machines {
        if !next.machines.contains_key(id) {
            deltas.push(Delta::remove(Entity::Machine(MachineDelta {
                id: id.clone(),
                instance_id: machine.instance_id.clone(),
                series: machine.series.clone(),
                error: machine.allocation_error().unwrap_or_default().to_string(),
            })));
        }
    }

    deltas
}
