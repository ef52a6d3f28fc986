//! StateStore — lock-partitioned cache of deployment state.
//!
//! Provides typed get/put/delete over units and machines plus the small set
//! of compound operations (retry bumps, watcher claims, machine retirement)
//! that must read and write the machine domain atomically.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::debug;

use crate::types::*;

/// Thread-safe state store with separate unit and machine lock domains.
#[derive(Clone, Default)]
pub struct StateStore {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    units: Mutex<UnitDomain>,
    machines: Mutex<MachineDomain>,
}

#[derive(Default)]
struct UnitDomain {
    units: HashMap<UnitName, Unit>,
}

#[derive(Default)]
struct MachineDomain {
    machines: HashMap<MachineId, Machine>,
    /// instance id → machine id.
    instances: HashMap<InstanceId, MachineId>,
    /// application → placement tag.
    tags: HashMap<String, String>,
    /// application → machine replacements consumed.
    app_retries: HashMap<String, u32>,
    /// Instance ids released by a replacement and not yet gone from status.
    deleted: BTreeSet<InstanceId>,
    /// Machines dropped by a replacement. Machine ids are never reused.
    retired_machines: HashSet<MachineId>,
    /// Units that lived on a retired machine.
    retired_units: HashSet<UnitName>,
}

/// Result of trying to claim a machine for a bare-metal watcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// No unit of this deployment is placed on the machine.
    Untracked,
    /// A watcher was already started for this machine.
    AlreadyAnalyzed,
    /// The instance id was released by a replacement and is cycling out.
    Deleted,
    /// The caller must start a watcher; the machine is now analyzed.
    Claimed(Machine),
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl StateStore {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Units ──────────────────────────────────────────────────────

    /// Insert or update a unit.
    pub fn put_unit(&self, unit: &Unit) {
        lock(&self.inner.units)
            .units
            .insert(unit.name.clone(), unit.clone());
    }

    /// Get a unit by name.
    pub fn get_unit(&self, name: &str) -> Option<Unit> {
        lock(&self.inner.units).units.get(name).cloned()
    }

    /// Delete a unit by name. Returns true if it existed.
    pub fn delete_unit(&self, name: &str) -> bool {
        lock(&self.inner.units).units.remove(name).is_some()
    }

    /// Delete a set of units. Returns number deleted.
    pub fn delete_units<'a>(&self, names: impl IntoIterator<Item = &'a String>) -> usize {
        let mut domain = lock(&self.inner.units);
        let count = names
            .into_iter()
            .filter(|name| domain.units.remove(name.as_str()).is_some())
            .count();
        debug!(count, "units deleted");
        count
    }

    /// Read-modify-write a single unit under the unit lock.
    ///
    /// The closure sees the cached record (or `None`) and may replace or
    /// clear it. Whatever is left in the slot is written back.
    pub fn update_unit<R>(&self, name: &str, f: impl FnOnce(&mut Option<Unit>) -> R) -> R {
        let mut domain = lock(&self.inner.units);
        let mut slot = domain.units.remove(name);
        let result = f(&mut slot);
        if let Some(unit) = slot {
            domain.units.insert(name.to_string(), unit);
        }
        result
    }

    /// Consistent copy of all units, sorted by name.
    pub fn snapshot(&self) -> Vec<Unit> {
        let mut units: Vec<Unit> = lock(&self.inner.units).units.values().cloned().collect();
        units.sort_by(|a, b| a.name.cmp(&b.name));
        units
    }

    pub fn unit_count(&self) -> usize {
        lock(&self.inner.units).units.len()
    }

    // ── Machines ───────────────────────────────────────────────────

    /// Insert or update a machine, keeping the instance index current.
    pub fn put_machine(&self, machine: &Machine) {
        let mut domain = lock(&self.inner.machines);
        if let Some(instance_id) = &machine.instance_id {
            domain
                .instances
                .insert(instance_id.clone(), machine.machine_id.clone());
        }
        domain
            .machines
            .insert(machine.machine_id.clone(), machine.clone());
    }

    /// Get a machine by orchestrator machine id.
    pub fn get_machine(&self, machine_id: &str) -> Option<Machine> {
        lock(&self.inner.machines).machines.get(machine_id).cloned()
    }

    /// Resolve a provisioner instance id to its orchestrator machine id.
    pub fn machine_id_for_instance(&self, instance_id: &str) -> Option<MachineId> {
        lock(&self.inner.machines).instances.get(instance_id).cloned()
    }

    /// Get a machine by provisioner instance id.
    pub fn machine_by_instance(&self, instance_id: &str) -> Option<Machine> {
        let domain = lock(&self.inner.machines);
        let machine_id = domain.instances.get(instance_id)?;
        domain.machines.get(machine_id).cloned()
    }

    /// Delete a machine record and its instance index entry.
    pub fn delete_machine(&self, machine_id: &str) -> Option<Machine> {
        let mut domain = lock(&self.inner.machines);
        let machine = domain.machines.remove(machine_id)?;
        if let Some(instance_id) = &machine.instance_id {
            domain.instances.remove(instance_id);
        }
        Some(machine)
    }

    pub fn machine_count(&self) -> usize {
        lock(&self.inner.machines).machines.len()
    }

    /// Record that `unit` of `application` is placed on `machine_id`.
    ///
    /// Creates the machine record on first sight and initialises the
    /// application's replacement counter if it has none. An existing
    /// counter is never reset. Retired machines are not recreated.
    pub fn record_affinity(&self, machine_id: &str, application: &str, unit: &str) {
        let mut domain = lock(&self.inner.machines);
        if domain.retired_machines.contains(machine_id) {
            return;
        }
        let machine = domain
            .machines
            .entry(machine_id.to_string())
            .or_insert_with(|| Machine::new(machine_id));
        machine.applications.insert(application.to_string());
        machine.units.insert(unit.to_string());
        domain
            .app_retries
            .entry(application.to_string())
            .or_insert(0);
    }

    // ── Application tags ───────────────────────────────────────────

    pub fn set_tag(&self, application: &str, tag: &str) {
        lock(&self.inner.machines)
            .tags
            .insert(application.to_string(), tag.to_string());
    }

    pub fn tag_for(&self, application: &str) -> Option<String> {
        lock(&self.inner.machines).tags.get(application).cloned()
    }

    // ── Application retry budget ───────────────────────────────────

    pub fn app_retries(&self, application: &str) -> Option<u32> {
        lock(&self.inner.machines)
            .app_retries
            .get(application)
            .copied()
    }

    /// Increment the counter of every application and return the highest
    /// resulting value (0 when `applications` is empty).
    pub fn bump_app_retries<'a>(&self, applications: impl IntoIterator<Item = &'a String>) -> u32 {
        let mut domain = lock(&self.inner.machines);
        let mut attempt = 0;
        for app in applications {
            let counter = domain.app_retries.entry(app.clone()).or_insert(0);
            *counter += 1;
            attempt = attempt.max(*counter);
        }
        attempt
    }

    // ── Watcher claims ─────────────────────────────────────────────

    /// Attach instance details to a tracked machine and claim it for a
    /// bare-metal watcher.
    ///
    /// The analyzed check and the analyzed write happen under one machine
    /// lock, so at most one caller ever receives `Claimed` per machine.
    pub fn claim_for_watch(&self, machine_id: &str, instance_id: &str, series: &str) -> ClaimOutcome {
        let mut domain = lock(&self.inner.machines);
        let tag = match domain.machines.get(machine_id) {
            Some(machine) if machine.is_tracked() => machine
                .applications
                .iter()
                .find_map(|app| domain.tags.get(app).cloned()),
            _ => return ClaimOutcome::Untracked,
        };
        let deleted = domain.deleted.contains(instance_id);

        let Some(machine) = domain.machines.get_mut(machine_id) else {
            return ClaimOutcome::Untracked;
        };
        machine.series = series.to_string();
        if let Some(tag) = tag {
            if !machine.tags.contains(&tag) {
                machine.tags.push(tag);
            }
        }

        if machine.analyzed {
            return ClaimOutcome::AlreadyAnalyzed;
        }
        if deleted {
            return ClaimOutcome::Deleted;
        }

        machine.instance_id = Some(instance_id.to_string());
        machine.analyzed = true;
        let claimed = machine.clone();
        domain
            .instances
            .insert(instance_id.to_string(), machine_id.to_string());
        ClaimOutcome::Claimed(claimed)
    }

    // ── Deleted instances ──────────────────────────────────────────

    /// Drop a replaced machine: remove its record and index entry, park
    /// its instance id in the deleted set, and remember the machine and its
    /// units so later deltas about them are ignored.
    pub fn retire_machine(&self, machine_id: &str) -> Option<Machine> {
        let mut domain = lock(&self.inner.machines);
        domain.retired_machines.insert(machine_id.to_string());
        let machine = domain.machines.remove(machine_id)?;
        domain.retired_units.extend(machine.units.iter().cloned());
        if let Some(instance_id) = &machine.instance_id {
            domain.instances.remove(instance_id);
            domain.deleted.insert(instance_id.clone());
        }
        debug!(%machine_id, instance_id = ?machine.instance_id, "machine retired");
        Some(machine)
    }

    /// Whether `unit` lived on a machine that has been replaced.
    pub fn is_retired_unit(&self, unit: &str) -> bool {
        lock(&self.inner.machines).retired_units.contains(unit)
    }

    pub fn is_retired_machine(&self, machine_id: &str) -> bool {
        lock(&self.inner.machines).retired_machines.contains(machine_id)
    }

    pub fn is_deleted(&self, instance_id: &str) -> bool {
        lock(&self.inner.machines).deleted.contains(instance_id)
    }

    pub fn deleted_instances(&self) -> Vec<InstanceId> {
        lock(&self.inner.machines).deleted.iter().cloned().collect()
    }

    /// Forget deleted instance ids that no longer appear among `live`.
    /// Returns the ids that were dropped.
    pub fn reconcile_deleted(&self, live: &HashSet<InstanceId>) -> Vec<InstanceId> {
        let mut domain = lock(&self.inner.machines);
        let gone: Vec<InstanceId> = domain
            .deleted
            .iter()
            .filter(|id| !live.contains(*id))
            .cloned()
            .collect();
        for id in &gone {
            domain.deleted.remove(id);
        }
        gone
    }

    /// Drop everything (teardown).
    pub fn clear(&self) {
        lock(&self.inner.units).units.clear();
        let mut domain = lock(&self.inner.machines);
        domain.machines.clear();
        domain.instances.clear();
        domain.app_retries.clear();
        domain.deleted.clear();
        domain.retired_machines.clear();
        domain.retired_units.clear();
    }
}
