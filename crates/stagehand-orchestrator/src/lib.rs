//! stagehand-orchestrator — the cluster orchestrator as seen by the engine.
//!
//! The reconciliation engine never talks to the orchestrator directly; it
//! holds an `Arc<dyn Orchestrator>` and consumes ordered [`Delta`] batches
//! from a [`DeltaStream`].
//!
//! # Architecture
//!
//! ```text
//! Orchestrator (trait)
//!   ├── watch()   → DeltaStream (ordered delta batches)
//!   ├── status()  → StatusSnapshot
//!   └── add_machine / add_unit / destroy_* / resolved / private_address
//!
//! JujuCli (impl)
//!   ├── shells out to `juju ... --format=json`
//!   └── JujuWatch: polls `juju status`, diff() → Vec<Delta>
//! ```

pub mod client;
pub mod delta;
pub mod error;
pub mod juju;
pub mod status;

pub use client::{Constraints, DeltaStream, Orchestrator};
pub use delta::{ApplicationDelta, ChangeKind, Delta, Entity, MachineDelta, UnitDelta, diff};
pub use error::{OrchestratorError, OrchestratorResult};
pub use juju::JujuCli;
pub use status::{ApplicationStatus, MachineStatus, StatusInfo, StatusSnapshot, UnitStatus, WorkloadInfo};
