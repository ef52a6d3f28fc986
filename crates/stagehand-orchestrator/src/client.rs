//! The orchestrator boundary: operations the engine consumes.

use std::path::Path;

use serde::{Deserialize, Serialize};

use stagehand_core::BoxFuture;

use crate::delta::Delta;
use crate::error::OrchestratorResult;
use crate::status::StatusSnapshot;

/// Placement constraints passed through verbatim on machine allocation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Constraints {
    pub tags: Vec<String>,
}

impl Constraints {
    pub fn with_tags(tags: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            tags: tags.into_iter().map(Into::into).collect(),
        }
    }

    /// Render as a juju constraints string (`tags=a,b`), empty when unconstrained.
    pub fn to_juju(&self) -> String {
        if self.tags.is_empty() {
            String::new()
        } else {
            format!("tags={}", self.tags.join(","))
        }
    }
}

/// An ordered, long-lived stream of delta batches.
pub trait DeltaStream: Send {
    /// Wait for the next batch. This is the only suspension point of the
    /// watch consumer.
    fn next_batch(&mut self) -> BoxFuture<'_, OrchestratorResult<Vec<Delta>>>;
}

/// Cluster orchestrator operations.
pub trait Orchestrator: Send + Sync {
    /// Open the delta stream.
    fn watch(&self) -> BoxFuture<'_, OrchestratorResult<Box<dyn DeltaStream>>>;

    /// Status snapshot, optionally restricted to entities matching `filter`.
    fn status<'a>(&'a self, filter: Option<&'a str>) -> BoxFuture<'a, OrchestratorResult<StatusSnapshot>>;

    /// Allocate a machine. `None` means the orchestrator accepted the
    /// request but produced no machine.
    fn add_machine<'a>(
        &'a self,
        series: &'a str,
        constraints: &'a Constraints,
    ) -> BoxFuture<'a, OrchestratorResult<Option<String>>>;

    fn add_unit<'a>(&'a self, application: &'a str, machine_id: &'a str) -> BoxFuture<'a, OrchestratorResult<()>>;

    fn destroy_machines<'a>(&'a self, machine_ids: &'a [String], force: bool) -> BoxFuture<'a, OrchestratorResult<()>>;

    fn destroy_service<'a>(&'a self, application: &'a str) -> BoxFuture<'a, OrchestratorResult<()>>;

    /// Ask the orchestrator to retry a unit in place.
    fn resolved<'a>(&'a self, unit: &'a str) -> BoxFuture<'a, OrchestratorResult<()>>;

    fn private_address<'a>(&'a self, unit: &'a str) -> BoxFuture<'a, OrchestratorResult<String>>;

    /// Submit a prepared topology bundle.
    fn deploy_bundle<'a>(&'a self, bundle: &'a Path) -> BoxFuture<'a, OrchestratorResult<()>>;
}
