//! Payloads carried between the watchers and the consumers.

use serde::{Deserialize, Serialize};

use stagehand_provisioner::NodeStatus;
use stagehand_state::Machine;

/// A unit entered `error`; ask for a resolve or escalate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitRetry {
    pub unit: String,
    /// Retry count after this transition was counted.
    pub retries: u32,
    /// Workload message observed with the error.
    pub message: String,
}

/// A failure event resolved against the machine cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelatedFailure {
    pub instance_id: String,
    pub system_id: String,
    pub status: NodeStatus,
    /// Copy of the machine record taken at correlation time.
    pub machine: Machine,
}
