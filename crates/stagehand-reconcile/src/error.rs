//! Reconciliation error types.

use std::time::Duration;

use thiserror::Error;

use stagehand_orchestrator::OrchestratorError;
use stagehand_provisioner::{NodeStatus, ProvisionerError};

/// Conditions that end a deployment run.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("unit {unit} exhausted its retry budget ({retries} attempts): {message}")]
    UnitRetriesExhausted {
        unit: String,
        retries: u32,
        message: String,
    },

    #[error("machine {instance_id} exhausted its replacement budget (attempt {attempt}), last status {status}")]
    MachineRetriesExhausted {
        instance_id: String,
        status: NodeStatus,
        attempt: u32,
    },

    #[error("machine allocation failed for series {series}: {reason}")]
    AllocationFailed { series: String, reason: String },

    #[error("{what} did not complete within {after:?}")]
    DeadlineExceeded { what: String, after: Duration },

    #[error("background task {task} panicked")]
    TaskPanicked { task: String },

    #[error("no provisioner configured")]
    NoProvisioner,

    #[error("task group shut down")]
    Cancelled,

    #[error("orchestrator error: {0}")]
    Orchestrator(#[from] OrchestratorError),

    #[error("provisioner error: {0}")]
    Provisioner(#[from] ProvisionerError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type ReconcileResult<T> = Result<T, ReconcileError>;
