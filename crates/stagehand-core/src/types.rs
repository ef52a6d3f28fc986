//! Shared types used across Stagehand crates.

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};

/// Boxed, sendable future returned by the collaborator traits.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Workload status of a unit as reported by the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkloadStatus {
    Active,
    Error,
    /// Any other status (`waiting`, `maintenance`, `blocked`, ...).
    Other(String),
}

impl WorkloadStatus {
    pub fn parse(raw: &str) -> Self {
        match raw.trim() {
            "active" => WorkloadStatus::Active,
            "error" => WorkloadStatus::Error,
            other => WorkloadStatus::Other(other.to_string()),
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, WorkloadStatus::Active)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, WorkloadStatus::Error)
    }

    pub fn as_str(&self) -> &str {
        match self {
            WorkloadStatus::Active => "active",
            WorkloadStatus::Error => "error",
            WorkloadStatus::Other(s) => s,
        }
    }
}

impl fmt::Display for WorkloadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Application name part of a unit name (`devstack-1f2e/0` → `devstack-1f2e`).
pub fn application_of(unit: &str) -> &str {
    unit.split_once('/').map(|(app, _)| app).unwrap_or(unit)
}

/// Whether a machine id names a top-level machine rather than a container
/// (`3` vs `3/lxd/0`).
pub fn is_top_level_machine(machine_id: &str) -> bool {
    !machine_id.is_empty() && machine_id.bytes().all(|b| b.is_ascii_digit())
}
