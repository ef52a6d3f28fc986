//! MAAS node status codes.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle state of a node as reported by the provisioner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeStatus {
    /// Created, system id assigned.
    New,
    Commissioning,
    FailedCommissioning,
    /// The node can't be contacted.
    Missing,
    /// In the general pool, ready to be deployed.
    Ready,
    Reserved,
    /// Booted into its owner's operating system.
    Deployed,
    Retired,
    /// A lifecycle step failed; see the node's event log.
    Broken,
    Deploying,
    Allocated,
    /// Terminal: deployment of the node failed.
    FailedDeployment,
    Releasing,
    FailedReleasing,
    DiskErasing,
    FailedDiskErasing,
    /// A code this client does not know.
    Unknown(i64),
}

impl NodeStatus {
    pub fn from_code(code: i64) -> Self {
        match code {
            0 => NodeStatus::New,
            1 => NodeStatus::Commissioning,
            2 => NodeStatus::FailedCommissioning,
            3 => NodeStatus::Missing,
            4 => NodeStatus::Ready,
            5 => NodeStatus::Reserved,
            6 => NodeStatus::Deployed,
            7 => NodeStatus::Retired,
            8 => NodeStatus::Broken,
            9 => NodeStatus::Deploying,
            10 => NodeStatus::Allocated,
            11 => NodeStatus::FailedDeployment,
            12 => NodeStatus::Releasing,
            13 => NodeStatus::FailedReleasing,
            14 => NodeStatus::DiskErasing,
            15 => NodeStatus::FailedDiskErasing,
            other => NodeStatus::Unknown(other),
        }
    }

    pub fn code(&self) -> i64 {
        match self {
            NodeStatus::New => 0,
            NodeStatus::Commissioning => 1,
            NodeStatus::FailedCommissioning => 2,
            NodeStatus::Missing => 3,
            NodeStatus::Ready => 4,
            NodeStatus::Reserved => 5,
            NodeStatus::Deployed => 6,
            NodeStatus::Retired => 7,
            NodeStatus::Broken => 8,
            NodeStatus::Deploying => 9,
            NodeStatus::Allocated => 10,
            NodeStatus::FailedDeployment => 11,
            NodeStatus::Releasing => 12,
            NodeStatus::FailedReleasing => 13,
            NodeStatus::DiskErasing => 14,
            NodeStatus::FailedDiskErasing => 15,
            NodeStatus::Unknown(code) => *code,
        }
    }

    /// The only status that triggers machine replacement.
    pub fn is_failed_deployment(&self) -> bool {
        matches!(self, NodeStatus::FailedDeployment)
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NodeStatus::New => "NEW",
            NodeStatus::Commissioning => "COMMISSIONING",
            NodeStatus::FailedCommissioning => "FAILED_COMMISSIONING",
            NodeStatus::Missing => "MISSING",
            NodeStatus::Ready => "READY",
            NodeStatus::Reserved => "RESERVED",
            NodeStatus::Deployed => "DEPLOYED",
            NodeStatus::Retired => "RETIRED",
            NodeStatus::Broken => "BROKEN",
            NodeStatus::Deploying => "DEPLOYING",
            NodeStatus::Allocated => "ALLOCATED",
            NodeStatus::FailedDeployment => "FAILED_DEPLOYMENT",
            NodeStatus::Releasing => "RELEASING",
            NodeStatus::FailedReleasing => "FAILED_RELEASING",
            NodeStatus::DiskErasing => "DISK_ERASING",
            NodeStatus::FailedDiskErasing => "FAILED_DISK_ERASING",
            NodeStatus::Unknown(code) => return write!(f, "UNKNOWN({code})"),
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_map_both_ways() {
        for code in 0..=15 {
            assert_eq!(NodeStatus::from_code(code).code(), code);
        }
        assert_eq!(NodeStatus::from_code(11), NodeStatus::FailedDeployment);
        assert_eq!(NodeStatus::from_code(42), NodeStatus::Unknown(42));
    }

    #[test]
    fn only_failed_deployment_is_terminal_failure() {
        assert!(NodeStatus::FailedDeployment.is_failed_deployment());
        assert!(!NodeStatus::Broken.is_failed_deployment());
        assert!(!NodeStatus::FailedCommissioning.is_failed_deployment());
    }

    #[test]
    fn display_names() {
        assert_eq!(NodeStatus::FailedDeployment.to_string(), "FAILED_DEPLOYMENT");
        assert_eq!(NodeStatus::Unknown(99).to_string(), "UNKNOWN(99)");
    }
}
