//! Bare-metal watcher: polls one instance until it fails deployment.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use stagehand_core::BoxFuture;

use crate::error::ProvisionerResult;
use crate::maas::system_id;
use crate::status::NodeStatus;

/// Bare-metal provisioner operations, injected for testability.
pub trait Provisioner: Send + Sync {
    /// Current status of the node behind `instance_id`.
    fn node_status<'a>(&'a self, instance_id: &'a str) -> BoxFuture<'a, ProvisionerResult<NodeStatus>>;
}

/// Emitted once when a watched node reaches `FailedDeployment`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureEvent {
    pub status: NodeStatus,
    pub instance_id: String,
    pub system_id: String,
}

/// Polls the provisioner for a single instance.
#[derive(Clone)]
pub struct BareMetalWatcher {
    provisioner: Arc<dyn Provisioner>,
    interval: Duration,
    events: mpsc::UnboundedSender<FailureEvent>,
}

impl BareMetalWatcher {
    pub fn new(provisioner: Arc<dyn Provisioner>, events: mpsc::UnboundedSender<FailureEvent>) -> Self {
        Self {
            provisioner,
            interval: Duration::from_secs(5),
            events,
        }
    }

    /// Set the poll interval.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Poll until the node fails deployment, then publish one event.
    ///
    /// Runs forever for a node that never fails; the caller cancels it.
    /// A status query error ends the watch with that error.
    pub async fn watch(&self, instance_id: &str) -> ProvisionerResult<()> {
        let system_id = system_id(instance_id).to_string();
        let mut last: Option<NodeStatus> = None;

        debug!(%instance_id, %system_id, "bare-metal watcher started");

        loop {
            let status = self.provisioner.node_status(instance_id).await?;

            if last != Some(status) {
                debug!(%instance_id, %status, "node status changed");
                last = Some(status);
            }

            if status.is_failed_deployment() {
                info!(%instance_id, %system_id, "node failed deployment");
                let event = FailureEvent {
                    status,
                    instance_id: instance_id.to_string(),
                    system_id,
                };
                if self.events.send(event).is_err() {
                    warn!(%instance_id, "failure queue closed, event dropped");
                }
                return Ok(());
            }

            tokio::time::sleep(self.interval).await;
        }
    }
}
