//! Node pool maintenance.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info};

use stagehand_orchestrator::{Constraints, Orchestrator, StatusSnapshot};

use crate::error::{ReconcileError, ReconcileResult};

/// Machines to keep available.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolTarget {
    pub series: String,
    pub tags: Vec<String>,
    pub min: usize,
}

impl PoolTarget {
    /// `tags` is a space separated list (`"hyperv ci"`).
    pub fn new(series: &str, tags: &str, min: usize) -> Self {
        Self {
            series: series.to_string(),
            tags: tags.split_whitespace().map(str::to_string).collect(),
            min,
        }
    }
}

/// Machines that host no unit, run `series`, and carry every tag in `tags`.
pub fn count_available(status: &StatusSnapshot, series: &str, tags: &[String]) -> usize {
    let used = status.used_machine_ids();
    status
        .machines
        .iter()
        .filter(|(id, _)| !used.contains(id.as_str()))
        .filter(|(_, m)| m.series == series)
        .filter(|(_, m)| {
            let have = m.tags();
            tags.iter().all(|t| have.contains(&t.as_str()))
        })
        .count()
}

pub struct NodePool {
    orchestrator: Arc<dyn Orchestrator>,
    poll: Duration,
    settle_timeout: Duration,
}

impl NodePool {
    pub fn new(orchestrator: Arc<dyn Orchestrator>) -> Self {
        Self {
            orchestrator,
            poll: Duration::from_secs(60),
            settle_timeout: Duration::from_secs(600),
        }
    }

    /// Poll interval and upper bound for the wait on pending machines.
    pub fn with_settle(mut self, poll: Duration, timeout: Duration) -> Self {
        self.poll = poll;
        self.settle_timeout = timeout;
        self
    }

    /// Top the pool up to `target.min`. Returns how many machines were added.
    pub async fn ensure(&self, target: &PoolTarget) -> ReconcileResult<usize> {
        let status = self.settled_status().await?;

        let available = count_available(&status, &target.series, &target.tags);
        info!(series = %target.series, tags = ?target.tags, available, min = target.min, "node pool");
        if available >= target.min {
            return Ok(0);
        }

        let missing = target.min - available;
        let constraints = Constraints::with_tags(target.tags.iter().cloned());
        for n in 0..missing {
            let id = self
                .orchestrator
                .add_machine(&target.series, &constraints)
                .await?;
            debug!(machine_id = ?id, n = n + 1, of = missing, "machine added to pool");
        }
        Ok(missing)
    }

    /// Status once no machine is pending, bounded by the settle timeout.
    async fn settled_status(&self) -> ReconcileResult<StatusSnapshot> {
        let deadline = Instant::now() + self.settle_timeout;
        loop {
            let status = self.orchestrator.status(None).await?;
            if !status.has_pending_machines() {
                return Ok(status);
            }
            if Instant::now() + self.poll > deadline {
                return Err(ReconcileError::DeadlineExceeded {
                    what: "pending machines".to_string(),
                    after: self.settle_timeout,
                });
            }
            debug!("waiting for pending machines");
            tokio::time::sleep(self.poll).await;
        }
    }
}
