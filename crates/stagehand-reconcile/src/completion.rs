//! Deployment completion watcher.

use std::time::Duration;

use tracing::{debug, info};

use stagehand_state::{StateStore, Unit};

use crate::error::{ReconcileError, ReconcileResult};

/// True when there is at least one unit and every unit is `active`.
pub fn all_active(units: &[Unit]) -> bool {
    !units.is_empty() && units.iter().all(|u| u.status.is_active())
}

pub struct CompletionWatcher {
    store: StateStore,
    interval: Duration,
    deadline: Duration,
}

impl CompletionWatcher {
    pub fn new(store: StateStore, interval: Duration, deadline: Duration) -> Self {
        Self {
            store,
            interval,
            deadline,
        }
    }

    /// Wait for convergence, failing with `DeadlineExceeded` once the
    /// deadline passes.
    pub async fn wait(&self) -> ReconcileResult<()> {
        let poll = async {
            let mut last = (usize::MAX, usize::MAX);
            loop {
                let units = self.store.snapshot();
                if all_active(&units) {
                    return units.len();
                }
                let active = units.iter().filter(|u| u.status.is_active()).count();
                if (active, units.len()) != last {
                    debug!(active, total = units.len(), "waiting for units");
                    last = (active, units.len());
                }
                tokio::time::sleep(self.interval).await;
            }
        };

        match tokio::time::timeout(self.deadline, poll).await {
            Ok(total) => {
                info!(units = total, "all units active");
                Ok(())
            }
            Err(_) => Err(ReconcileError::DeadlineExceeded {
                what: "deployment".to_string(),
                after: self.deadline,
            }),
        }
    }
}
