//! Unit retry consumer: resolve in place or escalate.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use stagehand_orchestrator::Orchestrator;

use crate::error::{ReconcileError, ReconcileResult};
use crate::events::UnitRetry;

pub struct UnitRetryConsumer {
    orchestrator: Arc<dyn Orchestrator>,
    max_retries: u32,
    events: mpsc::UnboundedReceiver<UnitRetry>,
}

impl UnitRetryConsumer {
    pub fn new(
        orchestrator: Arc<dyn Orchestrator>,
        max_retries: u32,
        events: mpsc::UnboundedReceiver<UnitRetry>,
    ) -> Self {
        Self {
            orchestrator,
            max_retries,
            events,
        }
    }

    pub async fn run(mut self) -> ReconcileResult<()> {
        while let Some(event) = self.events.recv().await {
            self.handle(&event).await?;
        }
        debug!("unit retry queue closed");
        Ok(())
    }

    /// Resolve the unit if it has budget left, otherwise fail.
    pub async fn handle(&self, event: &UnitRetry) -> ReconcileResult<()> {
        if event.retries > self.max_retries {
            error!(unit = %event.unit, retries = event.retries, message = %event.message, "unit retry budget exhausted");
            return Err(ReconcileError::UnitRetriesExhausted {
                unit: event.unit.clone(),
                retries: event.retries,
                message: event.message.clone(),
            });
        }

        info!(unit = %event.unit, attempt = event.retries, "resolving unit");
        if let Err(e) = self.orchestrator.resolved(&event.unit).await {
            warn!(unit = %event.unit, error = %e, "resolve failed");
        }
        Ok(())
    }
}
