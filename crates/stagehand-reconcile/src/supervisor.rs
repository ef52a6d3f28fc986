//! Supervised task group.
//!
//! Every background task of a deployment run is spawned here. The tasks
//! share one shutdown signal; the first error or panic escaping any of
//! them is kept, and the whole group is cancelled.

use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::watch;
use tokio::task::AbortHandle;
use tracing::{debug, error};

use crate::error::{ReconcileError, ReconcileResult};

#[derive(Clone)]
pub struct Supervisor {
    inner: Arc<Inner>,
}

struct Inner {
    shutdown_tx: watch::Sender<bool>,
    fault: Mutex<Option<ReconcileError>>,
    tasks: Mutex<Vec<AbortHandle>>,
}

impl Supervisor {
    pub fn new() -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                shutdown_tx,
                fault: Mutex::new(None),
                tasks: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Spawn a task into the group.
    ///
    /// The task stops when the group shuts down. An `Err` or a panic
    /// becomes the group's fault.
    pub fn spawn<F>(&self, name: impl Into<String>, task: F)
    where
        F: Future<Output = ReconcileResult<()>> + Send + 'static,
    {
        let name = name.into();
        if self.is_cancelled() {
            debug!(task = %name, "group already shut down, task not started");
            return;
        }

        let mut shutdown = self.inner.shutdown_tx.subscribe();
        let handle = tokio::spawn(async move {
            tokio::select! {
                result = task => result,
                _ = shutdown.wait_for(|stop| *stop) => Ok(()),
            }
        });
        self.inner
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handle.abort_handle());

        // Reporter: surfaces the task's outcome to the group.
        let group = self.clone();
        tokio::spawn(async move {
            match handle.await {
                Ok(Ok(())) => debug!(task = %name, "task finished"),
                Ok(Err(e)) => group.fail(e),
                Err(join) if join.is_panic() => group.fail(ReconcileError::TaskPanicked { task: name }),
                Err(_) => debug!(task = %name, "task aborted"),
            }
        });
    }

    /// Record `err` as the group fault (first one wins) and cancel the group.
    pub fn fail(&self, err: ReconcileError) {
        {
            let mut fault = self.inner.fault.lock().unwrap_or_else(PoisonError::into_inner);
            if fault.is_none() {
                error!(error = %err, "fatal error, cancelling all tasks");
                *fault = Some(err);
            } else {
                debug!(error = %err, "additional fault after cancellation");
            }
        }
        self.inner.shutdown_tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.inner.shutdown_tx.borrow()
    }

    /// Wait until the group is cancelled.
    pub async fn cancelled(&self) {
        let mut rx = self.inner.shutdown_tx.subscribe();
        let _ = rx.wait_for(|stop| *stop).await;
    }

    /// Take the recorded fault, if any.
    pub fn take_fault(&self) -> Option<ReconcileError> {
        self.inner
            .fault
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Signal shutdown and abort every task in the group.
    pub fn shutdown(&self) {
        self.inner.shutdown_tx.send_replace(true);
        let tasks: Vec<AbortHandle> = self
            .inner
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        debug!(count = tasks.len(), "shutting down task group");
        for task in tasks {
            task.abort();
        }
    }

    /// Drive `main` until it completes or the group faults, then shut the
    /// group down. A group fault takes precedence over a successful `main`.
    pub async fn run_until<T, F>(&self, main: F) -> ReconcileResult<T>
    where
        F: Future<Output = ReconcileResult<T>>,
    {
        let outcome = tokio::select! {
            result = main => Some(result),
            _ = self.cancelled() => None,
        };
        self.shutdown();

        match (outcome, self.take_fault()) {
            (Some(Err(e)), _) => Err(e),
            (_, Some(fault)) => Err(fault),
            (Some(Ok(value)), None) => Ok(value),
            (None, None) => Err(ReconcileError::Cancelled),
        }
    }
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new()
    }
}
