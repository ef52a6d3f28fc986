//! Deploy and teardown runs.
//!
//! A deploy run wires every component into one supervised task group:
//!
//! ```text
//!            ┌──────────────┐  UnitRetry   ┌───────────────────┐
//! deltas ──▶ │ WatchConsumer│ ───────────▶ │ UnitRetryConsumer │ ──▶ resolved()
//!            └──────┬───────┘              └───────────────────┘
//!                   │ spawn (once per instance)
//!                   ▼
//!            ┌──────────────────┐ FailureEvent ┌─────────────────┐
//!            │ BareMetalWatcher │ ───────────▶ │ FailureConsumer │ ──▶ RecoveryOrchestrator
//!            └──────────────────┘              └─────────────────┘
//!
//! CompletionWatcher polls the store until every unit is active. Batches that
//! touched a unit signal the hosts file task, which rewrites the file off
//! the delta path.
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use stagehand_core::StagehandConfig;
use stagehand_orchestrator::Orchestrator;
use stagehand_provisioner::Provisioner;
use stagehand_state::StateStore;

use crate::completion::CompletionWatcher;
use crate::error::{ReconcileError, ReconcileResult};
use crate::failures::FailureConsumer;
use crate::hosts::HostsFile;
use crate::recovery::RecoveryOrchestrator;
use crate::supervisor::Supervisor;
use crate::unit_retry::UnitRetryConsumer;
use crate::watch::{WatchConsumer, WatcherSpawner};

/// Resolved parameters of one deployment.
#[derive(Debug, Clone)]
pub struct DeploymentSettings {
    pub token: String,
    pub bundle: Option<PathBuf>,
    pub workdir: Option<PathBuf>,
    pub hosts_file: Option<PathBuf>,
    pub unit_retries: u32,
    pub machine_retries: u32,
    pub deadline: Duration,
    pub node_poll: Duration,
    pub completion_poll: Duration,
    pub teardown_poll: Duration,
    /// Placement tag per deployed application name.
    pub tags: Vec<(String, String)>,
}

impl DeploymentSettings {
    /// Defaults for `token` with nothing written to disk.
    pub fn new(token: &str) -> Self {
        Self {
            token: token.to_string(),
            bundle: None,
            workdir: None,
            hosts_file: None,
            unit_retries: 3,
            machine_retries: 3,
            deadline: Duration::from_secs(2 * 3600),
            node_poll: Duration::from_secs(5),
            completion_poll: Duration::from_secs(5),
            teardown_poll: Duration::from_secs(3),
            tags: Vec::new(),
        }
    }

    pub fn from_config(config: &StagehandConfig, token: &str) -> Self {
        Self {
            token: token.to_string(),
            bundle: config.deployment.bundle.clone(),
            workdir: Some(config.workdir()),
            hosts_file: Some(config.hosts_file(token)),
            unit_retries: config.retry.unit,
            machine_retries: config.retry.machine,
            deadline: config.deadline(),
            node_poll: config.node_poll(),
            completion_poll: config.completion_poll(),
            teardown_poll: config.watch_poll(),
            tags: config.application_tags(token),
        }
    }
}

pub struct Deployment {
    settings: DeploymentSettings,
    store: StateStore,
    orchestrator: Arc<dyn Orchestrator>,
    provisioner: Option<Arc<dyn Provisioner>>,
    supervisor: Supervisor,
}

impl Deployment {
    pub fn new(
        settings: DeploymentSettings,
        orchestrator: Arc<dyn Orchestrator>,
        provisioner: Arc<dyn Provisioner>,
    ) -> Self {
        Self::build(settings, orchestrator, Some(provisioner))
    }

    /// A deployment that can only be torn down.
    pub fn offline(settings: DeploymentSettings, orchestrator: Arc<dyn Orchestrator>) -> Self {
        Self::build(settings, orchestrator, None)
    }

    fn build(
        settings: DeploymentSettings,
        orchestrator: Arc<dyn Orchestrator>,
        provisioner: Option<Arc<dyn Provisioner>>,
    ) -> Self {
        let store = StateStore::new();
        for (application, tag) in &settings.tags {
            store.set_tag(application, tag);
        }
        Self {
            settings,
            store,
            orchestrator,
            provisioner,
            supervisor: Supervisor::new(),
        }
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    pub fn settings(&self) -> &DeploymentSettings {
        &self.settings
    }

    /// Stop a running reconcile: every task is shut down and
    /// [`reconcile`](Self::reconcile) returns [`ReconcileError::Cancelled`].
    /// A deployment cannot reconcile again once cancelled.
    pub fn cancel(&self) {
        info!(token = %self.settings.token, "cancelling deployment");
        self.supervisor.shutdown();
    }

    /// Submit the bundle (if any) and reconcile until convergence.
    pub async fn deploy(&self) -> ReconcileResult<()> {
        if self.provisioner.is_none() {
            return Err(ReconcileError::NoProvisioner);
        }
        if let Some(workdir) = &self.settings.workdir {
            tokio::fs::create_dir_all(workdir).await?;
        }
        if let Some(bundle) = &self.settings.bundle {
            if !tokio::fs::try_exists(bundle).await? {
                return Err(ReconcileError::Io(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("no such bundle file: {}", bundle.display()),
                )));
            }
            info!(bundle = %bundle.display(), token = %self.settings.token, "submitting bundle");
            self.orchestrator.deploy_bundle(bundle).await?;
        }
        self.reconcile().await
    }

    /// Run the reconciliation engine until every unit is active, a fatal
    /// error occurs, the deadline passes or the run is cancelled. All tasks
    /// are stopped on return.
    pub async fn reconcile(&self) -> ReconcileResult<()> {
        let settings = &self.settings;
        let provisioner = self.provisioner.clone().ok_or(ReconcileError::NoProvisioner)?;
        let supervisor = self.supervisor.clone();
        let (retry_tx, retry_rx) = mpsc::unbounded_channel();
        let (failure_tx, failure_rx) = mpsc::unbounded_channel();

        let watchers = WatcherSpawner::new(provisioner, failure_tx, supervisor.clone())
            .with_interval(settings.node_poll);
        let mut consumer = WatchConsumer::new(
            self.store.clone(),
            self.orchestrator.clone(),
            watchers,
            retry_tx,
            &settings.token,
        );
        if let Some(path) = &settings.hosts_file {
            let (requests_tx, requests_rx) = watch::channel(());
            consumer = consumer.with_hosts_refresh(requests_tx);
            let hosts = HostsFile::new(path, &settings.token);
            supervisor.spawn(
                "hosts file",
                hosts.run(self.store.clone(), self.orchestrator.clone(), requests_rx),
            );
        }

        let recovery = RecoveryOrchestrator::new(
            self.store.clone(),
            self.orchestrator.clone(),
            settings.machine_retries,
        );
        let failures = FailureConsumer::new(self.store.clone(), recovery, failure_rx);
        let unit_retries = UnitRetryConsumer::new(self.orchestrator.clone(), settings.unit_retries, retry_rx);

        supervisor.spawn("watch consumer", consumer.run());
        supervisor.spawn("failure consumer", failures.run());
        supervisor.spawn("unit retry consumer", unit_retries.run());

        info!(
            token = %settings.token,
            deadline = ?settings.deadline,
            unit_retries = settings.unit_retries,
            machine_retries = settings.machine_retries,
            "reconciling deployment"
        );
        let completion = CompletionWatcher::new(self.store.clone(), settings.completion_poll, settings.deadline);
        let result = supervisor.run_until(completion.wait()).await;
        match &result {
            Ok(()) => info!(token = %settings.token, "deployment converged"),
            Err(e) => warn!(token = %settings.token, error = %e, "deployment failed"),
        }
        result
    }

    /// Destroy every application and machine matching the token, then wait
    /// until no matching machine is left.
    pub async fn teardown(&self) -> ReconcileResult<()> {
        let token = &self.settings.token;
        let status = self.orchestrator.status(Some(token)).await?;
        let machines: Vec<String> = status.machines.keys().cloned().collect();
        info!(
            %token,
            applications = status.applications.len(),
            machines = machines.len(),
            "tearing down"
        );

        for application in status.applications.keys() {
            self.orchestrator.destroy_service(application).await?;
        }
        self.orchestrator.destroy_machines(&machines, true).await?;

        let deadline = Instant::now() + self.settings.deadline;
        loop {
            let status = self.orchestrator.status(Some(token)).await?;
            if status.machines.is_empty() {
                break;
            }
            if Instant::now() >= deadline {
                return Err(ReconcileError::DeadlineExceeded {
                    what: "teardown".to_string(),
                    after: self.settings.deadline,
                });
            }
            debug!(remaining = status.machines.len(), "waiting for machines to go away");
            tokio::time::sleep(self.settings.teardown_poll).await;
        }

        self.store.clear();
        if let Some(path) = &self.settings.hosts_file {
            match tokio::fs::remove_file(path).await {
                Ok(()) => debug!(path = %path.display(), "hosts file removed"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!(path = %path.display(), error = %e, "failed to remove hosts file"),
            }
        }
        info!(%token, "teardown complete");
        Ok(())
    }
}
