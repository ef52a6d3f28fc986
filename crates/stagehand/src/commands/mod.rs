use std::path::Path;
use std::sync::Arc;

use anyhow::Context;

use stagehand_core::StagehandConfig;
use stagehand_orchestrator::{JujuCli, Orchestrator};

pub mod deploy;
pub mod pool;
pub mod teardown;

pub fn load_config(path: Option<&Path>) -> anyhow::Result<StagehandConfig> {
    match path {
        Some(path) => StagehandConfig::from_file(path)
            .with_context(|| format!("failed to load config from {}", path.display())),
        None => Ok(StagehandConfig::default()),
    }
}

pub fn orchestrator(config: &StagehandConfig) -> Arc<dyn Orchestrator> {
    Arc::new(
        JujuCli::new(config.orchestrator.juju_bin.clone())
            .with_model(config.orchestrator.model.clone())
            .with_poll_interval(config.watch_poll()),
    )
}
