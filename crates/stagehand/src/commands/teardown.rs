//! `stagehand teardown`.

use stagehand_core::StagehandConfig;
use stagehand_reconcile::{Deployment, DeploymentSettings};

pub async fn teardown(config: StagehandConfig, token: &str) -> anyhow::Result<()> {
    let settings = DeploymentSettings::from_config(&config, token);
    let deployment = Deployment::offline(settings, super::orchestrator(&config));
    deployment.teardown().await?;
    Ok(())
}
