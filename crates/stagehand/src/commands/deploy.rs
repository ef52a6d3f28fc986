//! `stagehand deploy`.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Args;
use tracing::{info, warn};

use stagehand_core::config::parse_duration;
use stagehand_core::{StagehandConfig, generate_token};
use stagehand_provisioner::MaasClient;
use stagehand_reconcile::{Deployment, DeploymentSettings, ReconcileError};

#[derive(Debug, Default, Args)]
pub struct DeployArgs {
    /// Correlation token. Generated when neither flag nor config sets one.
    #[arg(short, long)]
    pub token: Option<String>,
    /// Bundle to submit before reconciling.
    #[arg(short, long)]
    pub bundle: Option<PathBuf>,
    /// Resolve attempts per unit.
    #[arg(long)]
    pub unit_retries: Option<u32>,
    /// Machine replacements per application.
    #[arg(long)]
    pub machine_retries: Option<u32>,
    /// Convergence deadline, e.g. "2h" or "90m".
    #[arg(long)]
    pub deadline: Option<String>,
}

/// Fold command line overrides into the file configuration.
pub fn apply_overrides(config: &mut StagehandConfig, args: &DeployArgs) -> anyhow::Result<()> {
    if let Some(token) = &args.token {
        config.deployment.token = Some(token.clone());
    }
    if let Some(bundle) = &args.bundle {
        config.deployment.bundle = Some(bundle.clone());
    }
    if let Some(n) = args.unit_retries {
        config.retry.unit = n;
    }
    if let Some(n) = args.machine_retries {
        config.retry.machine = n;
    }
    if let Some(deadline) = &args.deadline {
        if parse_duration(deadline).is_none() {
            anyhow::bail!("invalid deadline: {deadline:?}");
        }
        config.deployment.deadline = deadline.clone();
    }
    Ok(())
}

pub async fn deploy(mut config: StagehandConfig, args: DeployArgs) -> anyhow::Result<()> {
    apply_overrides(&mut config, &args)?;

    let provisioner = config
        .provisioner
        .as_ref()
        .context("deploy needs a [provisioner] section")?;
    let api_key = provisioner
        .api_key()
        .context("no MAAS API key in config or STAGEHAND_MAAS_API_KEY")?;
    let maas = MaasClient::new(&provisioner.url, &api_key)
        .context("invalid provisioner settings")?
        .with_timeout(provisioner.timeout());

    let token = config.deployment.token.clone().unwrap_or_else(generate_token);
    let settings = DeploymentSettings::from_config(&config, &token);
    info!(%token, hosts_file = ?settings.hosts_file, "starting deployment");

    let deployment = Deployment::new(settings, super::orchestrator(&config), Arc::new(maas));
    let run = deployment.deploy();
    tokio::pin!(run);
    let finished = tokio::select! {
        result = &mut run => Some(result),
        _ = tokio::signal::ctrl_c() => None,
    };
    let result = match finished {
        Some(result) => result,
        None => {
            warn!(%token, "interrupted, stopping reconciliation and leaving the deployment as is");
            deployment.cancel();
            run.await
        }
    };
    match result {
        Err(ReconcileError::Cancelled) => anyhow::bail!("interrupted"),
        result => result?,
    }
    info!(%token, "deployment complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn flags_override_file_values() {
        let mut config: StagehandConfig = toml::from_str("[retry]\nunit = 5\n").unwrap();
        let args = DeployArgs {
            token: Some("abc".into()),
            machine_retries: Some(1),
            deadline: Some("30m".into()),
            ..Default::default()
        };
        apply_overrides(&mut config, &args).unwrap();

        assert_eq!(config.deployment.token.as_deref(), Some("abc"));
        assert_eq!(config.retry.unit, 5);
        assert_eq!(config.retry.machine, 1);
        assert_eq!(config.deadline(), Duration::from_secs(30 * 60));
    }

    #[test]
    fn bad_deadline_is_rejected() {
        let mut config = StagehandConfig::default();
        let args = DeployArgs {
            deadline: Some("tomorrow".into()),
            ..Default::default()
        };
        assert!(apply_overrides(&mut config, &args).is_err());
        assert_eq!(config.deployment.deadline, "2h");
    }

    #[tokio::test]
    async fn deploy_without_provisioner_fails_early() {
        let err = deploy(StagehandConfig::default(), DeployArgs::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("[provisioner]"));
    }
}
