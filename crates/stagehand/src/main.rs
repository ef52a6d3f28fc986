//! stagehand — drive a Juju deployment on MAAS to convergence.
//!
//! # Usage
//!
//! ```text
//! stagehand deploy --config stagehand.toml --bundle bundle.yaml
//! stagehand teardown --config stagehand.toml --token 3f9a0c12be44
//! stagehand pool --tags "hyperv ci" --series trusty --min 4
//! ```

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

mod commands;

#[derive(Parser)]
#[command(
    name = "stagehand",
    about = "Deploy, reconcile, and tear down Juju environments on MAAS",
    version,
    propagate_version = true
)]
struct Cli {
    /// Path to stagehand.toml. Built-in defaults apply when omitted.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log output format.
    #[arg(long, global = true, value_enum, default_value = "text")]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit a bundle and reconcile until every unit is active.
    Deploy(commands::deploy::DeployArgs),
    /// Destroy every application and machine of a deployment.
    Teardown {
        /// Correlation token of the deployment to remove.
        #[arg(short, long)]
        token: String,
    },
    /// Keep a minimum number of idle tagged machines available.
    Pool {
        /// Space separated tags every pooled machine must carry.
        #[arg(long)]
        tags: String,
        #[arg(long, default_value = "trusty")]
        series: String,
        #[arg(long)]
        min: usize,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,stagehand=debug"));
    match cli.log_format {
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
        LogFormat::Json => tracing_subscriber::fmt().json().with_env_filter(filter).init(),
    }

    let config = commands::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Deploy(args) => commands::deploy::deploy(config, args).await,
        Commands::Teardown { token } => commands::teardown::teardown(config, &token).await,
        Commands::Pool { tags, series, min } => commands::pool::pool(config, &series, &tags, min).await,
    }
}
