//! Juju CLI adapter.
//!
//! Drives the `juju` binary for every orchestrator operation. The delta
//! stream is synthesised by polling `juju status --format=json` and diffing
//! consecutive snapshots, so batches arrive in the order the orchestrator's
//! state evolved.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::{debug, trace};

use stagehand_core::BoxFuture;

use crate::client::{Constraints, DeltaStream, Orchestrator};
use crate::delta::{Delta, diff};
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::status::StatusSnapshot;

/// Orchestrator backed by the `juju` command line client.
#[derive(Debug, Clone)]
pub struct JujuCli {
    bin: String,
    model: Option<String>,
    poll_interval: Duration,
}

struct CommandOutput {
    stdout: String,
    stderr: String,
}

impl JujuCli {
    pub fn new(bin: impl Into<String>) -> Self {
        Self {
            bin: bin.into(),
            model: None,
            poll_interval: Duration::from_secs(3),
        }
    }

    /// Target a specific model instead of the current one.
    pub fn with_model(mut self, model: Option<String>) -> Self {
        self.model = model;
        self
    }

    /// Interval between status polls of the watch stream.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    fn command_args(&self, subcommand: &str, rest: &[&str]) -> Vec<String> {
        let mut args = vec![subcommand.to_string()];
        if let Some(model) = &self.model {
            args.push("-m".to_string());
            args.push(model.clone());
        }
        args.extend(rest.iter().map(|s| s.to_string()));
        args
    }

    async fn run(&self, subcommand: &str, rest: &[&str]) -> OrchestratorResult<CommandOutput> {
        let args = self.command_args(subcommand, rest);
        let command = format!("{} {}", self.bin, args.join(" "));
        trace!(%command, "running orchestrator command");

        let output = Command::new(&self.bin)
            .args(&args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| OrchestratorError::Spawn {
                command: command.clone(),
                source,
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        if !output.status.success() {
            return Err(OrchestratorError::Command {
                command,
                code: output.status.code(),
                stderr: stderr.trim().to_string(),
            });
        }
        Ok(CommandOutput { stdout, stderr })
    }

    async fn fetch_status(&self, filter: Option<&str>) -> OrchestratorResult<StatusSnapshot> {
        let mut rest = vec!["--format=json"];
        if let Some(filter) = filter {
            rest.push(filter);
        }
        let out = self.run("status", &rest).await?;
        Ok(StatusSnapshot::from_json(&out.stdout)?)
    }
}

/// Extract the machine id from `add-machine` output (`created machine 5`).
pub fn parse_added_machine(output: &str) -> Option<String> {
    output
        .lines()
        .find_map(|line| line.trim().strip_prefix("created machine "))
        .and_then(|rest| rest.split_whitespace().next())
        .map(str::to_string)
}

/// Status filter matching every entity whose name contains `token`.
pub fn token_filter(token: &str) -> String {
    format!("*{token}*")
}

/// Polling delta stream over `juju status`.
struct JujuWatch {
    cli: JujuCli,
    previous: StatusSnapshot,
    primed: bool,
}

impl DeltaStream for JujuWatch {
    fn next_batch(&mut self) -> BoxFuture<'_, OrchestratorResult<Vec<Delta>>> {
        Box::pin(async move {
            loop {
                if self.primed {
                    tokio::time::sleep(self.cli.poll_interval).await;
                }
                self.primed = true;

                let next = self.cli.fetch_status(None).await?;
                let deltas = diff(&self.previous, &next);
                self.previous = next;
                if !deltas.is_empty() {
                    debug!(count = deltas.len(), "orchestrator deltas");
                    return Ok(deltas);
                }
            }
        })
    }
}

impl Orchestrator for JujuCli {
    fn watch(&self) -> BoxFuture<'_, OrchestratorResult<Box<dyn DeltaStream>>> {
        Box::pin(async move {
            let stream: Box<dyn DeltaStream> = Box::new(JujuWatch {
                cli: self.clone(),
                previous: StatusSnapshot::default(),
                primed: false,
            });
            Ok(stream)
        })
    }

    fn status<'a>(&'a self, filter: Option<&'a str>) -> BoxFuture<'a, OrchestratorResult<StatusSnapshot>> {
        Box::pin(async move {
            let pattern = filter.map(token_filter);
            self.fetch_status(pattern.as_deref()).await
        })
    }

    fn add_machine<'a>(
        &'a self,
        series: &'a str,
        constraints: &'a Constraints,
    ) -> BoxFuture<'a, OrchestratorResult<Option<String>>> {
        Box::pin(async move {
            let rendered = constraints.to_juju();
            let mut rest = vec!["--series", series];
            if !rendered.is_empty() {
                rest.push("--constraints");
                rest.push(rendered.as_str());
            }
            let out = self.run("add-machine", &rest).await?;
            // juju reports the new machine on stderr; older clients used stdout.
            Ok(parse_added_machine(&out.stderr).or_else(|| parse_added_machine(&out.stdout)))
        })
    }

    fn add_unit<'a>(&'a self, application: &'a str, machine_id: &'a str) -> BoxFuture<'a, OrchestratorResult<()>> {
        Box::pin(async move {
            self.run("add-unit", &[application, "--to", machine_id]).await?;
            Ok(())
        })
    }

    fn destroy_machines<'a>(&'a self, machine_ids: &'a [String], force: bool) -> BoxFuture<'a, OrchestratorResult<()>> {
        Box::pin(async move {
            if machine_ids.is_empty() {
                return Ok(());
            }
            let mut rest: Vec<&str> = Vec::with_capacity(machine_ids.len() + 1);
            if force {
                rest.push("--force");
            }
            rest.extend(machine_ids.iter().map(String::as_str));
            self.run("remove-machine", &rest).await?;
            Ok(())
        })
    }

    fn destroy_service<'a>(&'a self, application: &'a str) -> BoxFuture<'a, OrchestratorResult<()>> {
        Box::pin(async move {
            self.run("remove-application", &[application]).await?;
            Ok(())
        })
    }

    fn resolved<'a>(&'a self, unit: &'a str) -> BoxFuture<'a, OrchestratorResult<()>> {
        Box::pin(async move {
            self.run("resolved", &[unit]).await?;
            Ok(())
        })
    }

    fn private_address<'a>(&'a self, unit: &'a str) -> BoxFuture<'a, OrchestratorResult<String>> {
        Box::pin(async move {
            let out = self
                .run("exec", &["--unit", unit, "--", "unit-get", "private-address"])
                .await?;
            let address = out.stdout.trim();
            if address.is_empty() {
                return Err(OrchestratorError::UnexpectedOutput(format!(
                    "no private address reported for {unit}"
                )));
            }
            Ok(address.to_string())
        })
    }

    fn deploy_bundle<'a>(&'a self, bundle: &'a Path) -> BoxFuture<'a, OrchestratorResult<()>> {
        Box::pin(async move {
            let path = bundle.to_string_lossy();
            self.run("deploy", &[path.as_ref()]).await?;
            Ok(())
        })
    }
}
