//! stagehand.toml configuration parser.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable that overrides `provisioner.api_key`.
pub const MAAS_API_KEY_ENV: &str = "STAGEHAND_MAAS_API_KEY";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StagehandConfig {
    #[serde(default)]
    pub deployment: DeploymentConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub intervals: IntervalsConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    pub provisioner: Option<ProvisionerConfig>,
    #[serde(default, rename = "application")]
    pub applications: Vec<ApplicationConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentConfig {
    /// Bundle submitted to the orchestrator before watching starts.
    pub bundle: Option<PathBuf>,
    /// Correlation token; generated when absent.
    pub token: Option<String>,
    /// Overall convergence deadline ("2h", "90m", "600s").
    #[serde(default = "default_deadline")]
    pub deadline: String,
    /// Working directory for generated artifacts. Defaults to `~/.stagehand`.
    pub workdir: Option<PathBuf>,
    /// Hosts file path. Defaults to `{workdir}/{token}.hosts`.
    pub hosts_file: Option<PathBuf>,
}

impl Default for DeploymentConfig {
    fn default() -> Self {
        Self {
            bundle: None,
            token: None,
            deadline: default_deadline(),
            workdir: None,
            hosts_file: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Resolve-in-place attempts per unit.
    #[serde(default = "default_retries")]
    pub unit: u32,
    /// Machine replacements per application.
    #[serde(default = "default_retries")]
    pub machine: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            unit: default_retries(),
            machine: default_retries(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntervalsConfig {
    /// Provisioner node status poll.
    #[serde(default = "default_node_poll")]
    pub node_poll: String,
    /// Orchestrator status poll used to synthesise the delta stream.
    #[serde(default = "default_watch_poll")]
    pub watch_poll: String,
    /// Completion watcher poll.
    #[serde(default = "default_completion_poll")]
    pub completion_poll: String,
}

impl Default for IntervalsConfig {
    fn default() -> Self {
        Self {
            node_poll: default_node_poll(),
            watch_poll: default_watch_poll(),
            completion_poll: default_completion_poll(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    #[serde(default = "default_juju_bin")]
    pub juju_bin: String,
    pub model: Option<String>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            juju_bin: default_juju_bin(),
            model: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisionerConfig {
    /// MAAS base URL, e.g. `http://maas.local:5240/MAAS`.
    pub url: String,
    /// `consumer_key:token_key:token_secret`.
    pub api_key: Option<String>,
    /// Per-request timeout.
    #[serde(default = "default_request_timeout")]
    pub timeout: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationConfig {
    pub name: String,
    /// Placement tag used when a replacement machine is allocated.
    pub tag: Option<String>,
}

impl ApplicationConfig {
    /// Name of the application as deployed under `token`.
    pub fn deployed_name(&self, token: &str) -> String {
        if self.name.contains(token) {
            self.name.clone()
        } else {
            format!("{}-{token}", self.name)
        }
    }
}

impl StagehandConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: StagehandConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Reject values that would only fail later, deep inside a run.
    pub fn validate(&self) -> anyhow::Result<()> {
        for (field, value) in [
            ("deployment.deadline", &self.deployment.deadline),
            ("intervals.node_poll", &self.intervals.node_poll),
            ("intervals.watch_poll", &self.intervals.watch_poll),
            ("intervals.completion_poll", &self.intervals.completion_poll),
        ] {
            if parse_duration(value).is_none() {
                anyhow::bail!("invalid duration for {field}: {value:?}");
            }
        }
        if let Some(p) = &self.provisioner {
            if parse_duration(&p.timeout).is_none() {
                anyhow::bail!("invalid duration for provisioner.timeout: {:?}", p.timeout);
            }
        }
        Ok(())
    }

    pub fn deadline(&self) -> Duration {
        parse_duration(&self.deployment.deadline).unwrap_or(Duration::from_secs(2 * 3600))
    }

    pub fn node_poll(&self) -> Duration {
        parse_duration(&self.intervals.node_poll).unwrap_or(Duration::from_secs(5))
    }

    pub fn watch_poll(&self) -> Duration {
        parse_duration(&self.intervals.watch_poll).unwrap_or(Duration::from_secs(3))
    }

    pub fn completion_poll(&self) -> Duration {
        parse_duration(&self.intervals.completion_poll).unwrap_or(Duration::from_secs(5))
    }

    pub fn workdir(&self) -> PathBuf {
        self.deployment.workdir.clone().unwrap_or_else(|| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".stagehand")
        })
    }

    pub fn hosts_file(&self, token: &str) -> PathBuf {
        self.deployment
            .hosts_file
            .clone()
            .unwrap_or_else(|| self.workdir().join(format!("{token}.hosts")))
    }

    /// Placement tags keyed by deployed application name.
    pub fn application_tags(&self, token: &str) -> Vec<(String, String)> {
        self.applications
            .iter()
            .filter_map(|app| app.tag.clone().map(|tag| (app.deployed_name(token), tag)))
            .collect()
    }
}

impl ProvisionerConfig {
    /// The API key, preferring the environment over the file.
    pub fn api_key(&self) -> Option<String> {
        std::env::var(MAAS_API_KEY_ENV)
            .ok()
            .filter(|k| !k.is_empty())
            .or_else(|| self.api_key.clone())
    }

    pub fn timeout(&self) -> Duration {
        parse_duration(&self.timeout).unwrap_or(Duration::from_secs(10))
    }
}

/// Parse a duration string like "5s", "500ms", "2m", "1h".
///
/// A bare number is read as seconds.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(ms) = s.strip_suffix("ms") {
        ms.parse::<u64>().ok().map(Duration::from_millis)
    } else if let Some(secs) = s.strip_suffix('s') {
        secs.parse::<u64>().ok().map(Duration::from_secs)
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.parse::<u64>().ok().map(|m| Duration::from_secs(m * 60))
    } else if let Some(hours) = s.strip_suffix('h') {
        hours.parse::<u64>().ok().map(|h| Duration::from_secs(h * 3600))
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}

fn default_deadline() -> String {
    "2h".to_string()
}

fn default_retries() -> u32 {
    3
}

fn default_node_poll() -> String {
    "5s".to_string()
}

fn default_watch_poll() -> String {
    "3s".to_string()
}

fn default_completion_poll() -> String {
    "5s".to_string()
}

fn default_juju_bin() -> String {
    "juju".to_string()
}

fn default_request_timeout() -> String {
    "10s".to_string()
}
