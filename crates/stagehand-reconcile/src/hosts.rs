//! Hosts file: `APPLICATION_NAME=ip[,ip...]` per application.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use stagehand_orchestrator::Orchestrator;
use stagehand_state::StateStore;

use crate::error::ReconcileResult;

/// Where the application → address mapping is persisted.
#[derive(Debug, Clone)]
pub struct HostsFile {
    path: PathBuf,
    token: String,
    lookup_timeout: Duration,
}

impl HostsFile {
    pub fn new(path: impl Into<PathBuf>, token: &str) -> Self {
        Self {
            path: path.into(),
            token: token.to_string(),
            lookup_timeout: Duration::from_secs(30),
        }
    }

    /// Cap on a single private address lookup.
    pub fn with_lookup_timeout(mut self, timeout: Duration) -> Self {
        self.lookup_timeout = timeout;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Refresh the file every time `requests` is signalled.
    ///
    /// Requests arriving during a refresh collapse into one follow-up
    /// refresh. Returns once every sender is dropped.
    pub async fn run(
        self,
        store: StateStore,
        orchestrator: Arc<dyn Orchestrator>,
        mut requests: watch::Receiver<()>,
    ) -> ReconcileResult<()> {
        info!(path = %self.path.display(), "maintaining hosts file");
        while requests.changed().await.is_ok() {
            self.refresh(&store, orchestrator.as_ref()).await;
        }
        debug!(path = %self.path.display(), "hosts refresh requests closed");
        Ok(())
    }

    /// Look up every cached unit's private address and rewrite the file.
    ///
    /// Failed or timed out lookups and a failed write are logged and
    /// skipped. Returns the number of addresses written.
    pub async fn refresh(&self, store: &StateStore, orchestrator: &dyn Orchestrator) -> usize {
        let mut entries: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for unit in store.snapshot() {
            let lookup = orchestrator.private_address(&unit.name);
            match tokio::time::timeout(self.lookup_timeout, lookup).await {
                Ok(Ok(address)) => entries
                    .entry(host_key(&unit.application, &self.token))
                    .or_default()
                    .push(address),
                Ok(Err(e)) => warn!(unit = %unit.name, error = %e, "private address lookup failed"),
                Err(_) => warn!(
                    unit = %unit.name,
                    timeout = ?self.lookup_timeout,
                    "private address lookup timed out"
                ),
            }
        }

        let count = entries.values().map(Vec::len).sum();
        if let Err(e) = self.write(&entries).await {
            warn!(path = %self.path.display(), error = %e, "failed to write hosts file");
            return 0;
        }
        debug!(path = %self.path.display(), addresses = count, "hosts file refreshed");
        count
    }

    /// Replace the file contents with `entries`.
    pub async fn write(&self, entries: &BTreeMap<String, Vec<String>>) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, render(entries)).await?;
        tokio::fs::rename(&tmp, &self.path).await
    }
}

/// Variable name for an application: token suffix removed, upper-cased,
/// dashes turned into underscores.
pub fn host_key(application: &str, token: &str) -> String {
    let suffix = format!("-{token}");
    let base = application.strip_suffix(&suffix).unwrap_or(application);
    base.to_uppercase().replace('-', "_")
}

pub fn render(entries: &BTreeMap<String, Vec<String>>) -> String {
    entries
        .iter()
        .filter(|(_, addresses)| !addresses.is_empty())
        .map(|(key, addresses)| format!("{key}={}\n", addresses.join(",")))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_key_strips_token() {
        assert_eq!(host_key("hyper-v-ci-abc123", "abc123"), "HYPER_V_CI");
        assert_eq!(host_key("devstack-abc123", "abc123"), "DEVSTACK");
        assert_eq!(host_key("active-directory", "abc123"), "ACTIVE_DIRECTORY");
    }

    #[test]
    fn render_lines() {
        let mut entries = BTreeMap::new();
        entries.insert("DEVSTACK".to_string(), vec!["10.0.0.1".to_string()]);
        entries.insert(
            "HYPER_V".to_string(),
            vec!["10.0.0.2".to_string(), "10.0.0.3".to_string()],
        );
        entries.insert("EMPTY".to_string(), vec![]);
        assert_eq!(
            render(&entries),
            "DEVSTACK=10.0.0.1\nHYPER_V=10.0.0.2,10.0.0.3\n"
        );
    }

    #[tokio::test]
    async fn write_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("tok.hosts");
        let hosts = HostsFile::new(&path, "tok");

        let mut entries = BTreeMap::new();
        entries.insert("SVC".to_string(), vec!["10.1.1.1".to_string()]);
        hosts.write(&entries).await.unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, "SVC=10.1.1.1\n");
    }
}
