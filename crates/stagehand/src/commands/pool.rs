//! `stagehand pool`.

use tracing::info;

use stagehand_core::StagehandConfig;
use stagehand_reconcile::{NodePool, PoolTarget};

pub async fn pool(config: StagehandConfig, series: &str, tags: &str, min: usize) -> anyhow::Result<()> {
    let target = PoolTarget::new(series, tags, min);
    if target.tags.is_empty() {
        anyhow::bail!("--tags must name at least one tag");
    }
    let added = NodePool::new(super::orchestrator(&config)).ensure(&target).await?;
    info!(added, "node pool up to date");
    Ok(())
}
