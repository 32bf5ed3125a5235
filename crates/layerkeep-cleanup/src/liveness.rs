//! Keeps stages used by live workloads.

use layerkeep_core::Result;
use layerkeep_core::live::LiveImageProvider;
use tracing::debug;

use crate::KeepSet;
use crate::engine::StageIndex;

/// Stages of the store whose digest the provider reports as live.
pub async fn keep_live(provider: &dyn LiveImageProvider, stages: &StageIndex) -> Result<KeepSet> {
    let live = provider.list_live_digests().await?;
    debug!(provider = provider.name(), live = live.len(), "Fetched live image digests");

    Ok(live
        .into_iter()
        .filter(|digest| stages.contains_key(digest))
        .collect())
}
