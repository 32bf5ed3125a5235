//! Artifact store abstraction.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::git::CommitHash;
use crate::{Result, StageDigest, StageRecord};

/// Trait for stage storage backends.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Name of this backend, for logs.
    fn name(&self) -> &'static str;

    /// List every stage known to the store.
    async fn list_stages(&self) -> Result<Vec<StageRecord>>;

    /// Stages built from the given commit.
    async fn commit_to_stages(&self, commit: &CommitHash) -> Result<Vec<StageDigest>>;

    /// Delete a stage.
    async fn delete(&self, digest: &StageDigest) -> Result<()>;
}

/// Statistics from a deletion pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PruneStats {
    pub stages_deleted: u64,
    pub stages_failed: u64,
}
