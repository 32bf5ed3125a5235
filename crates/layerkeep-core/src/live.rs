//! Live image reference abstraction.

use async_trait::async_trait;
use std::collections::HashSet;

use crate::{Result, StageDigest};

/// Source of stage digests currently used by running workloads.
#[async_trait]
pub trait LiveImageProvider: Send + Sync {
    fn name(&self) -> &'static str;

    /// Digests referenced by live workloads.
    async fn list_live_digests(&self) -> Result<HashSet<StageDigest>>;
}
