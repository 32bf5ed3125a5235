//! Stage retention engine for layerkeep.
//!
//! Decides which built stages must survive cleanup:
//! - git history keep policies, walked through a shared commit cache
//! - stages used by live Kubernetes workloads
//! - stages built within the last N hours
//!
//! The union of all keep sets is expanded along parent and import-source
//! edges before the deletion plan is derived.

pub mod commit_cache;
pub mod engine;
pub mod error;
pub mod history;
pub mod keep;
pub mod liveness;
pub mod orchestrator;
pub mod recency;

#[cfg(test)]
pub(crate) mod testing;

pub use commit_cache::CommitGraphCache;
pub use engine::{CleanupPlan, KeptBy, RetentionEngine, StageIndex};
pub use error::CleanupError;
pub use history::HistoryEvaluator;
pub use keep::KeepSet;
pub use orchestrator::{CleanupOrchestrator, CleanupReport, DeletionFailure};
