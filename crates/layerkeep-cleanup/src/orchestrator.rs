//! Cleanup orchestrator - evaluates retention, then deletes what nothing keeps.

use chrono::{DateTime, Utc};
use futures::StreamExt;
use layerkeep_core::artifact::PruneStats;
use layerkeep_core::{CancelToken, Error, StageDigest};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::{CleanupError, CleanupPlan, RetentionEngine};

/// Default number of deletions in flight.
pub const DEFAULT_DELETE_CONCURRENCY: usize = 8;

/// A stage the store refused to delete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeletionFailure {
    pub digest: StageDigest,
    pub message: String,
}

/// Result of a cleanup run.
#[derive(Debug, Clone, Serialize)]
pub struct CleanupReport {
    pub plan: CleanupPlan,
    pub dry_run: bool,
    pub deleted: Vec<StageDigest>,
    pub failed: Vec<DeletionFailure>,
    /// Set when cancellation stopped deletion part way; `deleted` still lists
    /// what was removed before that.
    pub cancelled: bool,
    pub stats: PruneStats,
}

impl CleanupReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty() && !self.cancelled
    }
}

/// Runs the retention engine and applies its plan to the artifact store.
pub struct CleanupOrchestrator {
    engine: RetentionEngine,
    dry_run: bool,
    concurrency: usize,
}

impl CleanupOrchestrator {
    pub fn new(engine: RetentionEngine) -> Self {
        Self {
            engine,
            dry_run: false,
            concurrency: DEFAULT_DELETE_CONCURRENCY,
        }
    }

    /// Compute the plan but never delete.
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn engine(&self) -> &RetentionEngine {
        &self.engine
    }

    pub async fn plan(&self, cancel: &CancelToken) -> Result<CleanupPlan, CleanupError> {
        self.plan_at(Utc::now(), cancel).await
    }

    pub async fn plan_at(
        &self,
        now: DateTime<Utc>,
        cancel: &CancelToken,
    ) -> Result<CleanupPlan, CleanupError> {
        self.engine.compute_plan(now, cancel).await
    }

    pub async fn run(&self, cancel: &CancelToken) -> Result<CleanupReport, CleanupError> {
        self.run_at(Utc::now(), cancel).await
    }

    /// Evaluate every policy, then delete the planned stages.
    ///
    /// Deletion starts only after evaluation succeeded as a whole. Stages the
    /// store fails to delete are reported, not retried. Cancellation before
    /// deletion is an error; once deletions started it yields a report marked
    /// `cancelled`.
    pub async fn run_at(
        &self,
        now: DateTime<Utc>,
        cancel: &CancelToken,
    ) -> Result<CleanupReport, CleanupError> {
        let plan = self.engine.compute_plan(now, cancel).await?;
        cancel.check().map_err(|_| CleanupError::Cancelled)?;

        let mut report = CleanupReport {
            plan,
            dry_run: self.dry_run,
            deleted: Vec::new(),
            failed: Vec::new(),
            cancelled: false,
            stats: PruneStats::default(),
        };

        if self.dry_run {
            info!(
                would_delete = report.plan.delete.len(),
                "Dry run, skipping deletion"
            );
            return Ok(report);
        }
        if report.plan.delete.is_empty() {
            info!("Nothing to delete");
            return Ok(report);
        }

        let store = self.engine.store().clone();
        info!(
            store = store.name(),
            stages = report.plan.delete.len(),
            concurrency = self.concurrency,
            "Deleting stages"
        );

        let results: Vec<(StageDigest, Result<(), Error>)> =
            futures::stream::iter(report.plan.delete.clone())
                .map(|digest| {
                    let store = store.clone();
                    let cancel = cancel.clone();
                    async move {
                        if let Err(e) = cancel.check() {
                            return (digest, Err(e));
                        }
                        let result = store.delete(&digest).await;
                        (digest, result)
                    }
                })
                .buffer_unordered(self.concurrency)
                .collect()
                .await;

        for (digest, result) in results {
            match result {
                Ok(()) => {
                    info!(stage = %digest, "Deleted stage");
                    report.deleted.push(digest);
                }
                Err(Error::Cancelled) => report.cancelled = true,
                Err(e) => {
                    error!(stage = %digest, error = %e, "Failed to delete stage");
                    report.failed.push(DeletionFailure {
                        digest,
                        message: e.to_string(),
                    });
                }
            }
        }

        report.deleted.sort();
        report.failed.sort_by(|a, b| a.digest.cmp(&b.digest));
        report.stats.stages_deleted = report.deleted.len() as u64;
        report.stats.stages_failed = report.failed.len() as u64;

        if report.cancelled {
            warn!(
                deleted = report.stats.stages_deleted,
                failed = report.stats.stages_failed,
                "Cleanup cancelled during deletion"
            );
            return Ok(report);
        }

        info!(
            deleted = report.stats.stages_deleted,
            failed = report.stats.stages_failed,
            "Cleanup finished"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use crate::testing::{
        FakeRepository, MemoryStore, StaticLiveImages, base_time, days_ago, minutes_ago, stage,
        stage_at_commit,
    };
    use layerkeep_config::{CleanupConfig, KeepPolicy, ReferenceMatcher, ReferencePolicy};
    use layerkeep_core::artifact::ArtifactStore;
    use layerkeep_core::git::{CommitHash, ReferenceKind};
    use layerkeep_core::{Result, StageRecord};
    use std::sync::Arc;

    fn only_recency() -> CleanupConfig {
        CleanupConfig {
            disable_git_history_based_policy: true,
            disable_kubernetes_based_policy: true,
            ..Default::default()
        }
    }

    fn old_stages() -> Vec<StageRecord> {
        vec![
            stage("a", days_ago(5)),
            stage("b", days_ago(5)),
            stage("c", days_ago(5)),
            stage("fresh", minutes_ago(5)),
        ]
    }

    #[tokio::test]
    async fn test_run_deletes_unkept_stages() {
        let repo = FakeRepository::new()
            .commit("c-tag", &[], days_ago(3))
            .commit("c-main", &["c-tag"], minutes_ago(10))
            .branch("main", "c-main")
            .tag("v1.0", "c-tag");
        let store = Arc::new(MemoryStore::new(vec![
            stage_at_commit("S1", "c-main", minutes_ago(10)),
            stage_at_commit("S2", "c-tag", days_ago(3)),
        ]));
        let config = CleanupConfig {
            disable_kubernetes_based_policy: true,
            keep_policies: vec![KeepPolicy::new(ReferencePolicy::new(
                ReferenceKind::Branch,
                ReferenceMatcher::new("main").unwrap(),
            ))],
            ..Default::default()
        };
        let engine = RetentionEngine::new(config, store.clone()).with_repository(repo);

        let report = CleanupOrchestrator::new(engine)
            .run_at(base_time(), &CancelToken::new())
            .await
            .unwrap();

        assert_eq!(report.deleted, vec![StageDigest::from("S2")]);
        assert_eq!(store.deleted(), vec![StageDigest::from("S2")]);
        assert_eq!(report.stats.stages_deleted, 1);
        assert!(report.is_success());
    }

    #[tokio::test]
    async fn test_evaluation_error_deletes_nothing() {
        let store = Arc::new(MemoryStore::new(old_stages()));
        let config = CleanupConfig {
            disable_git_history_based_policy: true,
            ..Default::default()
        };
        let engine = RetentionEngine::new(config, store.clone())
            .with_live_images(Arc::new(StaticLiveImages::failing()));

        let result = CleanupOrchestrator::new(engine)
            .run_at(base_time(), &CancelToken::new())
            .await;

        assert!(result.is_err());
        assert!(store.deleted().is_empty());
    }

    #[tokio::test]
    async fn test_dry_run_keeps_everything() {
        let store = Arc::new(MemoryStore::new(old_stages()));
        let engine = RetentionEngine::new(only_recency(), store.clone());

        let report = CleanupOrchestrator::new(engine)
            .with_dry_run(true)
            .run_at(base_time(), &CancelToken::new())
            .await
            .unwrap();

        assert!(report.dry_run);
        assert_eq!(report.plan.delete.len(), 3);
        assert!(report.deleted.is_empty());
        assert!(store.deleted().is_empty());
    }

    #[tokio::test]
    async fn test_deletion_failures_are_reported() {
        let store = Arc::new(MemoryStore::new(old_stages()).with_failing_delete("b"));
        let engine = RetentionEngine::new(only_recency(), store.clone());

        let report = CleanupOrchestrator::new(engine)
            .with_concurrency(2)
            .run_at(base_time(), &CancelToken::new())
            .await
            .unwrap();

        assert_eq!(
            report.deleted,
            vec![StageDigest::from("a"), StageDigest::from("c")]
        );
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].digest.as_str(), "b");
        assert!(report.failed[0].message.contains("cannot delete b"));
        assert_eq!(report.stats.stages_failed, 1);
        assert!(!report.is_success());
    }

    #[tokio::test]
    async fn test_cancelled_run_deletes_nothing() {
        let store = Arc::new(MemoryStore::new(old_stages()));
        let engine = RetentionEngine::new(only_recency(), store.clone());
        let cancel = CancelToken::new();
        cancel.cancel();

        let err = CleanupOrchestrator::new(engine)
            .run_at(base_time(), &cancel)
            .await
            .unwrap_err();

        assert!(err.is_cancelled());
        assert!(store.deleted().is_empty());
    }

    /// Cancels the run as soon as the first deletion goes through.
    struct CancellingStore {
        inner: MemoryStore,
        cancel: CancelToken,
    }

    #[async_trait]
    impl ArtifactStore for CancellingStore {
        fn name(&self) -> &'static str {
            "cancelling"
        }

        async fn list_stages(&self) -> Result<Vec<StageRecord>> {
            self.inner.list_stages().await
        }

        async fn commit_to_stages(&self, commit: &CommitHash) -> Result<Vec<StageDigest>> {
            self.inner.commit_to_stages(commit).await
        }

        async fn delete(&self, digest: &StageDigest) -> Result<()> {
            self.cancel.cancel();
            self.inner.delete(digest).await
        }
    }

    #[tokio::test]
    async fn test_cancellation_stops_further_deletions() {
        let cancel = CancelToken::new();
        let store = Arc::new(CancellingStore {
            inner: MemoryStore::new(old_stages()),
            cancel: cancel.clone(),
        });
        let engine = RetentionEngine::new(only_recency(), store.clone());

        let report = CleanupOrchestrator::new(engine)
            .with_concurrency(1)
            .run_at(base_time(), &cancel)
            .await
            .unwrap();

        assert!(report.cancelled);
        assert!(!report.is_success());
        assert_eq!(report.deleted, vec![StageDigest::from("a")]);
        assert_eq!(report.deleted, store.inner.deleted());
        assert_eq!(report.stats.stages_deleted, 1);
        assert!(report.failed.is_empty());
    }

    #[tokio::test]
    async fn test_report_serializes_plan() {
        let store = Arc::new(MemoryStore::new(old_stages()));
        let engine = RetentionEngine::new(only_recency(), store);

        let report = CleanupOrchestrator::new(engine)
            .with_dry_run(true)
            .run_at(base_time(), &CancelToken::new())
            .await
            .unwrap();
        let json = serde_json::to_value(&report).unwrap();

        assert_eq!(json["plan"]["delete"], serde_json::json!(["a", "b", "c"]));
        assert_eq!(json["plan"]["keep"], serde_json::json!(["fresh"]));
        assert_eq!(json["plan"]["kept_by"]["recency"], 1);
    }
}
