//! Retention decision engine.
//!
//! Combines the keep sets of every enabled policy, expands them along stage
//! dependency edges and derives the deletion plan.

use chrono::{DateTime, Utc};
use layerkeep_config::CleanupConfig;
use layerkeep_core::artifact::ArtifactStore;
use layerkeep_core::git::GitRepository;
use layerkeep_core::live::LiveImageProvider;
use layerkeep_core::{CancelToken, StageDigest, StageMetadata, StageRecord};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

use crate::history::DEFAULT_CONCURRENCY;
use crate::liveness::keep_live;
use crate::recency::keep_recent;
use crate::{CleanupError, CommitGraphCache, HistoryEvaluator, KeepSet};

/// Stages of the store keyed by digest.
pub type StageIndex = HashMap<StageDigest, StageMetadata>;

pub fn index_stages(records: impl IntoIterator<Item = StageRecord>) -> StageIndex {
    records
        .into_iter()
        .map(|record| (record.digest, record.metadata))
        .collect()
}

/// Number of stages each policy asked to keep.
///
/// A stage kept by several policies is counted by each of them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct KeptBy {
    pub git_history: usize,
    pub kubernetes: usize,
    pub recency: usize,
    /// Stages kept only because a kept stage depends on them.
    pub dependencies: usize,
}

/// Outcome of one evaluation. Digest lists are sorted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CleanupPlan {
    pub evaluated_at: DateTime<Utc>,
    pub cleanup_disabled: bool,
    pub total_stages: usize,
    pub keep: Vec<StageDigest>,
    pub delete: Vec<StageDigest>,
    pub kept_by: KeptBy,
}

impl CleanupPlan {
    fn disabled(evaluated_at: DateTime<Utc>) -> Self {
        Self {
            evaluated_at,
            cleanup_disabled: true,
            total_stages: 0,
            keep: Vec::new(),
            delete: Vec::new(),
            kept_by: KeptBy::default(),
        }
    }
}

/// Expand `seed` along parent and import-source edges to a fixed point.
pub fn dependency_closure(seed: &KeepSet, stages: &StageIndex) -> KeepSet {
    let mut closure = seed.clone();
    let mut pending: Vec<StageDigest> = seed.iter().cloned().collect();

    while let Some(digest) = pending.pop() {
        let Some(metadata) = stages.get(&digest) else {
            continue;
        };
        for dependency in metadata.dependencies() {
            if closure.insert(dependency.clone()) {
                pending.push(dependency.clone());
            }
        }
    }

    closure
}

pub struct RetentionEngine {
    config: CleanupConfig,
    store: Arc<dyn ArtifactStore>,
    history: Option<HistoryEvaluator<Box<dyn GitRepository>>>,
    live_images: Option<Arc<dyn LiveImageProvider>>,
    concurrency: usize,
}

impl RetentionEngine {
    pub fn new(config: CleanupConfig, store: Arc<dyn ArtifactStore>) -> Self {
        Self {
            config,
            store,
            history: None,
            live_images: None,
            concurrency: DEFAULT_CONCURRENCY,
        }
    }

    /// Repository the git history policies walk.
    pub fn with_repository<R: GitRepository + 'static>(mut self, repository: R) -> Self {
        let repository: Box<dyn GitRepository> = Box::new(repository);
        let cache = Arc::new(CommitGraphCache::new(repository));
        self.history =
            Some(HistoryEvaluator::new(cache, self.store.clone()).with_concurrency(self.concurrency));
        self
    }

    pub fn with_live_images(mut self, provider: Arc<dyn LiveImageProvider>) -> Self {
        self.live_images = Some(provider);
        self
    }

    /// Maximum number of reference walks running at once.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self.history = self
            .history
            .take()
            .map(|history| history.with_concurrency(self.concurrency));
        self
    }

    pub fn config(&self) -> &CleanupConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn ArtifactStore> {
        &self.store
    }

    /// Forget cached commits, e.g. after the repository was fetched.
    pub fn clear_commit_cache(&self) {
        if let Some(history) = &self.history {
            history.cache().clear();
        }
    }

    /// Evaluate every enabled policy and derive the deletion plan.
    ///
    /// Nothing is deleted here. Any policy failure aborts the evaluation.
    pub async fn compute_plan(
        &self,
        now: DateTime<Utc>,
        cancel: &CancelToken,
    ) -> Result<CleanupPlan, CleanupError> {
        if self.config.disable_cleanup {
            info!("Cleanup disabled by configuration");
            return Ok(CleanupPlan::disabled(now));
        }

        let history = self.history_evaluator()?;
        let live_images = self.live_image_provider()?;
        cancel.check().map_err(|_| CleanupError::Cancelled)?;

        let records = self.store.list_stages().await.map_err(|source| {
            CleanupError::Store {
                store: self.store.name(),
                source,
            }
            .normalize()
        })?;
        let stages = index_stages(records);
        info!(store = self.store.name(), stages = stages.len(), "Listed stages");

        let mut keep = KeepSet::new();
        let mut kept_by = KeptBy::default();

        if self.config.recency_policy_enabled() {
            let recent = keep_recent(&stages, self.config.recency_window(), now);
            kept_by.recency = recent.len();
            keep.union_with(recent);
        }

        if let Some(provider) = live_images {
            cancel.check().map_err(|_| CleanupError::Cancelled)?;
            let live = keep_live(provider.as_ref(), &stages)
                .await
                .map_err(|source| {
                    CleanupError::Liveness {
                        provider: provider.name(),
                        source,
                    }
                    .normalize()
                })?;
            kept_by.kubernetes = live.len();
            keep.union_with(live);
        }

        if let Some(history) = history {
            let kept = history
                .evaluate(&self.config.keep_policies, &stages, now, cancel)
                .await?;
            kept_by.git_history = kept.len();
            keep.union_with(kept);
        }

        let seeded = keep.iter().filter(|d| stages.contains_key(*d)).count();
        let closure = dependency_closure(&keep, &stages);
        let keep: Vec<StageDigest> = closure
            .iter()
            .filter(|digest| stages.contains_key(*digest))
            .cloned()
            .collect();
        kept_by.dependencies = keep.len() - seeded;

        let mut delete: Vec<StageDigest> = stages
            .keys()
            .filter(|digest| !closure.contains(digest))
            .cloned()
            .collect();
        delete.sort();

        debug!(?kept_by, "Policy evaluation finished");
        info!(
            keep = keep.len(),
            delete = delete.len(),
            "Computed cleanup plan"
        );

        Ok(CleanupPlan {
            evaluated_at: now,
            cleanup_disabled: false,
            total_stages: stages.len(),
            keep,
            delete,
            kept_by,
        })
    }

    fn history_evaluator(
        &self,
    ) -> Result<Option<&HistoryEvaluator<Box<dyn GitRepository>>>, CleanupError> {
        if !self.config.git_history_policy_enabled() || self.config.keep_policies.is_empty() {
            return Ok(None);
        }
        self.history
            .as_ref()
            .map(Some)
            .ok_or(CleanupError::MissingCollaborator {
                policy: "git history",
                collaborator: "git repository",
            })
    }

    fn live_image_provider(&self) -> Result<Option<&Arc<dyn LiveImageProvider>>, CleanupError> {
        if !self.config.kubernetes_policy_enabled() {
            return Ok(None);
        }
        self.live_images
            .as_ref()
            .map(Some)
            .ok_or(CleanupError::MissingCollaborator {
                policy: "kubernetes",
                collaborator: "live image provider",
            })
    }
}
