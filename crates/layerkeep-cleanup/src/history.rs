//! Git-history keep policies.
//!
//! Each matched reference is walked from its tip in commit-time descending
//! order. Stages built from visited commits become candidates, and the
//! policy's per-reference limit decides which candidates are kept. Walks of
//! different references run as separate tasks sharing one commit cache.

use chrono::{DateTime, Utc};
use layerkeep_config::{KeepPolicy, Operator, RetentionLimit};
use layerkeep_core::artifact::ArtifactStore;
use layerkeep_core::git::{CommitObject, GitReference, GitRepository};
use layerkeep_core::{CancelToken, Error, Result, StageDigest};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info};

use crate::engine::StageIndex;
use crate::{CleanupError, CommitGraphCache, KeepSet};

/// Default number of reference walks running at once.
pub const DEFAULT_CONCURRENCY: usize = 4;

pub struct HistoryEvaluator<R> {
    cache: Arc<CommitGraphCache<R>>,
    store: Arc<dyn ArtifactStore>,
    concurrency: usize,
}

struct WalkJob {
    policy: usize,
    description: String,
    reference: GitReference,
    limit: RetentionLimit,
}

impl<R: GitRepository + 'static> HistoryEvaluator<R> {
    pub fn new(cache: Arc<CommitGraphCache<R>>, store: Arc<dyn ArtifactStore>) -> Self {
        Self {
            cache,
            store,
            concurrency: DEFAULT_CONCURRENCY,
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn cache(&self) -> &Arc<CommitGraphCache<R>> {
        &self.cache
    }

    /// Union of the stages kept by every policy.
    pub async fn evaluate(
        &self,
        policies: &[KeepPolicy],
        stages: &StageIndex,
        now: DateTime<Utc>,
        cancel: &CancelToken,
    ) -> std::result::Result<KeepSet, CleanupError> {
        let mut jobs = Vec::new();
        for (index, policy) in policies.iter().enumerate() {
            cancel.check().map_err(|_| CleanupError::Cancelled)?;

            let references = self.select_references(policy, now).await.map_err(|source| {
                CleanupError::References {
                    policy: index,
                    description: policy.describe(),
                    source,
                }
                .normalize()
            })?;
            info!(
                policy = index,
                references = %policy.describe(),
                matched = references.len(),
                "Selected references for keep policy"
            );

            let limit = policy.per_reference_limit();
            jobs.extend(references.into_iter().map(|reference| WalkJob {
                policy: index,
                description: policy.describe(),
                reference,
                limit: limit.clone(),
            }));
        }

        let stages = Arc::new(stages.clone());
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks = JoinSet::new();

        for job in jobs {
            let cache = self.cache.clone();
            let store = self.store.clone();
            let stages = stages.clone();
            let semaphore = semaphore.clone();
            let cancel = cancel.clone();

            tasks.spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => return (job, Err(Error::Cancelled)),
                };
                let walk = ReferenceWalk {
                    cache: &cache,
                    store: store.as_ref(),
                    stages: &stages,
                    now,
                    cancel: &cancel,
                };
                let result = walk.run(&job.reference, &job.limit).await;
                (job, result)
            });
        }

        let mut keep = KeepSet::new();
        while let Some(joined) = tasks.join_next().await {
            let (job, result) = joined?;
            match result {
                Ok(kept) => {
                    debug!(
                        policy = job.policy,
                        reference = %job.reference.name,
                        kept = kept.len(),
                        "Reference walk finished"
                    );
                    keep.extend(kept);
                }
                Err(source) => {
                    tasks.abort_all();
                    return Err(CleanupError::History {
                        policy: job.policy,
                        description: job.description,
                        reference: job.reference.name,
                        source,
                    }
                    .normalize());
                }
            }
        }

        Ok(keep)
    }

    /// Matched references, narrowed by the `references.limit` if present.
    async fn select_references(
        &self,
        policy: &KeepPolicy,
        now: DateTime<Utc>,
    ) -> Result<Vec<GitReference>> {
        let references = &policy.references;
        let matched: Vec<GitReference> = self
            .cache
            .references(references.kind)
            .await?
            .into_iter()
            .filter(|r| references.matcher.is_match(&r.name))
            .collect();

        let Some(limit) = references.limit.as_ref().filter(|l| !l.is_unbounded()) else {
            return Ok(matched);
        };

        let mut dated = Vec::with_capacity(matched.len());
        for reference in matched {
            let tip = self.cache.fetch(&reference.tip).await?;
            dated.push((reference, tip.timestamp));
        }
        dated.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.name.cmp(&b.0.name)));

        let times: Vec<DateTime<Utc>> = dated.iter().map(|(_, t)| *t).collect();
        let selected = select(limit, &times, now);

        Ok(dated
            .into_iter()
            .zip(selected)
            .filter_map(|((reference, _), keep)| keep.then_some(reference))
            .collect())
    }
}

/// State shared by one reference walk.
struct ReferenceWalk<'a, R> {
    cache: &'a Arc<CommitGraphCache<R>>,
    store: &'a dyn ArtifactStore,
    stages: &'a StageIndex,
    now: DateTime<Utc>,
    cancel: &'a CancelToken,
}

impl<R: GitRepository + 'static> ReferenceWalk<'_, R> {
    async fn run(&self, reference: &GitReference, limit: &RetentionLimit) -> Result<Vec<StageDigest>> {
        let cutoff = window_cutoff(limit, self.now);
        let mut queue = BinaryHeap::new();
        let mut queued = HashSet::new();

        let tip = self.cache.fetch(&reference.tip).await?;
        queued.insert(tip.hash.clone());
        queue.push(QueuedCommit(tip));

        let mut digests = Vec::new();
        let mut candidates = Vec::new();
        let mut visited = 0usize;

        while let Some(QueuedCommit(commit)) = queue.pop() {
            self.cancel.check()?;
            if exhausted(limit, cutoff, commit.timestamp, digests.len()) {
                break;
            }
            visited += 1;

            let mut built = self.store.commit_to_stages(&commit.hash).await?;
            built.sort();
            for digest in built {
                // Stages removed since the listing cannot be kept.
                if !self.stages.contains_key(&digest) {
                    continue;
                }
                candidates.push(commit.timestamp);
                digests.push(digest);
            }

            // Ancestors are no newer than this commit.
            if exhausted(limit, cutoff, commit.timestamp, digests.len()) {
                break;
            }
            for parent in &commit.parents {
                if queued.insert(parent.clone()) {
                    queue.push(QueuedCommit(self.cache.fetch(parent).await?));
                }
            }
        }

        let selected = select(limit, &candidates, self.now);
        let kept: Vec<StageDigest> = digests
            .into_iter()
            .zip(selected)
            .filter_map(|(digest, keep)| keep.then_some(digest))
            .collect();

        debug!(
            reference = %reference.name,
            tip = %reference.tip.short(),
            visited,
            candidates = candidates.len(),
            kept = kept.len(),
            "Walked reference history"
        );
        Ok(kept)
    }
}

/// Whether no commit older than `commit_time` can add a kept stage, given
/// `found` stages collected so far.
fn exhausted(
    limit: &RetentionLimit,
    cutoff: Option<DateTime<Utc>>,
    commit_time: DateTime<Utc>,
    found: usize,
) -> bool {
    let count_done = limit.count().map(|n| found >= n);
    let window_done = cutoff.map(|c| commit_time < c);

    match (count_done, window_done) {
        (None, None) => false,
        (Some(done), None) | (None, Some(done)) => done,
        (Some(count), Some(window)) => match limit.operator {
            Operator::Or => count && window,
            Operator::And => count || window,
        },
    }
}

/// Max-heap entry: newest commit first, ties broken by hash.
struct QueuedCommit(Arc<CommitObject>);

impl Ord for QueuedCommit {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0
            .timestamp
            .cmp(&other.0.timestamp)
            .then_with(|| self.0.hash.cmp(&other.0.hash))
    }
}

impl PartialOrd for QueuedCommit {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for QueuedCommit {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for QueuedCommit {}

fn window_cutoff(limit: &RetentionLimit, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    limit
        .within
        .map(|window| now.checked_sub_signed(window).unwrap_or(DateTime::<Utc>::MIN_UTC))
}

/// Which entries a limit retains.
///
/// Entry times must be ordered newest first. `last` keeps the first N
/// entries; `in` keeps entries no older than `now - in`. With both set, `Or`
/// keeps the union of the two selections and `And` their intersection.
pub(crate) fn select(limit: &RetentionLimit, times: &[DateTime<Utc>], now: DateTime<Utc>) -> Vec<bool> {
    let count = limit.count();
    let cutoff = window_cutoff(limit, now);

    times
        .iter()
        .enumerate()
        .map(|(position, time)| {
            let by_count = count.map(|n| position < n);
            let by_window = cutoff.map(|c| *time >= c);

            match (by_count, by_window) {
                (None, None) => true,
                (Some(keep), None) | (None, Some(keep)) => keep,
                (Some(count), Some(window)) => match limit.operator {
                    Operator::Or => count || window,
                    Operator::And => count && window,
                },
            }
        })
        .collect()
}
