//! In-memory collaborators for engine tests.

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use layerkeep_core::artifact::ArtifactStore;
use layerkeep_core::git::{CommitHash, CommitObject, GitReference, GitRepository, ReferenceKind};
use layerkeep_core::live::LiveImageProvider;
use layerkeep_core::{Error, Result, StageDigest, StageMetadata, StageRecord};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Fixed evaluation time used by tests.
pub fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
}

pub fn minutes_ago(minutes: i64) -> DateTime<Utc> {
    base_time() - Duration::minutes(minutes)
}

pub fn hours_ago(hours: i64) -> DateTime<Utc> {
    base_time() - Duration::hours(hours)
}

pub fn days_ago(days: i64) -> DateTime<Utc> {
    base_time() - Duration::days(days)
}

#[derive(Debug, Clone, Default)]
pub struct ReadCounter(Arc<AtomicUsize>);

impl ReadCounter {
    pub fn get(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Default)]
pub struct OverlapDetector {
    active: Arc<AtomicUsize>,
    overlapped: Arc<AtomicBool>,
}

impl OverlapDetector {
    pub fn overlapped(&self) -> bool {
        self.overlapped.load(Ordering::SeqCst)
    }
}

/// Commit graph held in memory; records how often it is read.
#[derive(Debug, Default)]
pub struct FakeRepository {
    commits: HashMap<CommitHash, CommitObject>,
    references: Vec<GitReference>,
    reads: ReadCounter,
    overlap: OverlapDetector,
    delay: Option<std::time::Duration>,
}

impl FakeRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn commit(mut self, hash: &str, parents: &[&str], timestamp: DateTime<Utc>) -> Self {
        self.commits.insert(
            hash.into(),
            CommitObject {
                hash: hash.into(),
                parents: parents.iter().map(|p| CommitHash::from(*p)).collect(),
                timestamp,
                tree: None,
            },
        );
        self
    }

    pub fn branch(mut self, name: &str, tip: &str) -> Self {
        self.references
            .push(GitReference::new(ReferenceKind::Branch, name, tip));
        self
    }

    pub fn tag(mut self, name: &str, tip: &str) -> Self {
        self.references
            .push(GitReference::new(ReferenceKind::Tag, name, tip));
        self
    }

    pub fn with_read_delay(mut self, delay: std::time::Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn read_counter(&self) -> ReadCounter {
        self.reads.clone()
    }

    pub fn overlap_detector(&self) -> OverlapDetector {
        self.overlap.clone()
    }
}

impl GitRepository for FakeRepository {
    fn resolve_references(&self, kind: ReferenceKind) -> Result<Vec<GitReference>> {
        Ok(self
            .references
            .iter()
            .filter(|r| r.kind == kind)
            .cloned()
            .collect())
    }

    fn read_commit(&self, hash: &CommitHash) -> Result<CommitObject> {
        if self.overlap.active.fetch_add(1, Ordering::SeqCst) > 0 {
            self.overlap.overlapped.store(true, Ordering::SeqCst);
        }
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        self.overlap.active.fetch_sub(1, Ordering::SeqCst);
        self.reads.0.fetch_add(1, Ordering::SeqCst);

        self.commits
            .get(hash)
            .cloned()
            .ok_or_else(|| Error::history(hash, "object not found"))
    }
}

pub fn stage(digest: &str, built_at: DateTime<Utc>) -> StageRecord {
    StageRecord::new(digest, StageMetadata::new(built_at))
}

pub fn stage_at_commit(digest: &str, commit: &str, built_at: DateTime<Utc>) -> StageRecord {
    StageRecord::new(digest, StageMetadata::new(built_at).with_commit(commit))
}

/// Artifact store backed by a vector of records.
#[derive(Debug, Default)]
pub struct MemoryStore {
    stages: Mutex<Vec<StageRecord>>,
    deleted: Mutex<Vec<StageDigest>>,
    failing_deletes: HashSet<StageDigest>,
    fail_listing: bool,
    list_calls: AtomicUsize,
}

impl MemoryStore {
    pub fn new(stages: Vec<StageRecord>) -> Self {
        Self {
            stages: Mutex::new(stages),
            ..Default::default()
        }
    }

    pub fn failing_listing() -> Self {
        Self {
            fail_listing: true,
            ..Default::default()
        }
    }

    pub fn with_failing_delete(mut self, digest: &str) -> Self {
        self.failing_deletes.insert(digest.into());
        self
    }

    pub fn deleted(&self) -> Vec<StageDigest> {
        let mut deleted = self.deleted.lock().unwrap().clone();
        deleted.sort();
        deleted
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ArtifactStore for MemoryStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn list_stages(&self) -> Result<Vec<StageRecord>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_listing {
            return Err(Error::StoreAccess("registry unreachable".to_string()));
        }
        Ok(self.stages.lock().unwrap().clone())
    }

    async fn commit_to_stages(&self, commit: &CommitHash) -> Result<Vec<StageDigest>> {
        Ok(self
            .stages
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.metadata.commit.as_ref() == Some(commit))
            .map(|s| s.digest.clone())
            .collect())
    }

    async fn delete(&self, digest: &StageDigest) -> Result<()> {
        if self.failing_deletes.contains(digest) {
            return Err(Error::StoreAccess(format!("cannot delete {}", digest)));
        }
        self.stages.lock().unwrap().retain(|s| &s.digest != digest);
        self.deleted.lock().unwrap().push(digest.clone());
        Ok(())
    }
}

/// Live image provider returning a fixed set.
#[derive(Debug, Default)]
pub struct StaticLiveImages {
    digests: HashSet<StageDigest>,
    fail: bool,
    calls: AtomicUsize,
}

impl StaticLiveImages {
    pub fn new(digests: &[&str]) -> Self {
        Self {
            digests: digests.iter().map(|d| StageDigest::from(*d)).collect(),
            ..Default::default()
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LiveImageProvider for StaticLiveImages {
    fn name(&self) -> &'static str {
        "static"
    }

    async fn list_live_digests(&self) -> Result<HashSet<StageDigest>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(Error::StoreAccess("cluster unreachable".to_string()));
        }
        Ok(self.digests.clone())
    }
}
