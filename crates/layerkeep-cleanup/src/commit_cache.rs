//! Memoizing, thread-safe access to a commit graph.
//!
//! Repository readers are not safe to call concurrently, even for different
//! commits, because they share internal pack and object state. The cache
//! therefore owns the repository behind a single mutex: every cache miss, for
//! any hash, reads inside that one critical section. Hits only take the read
//! side of the entry map. Async callers go through [`CommitGraphCache::fetch`],
//! which moves misses onto the blocking pool.

use layerkeep_core::git::{CommitHash, CommitObject, GitReference, GitRepository, ReferenceKind};
use layerkeep_core::{Error, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use tracing::trace;

pub struct CommitGraphCache<R> {
    entries: RwLock<HashMap<CommitHash, Arc<CommitObject>>>,
    repository: Mutex<R>,
    reads: AtomicUsize,
}

impl<R: GitRepository> CommitGraphCache<R> {
    pub fn new(repository: R) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            repository: Mutex::new(repository),
            reads: AtomicUsize::new(0),
        }
    }

    /// Return the commit, reading it from the repository on first access.
    ///
    /// Concurrent callers missing on the same hash perform exactly one
    /// repository read. Failed reads are not cached.
    pub fn get(&self, hash: &CommitHash) -> Result<Arc<CommitObject>> {
        if let Some(commit) = self.lookup(hash) {
            return Ok(commit);
        }

        let repository = self.lock_repository();

        // Another caller may have filled the entry while we waited.
        if let Some(commit) = self.lookup(hash) {
            return Ok(commit);
        }

        trace!(commit = %hash, "Reading commit object");
        let commit = repository.read_commit(hash).map_err(|e| match e {
            Error::HistoryAccess { .. } | Error::Cancelled => e,
            other => Error::history(hash, other),
        })?;
        self.reads.fetch_add(1, Ordering::Relaxed);

        let commit = Arc::new(commit);
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(hash.clone(), commit.clone());

        Ok(commit)
    }

    /// List references through the same serialized repository handle.
    pub fn resolve_references(&self, kind: ReferenceKind) -> Result<Vec<GitReference>> {
        self.lock_repository().resolve_references(kind)
    }

    /// Async [`get`](Self::get): hits are answered inline, misses wait on the
    /// repository from `spawn_blocking` instead of a runtime worker.
    pub async fn fetch(self: &Arc<Self>, hash: &CommitHash) -> Result<Arc<CommitObject>>
    where
        R: 'static,
    {
        if let Some(commit) = self.lookup(hash) {
            return Ok(commit);
        }

        let cache = Arc::clone(self);
        let hash = hash.clone();
        tokio::task::spawn_blocking(move || cache.get(&hash))
            .await
            .map_err(|e| Error::Internal(format!("commit read task failed: {}", e)))?
    }

    /// Async [`resolve_references`](Self::resolve_references).
    pub async fn references(self: &Arc<Self>, kind: ReferenceKind) -> Result<Vec<GitReference>>
    where
        R: 'static,
    {
        let cache = Arc::clone(self);
        tokio::task::spawn_blocking(move || cache.resolve_references(kind))
            .await
            .map_err(|e| Error::Internal(format!("reference listing task failed: {}", e)))?
    }

    /// Drop every cached commit so later reads observe fresh history.
    pub fn clear(&self) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of reads that reached the repository.
    pub fn repository_reads(&self) -> usize {
        self.reads.load(Ordering::Relaxed)
    }

    fn lookup(&self, hash: &CommitHash) -> Option<Arc<CommitObject>> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(hash)
            .cloned()
    }

    // Cached commits are immutable, so a poisoned lock leaves nothing torn.
    fn lock_repository(&self) -> MutexGuard<'_, R> {
        self.repository
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
