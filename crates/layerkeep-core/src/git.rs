//! Commit graph types and the git repository abstraction.

use chrono::{DateTime, Utc};
use derive_more::Display;
use serde::{Deserialize, Serialize};

use crate::Result;

/// Hex object id of a commit.
#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Display,
)]
#[display("{_0}")]
#[serde(transparent)]
pub struct CommitHash(String);

impl CommitHash {
    pub fn new(hash: impl Into<String>) -> Self {
        Self(hash.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First seven characters, for log output.
    pub fn short(&self) -> &str {
        self.0.get(..7).unwrap_or(&self.0)
    }
}

impl From<&str> for CommitHash {
    fn from(hash: &str) -> Self {
        Self(hash.to_string())
    }
}

impl From<String> for CommitHash {
    fn from(hash: String) -> Self {
        Self(hash)
    }
}

/// A commit as read from the object store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitObject {
    pub hash: CommitHash,
    pub parents: Vec<CommitHash>,
    /// Committer time.
    pub timestamp: DateTime<Utc>,
    pub tree: Option<String>,
}

/// Kind of git reference a keep policy selects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
pub enum ReferenceKind {
    #[display("tag")]
    Tag,
    #[display("branch")]
    Branch,
}

/// A resolved reference: its short name and the commit it points at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitReference {
    pub kind: ReferenceKind,
    pub name: String,
    pub tip: CommitHash,
}

impl GitReference {
    pub fn new(kind: ReferenceKind, name: impl Into<String>, tip: impl Into<CommitHash>) -> Self {
        Self {
            kind,
            name: name.into(),
            tip: tip.into(),
        }
    }
}

/// Read access to a local commit graph.
///
/// Implementations are not required to be `Sync`: the underlying object
/// readers are generally unsafe to call concurrently, so callers share a
/// repository behind a single lock.
pub trait GitRepository: Send {
    /// List references of the given kind with their tip commits.
    fn resolve_references(&self, kind: ReferenceKind) -> Result<Vec<GitReference>>;

    /// Read one commit object.
    fn read_commit(&self, hash: &CommitHash) -> Result<CommitObject>;
}

impl<T: GitRepository + ?Sized> GitRepository for Box<T> {
    fn resolve_references(&self, kind: ReferenceKind) -> Result<Vec<GitReference>> {
        (**self).resolve_references(kind)
    }

    fn read_commit(&self, hash: &CommitHash) -> Result<CommitObject> {
        (**self).read_commit(hash)
    }
}
