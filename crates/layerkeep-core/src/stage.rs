//! Stage identifiers and metadata.

use chrono::{DateTime, Utc};
use derive_more::Display;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::git::CommitHash;

/// Content hash identifying one built stage.
///
/// Digests are opaque: two digests are equal only if their strings are
/// byte-for-byte equal.
#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Display,
)]
#[display("{_0}")]
#[serde(transparent)]
pub struct StageDigest(String);

impl StageDigest {
    pub fn new(digest: impl Into<String>) -> Self {
        Self(digest.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for StageDigest {
    fn from(digest: &str) -> Self {
        Self(digest.to_string())
    }
}

impl From<String> for StageDigest {
    fn from(digest: String) -> Self {
        Self(digest)
    }
}

impl AsRef<str> for StageDigest {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Per-stage record owned by the artifact store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageMetadata {
    /// When the stage was built.
    pub built_at: DateTime<Utc>,
    /// Project commit the stage was built from, if known.
    pub commit: Option<CommitHash>,
    /// Image name the stage belongs to.
    pub image_name: Option<String>,
    /// Stage this one was layered on top of.
    pub parent: Option<StageDigest>,
    /// Stages whose files were imported while building this one.
    pub import_sources: BTreeSet<StageDigest>,
}

impl StageMetadata {
    pub fn new(built_at: DateTime<Utc>) -> Self {
        Self {
            built_at,
            commit: None,
            image_name: None,
            parent: None,
            import_sources: BTreeSet::new(),
        }
    }

    pub fn with_commit(mut self, commit: impl Into<CommitHash>) -> Self {
        self.commit = Some(commit.into());
        self
    }

    pub fn with_image(mut self, image_name: impl Into<String>) -> Self {
        self.image_name = Some(image_name.into());
        self
    }

    pub fn with_parent(mut self, parent: impl Into<StageDigest>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    pub fn with_import_source(mut self, source: impl Into<StageDigest>) -> Self {
        self.import_sources.insert(source.into());
        self
    }

    /// Digests this stage depends on (parent first, then import sources).
    pub fn dependencies(&self) -> impl Iterator<Item = &StageDigest> {
        self.parent.iter().chain(self.import_sources.iter())
    }
}

/// A stage as listed by the artifact store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageRecord {
    pub digest: StageDigest,
    pub metadata: StageMetadata,
}

impl StageRecord {
    pub fn new(digest: impl Into<StageDigest>, metadata: StageMetadata) -> Self {
        Self {
            digest: digest.into(),
            metadata,
        }
    }
}
