//! Keep sets produced by retention policies.

use layerkeep_core::StageDigest;
use std::collections::BTreeSet;

/// Set of stage digests a policy wants to retain.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeepSet(BTreeSet<StageDigest>);

impl KeepSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, digest: StageDigest) -> bool {
        self.0.insert(digest)
    }

    pub fn contains(&self, digest: &StageDigest) -> bool {
        self.0.contains(digest)
    }

    /// Add every digest of `other`.
    pub fn union_with(&mut self, other: KeepSet) {
        self.0.extend(other.0);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &StageDigest> {
        self.0.iter()
    }
}

impl FromIterator<StageDigest> for KeepSet {
    fn from_iter<I: IntoIterator<Item = StageDigest>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl Extend<StageDigest> for KeepSet {
    fn extend<I: IntoIterator<Item = StageDigest>>(&mut self, iter: I) {
        self.0.extend(iter);
    }
}

impl IntoIterator for KeepSet {
    type Item = StageDigest;
    type IntoIter = std::collections::btree_set::IntoIter<StageDigest>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}
