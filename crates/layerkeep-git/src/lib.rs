//! Local git repository access for layerkeep.
//!
//! Wraps a `git2` repository behind the [`GitRepository`] trait. The handle is
//! `Send` but not `Sync`; share it through the cleanup crate's commit cache.

use chrono::{DateTime, Utc};
use git2::{Oid, Repository};
use layerkeep_core::git::{CommitHash, CommitObject, GitReference, GitRepository, ReferenceKind};
use layerkeep_core::{Error, Result};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const LOCAL_BRANCHES: &str = "refs/heads/";
const REMOTE_BRANCHES: &str = "refs/remotes/origin/";
const TAGS: &str = "refs/tags/";

pub struct LocalGitRepository {
    repo: Repository,
    path: PathBuf,
}

impl LocalGitRepository {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let repo = Repository::open(path).map_err(|e| {
            Error::ReferenceAccess(format!("cannot open {}: {}", path.display(), e.message()))
        })?;

        if repo.is_shallow() {
            warn!(
                path = %path.display(),
                "Repository is a shallow clone, history policies may fail on missing commits"
            );
        }

        Ok(Self {
            repo,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Short reference names under `prefix` mapped to the commit they peel to.
    fn collect(&self, prefix: &str, into: &mut BTreeMap<String, CommitHash>) -> Result<()> {
        let references = self
            .repo
            .references_glob(&format!("{}*", prefix))
            .map_err(reference_error)?;

        for reference in references {
            let reference = reference.map_err(reference_error)?;
            let Some(name) = reference.name().and_then(|n| n.strip_prefix(prefix)) else {
                continue;
            };
            if name == "HEAD" {
                continue;
            }
            let name = name.to_string();

            match reference.peel_to_commit() {
                Ok(commit) => {
                    into.insert(name, CommitHash::new(commit.id().to_string()));
                }
                Err(e) => debug!(reference = %name, error = %e.message(), "Skipping non-commit reference"),
            }
        }

        Ok(())
    }
}

impl GitRepository for LocalGitRepository {
    /// Branches are read from local heads and `origin` remote-tracking refs;
    /// a remote-tracking ref wins over a local branch of the same name.
    fn resolve_references(&self, kind: ReferenceKind) -> Result<Vec<GitReference>> {
        let mut tips = BTreeMap::new();
        match kind {
            ReferenceKind::Branch => {
                self.collect(LOCAL_BRANCHES, &mut tips)?;
                self.collect(REMOTE_BRANCHES, &mut tips)?;
            }
            ReferenceKind::Tag => self.collect(TAGS, &mut tips)?,
        }

        Ok(tips
            .into_iter()
            .map(|(name, tip)| GitReference::new(kind, name, tip))
            .collect())
    }

    fn read_commit(&self, hash: &CommitHash) -> Result<CommitObject> {
        let oid = Oid::from_str(hash.as_str()).map_err(|e| Error::history(hash, e.message()))?;
        let commit = self
            .repo
            .find_commit(oid)
            .map_err(|e| Error::history(hash, e.message()))?;

        let seconds = commit.committer().when().seconds();
        let timestamp = DateTime::<Utc>::from_timestamp(seconds, 0)
            .ok_or_else(|| Error::history(hash, format!("invalid commit time {}", seconds)))?;

        Ok(CommitObject {
            hash: hash.clone(),
            parents: commit
                .parent_ids()
                .map(|id| CommitHash::new(id.to_string()))
                .collect(),
            timestamp,
            tree: Some(commit.tree_id().to_string()),
        })
    }
}

fn reference_error(e: git2::Error) -> Error {
    Error::ReferenceAccess(e.message().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use git2::{Signature, Time};
    use tempfile::TempDir;

    fn create_test_repo() -> (TempDir, Repository) {
        let dir = TempDir::new().unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        (dir, repo)
    }

    fn add_commit(repo: &Repository, parents: &[Oid], seconds: i64) -> Oid {
        let sig = Signature::new("Test User", "test@example.com", &Time::new(seconds, 0)).unwrap();
        let tree_id = repo.treebuilder(None).unwrap().write().unwrap();
        let tree = repo.find_tree(tree_id).unwrap();
        let parents: Vec<_> = parents.iter().map(|p| repo.find_commit(*p).unwrap()).collect();
        let parents: Vec<_> = parents.iter().collect();

        repo.commit(None, &sig, &sig, "commit", &tree, &parents)
            .unwrap()
    }

    #[test]
    fn test_read_commit() {
        let (dir, repo) = create_test_repo();
        let root = add_commit(&repo, &[], 1_700_000_000);
        let child = add_commit(&repo, &[root], 1_700_000_600);

        let local = LocalGitRepository::open(dir.path()).unwrap();
        let commit = local
            .read_commit(&CommitHash::new(child.to_string()))
            .unwrap();

        assert_eq!(commit.parents, vec![CommitHash::new(root.to_string())]);
        assert_eq!(commit.timestamp.timestamp(), 1_700_000_600);
        assert!(commit.tree.is_some());
    }

    #[test]
    fn test_missing_commit_names_hash() {
        let (dir, _repo) = create_test_repo();
        let local = LocalGitRepository::open(dir.path()).unwrap();

        let missing = "0123456789012345678901234567890123456789";
        match local.read_commit(&missing.into()) {
            Err(Error::HistoryAccess { hash, .. }) => assert_eq!(hash, missing),
            other => panic!("unexpected result: {:?}", other),
        }
        assert!(matches!(
            local.read_commit(&"not-a-hash".into()),
            Err(Error::HistoryAccess { .. })
        ));
    }

    #[test]
    fn test_branches_include_origin_and_skip_head() {
        let (dir, repo) = create_test_repo();
        let old = add_commit(&repo, &[], 1_700_000_000);
        let new = add_commit(&repo, &[old], 1_700_000_600);
        repo.reference("refs/heads/main", old, true, "").unwrap();
        repo.reference("refs/remotes/origin/main", new, true, "").unwrap();
        repo.reference("refs/remotes/origin/feature-x", new, true, "")
            .unwrap();
        repo.reference_symbolic(
            "refs/remotes/origin/HEAD",
            "refs/remotes/origin/main",
            true,
            "",
        )
        .unwrap();

        let local = LocalGitRepository::open(dir.path()).unwrap();
        let branches = local.resolve_references(ReferenceKind::Branch).unwrap();

        assert_eq!(
            branches,
            vec![
                GitReference::new(ReferenceKind::Branch, "feature-x", new.to_string()),
                GitReference::new(ReferenceKind::Branch, "main", new.to_string()),
            ]
        );
    }

    #[test]
    fn test_tags_peel_to_commits() {
        let (dir, repo) = create_test_repo();
        let first = add_commit(&repo, &[], 1_700_000_000);
        let second = add_commit(&repo, &[first], 1_700_000_600);
        repo.reference("refs/tags/v1.0", first, true, "").unwrap();

        let tagger = Signature::now("Test User", "test@example.com").unwrap();
        let target = repo.find_object(second, None).unwrap();
        repo.tag("v2.0", &target, &tagger, "release", false).unwrap();

        let local = LocalGitRepository::open(dir.path()).unwrap();
        let tags = local.resolve_references(ReferenceKind::Tag).unwrap();

        assert_eq!(
            tags,
            vec![
                GitReference::new(ReferenceKind::Tag, "v1.0", first.to_string()),
                GitReference::new(ReferenceKind::Tag, "v2.0", second.to_string()),
            ]
        );
        assert!(
            local
                .resolve_references(ReferenceKind::Branch)
                .unwrap()
                .is_empty()
        );
    }

    #[test]
    fn test_open_missing_path() {
        let dir = TempDir::new().unwrap();
        let result = LocalGitRepository::open(dir.path().join("nope"));
        assert!(matches!(result, Err(Error::ReferenceAccess(_))));
    }
}
