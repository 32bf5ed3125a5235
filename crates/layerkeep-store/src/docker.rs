//! Stages stored as images in the local Docker daemon.

use async_trait::async_trait;
use bollard::Docker;
use bollard::image::{ListImagesOptions, RemoveImageOptions};
use bollard::models::ImageSummary;
use layerkeep_core::artifact::ArtifactStore;
use layerkeep_core::git::CommitHash;
use layerkeep_core::{Error, Result, StageDigest, StageRecord};
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use tracing::{debug, info};

use crate::labels::{STAGE_DIGEST_LABEL, stage_from_labels};

/// Repo tag the daemon reports for untagged images.
const UNTAGGED: &str = "<none>:<none>";

/// Daemon-side identity of one stage image.
#[derive(Debug, Clone, PartialEq, Eq)]
struct StageImage {
    id: String,
    tags: Vec<String>,
}

impl StageImage {
    fn from_summary(summary: &ImageSummary) -> Self {
        Self {
            id: summary.id.clone(),
            tags: summary
                .repo_tags
                .iter()
                .filter(|tag| tag.as_str() != UNTAGGED)
                .cloned()
                .collect(),
        }
    }

    /// References to remove so the daemon drops the image. Removing an ID
    /// that several tags point at is refused, so tagged images go tag by tag
    /// and the last untag deletes the image.
    fn removal_targets(&self) -> Vec<String> {
        if self.tags.is_empty() {
            vec![self.id.clone()]
        } else {
            self.tags.clone()
        }
    }
}

/// Lookup tables built from the last image listing.
#[derive(Debug, Default)]
struct LabelIndex {
    images: HashMap<StageDigest, StageImage>,
    by_commit: HashMap<CommitHash, Vec<StageDigest>>,
}

impl LabelIndex {
    fn build(summaries: &[ImageSummary]) -> (Self, Vec<StageRecord>) {
        let mut index = LabelIndex::default();
        let mut records = Vec::new();

        for summary in summaries {
            let Some(record) = stage_from_labels(&summary.labels, summary.created) else {
                continue;
            };
            if index.images.contains_key(&record.digest) {
                continue;
            }
            index
                .images
                .insert(record.digest.clone(), StageImage::from_summary(summary));
            if let Some(commit) = &record.metadata.commit {
                index
                    .by_commit
                    .entry(commit.clone())
                    .or_default()
                    .push(record.digest.clone());
            }
            records.push(record);
        }

        (index, records)
    }
}

pub struct DockerStageStore {
    docker: Docker,
    index: RwLock<Option<LabelIndex>>,
}

impl DockerStageStore {
    /// Connect to the local Docker daemon.
    pub fn new() -> Result<Self> {
        let docker =
            Docker::connect_with_local_defaults().map_err(|e| Error::StoreAccess(e.to_string()))?;
        Ok(Self::with_client(docker))
    }

    pub fn with_client(docker: Docker) -> Self {
        Self {
            docker,
            index: RwLock::new(None),
        }
    }

    fn image(&self, digest: &StageDigest) -> Option<StageImage> {
        self.index
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .and_then(|index| index.images.get(digest).cloned())
    }

    fn indexed(&self) -> bool {
        self.index
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

#[async_trait]
impl ArtifactStore for DockerStageStore {
    fn name(&self) -> &'static str {
        "docker"
    }

    async fn list_stages(&self) -> Result<Vec<StageRecord>> {
        let mut filters = HashMap::new();
        filters.insert("label".to_string(), vec![STAGE_DIGEST_LABEL.to_string()]);
        let options = ListImagesOptions {
            all: false,
            filters,
            ..Default::default()
        };

        let summaries = self
            .docker
            .list_images(Some(options))
            .await
            .map_err(|e| Error::StoreAccess(format!("Failed to list images: {}", e)))?;

        let (index, records) = LabelIndex::build(&summaries);
        info!(
            images = summaries.len(),
            stages = records.len(),
            "Listed stage images"
        );
        *self.index.write().unwrap_or_else(PoisonError::into_inner) = Some(index);

        Ok(records)
    }

    async fn commit_to_stages(&self, commit: &CommitHash) -> Result<Vec<StageDigest>> {
        if !self.indexed() {
            self.list_stages().await?;
        }

        Ok(self
            .index
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .and_then(|index| index.by_commit.get(commit).cloned())
            .unwrap_or_default())
    }

    async fn delete(&self, digest: &StageDigest) -> Result<()> {
        let image = self
            .image(digest)
            .ok_or_else(|| Error::NotFound(format!("stage {}", digest)))?;

        for target in image.removal_targets() {
            debug!(stage = %digest, image = %image.id, reference = %target, "Removing stage image");
            let options = RemoveImageOptions {
                force: false,
                noprune: false,
            };
            self.docker
                .remove_image(&target, Some(options), None)
                .await
                .map_err(|e| {
                    Error::StoreAccess(format!("Failed to remove image {}: {}", target, e))
                })?;
        }

        Ok(())
    }
}
