//! Image labels describing a stage.

use chrono::{DateTime, Utc};
use layerkeep_core::{StageMetadata, StageRecord};
use std::collections::HashMap;

pub const STAGE_DIGEST_LABEL: &str = "layerkeep-stage-digest";
pub const PROJECT_REPO_COMMIT_LABEL: &str = "layerkeep-project-repo-commit";
pub const IMAGE_LABEL: &str = "layerkeep-image";
pub const PARENT_STAGE_ID_LABEL: &str = "layerkeep-parent-stage-id";
pub const IMPORT_SOURCE_STAGE_ID_LABEL_PREFIX: &str = "layerkeep-import-source-stage-id-";

/// Build a stage record from image labels and the image creation time.
///
/// Returns `None` for images without a stage digest label.
pub fn stage_from_labels(labels: &HashMap<String, String>, created: i64) -> Option<StageRecord> {
    let digest = non_empty(labels.get(STAGE_DIGEST_LABEL))?;
    let built_at = DateTime::<Utc>::from_timestamp(created, 0).unwrap_or(DateTime::<Utc>::MIN_UTC);

    let mut metadata = StageMetadata::new(built_at);
    if let Some(commit) = non_empty(labels.get(PROJECT_REPO_COMMIT_LABEL)) {
        metadata = metadata.with_commit(commit);
    }
    if let Some(image) = non_empty(labels.get(IMAGE_LABEL)) {
        metadata = metadata.with_image(image);
    }
    if let Some(parent) = non_empty(labels.get(PARENT_STAGE_ID_LABEL)) {
        metadata = metadata.with_parent(parent);
    }
    for (key, value) in labels {
        if key.starts_with(IMPORT_SOURCE_STAGE_ID_LABEL_PREFIX) && !value.is_empty() {
            metadata = metadata.with_import_source(value.as_str());
        }
    }

    Some(StageRecord::new(digest, metadata))
}

fn non_empty(value: Option<&String>) -> Option<&str> {
    value.map(String::as_str).filter(|v| !v.is_empty())
}
