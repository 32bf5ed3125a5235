//! Keeps stages built within the last N hours.
//!
//! Protects in-flight multi-stage builds whose later stages have not been
//! published yet.

use chrono::{DateTime, Duration, Utc};

use crate::KeepSet;
use crate::engine::StageIndex;

pub fn keep_recent(stages: &StageIndex, window: Duration, now: DateTime<Utc>) -> KeepSet {
    let cutoff = now.checked_sub_signed(window).unwrap_or(DateTime::<Utc>::MIN_UTC);

    stages
        .iter()
        .filter(|(_, meta)| meta.built_at >= cutoff)
        .map(|(digest, _)| digest.clone())
        .collect()
}
