//! Typed cleanup policy model.

use chrono::Duration;
use layerkeep_core::git::ReferenceKind;

use crate::ReferenceMatcher;

/// Default for `keepImagesBuiltWithinLastNHours`.
pub const DEFAULT_KEEP_IMAGES_BUILT_WITHIN_LAST_N_HOURS: u64 = 2;

/// How the `last` and `in` constraints of a limit combine.
///
/// The names describe the retained set: `Or` keeps what satisfies either
/// constraint, `And` keeps only what satisfies both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Operator {
    #[default]
    Or,
    And,
}

impl std::str::FromStr for Operator {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Or" => Ok(Operator::Or),
            "And" => Ok(Operator::And),
            other => Err(format!(
                "unsupported value {:?} for `operator: Or|And`",
                other
            )),
        }
    }
}

/// A `last` / `in` limit.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RetentionLimit {
    /// Keep at most this many entries; `-1` means no count limit.
    pub last: Option<i64>,
    /// Keep entries newer than `now - in`.
    pub within: Option<Duration>,
    pub operator: Operator,
}

impl RetentionLimit {
    pub fn last(count: i64) -> Self {
        Self {
            last: Some(count),
            ..Default::default()
        }
    }

    pub fn within(window: Duration) -> Self {
        Self {
            within: Some(window),
            ..Default::default()
        }
    }

    pub fn with_operator(mut self, operator: Operator) -> Self {
        self.operator = operator;
        self
    }

    /// Effective count constraint; `None` when `last` is unset or `-1`.
    pub fn count(&self) -> Option<usize> {
        self.last
            .filter(|n| *n >= 0)
            .and_then(|n| usize::try_from(n).ok())
    }

    /// True when neither constraint is in effect.
    pub fn is_unbounded(&self) -> bool {
        self.count().is_none() && self.within.is_none()
    }
}

/// The `references` section of a keep policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferencePolicy {
    pub kind: ReferenceKind,
    pub matcher: ReferenceMatcher,
    /// Restricts which matched references take part, by tip commit recency.
    pub limit: Option<RetentionLimit>,
}

impl ReferencePolicy {
    pub fn new(kind: ReferenceKind, matcher: ReferenceMatcher) -> Self {
        Self {
            kind,
            matcher,
            limit: None,
        }
    }

    pub fn with_limit(mut self, limit: RetentionLimit) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// One entry of `keepPolicies`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeepPolicy {
    pub references: ReferencePolicy,
    pub images_per_reference: Option<RetentionLimit>,
}

impl KeepPolicy {
    pub fn new(references: ReferencePolicy) -> Self {
        Self {
            references,
            images_per_reference: None,
        }
    }

    pub fn with_images_per_reference(mut self, limit: RetentionLimit) -> Self {
        self.images_per_reference = Some(limit);
        self
    }

    /// Limit applied to the stages of each matched reference.
    ///
    /// Without `imagesPerReference` only the newest stage per image is kept.
    pub fn per_reference_limit(&self) -> RetentionLimit {
        self.images_per_reference
            .clone()
            .unwrap_or_else(|| RetentionLimit::last(1))
    }

    /// Short description for logs and error chains.
    pub fn describe(&self) -> String {
        format!(
            "{} {}",
            self.references.kind,
            self.references.matcher.pattern()
        )
    }
}

/// The `cleanup` section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanupConfig {
    pub disable_cleanup: bool,
    pub disable_kubernetes_based_policy: bool,
    pub disable_git_history_based_policy: bool,
    pub disable_built_within_last_n_hours_policy: bool,
    pub keep_policies: Vec<KeepPolicy>,
    pub keep_images_built_within_last_n_hours: u64,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            disable_cleanup: false,
            disable_kubernetes_based_policy: false,
            disable_git_history_based_policy: false,
            disable_built_within_last_n_hours_policy: false,
            keep_policies: Vec::new(),
            keep_images_built_within_last_n_hours: DEFAULT_KEEP_IMAGES_BUILT_WITHIN_LAST_N_HOURS,
        }
    }
}

impl CleanupConfig {
    pub fn git_history_policy_enabled(&self) -> bool {
        !self.disable_git_history_based_policy
    }

    pub fn kubernetes_policy_enabled(&self) -> bool {
        !self.disable_kubernetes_based_policy
    }

    pub fn recency_policy_enabled(&self) -> bool {
        !self.disable_built_within_last_n_hours_policy
    }

    /// Window protected by the recency policy.
    pub fn recency_window(&self) -> Duration {
        let hours = i64::try_from(self.keep_images_built_within_last_n_hours).unwrap_or(i64::MAX);
        Duration::try_hours(hours).unwrap_or(Duration::MAX)
    }
}
