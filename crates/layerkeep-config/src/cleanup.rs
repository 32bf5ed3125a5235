//! Cleanup policy parsing.
//!
//! The document is walked node by node. Every nesting level enumerates the
//! fields it accepts and rejects everything else, so a misspelled field is an
//! error instead of a silently ignored setting.

use crate::duration::parse_duration;
use crate::policy::{CleanupConfig, KeepPolicy, Operator, ReferencePolicy, RetentionLimit};
use crate::{ConfigError, ConfigResult, Location, ReferenceMatcher};
use kdl::{KdlDocument, KdlNode, KdlValue};
use layerkeep_core::git::ReferenceKind;
use std::collections::HashSet;

/// Parse a cleanup configuration from KDL text.
///
/// A document without a `cleanup` node yields the default configuration.
pub fn parse_cleanup_config(kdl: &str) -> ConfigResult<CleanupConfig> {
    let doc: KdlDocument = kdl.parse()?;
    let root = ParseContext::root(kdl);

    let mut config = None;
    for node in doc.nodes() {
        match node.name().value() {
            "cleanup" => {
                if config.is_some() {
                    return Err(root.duplicate(node));
                }
                config = Some(parse_cleanup(node, &root.child("cleanup"))?);
            }
            _ => return Err(root.unknown(node)),
        }
    }

    Ok(config.unwrap_or_default())
}

/// Read and parse a cleanup configuration file.
pub fn load_cleanup_config(path: impl AsRef<std::path::Path>) -> ConfigResult<CleanupConfig> {
    let content = std::fs::read_to_string(path)?;
    parse_cleanup_config(&content)
}

fn parse_cleanup(node: &KdlNode, ctx: &ParseContext<'_>) -> ConfigResult<CleanupConfig> {
    let mut config = CleanupConfig::default();
    let mut seen = HashSet::new();

    for child in block(node, ctx)? {
        ctx.ensure_unique(&mut seen, child)?;
        match child.name().value() {
            "disableCleanup" => config.disable_cleanup = bool_value(child, ctx)?,
            "disableKubernetesBasedPolicy" => {
                config.disable_kubernetes_based_policy = bool_value(child, ctx)?
            }
            "disableGitHistoryBasedPolicy" => {
                config.disable_git_history_based_policy = bool_value(child, ctx)?
            }
            "disableBuiltWithinLastNHoursPolicy" => {
                config.disable_built_within_last_n_hours_policy = bool_value(child, ctx)?
            }
            "keepImagesBuiltWithinLastNHours" => {
                config.keep_images_built_within_last_n_hours = uint_value(child, ctx)?
            }
            "keepPolicies" => {
                config.keep_policies = parse_keep_policies(child, &ctx.child("keepPolicies"))?
            }
            _ => return Err(ctx.unknown(child)),
        }
    }

    Ok(config)
}

fn parse_keep_policies(node: &KdlNode, ctx: &ParseContext<'_>) -> ConfigResult<Vec<KeepPolicy>> {
    let mut policies = Vec::new();

    for (index, child) in block(node, ctx)?.iter().enumerate() {
        match child.name().value() {
            "policy" => {
                let policy_ctx = ctx.child(format!("policy[{}]", index));
                policies.push(parse_keep_policy(child, &policy_ctx)?);
            }
            _ => return Err(ctx.unknown(child)),
        }
    }

    Ok(policies)
}

fn parse_keep_policy(node: &KdlNode, ctx: &ParseContext<'_>) -> ConfigResult<KeepPolicy> {
    let mut references = None;
    let mut images_per_reference = None;
    let mut seen = HashSet::new();

    for child in block(node, ctx)? {
        ctx.ensure_unique(&mut seen, child)?;
        match child.name().value() {
            "references" => {
                references = Some(parse_references(child, &ctx.child("references"))?);
            }
            "imagesPerReference" => {
                images_per_reference =
                    Some(parse_limit(child, &ctx.child("imagesPerReference"))?);
            }
            _ => return Err(ctx.unknown(child)),
        }
    }

    let references = references.ok_or_else(|| ConfigError::MissingField {
        field: ctx.field_path("references"),
        location: ctx.locate(node),
    })?;

    Ok(KeepPolicy {
        references,
        images_per_reference,
    })
}

fn parse_references(node: &KdlNode, ctx: &ParseContext<'_>) -> ConfigResult<ReferencePolicy> {
    let mut tag = None;
    let mut branch = None;
    let mut limit = None;
    let mut seen = HashSet::new();

    for child in block(node, ctx)? {
        ctx.ensure_unique(&mut seen, child)?;
        match child.name().value() {
            "tag" => tag = Some((pattern_value(child, ctx)?, ctx.locate(child))),
            "branch" => branch = Some((pattern_value(child, ctx)?, ctx.locate(child))),
            "limit" => limit = Some(parse_limit(child, &ctx.child("limit"))?),
            _ => return Err(ctx.unknown(child)),
        }
    }

    let (kind, field, (pattern, location)) = match (tag, branch) {
        (Some(tag), None) => (ReferenceKind::Tag, "tag", tag),
        (None, Some(branch)) => (ReferenceKind::Branch, "branch", branch),
        (Some(_), Some(_)) => {
            return Err(ConfigError::Conflict {
                field: ctx.path(),
                message: "specify only tag `tag: string|REGEX` or branch `branch: string|REGEX`"
                    .to_string(),
                location: ctx.locate(node),
            });
        }
        (None, None) => {
            return Err(ConfigError::MissingField {
                field: ctx.field_path("tag|branch"),
                location: ctx.locate(node),
            });
        }
    };

    let matcher =
        ReferenceMatcher::new(&pattern).map_err(|e| ConfigError::InvalidPattern {
            pattern: pattern.clone(),
            field: ctx.field_path(field),
            message: e.to_string(),
            location,
        })?;

    Ok(ReferencePolicy {
        kind,
        matcher,
        limit,
    })
}

fn parse_limit(node: &KdlNode, ctx: &ParseContext<'_>) -> ConfigResult<RetentionLimit> {
    let mut limit = RetentionLimit::default();
    let mut seen = HashSet::new();

    for child in block(node, ctx)? {
        ctx.ensure_unique(&mut seen, child)?;
        match child.name().value() {
            "last" => {
                let last = int_value(child, ctx)?;
                if last < -1 {
                    return Err(ctx.invalid(child, "must be -1 (no limit) or a positive count"));
                }
                limit.last = Some(last);
            }
            "in" => {
                let raw = string_value(child, ctx)?;
                let window = parse_duration(raw).map_err(|e| ctx.invalid(child, e))?;
                limit.within = Some(window);
            }
            "operator" => {
                let raw = string_value(child, ctx)?;
                limit.operator = raw
                    .parse::<Operator>()
                    .map_err(|message| ctx.invalid(child, message))?;
            }
            _ => return Err(ctx.unknown(child)),
        }
    }

    Ok(limit)
}

/// Position in the document, threaded explicitly through nested parse calls.
///
/// Each level holds an immutable reference to its parent so errors can name
/// the full field path.
struct ParseContext<'a> {
    source: &'a str,
    parent: Option<&'a ParseContext<'a>>,
    field: String,
}

impl<'a> ParseContext<'a> {
    fn root(source: &'a str) -> Self {
        Self {
            source,
            parent: None,
            field: String::new(),
        }
    }

    fn child(&self, field: impl Into<String>) -> ParseContext<'_> {
        ParseContext {
            source: self.source,
            parent: Some(self),
            field: field.into(),
        }
    }

    fn path(&self) -> String {
        let mut parts = Vec::new();
        let mut current = Some(self);
        while let Some(ctx) = current {
            if !ctx.field.is_empty() {
                parts.push(ctx.field.as_str());
            }
            current = ctx.parent;
        }
        parts.reverse();
        parts.join(".")
    }

    fn field_path(&self, field: &str) -> String {
        let path = self.path();
        if path.is_empty() {
            field.to_string()
        } else {
            format!("{}.{}", path, field)
        }
    }

    fn locate(&self, node: &KdlNode) -> Location {
        // Node spans may start at the whitespace preceding the node name.
        let offset = node.span().offset();
        let leading = self
            .source
            .get(offset..)
            .map(|rest| rest.len() - rest.trim_start().len())
            .unwrap_or(0);
        Location::from_offset(self.source, offset + leading)
    }

    fn unknown(&self, node: &KdlNode) -> ConfigError {
        ConfigError::UnknownField {
            field: self.field_path(node.name().value()),
            location: self.locate(node),
        }
    }

    fn duplicate(&self, node: &KdlNode) -> ConfigError {
        ConfigError::Duplicate {
            field: self.field_path(node.name().value()),
            location: self.locate(node),
        }
    }

    fn invalid(&self, node: &KdlNode, message: impl ToString) -> ConfigError {
        ConfigError::InvalidValue {
            field: self.field_path(node.name().value()),
            message: message.to_string(),
            location: self.locate(node),
        }
    }

    fn ensure_unique<'n>(
        &self,
        seen: &mut HashSet<&'n str>,
        node: &'n KdlNode,
    ) -> ConfigResult<()> {
        if seen.insert(node.name().value()) {
            Ok(())
        } else {
            Err(self.duplicate(node))
        }
    }
}

// Helper functions for extracting values from KDL nodes

/// Children of a section node. Sections take no arguments or properties.
fn block<'n>(node: &'n KdlNode, ctx: &ParseContext<'_>) -> ConfigResult<&'n [KdlNode]> {
    if let Some(entry) = node.entries().first() {
        let message = match entry.name() {
            Some(name) => format!("unexpected property `{}`", name.value()),
            None => "expected a block, found a value".to_string(),
        };
        return Err(ctx.invalid(node, message));
    }

    Ok(node.children().map(|doc| doc.nodes()).unwrap_or(&[]))
}

/// The single value of a field node such as `last 10`.
fn scalar<'n>(node: &'n KdlNode, ctx: &ParseContext<'_>) -> ConfigResult<&'n KdlValue> {
    if let Some(prop) = node.entries().iter().find_map(|e| e.name()) {
        return Err(ConfigError::UnknownField {
            field: format!(
                "{}.{}",
                ctx.field_path(node.name().value()),
                prop.value()
            ),
            location: ctx.locate(node),
        });
    }
    if node.children().is_some() {
        return Err(ctx.invalid(node, "expected a value, found a block"));
    }

    match node.entries() {
        [entry] => Ok(entry.value()),
        [] => Err(ctx.invalid(node, "missing value")),
        _ => Err(ctx.invalid(node, "expected exactly one value")),
    }
}

fn bool_value(node: &KdlNode, ctx: &ParseContext<'_>) -> ConfigResult<bool> {
    scalar(node, ctx)?
        .as_bool()
        .ok_or_else(|| ctx.invalid(node, "expected #true or #false"))
}

fn int_value(node: &KdlNode, ctx: &ParseContext<'_>) -> ConfigResult<i64> {
    scalar(node, ctx)?
        .as_integer()
        .and_then(|n| i64::try_from(n).ok())
        .ok_or_else(|| ctx.invalid(node, "expected an integer"))
}

fn uint_value(node: &KdlNode, ctx: &ParseContext<'_>) -> ConfigResult<u64> {
    scalar(node, ctx)?
        .as_integer()
        .and_then(|n| u64::try_from(n).ok())
        .ok_or_else(|| ctx.invalid(node, "expected a non-negative integer"))
}

fn string_value<'n>(node: &'n KdlNode, ctx: &ParseContext<'_>) -> ConfigResult<&'n str> {
    scalar(node, ctx)?
        .as_string()
        .ok_or_else(|| ctx.invalid(node, "expected a string"))
}

fn pattern_value(node: &KdlNode, ctx: &ParseContext<'_>) -> ConfigResult<String> {
    let pattern = string_value(node, ctx)?;
    if pattern.is_empty() {
        return Err(ctx.invalid(node, "pattern must not be empty"));
    }
    Ok(pattern.to_string())
}
