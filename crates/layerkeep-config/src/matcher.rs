//! Git reference name matching.

use regex::Regex;

/// Anchored matcher compiled from a `tag` or `branch` pattern.
///
/// `"/…/"` patterns are regular expressions; anything else matches the
/// literal name. Both forms must match the whole reference name.
#[derive(Debug, Clone)]
pub struct ReferenceMatcher {
    pattern: String,
    regex: Regex,
}

impl ReferenceMatcher {
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        let expr = match regex_body(pattern) {
            Some(body) => format!("^(?:{})$", body),
            None => format!("^{}$", regex::escape(pattern)),
        };

        Ok(Self {
            pattern: pattern.to_string(),
            regex: Regex::new(&expr)?,
        })
    }

    pub fn is_match(&self, name: &str) -> bool {
        self.regex.is_match(name)
    }

    /// The pattern as written in the configuration.
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn is_regex(&self) -> bool {
        regex_body(&self.pattern).is_some()
    }
}

fn regex_body(pattern: &str) -> Option<&str> {
    if pattern.len() < 2 {
        return None;
    }
    pattern.strip_prefix('/')?.strip_suffix('/')
}

impl PartialEq for ReferenceMatcher {
    fn eq(&self, other: &Self) -> bool {
        self.pattern == other.pattern
    }
}

impl Eq for ReferenceMatcher {}
