//! Configuration parsing errors.

use std::fmt;
use thiserror::Error;

/// Position of a node in the source document (1-based).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Location {
    pub line: usize,
    pub column: usize,
}

impl Location {
    /// Convert a byte offset into a line and column.
    pub fn from_offset(source: &str, offset: usize) -> Self {
        let prefix = source.get(..offset).unwrap_or(source);
        let line = prefix.matches('\n').count() + 1;
        let column = match prefix.rfind('\n') {
            Some(newline) => prefix[newline + 1..].chars().count() + 1,
            None => prefix.chars().count() + 1,
        };
        Self { line, column }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("KDL parse error: {0}")]
    Parse(#[from] kdl::KdlError),

    #[error("{location}: unknown field `{field}`")]
    UnknownField { field: String, location: Location },

    #[error("{location}: missing required field: {field}")]
    MissingField { field: String, location: Location },

    #[error("{location}: {field}: {message}")]
    Conflict {
        field: String,
        message: String,
        location: Location,
    },

    #[error("{location}: invalid value for {field}: {message}")]
    InvalidValue {
        field: String,
        message: String,
        location: Location,
    },

    #[error("{location}: invalid pattern {pattern:?} for {field}: {message}")]
    InvalidPattern {
        pattern: String,
        field: String,
        message: String,
        location: Location,
    },

    #[error("{location}: duplicate definition: {field}")]
    Duplicate { field: String, location: Location },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ConfigError {
    /// Dotted path of the offending field, when the error is tied to one.
    pub fn field(&self) -> Option<&str> {
        match self {
            ConfigError::UnknownField { field, .. }
            | ConfigError::MissingField { field, .. }
            | ConfigError::Conflict { field, .. }
            | ConfigError::InvalidValue { field, .. }
            | ConfigError::InvalidPattern { field, .. }
            | ConfigError::Duplicate { field, .. } => Some(field),
            ConfigError::Parse(_) | ConfigError::Io(_) => None,
        }
    }

    pub fn location(&self) -> Option<Location> {
        match self {
            ConfigError::UnknownField { location, .. }
            | ConfigError::MissingField { location, .. }
            | ConfigError::Conflict { location, .. }
            | ConfigError::InvalidValue { location, .. }
            | ConfigError::InvalidPattern { location, .. }
            | ConfigError::Duplicate { location, .. } => Some(*location),
            ConfigError::Parse(_) | ConfigError::Io(_) => None,
        }
    }
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;
