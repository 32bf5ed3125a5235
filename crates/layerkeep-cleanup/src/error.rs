//! Cleanup run errors.

use layerkeep_core::Error;
use thiserror::Error;

/// Reasons a cleanup run aborts. Every variant means no deletion was issued.
#[derive(Debug, Error)]
pub enum CleanupError {
    #[error("keep policy #{policy} ({description}): {source}")]
    References {
        policy: usize,
        description: String,
        #[source]
        source: Error,
    },

    #[error("keep policy #{policy} ({description}), reference {reference}: {source}")]
    History {
        policy: usize,
        description: String,
        reference: String,
        #[source]
        source: Error,
    },

    #[error("artifact store {store}: {source}")]
    Store {
        store: &'static str,
        #[source]
        source: Error,
    },

    #[error("live image provider {provider}: {source}")]
    Liveness {
        provider: &'static str,
        #[source]
        source: Error,
    },

    #[error("{policy} policy is enabled but no {collaborator} is configured")]
    MissingCollaborator {
        policy: &'static str,
        collaborator: &'static str,
    },

    #[error("cleanup cancelled")]
    Cancelled,

    #[error("reference walk task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl CleanupError {
    pub fn is_cancelled(&self) -> bool {
        match self {
            CleanupError::Cancelled => true,
            CleanupError::References { source, .. }
            | CleanupError::History { source, .. }
            | CleanupError::Store { source, .. }
            | CleanupError::Liveness { source, .. } => source.is_cancelled(),
            _ => false,
        }
    }

    /// Collapse wrapped cancellations so callers see a single variant.
    pub(crate) fn normalize(self) -> Self {
        if self.is_cancelled() {
            CleanupError::Cancelled
        } else {
            self
        }
    }
}
