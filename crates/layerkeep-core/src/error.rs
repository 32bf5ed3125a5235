//! Error types for layerkeep.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// A commit object could not be read from the local repository.
    #[error("unable to read commit {hash}: {message}")]
    HistoryAccess { hash: String, message: String },

    /// A reference listing failed.
    #[error("unable to resolve references: {0}")]
    ReferenceAccess(String),

    /// The artifact store or live image provider could not be reached.
    #[error("store access failed: {0}")]
    StoreAccess(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("cancelled")]
    Cancelled,

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn history(hash: impl ToString, message: impl ToString) -> Self {
        Self::HistoryAccess {
            hash: hash.to_string(),
            message: message.to_string(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
