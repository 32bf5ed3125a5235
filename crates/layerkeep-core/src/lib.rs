//! Core domain types and traits for layerkeep.
//!
//! This crate contains:
//! - Stage digests and stage metadata
//! - Commit graph types and the git repository trait
//! - Artifact store and live image provider abstractions
//! - Cancellation and the shared error taxonomy

pub mod artifact;
pub mod cancel;
pub mod error;
pub mod git;
pub mod live;
pub mod stage;

pub use cancel::CancelToken;
pub use error::{Error, Result};
pub use stage::{StageDigest, StageMetadata, StageRecord};
