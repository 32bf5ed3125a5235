//! Stage storage backends for layerkeep.
//!
//! Stages are images carrying layerkeep labels. The Docker backend lists
//! them from the local daemon and removes them by image id.

pub mod docker;
pub mod labels;

pub use docker::DockerStageStore;
