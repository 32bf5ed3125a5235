//! Kubernetes backend for the layerkeep liveness policy.
//!
//! Scans workload specs across the cluster and reports the stage digests of
//! the images they reference.

pub mod kubernetes;

pub use kubernetes::{KubernetesLiveImages, stage_digest_from_image};
