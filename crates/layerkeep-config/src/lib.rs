//! KDL configuration parsing for layerkeep.
//!
//! This crate handles parsing of:
//! - Cleanup policy documents (layerkeep.kdl)
//! - Git reference patterns (literal or `/regex/`)
//! - Duration strings such as `72h` or `1h30m`

pub mod cleanup;
pub mod duration;
pub mod error;
pub mod matcher;
pub mod policy;

pub use cleanup::{load_cleanup_config, parse_cleanup_config};
pub use error::{ConfigError, ConfigResult, Location};
pub use matcher::ReferenceMatcher;
pub use policy::{
    CleanupConfig, DEFAULT_KEEP_IMAGES_BUILT_WITHIN_LAST_N_HOURS, KeepPolicy, Operator,
    ReferencePolicy, RetentionLimit,
};
