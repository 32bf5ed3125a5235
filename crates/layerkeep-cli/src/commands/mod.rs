//! CLI command implementations.

pub mod cleanup;

use anyhow::{Context, Result};
use std::path::Path;

pub fn validate(path: &Path) -> Result<()> {
    let config = layerkeep_config::load_cleanup_config(path)
        .with_context(|| format!("Invalid configuration {}", path.display()))?;

    println!(
        "Configuration is valid ({} keep policies)",
        config.keep_policies.len()
    );
    if config.disable_cleanup {
        println!("Note: cleanup is disabled");
    }
    Ok(())
}
