//! layerkeep CLI tool.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "layerkeep")]
#[command(about = "Build stage retention and cleanup", long_about = None)]
struct Cli {
    /// Emit logs as JSON
    #[arg(long, global = true, env = "LAYERKEEP_LOG_JSON")]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a cleanup policy document
    Validate {
        /// Path to the configuration file
        #[arg(default_value = "layerkeep.kdl")]
        path: PathBuf,
    },
    /// Show which stages a cleanup would delete
    Plan {
        #[command(flatten)]
        target: Target,
        /// Print the plan as JSON
        #[arg(long)]
        json: bool,
    },
    /// Delete stages no keep policy retains
    Cleanup {
        #[command(flatten)]
        target: Target,
        /// Compute the plan without deleting anything
        #[arg(long)]
        dry_run: bool,
        /// Maximum number of concurrent reference walks and deletions
        #[arg(long, default_value_t = 4)]
        concurrency: usize,
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Args)]
pub struct Target {
    /// Path to the cleanup policy document
    #[arg(long, env = "LAYERKEEP_CONFIG", default_value = "layerkeep.kdl")]
    config: PathBuf,

    /// Path to the project git repository
    #[arg(long, env = "LAYERKEEP_REPO", default_value = ".")]
    repo: PathBuf,

    /// Skip the Kubernetes liveness policy
    #[arg(long)]
    no_kube: bool,

    /// Only scan workloads in this namespace
    #[arg(long, env = "LAYERKEEP_NAMESPACE")]
    namespace: Option<String>,
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    match cli.command {
        Commands::Validate { path } => {
            commands::validate(&path)?;
        }
        Commands::Plan { target, json } => {
            commands::cleanup::plan(&target, json).await?;
        }
        Commands::Cleanup {
            target,
            dry_run,
            concurrency,
            json,
        } => {
            commands::cleanup::run(&target, dry_run, concurrency, json).await?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_cleanup_flags() {
        let cli = Cli::try_parse_from([
            "layerkeep",
            "cleanup",
            "--config",
            "policy.kdl",
            "--repo",
            "/src/app",
            "--dry-run",
            "--no-kube",
            "--concurrency",
            "8",
        ])
        .unwrap();

        match cli.command {
            Commands::Cleanup {
                target,
                dry_run,
                concurrency,
                json,
            } => {
                assert_eq!(target.config, PathBuf::from("policy.kdl"));
                assert_eq!(target.repo, PathBuf::from("/src/app"));
                assert!(target.no_kube);
                assert!(dry_run);
                assert!(!json);
                assert_eq!(concurrency, 8);
            }
            _ => panic!("expected cleanup command"),
        }
    }
}
