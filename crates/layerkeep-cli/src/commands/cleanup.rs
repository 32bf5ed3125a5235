//! Plan and cleanup commands.

use anyhow::{Context, Result, bail};
use layerkeep_cleanup::history::DEFAULT_CONCURRENCY;
use layerkeep_cleanup::{CleanupOrchestrator, CleanupPlan, CleanupReport, RetentionEngine};
use layerkeep_config::load_cleanup_config;
use layerkeep_core::CancelToken;
use layerkeep_git::LocalGitRepository;
use layerkeep_kube::KubernetesLiveImages;
use layerkeep_store::DockerStageStore;
use std::sync::Arc;
use tracing::{info, warn};

use crate::Target;

pub async fn plan(target: &Target, json: bool) -> Result<()> {
    let orchestrator = orchestrator(target, DEFAULT_CONCURRENCY).await?;
    let cancel = cancel_on_ctrl_c();

    let plan = orchestrator.plan(&cancel).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&plan)?);
    } else {
        print_plan(&plan);
    }
    Ok(())
}

pub async fn run(target: &Target, dry_run: bool, concurrency: usize, json: bool) -> Result<()> {
    let orchestrator = orchestrator(target, concurrency)
        .await?
        .with_dry_run(dry_run)
        .with_concurrency(concurrency);
    let cancel = cancel_on_ctrl_c();

    let report = orchestrator.run(&cancel).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }

    if report.cancelled {
        bail!(
            "Cleanup interrupted after deleting {} stage(s)",
            report.deleted.len()
        );
    }
    if !report.is_success() {
        bail!("{} stage(s) could not be deleted", report.failed.len());
    }
    Ok(())
}

async fn orchestrator(target: &Target, concurrency: usize) -> Result<CleanupOrchestrator> {
    let mut config = load_cleanup_config(&target.config)
        .with_context(|| format!("Invalid configuration {}", target.config.display()))?;
    if target.no_kube && config.kubernetes_policy_enabled() {
        warn!("Kubernetes policy disabled from the command line");
        config.disable_kubernetes_based_policy = true;
    }

    let store = DockerStageStore::new().context("Failed to connect to Docker")?;
    let mut engine =
        RetentionEngine::new(config.clone(), Arc::new(store)).with_concurrency(concurrency);

    if config.disable_cleanup {
        return Ok(CleanupOrchestrator::new(engine));
    }

    if config.git_history_policy_enabled() && !config.keep_policies.is_empty() {
        let repository = LocalGitRepository::open(&target.repo)
            .with_context(|| format!("Failed to open git repository {}", target.repo.display()))?;
        info!(path = %target.repo.display(), "Opened git repository");
        engine = engine.with_repository(repository);
    }

    if config.kubernetes_policy_enabled() {
        let mut live = KubernetesLiveImages::new()
            .await
            .context("Failed to connect to Kubernetes")?;
        if let Some(namespace) = &target.namespace {
            live = live.with_namespace(namespace.clone());
        }
        engine = engine.with_live_images(Arc::new(live));
    }

    Ok(CleanupOrchestrator::new(engine))
}

fn cancel_on_ctrl_c() -> CancelToken {
    let cancel = CancelToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling cleanup");
            token.cancel();
        }
    });
    cancel
}

fn print_plan(plan: &CleanupPlan) {
    if plan.cleanup_disabled {
        println!("Cleanup is disabled by configuration");
        return;
    }

    println!(
        "Stages: {} total, {} kept, {} to delete",
        plan.total_stages,
        plan.keep.len(),
        plan.delete.len()
    );
    println!(
        "Kept by: git history {}, kubernetes {}, recency {}, dependencies {}",
        plan.kept_by.git_history,
        plan.kept_by.kubernetes,
        plan.kept_by.recency,
        plan.kept_by.dependencies
    );
    for digest in &plan.delete {
        println!("  delete {}", digest);
    }
}

fn print_report(report: &CleanupReport) {
    print_plan(&report.plan);
    if report.dry_run {
        println!("Dry run: nothing deleted");
        return;
    }

    println!("Deleted {} stage(s)", report.deleted.len());
    if report.cancelled {
        println!("Interrupted before every planned stage was deleted");
    }
    for failure in &report.failed {
        println!("  failed {}: {}", failure.digest, failure.message);
    }
}
