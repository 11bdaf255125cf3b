//! mutant-runner CLI entry point.
//!
//! Runs a batch of (mutant, test) jobs in this process and prints one JSON
//! line per job on stdout. Logs go to stderr.

mod batch;

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mutant_runner_common::{BatchManifest, load_runtime_config};

/// Run mutants against single tests, in process.
#[derive(Debug, Parser)]
#[command(name = "mutant-runner", version, about)]
struct Cli {
    /// Batch manifest listing the jobs to run.
    #[arg(long, env = "MUTANT_RUNNER_MANIFEST")]
    manifest: PathBuf,

    /// Runtime settings overriding the manifest's `[runtime]` table.
    #[arg(long, env = "MUTANT_RUNNER_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,mutant_runner=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let mut manifest = BatchManifest::from_file(&cli.manifest)
        .with_context(|| format!("Failed to load manifest {}", cli.manifest.display()))?;

    if let Some(path) = &cli.config {
        manifest.runtime = load_runtime_config(path)
            .with_context(|| format!("Failed to load runtime config {}", path.display()))?;
    }

    info!(
        manifest = %cli.manifest.display(),
        jobs = manifest.jobs.len(),
        data_layout = %manifest.runtime.engine.data_layout,
        "Configuration loaded"
    );

    let cancelled = Arc::new(AtomicBool::new(false));
    {
        let cancelled = Arc::clone(&cancelled);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received, stopping after the current job");
                cancelled.store(true, Ordering::SeqCst);
            }
        });
    }

    let summary = tokio::task::spawn_blocking(move || batch::run(&manifest, &cancelled))
        .await
        .context("Batch worker panicked")??;

    info!(
        passed = summary.passed,
        failed = summary.failed,
        crashed = summary.crashed,
        timed_out = summary.timed_out,
        errors = summary.errors,
        skipped = summary.skipped,
        "Batch finished"
    );

    Ok(())
}
