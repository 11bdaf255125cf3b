//! The batch loop: one executor, many jobs, one JSON line each.

use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Context;
use serde::Serialize;
use tracing::{info, warn};

use mutant_runner_common::{
    BatchManifest, ExecutionResult, ExecutionStatus, JobEntry, RunnerError,
};
use mutant_runner_core::{CompiledArtifact, Mutant, MutantExecutor, WasmEngine};

/// Verdict counts for one batch.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchSummary {
    pub passed: usize,
    pub failed: usize,
    pub crashed: usize,
    /// Watchdog-reported timeouts. The engine never produces these.
    pub timed_out: usize,
    pub errors: usize,
    pub skipped: usize,
}

impl BatchSummary {
    fn record(&mut self, outcome: &Result<ExecutionResult, RunnerError>) {
        match outcome {
            Ok(result) => match result.status {
                ExecutionStatus::Passed => self.passed += 1,
                ExecutionStatus::Failed => self.failed += 1,
                ExecutionStatus::Crashed => self.crashed += 1,
                ExecutionStatus::TimedOut => self.timed_out += 1,
            },
            Err(_) => self.errors += 1,
        }
    }
}

/// One stdout line.
#[derive(Debug, Serialize)]
struct JobReport<'a> {
    mutant: String,
    test: &'a str,
    #[serde(flatten)]
    outcome: JobOutcome,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum JobOutcome {
    Finished {
        status: ExecutionStatus,
        elapsed_ms: u64,
    },
    Error {
        error: String,
    },
}

impl From<&Result<ExecutionResult, RunnerError>> for JobOutcome {
    fn from(outcome: &Result<ExecutionResult, RunnerError>) -> Self {
        match outcome {
            Ok(result) => Self::Finished {
                status: result.status,
                elapsed_ms: result.elapsed_ms,
            },
            Err(err) => Self::Error {
                error: err.to_string(),
            },
        }
    }
}

/// Run every job of `manifest`, stopping early once `cancelled` is set.
///
/// # Errors
///
/// Returns an error only if the executor cannot be set up or stdout is
/// gone. Failed jobs are reported and the batch moves on.
pub fn run(manifest: &BatchManifest, cancelled: &AtomicBool) -> anyhow::Result<BatchSummary> {
    let runtime = &manifest.runtime;

    let engine = WasmEngine::new(&runtime.engine).context("Failed to create engine")?;
    let mut executor = MutantExecutor::new(engine, runtime.execution.clone())
        .context("Failed to create executor")?;
    let decoration = executor.symbols().decoration();
    mutant_runner_host::register_all(executor.linker_mut(), decoration, &runtime.execution)
        .context("Failed to register host symbols")?;

    let mut summary = BatchSummary::default();
    let mut stdout = std::io::stdout().lock();

    for (index, job) in manifest.jobs.iter().enumerate() {
        if cancelled.load(Ordering::SeqCst) {
            summary.skipped = manifest.jobs.len() - index;
            warn!(skipped = summary.skipped, "Batch interrupted");
            break;
        }

        let outcome = run_job(&mut executor, job);
        summary.record(&outcome);

        let report = JobReport {
            mutant: job.mutation.id(),
            test: job.test.name(),
            outcome: JobOutcome::from(&outcome),
        };
        serde_json::to_writer(&mut stdout, &report).context("Failed to write job report")?;
        writeln!(stdout).context("Failed to write job report")?;
        stdout.flush().context("Failed to flush stdout")?;
    }

    info!(jobs = manifest.jobs.len(), "All jobs attempted");
    Ok(summary)
}

fn run_job(executor: &mut MutantExecutor, job: &JobEntry) -> Result<ExecutionResult, RunnerError> {
    let engine = executor.engine().inner();
    let artifacts = job
        .artifacts
        .iter()
        .map(|path| CompiledArtifact::from_file(engine, path))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|err| err.in_run(job.mutation.id(), job.test.name()))?;

    let mutant = Mutant::new(job.mutation.clone(), artifacts);
    executor.run(&mutant, &job.test)
}
