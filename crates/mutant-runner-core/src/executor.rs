//! The mutant execution engine.
//!
//! [`MutantExecutor`] drives one run through its phases:
//!
//! ```text
//! Idle -> Loaded -> Initialized -> Invoked -> Drained -> Unloaded -> Idle
//! ```
//!
//! A fatal error before `Invoked` skips the remaining phases, but the ledger
//! is always emptied and whatever was loaded is always unloaded before the
//! error is reported.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tracing::{debug, info, instrument, warn};
use wasmtime::Linker;

use crate::WasmEngine;
use crate::artifact::Mutant;
use crate::driver::{DriverRegistry, TestDriver, status_from_code};
use crate::lifecycle::LifecycleInterceptor;
use crate::session::LoaderSession;
use crate::store::SessionContext;
use crate::symbols::SymbolResolutionTable;
use mutant_runner_common::{
    ExecutionConfig, ExecutionResult, ExecutionStatus, RunnerError, TestCase,
};

/// Held for the whole of every run in this process.
static RUN_LOCK: Mutex<()> = parking_lot::const_mutex(());

/// Phase of the run in progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Idle,
    Loaded,
    Initialized,
    Invoked,
    Drained,
    Unloaded,
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Loaded => "loaded",
            Self::Initialized => "initialized",
            Self::Invoked => "invoked",
            Self::Drained => "drained",
            Self::Unloaded => "unloaded",
        };
        f.write_str(name)
    }
}

/// Runs single tests against mutants, one at a time.
///
/// Host-process symbols are registered on [`MutantExecutor::linker_mut`]
/// before the first run.
///
/// # Example
///
/// ```ignore
/// let engine = WasmEngine::new(&config.engine)?;
/// let mut executor = MutantExecutor::new(engine, config.execution.clone())?;
/// let decoration = executor.symbols().decoration();
/// mutant_runner_host::register_all(executor.linker_mut(), decoration, &config.execution)?;
///
/// let result = executor.run(&mutant, &TestCase::google_test("Suite.case1"))?;
/// ```
pub struct MutantExecutor {
    engine: WasmEngine,
    linker: Linker<SessionContext>,
    symbols: SymbolResolutionTable,
    drivers: DriverRegistry,
    interceptor: LifecycleInterceptor,
    execution: ExecutionConfig,
    phase: RunPhase,
}

impl MutantExecutor {
    /// Create an executor with the built-in test drivers.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine's data layout names an unknown
    /// mangling mode.
    pub fn new(engine: WasmEngine, execution: ExecutionConfig) -> Result<Self, RunnerError> {
        let symbols = SymbolResolutionTable::from_data_layout(&engine.config().data_layout)?;
        let drivers = DriverRegistry::with_builtin(symbols.decoration(), &execution.program_name);
        let interceptor = LifecycleInterceptor::new(engine.config().max_cleanup_callbacks);
        let linker = Linker::new(engine.inner());

        info!(
            decoration = ?symbols.decoration().prefix(),
            ledger_capacity = interceptor.capacity(),
            drivers = drivers.len(),
            "Mutant executor ready"
        );

        Ok(Self {
            engine,
            linker,
            symbols,
            drivers,
            interceptor,
            execution,
            phase: RunPhase::Idle,
        })
    }

    /// Linker holding the symbols resident in the host process.
    pub fn linker_mut(&mut self) -> &mut Linker<SessionContext> {
        &mut self.linker
    }

    /// Add or replace the driver for a framework.
    pub fn register_driver(&mut self, driver: Arc<dyn TestDriver>) {
        let framework = driver.framework();
        if self.drivers.register(driver).is_some() {
            debug!(%framework, "Test driver replaced");
        }
    }

    /// The symbol resolution table.
    pub fn symbols(&self) -> &SymbolResolutionTable {
        &self.symbols
    }

    /// The engine artifacts must be compiled with.
    pub fn engine(&self) -> &WasmEngine {
        &self.engine
    }

    /// Pending cleanup callbacks. Zero between runs.
    pub fn ledger_len(&self) -> usize {
        self.interceptor.len()
    }

    /// Current phase. [`RunPhase::Idle`] between runs.
    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    /// Run one test against one mutant.
    ///
    /// A trap in mutant code is a [`ExecutionStatus::Crashed`] verdict, not
    /// an error.
    ///
    /// # Errors
    ///
    /// Returns [`RunnerError::RunFailed`] carrying the mutant and test
    /// identity if the run could not be carried out. The executor is ready
    /// for the next run either way.
    #[instrument(skip_all, fields(mutant = %mutant.id(), test = test.name()))]
    pub fn run(
        &mut self,
        mutant: &Mutant,
        test: &TestCase,
    ) -> Result<ExecutionResult, RunnerError> {
        let _guard = RUN_LOCK.lock();

        let result = self.run_locked(mutant, test);
        self.enter(RunPhase::Idle);

        match result {
            Ok(result) => {
                info!(
                    status = %result.status,
                    elapsed_ms = result.elapsed_ms,
                    "Run finished"
                );
                Ok(result)
            }
            Err(err) => {
                warn!(error = %err, "Run failed");
                Err(err.in_run(mutant.id(), test.name()))
            }
        }
    }

    fn run_locked(
        &mut self,
        mutant: &Mutant,
        test: &TestCase,
    ) -> Result<ExecutionResult, RunnerError> {
        let driver = self.drivers.get(test.framework())?;

        self.interceptor.begin_run();
        let context = SessionContext::new(mutant.id(), self.interceptor.clone(), &self.execution);

        let mut session =
            match LoaderSession::load(&self.engine, &self.linker, &self.symbols, mutant, context) {
                Ok(session) => session,
                Err(err) => {
                    self.interceptor.discard();
                    return Err(err);
                }
            };
        self.enter(RunPhase::Loaded);

        let start = Instant::now();
        let outcome = self.initialize_and_invoke(driver.as_ref(), &mut session, test);
        let elapsed = start.elapsed();

        let status = match outcome {
            Ok(status) => status,
            Err(err) => {
                let discarded = self.interceptor.discard();
                debug!(discarded, "Ledger discarded after failed run");
                session.unload();
                self.enter(RunPhase::Unloaded);
                return Err(err);
            }
        };

        let report = session.drain_lifecycle();
        self.enter(RunPhase::Drained);
        debug!(
            invoked = report.invoked,
            failed = report.failed,
            "Cleanup callbacks drained"
        );

        session.unload();
        self.enter(RunPhase::Unloaded);

        Ok(ExecutionResult {
            status,
            elapsed_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
        })
    }

    /// Run initializers and the test. Traps become a crashed verdict.
    fn initialize_and_invoke(
        &mut self,
        driver: &dyn TestDriver,
        session: &mut LoaderSession,
        test: &TestCase,
    ) -> Result<ExecutionStatus, RunnerError> {
        let initialized = driver.run_initializers(session, test);
        let invoked = initialized.and_then(|()| {
            self.enter(RunPhase::Initialized);
            driver.invoke(session, test)
        });

        match invoked {
            Ok(code) => {
                self.enter(RunPhase::Invoked);
                debug!(code, "Test returned");
                Ok(status_from_code(code))
            }
            Err(RunnerError::Trap { symbol, message }) => {
                self.enter(RunPhase::Invoked);
                warn!(symbol = %symbol, trap = %message, "Mutant trapped");
                Ok(ExecutionStatus::Crashed)
            }
            Err(RunnerError::GuestExit { code }) => {
                self.enter(RunPhase::Invoked);
                warn!(code, "Mutant exited during static initialization");
                Ok(ExecutionStatus::Crashed)
            }
            Err(err) => Err(err),
        }
    }

    fn enter(&mut self, phase: RunPhase) {
        debug!(from = %self.phase, to = %phase, "Run phase");
        self.phase = phase;
    }
}

impl fmt::Debug for MutantExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MutantExecutor")
            .field("engine", &self.engine)
            .field("drivers", &self.drivers)
            .field("phase", &self.phase)
            .finish_non_exhaustive()
    }
}
