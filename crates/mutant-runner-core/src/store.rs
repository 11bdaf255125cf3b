//! Per-run session context and store management.
//!
//! This module provides:
//! - [`SessionContext`]: Per-run state reachable from host functions
//! - [`create_store`]: A fresh store for one loader session

use std::time::{Duration, Instant};

use wasmtime::Store;
use wasmtime_wasi::WasiCtxBuilder;
use wasmtime_wasi::pipe::SinkOutputStream;
use wasmtime_wasi::preview1::WasiP1Ctx;

use crate::WasmEngine;
use crate::lifecycle::LifecycleInterceptor;
use mutant_runner_common::ExecutionConfig;

/// Per-run execution context.
///
/// Created for every loader session and destroyed when the session is
/// unloaded. Host functions reach it through [`wasmtime::Caller`].
pub struct SessionContext {
    /// Unique session identifier for tracing.
    pub session_id: String,

    /// Identity of the mutant loaded in this session.
    pub mutant_id: String,

    /// Calls swallowed by the output suppressor.
    pub suppressed_output_calls: u64,

    /// Ledger handle for the cleanup-registration substitute.
    interceptor: LifecycleInterceptor,

    /// WASI preview1 context.
    wasi: WasiP1Ctx,

    /// Session start time.
    start_time: Instant,
}

impl SessionContext {
    /// Create a new session context.
    ///
    /// # Arguments
    ///
    /// * `mutant_id` - Identity of the mutant being loaded
    /// * `interceptor` - The executor's lifecycle interceptor
    /// * `config` - Execution configuration (output suppression)
    pub fn new(
        mutant_id: impl Into<String>,
        interceptor: LifecycleInterceptor,
        config: &ExecutionConfig,
    ) -> Self {
        let mut builder = WasiCtxBuilder::new();
        builder.arg(&config.program_name);

        if config.suppress_output {
            builder.stdout(SinkOutputStream).stderr(SinkOutputStream);
        } else {
            builder.inherit_stdout().inherit_stderr();
        }

        Self {
            session_id: uuid::Uuid::new_v4().to_string(),
            mutant_id: mutant_id.into(),
            suppressed_output_calls: 0,
            interceptor,
            wasi: builder.build_p1(),
            start_time: Instant::now(),
        }
    }

    /// The lifecycle interceptor of the owning executor.
    pub fn interceptor(&self) -> &LifecycleInterceptor {
        &self.interceptor
    }

    /// WASI context, for host function registration.
    pub fn wasi_mut(&mut self) -> &mut WasiP1Ctx {
        &mut self.wasi
    }

    /// Get elapsed time since the session was created.
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }
}

impl std::fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionContext")
            .field("session_id", &self.session_id)
            .field("mutant_id", &self.mutant_id)
            .field("suppressed_output_calls", &self.suppressed_output_calls)
            .finish_non_exhaustive()
    }
}

/// Create a new Wasmtime store for one loader session.
pub fn create_store(engine: &WasmEngine, context: SessionContext) -> Store<SessionContext> {
    Store::new(engine.inner(), context)
}
