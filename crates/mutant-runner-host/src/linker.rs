//! Host-process symbol registration for Wasmtime linkers.
//!
//! Everything defined here is what a mutant sees as "already resident in the
//! process": WASI preview1 for the C runtime and the C output entry points.
//! Both are always present; `suppress_output` only decides where output goes.

use tracing::debug;
use wasmtime::Linker;

use crate::suppressor::OutputSuppressor;
use mutant_runner_common::{ExecutionConfig, RunnerError};
use mutant_runner_core::{SessionContext, SymbolDecoration};

/// Register all host-process symbols on a session linker.
///
/// This registers:
/// - `wasi_snapshot_preview1::*` - WASI preview1, backed by the session's context
/// - `env::printf` and friends - Swallowed if `suppress_output` is set, echoed otherwise
///
/// # Errors
///
/// Returns an error if a registration clashes with an existing definition.
pub fn register_all(
    linker: &mut Linker<SessionContext>,
    decoration: SymbolDecoration,
    config: &ExecutionConfig,
) -> Result<(), RunnerError> {
    register_wasi(linker)?;

    if !config.suppress_output {
        debug!("Output suppression disabled, guest output is echoed");
    }
    register_suppressor(linker, decoration, !config.suppress_output)
}

/// Register WASI preview1.
///
/// Stdio routing is decided per session by [`SessionContext::new`].
pub fn register_wasi(linker: &mut Linker<SessionContext>) -> Result<(), RunnerError> {
    wasmtime_wasi::preview1::add_to_linker_sync(linker, SessionContext::wasi_mut).map_err(|e| {
        RunnerError::invalid_config(format!("Failed to register WASI preview1: {e}"))
    })
}

/// Register the C output entry points, swallowing or echoing.
pub fn register_suppressor(
    linker: &mut Linker<SessionContext>,
    decoration: SymbolDecoration,
    echo: bool,
) -> Result<(), RunnerError> {
    OutputSuppressor::new(decoration)
        .echoing(echo)
        .register(linker)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mutant_runner_common::EngineConfig;
    use mutant_runner_core::WasmEngine;

    fn linker() -> Linker<SessionContext> {
        let config = EngineConfig {
            pooling_allocator: false,
            ..Default::default()
        };
        let engine = WasmEngine::new(&config).unwrap();
        Linker::new(engine.inner())
    }

    #[test]
    fn test_register_wasi() {
        let mut linker = linker();
        assert!(register_wasi(&mut linker).is_ok());
    }

    #[test]
    fn test_register_all_with_suppression() {
        let mut linker = linker();

        register_all(&mut linker, SymbolDecoration::none(), &ExecutionConfig::default()).unwrap();

        // Already defined
        assert!(register_suppressor(&mut linker, SymbolDecoration::none(), false).is_err());
    }

    #[test]
    fn test_output_symbols_defined_without_suppression() {
        let mut linker = linker();
        let config = ExecutionConfig {
            suppress_output: false,
            ..Default::default()
        };

        register_all(&mut linker, SymbolDecoration::none(), &config).unwrap();

        assert!(register_suppressor(&mut linker, SymbolDecoration::none(), true).is_err());
    }
}
