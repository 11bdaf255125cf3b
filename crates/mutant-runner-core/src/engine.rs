//! Wasmtime engine configuration and creation.
//!
//! The [`WasmEngine`] is the foundation of the runner. It is:
//! - Created once per host process and reused by every mutant run
//! - Configured with a pooling allocator so reloading the same program is cheap
//! - Free of per-run state

use std::sync::Arc;

use tracing::info;
use wasmtime::{Config, Engine, InstanceAllocationStrategy, PoolingAllocationConfig};

use mutant_runner_common::{EngineConfig, OptLevel, RunnerError};

/// WebAssembly engine wrapper.
///
/// Compiled artifacts and loader sessions must come from the same engine.
/// Mutant artifacts are compiled against [`WasmEngine::inner`].
///
/// # Example
///
/// ```ignore
/// use mutant_runner_common::EngineConfig;
/// use mutant_runner_core::WasmEngine;
///
/// let config = EngineConfig::default();
/// let engine = WasmEngine::new(&config)?;
/// ```
#[derive(Clone)]
pub struct WasmEngine {
    engine: Arc<Engine>,
    config: EngineConfig,
}

impl WasmEngine {
    /// Create a new WebAssembly engine with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The Wasmtime configuration is invalid
    /// - The pooling allocator cannot be initialized
    pub fn new(config: &EngineConfig) -> Result<Self, RunnerError> {
        let mut wasmtime_config = Config::new();

        wasmtime_config.cranelift_opt_level(match config.cranelift_opt_level {
            OptLevel::None => wasmtime::OptLevel::None,
            OptLevel::Speed => wasmtime::OptLevel::Speed,
            OptLevel::SpeedAndSize => wasmtime::OptLevel::SpeedAndSize,
        });

        if config.pooling_allocator {
            let pooling_config = Self::create_pooling_config(config);

            wasmtime_config
                .allocation_strategy(InstanceAllocationStrategy::Pooling(pooling_config));

            info!(
                max_instances = config.max_instances,
                instance_memory_mb = config.instance_memory_mb,
                "Pooling allocator enabled"
            );
        }

        let engine = Engine::new(&wasmtime_config).map_err(|e| {
            RunnerError::invalid_config(format!("Failed to create Wasmtime engine: {e}"))
        })?;

        info!(data_layout = %config.data_layout, "Wasmtime engine initialized");

        Ok(Self {
            engine: Arc::new(engine),
            config: config.clone(),
        })
    }

    /// Create pooling allocation configuration.
    fn create_pooling_config(config: &EngineConfig) -> PoolingAllocationConfig {
        let mut pooling = PoolingAllocationConfig::default();

        // One slot per artifact of the mutant currently loaded
        pooling.total_core_instances(config.max_instances);
        pooling.total_memories(config.max_instances);
        pooling.total_tables(config.max_instances);

        let max_memory_bytes = (config.instance_memory_mb as usize) * 1024 * 1024;
        pooling.max_memory_size(max_memory_bytes);

        pooling
    }

    /// Get a reference to the inner Wasmtime engine.
    pub fn inner(&self) -> &Engine {
        &self.engine
    }

    /// Get the engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Check if the pooling allocator is enabled.
    pub fn is_pooling_enabled(&self) -> bool {
        self.config.pooling_allocator
    }
}

impl std::fmt::Debug for WasmEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WasmEngine")
            .field("data_layout", &self.config.data_layout)
            .field("pooling_allocator", &self.config.pooling_allocator)
            .field("max_instances", &self.config.max_instances)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_creation_default() {
        let config = EngineConfig::default();
        let engine = WasmEngine::new(&config);

        assert!(engine.is_ok());
        let engine = engine.unwrap();
        assert!(engine.is_pooling_enabled());
    }

    #[test]
    fn test_engine_creation_no_pooling() {
        let config = EngineConfig {
            pooling_allocator: false,
            cranelift_opt_level: OptLevel::Speed,
            ..Default::default()
        };
        let engine = WasmEngine::new(&config);

        assert!(engine.is_ok());
        let engine = engine.unwrap();
        assert!(!engine.is_pooling_enabled());
    }

    #[test]
    fn test_engine_debug() {
        let config = EngineConfig::default();
        let engine = WasmEngine::new(&config).unwrap();

        let debug_str = format!("{engine:?}");
        assert!(debug_str.contains("WasmEngine"));
        assert!(debug_str.contains("data_layout"));
    }
}
