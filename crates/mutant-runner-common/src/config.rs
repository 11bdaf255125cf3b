//! Configuration structures for the mutant-runner.
//!
//! This module defines configuration options for the engine:
//! - [`RuntimeConfig`]: Top-level configuration containing all settings
//! - [`EngineConfig`]: Settings fixed for the lifetime of one engine
//! - [`ExecutionConfig`]: Settings applied to every run

use serde::{Deserialize, Serialize};

/// Top-level runtime configuration.
///
/// This structure contains all configuration options for the mutant-runner.
/// It is usually embedded in a batch manifest under `[runtime]`.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RuntimeConfig {
    /// Engine configuration.
    #[serde(default)]
    pub engine: EngineConfig,

    /// Per-run execution configuration.
    #[serde(default)]
    pub execution: ExecutionConfig,
}

/// Code generation optimization level for loaded artifacts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OptLevel {
    /// No optimizations. Fastest load.
    #[default]
    None,
    /// Optimize for speed.
    Speed,
    /// Optimize for speed and size.
    SpeedAndSize,
}

/// Engine configuration.
///
/// These settings are read once when the engine is constructed. The symbol
/// resolution table derived from them is reused by every run.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineConfig {
    /// Target data layout string.
    ///
    /// Only the mangling component (`m:<mode>`) is consulted. It decides
    /// whether global symbol names carry a leading underscore.
    #[serde(default = "defaults::data_layout")]
    pub data_layout: String,

    /// Enable pooling allocator for repeated instantiation.
    ///
    /// Every mutant reloads the same logical program, so instance slots
    /// are reused run after run.
    #[serde(default = "defaults::pooling_allocator")]
    pub pooling_allocator: bool,

    /// Maximum instances in the pool.
    ///
    /// Bounds the number of artifacts one mutant may consist of.
    /// Only effective when `pooling_allocator` is enabled.
    #[serde(default = "defaults::max_instances")]
    pub max_instances: u32,

    /// Memory per instance slot in megabytes.
    ///
    /// Only effective when `pooling_allocator` is enabled.
    #[serde(default = "defaults::instance_memory_mb")]
    pub instance_memory_mb: u32,

    /// Capacity of the lifecycle ledger.
    ///
    /// Registering more cleanup callbacks than this during one run is a
    /// fatal error for that run.
    #[serde(default = "defaults::max_cleanup_callbacks")]
    pub max_cleanup_callbacks: usize,

    /// Code generation optimization level.
    #[serde(default)]
    pub cranelift_opt_level: OptLevel,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_layout: defaults::data_layout(),
            pooling_allocator: defaults::pooling_allocator(),
            max_instances: defaults::max_instances(),
            instance_memory_mb: defaults::instance_memory_mb(),
            max_cleanup_callbacks: defaults::max_cleanup_callbacks(),
            cranelift_opt_level: OptLevel::default(),
        }
    }
}

/// Per-run execution configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExecutionConfig {
    /// Program name passed as `argv[0]` to test framework entry points.
    #[serde(default = "defaults::program_name")]
    pub program_name: String,

    /// Silence output produced by mutant code.
    ///
    /// When disabled, guest stdout/stderr are inherited from the host,
    /// which is useful when debugging a single mutant.
    #[serde(default = "defaults::suppress_output")]
    pub suppress_output: bool,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            program_name: defaults::program_name(),
            suppress_output: defaults::suppress_output(),
        }
    }
}

/// Default value functions for serde.
mod defaults {
    /// wasm32 data layout, ELF-style mangling.
    pub fn data_layout() -> String {
        "e-m:e-p:32:32-i64:64-n32:64-S128".to_string()
    }

    pub const fn pooling_allocator() -> bool {
        true
    }

    pub const fn max_instances() -> u32 {
        16
    }

    pub const fn instance_memory_mb() -> u32 {
        64
    }

    pub const fn max_cleanup_callbacks() -> usize {
        64
    }

    pub fn program_name() -> String {
        "mutant-runner".to_string()
    }

    pub const fn suppress_output() -> bool {
        true
    }
}
