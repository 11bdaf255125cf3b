//! Common types, errors, and configuration for mutant-runner.
//!
//! This crate provides shared functionality used across the mutant-runner workspace:
//! - Error types using `thiserror` for type-safe error handling
//! - Configuration structures and the batch manifest
//! - The data model exchanged with callers (test cases, verdicts)

pub mod config;
pub mod config_file;
pub mod error;
pub mod types;

pub use config::{EngineConfig, ExecutionConfig, OptLevel, RuntimeConfig};
pub use config_file::{BatchManifest, ConfigFileError, JobEntry, load_runtime_config};
pub use error::RunnerError;
pub use types::{
    ExecutionResult, ExecutionStatus, MutationPoint, SourceLocation, TestCase, TestFramework,
};
