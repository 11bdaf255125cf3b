//! Batch manifest structures for the mutant-runner host process.
//!
//! This module defines structures for TOML files:
//! - [`BatchManifest`]: Runtime settings plus the jobs one host process runs
//! - [`JobEntry`]: One (mutant, test case) pair
//!
//! A standalone runtime file (just the `[engine]` and `[execution]` tables)
//! can be loaded with [`load_runtime_config`].

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{MutationPoint, RuntimeConfig, TestCase};

/// Batch manifest handed to one host process.
///
/// # Example
///
/// ```toml
/// [runtime.engine]
/// data_layout = "e-m:e-p:32:32-i64:64-n32:64-S128"
/// max_cleanup_callbacks = 64
///
/// [runtime.execution]
/// program_name = "mutant-runner"
/// suppress_output = true
///
/// [[jobs]]
/// artifacts = ["./mutants/0001/sample.wasm"]
///
/// [jobs.mutation]
/// mutator = "scalar_value_mutator"
/// file = "sample.cpp"
/// line = 4
/// column = 7
///
/// [jobs.test]
/// framework = "google_test"
/// name = "Sample.Foo"
/// initializers = ["_GLOBAL__sub_I_sample.cpp"]
/// ```
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct BatchManifest {
    /// Runtime configuration (engine + execution settings).
    #[serde(default)]
    pub runtime: RuntimeConfig,

    /// Jobs to run, in order.
    #[serde(default)]
    pub jobs: Vec<JobEntry>,
}

impl BatchManifest {
    /// Load a manifest from a TOML file.
    ///
    /// Relative artifact paths are resolved against the manifest's directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigFileError> {
        let path = path.as_ref();
        let content = read_file(path)?;
        let mut manifest = Self::from_toml(&content)?;

        if let Some(base) = path.parent() {
            for job in &mut manifest.jobs {
                for artifact in &mut job.artifacts {
                    if artifact.is_relative() {
                        *artifact = base.join(&*artifact);
                    }
                }
            }
        }

        debug!(
            path = %path.display(),
            jobs = manifest.jobs.len(),
            "Batch manifest loaded"
        );

        Ok(manifest)
    }

    /// Parse a manifest from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the string cannot be parsed as TOML.
    pub fn from_toml(content: &str) -> Result<Self, ConfigFileError> {
        toml::from_str(content).map_err(|e| ConfigFileError::Parse {
            message: e.to_string(),
        })
    }
}

/// One (mutant, test case) pair.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct JobEntry {
    /// The mutation the artifacts were built with.
    pub mutation: MutationPoint,

    /// Compiled artifacts making up the mutated program.
    pub artifacts: Vec<PathBuf>,

    /// The test to run.
    pub test: TestCase,
}

/// Load a standalone runtime configuration file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed.
pub fn load_runtime_config(path: impl AsRef<Path>) -> Result<RuntimeConfig, ConfigFileError> {
    let content = read_file(path.as_ref())?;
    toml::from_str(&content).map_err(|e| ConfigFileError::Parse {
        message: e.to_string(),
    })
}

fn read_file(path: &Path) -> Result<String, ConfigFileError> {
    std::fs::read_to_string(path).map_err(|e| ConfigFileError::Io {
        path: path.display().to_string(),
        source: e,
    })
}

/// Configuration file errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigFileError {
    /// Failed to read configuration file.
    #[error("Failed to read config file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse configuration file.
    #[error("Failed to parse config file: {message}")]
    Parse { message: String },
}
