//! Error types for the mutant-runner.
//!
//! This module defines the error hierarchy using `thiserror`:
//! - [`RunnerError`]: Errors raised while loading and running one mutant
//!
//! Every variant except [`RunnerError::InvalidConfig`] and
//! [`RunnerError::Io`] is fatal to a single run only. The batch that issued
//! the run keeps going.

use std::io;

use thiserror::Error;

/// Mutant execution errors.
///
/// These errors represent failures that abort one run between loading the
/// mutant's artifacts and invoking its test. They are distinct from the test
/// outcome itself, which is always reported as an
/// [`ExecutionStatus`](crate::ExecutionStatus).
#[derive(Error, Debug)]
pub enum RunnerError {
    /// An import of a loaded artifact could not be bound.
    #[error("Unresolved symbol: {module}::{symbol}")]
    UnresolvedSymbol {
        /// Import namespace the symbol was requested from.
        module: String,
        /// The decorated symbol name.
        symbol: String,
    },

    /// An artifact could not be parsed or validated.
    #[error("Malformed artifact '{artifact}': {reason}")]
    MalformedArtifact {
        /// Display name of the artifact.
        artifact: String,
        /// Description of the failure.
        reason: String,
    },

    /// An artifact was valid but could not be bound into the session.
    #[error("Incompatible artifact '{artifact}': {reason}")]
    IncompatibleArtifact {
        /// Display name of the artifact.
        artifact: String,
        /// Description of the failure.
        reason: String,
    },

    /// An initializer or framework entry point is not exported by the session.
    #[error("Entry point not found: {symbol}")]
    EntryPointNotFound {
        /// The decorated symbol name.
        symbol: String,
    },

    /// An entry point exists but does not have the expected call signature.
    #[error("Entry point '{symbol}' has signature {actual}, expected {expected}")]
    EntryPointSignature {
        /// The decorated symbol name.
        symbol: String,
        /// The signature the caller needs.
        expected: String,
        /// The signature the artifact exports.
        actual: String,
    },

    /// More cleanup callbacks were registered than the ledger can hold.
    #[error("Lifecycle ledger capacity exceeded: {capacity} callbacks")]
    LedgerCapacityExceeded {
        /// The configured capacity.
        capacity: usize,
    },

    /// The session has no linear memory usable for entry point arguments.
    #[error("Linear memory unavailable: {reason}")]
    MemoryUnavailable {
        /// Description of the failure.
        reason: String,
    },

    /// Mutant code trapped while an entry point was running.
    #[error("Trap in '{symbol}': {message}")]
    Trap {
        /// The entry point that was running.
        symbol: String,
        /// Description of the trap.
        message: String,
    },

    /// Mutant code requested process exit while an entry point was running.
    #[error("Guest exited with code {code}")]
    GuestExit {
        /// The requested exit code.
        code: i32,
    },

    /// No test driver is registered for the test case's framework.
    #[error("No test driver registered for framework: {framework}")]
    NoDriver {
        /// The framework tag.
        framework: String,
    },

    /// A run was abandoned. Wraps the cause with the run's identity.
    #[error("Run of mutant '{mutant}' against '{test}' failed: {source}")]
    RunFailed {
        /// Mutant identity.
        mutant: String,
        /// Test identifier.
        test: String,
        /// The underlying failure.
        #[source]
        source: Box<RunnerError>,
    },

    /// I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Invalid configuration was provided.
    #[error("Invalid configuration: {reason}")]
    InvalidConfig {
        /// Description of the configuration error.
        reason: String,
    },
}

impl RunnerError {
    /// Create a new `UnresolvedSymbol` error.
    pub fn unresolved(module: impl Into<String>, symbol: impl Into<String>) -> Self {
        Self::UnresolvedSymbol {
            module: module.into(),
            symbol: symbol.into(),
        }
    }

    /// Create a new `MalformedArtifact` error.
    pub fn malformed(artifact: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedArtifact {
            artifact: artifact.into(),
            reason: reason.into(),
        }
    }

    /// Create a new `IncompatibleArtifact` error.
    pub fn incompatible(artifact: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::IncompatibleArtifact {
            artifact: artifact.into(),
            reason: reason.into(),
        }
    }

    /// Create a new `EntryPointNotFound` error.
    pub fn entry_point_not_found(symbol: impl Into<String>) -> Self {
        Self::EntryPointNotFound {
            symbol: symbol.into(),
        }
    }

    /// Create a new `MemoryUnavailable` error.
    pub fn memory_unavailable(reason: impl Into<String>) -> Self {
        Self::MemoryUnavailable {
            reason: reason.into(),
        }
    }

    /// Create a new `InvalidConfig` error.
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// Wrap this error with the identity of the run it aborted.
    #[must_use]
    pub fn in_run(self, mutant: impl Into<String>, test: impl Into<String>) -> Self {
        Self::RunFailed {
            mutant: mutant.into(),
            test: test.into(),
            source: Box::new(self),
        }
    }

    /// The innermost error, looking through [`RunnerError::RunFailed`].
    pub fn cause(&self) -> &Self {
        match self {
            Self::RunFailed { source, .. } => source.cause(),
            other => other,
        }
    }

    /// Returns `true` if a symbol or entry point could not be found.
    pub fn is_resolution_error(&self) -> bool {
        matches!(
            self.cause(),
            Self::UnresolvedSymbol { .. } | Self::EntryPointNotFound { .. }
        )
    }

    /// Returns `true` if an artifact could not be loaded.
    pub fn is_artifact_error(&self) -> bool {
        matches!(
            self.cause(),
            Self::MalformedArtifact { .. } | Self::IncompatibleArtifact { .. }
        )
    }
}
