//! Data model shared between the engine and its callers.
//!
//! - [`MutationPoint`]: Where a mutation was applied and what kind it is
//! - [`TestCase`]: The test to run against a mutant
//! - [`ExecutionResult`]: The verdict of one run

use std::fmt;

use serde::{Deserialize, Serialize};

/// A position in a source file.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct SourceLocation {
    /// Path of the source file.
    pub file: String,
    /// 1-based line.
    pub line: u32,
    /// 1-based column.
    pub column: u32,
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.column)
    }
}

/// A source location plus the kind of change applied there.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct MutationPoint {
    /// Mutator identifier (e.g. `scalar_value_mutator`).
    pub mutator: String,
    /// Where the mutation was applied.
    #[serde(flatten)]
    pub location: SourceLocation,
}

impl MutationPoint {
    /// Create a new mutation point.
    pub fn new(mutator: impl Into<String>, file: impl Into<String>, line: u32, column: u32) -> Self {
        Self {
            mutator: mutator.into(),
            location: SourceLocation {
                file: file.into(),
                line,
                column,
            },
        }
    }

    /// Stable identity used in logs and error reports.
    pub fn id(&self) -> String {
        format!("{}:{}", self.mutator, self.location)
    }
}

impl fmt::Display for MutationPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Mutation Point: {} {}", self.mutator, self.location)
    }
}

/// Test framework a [`TestCase`] belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TestFramework {
    /// Google Test, driven through `InitGoogleTest` and `UnitTest::Run`.
    GoogleTest,
    /// A project-specific driver exposed as `main(argc, argv)`.
    CustomTest,
}

impl fmt::Display for TestFramework {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TestFramework::GoogleTest => write!(f, "google_test"),
            TestFramework::CustomTest => write!(f, "custom_test"),
        }
    }
}

/// A single test to run against a mutant.
///
/// Immutable after construction.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct TestCase {
    framework: TestFramework,
    name: String,
    #[serde(default)]
    initializers: Vec<String>,
}

impl TestCase {
    /// Create a test case for the given framework.
    ///
    /// # Arguments
    ///
    /// * `framework` - Framework whose driver runs the test
    /// * `name` - Test identifier understood by the framework
    pub fn new(framework: TestFramework, name: impl Into<String>) -> Self {
        Self {
            framework,
            name: name.into(),
            initializers: Vec::new(),
        }
    }

    /// Create a Google Test case.
    pub fn google_test(name: impl Into<String>) -> Self {
        Self::new(TestFramework::GoogleTest, name)
    }

    /// Create a custom-driver test case.
    pub fn custom_test(name: impl Into<String>) -> Self {
        Self::new(TestFramework::CustomTest, name)
    }

    /// Set the global constructors to run before the test, in order.
    #[must_use]
    pub fn with_initializers<I, S>(mut self, initializers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.initializers = initializers.into_iter().map(Into::into).collect();
        self
    }

    /// The framework tag.
    pub fn framework(&self) -> TestFramework {
        self.framework
    }

    /// The test identifier.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Undecorated names of the initializer entry points.
    pub fn initializers(&self) -> &[String] {
        &self.initializers
    }
}

/// Outcome of one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// The framework reported success. The mutant survived.
    Passed,
    /// The framework reported failure. The mutant was killed.
    Failed,
    /// Mutant code trapped or the host process died.
    Crashed,
    /// The run exceeded its wall-clock budget. Assigned by the watchdog.
    TimedOut,
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionStatus::Passed => write!(f, "passed"),
            ExecutionStatus::Failed => write!(f, "failed"),
            ExecutionStatus::Crashed => write!(f, "crashed"),
            ExecutionStatus::TimedOut => write!(f, "timed_out"),
        }
    }
}

/// Verdict and timing of one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct ExecutionResult {
    /// Outcome.
    pub status: ExecutionStatus,
    /// Time spent in initializers and the test invocation.
    pub elapsed_ms: u64,
}

impl ExecutionResult {
    /// Returns `true` if the test detected the mutation.
    pub fn is_killed(&self) -> bool {
        !matches!(self.status, ExecutionStatus::Passed)
    }
}
