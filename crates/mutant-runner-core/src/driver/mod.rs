//! Test framework drivers.
//!
//! A [`TestDriver`] knows how to run exactly one named test of one framework
//! inside a loaded mutant. Drivers are stateless apart from the symbol
//! decoration they were built with and are selected by
//! [`TestFramework`] tag through the [`DriverRegistry`].


use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::entry::{BoundEntry, EntrySignature};
use crate::session::LoaderSession;
use crate::symbols::SymbolDecoration;
use mutant_runner_common::{ExecutionStatus, RunnerError, TestCase, TestFramework};

pub use custom_test::CustomTestDriver;
pub use google_test::GoogleTestDriver;

/// Runs one test of one framework against a loaded mutant.
pub trait TestDriver: Send + Sync {
    /// The framework this driver handles.
    fn framework(&self) -> TestFramework;

    /// Decoration applied to every symbol the driver looks up.
    fn decoration(&self) -> SymbolDecoration;

    /// Run the test case's initializers, in order, once each.
    ///
    /// # Errors
    ///
    /// Returns an error if an initializer is missing, has the wrong shape or
    /// traps.
    fn run_initializers(
        &self,
        session: &mut LoaderSession,
        test: &TestCase,
    ) -> Result<(), RunnerError> {
        for name in test.initializers() {
            let symbol = self.decoration().decorate(name);
            let initializer = BoundEntry::bind(session, &symbol, EntrySignature::Initializer)?;
            initializer.call_initializer(session)?;
            debug!(symbol = %symbol, "Initializer finished");
        }
        Ok(())
    }

    /// Run the single named test and return the framework's result code.
    ///
    /// # Errors
    ///
    /// Returns an error if the framework's entry points cannot be bound or
    /// the test traps.
    fn invoke(&self, session: &mut LoaderSession, test: &TestCase) -> Result<i32, RunnerError>;
}

/// Translate a framework result code into a verdict.
pub fn status_from_code(code: i32) -> ExecutionStatus {
    if code == 0 {
        ExecutionStatus::Passed
    } else {
        ExecutionStatus::Failed
    }
}

/// Treat a guest-requested exit as the test's result code.
pub(crate) fn exit_as_code(result: Result<i32, RunnerError>) -> Result<i32, RunnerError> {
    match result {
        Err(RunnerError::GuestExit { code }) => {
            debug!(code, "Test exited through proc_exit");
            Ok(code)
        }
        other => other,
    }
}

/// Drivers keyed by framework.
#[derive(Clone, Default)]
pub struct DriverRegistry {
    drivers: HashMap<TestFramework, Arc<dyn TestDriver>>,
}

impl DriverRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with every built-in driver.
    pub fn with_builtin(decoration: SymbolDecoration, program_name: &str) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(GoogleTestDriver::new(decoration, program_name)));
        registry.register(Arc::new(CustomTestDriver::new(decoration, program_name)));
        registry
    }

    /// Register a driver, replacing any previous one for its framework.
    pub fn register(&mut self, driver: Arc<dyn TestDriver>) -> Option<Arc<dyn TestDriver>> {
        self.drivers.insert(driver.framework(), driver)
    }

    /// Look up the driver for `framework`.
    ///
    /// # Errors
    ///
    /// Returns [`RunnerError::NoDriver`] if none is registered.
    pub fn get(&self, framework: TestFramework) -> Result<Arc<dyn TestDriver>, RunnerError> {
        self.drivers
            .get(&framework)
            .cloned()
            .ok_or_else(|| RunnerError::NoDriver {
                framework: framework.to_string(),
            })
    }

    /// Number of registered drivers.
    pub fn len(&self) -> usize {
        self.drivers.len()
    }

    /// Returns `true` if no driver is registered.
    pub fn is_empty(&self) -> bool {
        self.drivers.is_empty()
    }
}

impl std::fmt::Debug for DriverRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.drivers.keys()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_from_code() {
        assert_eq!(status_from_code(0), ExecutionStatus::Passed);
        assert_eq!(status_from_code(1), ExecutionStatus::Failed);
        assert_eq!(status_from_code(-1), ExecutionStatus::Failed);
    }

    #[test]
    fn test_exit_as_code() {
        assert_eq!(exit_as_code(Err(RunnerError::GuestExit { code: 3 })).unwrap(), 3);
        assert_eq!(exit_as_code(Ok(0)).unwrap(), 0);
        assert!(exit_as_code(Err(RunnerError::entry_point_not_found("main"))).is_err());
    }

    #[test]
    fn test_registry_lookup() {
        let registry = DriverRegistry::with_builtin(SymbolDecoration::none(), "mutant-runner");

        assert_eq!(registry.len(), 2);
        assert_eq!(
            registry.get(TestFramework::GoogleTest).unwrap().framework(),
            TestFramework::GoogleTest
        );
        assert_eq!(
            registry.get(TestFramework::CustomTest).unwrap().framework(),
            TestFramework::CustomTest
        );
    }

    #[test]
    fn test_registry_missing_driver() {
        let registry = DriverRegistry::new();
        let err = registry.get(TestFramework::CustomTest).err().unwrap();

        assert!(matches!(err, RunnerError::NoDriver { ref framework } if framework == "custom_test"));
        assert!(registry.is_empty());
    }
}
