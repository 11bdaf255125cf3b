//! Interception of "run at shutdown" cleanup registrations.
//!
//! Static objects in mutant code register their destructors through
//! `__cxa_atexit`. In a normal process those run at exit; here they must run
//! at the end of every mutant run, before the mutant's code is unloaded.
//!
//! - [`LifecycleLedger`]: Bounded, deduplicated record of pending callbacks
//! - [`LifecycleInterceptor`]: Shared handle used by the substitute and the
//!   executor
//! - [`substitute_extern`]: Builds the engine's replacements for
//!   `__cxa_atexit` and `__dso_handle`

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};
use wasmtime::{AsContextMut, Caller, Extern, ExternType, Func, Global, Val, ValType};

use crate::store::SessionContext;
use crate::symbols::Substitute;
use mutant_runner_common::RunnerError;

/// One recorded cleanup registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CleanupEntry {
    /// Index of the callback in the indirect function table.
    pub callback: u32,
    /// Argument passed to the callback. Identity used for deduplication.
    pub argument: i32,
    /// Module handle supplied at registration.
    pub owner: i32,
}

/// Ordered record of pending cleanup callbacks for the current run.
#[derive(Debug)]
pub struct LifecycleLedger {
    entries: Vec<CleanupEntry>,
    capacity: usize,
}

impl LifecycleLedger {
    /// Create an empty ledger holding at most `capacity` entries.
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Record a registration.
    ///
    /// Returns `Ok(false)` if an entry with the same argument is already
    /// recorded.
    ///
    /// # Errors
    ///
    /// Returns [`RunnerError::LedgerCapacityExceeded`] when full.
    pub fn register(&mut self, entry: CleanupEntry) -> Result<bool, RunnerError> {
        if self.entries.iter().any(|e| e.argument == entry.argument) {
            return Ok(false);
        }

        if self.entries.len() >= self.capacity {
            return Err(RunnerError::LedgerCapacityExceeded {
                capacity: self.capacity,
            });
        }

        self.entries.push(entry);
        Ok(true)
    }

    /// Remove all entries in invocation order (last registered first).
    pub fn take_in_drain_order(&mut self) -> Vec<CleanupEntry> {
        let mut entries = std::mem::take(&mut self.entries);
        entries.reverse();
        entries
    }

    /// Discard all entries without invoking them. Returns how many there were.
    pub fn clear(&mut self) -> usize {
        let discarded = self.entries.len();
        self.entries.clear();
        discarded
    }

    /// Number of recorded entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if nothing is recorded.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Maximum number of entries.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Summary of one drain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Callbacks that returned normally.
    pub invoked: usize,
    /// Callbacks that could not be called or trapped.
    pub failed: usize,
}

/// Shared handle to the ledger of the current run.
///
/// Cloned into every session's store so the cleanup-registration substitute
/// can reach it. The executor keeps the original.
#[derive(Debug, Clone)]
pub struct LifecycleInterceptor {
    ledger: Arc<Mutex<LifecycleLedger>>,
}

impl LifecycleInterceptor {
    /// Create an interceptor with the given ledger capacity.
    pub fn new(capacity: usize) -> Self {
        Self {
            ledger: Arc::new(Mutex::new(LifecycleLedger::new(capacity))),
        }
    }

    /// Start a run's static-initialization phase with an empty ledger.
    pub fn begin_run(&self) {
        let stale = self.ledger.lock().clear();
        if stale > 0 {
            warn!(stale, "Discarded cleanup callbacks left over from a previous run");
        }
    }

    /// Record a registration. See [`LifecycleLedger::register`].
    ///
    /// # Errors
    ///
    /// Returns an error when the ledger is full.
    pub fn register(&self, entry: CleanupEntry) -> Result<bool, RunnerError> {
        self.ledger.lock().register(entry)
    }

    /// Invoke every recorded callback, last registered first, and empty the
    /// ledger.
    ///
    /// The lock is released while callbacks run, so a callback may register
    /// further cleanups. Those are drained in follow-up rounds, at most as
    /// many rounds as the ledger has capacity; anything left after that is
    /// discarded.
    pub fn drain<F>(&self, mut invoke: F) -> DrainReport
    where
        F: FnMut(&CleanupEntry) -> Result<(), String>,
    {
        let mut report = DrainReport::default();
        let max_rounds = self.capacity().max(1);

        for _ in 0..max_rounds {
            let entries = self.ledger.lock().take_in_drain_order();
            if entries.is_empty() {
                return report;
            }

            for entry in &entries {
                match invoke(entry) {
                    Ok(()) => report.invoked += 1,
                    Err(message) => {
                        warn!(
                            callback = entry.callback,
                            argument = entry.argument,
                            error = %message,
                            "Cleanup callback failed"
                        );
                        report.failed += 1;
                    }
                }
            }
        }

        let leftover = self.discard();
        if leftover > 0 {
            warn!(leftover, "Cleanup callbacks kept re-registering; discarded");
        }
        report
    }

    /// Empty the ledger without invoking anything.
    pub fn discard(&self) -> usize {
        self.ledger.lock().clear()
    }

    /// Number of pending callbacks.
    pub fn len(&self) -> usize {
        self.ledger.lock().len()
    }

    /// Returns `true` if no callbacks are pending.
    pub fn is_empty(&self) -> bool {
        self.ledger.lock().is_empty()
    }

    /// Ledger capacity.
    pub fn capacity(&self) -> usize {
        self.ledger.lock().capacity()
    }
}

/// Create the engine's replacement for `substitute` inside a session store.
///
/// `ty` is the type the artifact imports. Returns `None` if the substitute
/// cannot take that shape (e.g. `__dso_handle` imported as a function), which
/// leaves the import unresolved.
pub fn substitute_extern(
    mut store: impl AsContextMut<Data = SessionContext>,
    substitute: Substitute,
    ty: &ExternType,
) -> Option<Extern> {
    match (substitute, ty) {
        (Substitute::CleanupRegistration, ExternType::Func(_)) => {
            Some(Func::wrap(&mut store, register_cleanup).into())
        }
        (Substitute::ModuleHandle, ExternType::Global(global_ty)) => {
            let null = match global_ty.content() {
                ValType::I32 => Val::I32(0),
                ValType::I64 => Val::I64(0),
                _ => return None,
            };
            Global::new(&mut store, global_ty.clone(), null)
                .ok()
                .map(Into::into)
        }
        _ => None,
    }
}

/// `int __cxa_atexit(void (*)(void *), void *, void *)`
#[allow(clippy::cast_sign_loss, clippy::needless_pass_by_value)]
fn register_cleanup(
    caller: Caller<'_, SessionContext>,
    callback: i32,
    argument: i32,
    owner: i32,
) -> wasmtime::Result<i32> {
    let entry = CleanupEntry {
        callback: callback as u32,
        argument,
        owner,
    };

    let recorded = caller
        .data()
        .interceptor()
        .register(entry)
        .map_err(wasmtime::Error::new)?;

    debug!(
        callback = entry.callback,
        argument = entry.argument,
        recorded,
        "Cleanup callback registered"
    );

    Ok(0)
}
