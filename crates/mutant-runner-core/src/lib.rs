//! Mutant loading and execution for mutant-runner.
//!
//! This crate runs one test against one mutated program at a time, inside
//! the host process:
//! - [`WasmEngine`]: Configured Wasmtime engine, shared by every run
//! - [`CompiledArtifact`] / [`Mutant`]: The compiled program under test
//! - [`SymbolResolutionTable`]: Name decoration and engine substitutes
//! - [`LifecycleInterceptor`]: Per-run ledger of cleanup callbacks
//! - [`LoaderSession`]: One mutant's artifacts bound into a fresh store
//! - [`TestDriver`]: Framework-specific test invocation
//! - [`MutantExecutor`]: The per-run state machine
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                     WasmEngine                          │
//! │  (Created once per process)                             │
//! │  - Pooling Allocator                                    │
//! │  - Compilation settings                                 │
//! └─────────────────────────────────────────────────────────┘
//!                            │
//!                            ▼
//! ┌─────────────────────────────────────────────────────────┐
//! │                   MutantExecutor                        │
//! │  (One run at a time, process-wide lock)                 │
//! │  - Linker with host-process symbols                     │
//! │  - Symbol resolution table                              │
//! │  - Lifecycle ledger, driver registry                    │
//! └─────────────────────────────────────────────────────────┘
//!                            │
//!                            ▼
//! ┌─────────────────────────────────────────────────────────┐
//! │          LoaderSession (Store<SessionContext>)          │
//! │  (Per run, isolated, consumed on unload)                │
//! │  - Instantiated artifacts and their exports             │
//! │  - Linear memory, function table                        │
//! └─────────────────────────────────────────────────────────┘
//! ```

pub mod artifact;
pub mod driver;
pub mod engine;
pub mod entry;
pub mod executor;
pub mod lifecycle;
pub mod session;
pub mod store;
pub mod symbols;

pub use artifact::{CompiledArtifact, Mutant};
pub use driver::{
    CustomTestDriver, DriverRegistry, GoogleTestDriver, TestDriver, status_from_code,
};
pub use engine::WasmEngine;
pub use entry::{BoundEntry, EntryPoint, EntrySignature};
pub use executor::{MutantExecutor, RunPhase};
pub use lifecycle::{CleanupEntry, DrainReport, LifecycleInterceptor, LifecycleLedger};
pub use session::{ArgvLayout, LoaderSession};
pub use store::{SessionContext, create_store};
pub use symbols::{
    ManglingMode, ResolutionAction, Substitute, SymbolDecoration, SymbolResolutionTable,
};
