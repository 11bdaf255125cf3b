//! Host-process symbols for mutant-runner.
//!
//! A mutant's artifacts import C runtime facilities as if they were linked
//! into the host process. This crate defines them on the executor's linker.
//!
//! # Symbols
//!
//! - WASI preview1: the system interface the C runtime is built on
//! - [`suppressor`]: No-op replacements for `printf` and friends
//!
//! The engine's own substitutes (`__cxa_atexit`, `__dso_handle`) are not
//! defined here; the loader session binds those itself so that nothing in
//! the linker can shadow them.

pub mod linker;
pub mod suppressor;

pub use linker::{register_all, register_suppressor, register_wasi};
pub use suppressor::{OutputSuppressor, SuppressedSymbol};
