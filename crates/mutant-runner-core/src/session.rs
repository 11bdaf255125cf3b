//! Dynamic loader session: one mutant's artifacts bound into a fresh store.
//!
//! A [`LoaderSession`] is the handle for a loaded mutant:
//!
//! 1. Create a store scoped to this session only
//! 2. Resolve every import of every artifact through the symbol table
//! 3. Instantiate artifacts in dependency order
//! 4. Expose exports, memory and the function table to the test drivers
//! 5. Drain the lifecycle ledger and unload
//!
//! Each session owns its store, so two mutants exporting identical names
//! never see each other's definitions. Unloading consumes the session.

use std::collections::HashMap;
use std::collections::hash_map::Entry;

use tracing::{debug, info, instrument};
use wasmtime::{Extern, ExternType, Func, ImportType, Linker, Memory, Ref, Store, Table, Trap, ValType};

use crate::artifact::{CompiledArtifact, Mutant};
use crate::lifecycle::{DrainReport, substitute_extern};
use crate::store::{SessionContext, create_store};
use crate::symbols::{ResolutionAction, Substitute, SymbolResolutionTable};
use crate::WasmEngine;
use mutant_runner_common::RunnerError;

/// Export holding the linear memory.
pub const MEMORY_EXPORT: &str = "memory";

/// Export holding the indirect function table.
pub const FUNCTION_TABLE_EXPORT: &str = "__indirect_function_table";

const WASM_PAGE_SIZE: u64 = 65_536;
const POINTER_SIZE: u64 = 4;

/// Pointers to an argument vector written into linear memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArgvLayout {
    /// Number of arguments.
    pub argc: i32,
    /// Address of an `int` holding `argc`.
    pub argc_ptr: i32,
    /// Address of the NULL-terminated `char*` array.
    pub argv_ptr: i32,
}

/// One mutant's artifacts loaded into an isolated store.
pub struct LoaderSession {
    store: Store<SessionContext>,

    /// Exports of every instantiated artifact, first definition wins.
    exports: HashMap<String, Extern>,

    /// Names of instantiated artifacts, in instantiation order.
    loaded: Vec<String>,

    /// Substitutes already created in this store, keyed by shape.
    substitutes: HashMap<(Substitute, bool), Extern>,
}

impl LoaderSession {
    /// Load a mutant's artifacts.
    ///
    /// # Arguments
    ///
    /// * `engine` - Engine the artifacts were compiled with
    /// * `linker` - Definitions resident in the host process
    /// * `symbols` - Resolution table for the current target
    /// * `mutant` - The mutant to load
    /// * `context` - Fresh per-run context
    ///
    /// # Errors
    ///
    /// Returns an error if an import stays unresolved or an artifact cannot
    /// be instantiated. Everything loaded so far is released.
    #[instrument(skip_all, fields(mutant = %context.mutant_id, artifacts = mutant.artifacts().len()))]
    pub fn load(
        engine: &WasmEngine,
        linker: &Linker<SessionContext>,
        symbols: &SymbolResolutionTable,
        mutant: &Mutant,
        context: SessionContext,
    ) -> Result<Self, RunnerError> {
        let mut session = Self {
            store: create_store(engine, context),
            exports: HashMap::new(),
            loaded: Vec::with_capacity(mutant.artifacts().len()),
            substitutes: HashMap::new(),
        };

        let mut pending: Vec<&CompiledArtifact> = mutant.artifacts().iter().collect();

        while !pending.is_empty() {
            let mut blocked = Vec::new();
            let mut first_unresolved = None;

            for artifact in &pending {
                match session.resolve_imports(linker, symbols, artifact) {
                    Ok(imports) => session.instantiate(artifact, &imports)?,
                    Err(unresolved) => {
                        first_unresolved.get_or_insert(unresolved);
                        blocked.push(*artifact);
                    }
                }
            }

            // No progress in this pass
            if let Some(err) = first_unresolved.filter(|_| blocked.len() == pending.len()) {
                return Err(err);
            }

            pending = blocked;
        }

        info!(
            session_id = %session.store.data().session_id,
            exports = session.exports.len(),
            substitutes = session.substitutes.len(),
            "Mutant loaded"
        );

        Ok(session)
    }

    /// Resolve every import of `artifact`, in declaration order.
    fn resolve_imports(
        &mut self,
        linker: &Linker<SessionContext>,
        symbols: &SymbolResolutionTable,
        artifact: &CompiledArtifact,
    ) -> Result<Vec<Extern>, RunnerError> {
        artifact
            .module()
            .imports()
            .map(|import| {
                self.resolve_import(linker, symbols, &import)
                    .ok_or_else(|| RunnerError::unresolved(import.module(), import.name()))
            })
            .collect()
    }

    fn resolve_import(
        &mut self,
        linker: &Linker<SessionContext>,
        symbols: &SymbolResolutionTable,
        import: &ImportType<'_>,
    ) -> Option<Extern> {
        match symbols.action(import.name()) {
            ResolutionAction::Substitute(substitute) => {
                let ty = import.ty();
                let key = (substitute, is_wide_global(&ty));
                if let Some(bound) = self.substitutes.get(&key) {
                    return Some(bound.clone());
                }

                debug!(symbol = import.name(), %substitute, "Binding substitute");
                let bound = substitute_extern(&mut self.store, substitute, &ty)?;
                self.substitutes.insert(key, bound.clone());
                Some(bound)
            }
            ResolutionAction::LookupInProcess => self
                .exports
                .get(import.name())
                .cloned()
                .or_else(|| linker.get(&mut self.store, import.module(), import.name())),
        }
    }

    fn instantiate(
        &mut self,
        artifact: &CompiledArtifact,
        imports: &[Extern],
    ) -> Result<(), RunnerError> {
        let instance = wasmtime::Instance::new(&mut self.store, artifact.module(), imports)
            .map_err(|e| RunnerError::incompatible(artifact.name(), e.to_string()))?;

        let exports: Vec<(String, Extern)> = instance
            .exports(&mut self.store)
            .map(|export| (export.name().to_string(), export.into_extern()))
            .collect();

        for (name, item) in exports {
            match self.exports.entry(name) {
                Entry::Vacant(slot) => {
                    slot.insert(item);
                }
                Entry::Occupied(slot) => {
                    debug!(
                        symbol = %slot.key(),
                        artifact = artifact.name(),
                        "Duplicate export ignored"
                    );
                }
            }
        }

        debug!(
            artifact = artifact.name(),
            content_hash = artifact.content_hash(),
            "Artifact instantiated"
        );
        self.loaded.push(artifact.name().to_string());
        Ok(())
    }

    /// Look up an exported function by its decorated name.
    pub fn export_func(&self, symbol: &str) -> Option<Func> {
        self.exports.get(symbol).cloned().and_then(Extern::into_func)
    }

    /// The session's linear memory.
    pub fn memory(&self) -> Option<Memory> {
        self.exports
            .get(MEMORY_EXPORT)
            .cloned()
            .and_then(Extern::into_memory)
    }

    /// The session's indirect function table.
    pub fn function_table(&self) -> Option<Table> {
        self.exports
            .get(FUNCTION_TABLE_EXPORT)
            .cloned()
            .and_then(Extern::into_table)
    }

    /// Names of the loaded artifacts, in instantiation order.
    pub fn loaded_artifacts(&self) -> &[String] {
        &self.loaded
    }

    /// Number of substitutes created in this session's store.
    pub fn substitute_count(&self) -> usize {
        self.substitutes.len()
    }

    /// Get the store.
    pub fn store(&self) -> &Store<SessionContext> {
        &self.store
    }

    /// Get the store mutably.
    pub fn store_mut(&mut self) -> &mut Store<SessionContext> {
        &mut self.store
    }

    /// Write a C argument vector into fresh linear memory.
    ///
    /// Memory is grown by enough pages to hold `argc`, the pointer array
    /// and the NUL-terminated strings, so nothing the guest owns is
    /// overwritten.
    ///
    /// # Errors
    ///
    /// Returns an error if the session has no memory or it cannot grow.
    pub fn write_argv(&mut self, args: &[&str]) -> Result<ArgvLayout, RunnerError> {
        let memory = self
            .memory()
            .ok_or_else(|| RunnerError::memory_unavailable("no exported linear memory"))?;

        let count = args.len() as u64;
        let strings_len: u64 = args.iter().map(|arg| arg.len() as u64 + 1).sum();
        let total = POINTER_SIZE + (count + 1) * POINTER_SIZE + strings_len;
        let pages = total.div_ceil(WASM_PAGE_SIZE);

        let previous_pages = memory
            .grow(&mut self.store, pages)
            .map_err(|e| RunnerError::memory_unavailable(format!("cannot grow memory: {e}")))?;

        let base = previous_pages * WASM_PAGE_SIZE;
        let to_i32 = |value: u64| {
            i32::try_from(value).map_err(|_| {
                RunnerError::memory_unavailable(format!("address {value:#x} exceeds wasm32 range"))
            })
        };

        let argc_ptr = base;
        let argv_ptr = base + POINTER_SIZE;
        let mut string_ptr = argv_ptr + (count + 1) * POINTER_SIZE;

        let mut bytes = Vec::with_capacity(usize::try_from(total).unwrap_or_default());
        bytes.extend_from_slice(&to_i32(count)?.to_le_bytes());

        let mut strings = Vec::with_capacity(usize::try_from(strings_len).unwrap_or_default());
        for arg in args {
            bytes.extend_from_slice(&to_i32(string_ptr)?.to_le_bytes());
            strings.extend_from_slice(arg.as_bytes());
            strings.push(0);
            string_ptr += arg.len() as u64 + 1;
        }
        // argv[argc] = NULL
        bytes.extend_from_slice(&0i32.to_le_bytes());
        bytes.extend_from_slice(&strings);

        let offset = usize::try_from(base)
            .map_err(|_| RunnerError::memory_unavailable("memory offset exceeds host range"))?;
        memory
            .write(&mut self.store, offset, &bytes)
            .map_err(|e| RunnerError::memory_unavailable(format!("cannot write argv: {e}")))?;

        Ok(ArgvLayout {
            argc: to_i32(count)?,
            argc_ptr: to_i32(argc_ptr)?,
            argv_ptr: to_i32(argv_ptr)?,
        })
    }

    /// Invoke every pending cleanup callback, last registered first.
    ///
    /// Must run before [`LoaderSession::unload`]; the callbacks live in this
    /// session's code.
    pub fn drain_lifecycle(&mut self) -> DrainReport {
        let interceptor = self.store.data().interceptor().clone();
        let table = self.function_table();

        interceptor.drain(|entry| {
            let table = table.ok_or_else(|| "no exported function table".to_string())?;

            let func = match table.get(&mut self.store, entry.callback.into()) {
                Some(Ref::Func(Some(func))) => func,
                _ => return Err(format!("no function at table index {}", entry.callback)),
            };

            func.typed::<i32, ()>(&self.store)
                .map_err(|e| format!("callback has wrong signature: {e}"))?
                .call(&mut self.store, entry.argument)
                .map_err(|e| extract_trap_info(&e).0)
        })
    }

    /// Release the session's store and everything bound into it.
    pub fn unload(self) {
        let context = self.store.data();
        info!(
            session_id = %context.session_id,
            mutant = %context.mutant_id,
            artifacts = self.loaded.len(),
            suppressed_output_calls = context.suppressed_output_calls,
            session_ms = context.elapsed().as_millis(),
            "Mutant unloaded"
        );
    }
}

impl std::fmt::Debug for LoaderSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoaderSession")
            .field("context", self.store.data())
            .field("loaded", &self.loaded)
            .finish_non_exhaustive()
    }
}

/// `__dso_handle` may be imported as a 64-bit global.
fn is_wide_global(ty: &ExternType) -> bool {
    matches!(ty, ExternType::Global(global) if matches!(global.content(), ValType::I64))
}

/// Map an error raised while calling into the guest.
///
/// Host functions report [`RunnerError`]s which are passed through as is.
/// A WASI `proc_exit` becomes [`RunnerError::GuestExit`]. Anything else is a
/// trap in mutant code.
pub(crate) fn classify_call_error(symbol: &str, error: wasmtime::Error) -> RunnerError {
    if let Some(exit) = error.downcast_ref::<wasmtime_wasi::I32Exit>() {
        return RunnerError::GuestExit { code: exit.0 };
    }

    match error.downcast::<RunnerError>() {
        Ok(host_error) => host_error,
        Err(error) => {
            let (message, code) = extract_trap_info(&error);
            RunnerError::Trap {
                symbol: symbol.to_string(),
                message: code.map_or(message.clone(), |code| format!("{code}: {message}")),
            }
        }
    }
}

/// Extract human-readable trap information.
pub(crate) fn extract_trap_info(error: &wasmtime::Error) -> (String, Option<String>) {
    let message = error.to_string();

    // Try to get the trap code
    let code = error.downcast_ref::<Trap>().map(|trap| format!("{trap:?}"));

    (message, code)
}
