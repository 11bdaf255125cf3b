//! Typed entry points into a loaded mutant.
//!
//! Symbols are looked up by decorated name and checked against the shape
//! the caller expects before anything is invoked. A mismatch is reported as
//! [`RunnerError::EntryPointSignature`] instead of being called blindly.

use std::fmt;

use tracing::debug;
use wasmtime::{Func, FuncType, TypedFunc, Val, ValType};

use crate::session::{LoaderSession, classify_call_error};
use mutant_runner_common::RunnerError;

/// Shape an entry point must have.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntrySignature {
    /// `void f(void)`, or any zero-argument function returning at most one value.
    Initializer,
    /// `int f(int*, char**)` / `int main(int, char**)`. May return nothing.
    ArgvEntry,
    /// `T* f(void)`
    Accessor,
    /// `int f(T*)`
    Invoker,
}

impl fmt::Display for EntrySignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let shape = match self {
            Self::Initializer => "() -> ()",
            Self::ArgvEntry => "(i32, i32) -> i32",
            Self::Accessor => "() -> i32",
            Self::Invoker => "(i32) -> i32",
        };
        f.write_str(shape)
    }
}

/// An entry point bound to its expected shape.
#[derive(Clone)]
pub enum EntryPoint {
    Initializer(Func),
    ArgvEntry(Func),
    Accessor(TypedFunc<(), i32>),
    Invoker(TypedFunc<i32, i32>),
}

impl fmt::Debug for EntryPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            Self::Initializer(_) => "Initializer",
            Self::ArgvEntry(_) => "ArgvEntry",
            Self::Accessor(_) => "Accessor",
            Self::Invoker(_) => "Invoker",
        };
        f.debug_tuple(kind).finish_non_exhaustive()
    }
}

/// A resolved, signature-checked entry point.
#[derive(Debug, Clone)]
pub struct BoundEntry {
    symbol: String,
    entry: EntryPoint,
}

impl BoundEntry {
    /// Look up `symbol` in the session and check it against `signature`.
    ///
    /// `symbol` must already be decorated.
    ///
    /// # Errors
    ///
    /// Returns [`RunnerError::EntryPointNotFound`] if the symbol does not
    /// exist and [`RunnerError::EntryPointSignature`] if it has the wrong shape.
    pub fn bind(
        session: &LoaderSession,
        symbol: &str,
        signature: EntrySignature,
    ) -> Result<Self, RunnerError> {
        let func = session
            .export_func(symbol)
            .ok_or_else(|| RunnerError::entry_point_not_found(symbol))?;
        let ty = func.ty(session.store());

        let mismatch = || RunnerError::EntryPointSignature {
            symbol: symbol.to_string(),
            expected: signature.to_string(),
            actual: describe(&ty),
        };

        let entry = match signature {
            EntrySignature::Initializer => {
                if ty.params().len() != 0 || ty.results().len() > 1 {
                    return Err(mismatch());
                }
                EntryPoint::Initializer(func)
            }
            EntrySignature::ArgvEntry => {
                let params_ok = ty.params().len() == 2 && ty.params().all(|p| is_i32(&p));
                let results_ok = match ty.results().len() {
                    0 => true,
                    1 => ty.results().all(|r| is_i32(&r)),
                    _ => false,
                };
                if !(params_ok && results_ok) {
                    return Err(mismatch());
                }
                EntryPoint::ArgvEntry(func)
            }
            EntrySignature::Accessor => EntryPoint::Accessor(
                func.typed::<(), i32>(session.store())
                    .map_err(|_| mismatch())?,
            ),
            EntrySignature::Invoker => EntryPoint::Invoker(
                func.typed::<i32, i32>(session.store())
                    .map_err(|_| mismatch())?,
            ),
        };

        debug!(symbol, %signature, "Entry point bound");

        Ok(Self {
            symbol: symbol.to_string(),
            entry,
        })
    }

    /// The decorated symbol name.
    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Run a static initializer. Any result value is ignored.
    ///
    /// # Errors
    ///
    /// Returns an error if the call traps or the entry is not an initializer.
    pub fn call_initializer(&self, session: &mut LoaderSession) -> Result<(), RunnerError> {
        let EntryPoint::Initializer(func) = &self.entry else {
            return Err(self.wrong_kind(EntrySignature::Initializer));
        };

        let mut results = default_results(&func.ty(session.store()));
        func.call(session.store_mut(), &[], &mut results)
            .map_err(|e| classify_call_error(&self.symbol, e))
    }

    /// Call an argv entry point. Returns `None` if it returns nothing.
    ///
    /// # Errors
    ///
    /// Returns an error if the call traps, the guest exits, or the entry is
    /// not an argv entry point.
    pub fn call_argv(
        &self,
        session: &mut LoaderSession,
        first: i32,
        argv: i32,
    ) -> Result<Option<i32>, RunnerError> {
        let EntryPoint::ArgvEntry(func) = &self.entry else {
            return Err(self.wrong_kind(EntrySignature::ArgvEntry));
        };

        let mut results = default_results(&func.ty(session.store()));
        func.call(
            session.store_mut(),
            &[Val::I32(first), Val::I32(argv)],
            &mut results,
        )
        .map_err(|e| classify_call_error(&self.symbol, e))?;

        Ok(results.first().and_then(Val::i32))
    }

    /// Call an accessor and return the pointer it produces.
    ///
    /// # Errors
    ///
    /// Returns an error if the call traps or the entry is not an accessor.
    pub fn call_accessor(&self, session: &mut LoaderSession) -> Result<i32, RunnerError> {
        let EntryPoint::Accessor(func) = &self.entry else {
            return Err(self.wrong_kind(EntrySignature::Accessor));
        };

        func.call(session.store_mut(), ())
            .map_err(|e| classify_call_error(&self.symbol, e))
    }

    /// Call an invoker on `instance`.
    ///
    /// # Errors
    ///
    /// Returns an error if the call traps or the entry is not an invoker.
    pub fn call_invoker(
        &self,
        session: &mut LoaderSession,
        instance: i32,
    ) -> Result<i32, RunnerError> {
        let EntryPoint::Invoker(func) = &self.entry else {
            return Err(self.wrong_kind(EntrySignature::Invoker));
        };

        func.call(session.store_mut(), instance)
            .map_err(|e| classify_call_error(&self.symbol, e))
    }

    fn wrong_kind(&self, expected: EntrySignature) -> RunnerError {
        RunnerError::EntryPointSignature {
            symbol: self.symbol.clone(),
            expected: expected.to_string(),
            actual: self.entry_kind().to_string(),
        }
    }

    fn entry_kind(&self) -> EntrySignature {
        match self.entry {
            EntryPoint::Initializer(_) => EntrySignature::Initializer,
            EntryPoint::ArgvEntry(_) => EntrySignature::ArgvEntry,
            EntryPoint::Accessor(_) => EntrySignature::Accessor,
            EntryPoint::Invoker(_) => EntrySignature::Invoker,
        }
    }
}

fn is_i32(ty: &ValType) -> bool {
    matches!(ty, ValType::I32)
}

fn default_results(ty: &FuncType) -> Vec<Val> {
    ty.results()
        .map(|r| Val::default_for_ty(&r).unwrap_or(Val::I32(0)))
        .collect()
}

fn describe(ty: &FuncType) -> String {
    let list = |types: &mut dyn Iterator<Item = ValType>| {
        types
            .map(|t| format!("{t:?}").to_lowercase())
            .collect::<Vec<_>>()
            .join(", ")
    };
    format!("({}) -> ({})", list(&mut ty.params()), list(&mut ty.results()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::{CompiledArtifact, Mutant};
    use crate::lifecycle::LifecycleInterceptor;
    use crate::store::SessionContext;
    use crate::symbols::SymbolResolutionTable;
    use crate::WasmEngine;
    use mutant_runner_common::{EngineConfig, ExecutionConfig, MutationPoint};
    use wasmtime::Linker;

    const ENTRIES: &str = r#"
        (module
            (global $counter (mut i32) (i32.const 0))
            (func (export "init") (global.set $counter (i32.const 5)))
            (func (export "main") (param i32 i32) (result i32) (local.get 0))
            (func (export "void_main") (param i32 i32))
            (func (export "instance") (result i32) (global.get $counter))
            (func (export "run") (param i32) (result i32) (i32.add (local.get 0) (i32.const 1)))
            (func (export "boom") (unreachable))
            (func (export "wide") (param i64) (result i64) (local.get 0)))
    "#;

    fn session() -> LoaderSession {
        let engine = WasmEngine::new(&EngineConfig {
            pooling_allocator: false,
            ..Default::default()
        })
        .unwrap();
        let linker = Linker::new(engine.inner());
        let symbols = SymbolResolutionTable::from_data_layout(&engine.config().data_layout).unwrap();
        let artifact = CompiledArtifact::from_wat(engine.inner(), "tu", ENTRIES).unwrap();
        let mutant = Mutant::new(MutationPoint::new("m", "a.cpp", 1, 1), vec![artifact]);
        let context =
            SessionContext::new(mutant.id(), LifecycleInterceptor::new(4), &ExecutionConfig::default());

        LoaderSession::load(&engine, &linker, &symbols, &mutant, context).unwrap()
    }

    #[test]
    fn test_bind_and_call_each_shape() {
        let mut session = session();

        let init = BoundEntry::bind(&session, "init", EntrySignature::Initializer).unwrap();
        init.call_initializer(&mut session).unwrap();

        let accessor = BoundEntry::bind(&session, "instance", EntrySignature::Accessor).unwrap();
        assert_eq!(accessor.call_accessor(&mut session).unwrap(), 5);

        let invoker = BoundEntry::bind(&session, "run", EntrySignature::Invoker).unwrap();
        assert_eq!(invoker.call_invoker(&mut session, 5).unwrap(), 6);

        let main = BoundEntry::bind(&session, "main", EntrySignature::ArgvEntry).unwrap();
        assert_eq!(main.call_argv(&mut session, 2, 0).unwrap(), Some(2));

        let void_main = BoundEntry::bind(&session, "void_main", EntrySignature::ArgvEntry).unwrap();
        assert_eq!(void_main.call_argv(&mut session, 2, 0).unwrap(), None);
    }

    #[test]
    fn test_missing_symbol() {
        let session = session();
        let err = BoundEntry::bind(&session, "nope", EntrySignature::Initializer).unwrap_err();
        assert!(matches!(err, RunnerError::EntryPointNotFound { .. }));
    }

    #[test]
    fn test_signature_mismatch() {
        let session = session();

        let err = BoundEntry::bind(&session, "wide", EntrySignature::Invoker).unwrap_err();
        match err {
            RunnerError::EntryPointSignature { expected, actual, .. } => {
                assert_eq!(expected, "(i32) -> i32");
                assert_eq!(actual, "(i64) -> (i64)");
            }
            other => panic!("unexpected error: {other}"),
        }

        assert!(BoundEntry::bind(&session, "main", EntrySignature::Initializer).is_err());
        assert!(BoundEntry::bind(&session, "wide", EntrySignature::ArgvEntry).is_err());
    }

    #[test]
    fn test_trap_is_classified() {
        let mut session = session();
        let boom = BoundEntry::bind(&session, "boom", EntrySignature::Initializer).unwrap();

        let err = boom.call_initializer(&mut session).unwrap_err();
        assert!(matches!(err, RunnerError::Trap { ref symbol, .. } if symbol == "boom"));
    }

    #[test]
    fn test_wrong_call_for_kind() {
        let mut session = session();
        let init = BoundEntry::bind(&session, "init", EntrySignature::Initializer).unwrap();

        assert!(init.call_accessor(&mut session).is_err());
        assert_eq!(init.symbol(), "init");
    }
}
