//! Output suppressor.
//!
//! Mutant test binaries print a lot. None of it matters for the verdict, and
//! interleaved output from thousands of runs is noise. The suppressor binds
//! the C formatted-output entry points to no-ops that report success.
//!
//! With suppression switched off the same entry points echo to the host's
//! stdout instead, so a mutant links and runs identically either way.
//! Format strings are written unexpanded.
//!
//! Suppressed calls are counted in
//! [`SessionContext::suppressed_output_calls`] and the count is logged when
//! the session is unloaded.

use std::fmt;
use std::io::Write;

use tracing::{trace, warn};
use wasmtime::{Caller, Extern, FuncType, Linker, Val, ValType};

use mutant_runner_common::RunnerError;
use mutant_runner_core::{SessionContext, SymbolDecoration};

/// Import namespace the C library symbols are requested from.
pub const C_LIBRARY_MODULE: &str = "env";

/// A C library output function replaced by a no-op.
///
/// Variadic functions take their arguments through a pointer to the
/// argument area, so every entry has a fixed arity on wasm32.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuppressedSymbol {
    /// `int printf(const char*, ...)`
    Printf,
    /// `int vprintf(const char*, va_list)`
    Vprintf,
    /// `int puts(const char*)`
    Puts,
    /// `int putchar(int)`
    Putchar,
    /// `int fprintf(FILE*, const char*, ...)`
    Fprintf,
    /// `int vfprintf(FILE*, const char*, va_list)`
    Vfprintf,
}

impl SuppressedSymbol {
    /// Every suppressed symbol.
    pub const ALL: [Self; 6] = [
        Self::Printf,
        Self::Vprintf,
        Self::Puts,
        Self::Putchar,
        Self::Fprintf,
        Self::Vfprintf,
    ];

    /// Undecorated C name.
    pub fn name(self) -> &'static str {
        match self {
            Self::Printf => "printf",
            Self::Vprintf => "vprintf",
            Self::Puts => "puts",
            Self::Putchar => "putchar",
            Self::Fprintf => "fprintf",
            Self::Vfprintf => "vfprintf",
        }
    }

    /// Number of `i32` parameters on wasm32.
    pub fn arity(self) -> usize {
        match self {
            Self::Puts | Self::Putchar => 1,
            Self::Printf | Self::Vprintf => 2,
            Self::Fprintf | Self::Vfprintf => 3,
        }
    }

    /// Position of the `const char*` argument, if there is one.
    pub fn text_argument(self) -> Option<usize> {
        match self {
            Self::Putchar => None,
            Self::Puts | Self::Printf | Self::Vprintf => Some(0),
            Self::Fprintf | Self::Vfprintf => Some(1),
        }
    }

    /// The value reported to the caller when suppressed.
    ///
    /// `putchar` returns the character written, everything else `0`.
    pub fn result(self, args: &[Val]) -> i32 {
        match (self, args.first()) {
            (Self::Putchar, Some(Val::I32(c))) => *c,
            _ => 0,
        }
    }

    /// The bytes this call writes when echoed.
    ///
    /// Returns `None` if the text argument does not point at a
    /// NUL-terminated string inside `memory`.
    #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
    pub fn echoed_bytes(self, memory: &[u8], args: &[Val]) -> Option<Vec<u8>> {
        let Some(index) = self.text_argument() else {
            return match args.first() {
                Some(Val::I32(c)) => Some(vec![*c as u8]),
                _ => None,
            };
        };

        let Some(Val::I32(ptr)) = args.get(index) else {
            return None;
        };
        let start = usize::try_from(*ptr).ok()?;
        let tail = memory.get(start..)?;
        let len = tail.iter().position(|b| *b == 0)?;

        let mut bytes = tail[..len].to_vec();
        if self == Self::Puts {
            bytes.push(b'\n');
        }
        Some(bytes)
    }
}

impl fmt::Display for SuppressedSymbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Binds [`SuppressedSymbol`]s into a linker.
#[derive(Debug, Clone, Copy)]
pub struct OutputSuppressor {
    decoration: SymbolDecoration,
    echo: bool,
}

impl OutputSuppressor {
    /// Create a suppressor for the given target decoration.
    pub fn new(decoration: SymbolDecoration) -> Self {
        Self {
            decoration,
            echo: false,
        }
    }

    /// Echo output to the host's stdout instead of swallowing it.
    #[must_use]
    pub fn echoing(mut self, echo: bool) -> Self {
        self.echo = echo;
        self
    }

    /// The name `symbol` is requested under on this target.
    pub fn decorated_name(&self, symbol: SuppressedSymbol) -> String {
        self.decoration.decorate(symbol.name())
    }

    /// Define every suppressed symbol in `linker`.
    ///
    /// # Errors
    ///
    /// Returns an error if a definition clashes with an existing one.
    pub fn register(&self, linker: &mut Linker<SessionContext>) -> Result<(), RunnerError> {
        let echo = self.echo;

        for symbol in SuppressedSymbol::ALL {
            let ty = FuncType::new(
                linker.engine(),
                std::iter::repeat_n(ValType::I32, symbol.arity()),
                [ValType::I32],
            );
            let name = self.decorated_name(symbol);

            linker
                .func_new(
                    C_LIBRARY_MODULE,
                    &name,
                    ty,
                    move |mut caller: Caller<'_, SessionContext>, args, results| {
                        let value = if echo {
                            echo_output(&mut caller, symbol, args)
                        } else {
                            caller.data_mut().suppressed_output_calls += 1;
                            trace!(%symbol, "Output suppressed");
                            symbol.result(args)
                        };
                        results[0] = Val::I32(value);
                        Ok(())
                    },
                )
                .map_err(|e| {
                    RunnerError::invalid_config(format!("Failed to register {name}: {e}"))
                })?;
        }

        Ok(())
    }
}

/// Write a call's output to stdout. Returns what the C function would.
fn echo_output(
    caller: &mut Caller<'_, SessionContext>,
    symbol: SuppressedSymbol,
    args: &[Val],
) -> i32 {
    let memory = caller
        .get_export("memory")
        .and_then(Extern::into_memory);

    let bytes = match memory {
        Some(memory) => symbol.echoed_bytes(memory.data(&*caller), args),
        None => symbol.echoed_bytes(&[], args),
    };
    let Some(bytes) = bytes else {
        warn!(%symbol, "Output argument outside guest memory");
        return -1;
    };

    let written = std::io::stdout()
        .lock()
        .write_all(&bytes)
        .map_err(|e| warn!(%symbol, error = %e, "Echoing guest output failed"));

    match (written, symbol) {
        (Err(()), _) => -1,
        (Ok(()), SuppressedSymbol::Putchar) => symbol.result(args),
        (Ok(()), _) => i32::try_from(bytes.len()).unwrap_or(i32::MAX),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mutant_runner_common::{EngineConfig, ExecutionConfig};
    use mutant_runner_core::{LifecycleInterceptor, WasmEngine, create_store};

    fn engine() -> WasmEngine {
        WasmEngine::new(&EngineConfig {
            pooling_allocator: false,
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_results() {
        assert_eq!(SuppressedSymbol::Putchar.result(&[Val::I32(65)]), 65);
        assert_eq!(SuppressedSymbol::Puts.result(&[Val::I32(1024)]), 0);
        assert_eq!(SuppressedSymbol::Printf.result(&[Val::I32(1), Val::I32(2)]), 0);
    }

    #[test]
    fn test_decorated_names() {
        let macho = OutputSuppressor::new(SymbolDecoration::from_data_layout("e-m:o").unwrap());
        assert_eq!(macho.decorated_name(SuppressedSymbol::Printf), "_printf");

        let elf = OutputSuppressor::new(SymbolDecoration::none());
        assert_eq!(elf.decorated_name(SuppressedSymbol::Vfprintf), "vfprintf");
    }

    #[test]
    fn test_suppressed_calls_are_counted() {
        let engine = engine();
        let mut linker = Linker::new(engine.inner());
        OutputSuppressor::new(SymbolDecoration::none())
            .register(&mut linker)
            .unwrap();

        let context = SessionContext::new("m", LifecycleInterceptor::new(1), &ExecutionConfig::default());
        let mut store = create_store(&engine, context);

        let putchar = linker
            .get(&mut store, C_LIBRARY_MODULE, "putchar")
            .and_then(wasmtime::Extern::into_func)
            .unwrap()
            .typed::<i32, i32>(&store)
            .unwrap();
        assert_eq!(putchar.call(&mut store, 'x' as i32).unwrap(), 'x' as i32);

        let fprintf = linker
            .get(&mut store, C_LIBRARY_MODULE, "fprintf")
            .and_then(wasmtime::Extern::into_func)
            .unwrap()
            .typed::<(i32, i32, i32), i32>(&store)
            .unwrap();
        assert_eq!(fprintf.call(&mut store, (2, 16, 32)).unwrap(), 0);

        assert_eq!(store.data().suppressed_output_calls, 2);
    }

    #[test]
    fn test_echoed_bytes() {
        let memory = b"hi\0%d items\0";

        assert_eq!(
            SuppressedSymbol::Puts.echoed_bytes(memory, &[Val::I32(0)]).unwrap(),
            b"hi\n"
        );
        assert_eq!(
            SuppressedSymbol::Fprintf
                .echoed_bytes(memory, &[Val::I32(2), Val::I32(3), Val::I32(64)])
                .unwrap(),
            b"%d items"
        );
        assert_eq!(
            SuppressedSymbol::Putchar.echoed_bytes(&[], &[Val::I32(65)]).unwrap(),
            b"A"
        );
        // Out of bounds, and no terminator
        assert!(SuppressedSymbol::Puts.echoed_bytes(memory, &[Val::I32(99)]).is_none());
        assert!(SuppressedSymbol::Puts.echoed_bytes(b"abc", &[Val::I32(0)]).is_none());
    }

    #[test]
    fn test_echoing_writes_and_is_not_counted() {
        let engine = engine();
        let mut linker = Linker::new(engine.inner());
        OutputSuppressor::new(SymbolDecoration::none())
            .echoing(true)
            .register(&mut linker)
            .unwrap();

        let module = wasmtime::Module::new(
            engine.inner(),
            r#"
            (module
                (import "env" "puts" (func $puts (param i32) (result i32)))
                (import "env" "printf" (func $printf (param i32 i32) (result i32)))
                (memory (export "memory") 1)
                (data (i32.const 16) "echo\00")
                (func (export "say") (result i32)
                    (i32.add
                        (call $puts (i32.const 16))
                        (call $printf (i32.const 16) (i32.const 0)))))
            "#,
        )
        .unwrap();

        let context = SessionContext::new("m", LifecycleInterceptor::new(1), &ExecutionConfig::default());
        let mut store = create_store(&engine, context);
        let instance = linker.instantiate(&mut store, &module).unwrap();
        let say = instance
            .get_typed_func::<(), i32>(&mut store, "say")
            .unwrap();

        // "echo\n" plus "echo"
        assert_eq!(say.call(&mut store, ()).unwrap(), 9);
        assert_eq!(store.data().suppressed_output_calls, 0);
    }

    #[test]
    fn test_register_twice_is_rejected() {
        let engine = engine();
        let mut linker = Linker::new(engine.inner());
        let suppressor = OutputSuppressor::new(SymbolDecoration::none());

        suppressor.register(&mut linker).unwrap();
        assert!(suppressor.register(&mut linker).is_err());
    }
}
