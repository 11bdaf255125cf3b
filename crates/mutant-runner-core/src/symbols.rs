//! Symbol name decoration and the symbol resolution table.
//!
//! Mutant artifacts refer to host facilities by their *decorated* external
//! names. Some targets prefix every global symbol with an underscore
//! (`__cxa_atexit` becomes `___cxa_atexit` on Mach-O), others leave names
//! untouched. The decoration is derived once from the target data layout
//! and every lookup goes through it.
//!
//! The [`SymbolResolutionTable`] decides, per requested name, whether the
//! engine supplies a [`Substitute`] or the name is looked up among the
//! symbols already resident in the host process.

use std::collections::HashMap;
use std::fmt;

use mutant_runner_common::RunnerError;

/// Prefix marking a name that must be used verbatim.
const VERBATIM_MARKER: char = '\u{1}';

/// External-name mangling scheme of a target.
///
/// Mirrors the `m:<mode>` component of a data layout string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManglingMode {
    /// No mangling component in the layout.
    None,
    /// `m:e`
    Elf,
    /// `m:l`
    Goff,
    /// `m:m`
    Mips,
    /// `m:o`
    MachO,
    /// `m:w`
    WinCoff,
    /// `m:x`
    WinCoffX86,
    /// `m:a`
    XCoff,
}

impl ManglingMode {
    /// Extract the mangling mode from a data layout string.
    ///
    /// # Errors
    ///
    /// Returns an error for an unknown `m:` specifier.
    pub fn from_data_layout(layout: &str) -> Result<Self, RunnerError> {
        let Some(mode) = layout
            .split('-')
            .find_map(|component| component.strip_prefix("m:"))
        else {
            return Ok(Self::None);
        };

        match mode {
            "e" => Ok(Self::Elf),
            "l" => Ok(Self::Goff),
            "m" => Ok(Self::Mips),
            "o" => Ok(Self::MachO),
            "w" => Ok(Self::WinCoff),
            "x" => Ok(Self::WinCoffX86),
            "a" => Ok(Self::XCoff),
            other => Err(RunnerError::invalid_config(format!(
                "Unknown mangling mode 'm:{other}' in data layout '{layout}'"
            ))),
        }
    }

    /// The character prepended to global symbol names, if any.
    pub fn global_prefix(self) -> Option<char> {
        match self {
            Self::MachO | Self::WinCoffX86 => Some('_'),
            _ => None,
        }
    }
}

/// Turns source-level names into the names artifacts actually export.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SymbolDecoration {
    prefix: Option<char>,
}

impl SymbolDecoration {
    /// Decoration that leaves names unchanged.
    pub const fn none() -> Self {
        Self { prefix: None }
    }

    /// Decoration for the given data layout.
    ///
    /// # Errors
    ///
    /// Returns an error if the layout's mangling mode is unknown.
    pub fn from_data_layout(layout: &str) -> Result<Self, RunnerError> {
        let mode = ManglingMode::from_data_layout(layout)?;
        Ok(Self {
            prefix: mode.global_prefix(),
        })
    }

    /// The global prefix, if any.
    pub fn prefix(&self) -> Option<char> {
        self.prefix
    }

    /// Decorate a name for lookup.
    ///
    /// A name starting with `\x01` is taken verbatim, without the marker.
    pub fn decorate(&self, name: &str) -> String {
        if let Some(verbatim) = name.strip_prefix(VERBATIM_MARKER) {
            return verbatim.to_string();
        }

        match self.prefix {
            Some(prefix) => format!("{prefix}{name}"),
            None => name.to_string(),
        }
    }
}

/// Implementations the engine substitutes for process-global hooks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Substitute {
    /// Replaces `__cxa_atexit`. Records the callback in the lifecycle ledger.
    CleanupRegistration,
    /// Replaces `__dso_handle`. A constant zero handle.
    ModuleHandle,
}

impl Substitute {
    /// Every substitute the table knows about.
    pub const ALL: [Self; 2] = [Self::CleanupRegistration, Self::ModuleHandle];

    /// Undecorated name of the hook being replaced.
    pub fn hook(self) -> &'static str {
        match self {
            Self::CleanupRegistration => "__cxa_atexit",
            Self::ModuleHandle => "__dso_handle",
        }
    }

    /// Name of the engine-side replacement.
    pub fn name(self) -> &'static str {
        match self {
            Self::CleanupRegistration => "mutant_runner_cxa_atexit",
            Self::ModuleHandle => "mutant_runner_dso_handle",
        }
    }
}

impl fmt::Display for Substitute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// How a requested symbol is to be resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionAction {
    /// Bind to the engine's replacement.
    Substitute(Substitute),
    /// Bind to the same name among symbols already available.
    LookupInProcess,
}

/// Maps requested external names to resolution actions.
///
/// Built once per engine configuration and read-only afterwards.
#[derive(Debug, Clone)]
pub struct SymbolResolutionTable {
    decoration: SymbolDecoration,
    substitutes: HashMap<String, Substitute>,
}

impl SymbolResolutionTable {
    /// Build the table for the given decoration.
    pub fn new(decoration: SymbolDecoration) -> Self {
        let substitutes = Substitute::ALL
            .into_iter()
            .map(|substitute| (decoration.decorate(substitute.hook()), substitute))
            .collect();

        Self {
            decoration,
            substitutes,
        }
    }

    /// Build the table for a data layout string.
    ///
    /// # Errors
    ///
    /// Returns an error if the layout's mangling mode is unknown.
    pub fn from_data_layout(layout: &str) -> Result<Self, RunnerError> {
        SymbolDecoration::from_data_layout(layout).map(Self::new)
    }

    /// Decide how `name` (already decorated) is resolved.
    pub fn action(&self, name: &str) -> ResolutionAction {
        self.substitutes
            .get(name)
            .map_or(ResolutionAction::LookupInProcess, |substitute| {
                ResolutionAction::Substitute(*substitute)
            })
    }

    /// The decoration this table was built with.
    pub fn decoration(&self) -> SymbolDecoration {
        self.decoration
    }

    /// Decorate a source-level name for the current target.
    pub fn decorate(&self, name: &str) -> String {
        self.decoration.decorate(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WASM32: &str = "e-m:e-p:32:32-i64:64-n32:64-S128";
    const MACOS_X86_64: &str = "e-m:o-i64:64-f80:128-n8:16:32:64-S128";
    const WIN32_X86: &str = "e-m:x-p:32:32-i64:64-f80:32-n8:16:32-a:0:32-S32";

    #[test]
    fn test_mangling_mode_from_layout() {
        assert_eq!(ManglingMode::from_data_layout(WASM32).unwrap(), ManglingMode::Elf);
        assert_eq!(
            ManglingMode::from_data_layout(MACOS_X86_64).unwrap(),
            ManglingMode::MachO
        );
        assert_eq!(
            ManglingMode::from_data_layout(WIN32_X86).unwrap(),
            ManglingMode::WinCoffX86
        );
        assert_eq!(ManglingMode::from_data_layout("e-p:64:64").unwrap(), ManglingMode::None);
        assert!(ManglingMode::from_data_layout("e-m:z").is_err());
    }

    #[test]
    fn test_decoration() {
        let macho = SymbolDecoration::from_data_layout(MACOS_X86_64).unwrap();
        assert_eq!(
            macho.decorate("_ZN7testing14InitGoogleTestEPiPPc"),
            "__ZN7testing14InitGoogleTestEPiPPc"
        );

        let elf = SymbolDecoration::from_data_layout(WASM32).unwrap();
        assert_eq!(
            elf.decorate("_ZN7testing14InitGoogleTestEPiPPc"),
            "_ZN7testing14InitGoogleTestEPiPPc"
        );
        assert_eq!(elf, SymbolDecoration::none());
    }

    #[test]
    fn test_verbatim_names() {
        let macho = SymbolDecoration::from_data_layout(MACOS_X86_64).unwrap();
        assert_eq!(macho.decorate("\u{1}main"), "main");
        assert_eq!(macho.prefix(), Some('_'));
    }

    #[test]
    fn test_cleanup_hook_always_substituted() {
        let table = SymbolResolutionTable::from_data_layout(WASM32).unwrap();

        assert_eq!(
            table.action("__cxa_atexit"),
            ResolutionAction::Substitute(Substitute::CleanupRegistration)
        );
        assert_eq!(
            table.action("__dso_handle"),
            ResolutionAction::Substitute(Substitute::ModuleHandle)
        );
        assert_eq!(table.action("printf"), ResolutionAction::LookupInProcess);
    }

    #[test]
    fn test_substitutes_use_decorated_names() {
        let table = SymbolResolutionTable::from_data_layout(MACOS_X86_64).unwrap();

        assert_eq!(
            table.action("___cxa_atexit"),
            ResolutionAction::Substitute(Substitute::CleanupRegistration)
        );
        // The undecorated form is just another name on this target
        assert_eq!(table.action("__cxa_atexit"), ResolutionAction::LookupInProcess);
    }

    #[test]
    fn test_substitute_names() {
        assert_eq!(Substitute::CleanupRegistration.hook(), "__cxa_atexit");
        assert_eq!(
            Substitute::ModuleHandle.to_string(),
            "mutant_runner_dso_handle"
        );
    }
}
