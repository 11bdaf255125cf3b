//! Compiled artifacts and the mutants that own them.
//!
//! This module provides:
//! - [`CompiledArtifact`]: One compiled WebAssembly module (one translation unit)
//! - [`Mutant`]: A mutation point plus the artifacts of the mutated program
//!
//! Artifacts are produced by the compilation step outside this crate. The
//! runner only validates and compiles them for the host engine.

use std::hash::{DefaultHasher, Hash, Hasher};
use std::path::Path;
use std::time::Instant;

use tracing::{debug, instrument};
use wasmtime::{Engine, Module};

use mutant_runner_common::{MutationPoint, RunnerError};

/// A compiled WebAssembly module belonging to one mutant.
///
/// Immutable once created. Cloning is cheap; the underlying [`Module`] is
/// reference counted.
#[derive(Clone)]
pub struct CompiledArtifact {
    /// Display name used in logs and errors.
    name: String,

    /// The compiled Wasmtime module.
    module: Module,

    /// Hash of the original bytes.
    content_hash: String,
}

impl CompiledArtifact {
    /// Compile an artifact from WebAssembly bytes.
    ///
    /// # Arguments
    ///
    /// * `engine` - The Wasmtime engine to compile for
    /// * `name` - Display name of the artifact
    /// * `bytes` - The raw WebAssembly bytes
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes are not a valid WebAssembly module.
    #[instrument(skip(engine, bytes), fields(bytes_len = bytes.len()))]
    pub fn from_bytes(engine: &Engine, name: &str, bytes: &[u8]) -> Result<Self, RunnerError> {
        let start = Instant::now();

        validate_wasm_header(name, bytes)?;

        let module = Module::from_binary(engine, bytes)
            .map_err(|e| RunnerError::malformed(name, format!("Compilation failed: {e}")))?;

        let content_hash = compute_hash(bytes);

        debug!(
            content_hash = %content_hash,
            duration_ms = start.elapsed().as_millis(),
            "Artifact compiled"
        );

        Ok(Self {
            name: name.to_string(),
            module,
            content_hash,
        })
    }

    /// Compile an artifact from WAT (WebAssembly Text Format).
    ///
    /// # Errors
    ///
    /// Returns an error if the text does not describe a valid module.
    #[instrument(skip(engine, wat))]
    pub fn from_wat(engine: &Engine, name: &str, wat: &str) -> Result<Self, RunnerError> {
        let module = Module::new(engine, wat)
            .map_err(|e| RunnerError::malformed(name, format!("WAT compilation failed: {e}")))?;

        Ok(Self {
            name: name.to_string(),
            module,
            content_hash: compute_hash(wat.as_bytes()),
        })
    }

    /// Load and compile an artifact from disk.
    ///
    /// Files with a `.wat` extension are parsed as text, everything else as
    /// binary. The file stem becomes the artifact name.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or compiled.
    pub fn from_file(engine: &Engine, path: impl AsRef<Path>) -> Result<Self, RunnerError> {
        let path = path.as_ref();
        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("unknown");

        let bytes = std::fs::read(path)?;

        if path.extension().is_some_and(|ext| ext == "wat") {
            let text = std::str::from_utf8(&bytes)
                .map_err(|e| RunnerError::malformed(name, format!("Invalid UTF-8: {e}")))?;
            Self::from_wat(engine, name, text)
        } else {
            Self::from_bytes(engine, name, &bytes)
        }
    }

    /// The artifact's display name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Hash of the original bytes.
    pub fn content_hash(&self) -> &str {
        &self.content_hash
    }

    /// The compiled module.
    pub fn module(&self) -> &Module {
        &self.module
    }
}

impl std::fmt::Debug for CompiledArtifact {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledArtifact")
            .field("name", &self.name)
            .field("content_hash", &self.content_hash)
            .finish_non_exhaustive()
    }
}

/// A mutated program ready to run.
///
/// The same mutant may be run several times (e.g. retried); every run loads
/// the artifacts afresh.
#[derive(Debug, Clone)]
pub struct Mutant {
    point: MutationPoint,
    artifacts: Vec<CompiledArtifact>,
}

impl Mutant {
    /// Create a mutant from its mutation point and artifacts.
    pub fn new(point: MutationPoint, artifacts: Vec<CompiledArtifact>) -> Self {
        Self { point, artifacts }
    }

    /// The mutation this program carries.
    pub fn point(&self) -> &MutationPoint {
        &self.point
    }

    /// Stable identity for logs and error reports.
    pub fn id(&self) -> String {
        self.point.id()
    }

    /// Artifacts in load order.
    pub fn artifacts(&self) -> &[CompiledArtifact] {
        &self.artifacts
    }
}

/// Validate WebAssembly header (magic number).
fn validate_wasm_header(name: &str, bytes: &[u8]) -> Result<(), RunnerError> {
    if bytes.len() < 8 {
        return Err(RunnerError::malformed(name, "file too small"));
    }

    // Check magic number: \0asm
    if &bytes[0..4] != b"\0asm" {
        return Err(RunnerError::malformed(name, "bad magic number"));
    }

    Ok(())
}

/// Compute a hash of the given bytes.
fn compute_hash(bytes: &[u8]) -> String {
    let mut hasher = DefaultHasher::new();
    bytes.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}

#[cfg(test)]
mod tests {
    use super::*;

    // Minimal valid Wasm module (empty module)
    const MINIMAL_WASM: &[u8] = &[
        0x00, 0x61, 0x73, 0x6d, // magic: \0asm
        0x01, 0x00, 0x00, 0x00, // version: 1
    ];

    #[test]
    fn test_validate_wasm_header() {
        assert!(validate_wasm_header("a", MINIMAL_WASM).is_ok());
        assert!(validate_wasm_header("a", &[0x00, 0x61]).is_err());

        let bad_magic = &[0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00];
        let err = validate_wasm_header("a", bad_magic).unwrap_err();
        assert!(err.is_artifact_error());
    }

    #[test]
    fn test_compute_hash() {
        let hash1 = compute_hash(b"hello");
        let hash2 = compute_hash(b"hello");
        let hash3 = compute_hash(b"world");

        assert_eq!(hash1, hash2);
        assert_ne!(hash1, hash3);
        assert_eq!(hash1.len(), 16);
    }

    #[test]
    fn test_artifact_from_bytes() {
        let engine = Engine::default();
        let artifact = CompiledArtifact::from_bytes(&engine, "empty", MINIMAL_WASM).unwrap();

        assert_eq!(artifact.name(), "empty");
        assert!(!artifact.content_hash().is_empty());
        assert!(format!("{artifact:?}").contains("CompiledArtifact"));
    }

    #[test]
    fn test_artifact_rejects_truncated_module() {
        let engine = Engine::default();
        let mut bytes = MINIMAL_WASM.to_vec();
        bytes.extend_from_slice(&[0x01, 0xff]);

        let err = CompiledArtifact::from_bytes(&engine, "broken", &bytes).unwrap_err();
        assert!(err.is_artifact_error());
    }

    #[test]
    fn test_artifact_from_wat() {
        let engine = Engine::default();
        let artifact =
            CompiledArtifact::from_wat(&engine, "tu", r#"(module (func (export "f")))"#).unwrap();

        assert_eq!(artifact.module().exports().count(), 1);
        assert!(CompiledArtifact::from_wat(&engine, "tu", "(module (func").is_err());
    }

    #[test]
    fn test_mutant_identity() {
        let engine = Engine::default();
        let artifact = CompiledArtifact::from_bytes(&engine, "empty", MINIMAL_WASM).unwrap();
        let mutant = Mutant::new(
            MutationPoint::new("cxx_add_to_sub", "math.cpp", 12, 14),
            vec![artifact],
        );

        assert_eq!(mutant.id(), "cxx_add_to_sub:math.cpp:12:14");
        assert_eq!(mutant.artifacts().len(), 1);
        assert_eq!(mutant.point().location.line, 12);
    }
}
