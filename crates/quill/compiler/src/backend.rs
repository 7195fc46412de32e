use std::path::{Path, PathBuf};

use quill_lang::{compile_units, SourceUnit};
use quill_types::{CompileDiagnostic, OutputKind, SourceSet};
use tracing::debug;

use crate::error::{BackendError, BackendResult};

/// Everything a backend needs for one compile invocation.
#[derive(Clone, Debug)]
pub struct BackendInvocation<'a> {
    /// Unique module name chosen by the adapter.
    pub artifact_name: &'a str,
    pub sources: &'a SourceSet,
    pub references: &'a [String],
    pub output_kind: OutputKind,
    /// Where the module bytes must be written.
    pub module_path: PathBuf,
    /// Where debug symbols must be written, when requested.
    pub symbols_path: Option<PathBuf>,
}

/// A compiler backend.
///
/// Backends write their artifacts to the paths named in the invocation and
/// report diagnostics. Returning `Err` means the backend itself broke, not
/// that the sources failed to compile.
pub trait CompilerBackend: Send + Sync {
    /// Short name used in logs and synthetic diagnostics.
    fn name(&self) -> &str;

    fn emit(&self, invocation: &BackendInvocation<'_>) -> BackendResult<Vec<CompileDiagnostic>>;
}

/// The in-process Quill language backend.
#[derive(Clone, Copy, Debug, Default)]
pub struct QuillBackend;

impl CompilerBackend for QuillBackend {
    fn name(&self) -> &str {
        "quill"
    }

    fn emit(&self, invocation: &BackendInvocation<'_>) -> BackendResult<Vec<CompileDiagnostic>> {
        let mut diagnostics = Vec::new();
        let units = read_units(invocation.sources, &mut diagnostics);
        if !diagnostics.is_empty() {
            return Ok(diagnostics);
        }

        let output = compile_units(
            invocation.artifact_name,
            &units,
            invocation.references,
            invocation.output_kind,
        );
        diagnostics.extend(output.diagnostics);

        if let Some(image) = output.image {
            write(&invocation.module_path, &image.encode()?)?;
            if let Some(path) = &invocation.symbols_path {
                write(path, &output.symbols.encode()?)?;
            }
            debug!(
                artifact = invocation.artifact_name,
                types = image.types.len(),
                "quill backend wrote module"
            );
        }
        Ok(diagnostics)
    }
}

/// Turn a source set into named units. Unreadable files become `QE0003`.
fn read_units(sources: &SourceSet, diagnostics: &mut Vec<CompileDiagnostic>) -> Vec<SourceUnit> {
    match sources {
        SourceSet::Texts(texts) => texts
            .iter()
            .enumerate()
            .map(|(i, text)| SourceUnit::new(text_unit_name(i), text.clone()))
            .collect(),
        SourceSet::Files(files) => files
            .iter()
            .filter_map(|path| match std::fs::read_to_string(path) {
                Ok(text) => Some(SourceUnit::new(path.display().to_string(), text)),
                Err(e) => {
                    diagnostics.push(CompileDiagnostic::error(
                        "QE0003",
                        format!("source file could not be read: {e}"),
                        path.display().to_string(),
                        0,
                        0,
                    ));
                    None
                }
            })
            .collect(),
    }
}

/// File name reported for the `index`-th literal text unit.
pub fn text_unit_name(index: usize) -> String {
    format!("source{index}.ql")
}

fn write(path: &Path, bytes: &[u8]) -> BackendResult<()> {
    std::fs::write(path, bytes).map_err(|e| BackendError::io(path, e))
}
