use std::any::Any;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use quill_types::{
    CompileDiagnostic, CompileOptions, CompileRequest, CompileResult, OutputKind, ScriptSettings,
};
use tracing::{debug, info, warn};

use crate::backend::{BackendInvocation, CompilerBackend, QuillBackend};

/// Process-wide artifact counter; shared by every compiler and thread.
static ARTIFACT_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Top-level compiler backend adapter.
///
/// Wraps a [`CompilerBackend`] and gives every invocation the same contract:
/// a unique artifact name, artifacts read back and removed from disk, uniform
/// warning handling, and no error or panic escaping [`compile`](Self::compile).
#[derive(Clone)]
pub struct ScriptCompiler {
    backend: Arc<dyn CompilerBackend>,
    working_directory: PathBuf,
    artifact_prefix: String,
}

impl ScriptCompiler {
    /// A compiler using the in-process Quill backend.
    ///
    /// Only the working directory and artifact prefix come from `settings`;
    /// compile options always come from the request.
    pub fn new(settings: &ScriptSettings) -> Self {
        Self::with_backend(settings, Arc::new(QuillBackend))
    }

    pub fn with_backend(settings: &ScriptSettings, backend: Arc<dyn CompilerBackend>) -> Self {
        Self {
            backend,
            working_directory: settings.working_directory().to_path_buf(),
            artifact_prefix: settings.artifact_prefix.clone(),
        }
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    pub fn working_directory(&self) -> &Path {
        &self.working_directory
    }

    /// Reserve the next unique artifact name.
    pub fn next_artifact_name(&self) -> String {
        let n = ARTIFACT_COUNTER.fetch_add(1, Ordering::Relaxed) + 1;
        format!("{}{n}", self.artifact_prefix)
    }

    /// Compile a request. Never fails: every problem is a diagnostic.
    pub fn compile(&self, request: &CompileRequest) -> CompileResult {
        let artifact_name = self.next_artifact_name();
        let options = &request.options;
        debug!(
            artifact = %artifact_name,
            backend = self.backend.name(),
            units = request.sources.len(),
            references = request.references.len(),
            "compiling"
        );

        let mut result = CompileResult {
            artifact_name: artifact_name.clone(),
            ..CompileResult::default()
        };

        if request.sources.is_empty() {
            let message = "no source files specified";
            match options.output_kind {
                OutputKind::Executable => {
                    result
                        .diagnostics
                        .push(CompileDiagnostic::general("QE0002", message));
                    info!(artifact = %artifact_name, "compile rejected: no sources");
                    return result;
                }
                OutputKind::Library => result
                    .diagnostics
                    .push(CompileDiagnostic::warning("QE0002", message, "", 0, 0, 1)),
            }
        }

        let module_path = self.working_directory.join(format!("{artifact_name}.qmod"));
        let symbols_path = options
            .debug_symbols
            .then(|| self.working_directory.join(format!("{artifact_name}.qsym")));
        let invocation = BackendInvocation {
            artifact_name: &artifact_name,
            sources: &request.sources,
            references: &request.references,
            output_kind: options.output_kind,
            module_path,
            symbols_path,
        };

        let emitted = catch_unwind(AssertUnwindSafe(|| self.backend.emit(&invocation)));
        match emitted {
            Ok(Ok(diagnostics)) => result.diagnostics.extend(diagnostics),
            Ok(Err(e)) => {
                warn!(
                    artifact = %artifact_name,
                    backend = self.backend.name(),
                    error = %e,
                    "backend failed"
                );
                result.diagnostics.push(CompileDiagnostic::general(
                    "QE9999",
                    format!("compiler backend `{}` failed: {e}", self.backend.name()),
                ));
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                warn!(
                    artifact = %artifact_name,
                    backend = self.backend.name(),
                    panic = %message,
                    "backend panicked"
                );
                result.diagnostics.push(CompileDiagnostic::general(
                    "QE9999",
                    format!("compiler backend `{}` panicked: {message}", self.backend.name()),
                ));
            }
        }

        let module = take_artifact(&invocation.module_path);
        let symbols = invocation.symbols_path.as_deref().and_then(take_artifact);

        apply_warning_options(&mut result.diagnostics, options);
        if !result.has_errors() {
            if module.is_none() {
                result.diagnostics.push(CompileDiagnostic::general(
                    "QE9999",
                    format!(
                        "compiler backend `{}` reported success but wrote no module",
                        self.backend.name()
                    ),
                ));
            } else {
                result.module = module;
                result.symbols = symbols;
            }
        }

        info!(
            artifact = %artifact_name,
            success = result.success(),
            errors = result.error_count(),
            warnings = result.warning_count(),
            "compile finished"
        );
        result
    }
}

impl fmt::Debug for ScriptCompiler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptCompiler")
            .field("backend", &self.backend.name())
            .field("working_directory", &self.working_directory)
            .field("artifact_prefix", &self.artifact_prefix)
            .finish()
    }
}

/// Drop warnings above the requested level, then promote the rest when
/// warnings are treated as errors.
pub fn apply_warning_options(diagnostics: &mut Vec<CompileDiagnostic>, options: &CompileOptions) {
    diagnostics.retain(|d| !d.is_warning || d.level <= options.warning_level);
    if options.warnings_as_errors {
        for d in diagnostics.iter_mut().filter(|d| d.is_warning) {
            d.is_warning = false;
            d.level = 0;
        }
    }
}

/// Read an artifact and remove it. Missing artifacts read as `None`.
fn take_artifact(path: &Path) -> Option<Vec<u8>> {
    let bytes = std::fs::read(path).ok();
    if let Err(e) = std::fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "failed to remove compiler artifact");
        }
    }
    bytes
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
