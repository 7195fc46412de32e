//! External compiler process backend.
//!
//! The configured program is started once per invocation with its argument
//! template expanded:
//!
//! | placeholder    | expands to                                          |
//! |----------------|-----------------------------------------------------|
//! | `{output}`     | module output path                                  |
//! | `{symbols}`    | symbols output path, or nothing when not requested  |
//! | `{sources}`    | source file paths (one argument each when alone)    |
//! | `{references}` | reference names (one argument each when alone)      |
//!
//! Literal text sources are spilled to a temporary directory first. Every
//! line of the program's stdout and stderr shaped like
//! `file(line,col): error|warning CODE: message` (or `error CODE: message`)
//! becomes a diagnostic.

use std::ffi::OsString;
use std::path::PathBuf;
use std::process::Command;

use quill_types::{CompileDiagnostic, SourceSet};
use tracing::debug;

use crate::backend::{text_unit_name, BackendInvocation, CompilerBackend};
use crate::error::{BackendError, BackendResult};

/// Warning level assigned to warnings parsed from process output.
pub const PROCESS_WARNING_LEVEL: u8 = 1;

/// A backend that runs an external compiler program.
#[derive(Clone, Debug)]
pub struct ProcessBackend {
    name: String,
    program: PathBuf,
    args: Vec<String>,
}

impl ProcessBackend {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        let program = program.into();
        let name = program
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "process".to_string());
        Self {
            name,
            program,
            args: Vec::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Append one argument template.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    fn expand_args(&self, invocation: &BackendInvocation<'_>, sources: &[PathBuf]) -> Vec<OsString> {
        let module = invocation.module_path.display().to_string();
        let symbols = invocation
            .symbols_path
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        let joined_sources = sources
            .iter()
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
            .join(" ");
        let joined_refs = invocation.references.join(",");

        let mut out = Vec::new();
        for arg in &self.args {
            match arg.as_str() {
                "{sources}" => out.extend(sources.iter().map(|p| p.as_os_str().to_os_string())),
                "{references}" => out.extend(invocation.references.iter().map(OsString::from)),
                _ => {
                    let expanded = arg
                        .replace("{output}", &module)
                        .replace("{symbols}", &symbols)
                        .replace("{sources}", &joined_sources)
                        .replace("{references}", &joined_refs);
                    if !expanded.is_empty() {
                        out.push(OsString::from(expanded));
                    }
                }
            }
        }
        out
    }
}

impl CompilerBackend for ProcessBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn emit(&self, invocation: &BackendInvocation<'_>) -> BackendResult<Vec<CompileDiagnostic>> {
        // The spill directory must outlive the process.
        let (sources, _spill) = match invocation.sources {
            SourceSet::Files(files) => (files.clone(), None),
            SourceSet::Texts(texts) => {
                let dir = tempfile::tempdir()
                    .map_err(|e| BackendError::io(std::env::temp_dir(), e))?;
                let mut paths = Vec::with_capacity(texts.len());
                for (i, text) in texts.iter().enumerate() {
                    let path = dir.path().join(text_unit_name(i));
                    std::fs::write(&path, text).map_err(|e| BackendError::io(&path, e))?;
                    paths.push(path);
                }
                (paths, Some(dir))
            }
        };

        let args = self.expand_args(invocation, &sources);
        debug!(
            backend = %self.name,
            program = %self.program.display(),
            args = args.len(),
            "starting compiler process"
        );
        let output = Command::new(&self.program)
            .args(&args)
            .output()
            .map_err(|source| BackendError::Spawn {
                program: self.program.display().to_string(),
                source,
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        let mut diagnostics: Vec<CompileDiagnostic> = stdout
            .lines()
            .chain(stderr.lines())
            .filter_map(parse_diagnostic_line)
            .collect();

        if !output.status.success() && !diagnostics.iter().any(CompileDiagnostic::is_error) {
            let detail = stderr
                .lines()
                .map(str::trim)
                .find(|l| !l.is_empty())
                .map(|l| format!(": {l}"))
                .unwrap_or_default();
            diagnostics.push(CompileDiagnostic::general(
                "QE9999",
                format!("`{}` exited with {}{detail}", self.name, output.status),
            ));
        }
        Ok(diagnostics)
    }
}

/// Parse one line of compiler output into a diagnostic.
pub fn parse_diagnostic_line(line: &str) -> Option<CompileDiagnostic> {
    let line = line.trim();
    if let Some((location, rest)) = line.split_once("): ") {
        if let Some(diag) = parse_located(location, rest) {
            return Some(diag);
        }
    }
    let (is_warning, code, message) = parse_body(line)?;
    Some(build(is_warning, code, message, "", 0, 0))
}

fn parse_located(location: &str, rest: &str) -> Option<CompileDiagnostic> {
    let (file, position) = location.rsplit_once('(')?;
    let (line, column) = position.split_once(',')?;
    let line: u32 = line.trim().parse().ok()?;
    let column: u32 = column.trim().parse().ok()?;
    let (is_warning, code, message) = parse_body(rest)?;
    Some(build(is_warning, code, message, file.trim(), line, column))
}

fn parse_body(body: &str) -> Option<(bool, &str, &str)> {
    let (severity, rest) = body.split_once(' ')?;
    let is_warning = match severity {
        "error" => false,
        "warning" => true,
        _ => return None,
    };
    let (code, message) = rest.split_once(": ")?;
    if code.is_empty() || code.contains(char::is_whitespace) {
        return None;
    }
    Some((is_warning, code, message.trim()))
}

fn build(
    is_warning: bool,
    code: &str,
    message: &str,
    file: &str,
    line: u32,
    column: u32,
) -> CompileDiagnostic {
    if is_warning {
        CompileDiagnostic::warning(code, message, file, line, column, PROCESS_WARNING_LEVEL)
    } else {
        CompileDiagnostic::error(code, message, file, line, column)
    }
}
