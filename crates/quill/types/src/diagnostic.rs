//! Compile diagnostics and compile results.

use std::fmt;

use serde::{Deserialize, Serialize};

/// One compiler diagnostic. Warnings and errors share the same shape.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompileDiagnostic {
    /// Diagnostic code, e.g. `QE0103`.
    pub code: String,
    /// Human-readable message.
    pub message: String,
    /// Source file (or synthetic unit name) the diagnostic points at.
    pub file: String,
    /// 1-based line, 0 when not tied to a location.
    pub line: u32,
    /// 1-based column, 0 when not tied to a location.
    pub column: u32,
    /// Whether this is a warning rather than an error.
    pub is_warning: bool,
    /// Warning level (1 = most severe). Errors carry level 0.
    #[serde(default)]
    pub level: u8,
}

impl CompileDiagnostic {
    /// Create an error diagnostic.
    pub fn error(
        code: impl Into<String>,
        message: impl Into<String>,
        file: impl Into<String>,
        line: u32,
        column: u32,
    ) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            file: file.into(),
            line,
            column,
            is_warning: false,
            level: 0,
        }
    }

    /// Create a warning diagnostic at the given warning level.
    pub fn warning(
        code: impl Into<String>,
        message: impl Into<String>,
        file: impl Into<String>,
        line: u32,
        column: u32,
        level: u8,
    ) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            file: file.into(),
            line,
            column,
            is_warning: true,
            level,
        }
    }

    /// Create an error that is not tied to any source location.
    pub fn general(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::error(code, message, "", 0, 0)
    }

    /// Whether this diagnostic is an error.
    pub fn is_error(&self) -> bool {
        !self.is_warning
    }
}

impl fmt::Display for CompileDiagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let severity = if self.is_warning { "warning" } else { "error" };
        if self.file.is_empty() {
            write!(f, "{severity} {}: {}", self.code, self.message)
        } else {
            write!(
                f,
                "{}({},{}): {severity} {}: {}",
                self.file, self.line, self.column, self.code, self.message
            )
        }
    }
}

/// The outcome of one compile invocation.
///
/// A result is never an `Err`: compiler failures are reported as diagnostics.
/// `module` is `None` whenever any error diagnostic is present.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompileResult {
    /// Unique artifact name generated for this invocation.
    pub artifact_name: String,
    /// Compiled module bytes.
    pub module: Option<Vec<u8>>,
    /// Debug symbol bytes, when requested and produced.
    pub symbols: Option<Vec<u8>>,
    /// All diagnostics in the order the backend reported them.
    pub diagnostics: Vec<CompileDiagnostic>,
}

impl CompileResult {
    /// Whether compilation produced a module and no errors.
    pub fn success(&self) -> bool {
        self.module.is_some() && !self.has_errors()
    }

    /// Whether any error diagnostic is present.
    pub fn has_errors(&self) -> bool {
        self.diagnostics.iter().any(CompileDiagnostic::is_error)
    }

    /// Error diagnostics only.
    pub fn errors(&self) -> impl Iterator<Item = &CompileDiagnostic> {
        self.diagnostics.iter().filter(|d| d.is_error())
    }

    /// Warning diagnostics only.
    pub fn warnings(&self) -> impl Iterator<Item = &CompileDiagnostic> {
        self.diagnostics.iter().filter(|d| d.is_warning)
    }

    /// Number of error diagnostics.
    pub fn error_count(&self) -> usize {
        self.errors().count()
    }

    /// Number of warning diagnostics.
    pub fn warning_count(&self) -> usize {
        self.warnings().count()
    }

    /// One-line summary of the first error, for fault messages.
    pub fn first_error(&self) -> Option<&CompileDiagnostic> {
        self.errors().next()
    }
}
