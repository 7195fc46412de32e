//! Diagnostic collection for the front end.

use quill_types::CompileDiagnostic;

use crate::syntax::Span;

/// Ordered diagnostics gathered during one front-end run.
#[derive(Clone, Debug, Default)]
pub(crate) struct Diagnostics {
    items: Vec<CompileDiagnostic>,
}

impl Diagnostics {
    pub fn error(&mut self, code: &str, message: impl Into<String>, file: &str, span: Span) {
        self.items.push(CompileDiagnostic::error(
            code,
            message,
            file,
            span.line,
            span.column,
        ));
    }

    pub fn warning(
        &mut self,
        code: &str,
        message: impl Into<String>,
        file: &str,
        span: Span,
        level: u8,
    ) {
        self.items.push(CompileDiagnostic::warning(
            code,
            message,
            file,
            span.line,
            span.column,
            level,
        ));
    }

    pub fn has_errors(&self) -> bool {
        self.items.iter().any(CompileDiagnostic::is_error)
    }

    #[cfg(test)]
    pub fn items(&self) -> &[CompileDiagnostic] {
        &self.items
    }

    pub fn into_vec(self) -> Vec<CompileDiagnostic> {
        self.items
    }
}
