//! The thread-safe half of compile-and-load.
//!
//! Stages, in order:
//! 1. compile the request through the backend adapter
//! 2. stop if the result carries errors
//! 3. audit the module bytes and produce an [`AuditedModule`]
//!
//! Committing the audited module happens later on the host thread, in
//! [`ScriptDomain::commit`](crate::ScriptDomain::commit). A pipeline owns
//! copies of everything it needs, so it can be moved to a worker thread.

use quill_audit::{AuditFailure, AuditedModule, SecurityAuditor};
use quill_compiler::ScriptCompiler;
use quill_types::{CompileRequest, CompileResult};
use tracing::debug;

/// Compiler plus auditor, detached from any domain.
#[derive(Clone, Debug)]
pub struct CompilePipeline {
    compiler: ScriptCompiler,
    auditor: SecurityAuditor,
}

/// What a pipeline run produced.
#[derive(Debug)]
pub struct PipelineOutput {
    pub result: CompileResult,
    /// `None` when compilation failed and the auditor never ran.
    pub audit: Option<Result<AuditedModule, AuditFailure>>,
}

impl PipelineOutput {
    /// Whether the module compiled and passed the audit.
    pub fn is_ready(&self) -> bool {
        matches!(self.audit, Some(Ok(_)))
    }
}

impl CompilePipeline {
    pub fn new(compiler: ScriptCompiler, auditor: SecurityAuditor) -> Self {
        Self { compiler, auditor }
    }

    pub fn compiler(&self) -> &ScriptCompiler {
        &self.compiler
    }

    pub fn auditor(&self) -> &SecurityAuditor {
        &self.auditor
    }

    /// Compile, then audit when compilation succeeded.
    pub fn run(&self, request: &CompileRequest) -> PipelineOutput {
        let result = self.compiler.compile(request);
        let audit = match (&result.module, result.has_errors()) {
            (Some(bytes), false) => {
                Some(self.auditor.certify(bytes.clone(), result.symbols.clone()))
            }
            _ => None,
        };
        debug!(
            artifact = %result.artifact_name,
            compiled = result.success(),
            audited = audit.as_ref().is_some_and(|a| a.is_ok()),
            "pipeline finished"
        );
        PipelineOutput { result, audit }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quill_types::{ScriptSettings, SecurityPolicy};

    fn pipeline(policy: SecurityPolicy) -> (CompilePipeline, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let settings = ScriptSettings::default()
            .with_working_directory(dir.path())
            .unwrap();
        let pipeline =
            CompilePipeline::new(ScriptCompiler::new(&settings), SecurityAuditor::new(policy));
        (pipeline, dir)
    }

    #[test]
    fn clean_source_is_ready() {
        let (pipeline, _dir) = pipeline(SecurityPolicy::default());
        let out = pipeline.run(&CompileRequest::from_texts(["(type A (field x Int))"]));
        assert!(out.is_ready());
        assert!(out.result.success());
    }

    #[test]
    fn compile_errors_skip_the_audit() {
        let (pipeline, _dir) = pipeline(SecurityPolicy::default());
        let out = pipeline.run(&CompileRequest::from_texts(["(type A (field x Nope))"]));
        assert!(out.audit.is_none());
        assert!(!out.is_ready());
        assert_eq!(out.result.first_error().unwrap().code, "QE0100");
    }

    #[test]
    fn violations_stop_before_loading() {
        let (pipeline, _dir) = pipeline(SecurityPolicy::default());
        let out = pipeline.run(&CompileRequest::from_texts(["(type A (field f Host.Emit.Writer))"]));
        assert!(out.result.success());
        assert!(matches!(out.audit, Some(Err(AuditFailure::Rejected(_)))));
    }

    #[test]
    fn pipeline_is_send() {
        fn assert_send<T: Send + 'static>() {}
        assert_send::<CompilePipeline>();
        assert_send::<PipelineOutput>();
    }
}
