use std::path::PathBuf;

use quill_audit::{AuditError, AuditFailure};
use quill_lang::ImageError;
use quill_types::{CompileResult, ConfigError, SecurityReport};

/// A module could not be read or loaded.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("failed to read module {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("reference `{name}` not found at {}", path.display())]
    MissingReference { name: String, path: PathBuf },

    #[error(transparent)]
    Image(#[from] ImageError),

    #[error(transparent)]
    Audit(#[from] AuditError),
}

/// Everything a domain operation can fail with.
#[derive(Debug, thiserror::Error)]
pub enum DomainError {
    /// The compiler reported errors; the full result stays available through
    /// [`ScriptDomain::last_compile_result`](crate::ScriptDomain::last_compile_result).
    #[error("compilation of `{artifact}` failed with {errors} error(s): {first}")]
    Compilation {
        artifact: String,
        errors: usize,
        first: String,
    },

    /// The module broke the security policy and was not loaded.
    #[error("module `{}` rejected by security policy: {}", .0.module_name, describe(.0))]
    Security(SecurityReport),

    #[error(transparent)]
    Load(#[from] LoadError),

    /// The module loaded but holds no type a caller could use.
    #[error("module `{0}` has no discoverable types")]
    NoTypes(String),

    #[error("assembly `{0}` is not loaded in this domain")]
    NotLoaded(String),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl DomainError {
    pub(crate) fn compilation(result: &CompileResult) -> Self {
        Self::Compilation {
            artifact: result.artifact_name.clone(),
            errors: result.error_count(),
            first: result
                .first_error()
                .map(ToString::to_string)
                .unwrap_or_default(),
        }
    }

    /// The violations behind a security rejection.
    pub fn security_report(&self) -> Option<&SecurityReport> {
        match self {
            Self::Security(report) => Some(report),
            _ => None,
        }
    }
}

impl From<AuditFailure> for DomainError {
    fn from(failure: AuditFailure) -> Self {
        match failure {
            AuditFailure::Rejected(report) => Self::Security(report),
            AuditFailure::Unreadable(e) => Self::Load(LoadError::Audit(e)),
        }
    }
}

impl From<ImageError> for DomainError {
    fn from(e: ImageError) -> Self {
        Self::Load(LoadError::Image(e))
    }
}

fn describe(report: &SecurityReport) -> String {
    report
        .violations
        .iter()
        .map(|v| v.description.as_str())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Result type for domain operations.
pub type DomainResult<T> = Result<T, DomainError>;
