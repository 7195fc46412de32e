use quill_lang::ImageError;
use quill_types::SecurityReport;

/// The module bytes could not be audited.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum AuditError {
    /// The bytes are not a readable module image.
    #[error("module could not be read for auditing: {0}")]
    Malformed(#[from] ImageError),
}

/// Why [`SecurityAuditor::certify`](crate::SecurityAuditor::certify) refused
/// a module.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum AuditFailure {
    /// The module broke at least one restriction.
    #[error("module `{}` failed the security audit with {} violation(s): {}",
        .0.module_name,
        .0.violation_count(),
        first_violation(.0))]
    Rejected(SecurityReport),

    #[error(transparent)]
    Unreadable(#[from] AuditError),
}

impl AuditFailure {
    /// The report behind a rejection.
    pub fn report(&self) -> Option<&SecurityReport> {
        match self {
            Self::Rejected(report) => Some(report),
            Self::Unreadable(_) => None,
        }
    }
}

fn first_violation(report: &SecurityReport) -> String {
    report
        .violations
        .first()
        .map(|v| v.description.clone())
        .unwrap_or_default()
}

/// Result type for audit operations.
pub type AuditResult<T> = Result<T, AuditError>;

#[cfg(test)]
mod tests {
    use super::*;
    use quill_types::{RestrictionKind, RestrictionMode, SecurityViolation};

    #[test]
    fn rejected_display_names_first_violation() {
        let report = SecurityReport {
            module_name: "QuillModule4".into(),
            audited: true,
            violations: vec![SecurityViolation {
                kind: RestrictionKind::Reference,
                mode: RestrictionMode::Exclusive,
                rule: "bytecode-weaver".into(),
                offending: "bytecode-weaver".into(),
                description: "reference `bytecode-weaver` is forbidden".into(),
            }],
            error: None,
        };
        let failure = AuditFailure::Rejected(report);
        assert_eq!(
            failure.to_string(),
            "module `QuillModule4` failed the security audit with 1 violation(s): \
             reference `bytecode-weaver` is forbidden"
        );
        assert_eq!(failure.report().unwrap().violation_count(), 1);
    }

    #[test]
    fn unreadable_is_transparent() {
        let failure: AuditFailure = AuditError::from(ImageError::BadMagic("module")).into();
        assert_eq!(
            failure.to_string(),
            "module could not be read for auditing: not a quill module image: bad magic header"
        );
        assert!(failure.report().is_none());
    }
}
