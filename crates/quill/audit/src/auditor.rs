//! Pre-load security auditing.
//!
//! The auditor never executes anything: it decodes the module image, reads
//! its metadata surface ([`MetadataSummary`]) and checks it against a
//! [`SecurityPolicy`].
//!
//! Reference and namespace restrictions are evaluated independently. Within
//! one kind, every inclusive restriction contributes to a single allow-list
//! and every exclusive restriction is checked on its own.

use quill_lang::ModuleImage;
use quill_types::{
    Restriction, RestrictionKind, RestrictionMode, ScriptSettings, SecurityPolicy, SecurityReport,
    SecurityViolation,
};
use tracing::{debug, info, warn};

use crate::error::{AuditError, AuditFailure, AuditResult};
use crate::metadata::MetadataSummary;

/// Audits compiled modules against a security policy.
#[derive(Clone, Debug, Default)]
pub struct SecurityAuditor {
    policy: SecurityPolicy,
}

impl SecurityAuditor {
    pub fn new(policy: SecurityPolicy) -> Self {
        Self { policy }
    }

    pub fn from_settings(settings: &ScriptSettings) -> Self {
        Self::new(settings.security_policy())
    }

    pub fn policy(&self) -> &SecurityPolicy {
        &self.policy
    }

    /// List every violation in the module bytes.
    ///
    /// A disabled policy skips auditing and yields no violations without
    /// reading the bytes.
    pub fn audit(&self, bytes: &[u8]) -> AuditResult<Vec<SecurityViolation>> {
        if !self.policy.enabled {
            return Ok(Vec::new());
        }
        let image = ModuleImage::decode(bytes)?;
        Ok(self.inspect(&image))
    }

    /// List every violation in an already decoded image.
    pub fn inspect(&self, image: &ModuleImage) -> Vec<SecurityViolation> {
        if !self.policy.enabled {
            return Vec::new();
        }
        let summary = MetadataSummary::of(image);
        let mut violations = check(
            RestrictionKind::Reference,
            &self.policy.reference_restrictions,
            &summary.references,
        );
        violations.extend(check(
            RestrictionKind::Namespace,
            &self.policy.namespace_restrictions,
            &summary.namespaces,
        ));
        debug!(
            module = %summary.module_name,
            references = summary.references.len(),
            namespaces = summary.namespaces.len(),
            violations = violations.len(),
            "module audited"
        );
        violations
    }

    /// Audit without failing: unreadable bytes are recorded in the report.
    pub fn probe(&self, bytes: &[u8]) -> SecurityReport {
        if !self.policy.enabled {
            return SecurityReport::default();
        }
        match ModuleImage::decode(bytes) {
            Ok(image) => SecurityReport {
                violations: self.inspect(&image),
                module_name: image.name,
                audited: true,
                error: None,
            },
            Err(e) => SecurityReport {
                module_name: String::new(),
                audited: true,
                violations: Vec::new(),
                error: Some(e.to_string()),
            },
        }
    }

    /// Audit and, when the module passes, hand out the proof the loader
    /// requires.
    pub fn certify(
        &self,
        bytes: Vec<u8>,
        symbols: Option<Vec<u8>>,
    ) -> Result<AuditedModule, AuditFailure> {
        if !self.policy.enabled {
            debug!(len = bytes.len(), "security checks disabled, module not audited");
            return Ok(AuditedModule {
                bytes,
                symbols,
                report: SecurityReport::default(),
            });
        }
        let image = ModuleImage::decode(&bytes).map_err(AuditError::from)?;
        let report = SecurityReport {
            violations: self.inspect(&image),
            module_name: image.name,
            audited: true,
            error: None,
        };
        if !report.passed() {
            for violation in &report.violations {
                warn!(
                    module = %report.module_name,
                    kind = %violation.kind,
                    rule = %violation.rule,
                    offending = %violation.offending,
                    "security violation"
                );
            }
            return Err(AuditFailure::Rejected(report));
        }
        info!(module = %report.module_name, "module passed security audit");
        Ok(AuditedModule {
            bytes,
            symbols,
            report,
        })
    }
}

/// Module bytes that went through [`SecurityAuditor::certify`].
///
/// Only the auditor can build one, so a loader that accepts nothing else
/// cannot be handed unaudited bytes.
#[derive(Clone, Debug)]
pub struct AuditedModule {
    bytes: Vec<u8>,
    symbols: Option<Vec<u8>>,
    report: SecurityReport,
}

impl AuditedModule {
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn symbols(&self) -> Option<&[u8]> {
        self.symbols.as_deref()
    }

    pub fn report(&self) -> &SecurityReport {
        &self.report
    }

    /// False when the policy was disabled and no audit ran.
    pub fn is_audited(&self) -> bool {
        self.report.audited
    }

    pub fn into_parts(self) -> (Vec<u8>, Option<Vec<u8>>, SecurityReport) {
        (self.bytes, self.symbols, self.report)
    }
}

fn check(kind: RestrictionKind, rules: &[Restriction], found: &[String]) -> Vec<SecurityViolation> {
    let allow: Vec<&str> = rules
        .iter()
        .filter(|r| r.mode == RestrictionMode::Inclusive)
        .map(|r| r.name.as_str())
        .collect();
    let deny = rules.iter().filter(|r| r.mode == RestrictionMode::Exclusive);

    let mut violations = Vec::new();
    for name in found {
        if !allow.is_empty() && !allow.iter().any(|rule| rule_matches(kind, rule, name)) {
            violations.push(SecurityViolation {
                kind,
                mode: RestrictionMode::Inclusive,
                rule: allow.join(", "),
                offending: name.clone(),
                description: format!("{kind} `{name}` is not in the allowed list"),
            });
        }
        for rule in deny.clone() {
            if rule_matches(kind, &rule.name, name) {
                violations.push(SecurityViolation {
                    kind,
                    mode: RestrictionMode::Exclusive,
                    rule: rule.name.clone(),
                    offending: name.clone(),
                    description: format!("{kind} `{name}` is forbidden by `{}`", rule.name),
                });
            }
        }
    }
    violations
}

/// References match exactly; namespaces also match their children.
fn rule_matches(kind: RestrictionKind, rule: &str, name: &str) -> bool {
    match kind {
        RestrictionKind::Reference => rule == name,
        RestrictionKind::Namespace => {
            name == rule
                || name
                    .strip_prefix(rule)
                    .is_some_and(|rest| rest.starts_with('.'))
        }
    }
}
