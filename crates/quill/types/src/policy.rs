//! Security policy, violations and audit reports.

use std::fmt;

use serde::{Deserialize, Serialize};

/// How a restriction list is interpreted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RestrictionMode {
    /// Only the listed names are permitted; anything else is a violation.
    Inclusive,
    /// The listed names are forbidden; everything else is permitted.
    Exclusive,
}

impl fmt::Display for RestrictionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inclusive => write!(f, "inclusive"),
            Self::Exclusive => write!(f, "exclusive"),
        }
    }
}

/// What a restriction applies to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RestrictionKind {
    /// External module references.
    Reference,
    /// Namespaces of types appearing in module metadata.
    Namespace,
}

impl fmt::Display for RestrictionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Reference => write!(f, "reference"),
            Self::Namespace => write!(f, "namespace"),
        }
    }
}

/// A single (name, mode) restriction.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Restriction {
    pub name: String,
    pub mode: RestrictionMode,
}

impl Restriction {
    pub fn inclusive(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            mode: RestrictionMode::Inclusive,
        }
    }

    pub fn exclusive(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            mode: RestrictionMode::Exclusive,
        }
    }
}

impl fmt::Display for Restriction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.mode)
    }
}

/// The policy a module is audited against before loading.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityPolicy {
    /// When false, auditing is skipped entirely.
    pub enabled: bool,
    /// Restrictions on referenced external modules.
    pub reference_restrictions: Vec<Restriction>,
    /// Restrictions on namespaces used in metadata.
    pub namespace_restrictions: Vec<Restriction>,
}

impl SecurityPolicy {
    /// An enabled policy with no restrictions.
    pub fn permissive() -> Self {
        Self {
            enabled: true,
            reference_restrictions: Vec::new(),
            namespace_restrictions: Vec::new(),
        }
    }

    /// A policy that skips auditing.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::permissive()
        }
    }

    /// Add a reference restriction (builder pattern).
    pub fn with_reference_restriction(mut self, restriction: Restriction) -> Self {
        self.reference_restrictions.push(restriction);
        self
    }

    /// Add a namespace restriction (builder pattern).
    pub fn with_namespace_restriction(mut self, restriction: Restriction) -> Self {
        self.namespace_restrictions.push(restriction);
        self
    }

    /// Restrictions of the given kind.
    pub fn restrictions(&self, kind: RestrictionKind) -> &[Restriction] {
        match kind {
            RestrictionKind::Reference => &self.reference_restrictions,
            RestrictionKind::Namespace => &self.namespace_restrictions,
        }
    }
}

impl Default for SecurityPolicy {
    /// Raw filesystem access and code emission namespaces plus the editor
    /// automation and bytecode weaving modules are forbidden.
    fn default() -> Self {
        Self {
            enabled: true,
            reference_restrictions: vec![
                Restriction::exclusive("editor-automation"),
                Restriction::exclusive("bytecode-weaver"),
            ],
            namespace_restrictions: vec![
                Restriction::exclusive("Host.FileSystem"),
                Restriction::exclusive("Host.Emit"),
            ],
        }
    }
}

/// A restriction triggered by a module.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityViolation {
    /// Whether a reference or a namespace rule fired.
    pub kind: RestrictionKind,
    /// Mode of the rule that fired.
    pub mode: RestrictionMode,
    /// The rule: the forbidden name (exclusive) or the allow-list (inclusive).
    pub rule: String,
    /// The reference or namespace found in the module.
    pub offending: String,
    /// Human-readable description.
    pub description: String,
}

impl fmt::Display for SecurityViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description)
    }
}

/// Outcome of auditing one module.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityReport {
    /// Name of the audited module (empty when the bytes could not be read).
    pub module_name: String,
    /// Whether an audit actually ran (false when the policy is disabled).
    pub audited: bool,
    /// Violations in discovery order: references first, then namespaces.
    pub violations: Vec<SecurityViolation>,
    /// Set when the module bytes could not be inspected at all.
    #[serde(default)]
    pub error: Option<String>,
}

impl SecurityReport {
    /// Whether the module may be loaded.
    pub fn passed(&self) -> bool {
        self.violations.is_empty() && self.error.is_none()
    }

    /// Number of violations.
    pub fn violation_count(&self) -> usize {
        self.violations.len()
    }

    /// Whether any violation names the given reference or namespace.
    pub fn mentions(&self, name: &str) -> bool {
        self.violations.iter().any(|v| v.offending == name)
    }
}
