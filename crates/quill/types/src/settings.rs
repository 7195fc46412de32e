//! Script pipeline settings.
//!
//! `ScriptSettings` is constructed once by the host and passed by reference
//! into every component's constructor. It can be built in code or loaded from
//! a TOML file:
//!
//! ```toml
//! case_sensitive_names = true
//! enable_security_checks = true
//! working_directory = "/var/tmp/quill"
//! references = ["engine-core"]
//!
//! [[namespace_restrictions]]
//! name = "Host.FileSystem"
//! mode = "exclusive"
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ConfigError, ConfigResult};
use crate::policy::{Restriction, SecurityPolicy};
use crate::request::CompileOptions;

/// Name-matching and visibility toggles used by type and member discovery.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryOptions {
    pub case_sensitive_names: bool,
    pub non_public_types: bool,
    pub non_public_members: bool,
}

impl DiscoveryOptions {
    /// Compare two names honoring the case-sensitivity toggle.
    pub fn names_match(&self, a: &str, b: &str) -> bool {
        if self.case_sensitive_names {
            a == b
        } else {
            a.eq_ignore_ascii_case(b)
        }
    }

    /// Normalise a name into a cache key honoring the case-sensitivity toggle.
    pub fn cache_key(&self, name: &str) -> String {
        if self.case_sensitive_names {
            name.to_string()
        } else {
            name.to_ascii_lowercase()
        }
    }
}

impl Default for DiscoveryOptions {
    fn default() -> Self {
        Self {
            case_sensitive_names: true,
            non_public_types: false,
            non_public_members: true,
        }
    }
}

/// Settings for the whole script pipeline.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScriptSettings {
    /// Match type and member names case-sensitively.
    pub case_sensitive_names: bool,
    /// Allow discovery of non-public types.
    pub discover_non_public_types: bool,
    /// Allow discovery of non-public members.
    pub discover_non_public_members: bool,
    /// Audit modules before loading them.
    pub enable_security_checks: bool,
    /// Ask the compiler for debug symbols.
    pub generate_debug_symbols: bool,
    /// Highest warning level reported by the compiler.
    pub warning_level: u8,
    /// Promote compiler warnings to errors.
    pub warnings_as_errors: bool,
    /// Prefix of generated artifact names.
    pub artifact_prefix: String,
    /// Reference modules made available to every compile request.
    pub references: Vec<String>,
    /// Restrictions on referenced modules.
    pub reference_restrictions: Vec<Restriction>,
    /// Restrictions on namespaces used in module metadata.
    pub namespace_restrictions: Vec<Restriction>,
    working_directory: PathBuf,
}

impl Default for ScriptSettings {
    fn default() -> Self {
        let policy = SecurityPolicy::default();
        Self {
            case_sensitive_names: true,
            discover_non_public_types: false,
            discover_non_public_members: true,
            enable_security_checks: true,
            generate_debug_symbols: false,
            warning_level: 4,
            warnings_as_errors: false,
            artifact_prefix: "QuillModule".into(),
            references: Vec::new(),
            reference_restrictions: policy.reference_restrictions,
            namespace_restrictions: policy.namespace_restrictions,
            working_directory: std::env::temp_dir(),
        }
    }
}

impl ScriptSettings {
    /// Default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load settings from a TOML file. A missing file yields the defaults.
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            debug!(path = %path.display(), "settings file not found, using defaults");
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }

    /// Parse and validate settings from TOML text.
    pub fn from_toml_str(contents: &str) -> ConfigResult<Self> {
        let settings: Self =
            toml::from_str(contents).map_err(|e| ConfigError::Parse(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Check every invariant a loaded settings file must satisfy.
    pub fn validate(&self) -> ConfigResult<()> {
        check_directory(&self.working_directory)?;
        if self.reference_restrictions.iter().any(|r| r.name.trim().is_empty()) {
            return Err(ConfigError::EmptyRestriction("reference"));
        }
        if self.namespace_restrictions.iter().any(|r| r.name.trim().is_empty()) {
            return Err(ConfigError::EmptyRestriction("namespace"));
        }
        Ok(())
    }

    /// Directory compiler artifacts and named references live in.
    pub fn working_directory(&self) -> &Path {
        &self.working_directory
    }

    /// Change the working directory. The directory must already exist.
    pub fn set_working_directory(&mut self, dir: impl Into<PathBuf>) -> ConfigResult<()> {
        let dir = dir.into();
        check_directory(&dir)?;
        self.working_directory = dir;
        Ok(())
    }

    /// Builder form of [`set_working_directory`](Self::set_working_directory).
    pub fn with_working_directory(mut self, dir: impl Into<PathBuf>) -> ConfigResult<Self> {
        self.set_working_directory(dir)?;
        Ok(self)
    }

    pub fn with_security_checks(mut self, enabled: bool) -> Self {
        self.enable_security_checks = enabled;
        self
    }

    pub fn with_debug_symbols(mut self, enabled: bool) -> Self {
        self.generate_debug_symbols = enabled;
        self
    }

    pub fn with_case_sensitive_names(mut self, enabled: bool) -> Self {
        self.case_sensitive_names = enabled;
        self
    }

    pub fn with_non_public_types(mut self, enabled: bool) -> Self {
        self.discover_non_public_types = enabled;
        self
    }

    pub fn with_non_public_members(mut self, enabled: bool) -> Self {
        self.discover_non_public_members = enabled;
        self
    }

    pub fn with_reference(mut self, name: impl Into<String>) -> Self {
        self.references.push(name.into());
        self
    }

    pub fn with_reference_restriction(mut self, restriction: Restriction) -> Self {
        self.reference_restrictions.push(restriction);
        self
    }

    pub fn with_namespace_restriction(mut self, restriction: Restriction) -> Self {
        self.namespace_restrictions.push(restriction);
        self
    }

    /// Drop every restriction (auditing stays enabled).
    pub fn without_restrictions(mut self) -> Self {
        self.reference_restrictions.clear();
        self.namespace_restrictions.clear();
        self
    }

    /// The security policy these settings describe.
    pub fn security_policy(&self) -> SecurityPolicy {
        SecurityPolicy {
            enabled: self.enable_security_checks,
            reference_restrictions: self.reference_restrictions.clone(),
            namespace_restrictions: self.namespace_restrictions.clone(),
        }
    }

    /// Default compile options derived from these settings.
    pub fn compile_options(&self) -> CompileOptions {
        CompileOptions {
            debug_symbols: self.generate_debug_symbols,
            warnings_as_errors: self.warnings_as_errors,
            warning_level: self.warning_level,
            ..CompileOptions::default()
        }
    }

    /// Discovery toggles for the reflection layer.
    pub fn discovery(&self) -> DiscoveryOptions {
        DiscoveryOptions {
            case_sensitive_names: self.case_sensitive_names,
            non_public_types: self.discover_non_public_types,
            non_public_members: self.discover_non_public_members,
        }
    }
}

fn check_directory(dir: &Path) -> ConfigResult<()> {
    if !dir.exists() {
        return Err(ConfigError::MissingWorkingDirectory(dir.to_path_buf()));
    }
    if !dir.is_dir() {
        return Err(ConfigError::NotADirectory(dir.to_path_buf()));
    }
    Ok(())
}
