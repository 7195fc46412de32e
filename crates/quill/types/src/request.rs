//! Compile requests.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Ordered source units of one compile request.
///
/// A request carries either literal source texts or file paths, never a
/// mixture of both.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourceSet {
    /// Literal source texts, compiled in order.
    Texts(Vec<String>),
    /// Source files, read and compiled in order.
    Files(Vec<PathBuf>),
}

impl SourceSet {
    /// Number of source units.
    pub fn len(&self) -> usize {
        match self {
            Self::Texts(texts) => texts.len(),
            Self::Files(files) => files.len(),
        }
    }

    /// Whether the set has no source units.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for SourceSet {
    fn default() -> Self {
        Self::Texts(Vec::new())
    }
}

/// Kind of artifact the compiler is asked to produce.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputKind {
    /// A loadable library module. An empty source set yields an empty module
    /// and a warning.
    #[default]
    Library,
    /// An executable module: requires at least one source unit and an entry
    /// type.
    Executable,
}

/// Per-request compiler options.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompileOptions {
    /// Emit a symbol file alongside the module.
    pub debug_symbols: bool,
    /// Promote every reported warning to an error.
    pub warnings_as_errors: bool,
    /// Highest warning level that is reported (0 reports no warnings, 4 reports all).
    pub warning_level: u8,
    /// Artifact kind to produce.
    pub output_kind: OutputKind,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            debug_symbols: false,
            warnings_as_errors: false,
            warning_level: 4,
            output_kind: OutputKind::Library,
        }
    }
}

/// One compile invocation: sources, references and options.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompileRequest {
    /// Ordered source units.
    pub sources: SourceSet,
    /// Ordered names of reference modules the sources may `use`.
    pub references: Vec<String>,
    /// Compiler options.
    pub options: CompileOptions,
}

impl CompileRequest {
    /// Request compiling literal source texts.
    pub fn from_texts<I, S>(texts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            sources: SourceSet::Texts(texts.into_iter().map(Into::into).collect()),
            ..Self::default()
        }
    }

    /// Request compiling source files.
    pub fn from_files<I, P>(files: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        Self {
            sources: SourceSet::Files(files.into_iter().map(Into::into).collect()),
            ..Self::default()
        }
    }

    /// Add a reference module name (builder pattern).
    pub fn with_reference(mut self, name: impl Into<String>) -> Self {
        self.references.push(name.into());
        self
    }

    /// Add several reference module names, skipping ones already present.
    pub fn with_references<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for name in names {
            let name = name.into();
            if !self.references.contains(&name) {
                self.references.push(name);
            }
        }
        self
    }

    /// Replace the options (builder pattern).
    pub fn with_options(mut self, options: CompileOptions) -> Self {
        self.options = options;
        self
    }

    /// Set the output kind (builder pattern).
    pub fn with_output_kind(mut self, kind: OutputKind) -> Self {
        self.options.output_kind = kind;
        self
    }
}
