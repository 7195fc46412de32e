use std::fmt;

use quill_lang::{RuntimeError, SourceLocation};

/// Kinds of named members a lookup can miss.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MemberKind {
    Field,
    Property,
    Method,
}

impl fmt::Display for MemberKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Field => write!(f, "field"),
            Self::Property => write!(f, "property"),
            Self::Method => write!(f, "method"),
        }
    }
}

/// Errors raised by an engine host or component container.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum HostError {
    /// Running the object's initialization failed.
    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    /// The host refused the request.
    #[error("host rejected the request: {0}")]
    Rejected(String),
}

/// Result type for host operations.
pub type HostResult<T> = Result<T, HostError>;

/// Misuse of an assembly, type or proxy, and faults raised by script code.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProxyError {
    #[error("type `{type_name}` has no {kind} `{name}`")]
    MemberNotFound {
        type_name: String,
        kind: MemberKind,
        name: String,
    },

    #[error("property `{name}` of `{type_name}` cannot be {}", access(.write))]
    PropertyAccess {
        type_name: String,
        name: String,
        write: bool,
    },

    #[error("`{0}` is an engine component and can only be created inside a container")]
    ContainerRequired(String),

    #[error("engine type `{0}` cannot be created with constructor arguments")]
    ArgumentsNotSupported(String),

    #[error("type `{type_name}` has no constructor accepting {arity} argument(s)")]
    NoMatchingConstructor { type_name: String, arity: usize },

    #[error("proxy for `{0}` has already been disposed")]
    AlreadyDisposed(String),

    #[error("module `{0}` has been unloaded")]
    ModuleUnloaded(String),

    /// A fault raised while running script code, located when symbols were
    /// loaded.
    #[error("{error}{}", located(.location))]
    Runtime {
        error: RuntimeError,
        location: Option<SourceLocation>,
    },

    #[error(transparent)]
    Host(#[from] HostError),
}

impl ProxyError {
    pub(crate) fn runtime(error: RuntimeError, location: Option<SourceLocation>) -> Self {
        Self::Runtime { error, location }
    }

    /// The script fault behind this error, if any.
    pub fn runtime_error(&self) -> Option<&RuntimeError> {
        match self {
            Self::Runtime { error, .. } | Self::Host(HostError::Runtime(error)) => Some(error),
            _ => None,
        }
    }

    pub fn location(&self) -> Option<&SourceLocation> {
        match self {
            Self::Runtime { location, .. } => location.as_ref(),
            _ => None,
        }
    }
}

fn access(write: &bool) -> &'static str {
    if *write {
        "written"
    } else {
        "read"
    }
}

fn located(location: &Option<SourceLocation>) -> String {
    location
        .as_ref()
        .map(|l| format!(" (at {l})"))
        .unwrap_or_default()
}

/// Result type for reflection operations.
pub type ProxyResult<T> = Result<T, ProxyError>;
