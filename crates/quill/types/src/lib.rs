#![deny(unsafe_code)]
//! # quill-types
//!
//! Shared data model for the Quill script pipeline.
//!
//! Every other Quill crate speaks in these types:
//! - [`CompileRequest`] / [`CompileResult`] / [`CompileDiagnostic`] for the
//!   compiler backend adapter
//! - [`SecurityPolicy`] / [`SecurityViolation`] / [`SecurityReport`] for the
//!   security auditor
//! - [`ScriptSettings`]: the explicit configuration value handed to every
//!   component at construction time (there is no global settings object)

pub mod diagnostic;
pub mod error;
pub mod policy;
pub mod request;
pub mod settings;

pub use diagnostic::{CompileDiagnostic, CompileResult};
pub use error::{ConfigError, ConfigResult};
pub use policy::{
    Restriction, RestrictionKind, RestrictionMode, SecurityPolicy, SecurityReport,
    SecurityViolation,
};
pub use request::{CompileOptions, CompileRequest, OutputKind, SourceSet};
pub use settings::{DiscoveryOptions, ScriptSettings};
