#![deny(unsafe_code)]
//! # quill-compiler
//!
//! Compiler backend adapter for the Quill script pipeline.
//!
//! [`ScriptCompiler`] runs a [`CompilerBackend`] over a
//! [`CompileRequest`](quill_types::CompileRequest) and always returns a
//! [`CompileResult`](quill_types::CompileResult). Two backends ship with the
//! crate: [`QuillBackend`] compiles in process through `quill-lang`, and
//! [`ProcessBackend`] drives an external compiler program.

pub mod backend;
pub mod compiler;
pub mod error;
pub mod process;

pub use backend::{text_unit_name, BackendInvocation, CompilerBackend, QuillBackend};
pub use compiler::{apply_warning_options, ScriptCompiler};
pub use error::{BackendError, BackendResult};
pub use process::{parse_diagnostic_line, ProcessBackend};
