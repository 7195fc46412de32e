#![deny(unsafe_code)]
//! # quill-lang
//!
//! The Quill script language: an S-expression class language, its module
//! image format and the runtime that executes loaded images.
//!
//! - [`compile_units`] turns a batch of source units into a [`ModuleImage`]
//!   plus a [`SymbolTable`] and diagnostics
//! - [`ModuleImage::encode`] / [`ModuleImage::decode`] define the binary form
//! - [`Runtime`] registers images; [`Interpreter`] runs their code over
//!   [`Instance`] handles; routine methods come back as a resumable
//!   [`Routine`]

pub mod compile;
mod diagnostics;
pub mod error;
pub mod image;
pub mod interp;
mod lower;
pub mod runtime;
pub mod syntax;
pub mod value;

pub use compile::{compile_units, FrontEndOutput, SourceUnit};
pub use error::{ImageError, ImageResult, RuntimeError, RuntimeResult};
pub use image::{
    AttributeImage, FieldImage, MethodImage, MethodKind, ModuleImage, ParamImage, PropertyImage,
    SourceLocation, SymbolTable, TypeImage, TypeRef, Visibility, ENGINE_COMPONENT,
    ENGINE_MANAGED_OBJECT, MODULE_MAGIC, SYMBOLS_MAGIC,
};
pub use interp::{Interpreter, Invocation, Routine, RoutineStep, MAX_EVAL_DEPTH};
pub use runtime::Runtime;
pub use syntax::{parse_forms, SExpr, Span, SyntaxError};
pub use value::{Instance, ObjectState, Value};
