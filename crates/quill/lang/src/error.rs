//! Error types for the Quill language crate.
//!
//! Compile problems are never errors here: the front end reports them as
//! diagnostics. These types cover the two places that do fail: turning bytes
//! back into an image, and executing code.

use thiserror::Error;

/// Errors reading or validating a module image.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ImageError {
    /// The bytes do not start with the expected magic header.
    #[error("not a quill {0} image: bad magic header")]
    BadMagic(&'static str),

    /// The body could not be decoded.
    #[error("malformed image: {0}")]
    Malformed(String),

    /// Encoding failed.
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// The image decoded but is structurally inconsistent.
    #[error("invalid image: {0}")]
    Invalid(String),
}

/// Result type for image operations.
pub type ImageResult<T> = Result<T, ImageError>;

/// Faults raised while executing script code.
#[derive(Clone, Debug, PartialEq, Error)]
pub enum RuntimeError {
    #[error("type `{type_name}` has no method `{method}`")]
    UnknownMethod { type_name: String, method: String },

    #[error("type `{type_name}` has no field `{field}`")]
    UnknownField { type_name: String, field: String },

    #[error("type `{type_name}` has no property `{property}`")]
    UnknownProperty { type_name: String, property: String },

    #[error("property `{0}` has no getter")]
    PropertyNotReadable(String),

    #[error("property `{0}` has no setter")]
    PropertyNotWritable(String),

    #[error("`{method}` expects {expected} argument(s), got {found}")]
    ArityMismatch {
        method: String,
        expected: usize,
        found: usize,
    },

    #[error("type mismatch in {context}: expected {expected}, found {found}")]
    TypeMismatch {
        context: String,
        expected: String,
        found: String,
    },

    #[error("type `{type_name}` has no constructor accepting {arity} argument(s)")]
    NoMatchingConstructor { type_name: String, arity: usize },

    #[error("unknown local `{0}`")]
    UnknownLocal(String),

    #[error("division by zero")]
    DivisionByZero,

    #[error("integer overflow")]
    Overflow,

    #[error("evaluation depth limit of {0} exceeded")]
    CallDepthExceeded(usize),

    #[error("`{0}` is a routine and must be started, not called")]
    RoutineCalledDirectly(String),

    #[error("routine `{0}` already finished")]
    RoutineFinished(String),

    #[error("object of type `{0}` has been destroyed")]
    Destroyed(String),

    /// Raised by the script itself through `(fail ...)`.
    #[error("script failure: {0}")]
    Failed(String),
}

/// Result type for script execution.
pub type RuntimeResult<T> = Result<T, RuntimeError>;
