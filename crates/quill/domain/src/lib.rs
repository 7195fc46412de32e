#![deny(unsafe_code)]
//! # quill-domain
//!
//! The loader of the Quill script pipeline.
//!
//! A [`ScriptDomain`] owns every module loaded at run time and masks them
//! from the host's native types. All loading funnels through
//! [`ScriptDomain::commit`], which takes an
//! [`AuditedModule`](quill_audit::AuditedModule), so nothing reaches the
//! runtime without passing the security auditor (unless auditing is turned
//! off in the settings).
//!
//! The compile and audit stages live in a [`CompilePipeline`] that can run on
//! any thread; the domain itself stays on the host thread.

pub mod domain;
pub mod error;
pub mod pipeline;

pub use domain::{ScriptDomain, MODULE_EXTENSION, SYMBOLS_EXTENSION};
pub use error::{DomainError, DomainResult, LoadError};
pub use pipeline::{CompilePipeline, PipelineOutput};
