#![deny(unsafe_code)]
//! # quill-audit
//!
//! Static security auditing of compiled Quill modules.
//!
//! [`SecurityAuditor`] reads a module's metadata (referenced modules and the
//! namespaces of foreign types it names) and checks it against a
//! [`SecurityPolicy`](quill_types::SecurityPolicy) before anything is loaded.
//! A successful [`SecurityAuditor::certify`] yields an [`AuditedModule`], the
//! only input the domain's loader accepts.

pub mod auditor;
pub mod error;
pub mod metadata;

pub use auditor::{AuditedModule, SecurityAuditor};
pub use error::{AuditError, AuditFailure, AuditResult};
pub use metadata::MetadataSummary;
