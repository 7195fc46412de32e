#![deny(unsafe_code)]
//! # quill-reflect
//!
//! Reflection over loaded Quill modules.
//!
//! A [`ScriptAssembly`] wraps one [`LoadedModule`] and exposes its types as
//! [`ScriptType`] handles with cached member lookups. Instances are created
//! by capability (engine component, engine managed object, plain object)
//! and used through a [`ScriptProxy`]. Engine-side work goes through the
//! [`host`] contracts.
//!
//! Everything here is single-threaded (`Rc`/`RefCell`) and stays on the
//! host thread.

pub mod assembly;
pub mod error;
pub mod host;
pub mod module;
pub mod proxy;
pub mod script_type;

pub use assembly::ScriptAssembly;
pub use error::{HostError, HostResult, MemberKind, ProxyError, ProxyResult};
pub use host::{
    Blueprint, ComponentContainer, EngineHost, Headless, Node, RoutineHandle, TickReport,
};
pub use module::{ContentHash, LoadedModule, ModuleId};
pub use proxy::{CallOutcome, Initialization, ScriptProxy};
pub use script_type::{Capability, FieldInfo, MethodInfo, PropertyInfo, ScriptType};
