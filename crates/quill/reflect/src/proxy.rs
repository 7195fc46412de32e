//! Uniform access to live script instances.

use std::cell::Cell;
use std::fmt;

use quill_lang::{Instance, Invocation, Routine, RuntimeError, Value};
use tracing::{debug, warn};

use crate::error::{ProxyError, ProxyResult};
use crate::host::RoutineHandle;
use crate::script_type::{Capability, ScriptType};

/// How an instance was brought to life.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Initialization {
    /// Field initializers and a constructor (explicit or implicit) ran.
    Constructed,
    /// Memory only: every field holds its zero value.
    Uninitialized,
}

/// Result of [`ScriptProxy::call`].
#[derive(Debug)]
pub enum CallOutcome {
    /// A function ran to completion.
    Value(Value),
    /// A routine was started and handed back to the caller to drive.
    Deferred(Routine),
    /// A routine of a component was handed to the host's scheduler.
    Scheduled(RoutineHandle),
}

impl CallOutcome {
    pub fn value(&self) -> Option<&Value> {
        match self {
            Self::Value(v) => Some(v),
            _ => None,
        }
    }

    pub fn into_value(self) -> Option<Value> {
        match self {
            Self::Value(v) => Some(v),
            _ => None,
        }
    }

    pub fn into_routine(self) -> Option<Routine> {
        match self {
            Self::Deferred(r) => Some(r),
            _ => None,
        }
    }

    pub fn handle(&self) -> Option<RoutineHandle> {
        match self {
            Self::Scheduled(h) => Some(*h),
            _ => None,
        }
    }
}

/// Wraps exactly one live script instance.
///
/// Every member is resolved through the instance's [`ScriptType`], so names
/// follow the discovery settings of the assembly it came from. Once
/// [`dispose`](ScriptProxy::dispose)d, a proxy refuses every operation.
pub struct ScriptProxy {
    script_type: ScriptType,
    instance: Instance,
    initialization: Initialization,
    disposed: Cell<bool>,
}

impl ScriptProxy {
    pub(crate) fn new(
        script_type: ScriptType,
        instance: Instance,
        initialization: Initialization,
    ) -> Self {
        Self {
            script_type,
            instance,
            initialization,
            disposed: Cell::new(false),
        }
    }

    pub fn script_type(&self) -> &ScriptType {
        &self.script_type
    }

    /// The wrapped instance.
    pub fn instance(&self) -> &Instance {
        &self.instance
    }

    pub fn initialization(&self) -> Initialization {
        self.initialization
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.get()
    }

    fn ensure_usable(&self) -> ProxyResult<()> {
        if self.disposed.get() {
            return Err(ProxyError::AlreadyDisposed(
                self.script_type.full_name().to_string(),
            ));
        }
        Ok(())
    }

    fn fault(&self, error: RuntimeError, declaring_type: &str, member: &str) -> ProxyError {
        ProxyError::runtime(error, self.script_type.locate(declaring_type, member))
    }

    pub fn field(&self, name: &str) -> ProxyResult<Value> {
        self.ensure_usable()?;
        let info = self.script_type.field(name)?;
        self.script_type
            .interpreter()
            .get_field(&self.instance, &info.name)
            .map_err(|e| self.fault(e, &info.declaring_type, &info.name))
    }

    pub fn set_field(&self, name: &str, value: impl Into<Value>) -> ProxyResult<()> {
        self.ensure_usable()?;
        let info = self.script_type.field(name)?;
        self.script_type
            .interpreter()
            .set_field(&self.instance, &info.name, value.into())
            .map_err(|e| self.fault(e, &info.declaring_type, &info.name))
    }

    pub fn property(&self, name: &str) -> ProxyResult<Value> {
        self.ensure_usable()?;
        let info = self.script_type.property(name)?;
        if !info.readable {
            return Err(ProxyError::PropertyAccess {
                type_name: self.script_type.full_name().to_string(),
                name: info.name,
                write: false,
            });
        }
        self.script_type
            .interpreter()
            .get_property(&self.instance, &info.name)
            .map_err(|e| self.fault(e, &info.declaring_type, &info.name))
    }

    pub fn set_property(&self, name: &str, value: impl Into<Value>) -> ProxyResult<()> {
        self.ensure_usable()?;
        let info = self.script_type.property(name)?;
        if !info.writable {
            return Err(ProxyError::PropertyAccess {
                type_name: self.script_type.full_name().to_string(),
                name: info.name,
                write: true,
            });
        }
        self.script_type
            .interpreter()
            .set_property(&self.instance, &info.name, value.into())
            .map_err(|e| self.fault(e, &info.declaring_type, &info.name))
    }

    /// Invoke a method by name.
    ///
    /// Routines of components go to the host's scheduler; routines of any
    /// other object come back to the caller as [`CallOutcome::Deferred`].
    pub fn call(&self, name: &str, args: Vec<Value>) -> ProxyResult<CallOutcome> {
        self.ensure_usable()?;
        let info = self.script_type.method(name)?;
        let invocation = self
            .script_type
            .interpreter()
            .invoke(&self.instance, &info.name, args)
            .map_err(|e| self.fault(e, &info.declaring_type, &info.name))?;
        match invocation {
            Invocation::Immediate(value) => Ok(CallOutcome::Value(value)),
            Invocation::Deferred(routine) => {
                if self.script_type.capability() == Capability::EngineComponent {
                    let handle = self.script_type.host().start_routine(routine)?;
                    debug!(
                        type_name = %self.script_type.full_name(),
                        routine = %info.name,
                        %handle,
                        "routine scheduled on host"
                    );
                    Ok(CallOutcome::Scheduled(handle))
                } else {
                    Ok(CallOutcome::Deferred(routine))
                }
            }
        }
    }

    /// [`call`](ScriptProxy::call) with every fault swallowed.
    pub fn safe_call(&self, name: &str, args: Vec<Value>) -> Option<CallOutcome> {
        match self.call(name, args) {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                debug!(
                    type_name = %self.script_type.full_name(),
                    method = name,
                    error = %e,
                    "safe call failed"
                );
                None
            }
        }
    }

    /// Release the instance. Engine-backed objects are destroyed by the host.
    pub fn dispose(&self) -> ProxyResult<()> {
        if self.disposed.replace(true) {
            warn!(type_name = %self.script_type.full_name(), "proxy disposed twice");
            return Err(ProxyError::AlreadyDisposed(
                self.script_type.full_name().to_string(),
            ));
        }
        match self.script_type.capability() {
            Capability::EngineComponent | Capability::EngineManagedObject => {
                self.script_type.host().destroy(&self.instance)
            }
            Capability::PlainObject => self.instance.destroy(),
        }
        debug!(type_name = %self.script_type.full_name(), "proxy disposed");
        Ok(())
    }
}

impl fmt::Debug for ScriptProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptProxy")
            .field("type", &self.script_type.full_name())
            .field("initialization", &self.initialization)
            .field("disposed", &self.disposed.get())
            .finish()
    }
}
