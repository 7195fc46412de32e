//! Contracts between the reflection layer and the host engine.
//!
//! Engine-backed script objects are never built by the reflection layer
//! directly. Components are created by the [`ComponentContainer`] they are
//! attached to; managed objects, destruction and routine scheduling go
//! through the [`EngineHost`]. Both receive a [`Blueprint`] that knows how
//! to build the object.
//!
//! [`Headless`] and [`Node`] implement the contracts for hosts without a
//! real engine and for tests: `Headless` keeps started routines and advances
//! every one of them by a step on each [`Headless::tick`].

use std::cell::{Cell, RefCell};
use std::fmt;
use std::sync::Arc;

use quill_lang::{Instance, Interpreter, ModuleImage, Routine, RoutineStep, RuntimeError};
use tracing::{debug, trace, warn};

use crate::error::HostResult;

/// Everything needed to build one engine-side object.
pub struct Blueprint<'a> {
    module: &'a Arc<ModuleImage>,
    type_index: usize,
    interpreter: &'a Interpreter,
}

impl<'a> Blueprint<'a> {
    pub(crate) fn new(
        module: &'a Arc<ModuleImage>,
        type_index: usize,
        interpreter: &'a Interpreter,
    ) -> Self {
        Self {
            module,
            type_index,
            interpreter,
        }
    }

    pub fn type_name(&self) -> String {
        self.module.types[self.type_index].full_name()
    }

    /// Build the object the way an engine does: field initializers and the
    /// parameterless constructor run when the type has one, otherwise the
    /// object is left with initialized fields only.
    pub fn build(&self) -> HostResult<Instance> {
        match self
            .interpreter
            .construct(self.module, self.type_index, Vec::new())
        {
            Ok(instance) => Ok(instance),
            Err(RuntimeError::NoMatchingConstructor { .. }) => {
                let instance = Instance::allocate(Arc::clone(self.module), self.type_index);
                self.interpreter.initialize_fields(&instance)?;
                Ok(instance)
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Handle of a routine started on the host.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RoutineHandle(pub u64);

impl fmt::Display for RoutineHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "routine#{}", self.0)
    }
}

/// Something engine components can be attached to.
pub trait ComponentContainer {
    fn name(&self) -> &str;

    /// Create the component described by `blueprint` and attach it.
    fn attach(&self, blueprint: &Blueprint<'_>) -> HostResult<Instance>;
}

/// Engine services used for managed objects and component lifecycles.
pub trait EngineHost {
    /// Create a managed (non-component) engine object.
    fn instantiate(&self, blueprint: &Blueprint<'_>) -> HostResult<Instance>;

    /// Destroy an engine-backed object.
    fn destroy(&self, instance: &Instance);

    /// Hand a routine to the host's cooperative scheduler.
    fn start_routine(&self, routine: Routine) -> HostResult<RoutineHandle>;
}

/// What one [`Headless::tick`] did.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TickReport {
    pub frame: u64,
    /// Routines that yielded and stay scheduled.
    pub resumed: usize,
    pub completed: usize,
    pub faulted: usize,
}

/// A host without an engine: managed objects live in a list and routines
/// advance once per [`tick`](Headless::tick).
#[derive(Default)]
pub struct Headless {
    objects: RefCell<Vec<Instance>>,
    routines: RefCell<Vec<(RoutineHandle, Routine)>>,
    next_handle: Cell<u64>,
    frame: Cell<u64>,
}

impl Headless {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance every scheduled routine by one step.
    pub fn tick(&self) -> TickReport {
        let frame = self.frame.get() + 1;
        self.frame.set(frame);
        let mut report = TickReport {
            frame,
            ..TickReport::default()
        };

        let scheduled = std::mem::take(&mut *self.routines.borrow_mut());
        let mut still_running = Vec::with_capacity(scheduled.len());
        for (handle, mut routine) in scheduled {
            match routine.resume() {
                Ok(RoutineStep::Yielded) => {
                    report.resumed += 1;
                    still_running.push((handle, routine));
                }
                Ok(RoutineStep::Completed(_)) => {
                    trace!(%handle, routine = routine.name(), "routine completed");
                    report.completed += 1;
                }
                Err(RuntimeError::Destroyed(type_name)) => {
                    debug!(%handle, %type_name, "routine target destroyed, routine dropped");
                    report.completed += 1;
                }
                Err(e) => {
                    warn!(%handle, routine = routine.name(), error = %e, "routine faulted");
                    report.faulted += 1;
                }
            }
        }
        // Routines started during this tick were pushed onto the emptied list.
        let mut routines = self.routines.borrow_mut();
        still_running.append(&mut routines);
        *routines = still_running;
        report
    }

    /// Tick until no routine is scheduled or `max_frames` ticks ran.
    pub fn run_until_idle(&self, max_frames: u64) -> u64 {
        let mut ticks = 0;
        while ticks < max_frames && self.running_routines() > 0 {
            self.tick();
            ticks += 1;
        }
        ticks
    }

    pub fn frame(&self) -> u64 {
        self.frame.get()
    }

    pub fn running_routines(&self) -> usize {
        self.routines.borrow().len()
    }

    pub fn live_objects(&self) -> usize {
        self.objects.borrow().len()
    }
}

impl fmt::Debug for Headless {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Headless")
            .field("frame", &self.frame.get())
            .field("objects", &self.live_objects())
            .field("routines", &self.running_routines())
            .finish()
    }
}

impl EngineHost for Headless {
    fn instantiate(&self, blueprint: &Blueprint<'_>) -> HostResult<Instance> {
        let instance = blueprint.build()?;
        self.objects.borrow_mut().push(instance.clone());
        debug!(type_name = %blueprint.type_name(), "managed object created");
        Ok(instance)
    }

    fn destroy(&self, instance: &Instance) {
        instance.destroy();
        self.objects.borrow_mut().retain(|o| !o.ptr_eq(instance));
    }

    fn start_routine(&self, routine: Routine) -> HostResult<RoutineHandle> {
        let handle = RoutineHandle(self.next_handle.get());
        self.next_handle.set(handle.0 + 1);
        debug!(%handle, routine = routine.name(), "routine scheduled");
        self.routines.borrow_mut().push((handle, routine));
        Ok(handle)
    }
}

/// A named container holding attached components.
#[derive(Debug)]
pub struct Node {
    name: String,
    components: RefCell<Vec<Instance>>,
}

impl Node {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            components: RefCell::new(Vec::new()),
        }
    }

    /// Live components, in attach order.
    pub fn components(&self) -> Vec<Instance> {
        self.components
            .borrow()
            .iter()
            .filter(|c| !c.is_destroyed())
            .cloned()
            .collect()
    }

    pub fn component_count(&self) -> usize {
        self.components().len()
    }

    /// First live component of the given type.
    pub fn find(&self, type_name: &str) -> Option<Instance> {
        self.components()
            .into_iter()
            .find(|c| c.type_name() == type_name)
    }
}

impl ComponentContainer for Node {
    fn name(&self) -> &str {
        &self.name
    }

    fn attach(&self, blueprint: &Blueprint<'_>) -> HostResult<Instance> {
        let instance = blueprint.build()?;
        let mut components = self.components.borrow_mut();
        components.retain(|c| !c.is_destroyed());
        components.push(instance.clone());
        debug!(node = %self.name, type_name = %blueprint.type_name(), "component attached");
        Ok(instance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quill_lang::{compile_units, Invocation, SourceUnit, Value};
    use quill_types::OutputKind;

    const BLINKER: &str = r#"
(type Blinker (extends Engine.Component)
  (field on Bool false)
  (field count Int 0)
  (routine blink ((times Int))
    (set count times)
    (yield)
    (set on true)
    (yield)
    (set on false)))
"#;

    fn image() -> Arc<ModuleImage> {
        let out = compile_units(
            "QuillModule1",
            &[SourceUnit::new("b.ql", BLINKER)],
            &[],
            OutputKind::Library,
        );
        Arc::new(out.image.expect("image"))
    }

    fn started(host: &Headless, target: &Instance) -> RoutineHandle {
        let interpreter = Interpreter::new();
        let Invocation::Deferred(routine) = interpreter
            .invoke(target, "blink", vec![Value::Int(3)])
            .unwrap()
        else {
            panic!("blink is a routine");
        };
        host.start_routine(routine).unwrap()
    }

    #[test]
    fn node_attaches_built_components() {
        let module = image();
        let interpreter = Interpreter::new();
        let node = Node::new("player");
        let instance = node
            .attach(&Blueprint::new(&module, 0, &interpreter))
            .unwrap();
        assert_eq!(instance.field("on"), Some(Value::Bool(false)));
        assert_eq!(node.component_count(), 1);
        assert!(node.find("Blinker").is_some());

        instance.destroy();
        assert_eq!(node.component_count(), 0);
    }

    #[test]
    fn tick_advances_routines_one_segment_per_frame() {
        let module = image();
        let host = Headless::new();
        let target = host
            .instantiate(&Blueprint::new(&module, 0, &Interpreter::new()))
            .unwrap();
        assert_eq!(host.live_objects(), 1);

        let first = started(&host, &target);
        let second = started(&host, &target);
        assert_ne!(first, second);
        assert_eq!(host.running_routines(), 2);

        let report = host.tick();
        assert_eq!((report.frame, report.resumed), (1, 2));
        assert_eq!(target.field("count"), Some(Value::Int(3)));
        assert_eq!(target.field("on"), Some(Value::Bool(false)));

        host.tick();
        assert_eq!(target.field("on"), Some(Value::Bool(true)));

        let report = host.tick();
        assert_eq!(report.completed, 2);
        assert_eq!(host.running_routines(), 0);
        assert_eq!(target.field("on"), Some(Value::Bool(false)));
    }

    #[test]
    fn destroying_the_target_drops_its_routines() {
        let module = image();
        let host = Headless::new();
        let target = host
            .instantiate(&Blueprint::new(&module, 0, &Interpreter::new()))
            .unwrap();
        started(&host, &target);
        host.tick();
        host.destroy(&target);
        assert_eq!(host.live_objects(), 0);

        let report = host.tick();
        assert_eq!(report.faulted, 0);
        assert_eq!(host.running_routines(), 0);
    }

    #[test]
    fn run_until_idle_is_bounded() {
        let module = image();
        let host = Headless::new();
        let target = host
            .instantiate(&Blueprint::new(&module, 0, &Interpreter::new()))
            .unwrap();
        started(&host, &target);
        assert_eq!(host.run_until_idle(100), 3);
        assert_eq!(host.run_until_idle(100), 0);
        assert_eq!(host.frame(), 3);
    }
}
