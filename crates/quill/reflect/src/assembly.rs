//! Script assemblies: the reflection view of one loaded module.

use std::fmt;
use std::rc::Rc;

use quill_lang::Interpreter;
use quill_types::DiscoveryOptions;
use tracing::debug;

use crate::host::EngineHost;
use crate::module::{LoadedModule, ModuleId};
use crate::script_type::{Binding, ScriptType};

struct AssemblyInner {
    module: Rc<LoadedModule>,
    types: Vec<ScriptType>,
    discovery: DiscoveryOptions,
}

/// Every type of one loaded module.
///
/// The type set is fixed at creation. Cloning the handle shares the types
/// and their member caches.
#[derive(Clone)]
pub struct ScriptAssembly {
    inner: Rc<AssemblyInner>,
}

impl ScriptAssembly {
    pub fn new(
        module: LoadedModule,
        host: Rc<dyn EngineHost>,
        interpreter: Interpreter,
        discovery: DiscoveryOptions,
    ) -> Self {
        let module = Rc::new(module);
        let binding = Rc::new(Binding {
            module: Rc::clone(&module),
            host,
            interpreter,
            discovery,
        });
        let types = (0..module.image().types.len())
            .map(|i| ScriptType::new(Rc::clone(&binding), i))
            .collect();
        Self {
            inner: Rc::new(AssemblyInner {
                module,
                types,
                discovery,
            }),
        }
    }

    pub fn module(&self) -> &Rc<LoadedModule> {
        &self.inner.module
    }

    pub fn id(&self) -> &ModuleId {
        self.inner.module.id()
    }

    pub fn name(&self) -> &str {
        self.inner.module.name()
    }

    pub fn discovery(&self) -> DiscoveryOptions {
        self.inner.discovery
    }

    pub fn is_loaded(&self) -> bool {
        !self.inner.module.is_unloaded()
    }

    fn discoverable(&self) -> impl Iterator<Item = &ScriptType> {
        let loaded = self.is_loaded();
        self.inner
            .types
            .iter()
            .filter(move |t| loaded && t.is_discoverable())
    }

    /// Discoverable types in declaration order; empty once unloaded.
    pub fn types(&self) -> Vec<ScriptType> {
        self.discoverable().cloned().collect()
    }

    /// Find a type by full or simple name.
    pub fn find_type(&self, name: &str) -> Option<ScriptType> {
        self.discoverable()
            .find(|t| t.full_name() == name)
            .or_else(|| self.discoverable().find(|t| t.is_named(name)))
            .cloned()
    }

    /// Types deriving from `ancestor`, which may be local or external.
    pub fn find_subtypes_of(&self, ancestor: &str) -> Vec<ScriptType> {
        self.discoverable()
            .filter(|t| t.is_subtype_of(ancestor))
            .cloned()
            .collect()
    }

    /// The type called `name` among the subtypes of `ancestor`.
    pub fn find_subtype_of(&self, ancestor: &str, name: &str) -> Option<ScriptType> {
        self.discoverable()
            .find(|t| t.is_named(name) && t.is_subtype_of(ancestor))
            .cloned()
    }

    /// The declared entry type, or else the first discoverable type.
    pub fn main_type(&self) -> Option<ScriptType> {
        if !self.is_loaded() {
            return None;
        }
        let image = self.inner.module.image();
        if let Some(entry) = image.entry.as_deref().and_then(|e| image.type_index(e)) {
            return self.inner.types.get(entry).cloned();
        }
        self.discoverable().next().cloned()
    }

    /// Select the main type explicitly by name.
    pub fn main_type_named(&self, name: &str) -> Option<ScriptType> {
        self.find_type(name)
    }

    /// Mark the module unloaded and drop every member cache built over it.
    ///
    /// Types and proxies obtained earlier fail with
    /// [`ProxyError::ModuleUnloaded`](crate::ProxyError::ModuleUnloaded)
    /// from now on.
    pub fn invalidate(&self) {
        self.inner.module.mark_unloaded();
        for ty in &self.inner.types {
            ty.invalidate();
        }
        debug!(module = %self.name(), id = %self.id(), "assembly invalidated");
    }

    /// Total member descriptors cached across all types.
    pub fn cached_member_count(&self) -> usize {
        self.inner.types.iter().map(ScriptType::cached_member_count).sum()
    }
}

impl PartialEq for ScriptAssembly {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for ScriptAssembly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptAssembly")
            .field("name", &self.name())
            .field("id", self.id())
            .field("types", &self.inner.types.len())
            .field("loaded", &self.is_loaded())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{MemberKind, ProxyError};
    use crate::host::{Headless, Node};
    use crate::proxy::{CallOutcome, Initialization};
    use crate::script_type::Capability;
    use quill_lang::{compile_units, RoutineStep, RuntimeError, SourceUnit, Value};
    use quill_types::OutputKind;
    use std::sync::Arc;

    const GAME: &str = r#"
(namespace Game
  (type Actor (extends Engine.Component)
    (field hp Int 10)
    (method hurt ((amount Int)) Int
      (set hp (- hp amount))
      hp))
  (type Player (extends Actor)
    (field name String "hero")
    (field secret Int 7 :private)
    (property Title String)
    (property Shout String (get (concat name "!")))
    (routine blink ()
      (set hp 1)
      (yield)
      (set hp 2)))
  (type Registry (extends Engine.ManagedObject)
    (field count Int 3))
  (type Counter
    (field value Int 5)
    (init () (set value 100))
    (init ((start Int)) (set value start))
    (method bump () Int (set value (+ value 1)) value)
    (method divide ((by Int)) Int (/ value by))
    (routine countdown ()
      (set value 2)
      (yield)
      (set value 1)))
  (type Vector
    (field x Float 1.5)
    (init ((x0 Float) (y0 Float)) (set x x0)))
  (type Hidden :private (field v Int)))
(entry Game.Player)
"#;

    fn assembly_with(discovery: DiscoveryOptions, host: Rc<Headless>) -> ScriptAssembly {
        let out = compile_units(
            "QuillModule5",
            &[SourceUnit::new("game.ql", GAME)],
            &[],
            OutputKind::Library,
        );
        let image = out
            .image
            .unwrap_or_else(|| panic!("{:?}", out.diagnostics));
        let bytes = image.encode().unwrap();
        let module = LoadedModule::new(Arc::new(image), bytes, Some(out.symbols), None, true);
        ScriptAssembly::new(module, host, Interpreter::new(), discovery)
    }

    fn assembly() -> ScriptAssembly {
        assembly_with(DiscoveryOptions::default(), Rc::new(Headless::new()))
    }

    #[test]
    fn types_honor_visibility_toggle() {
        let asm = assembly();
        let names: Vec<String> = asm.types().iter().map(|t| t.full_name().to_string()).collect();
        assert_eq!(
            names,
            vec!["Game.Actor", "Game.Player", "Game.Registry", "Game.Counter", "Game.Vector"]
        );
        assert!(asm.find_type("Game.Hidden").is_none());

        let open = assembly_with(
            DiscoveryOptions {
                non_public_types: true,
                ..DiscoveryOptions::default()
            },
            Rc::new(Headless::new()),
        );
        assert_eq!(open.types().len(), 6);
        assert!(open.find_type("Hidden").is_some());
    }

    #[test]
    fn find_by_simple_name_and_case_toggle() {
        let asm = assembly();
        assert_eq!(asm.find_type("Counter").unwrap().full_name(), "Game.Counter");
        assert!(asm.find_type("game.counter").is_none());

        let relaxed = assembly_with(
            DiscoveryOptions {
                case_sensitive_names: false,
                ..DiscoveryOptions::default()
            },
            Rc::new(Headless::new()),
        );
        assert_eq!(relaxed.find_type("game.counter").unwrap().full_name(), "Game.Counter");
    }

    #[test]
    fn subtypes_and_main_type() {
        let asm = assembly();
        let components: Vec<String> = asm
            .find_subtypes_of("Engine.Component")
            .iter()
            .map(|t| t.full_name().to_string())
            .collect();
        assert_eq!(components, vec!["Game.Actor", "Game.Player"]);
        assert_eq!(asm.find_subtypes_of("Game.Actor").len(), 1);
        assert!(asm.find_subtype_of("Game.Actor", "Player").is_some());
        assert!(asm.find_subtype_of("Game.Actor", "Counter").is_none());

        let main = asm.main_type().unwrap();
        assert_eq!(main.full_name(), "Game.Player");
        assert_eq!(asm.main_type_named("Counter").unwrap().full_name(), "Game.Counter");
    }

    #[test]
    fn capabilities_are_classified() {
        let asm = assembly();
        let cap = |n: &str| asm.find_type(n).unwrap().capability();
        assert_eq!(cap("Player"), Capability::EngineComponent);
        assert_eq!(cap("Registry"), Capability::EngineManagedObject);
        assert_eq!(cap("Counter"), Capability::PlainObject);
    }

    #[test]
    fn member_hits_are_cached_and_misses_are_not() {
        let asm = assembly();
        let player = asm.find_type("Player").unwrap();
        assert_eq!(player.cached_member_count(), 0);

        let hp = player.field("hp").unwrap();
        assert_eq!(hp.declaring_type, "Game.Actor");
        assert_eq!(player.cached_member_count(), 1);
        player.field("hp").unwrap();
        assert_eq!(player.cached_member_count(), 1);

        let miss = player.method("fly").unwrap_err();
        assert!(matches!(
            miss,
            ProxyError::MemberNotFound {
                kind: MemberKind::Method,
                ..
            }
        ));
        assert_eq!(player.cached_member_count(), 1);

        assert!(player.method("hurt").unwrap().declaring_type == "Game.Actor");
        assert!(player.method("blink").unwrap().is_routine());
        assert!(!player.property("Shout").unwrap().writable);
        assert_eq!(asm.cached_member_count(), 4);
    }

    #[test]
    fn synthetic_and_private_members() {
        let asm = assembly();
        let player = asm.find_type("Player").unwrap();
        assert!(player.field("__prop_Title").is_err());
        assert!(player.field("secret").is_ok());
        let names: Vec<String> = player.fields().into_iter().map(|f| f.name).collect();
        assert_eq!(names, vec!["name", "secret", "hp"]);

        let strict = assembly_with(
            DiscoveryOptions {
                non_public_members: false,
                ..DiscoveryOptions::default()
            },
            Rc::new(Headless::new()),
        );
        assert!(strict.find_type("Player").unwrap().field("secret").is_err());
    }

    #[test]
    fn plain_objects_pick_constructor_by_arity() {
        let asm = assembly();
        let counter = asm.find_type("Counter").unwrap();

        let a = counter.create_instance(None, vec![]).unwrap();
        assert_eq!(a.initialization(), Initialization::Constructed);
        assert_eq!(a.field("value").unwrap(), Value::Int(100));

        let b = counter.create_instance(None, vec![Value::Int(9)]).unwrap();
        assert_eq!(b.field("value").unwrap(), Value::Int(9));

        let err = counter
            .create_instance(None, vec![Value::from("x")])
            .unwrap_err();
        assert!(matches!(err, ProxyError::NoMatchingConstructor { arity: 1, .. }));
    }

    #[test]
    fn no_matching_constructor_without_args_allocates_uninitialized() {
        let asm = assembly();
        let vector = asm.find_type("Vector").unwrap();
        let proxy = vector.create_instance(None, vec![]).unwrap();
        assert_eq!(proxy.initialization(), Initialization::Uninitialized);
        assert_eq!(proxy.field("x").unwrap(), Value::Float(0.0));
    }

    #[test]
    fn components_need_a_container() {
        let asm = assembly();
        let player = asm.find_type("Player").unwrap();
        assert!(matches!(
            player.create_instance(None, vec![]),
            Err(ProxyError::ContainerRequired(_))
        ));

        let node = Node::new("hero");
        let proxy = player.create_instance(Some(&node), vec![]).unwrap();
        assert_eq!(node.component_count(), 1);
        assert_eq!(proxy.field("hp").unwrap(), Value::Int(10));
        assert_eq!(proxy.field("Name").ok(), None);

        assert!(matches!(
            player.create_instance(Some(&node), vec![Value::Int(1)]),
            Err(ProxyError::ArgumentsNotSupported(_))
        ));

        proxy.dispose().unwrap();
        assert_eq!(node.component_count(), 0);
    }

    #[test]
    fn managed_objects_come_from_the_host() {
        let host = Rc::new(Headless::new());
        let asm = assembly_with(DiscoveryOptions::default(), Rc::clone(&host));
        let registry = asm.find_type("Registry").unwrap();
        let proxy = registry.create_instance(None, vec![]).unwrap();
        assert_eq!(host.live_objects(), 1);
        assert_eq!(proxy.field("count").unwrap(), Value::Int(3));
        proxy.dispose().unwrap();
        assert_eq!(host.live_objects(), 0);
    }

    #[test]
    fn properties_fields_and_calls() {
        let asm = assembly();
        let node = Node::new("hero");
        let player = asm
            .find_type("Player")
            .unwrap()
            .create_instance(Some(&node), vec![])
            .unwrap();

        player.set_property("Title", "Sir").unwrap();
        assert_eq!(player.property("Title").unwrap(), Value::from("Sir"));
        assert_eq!(player.property("Shout").unwrap(), Value::from("hero!"));
        assert!(matches!(
            player.set_property("Shout", "x"),
            Err(ProxyError::PropertyAccess { write: true, .. })
        ));

        let outcome = player.call("hurt", vec![Value::Int(4)]).unwrap();
        assert_eq!(outcome.value(), Some(&Value::Int(6)));
        player.set_field("hp", 50i64).unwrap();
        assert_eq!(player.field("hp").unwrap(), Value::Int(50));
    }

    #[test]
    fn component_routines_are_scheduled_on_the_host() {
        let host = Rc::new(Headless::new());
        let asm = assembly_with(DiscoveryOptions::default(), Rc::clone(&host));
        let node = Node::new("hero");
        let player = asm
            .find_type("Player")
            .unwrap()
            .create_instance(Some(&node), vec![])
            .unwrap();

        let outcome = player.call("blink", vec![]).unwrap();
        assert!(outcome.handle().is_some());
        assert_eq!(host.running_routines(), 1);
        host.tick();
        assert_eq!(player.field("hp").unwrap(), Value::Int(1));
        host.tick();
        assert_eq!(player.field("hp").unwrap(), Value::Int(2));
        assert_eq!(host.running_routines(), 0);
    }

    #[test]
    fn plain_routines_are_returned_deferred() {
        let asm = assembly();
        let counter = asm.find_type("Counter").unwrap().create_instance(None, vec![]).unwrap();
        let mut routine = counter.call("countdown", vec![]).unwrap().into_routine().unwrap();
        assert_eq!(routine.resume().unwrap(), RoutineStep::Yielded);
        assert_eq!(counter.field("value").unwrap(), Value::Int(2));
        assert_eq!(routine.resume().unwrap(), RoutineStep::Completed(Value::Null));
        assert_eq!(counter.field("value").unwrap(), Value::Int(1));
    }

    #[test]
    fn faults_carry_source_locations() {
        let asm = assembly();
        let counter = asm.find_type("Counter").unwrap().create_instance(None, vec![]).unwrap();
        let err = counter.call("divide", vec![Value::Int(0)]).unwrap_err();
        assert_eq!(err.runtime_error(), Some(&RuntimeError::DivisionByZero));
        let location = err.location().unwrap();
        assert_eq!(location.file, "game.ql");
        assert_eq!(location.line, 24);
        assert!(counter.safe_call("divide", vec![Value::Int(0)]).is_none());
        assert!(counter.safe_call("fly", vec![]).is_none());
        assert_eq!(
            counter.safe_call("bump", vec![]).and_then(CallOutcome::into_value),
            Some(Value::Int(101))
        );
    }

    #[test]
    fn disposed_proxies_refuse_everything() {
        let asm = assembly();
        let counter = asm.find_type("Counter").unwrap().create_instance(None, vec![]).unwrap();
        let mut routine = counter.call("countdown", vec![]).unwrap().into_routine().unwrap();
        counter.dispose().unwrap();
        assert!(counter.is_disposed());
        assert!(matches!(counter.dispose(), Err(ProxyError::AlreadyDisposed(_))));
        assert!(matches!(counter.field("value"), Err(ProxyError::AlreadyDisposed(_))));
        assert!(counter.safe_call("bump", vec![]).is_none());
        assert!(matches!(routine.resume(), Err(RuntimeError::Destroyed(_))));
    }

    #[test]
    fn invalidate_drops_caches_and_blocks_lookups() {
        let asm = assembly();
        let counter_type = asm.find_type("Counter").unwrap();
        let counter = counter_type.create_instance(None, vec![]).unwrap();
        counter.call("bump", vec![]).unwrap();
        assert!(asm.cached_member_count() > 0);

        asm.invalidate();
        assert!(!asm.is_loaded());
        assert_eq!(asm.cached_member_count(), 0);
        assert!(asm.types().is_empty());
        assert!(asm.main_type().is_none());
        assert!(matches!(
            counter.call("bump", vec![]),
            Err(ProxyError::ModuleUnloaded(_))
        ));
        assert!(matches!(
            counter_type.create_instance(None, vec![]),
            Err(ProxyError::ModuleUnloaded(_))
        ));
    }

    #[test]
    fn type_locations() {
        let asm = assembly();
        let player = asm.find_type("Player").unwrap();
        assert_eq!(player.location().unwrap().line, 8);
        assert_eq!(player.source_location("hurt").unwrap().line, 5);
        assert_eq!(
            asm.find_type("Counter").unwrap().source_location("init/1").unwrap().line,
            22
        );
    }
}
