//! Script types and their member caches.
//!
//! A [`ScriptType`] is a cheap handle onto one type of a loaded module. Member
//! lookups walk the type's local base chain and remember every hit by name;
//! misses are never remembered, and the whole cache is dropped when the
//! module is unloaded.

use std::cell::{OnceCell, RefCell};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::rc::Rc;

use quill_lang::{
    Instance, Interpreter, MethodKind, ParamImage, RuntimeError, SourceLocation, TypeImage,
    TypeRef, Value, Visibility, ENGINE_COMPONENT, ENGINE_MANAGED_OBJECT,
};
use quill_types::DiscoveryOptions;
use tracing::{trace, warn};

use crate::error::{MemberKind, ProxyError, ProxyResult};
use crate::host::{Blueprint, ComponentContainer, EngineHost};
use crate::module::LoadedModule;
use crate::proxy::{Initialization, ScriptProxy};

/// How instances of a type come into existence.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Capability {
    /// Derives from the engine's component base; lives in a container.
    EngineComponent,
    /// Derives from the engine's managed-object base; built by the host.
    EngineManagedObject,
    /// Anything else; built by running a constructor.
    PlainObject,
}

/// A field visible through reflection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldInfo {
    pub name: String,
    pub ty: TypeRef,
    pub visibility: Visibility,
    pub declaring_type: String,
}

/// A property visible through reflection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PropertyInfo {
    pub name: String,
    pub ty: TypeRef,
    pub visibility: Visibility,
    pub declaring_type: String,
    pub readable: bool,
    pub writable: bool,
}

/// A method visible through reflection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MethodInfo {
    pub name: String,
    pub params: Vec<ParamImage>,
    pub returns: TypeRef,
    pub kind: MethodKind,
    pub visibility: Visibility,
    pub declaring_type: String,
}

impl MethodInfo {
    pub fn arity(&self) -> usize {
        self.params.len()
    }

    /// Routines are started, not run to completion.
    pub fn is_routine(&self) -> bool {
        self.kind == MethodKind::Routine
    }
}

/// What every type of one assembly shares.
pub(crate) struct Binding {
    pub(crate) module: Rc<LoadedModule>,
    pub(crate) host: Rc<dyn EngineHost>,
    pub(crate) interpreter: Interpreter,
    pub(crate) discovery: DiscoveryOptions,
}

#[derive(Default)]
struct MemberCache {
    fields: HashMap<String, FieldInfo>,
    properties: HashMap<String, PropertyInfo>,
    methods: HashMap<String, MethodInfo>,
}

impl MemberCache {
    fn len(&self) -> usize {
        self.fields.len() + self.properties.len() + self.methods.len()
    }
}

struct TypeInner {
    binding: Rc<Binding>,
    index: usize,
    full_name: String,
    capability: OnceCell<Capability>,
    cache: RefCell<MemberCache>,
}

/// One type of a loaded module.
#[derive(Clone)]
pub struct ScriptType {
    inner: Rc<TypeInner>,
}

impl ScriptType {
    pub(crate) fn new(binding: Rc<Binding>, index: usize) -> Self {
        let full_name = binding.module.image().types[index].full_name();
        Self {
            inner: Rc::new(TypeInner {
                binding,
                index,
                full_name,
                capability: OnceCell::new(),
                cache: RefCell::new(MemberCache::default()),
            }),
        }
    }

    fn binding(&self) -> &Binding {
        &self.inner.binding
    }

    fn image(&self) -> &TypeImage {
        &self.binding().module.image().types[self.inner.index]
    }

    pub fn name(&self) -> &str {
        &self.image().name
    }

    pub fn namespace(&self) -> &str {
        &self.image().namespace
    }

    pub fn full_name(&self) -> &str {
        &self.inner.full_name
    }

    pub fn visibility(&self) -> Visibility {
        self.image().visibility
    }

    /// Full name of the direct base type.
    pub fn base_name(&self) -> Option<&str> {
        self.image().base.as_ref().and_then(TypeRef::type_name)
    }

    pub fn module(&self) -> &Rc<LoadedModule> {
        &self.binding().module
    }

    /// Index of the type in its module image.
    pub fn index(&self) -> usize {
        self.inner.index
    }

    /// Classified once, on first use.
    pub fn capability(&self) -> Capability {
        *self.inner.capability.get_or_init(|| {
            let image = self.binding().module.image();
            if image.derives_from(self.inner.index, ENGINE_COMPONENT) {
                Capability::EngineComponent
            } else if image.derives_from(self.inner.index, ENGINE_MANAGED_OBJECT) {
                Capability::EngineManagedObject
            } else {
                Capability::PlainObject
            }
        })
    }

    /// Whether this type derives, directly or not, from `ancestor`.
    ///
    /// A type is not its own subtype.
    pub fn is_subtype_of(&self, ancestor: &str) -> bool {
        let discovery = &self.binding().discovery;
        let image = self.binding().module.image();
        let chain = image.base_chain(self.inner.index);
        chain
            .iter()
            .skip(1)
            .any(|&i| discovery.names_match(&image.types[i].full_name(), ancestor))
            || image
                .external_root(self.inner.index)
                .is_some_and(|root| discovery.names_match(root, ancestor))
    }

    /// Whether `name` designates this type, by full or simple name.
    pub fn is_named(&self, name: &str) -> bool {
        let discovery = &self.binding().discovery;
        discovery.names_match(self.full_name(), name) || discovery.names_match(self.name(), name)
    }

    /// Whether discovery settings let this type be found.
    pub fn is_discoverable(&self) -> bool {
        self.visibility().is_public() || self.binding().discovery.non_public_types
    }

    fn ensure_loaded(&self) -> ProxyResult<()> {
        let module = &self.binding().module;
        if module.is_unloaded() {
            return Err(ProxyError::ModuleUnloaded(module.name().to_string()));
        }
        Ok(())
    }

    fn member_visible(&self, visibility: Visibility) -> bool {
        visibility.is_public() || self.binding().discovery.non_public_members
    }

    fn chain(&self) -> impl Iterator<Item = &TypeImage> {
        let image = self.binding().module.image();
        image
            .base_chain(self.inner.index)
            .into_iter()
            .map(move |i| &image.types[i])
    }

    fn cached<T: Clone>(
        &self,
        kind: MemberKind,
        name: &str,
        slot: fn(&mut MemberCache) -> &mut HashMap<String, T>,
        resolve: impl FnOnce(&Self) -> Option<T>,
    ) -> ProxyResult<T> {
        self.ensure_loaded()?;
        let key = self.binding().discovery.cache_key(name);
        if let Some(hit) = slot(&mut self.inner.cache.borrow_mut()).get(&key).cloned() {
            return Ok(hit);
        }
        let found = resolve(self).ok_or_else(|| ProxyError::MemberNotFound {
            type_name: self.full_name().to_string(),
            kind,
            name: name.to_string(),
        })?;
        slot(&mut self.inner.cache.borrow_mut()).insert(key, found.clone());
        trace!(type_name = %self.full_name(), %kind, member = name, "member cached");
        Ok(found)
    }

    /// Look up a field, including inherited ones.
    pub fn field(&self, name: &str) -> ProxyResult<FieldInfo> {
        self.cached(MemberKind::Field, name, |c| &mut c.fields, |t| {
            t.chain().find_map(|ty| {
                ty.fields
                    .iter()
                    .find(|f| {
                        !f.synthetic
                            && t.member_visible(f.visibility)
                            && t.binding().discovery.names_match(&f.name, name)
                    })
                    .map(|f| FieldInfo {
                        name: f.name.clone(),
                        ty: f.ty.clone(),
                        visibility: f.visibility,
                        declaring_type: ty.full_name(),
                    })
            })
        })
    }

    /// Look up a property, including inherited ones.
    pub fn property(&self, name: &str) -> ProxyResult<PropertyInfo> {
        self.cached(MemberKind::Property, name, |c| &mut c.properties, |t| {
            t.chain().find_map(|ty| {
                ty.properties
                    .iter()
                    .find(|p| {
                        t.member_visible(p.visibility)
                            && t.binding().discovery.names_match(&p.name, name)
                    })
                    .map(|p| PropertyInfo {
                        name: p.name.clone(),
                        ty: p.ty.clone(),
                        visibility: p.visibility,
                        declaring_type: ty.full_name(),
                        readable: p.can_read(),
                        writable: p.can_write(),
                    })
            })
        })
    }

    /// Look up a method, including inherited ones.
    pub fn method(&self, name: &str) -> ProxyResult<MethodInfo> {
        self.cached(MemberKind::Method, name, |c| &mut c.methods, |t| {
            t.chain().find_map(|ty| {
                ty.methods
                    .iter()
                    .find(|m| {
                        t.member_visible(m.visibility)
                            && t.binding().discovery.names_match(&m.name, name)
                    })
                    .map(|m| MethodInfo {
                        name: m.name.clone(),
                        params: m.params.clone(),
                        returns: m.returns.clone(),
                        kind: m.kind,
                        visibility: m.visibility,
                        declaring_type: ty.full_name(),
                    })
            })
        })
    }

    /// Every discoverable field; a derived declaration hides a base one.
    pub fn fields(&self) -> Vec<FieldInfo> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for ty in self.chain() {
            for f in &ty.fields {
                if !f.synthetic && self.member_visible(f.visibility) && seen.insert(f.name.clone()) {
                    out.push(FieldInfo {
                        name: f.name.clone(),
                        ty: f.ty.clone(),
                        visibility: f.visibility,
                        declaring_type: ty.full_name(),
                    });
                }
            }
        }
        out
    }

    pub fn property_names(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.chain()
            .flat_map(|ty| ty.properties.iter())
            .filter(|p| self.member_visible(p.visibility))
            .filter(|p| seen.insert(p.name.clone()))
            .map(|p| p.name.clone())
            .collect()
    }

    pub fn method_names(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.chain()
            .flat_map(|ty| ty.methods.iter())
            .filter(|m| self.member_visible(m.visibility))
            .filter(|m| seen.insert(m.name.clone()))
            .map(|m| m.name.clone())
            .collect()
    }

    /// Number of member descriptors currently cached.
    pub fn cached_member_count(&self) -> usize {
        self.inner.cache.borrow().len()
    }

    pub(crate) fn invalidate(&self) {
        *self.inner.cache.borrow_mut() = MemberCache::default();
    }

    /// Declaration site of the type, when symbols were loaded.
    pub fn location(&self) -> Option<SourceLocation> {
        self.binding().module.location(self.full_name(), None)
    }

    /// Declaration site of a member (constructors are `init/<arity>`),
    /// searching base types too.
    pub fn source_location(&self, member: &str) -> Option<SourceLocation> {
        let module = &self.binding().module;
        self.chain()
            .find_map(|ty| module.location(&ty.full_name(), Some(member)))
    }

    pub(crate) fn locate(&self, declaring_type: &str, member: &str) -> Option<SourceLocation> {
        self.binding().module.location(declaring_type, Some(member))
    }

    pub(crate) fn host(&self) -> &Rc<dyn EngineHost> {
        &self.binding().host
    }

    pub(crate) fn interpreter(&self) -> &Interpreter {
        &self.binding().interpreter
    }

    /// Create an instance, dispatching on the type's capability.
    ///
    /// Components need a `container` and engine objects take no
    /// arguments. Plain objects run the constructor matching `args`; when
    /// none matches and no arguments were given, the object is allocated
    /// with zeroed fields and no initializer or constructor runs.
    pub fn create_instance(
        &self,
        container: Option<&dyn ComponentContainer>,
        args: Vec<Value>,
    ) -> ProxyResult<ScriptProxy> {
        self.ensure_loaded()?;
        let binding = self.binding();
        let image = binding.module.image();
        let blueprint = Blueprint::new(image, self.inner.index, &binding.interpreter);

        let (instance, initialization) = match self.capability() {
            Capability::EngineComponent => {
                let container =
                    container.ok_or_else(|| ProxyError::ContainerRequired(self.full_name().into()))?;
                if !args.is_empty() {
                    return Err(ProxyError::ArgumentsNotSupported(self.full_name().into()));
                }
                (container.attach(&blueprint)?, Initialization::Constructed)
            }
            Capability::EngineManagedObject => {
                if !args.is_empty() {
                    return Err(ProxyError::ArgumentsNotSupported(self.full_name().into()));
                }
                (binding.host.instantiate(&blueprint)?, Initialization::Constructed)
            }
            Capability::PlainObject => {
                let arity = args.len();
                match binding.interpreter.construct(image, self.inner.index, args) {
                    Ok(instance) => (instance, Initialization::Constructed),
                    Err(RuntimeError::NoMatchingConstructor { .. }) if arity == 0 => {
                        warn!(
                            type_name = %self.full_name(),
                            "no parameterless constructor, instance left uninitialized"
                        );
                        (
                            Instance::allocate(std::sync::Arc::clone(image), self.inner.index),
                            Initialization::Uninitialized,
                        )
                    }
                    Err(RuntimeError::NoMatchingConstructor { type_name, arity }) => {
                        return Err(ProxyError::NoMatchingConstructor { type_name, arity });
                    }
                    Err(e) => {
                        let location = self.source_location(&format!("init/{arity}"));
                        return Err(ProxyError::runtime(e, location));
                    }
                }
            }
        };
        trace!(type_name = %self.full_name(), ?initialization, "instance created");
        Ok(ScriptProxy::new(self.clone(), instance, initialization))
    }
}

impl PartialEq for ScriptType {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for ScriptType {}

impl fmt::Debug for ScriptType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptType")
            .field("name", &self.full_name())
            .field("module", &self.binding().module.name())
            .field("cached_members", &self.cached_member_count())
            .finish()
    }
}
