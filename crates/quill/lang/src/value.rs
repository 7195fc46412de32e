//! Runtime values and script object instances.

use std::cell::{Ref, RefCell};
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

use crate::error::{RuntimeError, RuntimeResult};
use crate::image::{ModuleImage, TypeImage, TypeRef};

/// A script value.
#[derive(Clone, Debug, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Object(Instance),
}

impl Value {
    /// Short label of the value's runtime type, used in error messages.
    pub fn type_label(&self) -> String {
        match self {
            Value::Null => "null".into(),
            Value::Bool(_) => "Bool".into(),
            Value::Int(_) => "Int".into(),
            Value::Float(_) => "Float".into(),
            Value::Str(_) => "String".into(),
            Value::Object(obj) => obj.type_name(),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&Instance> {
        match self {
            Value::Object(obj) => Some(obj),
            _ => None,
        }
    }

    /// The default value of a slot of type `ty`.
    pub fn zero(ty: &TypeRef) -> Value {
        match ty {
            TypeRef::Int => Value::Int(0),
            TypeRef::Float => Value::Float(0.0),
            TypeRef::Bool => Value::Bool(false),
            _ => Value::Null,
        }
    }

    /// Whether the value can be stored in a slot of type `ty` without
    /// conversion beyond `Int` → `Float` widening.
    pub fn accepts(ty: &TypeRef, value: &Value) -> bool {
        match (ty, value) {
            (TypeRef::Any, _) | (TypeRef::Unit, _) => true,
            (TypeRef::Int, Value::Int(_)) => true,
            (TypeRef::Float, Value::Float(_) | Value::Int(_)) => true,
            (TypeRef::Bool, Value::Bool(_)) => true,
            (TypeRef::String, Value::Str(_) | Value::Null) => true,
            (TypeRef::Local(_) | TypeRef::External(_), Value::Null) => true,
            (TypeRef::Local(name) | TypeRef::External(name), Value::Object(obj)) => {
                obj.is_a(name)
            }
            _ => false,
        }
    }

    /// Convert `value` for storage in a slot of type `ty`.
    ///
    /// `Unit` slots discard the value.
    pub fn coerce(ty: &TypeRef, value: Value, context: &str) -> RuntimeResult<Value> {
        if !Value::accepts(ty, &value) {
            return Err(RuntimeError::TypeMismatch {
                context: context.to_string(),
                expected: ty.to_string(),
                found: value.type_label(),
            });
        }
        Ok(match (ty, value) {
            (TypeRef::Unit, _) => Value::Null,
            (TypeRef::Float, Value::Int(i)) => Value::Float(i as f64),
            (_, value) => value,
        })
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => {
                (*a as f64) == *b
            }
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::Str(s) => write!(f, "{s}"),
            Value::Object(obj) => write!(f, "<{}>", obj.type_name()),
        }
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Float(x)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<Instance> for Value {
    fn from(obj: Instance) -> Self {
        Value::Object(obj)
    }
}

// ── Instances ────────────────────────────────────────────────────────

/// Lifecycle of a script object.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ObjectState {
    Alive,
    /// Released; every further access faults.
    Destroyed,
}

/// The mutable state behind an [`Instance`].
#[derive(Debug)]
pub struct ObjectData {
    module: Arc<ModuleImage>,
    type_index: usize,
    fields: BTreeMap<String, Value>,
    state: ObjectState,
}

/// A shared handle to one script object.
///
/// Cloning the handle aliases the object.
#[derive(Clone)]
pub struct Instance(Rc<RefCell<ObjectData>>);

impl Instance {
    /// Allocate an object whose every field along the base chain holds its
    /// zero value. No initializer or constructor runs.
    pub fn allocate(module: Arc<ModuleImage>, type_index: usize) -> Self {
        let mut fields = BTreeMap::new();
        for idx in module.base_chain(type_index).into_iter().rev() {
            for field in &module.types[idx].fields {
                fields.insert(field.name.clone(), Value::zero(&field.ty));
            }
        }
        Instance(Rc::new(RefCell::new(ObjectData {
            module,
            type_index,
            fields,
            state: ObjectState::Alive,
        })))
    }

    pub fn module(&self) -> Arc<ModuleImage> {
        Arc::clone(&self.0.borrow().module)
    }

    pub fn type_index(&self) -> usize {
        self.0.borrow().type_index
    }

    /// Full name of the object's runtime type.
    pub fn type_name(&self) -> String {
        let data = self.0.borrow();
        data.module
            .types
            .get(data.type_index)
            .map(TypeImage::full_name)
            .unwrap_or_default()
    }

    /// Whether the runtime type is `ancestor` or derives from it.
    pub fn is_a(&self, ancestor: &str) -> bool {
        let data = self.0.borrow();
        data.module.derives_from(data.type_index, ancestor)
    }

    pub fn state(&self) -> ObjectState {
        self.0.borrow().state
    }

    pub fn is_destroyed(&self) -> bool {
        self.state() == ObjectState::Destroyed
    }

    /// Mark the object destroyed and drop its field values.
    pub fn destroy(&self) {
        let mut data = self.0.borrow_mut();
        data.state = ObjectState::Destroyed;
        data.fields.clear();
    }

    /// Fault if the object was destroyed.
    pub fn ensure_alive(&self) -> RuntimeResult<()> {
        if self.is_destroyed() {
            Err(RuntimeError::Destroyed(self.type_name()))
        } else {
            Ok(())
        }
    }

    /// Raw field read; no visibility or liveness check.
    pub fn field(&self, name: &str) -> Option<Value> {
        self.0.borrow().fields.get(name).cloned()
    }

    /// Raw field write; fails when the field does not exist.
    pub fn set_field_raw(&self, name: &str, value: Value) -> bool {
        match self.0.borrow_mut().fields.get_mut(name) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }

    /// Snapshot of the object's field names.
    pub fn field_names(&self) -> Vec<String> {
        self.0.borrow().fields.keys().cloned().collect()
    }

    /// Borrow the object's data.
    pub fn data(&self) -> Ref<'_, ObjectData> {
        self.0.borrow()
    }

    /// Whether both handles alias the same object.
    pub fn ptr_eq(&self, other: &Instance) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl ObjectData {
    pub fn type_image(&self) -> Option<&TypeImage> {
        self.module.types.get(self.type_index)
    }
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.try_borrow() {
            Ok(data) => f
                .debug_struct("Instance")
                .field("type_index", &data.type_index)
                .field("state", &data.state)
                .field("fields", &data.fields.keys().collect::<Vec<_>>())
                .finish(),
            Err(_) => f.write_str("Instance(<borrowed>)"),
        }
    }
}
