//! The Quill module image: the binary unit the compiler emits and the runtime
//! loads.
//!
//! An image is serialized as a magic header followed by compact JSON. The
//! header identifies the format; the JSON body carries metadata (types,
//! members, references, external type references) and lowered method bodies.
//! Debug symbols travel separately as a [`SymbolTable`] with its own header.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{ImageError, ImageResult};
use crate::syntax::Span;

/// Magic header of module images.
pub const MODULE_MAGIC: &[u8] = b"QMOD\x00\x01";

/// Magic header of symbol files.
pub const SYMBOLS_MAGIC: &[u8] = b"QSYM\x00\x01";

/// Full name of the engine's component base type.
pub const ENGINE_COMPONENT: &str = "Engine.Component";

/// Full name of the engine's managed-object base type.
pub const ENGINE_MANAGED_OBJECT: &str = "Engine.ManagedObject";

// ── Type references ──────────────────────────────────────────────────

/// A reference to a type from metadata.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "name", rename_all = "snake_case")]
pub enum TypeRef {
    Int,
    Float,
    Bool,
    String,
    Any,
    Unit,
    /// Return type of routine methods.
    Routine,
    /// A type defined in the same module, by full name.
    Local(std::string::String),
    /// A type defined outside the module, by full name.
    External(std::string::String),
}

impl TypeRef {
    /// Resolve a builtin type name.
    pub fn builtin(name: &str) -> Option<Self> {
        Some(match name {
            "Int" => Self::Int,
            "Float" => Self::Float,
            "Bool" => Self::Bool,
            "String" => Self::String,
            "Any" => Self::Any,
            "Unit" => Self::Unit,
            "Routine" => Self::Routine,
            _ => return None,
        })
    }

    /// Namespace of a named type (`Game.Items` for `Game.Items.Sword`).
    pub fn namespace(&self) -> Option<&str> {
        match self {
            Self::Local(name) | Self::External(name) => name.rsplit_once('.').map(|(ns, _)| ns),
            _ => None,
        }
    }

    /// Full name of a named type.
    pub fn type_name(&self) -> Option<&str> {
        match self {
            Self::Local(name) | Self::External(name) => Some(name),
            _ => None,
        }
    }
}

impl fmt::Display for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int => write!(f, "Int"),
            Self::Float => write!(f, "Float"),
            Self::Bool => write!(f, "Bool"),
            Self::String => write!(f, "String"),
            Self::Any => write!(f, "Any"),
            Self::Unit => write!(f, "Unit"),
            Self::Routine => write!(f, "Routine"),
            Self::Local(name) | Self::External(name) => write!(f, "{name}"),
        }
    }
}

/// Member or type visibility.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    #[default]
    Public,
    Private,
}

impl Visibility {
    pub fn is_public(self) -> bool {
        self == Self::Public
    }
}

// ── Lowered code ─────────────────────────────────────────────────────

/// A literal constant.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Literal {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

/// Binary operators.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

impl BinaryOp {
    /// Operator for a source symbol.
    pub fn from_symbol(symbol: &str) -> Option<Self> {
        Some(match symbol {
            "+" => Self::Add,
            "-" => Self::Sub,
            "*" => Self::Mul,
            "/" => Self::Div,
            "%" => Self::Rem,
            "=" => Self::Eq,
            "!=" => Self::Ne,
            "<" => Self::Lt,
            "<=" => Self::Le,
            ">" => Self::Gt,
            ">=" => Self::Ge,
            "and" => Self::And,
            "or" => Self::Or,
            _ => return None,
        })
    }
}

/// Unary operators.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnaryOp {
    Neg,
    Not,
}

/// Assignment target, resolved at compile time.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Place {
    Local(String),
    Field(String),
    Property(String),
}

/// A lowered expression.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    Literal(Literal),
    SelfRef,
    Local(String),
    Field(String),
    Property(String),
    Assign {
        target: Place,
        value: Box<Expr>,
    },
    Let {
        name: String,
        value: Box<Expr>,
    },
    If {
        cond: Box<Expr>,
        then: Box<Expr>,
        otherwise: Option<Box<Expr>>,
    },
    While {
        cond: Box<Expr>,
        body: Vec<Expr>,
    },
    Block(Vec<Expr>),
    Return(Option<Box<Expr>>),
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Concat(Vec<Expr>),
    Call {
        method: String,
        args: Vec<Expr>,
    },
    /// Suspension point; only legal as a top-level routine statement.
    Yield,
    Fail(Box<Expr>),
}

// ── Metadata ─────────────────────────────────────────────────────────

/// An attribute attached to a type or member.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AttributeImage {
    pub ty: TypeRef,
    pub args: Vec<Literal>,
}

/// A method or constructor parameter.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParamImage {
    pub name: String,
    pub ty: TypeRef,
}

/// A field declaration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FieldImage {
    pub name: String,
    pub ty: TypeRef,
    pub visibility: Visibility,
    pub init: Option<Expr>,
    pub attributes: Vec<AttributeImage>,
    /// Compiler-generated backing field of an auto-property.
    #[serde(default)]
    pub synthetic: bool,
}

/// A property declaration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PropertyImage {
    pub name: String,
    pub ty: TypeRef,
    pub visibility: Visibility,
    pub getter: Option<Vec<Expr>>,
    /// Setter body; the assigned value is bound to the local `value`.
    pub setter: Option<Vec<Expr>>,
    /// Backing field of an auto-property.
    pub backing_field: Option<String>,
    pub attributes: Vec<AttributeImage>,
}

impl PropertyImage {
    pub fn can_read(&self) -> bool {
        self.getter.is_some() || self.backing_field.is_some()
    }

    pub fn can_write(&self) -> bool {
        self.setter.is_some() || self.backing_field.is_some()
    }
}

/// Whether a method runs to completion or yields a routine.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MethodKind {
    #[default]
    Function,
    Routine,
}

/// A method declaration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MethodImage {
    pub name: String,
    pub params: Vec<ParamImage>,
    pub returns: TypeRef,
    pub kind: MethodKind,
    pub visibility: Visibility,
    pub body: Vec<Expr>,
    pub attributes: Vec<AttributeImage>,
}

/// A constructor declaration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CtorImage {
    pub params: Vec<ParamImage>,
    pub visibility: Visibility,
    pub body: Vec<Expr>,
}

/// A type declaration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TypeImage {
    pub name: String,
    /// Empty for types declared outside any namespace.
    pub namespace: String,
    pub visibility: Visibility,
    pub base: Option<TypeRef>,
    pub attributes: Vec<AttributeImage>,
    pub fields: Vec<FieldImage>,
    pub properties: Vec<PropertyImage>,
    pub constructors: Vec<CtorImage>,
    pub methods: Vec<MethodImage>,
}

impl TypeImage {
    /// Namespace-qualified name.
    pub fn full_name(&self) -> String {
        if self.namespace.is_empty() {
            self.name.clone()
        } else {
            format!("{}.{}", self.namespace, self.name)
        }
    }

    pub fn field(&self, name: &str) -> Option<&FieldImage> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn property(&self, name: &str) -> Option<&PropertyImage> {
        self.properties.iter().find(|p| p.name == name)
    }

    pub fn method(&self, name: &str) -> Option<&MethodImage> {
        self.methods.iter().find(|m| m.name == name)
    }

    /// Whether the type declares no members at all.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
            && self.properties.is_empty()
            && self.constructors.is_empty()
            && self.methods.is_empty()
    }
}

/// A complete compiled module.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModuleImage {
    /// Module name (the artifact name it was compiled as).
    pub name: String,
    /// External modules the sources `use`.
    pub references: Vec<String>,
    /// Types in declaration order.
    pub types: Vec<TypeImage>,
    /// Explicitly designated entry type, by full name.
    pub entry: Option<String>,
    /// Every external type referenced anywhere in metadata, sorted.
    pub type_refs: Vec<String>,
}

impl ModuleImage {
    /// An image with no types.
    pub fn empty(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            references: Vec::new(),
            types: Vec::new(),
            entry: None,
            type_refs: Vec::new(),
        }
    }

    /// Index of a type by full name.
    pub fn type_index(&self, full_name: &str) -> Option<usize> {
        self.types.iter().position(|t| t.full_name() == full_name)
    }

    /// The type at `index` followed by its local base types, nearest first.
    ///
    /// Stops at the first external base. Cycles are rejected by the compiler
    /// and by [`Runtime::load`](crate::Runtime::load); the walk is bounded by
    /// the type count regardless.
    pub fn base_chain(&self, index: usize) -> Vec<usize> {
        let mut chain = Vec::new();
        let mut current = Some(index);
        while let Some(idx) = current {
            if chain.contains(&idx) || chain.len() > self.types.len() {
                break;
            }
            chain.push(idx);
            current = match &self.types[idx].base {
                Some(TypeRef::Local(name)) => self.type_index(name),
                _ => None,
            };
        }
        chain
    }

    /// The external type the chain of `index` ultimately derives from.
    pub fn external_root(&self, index: usize) -> Option<&str> {
        let last = *self.base_chain(index).last()?;
        match &self.types[last].base {
            Some(TypeRef::External(name)) => Some(name),
            _ => None,
        }
    }

    /// Whether the type at `index` is `ancestor` or derives from it.
    pub fn derives_from(&self, index: usize, ancestor: &str) -> bool {
        self.base_chain(index)
            .into_iter()
            .any(|i| self.types[i].full_name() == ancestor)
            || self.external_root(index) == Some(ancestor)
    }

    /// Serialize into module bytes.
    pub fn encode(&self) -> ImageResult<Vec<u8>> {
        let json =
            serde_json::to_vec(self).map_err(|e| ImageError::Serialization(e.to_string()))?;
        let mut bytes = Vec::with_capacity(MODULE_MAGIC.len() + json.len());
        bytes.extend_from_slice(MODULE_MAGIC);
        bytes.extend_from_slice(&json);
        Ok(bytes)
    }

    /// Deserialize module bytes.
    pub fn decode(bytes: &[u8]) -> ImageResult<Self> {
        let body = bytes
            .strip_prefix(MODULE_MAGIC)
            .ok_or(ImageError::BadMagic("module"))?;
        serde_json::from_slice(body).map_err(|e| ImageError::Malformed(e.to_string()))
    }
}

// ── Symbols ──────────────────────────────────────────────────────────

/// Where a declaration lives in source.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceLocation {
    pub file: String,
    pub line: u32,
    pub column: u32,
}

impl SourceLocation {
    pub fn new(file: impl Into<String>, span: Span) -> Self {
        Self {
            file: file.into(),
            line: span.line,
            column: span.column,
        }
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({},{})", self.file, self.line, self.column)
    }
}

/// Debug symbols: declaration locations keyed by `Type` or `Type::member`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolTable {
    pub module: String,
    pub locations: BTreeMap<String, SourceLocation>,
}

impl SymbolTable {
    pub fn new(module: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            locations: BTreeMap::new(),
        }
    }

    /// Key of a member symbol.
    pub fn member_key(type_name: &str, member: &str) -> String {
        format!("{type_name}::{member}")
    }

    pub fn insert(&mut self, key: impl Into<String>, location: SourceLocation) {
        self.locations.insert(key.into(), location);
    }

    /// Location of a type declaration.
    pub fn type_location(&self, type_name: &str) -> Option<&SourceLocation> {
        self.locations.get(type_name)
    }

    /// Location of a member declaration.
    pub fn member_location(&self, type_name: &str, member: &str) -> Option<&SourceLocation> {
        self.locations.get(&Self::member_key(type_name, member))
    }

    pub fn encode(&self) -> ImageResult<Vec<u8>> {
        let json =
            serde_json::to_vec(self).map_err(|e| ImageError::Serialization(e.to_string()))?;
        let mut bytes = SYMBOLS_MAGIC.to_vec();
        bytes.extend_from_slice(&json);
        Ok(bytes)
    }

    pub fn decode(bytes: &[u8]) -> ImageResult<Self> {
        let body = bytes
            .strip_prefix(SYMBOLS_MAGIC)
            .ok_or(ImageError::BadMagic("symbols"))?;
        serde_json::from_slice(body).map_err(|e| ImageError::Malformed(e.to_string()))
    }
}
