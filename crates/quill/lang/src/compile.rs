//! The Quill front end: source units in, module image and diagnostics out.
//!
//! Compilation runs in fixed passes over the whole batch so that units may
//! reference each other's types:
//!
//! 1. read every unit into S-expressions
//! 2. collect `use`, `namespace`, `type` and `entry` declarations
//! 3. declare type headers and resolve base types (rejecting cycles)
//! 4. declare members with resolved signatures
//! 5. lower bodies, emitting usage warnings
//! 6. resolve the entry type
//!
//! The image is only produced when no error was reported.

use std::collections::{BTreeSet, HashMap, HashSet};

use quill_types::{CompileDiagnostic, OutputKind};
use tracing::debug;

use crate::diagnostics::Diagnostics;
use crate::image::{
    AttributeImage, CtorImage, Expr, FieldImage, Literal, MethodImage, MethodKind, ModuleImage,
    ParamImage, PropertyImage, SourceLocation, SymbolTable, TypeImage, TypeRef, Visibility,
    ENGINE_COMPONENT, ENGINE_MANAGED_OBJECT,
};
use crate::lower::{parse_literal, Lowerer, MemberTables};
use crate::syntax::{parse_forms, SExpr, Span};

/// One source unit handed to the front end.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceUnit {
    /// File name used in diagnostics and symbols.
    pub file: String,
    pub text: String,
}

impl SourceUnit {
    pub fn new(file: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            text: text.into(),
        }
    }
}

/// Everything one front-end run produces.
#[derive(Clone, Debug)]
pub struct FrontEndOutput {
    /// The compiled image; `None` when any error was reported.
    pub image: Option<ModuleImage>,
    /// Declaration locations of every type and member.
    pub symbols: SymbolTable,
    pub diagnostics: Vec<CompileDiagnostic>,
}

/// Compile a batch of source units into one module named `module_name`.
///
/// `references` lists the external modules the sources may `use`.
pub fn compile_units(
    module_name: &str,
    units: &[SourceUnit],
    references: &[String],
    output_kind: OutputKind,
) -> FrontEndOutput {
    let mut diags = Diagnostics::default();
    let mut parsed: Vec<(&str, Vec<SExpr>)> = Vec::with_capacity(units.len());
    for unit in units {
        match parse_forms(&unit.text) {
            Ok(forms) => parsed.push((unit.file.as_str(), forms)),
            Err(e) => diags.error("QE0001", e.message, &unit.file, e.span),
        }
    }

    let mut front = FrontEnd::new(module_name, references, diags);
    for (file, forms) in &parsed {
        front.collect(file, forms, "");
    }
    front.declare_types();
    front.resolve_bases();
    let pending = front.declare_members();
    front.lower_bodies(pending);
    front.resolve_entry(output_kind);
    front.finish(module_name)
}

// ── Declarations ─────────────────────────────────────────────────────

struct TypeDecl<'a> {
    file: &'a str,
    namespace: String,
    name: String,
    span: Span,
    visibility: Visibility,
    extends: Option<&'a SExpr>,
    attrs: Vec<&'a SExpr>,
    members: Vec<&'a SExpr>,
}

struct EntryDecl<'a> {
    file: &'a str,
    namespace: String,
    node: &'a SExpr,
}

/// A body waiting for lowering.
enum PendingBody<'a> {
    FieldInit {
        field: usize,
        node: &'a SExpr,
    },
    Getter {
        property: usize,
        nodes: &'a [SExpr],
    },
    Setter {
        property: usize,
        nodes: &'a [SExpr],
    },
    Ctor {
        ctor: usize,
        params: Vec<(String, Span)>,
        nodes: &'a [SExpr],
    },
    Method {
        method: usize,
        params: Vec<(String, Span)>,
        routine: bool,
        span: Span,
        nodes: &'a [SExpr],
    },
}

enum LoweredBody {
    FieldInit(usize, Expr),
    Getter(usize, Vec<Expr>),
    Setter(usize, Vec<Expr>),
    Ctor(usize, Vec<Expr>),
    Method(usize, Vec<Expr>),
}

struct FrontEnd<'a> {
    references: &'a [String],
    diags: Diagnostics,
    used_refs: Vec<String>,
    decls: Vec<TypeDecl<'a>>,
    entry_decl: Option<EntryDecl<'a>>,
    entry: Option<String>,
    /// Type index → declaration index.
    type_decl: Vec<usize>,
    types: Vec<TypeImage>,
    index: HashMap<String, usize>,
    external: BTreeSet<String>,
    symbols: SymbolTable,
}

impl<'a> FrontEnd<'a> {
    fn new(module_name: &str, references: &'a [String], diags: Diagnostics) -> Self {
        Self {
            references,
            diags,
            used_refs: Vec::new(),
            decls: Vec::new(),
            entry_decl: None,
            entry: None,
            type_decl: Vec::new(),
            types: Vec::new(),
            index: HashMap::new(),
            external: BTreeSet::new(),
            symbols: SymbolTable::new(module_name),
        }
    }

    fn collect(&mut self, file: &'a str, forms: &'a [SExpr], namespace: &str) {
        for form in forms {
            let Some(items) = form.as_list() else {
                self.diags
                    .error("QE0111", format!("expected a declaration, found `{form}`"), file, form.span());
                continue;
            };
            match form.head() {
                Some("use") => self.use_reference(file, form, items),
                Some("namespace") => match items.get(1).and_then(SExpr::as_atom) {
                    Some(name) if is_qualified_identifier(name) => {
                        let nested = join(namespace, name);
                        self.collect(file, &items[2..], &nested);
                    }
                    _ => self
                        .diags
                        .error("QE0111", "`namespace` needs a name", file, form.span()),
                },
                Some("type") => self.type_decl(file, form, items, namespace),
                Some("entry") => {
                    if self.entry_decl.is_some() {
                        self.diags
                            .error("QE0112", "duplicate `entry` declaration", file, form.span());
                    } else if items.len() != 2 {
                        self.diags
                            .error("QE0111", "`entry` takes exactly one type name", file, form.span());
                    } else {
                        self.entry_decl = Some(EntryDecl {
                            file,
                            namespace: namespace.to_string(),
                            node: &items[1],
                        });
                    }
                }
                Some(other) => self.diags.error(
                    "QE0111",
                    format!("unknown declaration `{other}`"),
                    file,
                    form.span(),
                ),
                None => self
                    .diags
                    .error("QE0111", "empty declaration", file, form.span()),
            }
        }
    }

    fn use_reference(&mut self, file: &str, form: &SExpr, items: &[SExpr]) {
        let name = match items.get(1) {
            Some(SExpr::Str(s, _)) => s.as_str(),
            Some(SExpr::Atom(a, _)) => a.as_str(),
            _ => {
                self.diags
                    .error("QE0111", "`use` needs a module name", file, form.span());
                return;
            }
        };
        if !self.references.iter().any(|r| r == name) {
            self.diags.error(
                "QE0108",
                format!("reference `{name}` not found; add it to the compile request references"),
                file,
                form.span(),
            );
            return;
        }
        if !self.used_refs.iter().any(|r| r == name) {
            self.used_refs.push(name.to_string());
        }
    }

    fn type_decl(&mut self, file: &'a str, form: &'a SExpr, items: &'a [SExpr], namespace: &str) {
        let Some(name) = items.get(1).and_then(SExpr::as_atom).filter(|n| is_identifier(n)) else {
            self.diags
                .error("QE0111", "`type` needs a simple name", file, form.span());
            return;
        };
        let mut decl = TypeDecl {
            file,
            namespace: namespace.to_string(),
            name: name.to_string(),
            span: form.span(),
            visibility: Visibility::Public,
            extends: None,
            attrs: Vec::new(),
            members: Vec::new(),
        };
        for item in &items[2..] {
            match item {
                SExpr::Atom(a, _) if a == ":private" => decl.visibility = Visibility::Private,
                SExpr::Atom(a, _) if a == ":public" => decl.visibility = Visibility::Public,
                SExpr::List(..) if item.is_form("extends") => {
                    if decl.extends.is_some() {
                        self.diags
                            .error("QE0111", "a type extends at most one base", file, item.span());
                    } else {
                        decl.extends = Some(item);
                    }
                }
                SExpr::List(..) if item.is_form("attr") => decl.attrs.push(item),
                SExpr::List(..) => decl.members.push(item),
                other => self.diags.error(
                    "QE0111",
                    format!("unexpected `{other}` in type `{name}`"),
                    file,
                    other.span(),
                ),
            }
        }
        self.decls.push(decl);
    }

    fn declare_types(&mut self) {
        for (d, decl) in self.decls.iter().enumerate() {
            let full_name = join(&decl.namespace, &decl.name);
            if self.index.contains_key(&full_name) {
                self.diags.error(
                    "QE0101",
                    format!("type `{full_name}` is declared more than once"),
                    decl.file,
                    decl.span,
                );
                continue;
            }
            self.index.insert(full_name.clone(), self.types.len());
            self.type_decl.push(d);
            self.symbols
                .insert(full_name, SourceLocation::new(decl.file, decl.span));
            self.types.push(TypeImage {
                name: decl.name.clone(),
                namespace: decl.namespace.clone(),
                visibility: decl.visibility,
                base: None,
                attributes: Vec::new(),
                fields: Vec::new(),
                properties: Vec::new(),
                constructors: Vec::new(),
                methods: Vec::new(),
            });
        }
    }

    /// Resolve a type name in the context of `namespace`, innermost first.
    fn lookup_type(&self, name: &str, namespace: &str) -> Option<TypeRef> {
        if let Some(builtin) = TypeRef::builtin(name) {
            return (builtin != TypeRef::Routine).then_some(builtin);
        }
        let mut ns = namespace;
        loop {
            let candidate = join(ns, name);
            if self.index.contains_key(&candidate) {
                return Some(TypeRef::Local(candidate));
            }
            if ns.is_empty() {
                break;
            }
            ns = ns.rsplit_once('.').map(|(parent, _)| parent).unwrap_or("");
        }
        (name.contains('.') && is_qualified_identifier(name))
            .then(|| TypeRef::External(name.to_string()))
    }

    /// Resolve a type node, recording external references. Reports `QE0100`
    /// and returns `None` when the type is unknown.
    fn resolve_type(&mut self, node: &SExpr, namespace: &str, file: &str) -> Option<TypeRef> {
        let Some(name) = node.as_atom() else {
            self.diags
                .error("QE0111", format!("expected a type name, found `{node}`"), file, node.span());
            return None;
        };
        match self.lookup_type(name, namespace) {
            Some(ty) => {
                if let TypeRef::External(ext) = &ty {
                    self.external.insert(ext.clone());
                }
                Some(ty)
            }
            None => {
                let message = if name == "Routine" {
                    "`Routine` is only produced by `routine` declarations".to_string()
                } else {
                    format!("unknown type `{name}`")
                };
                self.diags.error("QE0100", message, file, node.span());
                None
            }
        }
    }

    fn resolve_attr(&mut self, node: &SExpr, namespace: &str, file: &str) -> Option<AttributeImage> {
        let items = node.as_list()?;
        let Some(type_node) = items.get(1) else {
            self.diags
                .error("QE0111", "`attr` needs a type name", file, node.span());
            return None;
        };
        let ty = self.resolve_type(type_node, namespace, file)?;
        let mut args = Vec::new();
        for arg in &items[2..] {
            let literal = match arg {
                SExpr::Str(s, _) => Some(Literal::Str(s.clone())),
                SExpr::Atom(a, _) => parse_literal(a),
                SExpr::List(..) => None,
            };
            match literal {
                Some(l) => args.push(l),
                None => self.diags.error(
                    "QE0111",
                    format!("attribute arguments must be literals, found `{arg}`"),
                    file,
                    arg.span(),
                ),
            }
        }
        Some(AttributeImage { ty, args })
    }

    fn resolve_bases(&mut self) {
        for t in 0..self.types.len() {
            let d = self.type_decl[t];
            let (file, namespace, extends, attrs) = {
                let decl = &self.decls[d];
                (decl.file, decl.namespace.clone(), decl.extends, decl.attrs.clone())
            };

            for attr in attrs {
                if let Some(image) = self.resolve_attr(attr, &namespace, file) {
                    self.types[t].attributes.push(image);
                }
            }

            let Some(extends) = extends else { continue };
            let base_node = match extends.as_list() {
                Some([_, base]) => base,
                _ => {
                    self.diags
                        .error("QE0111", "`extends` takes exactly one type", file, extends.span());
                    continue;
                }
            };
            let Some(base) = self.resolve_type(base_node, &namespace, file) else {
                continue;
            };
            let valid = match &base {
                TypeRef::Local(_) => true,
                TypeRef::External(name) => name == ENGINE_COMPONENT || name == ENGINE_MANAGED_OBJECT,
                _ => false,
            };
            if valid {
                self.types[t].base = Some(base);
            } else {
                self.diags.error(
                    "QE0106",
                    format!(
                        "invalid base type `{base}`: extend a type from this batch, \
                         {ENGINE_COMPONENT} or {ENGINE_MANAGED_OBJECT}"
                    ),
                    file,
                    base_node.span(),
                );
            }
        }

        let mut cyclic = Vec::new();
        for t in 0..self.types.len() {
            let mut seen = HashSet::new();
            let mut current = t;
            loop {
                seen.insert(current);
                let next = match &self.types[current].base {
                    Some(TypeRef::Local(name)) => self.index.get(name).copied(),
                    _ => None,
                };
                match next {
                    Some(n) if n == t => {
                        cyclic.push(t);
                        break;
                    }
                    Some(n) if !seen.contains(&n) => current = n,
                    _ => break,
                }
            }
        }
        for t in cyclic {
            let decl = &self.decls[self.type_decl[t]];
            self.diags.error(
                "QE0107",
                format!(
                    "type `{}` inherits from itself",
                    join(&decl.namespace, &decl.name)
                ),
                decl.file,
                decl.span,
            );
            self.types[t].base = None;
        }
    }

    /// Consume leading `:private`/`:public` modifiers and `(attr ...)` forms.
    fn modifiers(
        &mut self,
        nodes: &'a [SExpr],
        namespace: &str,
        file: &str,
    ) -> (Visibility, Vec<AttributeImage>, &'a [SExpr]) {
        let mut visibility = Visibility::Public;
        let mut attributes = Vec::new();
        let mut consumed = 0;
        for node in nodes {
            match node {
                SExpr::Atom(a, _) if a == ":private" => visibility = Visibility::Private,
                SExpr::Atom(a, _) if a == ":public" => visibility = Visibility::Public,
                SExpr::List(..) if node.is_form("attr") => {
                    if let Some(attr) = self.resolve_attr(node, namespace, file) {
                        attributes.push(attr);
                    }
                }
                _ => break,
            }
            consumed += 1;
        }
        (visibility, attributes, &nodes[consumed..])
    }

    fn params(
        &mut self,
        node: &SExpr,
        namespace: &str,
        file: &str,
    ) -> Option<(Vec<ParamImage>, Vec<(String, Span)>)> {
        let Some(items) = node.as_list() else {
            self.diags
                .error("QE0111", "expected a parameter list", file, node.span());
            return None;
        };
        let mut params = Vec::new();
        let mut names: Vec<(String, Span)> = Vec::new();
        for item in items {
            let Some([name_node, type_node]) = item.as_list() else {
                self.diags
                    .error("QE0111", "parameters are written `(name Type)`", file, item.span());
                continue;
            };
            let Some(name) = name_node.as_atom().filter(|n| is_identifier(n)) else {
                self.diags
                    .error("QE0111", "parameter name must be an identifier", file, name_node.span());
                continue;
            };
            if names.iter().any(|(n, _)| n == name) {
                self.diags.error(
                    "QE0102",
                    format!("duplicate parameter `{name}`"),
                    file,
                    name_node.span(),
                );
                continue;
            }
            let ty = self
                .resolve_type(type_node, namespace, file)
                .unwrap_or(TypeRef::Any);
            params.push(ParamImage {
                name: name.to_string(),
                ty,
            });
            names.push((name.to_string(), name_node.span()));
        }
        Some((params, names))
    }

    fn declare_members(&mut self) -> Vec<Vec<PendingBody<'a>>> {
        let mut pending = Vec::with_capacity(self.types.len());
        for t in 0..self.types.len() {
            let d = self.type_decl[t];
            let (file, namespace, members, span) = {
                let decl = &self.decls[d];
                (decl.file, decl.namespace.clone(), decl.members.clone(), decl.span)
            };
            let full_name = self.types[t].full_name();
            let mut names: HashSet<String> = HashSet::new();
            let mut bodies = Vec::new();

            for member in members {
                let items = member.as_list().unwrap_or(&[]);
                let head = member.head().unwrap_or("");
                let member_name = match head {
                    "field" | "property" | "method" | "routine" => items
                        .get(1)
                        .and_then(SExpr::as_atom)
                        .filter(|n| is_identifier(n)),
                    "init" => Some("init"),
                    _ => {
                        self.diags.error(
                            "QE0111",
                            format!("unknown member form `{head}`"),
                            file,
                            member.span(),
                        );
                        continue;
                    }
                };
                let Some(member_name) = member_name else {
                    self.diags.error(
                        "QE0111",
                        format!("`{head}` needs a name"),
                        file,
                        member.span(),
                    );
                    continue;
                };
                if head != "init" && !names.insert(member_name.to_string()) {
                    self.diags.error(
                        "QE0102",
                        format!("member `{member_name}` is declared more than once in `{full_name}`"),
                        file,
                        member.span(),
                    );
                    continue;
                }
                let location = SourceLocation::new(file, member.span());

                match head {
                    "field" => {
                        let Some(type_node) = items.get(2) else {
                            self.diags
                                .error("QE0111", "`field` needs a type", file, member.span());
                            continue;
                        };
                        let ty = self
                            .resolve_type(type_node, &namespace, file)
                            .unwrap_or(TypeRef::Any);
                        let mut visibility = Visibility::Public;
                        let mut attributes = Vec::new();
                        let mut init = None;
                        for item in &items[3..] {
                            match item {
                                SExpr::Atom(a, _) if a == ":private" => {
                                    visibility = Visibility::Private
                                }
                                SExpr::Atom(a, _) if a == ":public" => {
                                    visibility = Visibility::Public
                                }
                                SExpr::List(..) if item.is_form("attr") => {
                                    if let Some(attr) = self.resolve_attr(item, &namespace, file) {
                                        attributes.push(attr);
                                    }
                                }
                                _ if init.is_none() => init = Some(item),
                                _ => self.diags.error(
                                    "QE0111",
                                    "a field takes at most one initializer",
                                    file,
                                    item.span(),
                                ),
                            }
                        }
                        let field = self.types[t].fields.len();
                        self.types[t].fields.push(FieldImage {
                            name: member_name.to_string(),
                            ty,
                            visibility,
                            init: None,
                            attributes,
                            synthetic: false,
                        });
                        if let Some(node) = init {
                            bodies.push(PendingBody::FieldInit { field, node });
                        }
                        self.symbols
                            .insert(SymbolTable::member_key(&full_name, member_name), location);
                    }
                    "property" => {
                        let Some(type_node) = items.get(2) else {
                            self.diags
                                .error("QE0111", "`property` needs a type", file, member.span());
                            continue;
                        };
                        let ty = self
                            .resolve_type(type_node, &namespace, file)
                            .unwrap_or(TypeRef::Any);
                        let (visibility, attributes, rest) =
                            self.modifiers(&items[3..], &namespace, file);
                        let mut getter: Option<&'a [SExpr]> = None;
                        let mut setter: Option<&'a [SExpr]> = None;
                        for item in rest {
                            let slot = match item.head() {
                                Some("get") => &mut getter,
                                Some("set") => &mut setter,
                                _ => {
                                    self.diags.error(
                                        "QE0111",
                                        "property accessors are `(get ...)` and `(set ...)`",
                                        file,
                                        item.span(),
                                    );
                                    continue;
                                }
                            };
                            if slot.is_some() {
                                self.diags
                                    .error("QE0102", "duplicate property accessor", file, item.span());
                                continue;
                            }
                            *slot = item.as_list().map(|l| &l[1..]);
                        }
                        let property = self.types[t].properties.len();
                        let backing_field = if getter.is_none() && setter.is_none() {
                            let backing = format!("__prop_{member_name}");
                            self.types[t].fields.push(FieldImage {
                                name: backing.clone(),
                                ty: ty.clone(),
                                visibility: Visibility::Private,
                                init: None,
                                attributes: Vec::new(),
                                synthetic: true,
                            });
                            Some(backing)
                        } else {
                            None
                        };
                        self.types[t].properties.push(PropertyImage {
                            name: member_name.to_string(),
                            ty,
                            visibility,
                            getter: getter.map(|_| Vec::new()),
                            setter: setter.map(|_| Vec::new()),
                            backing_field,
                            attributes,
                        });
                        if let Some(nodes) = getter {
                            bodies.push(PendingBody::Getter { property, nodes });
                        }
                        if let Some(nodes) = setter {
                            bodies.push(PendingBody::Setter { property, nodes });
                        }
                        self.symbols
                            .insert(SymbolTable::member_key(&full_name, member_name), location);
                    }
                    "init" => {
                        let Some(param_node) = items.get(1) else {
                            self.diags
                                .error("QE0111", "`init` needs a parameter list", file, member.span());
                            continue;
                        };
                        let Some((params, param_names)) = self.params(param_node, &namespace, file)
                        else {
                            continue;
                        };
                        let arity = params.len();
                        if self.types[t].constructors.iter().any(|c| c.params.len() == arity) {
                            self.diags.error(
                                "QE0102",
                                format!("duplicate constructor with {arity} parameter(s)"),
                                file,
                                member.span(),
                            );
                            continue;
                        }
                        let (visibility, _, body) = self.modifiers(&items[2..], &namespace, file);
                        let ctor = self.types[t].constructors.len();
                        self.types[t].constructors.push(CtorImage {
                            params,
                            visibility,
                            body: Vec::new(),
                        });
                        bodies.push(PendingBody::Ctor {
                            ctor,
                            params: param_names,
                            nodes: body,
                        });
                        self.symbols.insert(
                            SymbolTable::member_key(&full_name, &format!("init/{arity}")),
                            location,
                        );
                    }
                    _ => {
                        let routine = head == "routine";
                        let Some(param_node) = items.get(2) else {
                            self.diags.error(
                                "QE0111",
                                format!("`{head}` needs a parameter list"),
                                file,
                                member.span(),
                            );
                            continue;
                        };
                        let Some((params, param_names)) = self.params(param_node, &namespace, file)
                        else {
                            continue;
                        };
                        let (returns, rest_start) = if routine {
                            (TypeRef::Routine, 3)
                        } else {
                            let Some(ret_node) = items.get(3) else {
                                self.diags.error(
                                    "QE0111",
                                    "`method` needs a return type",
                                    file,
                                    member.span(),
                                );
                                continue;
                            };
                            let returns = self
                                .resolve_type(ret_node, &namespace, file)
                                .unwrap_or(TypeRef::Any);
                            (returns, 4)
                        };
                        let (visibility, attributes, body) =
                            self.modifiers(&items[rest_start..], &namespace, file);
                        let method = self.types[t].methods.len();
                        self.types[t].methods.push(MethodImage {
                            name: member_name.to_string(),
                            params,
                            returns,
                            kind: if routine {
                                MethodKind::Routine
                            } else {
                                MethodKind::Function
                            },
                            visibility,
                            body: Vec::new(),
                            attributes,
                        });
                        bodies.push(PendingBody::Method {
                            method,
                            params: param_names,
                            routine,
                            span: member.span(),
                            nodes: body,
                        });
                        self.symbols
                            .insert(SymbolTable::member_key(&full_name, member_name), location);
                    }
                }
            }

            if self.types[t].is_empty() {
                self.diags.warning(
                    "QW0100",
                    format!("type `{full_name}` declares no members"),
                    file,
                    span,
                    1,
                );
            }
            pending.push(bodies);
        }
        pending
    }

    fn lower_bodies(&mut self, pending: Vec<Vec<PendingBody<'a>>>) {
        let mut lowered: Vec<(usize, LoweredBody)> = Vec::new();
        {
            let tables = MemberTables {
                types: &self.types,
                index: &self.index,
            };
            for (t, bodies) in pending.into_iter().enumerate() {
                let file = self.decls[self.type_decl[t]].file;
                let mut lowerer = Lowerer::new(tables, t, file, &mut self.diags);
                for body in bodies {
                    match body {
                        PendingBody::FieldInit { field, node } => {
                            lowerer.enter(&[], false);
                            lowered.push((t, LoweredBody::FieldInit(field, lowerer.expr(node))));
                        }
                        PendingBody::Getter { property, nodes } => {
                            lowerer.enter(&[], false);
                            lowered.push((t, LoweredBody::Getter(property, lowerer.body(nodes))));
                        }
                        PendingBody::Setter { property, nodes } => {
                            lowerer.enter(&["value".to_string()], false);
                            lowered.push((t, LoweredBody::Setter(property, lowerer.body(nodes))));
                        }
                        PendingBody::Ctor { ctor, params, nodes } => {
                            let body = lower_with_params(&mut lowerer, &params, false, nodes);
                            lowered.push((t, LoweredBody::Ctor(ctor, body)));
                        }
                        PendingBody::Method {
                            method,
                            params,
                            routine,
                            span,
                            nodes,
                        } => {
                            if nodes.is_empty() {
                                let name = &tables.types[t].methods[method].name;
                                lowerer.warn(
                                    "QW0400",
                                    format!("`{name}` has an empty body"),
                                    span,
                                    4,
                                );
                            }
                            let body = lower_with_params(&mut lowerer, &params, routine, nodes);
                            lowered.push((t, LoweredBody::Method(method, body)));
                        }
                    }
                }
            }
        }

        for (t, body) in lowered {
            let ty = &mut self.types[t];
            match body {
                LoweredBody::FieldInit(i, expr) => ty.fields[i].init = Some(expr),
                LoweredBody::Getter(i, body) => ty.properties[i].getter = Some(body),
                LoweredBody::Setter(i, body) => ty.properties[i].setter = Some(body),
                LoweredBody::Ctor(i, body) => ty.constructors[i].body = body,
                LoweredBody::Method(i, body) => ty.methods[i].body = body,
            }
        }
    }

    fn resolve_entry(&mut self, output_kind: OutputKind) {
        let Some(entry) = self.entry_decl.take() else {
            if output_kind == OutputKind::Executable {
                self.diags.error(
                    "QE0112",
                    "executable output requires an `(entry Type)` declaration",
                    "",
                    Span::default(),
                );
            }
            return;
        };
        let resolved = entry
            .node
            .as_atom()
            .and_then(|name| self.lookup_type(name, &entry.namespace));
        match resolved {
            Some(TypeRef::Local(full_name)) => self.entry = Some(full_name),
            _ => self.diags.error(
                "QE0112",
                format!("entry type `{}` is not defined in this module", entry.node),
                entry.file,
                entry.node.span(),
            ),
        }
    }

    fn finish(self, module_name: &str) -> FrontEndOutput {
        let image = if self.diags.has_errors() {
            None
        } else {
            Some(ModuleImage {
                name: module_name.to_string(),
                references: self.used_refs,
                types: self.types,
                entry: self.entry,
                type_refs: self.external.into_iter().collect(),
            })
        };
        let diagnostics = self.diags.into_vec();
        debug!(
            module = module_name,
            success = image.is_some(),
            diagnostics = diagnostics.len(),
            "front end finished"
        );
        FrontEndOutput {
            image,
            symbols: self.symbols,
            diagnostics,
        }
    }
}

/// Lower a constructor or method body, emitting parameter warnings.
fn lower_with_params(
    lowerer: &mut Lowerer<'_>,
    params: &[(String, Span)],
    routine: bool,
    nodes: &[SExpr],
) -> Vec<Expr> {
    let names: Vec<String> = params.iter().map(|(n, _)| n.clone()).collect();
    for (name, span) in params {
        if lowerer.is_field(name) {
            lowerer.warn(
                "QW0200",
                format!("parameter `{name}` shadows a field"),
                *span,
                2,
            );
        }
    }
    lowerer.enter(&names, routine);
    let body = lowerer.body(nodes);
    for unused in lowerer.unused_params() {
        let span = params
            .iter()
            .find(|(n, _)| *n == unused)
            .map(|(_, s)| *s)
            .unwrap_or_default();
        lowerer.warn(
            "QW0300",
            format!("parameter `{unused}` is never used"),
            span,
            3,
        );
    }
    body
}

fn join(namespace: &str, name: &str) -> String {
    if namespace.is_empty() {
        name.to_string()
    } else {
        format!("{namespace}.{name}")
    }
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn is_qualified_identifier(s: &str) -> bool {
    s.split('.').all(is_identifier)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compile(src: &str) -> FrontEndOutput {
        compile_units(
            "QuillModule1",
            &[SourceUnit::new("test.ql", src)],
            &["engine-core".to_string()],
            OutputKind::Library,
        )
    }

    fn codes(out: &FrontEndOutput) -> Vec<&str> {
        out.diagnostics.iter().map(|d| d.code.as_str()).collect()
    }

    #[test]
    fn empty_type_compiles_with_warning() {
        let out = compile("(type Empty)");
        let image = out.image.as_ref().expect("image");
        assert_eq!(image.types.len(), 1);
        assert_eq!(image.types[0].full_name(), "Empty");
        assert_eq!(codes(&out), vec!["QW0100"]);
        assert_eq!(out.diagnostics[0].level, 1);
    }

    #[test]
    fn full_type_compiles() {
        let out = compile(
            r#"
(use "engine-core")
(namespace Game
  (type Player (extends Engine.Component) (attr Game.Meta.Tag "hero")
    (field hp Int 100)
    (field secret String :private)
    (property Title String)
    (property Health Int (get hp) (set (set hp value)))
    (init ((start Int)) (set hp start))
    (method heal ((amount Int)) Int
      (set hp (+ hp amount))
      hp)
    (routine blink ((times Int))
      (set hp times)
      (yield)
      (set hp 0))))
(entry Game.Player)
"#,
        );
        assert!(!out.diagnostics.iter().any(|d| d.is_error()), "{:?}", out.diagnostics);
        let image = out.image.unwrap();
        assert_eq!(image.references, vec!["engine-core"]);
        assert_eq!(image.entry.as_deref(), Some("Game.Player"));
        assert_eq!(
            image.type_refs,
            vec!["Engine.Component".to_string(), "Game.Meta.Tag".to_string()]
        );

        let player = &image.types[0];
        assert_eq!(player.full_name(), "Game.Player");
        assert_eq!(player.fields.len(), 3, "two fields plus one backing field");
        assert!(player.field("__prop_Title").unwrap().synthetic);
        assert_eq!(player.field("secret").unwrap().visibility, Visibility::Private);
        assert_eq!(player.field("hp").unwrap().init, Some(Expr::Literal(Literal::Int(100))));
        assert_eq!(player.constructors.len(), 1);
        assert_eq!(player.method("blink").unwrap().kind, MethodKind::Routine);
        assert_eq!(player.method("blink").unwrap().body[1], Expr::Yield);

        let symbols = &out.symbols;
        assert_eq!(symbols.type_location("Game.Player").unwrap().line, 4);
        assert_eq!(symbols.member_location("Game.Player", "heal").unwrap().line, 10);
    }

    #[test]
    fn cross_unit_references_resolve() {
        let out = compile_units(
            "QuillModule2",
            &[
                SourceUnit::new("a.ql", "(namespace Game (type Weapon (field owner Game.Hero)))"),
                SourceUnit::new("b.ql", "(namespace Game (type Hero (extends Weapon)))"),
            ],
            &[],
            OutputKind::Library,
        );
        let image = out.image.expect("image");
        assert_eq!(
            image.types[0].fields[0].ty,
            TypeRef::Local("Game.Hero".into())
        );
        assert_eq!(image.types[1].base, Some(TypeRef::Local("Game.Weapon".into())));
        assert!(image.type_refs.is_empty());
    }

    #[test]
    fn unknown_reference_is_an_error() {
        let out = compile("(use \"net\") (type A (field x Int))");
        assert!(out.image.is_none());
        assert_eq!(codes(&out), vec!["QE0108"]);
    }

    #[test]
    fn syntax_error_points_at_location() {
        let out = compile("(type A\n  (field x Int)");
        assert!(out.image.is_none());
        let d = &out.diagnostics[0];
        assert_eq!(d.code, "QE0001");
        assert_eq!((d.file.as_str(), d.line, d.column), ("test.ql", 1, 1));
    }

    #[test]
    fn runaway_nesting_is_a_syntax_error() {
        let src = format!("(type A (method f () Int {}1{}))", "(+ 1 ".repeat(5_000), ")".repeat(5_000));
        let out = compile(&src);
        assert!(out.image.is_none());
        assert_eq!(codes(&out), vec!["QE0001"]);
        assert!(out.diagnostics[0].message.contains("nested deeper"));
    }

    #[test]
    fn duplicate_types_and_members() {
        let out = compile("(type A (field x Int) (method x () Int 1)) (type A)");
        let c = codes(&out);
        assert!(c.contains(&"QE0101"));
        assert!(c.contains(&"QE0102"));
    }

    #[test]
    fn invalid_and_cyclic_bases() {
        let out = compile("(type A (extends Host.Thing) (field x Int))");
        assert!(codes(&out).contains(&"QE0106"));

        let out = compile("(type A (extends B) (field x Int)) (type B (extends A) (field y Int))");
        assert_eq!(codes(&out).iter().filter(|c| **c == "QE0107").count(), 2);
    }

    #[test]
    fn unknown_unqualified_type() {
        let out = compile("(type A (field x Widget))");
        assert_eq!(codes(&out), vec!["QE0100"]);
    }

    #[test]
    fn warnings_for_parameters_and_empty_bodies() {
        let out = compile("(type A (field hp Int) (method f ((hp Int) (unused Int)) Unit))");
        assert!(out.image.is_some());
        let c = codes(&out);
        assert!(c.contains(&"QW0200"));
        assert!(c.contains(&"QW0300"));
        assert!(c.contains(&"QW0400"));
        let unused = out
            .diagnostics
            .iter()
            .find(|d| d.code == "QW0300" && d.message.contains("unused"))
            .unwrap();
        assert_eq!(unused.level, 3);
    }

    #[test]
    fn executable_requires_entry() {
        let out = compile_units(
            "QuillModule3",
            &[SourceUnit::new("a.ql", "(type A (field x Int))")],
            &[],
            OutputKind::Executable,
        );
        assert_eq!(codes(&out), vec!["QE0112"]);

        let out = compile("(type A (field x Int)) (entry Missing)");
        assert_eq!(codes(&out), vec!["QE0112"]);
    }

    #[test]
    fn zero_units_yield_empty_image() {
        let out = compile_units("QuillModule4", &[], &[], OutputKind::Library);
        let image = out.image.unwrap();
        assert!(image.types.is_empty());
        assert!(out.diagnostics.is_empty());
    }

    #[test]
    fn relative_names_resolve_innermost_first() {
        let out = compile(
            "(namespace Game (type Item (field x Int)) (namespace Ui (type Slot (field item Item))))",
        );
        let image = out.image.unwrap();
        assert_eq!(image.types[1].full_name(), "Game.Ui.Slot");
        assert_eq!(image.types[1].fields[0].ty, TypeRef::Local("Game.Item".into()));
    }
}
