//! Lowering of method, constructor and property bodies into [`Expr`] trees.
//!
//! Identifiers are resolved here, once: a name is a local (parameter, `let`
//! binding or the setter's `value`), else a field, else a property of the
//! enclosing type or one of its local base types. Anything else is reported
//! as `QE0103`. Method calls are checked for existence, kind and arity.

use std::collections::{HashMap, HashSet};

use crate::diagnostics::Diagnostics;
use crate::image::{
    BinaryOp, Expr, Literal, MethodImage, MethodKind, Place, TypeImage, TypeRef, UnaryOp,
};
use crate::syntax::{SExpr, Span};

/// Read-only view of every type declared in the batch.
#[derive(Clone, Copy)]
pub(crate) struct MemberTables<'s> {
    pub types: &'s [TypeImage],
    pub index: &'s HashMap<String, usize>,
}

impl<'s> MemberTables<'s> {
    /// `idx` followed by its local bases, nearest first.
    pub fn chain(&self, idx: usize) -> Vec<usize> {
        let mut chain = Vec::new();
        let mut current = Some(idx);
        while let Some(i) = current {
            if chain.contains(&i) {
                break;
            }
            chain.push(i);
            current = match &self.types[i].base {
                Some(TypeRef::Local(name)) => self.index.get(name).copied(),
                _ => None,
            };
        }
        chain
    }

    pub fn has_field(&self, idx: usize, name: &str) -> bool {
        self.chain(idx)
            .into_iter()
            .any(|i| self.types[i].field(name).is_some())
    }

    pub fn has_property(&self, idx: usize, name: &str) -> bool {
        self.chain(idx)
            .into_iter()
            .any(|i| self.types[i].property(name).is_some())
    }

    pub fn method(&self, idx: usize, name: &str) -> Option<&'s MethodImage> {
        let types = self.types;
        self.chain(idx).into_iter().find_map(|i| types[i].method(name))
    }
}

/// Lowers the bodies of one type's members.
pub(crate) struct Lowerer<'s> {
    tables: MemberTables<'s>,
    type_idx: usize,
    file: &'s str,
    diags: &'s mut Diagnostics,
    locals: Vec<String>,
    params: Vec<String>,
    used_params: HashSet<String>,
    routine: bool,
}

impl<'s> Lowerer<'s> {
    pub fn new(
        tables: MemberTables<'s>,
        type_idx: usize,
        file: &'s str,
        diags: &'s mut Diagnostics,
    ) -> Self {
        Self {
            tables,
            type_idx,
            file,
            diags,
            locals: Vec::new(),
            params: Vec::new(),
            used_params: HashSet::new(),
            routine: false,
        }
    }

    /// Reset the local scope for a new body.
    pub fn enter(&mut self, params: &[String], routine: bool) {
        self.locals = params.to_vec();
        self.params = params.to_vec();
        self.used_params.clear();
        self.routine = routine;
    }

    /// Parameters of the current body that were never read or assigned.
    pub fn unused_params(&self) -> Vec<String> {
        self.params
            .iter()
            .filter(|p| !self.used_params.contains(*p))
            .cloned()
            .collect()
    }

    /// Whether `name` is a field anywhere on the type's chain.
    pub fn is_field(&self, name: &str) -> bool {
        self.tables.has_field(self.type_idx, name)
    }

    /// Report a warning against the current file.
    pub fn warn(&mut self, code: &str, message: impl Into<String>, span: Span, level: u8) {
        self.diags.warning(code, message, self.file, span, level);
    }

    /// Lower a sequence of top-level statements.
    pub fn body(&mut self, nodes: &[SExpr]) -> Vec<Expr> {
        nodes.iter().map(|n| self.statement(n, true)).collect()
    }

    /// Lower a single expression that is not a top-level statement.
    pub fn expr(&mut self, node: &SExpr) -> Expr {
        self.statement(node, false)
    }

    fn error(&mut self, code: &str, message: impl Into<String>, node: &SExpr) -> Expr {
        self.diags.error(code, message, self.file, node.span());
        Expr::Literal(Literal::Null)
    }

    fn statement(&mut self, node: &SExpr, top_level: bool) -> Expr {
        match node {
            SExpr::Str(s, _) => Expr::Literal(Literal::Str(s.clone())),
            SExpr::Atom(atom, _) => self.atom(atom, node),
            SExpr::List(items, _) => {
                let Some(head) = items.first().and_then(SExpr::as_atom) else {
                    return self.error("QE0111", "expression list must start with a keyword", node);
                };
                let args = &items[1..];
                match head {
                    "set" => self.assign(args, node),
                    "let" => self.let_binding(args, node),
                    "if" => self.if_expr(args, node),
                    "while" => {
                        let Some((cond, body)) = args.split_first() else {
                            return self.error("QE0111", "`while` needs a condition", node);
                        };
                        Expr::While {
                            cond: Box::new(self.expr(cond)),
                            body: body.iter().map(|n| self.expr(n)).collect(),
                        }
                    }
                    "do" => Expr::Block(args.iter().map(|n| self.expr(n)).collect()),
                    "return" => match args {
                        [] => Expr::Return(None),
                        [value] => Expr::Return(Some(Box::new(self.expr(value)))),
                        _ => self.error("QE0111", "`return` takes at most one value", node),
                    },
                    "not" => match args {
                        [operand] => Expr::Unary {
                            op: UnaryOp::Not,
                            operand: Box::new(self.expr(operand)),
                        },
                        _ => self.error("QE0111", "`not` takes exactly one operand", node),
                    },
                    "concat" => Expr::Concat(args.iter().map(|n| self.expr(n)).collect()),
                    "call" => self.call(args, node),
                    "yield" => {
                        if !args.is_empty() {
                            self.error("QE0111", "`yield` takes no operands", node)
                        } else if self.routine && top_level {
                            Expr::Yield
                        } else {
                            self.error(
                                "QE0109",
                                "`yield` is only allowed as a top-level statement of a routine",
                                node,
                            )
                        }
                    }
                    "fail" => match args {
                        [message] => Expr::Fail(Box::new(self.expr(message))),
                        _ => self.error("QE0111", "`fail` takes exactly one message", node),
                    },
                    "-" if args.len() == 1 => Expr::Unary {
                        op: UnaryOp::Neg,
                        operand: Box::new(self.expr(&args[0])),
                    },
                    other => match BinaryOp::from_symbol(other) {
                        Some(op) => match args {
                            [lhs, rhs] => Expr::Binary {
                                op,
                                lhs: Box::new(self.expr(lhs)),
                                rhs: Box::new(self.expr(rhs)),
                            },
                            _ => self.error(
                                "QE0111",
                                format!("operator `{other}` takes exactly two operands"),
                                node,
                            ),
                        },
                        None => self.error("QE0111", format!("unknown form `{other}`"), node),
                    },
                }
            }
        }
    }

    fn atom(&mut self, atom: &str, node: &SExpr) -> Expr {
        if let Some(literal) = parse_literal(atom) {
            return Expr::Literal(literal);
        }
        if atom == "self" {
            return Expr::SelfRef;
        }
        match self.resolve_place(atom) {
            Some(Place::Local(name)) => Expr::Local(name),
            Some(Place::Field(name)) => Expr::Field(name),
            Some(Place::Property(name)) => Expr::Property(name),
            None => self.error("QE0103", format!("unknown identifier `{atom}`"), node),
        }
    }

    fn resolve_place(&mut self, name: &str) -> Option<Place> {
        if self.locals.iter().any(|l| l == name) {
            if self.params.iter().any(|p| p == name) {
                self.used_params.insert(name.to_string());
            }
            return Some(Place::Local(name.to_string()));
        }
        if self.tables.has_field(self.type_idx, name) {
            return Some(Place::Field(name.to_string()));
        }
        if self.tables.has_property(self.type_idx, name) {
            return Some(Place::Property(name.to_string()));
        }
        None
    }

    fn assign(&mut self, args: &[SExpr], node: &SExpr) -> Expr {
        let [target, value] = args else {
            return self.error("QE0111", "`set` takes a target and a value", node);
        };
        let Some(name) = target.as_atom() else {
            return self.error("QE0111", "`set` target must be a name", target);
        };
        let value = self.expr(value);
        match self.resolve_place(name) {
            Some(place) => Expr::Assign {
                target: place,
                value: Box::new(value),
            },
            None => self.error("QE0103", format!("unknown identifier `{name}`"), target),
        }
    }

    fn let_binding(&mut self, args: &[SExpr], node: &SExpr) -> Expr {
        let [name_node, value] = args else {
            return self.error("QE0111", "`let` takes a name and a value", node);
        };
        let Some(name) = name_node.as_atom() else {
            return self.error("QE0111", "`let` name must be an identifier", name_node);
        };
        let value = self.expr(value);
        if !self.locals.iter().any(|l| l == name) {
            self.locals.push(name.to_string());
        }
        Expr::Let {
            name: name.to_string(),
            value: Box::new(value),
        }
    }

    fn if_expr(&mut self, args: &[SExpr], node: &SExpr) -> Expr {
        match args {
            [cond, then] => Expr::If {
                cond: Box::new(self.expr(cond)),
                then: Box::new(self.expr(then)),
                otherwise: None,
            },
            [cond, then, otherwise] => Expr::If {
                cond: Box::new(self.expr(cond)),
                then: Box::new(self.expr(then)),
                otherwise: Some(Box::new(self.expr(otherwise))),
            },
            _ => self.error("QE0111", "`if` takes a condition and one or two branches", node),
        }
    }

    fn call(&mut self, args: &[SExpr], node: &SExpr) -> Expr {
        let Some((name_node, call_args)) = args.split_first() else {
            return self.error("QE0111", "`call` needs a method name", node);
        };
        let Some(name) = name_node.as_atom() else {
            return self.error("QE0111", "method name must be an identifier", name_node);
        };
        let lowered: Vec<Expr> = call_args.iter().map(|n| self.expr(n)).collect();
        let Some(method) = self.tables.method(self.type_idx, name) else {
            let type_name = self.tables.types[self.type_idx].full_name();
            return self.error(
                "QE0104",
                format!("type `{type_name}` has no method `{name}`"),
                name_node,
            );
        };
        if method.kind == MethodKind::Routine {
            return self.error(
                "QE0110",
                format!("`{name}` is a routine and cannot be called directly"),
                node,
            );
        }
        if method.params.len() != lowered.len() {
            let expected = method.params.len();
            return self.error(
                "QE0105",
                format!(
                    "`{name}` expects {expected} argument(s), got {}",
                    lowered.len()
                ),
                node,
            );
        }
        Expr::Call {
            method: name.to_string(),
            args: lowered,
        }
    }
}

/// Parse a literal atom: integers, floats, `true`, `false`, `null`.
pub(crate) fn parse_literal(atom: &str) -> Option<Literal> {
    match atom {
        "true" => return Some(Literal::Bool(true)),
        "false" => return Some(Literal::Bool(false)),
        "null" => return Some(Literal::Null),
        _ => {}
    }
    let numeric = atom
        .strip_prefix('-')
        .unwrap_or(atom)
        .starts_with(|c: char| c.is_ascii_digit());
    if !numeric {
        return None;
    }
    if let Ok(i) = atom.parse::<i64>() {
        return Some(Literal::Int(i));
    }
    atom.parse::<f64>().ok().map(Literal::Float)
}
