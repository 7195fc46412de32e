//! Tree-walking interpreter over lowered module images.
//!
//! Methods dispatch virtually: lookup starts at the object's runtime type and
//! walks its local bases. Routine methods are never run by [`Interpreter::invoke`];
//! they come back as a [`Routine`] the caller drives one step at a time.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::trace;

use crate::error::{RuntimeError, RuntimeResult};
use crate::image::{
    BinaryOp, Expr, FieldImage, Literal, MethodImage, MethodKind, ModuleImage, Place,
    PropertyImage, UnaryOp,
};
use crate::value::{Instance, Value};

/// Default bound on nested evaluation.
///
/// Every script call and every nested expression takes one level, so the
/// bound also caps the native stack the interpreter uses. It fits a 2 MiB
/// thread stack in unoptimized builds.
pub const MAX_EVAL_DEPTH: usize = 192;

/// Result of invoking a method.
#[derive(Debug)]
pub enum Invocation {
    /// A function ran to completion.
    Immediate(Value),
    /// A routine was started and must be driven by the caller.
    Deferred(Routine),
}

/// Non-local exits while evaluating a body.
enum Unwind {
    Return(Value),
    Fault(RuntimeError),
}

impl From<RuntimeError> for Unwind {
    fn from(e: RuntimeError) -> Self {
        Unwind::Fault(e)
    }
}

type Exec<T> = Result<T, Unwind>;

struct Frame {
    this: Instance,
    locals: HashMap<String, Value>,
    /// Level the frame was entered at.
    depth: usize,
    /// Expressions currently being evaluated in this frame.
    nesting: usize,
}

/// Executes script code.
#[derive(Clone, Copy, Debug)]
pub struct Interpreter {
    max_depth: usize,
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new()
    }
}

impl Interpreter {
    pub fn new() -> Self {
        Self {
            max_depth: MAX_EVAL_DEPTH,
        }
    }

    pub fn with_max_depth(max_depth: usize) -> Self {
        Self { max_depth }
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    // ── Construction ─────────────────────────────────────────────────

    /// Run field initializers along the base chain, base first.
    pub fn initialize_fields(&self, target: &Instance) -> RuntimeResult<()> {
        let module = target.module();
        for idx in module.base_chain(target.type_index()).into_iter().rev() {
            for field in &module.types[idx].fields {
                let Some(init) = &field.init else { continue };
                let mut frame = Frame::new(target.clone(), 0);
                let value = self.eval_value(init, &mut frame)?;
                let value = Value::coerce(&field.ty, value, &field_context(field))?;
                target.set_field_raw(&field.name, value);
            }
        }
        Ok(())
    }

    /// Index of the constructor of `type_index` accepting `args`.
    ///
    /// `Ok(None)` selects the implicit default constructor of a type that
    /// declares none.
    pub fn find_constructor(
        &self,
        module: &ModuleImage,
        type_index: usize,
        args: &[Value],
    ) -> RuntimeResult<Option<usize>> {
        let ty = &module.types[type_index];
        if ty.constructors.is_empty() && args.is_empty() {
            return Ok(None);
        }
        ty.constructors
            .iter()
            .position(|c| {
                c.params.len() == args.len()
                    && c.params.iter().zip(args).all(|(p, a)| Value::accepts(&p.ty, a))
            })
            .map(Some)
            .ok_or_else(|| RuntimeError::NoMatchingConstructor {
                type_name: ty.full_name(),
                arity: args.len(),
            })
    }

    /// Allocate and fully construct an object of `type_index`.
    pub fn construct(
        &self,
        module: &Arc<ModuleImage>,
        type_index: usize,
        args: Vec<Value>,
    ) -> RuntimeResult<Instance> {
        let ctor = self.find_constructor(module, type_index, &args)?;
        let target = Instance::allocate(Arc::clone(module), type_index);
        self.initialize_fields(&target)?;
        if let Some(ctor) = ctor {
            let ctor = &module.types[type_index].constructors[ctor];
            let mut frame = Frame::new(target.clone(), 1);
            for (param, arg) in ctor.params.iter().zip(args) {
                let value = Value::coerce(&param.ty, arg, &param_context(&param.name))?;
                frame.locals.insert(param.name.clone(), value);
            }
            self.run_body(&ctor.body, &mut frame)?;
        }
        trace!(type_name = %target.type_name(), "constructed instance");
        Ok(target)
    }

    // ── Members ──────────────────────────────────────────────────────

    /// Invoke `method` on `target` with virtual dispatch.
    pub fn invoke(
        &self,
        target: &Instance,
        method: &str,
        args: Vec<Value>,
    ) -> RuntimeResult<Invocation> {
        self.invoke_at(target, method, args, 0)
    }

    fn invoke_at(
        &self,
        target: &Instance,
        method: &str,
        args: Vec<Value>,
        depth: usize,
    ) -> RuntimeResult<Invocation> {
        target.ensure_alive()?;
        if depth >= self.max_depth {
            return Err(RuntimeError::CallDepthExceeded(self.max_depth));
        }
        let module = target.module();
        let (type_idx, method_idx) = resolve_method(&module, target.type_index(), method)
            .ok_or_else(|| RuntimeError::UnknownMethod {
                type_name: target.type_name(),
                method: method.to_string(),
            })?;
        let image = &module.types[type_idx].methods[method_idx];
        if image.params.len() != args.len() {
            return Err(RuntimeError::ArityMismatch {
                method: method.to_string(),
                expected: image.params.len(),
                found: args.len(),
            });
        }
        let mut frame = Frame::new(target.clone(), depth + 1);
        for (param, arg) in image.params.iter().zip(args) {
            let value = Value::coerce(&param.ty, arg, &param_context(&param.name))?;
            frame.locals.insert(param.name.clone(), value);
        }

        match image.kind {
            MethodKind::Routine => Ok(Invocation::Deferred(Routine {
                interpreter: *self,
                module: Arc::clone(&module),
                type_index: type_idx,
                method_index: method_idx,
                name: method.to_string(),
                frame,
                pc: 0,
                finished: false,
            })),
            MethodKind::Function => {
                let value = self.run_body(&image.body, &mut frame)?;
                let value = Value::coerce(&image.returns, value, &return_context(method))?;
                Ok(Invocation::Immediate(value))
            }
        }
    }

    /// Read a property through its getter or backing field.
    pub fn get_property(&self, target: &Instance, name: &str) -> RuntimeResult<Value> {
        self.get_property_at(target, name, 0)
    }

    fn get_property_at(&self, target: &Instance, name: &str, depth: usize) -> RuntimeResult<Value> {
        target.ensure_alive()?;
        let module = target.module();
        let property = resolve_property(&module, target.type_index(), name).ok_or_else(|| {
            RuntimeError::UnknownProperty {
                type_name: target.type_name(),
                property: name.to_string(),
            }
        })?;
        if let Some(getter) = &property.getter {
            if depth >= self.max_depth {
                return Err(RuntimeError::CallDepthExceeded(self.max_depth));
            }
            let mut frame = Frame::new(target.clone(), depth + 1);
            let value = self.run_body(getter, &mut frame)?;
            return Value::coerce(&property.ty, value, &property_context(name));
        }
        match &property.backing_field {
            Some(backing) => target
                .field(backing)
                .ok_or_else(|| RuntimeError::PropertyNotReadable(name.to_string())),
            None => Err(RuntimeError::PropertyNotReadable(name.to_string())),
        }
    }

    /// Write a property through its setter or backing field.
    pub fn set_property(&self, target: &Instance, name: &str, value: Value) -> RuntimeResult<()> {
        self.set_property_at(target, name, value, 0)
    }

    fn set_property_at(
        &self,
        target: &Instance,
        name: &str,
        value: Value,
        depth: usize,
    ) -> RuntimeResult<()> {
        target.ensure_alive()?;
        let module = target.module();
        let property = resolve_property(&module, target.type_index(), name).ok_or_else(|| {
            RuntimeError::UnknownProperty {
                type_name: target.type_name(),
                property: name.to_string(),
            }
        })?;
        let value = Value::coerce(&property.ty, value, &property_context(name))?;
        if let Some(setter) = &property.setter {
            if depth >= self.max_depth {
                return Err(RuntimeError::CallDepthExceeded(self.max_depth));
            }
            let mut frame = Frame::new(target.clone(), depth + 1);
            frame.locals.insert("value".to_string(), value);
            self.run_body(setter, &mut frame)?;
            return Ok(());
        }
        match &property.backing_field {
            Some(backing) if target.set_field_raw(backing, value) => Ok(()),
            _ => Err(RuntimeError::PropertyNotWritable(name.to_string())),
        }
    }

    /// Read a declared field.
    pub fn get_field(&self, target: &Instance, name: &str) -> RuntimeResult<Value> {
        target.ensure_alive()?;
        target.field(name).ok_or_else(|| RuntimeError::UnknownField {
            type_name: target.type_name(),
            field: name.to_string(),
        })
    }

    /// Write a declared field, converting to its declared type.
    pub fn set_field(&self, target: &Instance, name: &str, value: Value) -> RuntimeResult<()> {
        target.ensure_alive()?;
        let module = target.module();
        let field = resolve_field(&module, target.type_index(), name).ok_or_else(|| {
            RuntimeError::UnknownField {
                type_name: target.type_name(),
                field: name.to_string(),
            }
        })?;
        let value = Value::coerce(&field.ty, value, &field_context(field))?;
        target.set_field_raw(name, value);
        Ok(())
    }

    // ── Evaluation ───────────────────────────────────────────────────

    fn run_body(&self, body: &[Expr], frame: &mut Frame) -> RuntimeResult<Value> {
        let mut last = Value::Null;
        for stmt in body {
            match self.eval(stmt, frame) {
                Ok(value) => last = value,
                Err(Unwind::Return(value)) => return Ok(value),
                Err(Unwind::Fault(e)) => return Err(e),
            }
        }
        Ok(last)
    }

    fn eval_value(&self, expr: &Expr, frame: &mut Frame) -> RuntimeResult<Value> {
        match self.eval(expr, frame) {
            Ok(value) | Err(Unwind::Return(value)) => Ok(value),
            Err(Unwind::Fault(e)) => Err(e),
        }
    }

    fn eval(&self, expr: &Expr, frame: &mut Frame) -> Exec<Value> {
        if frame.level() >= self.max_depth {
            return Err(RuntimeError::CallDepthExceeded(self.max_depth).into());
        }
        frame.nesting += 1;
        let out = self.eval_expr(expr, frame);
        frame.nesting -= 1;
        out
    }

    fn eval_expr(&self, expr: &Expr, frame: &mut Frame) -> Exec<Value> {
        match expr {
            Expr::Literal(lit) => Ok(literal(lit)),
            Expr::SelfRef => Ok(Value::Object(frame.this.clone())),
            Expr::Local(name) => frame
                .locals
                .get(name)
                .cloned()
                .ok_or_else(|| RuntimeError::UnknownLocal(name.clone()).into()),
            Expr::Field(name) => Ok(self.get_field(&frame.this, name)?),
            Expr::Property(name) => Ok(self.get_property_at(&frame.this, name, frame.level())?),
            Expr::Assign { target, value } => {
                let value = self.eval(value, frame)?;
                match target {
                    Place::Local(name) => {
                        frame.locals.insert(name.clone(), value.clone());
                    }
                    Place::Field(name) => self.set_field(&frame.this, name, value.clone())?,
                    Place::Property(name) => {
                        self.set_property_at(&frame.this, name, value.clone(), frame.level())?
                    }
                }
                Ok(value)
            }
            Expr::Let { name, value } => {
                let value = self.eval(value, frame)?;
                frame.locals.insert(name.clone(), value);
                Ok(Value::Null)
            }
            Expr::If {
                cond,
                then,
                otherwise,
            } => {
                if self.condition(cond, frame, "if")? {
                    self.eval(then, frame)
                } else if let Some(otherwise) = otherwise {
                    self.eval(otherwise, frame)
                } else {
                    Ok(Value::Null)
                }
            }
            Expr::While { cond, body } => {
                while self.condition(cond, frame, "while")? {
                    for stmt in body {
                        self.eval(stmt, frame)?;
                    }
                }
                Ok(Value::Null)
            }
            Expr::Block(items) => {
                let mut last = Value::Null;
                for item in items {
                    last = self.eval(item, frame)?;
                }
                Ok(last)
            }
            Expr::Return(value) => {
                let value = match value {
                    Some(v) => self.eval(v, frame)?,
                    None => Value::Null,
                };
                Err(Unwind::Return(value))
            }
            Expr::Binary { op, lhs, rhs } => self.binary(*op, lhs, rhs, frame),
            Expr::Unary { op, operand } => {
                let value = self.eval(operand, frame)?;
                Ok(unary(*op, value)?)
            }
            Expr::Concat(parts) => {
                let mut out = String::new();
                for part in parts {
                    out.push_str(&self.eval(part, frame)?.to_string());
                }
                Ok(Value::Str(out))
            }
            Expr::Call { method, args } => {
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    values.push(self.eval(arg, frame)?);
                }
                match self.invoke_at(&frame.this, method, values, frame.level())? {
                    Invocation::Immediate(value) => Ok(value),
                    Invocation::Deferred(_) => {
                        Err(RuntimeError::RoutineCalledDirectly(method.clone()).into())
                    }
                }
            }
            Expr::Yield => Err(RuntimeError::Failed("`yield` outside a routine step".into()).into()),
            Expr::Fail(message) => {
                let message = self.eval(message, frame)?;
                Err(RuntimeError::Failed(message.to_string()).into())
            }
        }
    }

    fn condition(&self, cond: &Expr, frame: &mut Frame, context: &str) -> Exec<bool> {
        match self.eval(cond, frame)? {
            Value::Bool(b) => Ok(b),
            other => Err(RuntimeError::TypeMismatch {
                context: format!("`{context}` condition"),
                expected: "Bool".into(),
                found: other.type_label(),
            }
            .into()),
        }
    }

    fn binary(&self, op: BinaryOp, lhs: &Expr, rhs: &Expr, frame: &mut Frame) -> Exec<Value> {
        if matches!(op, BinaryOp::And | BinaryOp::Or) {
            let context = if op == BinaryOp::And { "and" } else { "or" };
            let left = self.condition(lhs, frame, context)?;
            if (op == BinaryOp::And) != left {
                return Ok(Value::Bool(left));
            }
            return Ok(Value::Bool(self.condition(rhs, frame, context)?));
        }
        let left = self.eval(lhs, frame)?;
        let right = self.eval(rhs, frame)?;
        Ok(arithmetic(op, left, right)?)
    }
}

// ── Routines ─────────────────────────────────────────────────────────

/// Outcome of one routine step.
#[derive(Debug, PartialEq)]
pub enum RoutineStep {
    /// The routine reached a `yield`; resume it on a later step.
    Yielded,
    /// The routine ran to its end.
    Completed(Value),
}

/// A started routine method, resumable one segment at a time.
///
/// A segment is the run of top-level statements between two `yield`s.
pub struct Routine {
    interpreter: Interpreter,
    module: Arc<ModuleImage>,
    type_index: usize,
    method_index: usize,
    name: String,
    frame: Frame,
    pc: usize,
    finished: bool,
}

impl Routine {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The object the routine runs on.
    pub fn target(&self) -> &Instance {
        &self.frame.this
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Run the next segment.
    pub fn resume(&mut self) -> RuntimeResult<RoutineStep> {
        if self.finished {
            return Err(RuntimeError::RoutineFinished(self.name.clone()));
        }
        if let Err(e) = self.frame.this.ensure_alive() {
            self.finished = true;
            return Err(e);
        }
        let module = Arc::clone(&self.module);
        let body = &module.types[self.type_index].methods[self.method_index].body;
        while let Some(stmt) = body.get(self.pc) {
            self.pc += 1;
            if matches!(stmt, Expr::Yield) {
                return Ok(RoutineStep::Yielded);
            }
            match self.interpreter.eval(stmt, &mut self.frame) {
                Ok(_) => {}
                Err(Unwind::Return(value)) => {
                    self.finished = true;
                    return Ok(RoutineStep::Completed(value));
                }
                Err(Unwind::Fault(e)) => {
                    self.finished = true;
                    return Err(e);
                }
            }
        }
        self.finished = true;
        Ok(RoutineStep::Completed(Value::Null))
    }

    /// Drive the routine to completion, returning the number of yields.
    pub fn run_to_end(&mut self) -> RuntimeResult<(usize, Value)> {
        let mut yields = 0;
        loop {
            match self.resume()? {
                RoutineStep::Yielded => yields += 1,
                RoutineStep::Completed(value) => return Ok((yields, value)),
            }
        }
    }
}

impl std::fmt::Debug for Routine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Routine")
            .field("name", &self.name)
            .field("pc", &self.pc)
            .field("finished", &self.finished)
            .finish()
    }
}

// ── Helpers ──────────────────────────────────────────────────────────

impl Frame {
    fn new(this: Instance, depth: usize) -> Self {
        Self {
            this,
            locals: HashMap::new(),
            depth,
            nesting: 0,
        }
    }

    fn level(&self) -> usize {
        self.depth + self.nesting
    }
}

/// Find `name` on the chain of `type_index`, runtime type first.
fn resolve_method(module: &ModuleImage, type_index: usize, name: &str) -> Option<(usize, usize)> {
    module.base_chain(type_index).into_iter().find_map(|t| {
        module.types[t]
            .methods
            .iter()
            .position(|m: &MethodImage| m.name == name)
            .map(|m| (t, m))
    })
}

fn resolve_property<'m>(
    module: &'m ModuleImage,
    type_index: usize,
    name: &str,
) -> Option<&'m PropertyImage> {
    module
        .base_chain(type_index)
        .into_iter()
        .find_map(|t| module.types[t].property(name))
}

fn resolve_field<'m>(
    module: &'m ModuleImage,
    type_index: usize,
    name: &str,
) -> Option<&'m FieldImage> {
    module
        .base_chain(type_index)
        .into_iter()
        .find_map(|t| module.types[t].field(name))
}

fn literal(lit: &Literal) -> Value {
    match lit {
        Literal::Null => Value::Null,
        Literal::Bool(b) => Value::Bool(*b),
        Literal::Int(i) => Value::Int(*i),
        Literal::Float(x) => Value::Float(*x),
        Literal::Str(s) => Value::Str(s.clone()),
    }
}

fn unary(op: UnaryOp, value: Value) -> RuntimeResult<Value> {
    match (op, value) {
        (UnaryOp::Neg, Value::Int(i)) => i.checked_neg().map(Value::Int).ok_or(RuntimeError::Overflow),
        (UnaryOp::Neg, Value::Float(x)) => Ok(Value::Float(-x)),
        (UnaryOp::Not, Value::Bool(b)) => Ok(Value::Bool(!b)),
        (op, other) => Err(RuntimeError::TypeMismatch {
            context: format!("{op:?}"),
            expected: if op == UnaryOp::Not { "Bool" } else { "Int or Float" }.into(),
            found: other.type_label(),
        }),
    }
}

fn arithmetic(op: BinaryOp, left: Value, right: Value) -> RuntimeResult<Value> {
    use BinaryOp::*;
    match op {
        Eq => return Ok(Value::Bool(left == right)),
        Ne => return Ok(Value::Bool(left != right)),
        _ => {}
    }
    let mismatch = |left: &Value, right: &Value| RuntimeError::TypeMismatch {
        context: format!("{op:?}"),
        expected: "matching numeric or string operands".into(),
        found: format!("{} and {}", left.type_label(), right.type_label()),
    };
    match (&left, &right) {
        (Value::Int(a), Value::Int(b)) => {
            let (a, b) = (*a, *b);
            let checked = match op {
                Add => a.checked_add(b),
                Sub => a.checked_sub(b),
                Mul => a.checked_mul(b),
                Div | Rem if b == 0 => return Err(RuntimeError::DivisionByZero),
                Div => a.checked_div(b),
                Rem => a.checked_rem(b),
                Lt => return Ok(Value::Bool(a < b)),
                Le => return Ok(Value::Bool(a <= b)),
                Gt => return Ok(Value::Bool(a > b)),
                Ge => return Ok(Value::Bool(a >= b)),
                _ => return Err(mismatch(&left, &right)),
            };
            checked.map(Value::Int).ok_or(RuntimeError::Overflow)
        }
        (Value::Str(a), Value::Str(b)) => match op {
            Add => Ok(Value::Str(format!("{a}{b}"))),
            Lt => Ok(Value::Bool(a < b)),
            Le => Ok(Value::Bool(a <= b)),
            Gt => Ok(Value::Bool(a > b)),
            Ge => Ok(Value::Bool(a >= b)),
            _ => Err(mismatch(&left, &right)),
        },
        _ => {
            let (Some(a), Some(b)) = (numeric(&left), numeric(&right)) else {
                return Err(mismatch(&left, &right));
            };
            match op {
                Add => Ok(Value::Float(a + b)),
                Sub => Ok(Value::Float(a - b)),
                Mul => Ok(Value::Float(a * b)),
                Div | Rem if b == 0.0 => Err(RuntimeError::DivisionByZero),
                Div => Ok(Value::Float(a / b)),
                Rem => Ok(Value::Float(a % b)),
                Lt => Ok(Value::Bool(a < b)),
                Le => Ok(Value::Bool(a <= b)),
                Gt => Ok(Value::Bool(a > b)),
                Ge => Ok(Value::Bool(a >= b)),
                _ => Err(mismatch(&left, &right)),
            }
        }
    }
}

fn numeric(value: &Value) -> Option<f64> {
    match value {
        Value::Int(_) | Value::Float(_) => value.as_float(),
        _ => None,
    }
}

fn field_context(field: &FieldImage) -> String {
    format!("field `{}`", field.name)
}

fn param_context(name: &str) -> String {
    format!("parameter `{name}`")
}

fn property_context(name: &str) -> String {
    format!("property `{name}`")
}

fn return_context(method: &str) -> String {
    format!("return value of `{method}`")
}
