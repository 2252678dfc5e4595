//! Async tree-walking interpreter
//!
//! Every evaluation step returns a boxed local future so that script code can
//! suspend at `await`, at native calls like `sleep`, and at periodic yields.
//! A thrown script value travels as the `Err` side of `Result<_, Value>`.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::{Rc, Weak};

use futures_util::future::LocalBoxFuture;

use super::ast::*;
use super::builtins;
use super::value::{Function, FunctionKind, PromiseState, Props, Value};

/// Nested calls beyond this depth throw a RangeError
const MAX_CALL_DEPTH: usize = 200;

/// Largest length an array may grow to through index or `length` writes
pub const MAX_ARRAY_LENGTH: usize = 1 << 24;

pub type Env = Rc<Scope>;

/// One lexical scope
pub struct Scope {
    vars: RefCell<HashMap<String, Binding>>,
    parent: Option<Env>,
}

struct Binding {
    value: Value,
    mutable: bool,
}

enum AssignError {
    Undeclared,
    Constant,
}

impl Scope {
    pub fn new(parent: Option<Env>) -> Env {
        Rc::new(Self {
            vars: RefCell::new(HashMap::new()),
            parent,
        })
    }

    pub fn declare(&self, name: &str, value: Value, mutable: bool) {
        self.vars
            .borrow_mut()
            .insert(name.to_string(), Binding { value, mutable });
    }

    pub fn lookup(&self, name: &str) -> Option<Value> {
        let mut scope = self;
        loop {
            if let Some(binding) = scope.vars.borrow().get(name) {
                return Some(binding.value.clone());
            }
            scope = scope.parent.as_deref()?;
        }
    }

    fn assign(&self, name: &str, value: Value) -> Result<(), AssignError> {
        let mut scope = self;
        loop {
            if let Some(binding) = scope.vars.borrow_mut().get_mut(name) {
                if !binding.mutable {
                    return Err(AssignError::Constant);
                }
                binding.value = value;
                return Ok(());
            }
            scope = scope.parent.as_deref().ok_or(AssignError::Undeclared)?;
        }
    }

    /// Fresh scope for the next loop iteration carrying the current bindings
    fn next_iteration(&self) -> Env {
        let vars = self
            .vars
            .borrow()
            .iter()
            .map(|(k, b)| {
                (
                    k.clone(),
                    Binding {
                        value: b.value.clone(),
                        mutable: b.mutable,
                    },
                )
            })
            .collect();
        Rc::new(Self {
            vars: RefCell::new(vars),
            parent: self.parent.clone(),
        })
    }

    fn clear_chain(&self) {
        let mut scope = Some(self);
        while let Some(current) = scope {
            current.vars.borrow_mut().clear();
            scope = current.parent.as_deref();
        }
    }
}

/// Completion of a statement
enum Flow {
    Normal,
    Return(Value),
    Break,
    Continue,
}

type Completion = Result<Flow, Value>;
type Eval = Result<Value, Value>;

/// Shared handle to one interpreter instance
#[derive(Clone)]
pub struct Interp {
    inner: Rc<Inner>,
}

struct Inner {
    globals: Env,
    yield_interval: u32,
    steps: Cell<u32>,
    depth: Cell<usize>,
    /// Scopes captured by closures, cleared on dispose to break `Rc` cycles
    captured: RefCell<Vec<Weak<Scope>>>,
}

/// Decrements the call depth when a call returns or its future is dropped
struct DepthGuard<'a>(&'a Cell<usize>);

impl Drop for DepthGuard<'_> {
    fn drop(&mut self) {
        self.0.set(self.0.get().saturating_sub(1));
    }
}

impl Interp {
    /// Create an interpreter with the language globals installed.
    ///
    /// `yield_interval` is the number of steps between cooperative yields
    /// to the async runtime (0 disables yielding).
    pub fn new(yield_interval: u32) -> Self {
        let interp = Self {
            inner: Rc::new(Inner {
                globals: Scope::new(None),
                yield_interval,
                steps: Cell::new(0),
                depth: Cell::new(0),
                captured: RefCell::new(Vec::new()),
            }),
        };
        builtins::install(&interp);
        interp
    }

    pub fn define_global(&self, name: &str, value: Value) {
        self.inner.globals.declare(name, value, false);
    }

    pub fn global(&self, name: &str) -> Option<Value> {
        self.inner.globals.lookup(name)
    }

    /// Execute a program at global scope
    pub async fn run(&self, program: &Program) -> Result<(), Value> {
        let globals = self.inner.globals.clone();
        self.exec_block(&program.body, &globals).await.map(|_| ())
    }

    /// Call a function value. Returns an owned future so callers can store
    /// or race it.
    pub fn call_function(&self, callee: Value, this: Value, args: Vec<Value>) -> LocalBoxFuture<'static, Eval> {
        let interp = self.clone();
        Box::pin(async move { interp.invoke(callee, this, args).await })
    }

    /// `await` semantics: unwrap a settled promise, never resume on a
    /// pending one, pass other values through
    pub async fn settle(&self, value: Value) -> Eval {
        if let Value::Promise(state) = &value {
            let settled = match &*state.borrow() {
                PromiseState::Fulfilled(v) => Some(Ok(v.clone())),
                PromiseState::Rejected(e) => Some(Err(e.clone())),
                PromiseState::Pending => None,
            };
            return match settled {
                Some(outcome) => outcome,
                None => std::future::pending().await,
            };
        }
        Ok(value)
    }

    /// Drop every binding reachable from globals and captured scopes
    pub fn dispose(&self) {
        let captured = std::mem::take(&mut *self.inner.captured.borrow_mut());
        for scope in captured.iter().filter_map(Weak::upgrade) {
            scope.clear_chain();
        }
        self.inner.globals.clear_chain();
    }

    fn enter(&self) -> Result<DepthGuard<'_>, Value> {
        let depth = self.inner.depth.get();
        if depth >= MAX_CALL_DEPTH {
            return Err(range_error("Maximum call stack size exceeded"));
        }
        self.inner.depth.set(depth + 1);
        Ok(DepthGuard(&self.inner.depth))
    }

    async fn tick(&self) {
        let steps = self.inner.steps.get().wrapping_add(1);
        self.inner.steps.set(steps);
        let interval = self.inner.yield_interval;
        if interval > 0 && steps % interval == 0 {
            tokio::task::yield_now().await;
        }
    }

    async fn invoke(&self, callee: Value, this: Value, args: Vec<Value>) -> Eval {
        let func = match callee {
            Value::Function(func) => func,
            other => return Err(type_error(&format!("{} is not a function", other.inspect()))),
        };
        let _guard = self.enter()?;
        self.tick().await;

        match &func.kind {
            FunctionKind::Native(native) => native(self.clone(), this, args).await,
            FunctionKind::Script { def, env } => {
                let scope = Scope::new(Some(env.clone()));
                for (i, param) in def.params.iter().enumerate() {
                    let arg = args.get(i).cloned().unwrap_or(Value::Undefined);
                    scope.declare(param, arg, true);
                }
                let outcome = match &def.body {
                    FunctionBody::Expr(expr) => self.eval(expr, &scope).await,
                    FunctionBody::Block(body) => match self.exec_block(body, &scope).await {
                        Ok(Flow::Return(v)) => Ok(v),
                        Ok(_) => Ok(Value::Undefined),
                        Err(thrown) => Err(thrown),
                    },
                };
                if def.is_async {
                    Ok(Value::settled(outcome))
                } else {
                    outcome
                }
            }
        }
    }

    fn closure(&self, def: &Rc<FunctionDef>, env: &Env, name_hint: Option<&str>) -> Value {
        self.inner.captured.borrow_mut().push(Rc::downgrade(env));
        let name = def
            .name
            .as_deref()
            .or(name_hint)
            .unwrap_or_default()
            .to_string();
        Value::Function(Rc::new(Function {
            name,
            kind: FunctionKind::Script {
                def: def.clone(),
                env: env.clone(),
            },
            constructable: false,
            props: RefCell::new(Props::default()),
        }))
    }

    // ========================================================================
    // Statements
    // ========================================================================

    fn exec_block<'a>(&'a self, stmts: &'a [Stmt], env: &'a Env) -> LocalBoxFuture<'a, Completion> {
        Box::pin(async move {
            for stmt in stmts {
                if let Stmt::Function(def) = stmt {
                    if let Some(name) = &def.name {
                        let value = self.closure(def, env, None);
                        env.declare(name, value, true);
                    }
                }
            }
            for stmt in stmts {
                match self.exec(stmt, env).await? {
                    Flow::Normal => {}
                    other => return Ok(other),
                }
            }
            Ok(Flow::Normal)
        })
    }

    fn exec<'a>(&'a self, stmt: &'a Stmt, env: &'a Env) -> LocalBoxFuture<'a, Completion> {
        Box::pin(async move {
            self.tick().await;
            match stmt {
                Stmt::Decl { kind, bindings } => {
                    for (name, init) in bindings {
                        let value = match init {
                            Some(Expr::Function(def)) => self.closure(def, env, Some(name.as_str())),
                            Some(expr) => self.eval(expr, env).await?,
                            None => Value::Undefined,
                        };
                        env.declare(name, value, *kind != DeclKind::Const);
                    }
                    Ok(Flow::Normal)
                }
                Stmt::Function(_) | Stmt::Empty => Ok(Flow::Normal),
                Stmt::Expr(expr) => {
                    self.eval(expr, env).await?;
                    Ok(Flow::Normal)
                }
                Stmt::If {
                    cond,
                    then,
                    otherwise,
                } => {
                    if self.eval(cond, env).await?.is_truthy() {
                        self.exec(then, env).await
                    } else if let Some(otherwise) = otherwise {
                        self.exec(otherwise, env).await
                    } else {
                        Ok(Flow::Normal)
                    }
                }
                Stmt::While { cond, body } => {
                    while self.eval(cond, env).await?.is_truthy() {
                        match self.exec(body, env).await? {
                            Flow::Break => break,
                            Flow::Return(v) => return Ok(Flow::Return(v)),
                            Flow::Normal | Flow::Continue => {}
                        }
                    }
                    Ok(Flow::Normal)
                }
                Stmt::For {
                    init,
                    cond,
                    update,
                    body,
                } => {
                    let mut scope = Scope::new(Some(env.clone()));
                    if let Some(init) = init {
                        self.exec(init, &scope).await?;
                    }
                    loop {
                        self.tick().await;
                        if let Some(cond) = cond {
                            if !self.eval(cond, &scope).await?.is_truthy() {
                                break;
                            }
                        }
                        match self.exec(body, &scope).await? {
                            Flow::Break => break,
                            Flow::Return(v) => return Ok(Flow::Return(v)),
                            Flow::Normal | Flow::Continue => {}
                        }
                        scope = scope.next_iteration();
                        if let Some(update) = update {
                            self.eval(update, &scope).await?;
                        }
                    }
                    Ok(Flow::Normal)
                }
                Stmt::ForOf {
                    kind,
                    name,
                    iterable,
                    body,
                } => {
                    let items = match self.eval(iterable, env).await? {
                        Value::Array(items) => items.borrow().clone(),
                        Value::Str(s) => s.chars().map(|c| Value::from(c.to_string())).collect(),
                        other => {
                            return Err(type_error(&format!("{} is not iterable", other.inspect())))
                        }
                    };
                    for item in items {
                        let scope = Scope::new(Some(env.clone()));
                        scope.declare(name, item, *kind != DeclKind::Const);
                        match self.exec(body, &scope).await? {
                            Flow::Break => break,
                            Flow::Return(v) => return Ok(Flow::Return(v)),
                            Flow::Normal | Flow::Continue => {}
                        }
                    }
                    Ok(Flow::Normal)
                }
                Stmt::Block(body) => {
                    let scope = Scope::new(Some(env.clone()));
                    self.exec_block(body, &scope).await
                }
                Stmt::Return(value) => {
                    let value = match value {
                        Some(expr) => self.eval(expr, env).await?,
                        None => Value::Undefined,
                    };
                    Ok(Flow::Return(value))
                }
                Stmt::Throw(expr) => Err(self.eval(expr, env).await?),
                Stmt::Try {
                    block,
                    param,
                    handler,
                    finalizer,
                } => {
                    let scope = Scope::new(Some(env.clone()));
                    let result = match (self.exec_block(block, &scope).await, handler) {
                        (Err(thrown), Some(handler)) => {
                            let scope = Scope::new(Some(env.clone()));
                            if let Some(param) = param {
                                scope.declare(param, thrown, true);
                            }
                            self.exec_block(handler, &scope).await
                        }
                        (result, _) => result,
                    };

                    if let Some(finalizer) = finalizer {
                        let scope = Scope::new(Some(env.clone()));
                        match self.exec_block(finalizer, &scope).await? {
                            Flow::Normal => {}
                            other => return Ok(other),
                        }
                    }
                    result
                }
                Stmt::Break => Ok(Flow::Break),
                Stmt::Continue => Ok(Flow::Continue),
            }
        })
    }

    // ========================================================================
    // Expressions
    // ========================================================================

    fn eval<'a>(&'a self, expr: &'a Expr, env: &'a Env) -> LocalBoxFuture<'a, Eval> {
        Box::pin(async move {
            match expr {
                Expr::Number(n) => Ok(Value::Number(*n)),
                Expr::Str(s) => Ok(Value::Str(s.clone())),
                Expr::Bool(b) => Ok(Value::Bool(*b)),
                Expr::Null => Ok(Value::Null),
                Expr::Undefined => Ok(Value::Undefined),
                Expr::Ident(name) => env
                    .lookup(name)
                    .ok_or_else(|| reference_error(&format!("{} is not defined", name))),
                Expr::Array(elements) => {
                    let mut items = Vec::with_capacity(elements.len());
                    for element in elements {
                        items.push(self.eval(element, env).await?);
                    }
                    Ok(Value::array(items))
                }
                Expr::Object(props) => {
                    let mut values = Vec::with_capacity(props.len());
                    for (key, value) in props {
                        let value = match value {
                            Expr::Function(def) => self.closure(def, env, Some(key.as_str())),
                            other => self.eval(other, env).await?,
                        };
                        values.push((key.clone(), value));
                    }
                    Ok(Value::object(values))
                }
                Expr::Function(def) => Ok(self.closure(def, env, None)),
                Expr::Unary(UnaryOp::Typeof, operand) => {
                    if let Expr::Ident(name) = operand.as_ref() {
                        if env.lookup(name).is_none() {
                            return Ok(Value::str("undefined"));
                        }
                    }
                    Ok(Value::str(self.eval(operand, env).await?.type_of()))
                }
                Expr::Unary(op, operand) => {
                    let value = self.eval(operand, env).await?;
                    Ok(match op {
                        UnaryOp::Not => Value::Bool(!value.is_truthy()),
                        UnaryOp::Neg => Value::Number(-value.to_number()),
                        UnaryOp::Plus | UnaryOp::Typeof => Value::Number(value.to_number()),
                    })
                }
                Expr::Update {
                    increment,
                    prefix,
                    target,
                } => {
                    let old = self.eval(target, env).await?.to_number();
                    let new = if *increment { old + 1.0 } else { old - 1.0 };
                    self.assign_to(target, Value::Number(new), env).await?;
                    Ok(Value::Number(if *prefix { new } else { old }))
                }
                Expr::Binary(op, left, right) => {
                    let left = self.eval(left, env).await?;
                    let right = self.eval(right, env).await?;
                    Ok(binary_op(*op, &left, &right))
                }
                Expr::Logical(op, left, right) => {
                    let left = self.eval(left, env).await?;
                    let short_circuit = match op {
                        LogicalOp::And => !left.is_truthy(),
                        LogicalOp::Or => left.is_truthy(),
                        LogicalOp::Nullish => !left.is_nullish(),
                    };
                    if short_circuit {
                        Ok(left)
                    } else {
                        self.eval(right, env).await
                    }
                }
                Expr::Conditional(cond, then, otherwise) => {
                    if self.eval(cond, env).await?.is_truthy() {
                        self.eval(then, env).await
                    } else {
                        self.eval(otherwise, env).await
                    }
                }
                Expr::Assign { op, target, value } => {
                    let value = match (op, value.as_ref(), target.as_ref()) {
                        (AssignOp::Assign, Expr::Function(def), Expr::Ident(name)) => {
                            self.closure(def, env, Some(name.as_str()))
                        }
                        (AssignOp::Assign, value, _) => self.eval(value, env).await?,
                        (op, value, target) => {
                            let current = self.eval(target, env).await?;
                            let rhs = self.eval(value, env).await?;
                            let op = match op {
                                AssignOp::Add => BinaryOp::Add,
                                AssignOp::Sub => BinaryOp::Sub,
                                AssignOp::Mul => BinaryOp::Mul,
                                AssignOp::Div | AssignOp::Assign => BinaryOp::Div,
                            };
                            binary_op(op, &current, &rhs)
                        }
                    };
                    self.assign_to(target, value.clone(), env).await?;
                    Ok(value)
                }
                Expr::Member(object, name) => {
                    let object = self.eval(object, env).await?;
                    get_property(&object, name)
                }
                Expr::Index(object, index) => {
                    let object = self.eval(object, env).await?;
                    let key = self.eval(index, env).await?;
                    get_property(&object, &property_key(&key))
                }
                Expr::Call(callee, args) => {
                    let (function, this) = match callee.as_ref() {
                        Expr::Member(object, name) => {
                            let object = self.eval(object, env).await?;
                            (get_property(&object, name)?, object)
                        }
                        Expr::Index(object, index) => {
                            let object = self.eval(object, env).await?;
                            let key = self.eval(index, env).await?;
                            (get_property(&object, &property_key(&key))?, object)
                        }
                        other => (self.eval(other, env).await?, Value::Undefined),
                    };
                    if !matches!(function, Value::Function(_)) {
                        return Err(type_error(&format!("{} is not a function", describe_callee(callee))));
                    }
                    let args = self.eval_args(args, env).await?;
                    self.invoke(function, this, args).await
                }
                Expr::New(callee, args) => {
                    let function = self.eval(callee, env).await?;
                    match &function {
                        Value::Function(f) if f.constructable => {}
                        _ => {
                            return Err(type_error(&format!(
                                "{} is not a constructor",
                                describe_callee(callee)
                            )))
                        }
                    }
                    let args = self.eval_args(args, env).await?;
                    self.invoke(function, Value::Undefined, args).await
                }
                Expr::Await(operand) => {
                    let value = self.eval(operand, env).await?;
                    self.settle(value).await
                }
            }
        })
    }

    async fn eval_args(&self, args: &[Expr], env: &Env) -> Result<Vec<Value>, Value> {
        let mut values = Vec::with_capacity(args.len());
        for arg in args {
            values.push(self.eval(arg, env).await?);
        }
        Ok(values)
    }

    async fn assign_to(&self, target: &Expr, value: Value, env: &Env) -> Result<(), Value> {
        match target {
            Expr::Ident(name) => env.assign(name, value).map_err(|e| match e {
                AssignError::Undeclared => reference_error(&format!("{} is not defined", name)),
                AssignError::Constant => type_error("Assignment to constant variable."),
            }),
            Expr::Member(object, name) => {
                let object = self.eval(object, env).await?;
                set_property(&object, name, value)
            }
            Expr::Index(object, index) => {
                let object = self.eval(object, env).await?;
                let key = self.eval(index, env).await?;
                set_property(&object, &property_key(&key), value)
            }
            _ => Err(reference_error("Invalid assignment target")),
        }
    }
}

// ============================================================================
// Operators and property access
// ============================================================================

fn binary_op(op: BinaryOp, left: &Value, right: &Value) -> Value {
    let numeric = |v: &Value| {
        matches!(
            v,
            Value::Number(_) | Value::Bool(_) | Value::Null | Value::Undefined
        )
    };
    match op {
        BinaryOp::Add if numeric(left) && numeric(right) => {
            Value::Number(left.to_number() + right.to_number())
        }
        BinaryOp::Add => Value::from(format!("{}{}", left.to_js_string(), right.to_js_string())),
        BinaryOp::Sub => Value::Number(left.to_number() - right.to_number()),
        BinaryOp::Mul => Value::Number(left.to_number() * right.to_number()),
        BinaryOp::Div => Value::Number(left.to_number() / right.to_number()),
        BinaryOp::Mod => Value::Number(left.to_number() % right.to_number()),
        BinaryOp::Lt | BinaryOp::LtEq | BinaryOp::Gt | BinaryOp::GtEq => {
            let ordering = match (left, right) {
                (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
                _ => left.to_number().partial_cmp(&right.to_number()),
            };
            let Some(ordering) = ordering else {
                return Value::Bool(false);
            };
            Value::Bool(match op {
                BinaryOp::Lt => ordering.is_lt(),
                BinaryOp::LtEq => ordering.is_le(),
                BinaryOp::Gt => ordering.is_gt(),
                _ => ordering.is_ge(),
            })
        }
        BinaryOp::StrictEq => Value::Bool(left.strict_equals(right)),
        BinaryOp::StrictNotEq => Value::Bool(!left.strict_equals(right)),
        BinaryOp::LooseEq => Value::Bool(left.loose_equals(right)),
        BinaryOp::LooseNotEq => Value::Bool(!left.loose_equals(right)),
    }
}

fn property_key(key: &Value) -> String {
    match key {
        Value::Number(n) if n.fract() == 0.0 && *n >= 0.0 => format!("{}", *n as u64),
        other => other.to_js_string(),
    }
}

/// Read a property, resolving built-in array and string methods
pub fn get_property(object: &Value, key: &str) -> Eval {
    match object {
        Value::Undefined | Value::Null => Err(type_error(&format!(
            "Cannot read properties of {} (reading '{}')",
            object, key
        ))),
        Value::Array(items) => {
            if key == "length" {
                return Ok(Value::Number(items.borrow().len() as f64));
            }
            if let Ok(index) = key.parse::<usize>() {
                return Ok(items.borrow().get(index).cloned().unwrap_or(Value::Undefined));
            }
            Ok(builtins::array_method(key).unwrap_or(Value::Undefined))
        }
        Value::Str(s) => {
            if key == "length" {
                return Ok(Value::Number(s.chars().count() as f64));
            }
            if let Ok(index) = key.parse::<usize>() {
                return Ok(s
                    .chars()
                    .nth(index)
                    .map(|c| Value::from(c.to_string()))
                    .unwrap_or(Value::Undefined));
            }
            Ok(builtins::string_method(key).unwrap_or(Value::Undefined))
        }
        Value::Object(obj) => Ok(obj.props.borrow().get(key).unwrap_or(Value::Undefined)),
        Value::Function(f) => {
            if key == "name" {
                return Ok(Value::str(&f.name));
            }
            Ok(f.props.borrow().get(key).unwrap_or(Value::Undefined))
        }
        Value::Bool(_) | Value::Number(_) | Value::Promise(_) => Ok(Value::Undefined),
    }
}

/// Write a property on an object, array or function
pub fn set_property(object: &Value, key: &str, value: Value) -> Result<(), Value> {
    match object {
        Value::Object(obj) => {
            obj.props.borrow_mut().set(key, value);
            Ok(())
        }
        Value::Function(f) => {
            f.props.borrow_mut().set(key, value);
            Ok(())
        }
        Value::Array(items) => {
            let mut items = items.borrow_mut();
            if key == "length" {
                let len = value.to_number();
                if len.fract() != 0.0 || len < 0.0 || len > MAX_ARRAY_LENGTH as f64 {
                    return Err(range_error("Invalid array length"));
                }
                items.resize(len as usize, Value::Undefined);
                return Ok(());
            }
            let Ok(index) = key.parse::<usize>() else {
                return Err(type_error(&format!("Cannot set property '{}' on an array", key)));
            };
            if index >= items.len() {
                if index >= MAX_ARRAY_LENGTH {
                    return Err(range_error("Invalid array length"));
                }
                items.resize(index + 1, Value::Undefined);
            }
            items[index] = value;
            Ok(())
        }
        other => Err(type_error(&format!(
            "Cannot set properties of {} (setting '{}')",
            other.inspect(),
            key
        ))),
    }
}

fn describe_callee(expr: &Expr) -> String {
    match expr {
        Expr::Ident(name) => name.clone(),
        Expr::Member(object, name) => format!("{}.{}", describe_callee(object), name),
        Expr::Call(callee, _) => format!("{}(...)", describe_callee(callee)),
        Expr::Index(object, _) => format!("{}[...]", describe_callee(object)),
        _ => "expression".to_string(),
    }
}

pub fn type_error(message: &str) -> Value {
    Value::error("TypeError", message)
}

pub fn reference_error(message: &str) -> Value {
    Value::error("ReferenceError", message)
}

pub fn range_error(message: &str) -> Value {
    Value::error("RangeError", message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::parse;

    async fn eval_program(source: &str) -> Result<Value, Value> {
        let interp = Interp::new(1024);
        let program = parse(source).unwrap();
        interp.run(&program).await?;
        let result = interp.global("result").unwrap_or(Value::Undefined);
        interp.dispose();
        Ok(result)
    }

    async fn result_of(source: &str) -> Value {
        eval_program(&format!("var result\n{}", source)).await.unwrap()
    }

    #[tokio::test]
    async fn test_arithmetic_and_strings() {
        assert_eq!(result_of("result = 1 + 2 * 3").await.to_number(), 7.0);
        assert_eq!(result_of("result = 'a' + 1 + 2").await.to_js_string(), "a12");
        assert_eq!(result_of("result = 7 % 4").await.to_number(), 3.0);
        assert_eq!(result_of("result = 'b' > 'a'").await.to_js_string(), "true");
    }

    #[tokio::test]
    async fn test_closures_capture_scope() {
        let source = "
            function counter() {
                let n = 0
                return () => { n += 1; return n }
            }
            const next = counter()
            next(); next()
            result = next()
        ";
        assert_eq!(result_of(source).await.to_number(), 3.0);
    }

    #[tokio::test]
    async fn test_hoisted_function_declaration() {
        assert_eq!(
            result_of("result = double(21)\nfunction double(x) { return x * 2 }")
                .await
                .to_number(),
            42.0
        );
    }

    #[tokio::test]
    async fn test_loops_and_control_flow() {
        let source = "
            let total = 0
            for (let i = 0; i < 10; i++) {
                if (i % 2 === 0) continue
                if (i > 7) break
                total += i
            }
            for (const x of [100, 200]) { total += x }
            let j = 0
            while (true) { j++; if (j === 3) break }
            result = total + j
        ";
        assert_eq!(result_of(source).await.to_number(), 1.0 + 3.0 + 5.0 + 7.0 + 300.0 + 3.0);
    }

    #[tokio::test]
    async fn test_per_iteration_bindings() {
        let source = "
            const fns = []
            for (let i = 0; i < 3; i++) { fns.push(() => i) }
            result = fns.map(f => f()).join(',')
        ";
        assert_eq!(result_of(source).await.to_js_string(), "0,1,2");
    }

    #[tokio::test]
    async fn test_try_catch_finally() {
        let source = "
            let log = []
            try {
                log.push('try')
                throw new Error('boom')
            } catch (e) {
                log.push(e.message)
            } finally {
                log.push('finally')
            }
            result = log.join(' ')
        ";
        assert_eq!(result_of(source).await.to_js_string(), "try boom finally");
    }

    #[tokio::test]
    async fn test_const_reassignment_throws() {
        let thrown = eval_program("const x = 1\nx = 2").await.unwrap_err();
        let (name, message) = thrown.error_parts().unwrap();
        assert_eq!(name, "TypeError");
        assert_eq!(message, "Assignment to constant variable.");
    }

    #[tokio::test]
    async fn test_oversized_array_growth_throws() {
        for source in ["const a = []\na[1e18] = 1", "const a = []\na.length = 1e19", "const a = [1]\na[16777216] = 2"] {
            let thrown = eval_program(source).await.unwrap_err();
            assert_eq!(thrown.to_js_string(), "RangeError: Invalid array length", "{source}");
        }
        assert_eq!(result_of("const a = []\na[3] = 1\nresult = a.length").await.to_number(), 4.0);
    }

    #[tokio::test]
    async fn test_undeclared_reference_throws() {
        let thrown = eval_program("missing + 1").await.unwrap_err();
        assert_eq!(thrown.to_js_string(), "ReferenceError: missing is not defined");
    }

    #[tokio::test]
    async fn test_calling_non_function_throws() {
        let thrown = eval_program("const o = {}\no.nope()").await.unwrap_err();
        assert_eq!(thrown.to_js_string(), "TypeError: o.nope is not a function");
    }

    #[tokio::test]
    async fn test_async_function_and_await() {
        let source = "
            async function load() { return 5 }
            async function fail() { throw new Error('nope') }
            let caught
            try { await fail() } catch (e) { caught = e.message }
            result = (await load()) + caught
        ";
        assert_eq!(result_of(source).await.to_js_string(), "5nope");
    }

    #[tokio::test]
    async fn test_typeof_and_nullish() {
        let source = "result = [typeof undeclared, typeof null, typeof (() => 1), null ?? 'd', 0 || 'x', null == undefined].join('|')";
        assert_eq!(
            result_of(source).await.to_js_string(),
            "undefined|object|function|d|x|true"
        );
    }

    #[tokio::test]
    async fn test_pending_await_never_resumes() {
        let interp = Interp::new(1024);
        let program = parse("await new Promise(() => {})").unwrap();
        let outcome = tokio::time::timeout(std::time::Duration::from_millis(50), interp.run(&program)).await;
        assert!(outcome.is_err());
        interp.dispose();
    }

    #[tokio::test]
    async fn test_busy_loop_yields_to_timer() {
        let interp = Interp::new(64);
        let program = parse("while (true) {}").unwrap();
        let outcome = tokio::time::timeout(std::time::Duration::from_millis(50), interp.run(&program)).await;
        assert!(outcome.is_err());
        interp.dispose();
    }
}
