//! Runtime values of the script language

use std::cell::RefCell;
use std::fmt;
use std::ops::Deref;
use std::rc::Rc;

use futures_util::future::LocalBoxFuture;

use super::ast::FunctionDef;
use super::interp::{Env, Interp};

/// Native function: receives the interpreter, `this` and the arguments.
/// `Err` carries a thrown value.
pub type NativeFn = Rc<dyn Fn(Interp, Value, Vec<Value>) -> LocalBoxFuture<'static, Result<Value, Value>>>;

/// A script value. Compound values are shared by reference.
#[derive(Clone)]
pub enum Value {
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    Str(Rc<str>),
    Array(Rc<Items>),
    Object(Rc<Object>),
    Function(Rc<Function>),
    Promise(Rc<RefCell<PromiseState>>),
}

/// Deepest nesting of arrays and objects that inspection, conversion and
/// deep equality will walk
pub const MAX_NESTING: usize = 1000;

/// Backing store of an array value
#[derive(Default)]
pub struct Items(RefCell<Vec<Value>>);

impl Items {
    pub fn new(items: Vec<Value>) -> Self {
        Self(RefCell::new(items))
    }
}

impl Deref for Items {
    type Target = RefCell<Vec<Value>>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Drop for Items {
    fn drop(&mut self) {
        release(std::mem::take(self.0.get_mut()));
    }
}

/// Drop a batch of values without recursing once per nesting level.
///
/// Arrays and objects owned only by the batch are emptied into the work list
/// before they are freed, so a long `{ n: { n: ... } }` chain cannot exhaust
/// the stack.
fn release(mut pending: Vec<Value>) {
    while let Some(value) = pending.pop() {
        match value {
            Value::Array(items) => {
                if let Ok(items) = Rc::try_unwrap(items) {
                    pending.append(&mut items.take());
                }
            }
            Value::Object(obj) => {
                if let Ok(obj) = Rc::try_unwrap(obj) {
                    pending.extend(obj.props.take().drain_values());
                }
            }
            _ => {}
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectClass {
    Plain,
    /// Created by `new Error(..)` and friends, or thrown by the runtime
    Error,
}

pub struct Object {
    pub class: ObjectClass,
    pub props: RefCell<Props>,
}

/// Insertion-ordered property list
#[derive(Default, Clone)]
pub struct Props(Vec<(String, Value)>);

impl Props {
    pub fn get(&self, key: &str) -> Option<Value> {
        self.0.iter().find(|(k, _)| k == key).map(|(_, v)| v.clone())
    }

    pub fn set(&mut self, key: &str, value: Value) {
        match self.0.iter_mut().find(|(k, _)| k == key) {
            Some(slot) => slot.1 = value,
            None => self.0.push((key.to_string(), value)),
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.iter().any(|(k, _)| k == key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|(k, _)| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = &(String, Value)> {
        self.0.iter()
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }

    fn drain_values(&mut self) -> impl Iterator<Item = Value> + '_ {
        self.0.drain(..).map(|(_, v)| v)
    }
}

impl Drop for Props {
    fn drop(&mut self) {
        release(self.drain_values().collect());
    }
}

impl FromIterator<(String, Value)> for Props {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        let mut props = Props::default();
        for (k, v) in iter {
            props.set(&k, v);
        }
        props
    }
}

pub struct Function {
    pub name: String,
    pub kind: FunctionKind,
    /// Whether `new` may be applied
    pub constructable: bool,
    /// Static members such as `describe.skip`
    pub props: RefCell<Props>,
}

pub enum FunctionKind {
    Script { def: Rc<FunctionDef>, env: Env },
    Native(NativeFn),
}

pub enum PromiseState {
    Pending,
    Fulfilled(Value),
    Rejected(Value),
}

// ============================================================================
// Construction
// ============================================================================

impl Value {
    pub fn str(s: &str) -> Self {
        Self::Str(Rc::from(s))
    }

    pub fn array(items: Vec<Value>) -> Self {
        Self::Array(Rc::new(Items::new(items)))
    }

    pub fn object(props: impl IntoIterator<Item = (String, Value)>) -> Self {
        Self::Object(Rc::new(Object {
            class: ObjectClass::Plain,
            props: RefCell::new(props.into_iter().collect()),
        }))
    }

    /// Error object with `name` and `message`
    pub fn error(name: &str, message: &str) -> Self {
        Self::Object(Rc::new(Object {
            class: ObjectClass::Error,
            props: RefCell::new(
                [
                    ("name".to_string(), Value::str(name)),
                    ("message".to_string(), Value::str(message)),
                ]
                .into_iter()
                .collect(),
            ),
        }))
    }

    pub fn native<F>(name: &str, f: F) -> Self
    where
        F: Fn(Interp, Value, Vec<Value>) -> LocalBoxFuture<'static, Result<Value, Value>> + 'static,
    {
        Self::Function(Rc::new(Function {
            name: name.to_string(),
            kind: FunctionKind::Native(Rc::new(f)),
            constructable: false,
            props: RefCell::new(Props::default()),
        }))
    }

    /// Native function usable with `new`
    pub fn native_ctor<F>(name: &str, f: F) -> Self
    where
        F: Fn(Interp, Value, Vec<Value>) -> LocalBoxFuture<'static, Result<Value, Value>> + 'static,
    {
        Self::Function(Rc::new(Function {
            name: name.to_string(),
            kind: FunctionKind::Native(Rc::new(f)),
            constructable: true,
            props: RefCell::new(Props::default()),
        }))
    }

    pub fn promise(state: PromiseState) -> Self {
        Self::Promise(Rc::new(RefCell::new(state)))
    }

    /// Settled promise for the outcome of an async call
    pub fn settled(outcome: Result<Value, Value>) -> Self {
        Self::promise(match outcome {
            Ok(v) => PromiseState::Fulfilled(v),
            Err(e) => PromiseState::Rejected(e),
        })
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::str(s)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(Rc::from(s))
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

// ============================================================================
// Conversions
// ============================================================================

impl Value {
    pub fn is_truthy(&self) -> bool {
        match self {
            Self::Undefined | Self::Null => false,
            Self::Bool(b) => *b,
            Self::Number(n) => *n != 0.0 && !n.is_nan(),
            Self::Str(s) => !s.is_empty(),
            _ => true,
        }
    }

    pub fn is_nullish(&self) -> bool {
        matches!(self, Self::Undefined | Self::Null)
    }

    /// Result of the `typeof` operator
    pub fn type_of(&self) -> &'static str {
        match self {
            Self::Undefined => "undefined",
            Self::Bool(_) => "boolean",
            Self::Number(_) => "number",
            Self::Str(_) => "string",
            Self::Function(_) => "function",
            Self::Null | Self::Array(_) | Self::Object(_) | Self::Promise(_) => "object",
        }
    }

    pub fn to_number(&self) -> f64 {
        match self {
            Self::Undefined => f64::NAN,
            Self::Null => 0.0,
            Self::Bool(b) => f64::from(u8::from(*b)),
            Self::Number(n) => *n,
            Self::Str(s) => parse_number(s),
            Self::Array(_) => parse_number(&self.to_js_string()),
            _ => f64::NAN,
        }
    }

    /// String conversion as done by concatenation and `String(v)`
    pub fn to_js_string(&self) -> String {
        let mut seen = Vec::new();
        self.write_js_string(&mut seen)
    }

    fn write_js_string(&self, seen: &mut Vec<*const ()>) -> String {
        match self {
            Self::Undefined => "undefined".to_string(),
            Self::Null => "null".to_string(),
            Self::Bool(b) => b.to_string(),
            Self::Number(n) => format_number(*n),
            Self::Str(s) => s.to_string(),
            Self::Array(items) => {
                let ptr = Rc::as_ptr(items) as *const ();
                if seen.contains(&ptr) || seen.len() >= MAX_NESTING {
                    return String::new();
                }
                seen.push(ptr);
                let parts: Vec<String> = items
                    .borrow()
                    .iter()
                    .map(|v| {
                        if v.is_nullish() {
                            String::new()
                        } else {
                            v.write_js_string(seen)
                        }
                    })
                    .collect();
                seen.pop();
                parts.join(",")
            }
            Self::Object(obj) => match obj.class {
                ObjectClass::Plain => "[object Object]".to_string(),
                ObjectClass::Error => {
                    let (name, message) = self.error_parts().unwrap_or_default();
                    if message.is_empty() {
                        name
                    } else {
                        format!("{}: {}", name, message)
                    }
                }
            },
            Self::Function(f) => format!("function {}() {{ [code] }}", f.name),
            Self::Promise(_) => "[object Promise]".to_string(),
        }
    }

    /// `(name, message)` of an error object
    pub fn error_parts(&self) -> Option<(String, String)> {
        let Self::Object(obj) = self else {
            return None;
        };
        if obj.class != ObjectClass::Error {
            return None;
        }
        let props = obj.props.borrow();
        let field = |key: &str| props.get(key).map(|v| v.to_js_string()).unwrap_or_default();
        Some((field("name"), field("message")))
    }

    /// Node-style rendering used by console output and matcher messages
    pub fn inspect(&self) -> String {
        let mut seen = Vec::new();
        self.write_inspect(&mut seen, true)
    }

    /// Rendering of a console argument: strings print raw
    pub fn console_string(&self) -> String {
        match self {
            Self::Str(s) => s.to_string(),
            other => other.inspect(),
        }
    }

    fn write_inspect(&self, seen: &mut Vec<*const ()>, top: bool) -> String {
        match self {
            Self::Str(s) => quote(s),
            Self::Number(n) if *n == 0.0 && n.is_sign_negative() => "-0".to_string(),
            Self::Array(items) => {
                let ptr = Rc::as_ptr(items) as *const ();
                if seen.contains(&ptr) {
                    return "[Circular]".to_string();
                }
                if seen.len() >= MAX_NESTING {
                    return "[Array]".to_string();
                }
                let items = items.borrow();
                if items.is_empty() {
                    return "[]".to_string();
                }
                seen.push(ptr);
                let parts: Vec<String> = items.iter().map(|v| v.write_inspect(seen, false)).collect();
                seen.pop();
                format!("[ {} ]", parts.join(", "))
            }
            Self::Object(obj) => {
                if obj.class == ObjectClass::Error {
                    let text = self.to_js_string();
                    return if top { text } else { format!("[{}]", text) };
                }
                let ptr = Rc::as_ptr(obj) as *const ();
                if seen.contains(&ptr) {
                    return "[Circular]".to_string();
                }
                if seen.len() >= MAX_NESTING {
                    return "[Object]".to_string();
                }
                let props = obj.props.borrow();
                if props.0.is_empty() {
                    return "{}".to_string();
                }
                seen.push(ptr);
                let parts: Vec<String> = props
                    .iter()
                    .map(|(k, v)| {
                        let key = if is_identifier(k) { k.clone() } else { quote(k) };
                        format!("{}: {}", key, v.write_inspect(seen, false))
                    })
                    .collect();
                seen.pop();
                format!("{{ {} }}", parts.join(", "))
            }
            Self::Function(f) if f.name.is_empty() => "[Function (anonymous)]".to_string(),
            Self::Function(f) => format!("[Function: {}]", f.name),
            Self::Promise(state) => match &*state.borrow() {
                PromiseState::Pending => "Promise { <pending> }".to_string(),
                PromiseState::Fulfilled(v) => format!("Promise {{ {} }}", v.write_inspect(seen, false)),
                PromiseState::Rejected(v) => {
                    format!("Promise {{ <rejected> {} }}", v.write_inspect(seen, false))
                }
            },
            other => other.to_js_string(),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.inspect())
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_js_string())
    }
}

/// Number to string the way the script language prints numbers
pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        return "NaN".to_string();
    }
    if n.is_infinite() {
        return if n > 0.0 { "Infinity" } else { "-Infinity" }.to_string();
    }
    if n == 0.0 {
        return "0".to_string();
    }
    let abs = n.abs();
    if !(1e-6..1e21).contains(&abs) {
        let text = format!("{:e}", n);
        return match text.split_once('e') {
            Some((mantissa, exp)) if !exp.starts_with('-') => format!("{}e+{}", mantissa, exp),
            _ => text,
        };
    }
    format!("{}", n)
}

fn parse_number(s: &str) -> f64 {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return 0.0;
    }
    match trimmed {
        "Infinity" | "+Infinity" => return f64::INFINITY,
        "-Infinity" => return f64::NEG_INFINITY,
        _ => {}
    }
    if let Some(hex) = trimmed.strip_prefix("0x").or_else(|| trimmed.strip_prefix("0X")) {
        return u64::from_str_radix(hex, 16).map(|n| n as f64).unwrap_or(f64::NAN);
    }
    if trimmed
        .chars()
        .all(|c| c.is_ascii_digit() || matches!(c, '.' | 'e' | 'E' | '+' | '-'))
    {
        trimmed.parse().unwrap_or(f64::NAN)
    } else {
        f64::NAN
    }
}

fn quote(s: &str) -> String {
    format!("'{}'", s.replace('\\', "\\\\").replace('\'', "\\'").replace('\n', "\\n"))
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    chars
        .next()
        .is_some_and(|c| c.is_alphabetic() || c == '_' || c == '$')
        && chars.all(|c| c.is_alphanumeric() || c == '_' || c == '$')
}

// ============================================================================
// Equality
// ============================================================================

impl Value {
    /// `===`: primitives by value, compound values by identity
    pub fn strict_equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Self::Undefined, Self::Undefined) | (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Number(a), Self::Number(b)) => a == b,
            (Self::Str(a), Self::Str(b)) => a == b,
            (Self::Array(a), Self::Array(b)) => Rc::ptr_eq(a, b),
            (Self::Object(a), Self::Object(b)) => Rc::ptr_eq(a, b),
            (Self::Function(a), Self::Function(b)) => Rc::ptr_eq(a, b),
            (Self::Promise(a), Self::Promise(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// `==`: strict equality plus `null == undefined`
    pub fn loose_equals(&self, other: &Value) -> bool {
        (self.is_nullish() && other.is_nullish()) || self.strict_equals(other)
    }

    /// `Object.is`: like `===` but `NaN` equals itself and `0` differs from `-0`
    pub fn same_value(&self, other: &Value) -> bool {
        match (self, other) {
            (Self::Number(a), Self::Number(b)) => {
                if a.is_nan() && b.is_nan() {
                    true
                } else {
                    a == b && a.is_sign_negative() == b.is_sign_negative()
                }
            }
            _ => self.strict_equals(other),
        }
    }

    pub fn is_primitive(&self) -> bool {
        matches!(
            self,
            Self::Undefined | Self::Null | Self::Bool(_) | Self::Number(_) | Self::Str(_)
        )
    }

    /// Canonical structural form used for deep equality.
    ///
    /// Object keys come out sorted, so key order never matters; array order
    /// does. With `strict` unset, keys holding `undefined` are dropped.
    /// Functions, promises and cycles cannot be compared and yield `Err`.
    pub fn canonical(&self, strict: bool) -> Result<serde_json::Value, String> {
        let mut seen = Vec::new();
        self.canonical_inner(strict, &mut seen)
    }

    fn canonical_inner(&self, strict: bool, seen: &mut Vec<*const ()>) -> Result<serde_json::Value, String> {
        use serde_json::Value as Json;

        Ok(match self {
            Self::Undefined => tagged("undefined"),
            Self::Null => Json::Null,
            Self::Bool(b) => Json::Bool(*b),
            Self::Number(n) if n.is_nan() => tagged("NaN"),
            Self::Number(n) if *n == 0.0 && n.is_sign_negative() => tagged("-0"),
            Self::Number(n) => match serde_json::Number::from_f64(*n) {
                Some(num) => Json::Number(num),
                None => tagged(&format_number(*n)),
            },
            Self::Str(s) => Json::String(s.to_string()),
            Self::Array(items) => {
                let ptr = Rc::as_ptr(items) as *const ();
                if seen.contains(&ptr) {
                    return Err("cyclic structure".to_string());
                }
                if seen.len() >= MAX_NESTING {
                    return Err("structure too deep".to_string());
                }
                seen.push(ptr);
                let elements = items
                    .borrow()
                    .iter()
                    .map(|v| v.canonical_inner(strict, seen))
                    .collect::<Result<Vec<_>, _>>()?;
                seen.pop();
                Json::Array(elements)
            }
            Self::Object(obj) => {
                let ptr = Rc::as_ptr(obj) as *const ();
                if seen.contains(&ptr) {
                    return Err("cyclic structure".to_string());
                }
                if seen.len() >= MAX_NESTING {
                    return Err("structure too deep".to_string());
                }
                seen.push(ptr);
                let mut map = serde_json::Map::new();
                if obj.class == ObjectClass::Error {
                    map.insert(TAG.to_string(), Json::String("error".to_string()));
                }
                for (key, value) in obj.props.borrow().iter() {
                    if !strict && matches!(value, Self::Undefined) {
                        continue;
                    }
                    map.insert(key.clone(), value.canonical_inner(strict, seen)?);
                }
                seen.pop();
                Json::Object(map)
            }
            Self::Function(_) => return Err(format!("cannot compare {}", self.inspect())),
            Self::Promise(_) => return Err("cannot compare a Promise".to_string()),
        })
    }
}

/// Marker key for values JSON cannot express; a NUL key never collides with
/// script-visible keys in practice
const TAG: &str = "\u{0}";

fn tagged(name: &str) -> serde_json::Value {
    let mut map = serde_json::Map::new();
    map.insert(TAG.to_string(), serde_json::Value::String(name.to_string()));
    serde_json::Value::Object(map)
}
