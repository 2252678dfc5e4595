//! Language-level globals and the built-in array and string methods
//!
//! Test declaration globals (`describe`, `test`, `expect`, `console`, ...)
//! live with the runtime; this module only covers what any script sees.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use futures_util::future::LocalBoxFuture;

use super::interp::{range_error, type_error, Interp};
use super::value::{format_number, Items, ObjectClass, PromiseState, Value, MAX_NESTING};

type Eval = Result<Value, Value>;
type SyncFn = fn(&Value, &[Value]) -> Eval;
type AsyncFn = fn(Interp, Value, Vec<Value>) -> LocalBoxFuture<'static, Eval>;

/// Upper bound for a single `sleep`
const MAX_SLEEP_MS: u64 = 30 * 24 * 60 * 60 * 1000;

/// Argument `i`, or `undefined` when absent
pub fn arg(args: &[Value], i: usize) -> Value {
    args.get(i).cloned().unwrap_or(Value::Undefined)
}

fn ready(result: Eval) -> LocalBoxFuture<'static, Eval> {
    Box::pin(futures_util::future::ready(result))
}

pub fn sync_native(name: &str, f: SyncFn) -> Value {
    Value::native(name, move |_, this, args| ready(f(&this, &args)))
}

fn object_of(members: Vec<(&str, Value)>) -> Value {
    Value::object(members.into_iter().map(|(k, v)| (k.to_string(), v)))
}

/// Install the language globals into a fresh interpreter
pub fn install(interp: &Interp) {
    interp.define_global("NaN", Value::Number(f64::NAN));
    interp.define_global("Infinity", Value::Number(f64::INFINITY));
    interp.define_global("sleep", Value::native("sleep", sleep as AsyncFn));
    for name in ["Error", "TypeError", "RangeError"] {
        interp.define_global(name, error_constructor(name));
    }
    interp.define_global("Promise", promise_constructor());
    interp.define_global(
        "JSON",
        object_of(vec![("stringify", sync_native("stringify", json_stringify))]),
    );
    interp.define_global(
        "Object",
        object_of(vec![("keys", sync_native("keys", object_keys))]),
    );
    interp.define_global(
        "Math",
        object_of(vec![
            ("PI", Value::Number(std::f64::consts::PI)),
            ("abs", sync_native("abs", |_, args| Ok(Value::Number(arg(args, 0).to_number().abs())))),
            ("floor", sync_native("floor", |_, args| Ok(Value::Number(arg(args, 0).to_number().floor())))),
            ("ceil", sync_native("ceil", |_, args| Ok(Value::Number(arg(args, 0).to_number().ceil())))),
            ("round", sync_native("round", |_, args| Ok(Value::Number((arg(args, 0).to_number() + 0.5).floor())))),
            ("max", sync_native("max", |_, args| Ok(Value::Number(extremum(args, f64::NEG_INFINITY, f64::max))))),
            ("min", sync_native("min", |_, args| Ok(Value::Number(extremum(args, f64::INFINITY, f64::min))))),
        ]),
    );
    interp.define_global(
        "String",
        sync_native("String", |_, args| Ok(Value::from(arg(args, 0).to_js_string()))),
    );
    interp.define_global(
        "Number",
        sync_native("Number", |_, args| Ok(Value::Number(arg(args, 0).to_number()))),
    );
}

fn extremum(args: &[Value], initial: f64, pick: fn(f64, f64) -> f64) -> f64 {
    let mut result = initial;
    for value in args {
        let n = value.to_number();
        if n.is_nan() {
            return f64::NAN;
        }
        result = pick(result, n);
    }
    result
}

fn sleep(_: Interp, _: Value, args: Vec<Value>) -> LocalBoxFuture<'static, Eval> {
    let ms = arg(&args, 0).to_number();
    Box::pin(async move {
        if ms.is_infinite() && ms > 0.0 {
            std::future::pending::<()>().await;
        }
        let ms = if ms.is_finite() && ms > 0.0 {
            (ms as u64).min(MAX_SLEEP_MS)
        } else {
            0
        };
        tokio::time::sleep(Duration::from_millis(ms)).await;
        Ok(Value::settled(Ok(Value::Undefined)))
    })
}

fn error_constructor(name: &str) -> Value {
    let class = name.to_string();
    Value::native_ctor(name, move |_, _, args| {
        let message = match args.first() {
            None | Some(Value::Undefined) => String::new(),
            Some(value) => value.to_js_string(),
        };
        ready(Ok(Value::error(&class, &message)))
    })
}

// ============================================================================
// Promise
// ============================================================================

fn promise_constructor() -> Value {
    let ctor = Value::native_ctor("Promise", promise_new as AsyncFn);
    if let Value::Function(f) = &ctor {
        let mut props = f.props.borrow_mut();
        props.set(
            "resolve",
            sync_native("resolve", |_, args| {
                Ok(match arg(args, 0) {
                    promise @ Value::Promise(_) => promise,
                    value => Value::settled(Ok(value)),
                })
            }),
        );
        props.set(
            "reject",
            sync_native("reject", |_, args| Ok(Value::settled(Err(arg(args, 0))))),
        );
    }
    ctor
}

fn promise_new(interp: Interp, _: Value, args: Vec<Value>) -> LocalBoxFuture<'static, Eval> {
    Box::pin(async move {
        let executor = match arg(&args, 0) {
            f @ Value::Function(_) => f,
            _ => return Err(type_error("Promise resolver is not a function")),
        };
        let state = Rc::new(RefCell::new(PromiseState::Pending));
        let resolve = settle_function(&state, true);
        let reject = settle_function(&state, false);
        if let Err(thrown) = interp
            .call_function(executor, Value::Undefined, vec![resolve, reject])
            .await
        {
            settle_promise(&state, Err(thrown));
        }
        Ok(Value::Promise(state))
    })
}

fn settle_function(state: &Rc<RefCell<PromiseState>>, fulfil: bool) -> Value {
    let state = state.clone();
    let name = if fulfil { "resolve" } else { "reject" };
    Value::native(name, move |_, _, args| {
        let value = arg(&args, 0);
        settle_promise(&state, if fulfil { Ok(value) } else { Err(value) });
        ready(Ok(Value::Undefined))
    })
}

fn promise_outcome(state: &RefCell<PromiseState>) -> Option<Eval> {
    match &*state.borrow() {
        PromiseState::Pending => None,
        PromiseState::Fulfilled(v) => Some(Ok(v.clone())),
        PromiseState::Rejected(e) => Some(Err(e.clone())),
    }
}

/// Settle a pending promise; resolving with another promise adopts its
/// state when that one has settled
fn settle_promise(state: &Rc<RefCell<PromiseState>>, outcome: Eval) {
    if !matches!(*state.borrow(), PromiseState::Pending) {
        return;
    }
    let outcome = match outcome {
        Ok(Value::Promise(inner)) => match promise_outcome(&inner) {
            Some(adopted) => adopted,
            None => return,
        },
        other => other,
    };
    *state.borrow_mut() = match outcome {
        Ok(value) => PromiseState::Fulfilled(value),
        Err(reason) => PromiseState::Rejected(reason),
    };
}

// ============================================================================
// JSON and Object
// ============================================================================

fn json_stringify(_: &Value, args: &[Value]) -> Eval {
    let mut seen = Vec::new();
    Ok(match json_text(&arg(args, 0), &mut seen)? {
        Some(text) => Value::from(text),
        None => Value::Undefined,
    })
}

fn json_string(s: &str) -> Result<String, Value> {
    serde_json::to_string(s).map_err(|e| type_error(&e.to_string()))
}

/// JSON text in insertion order; `None` for values JSON omits
fn json_text(value: &Value, seen: &mut Vec<*const ()>) -> Result<Option<String>, Value> {
    let text = match value {
        Value::Undefined | Value::Function(_) => return Ok(None),
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) if n.is_finite() => format_number(*n),
        Value::Number(_) => "null".to_string(),
        Value::Str(s) => json_string(s)?,
        Value::Array(items) => {
            let ptr = Rc::as_ptr(items) as *const ();
            if seen.contains(&ptr) {
                return Err(type_error("Converting circular structure to JSON"));
            }
            if seen.len() >= MAX_NESTING {
                return Err(range_error("Maximum nesting depth exceeded"));
            }
            seen.push(ptr);
            let snapshot = items.borrow().clone();
            let mut parts = Vec::with_capacity(snapshot.len());
            for item in &snapshot {
                parts.push(json_text(item, seen)?.unwrap_or_else(|| "null".to_string()));
            }
            seen.pop();
            format!("[{}]", parts.join(","))
        }
        Value::Object(obj) if obj.class == ObjectClass::Error => "{}".to_string(),
        Value::Object(obj) => {
            let ptr = Rc::as_ptr(obj) as *const ();
            if seen.contains(&ptr) {
                return Err(type_error("Converting circular structure to JSON"));
            }
            if seen.len() >= MAX_NESTING {
                return Err(range_error("Maximum nesting depth exceeded"));
            }
            seen.push(ptr);
            let snapshot: Vec<(String, Value)> = obj.props.borrow().iter().cloned().collect();
            let mut parts = Vec::with_capacity(snapshot.len());
            for (key, value) in &snapshot {
                if let Some(text) = json_text(value, seen)? {
                    parts.push(format!("{}:{}", json_string(key)?, text));
                }
            }
            seen.pop();
            format!("{{{}}}", parts.join(","))
        }
        Value::Promise(_) => "{}".to_string(),
    };
    Ok(Some(text))
}

fn object_keys(_: &Value, args: &[Value]) -> Eval {
    let keys: Vec<Value> = match arg(args, 0) {
        Value::Object(obj) => obj.props.borrow().keys().map(Value::str).collect(),
        Value::Function(f) => f.props.borrow().keys().map(Value::str).collect(),
        Value::Array(items) => (0..items.borrow().len())
            .map(|i| Value::from(i.to_string()))
            .collect(),
        Value::Str(s) => (0..s.chars().count()).map(|i| Value::from(i.to_string())).collect(),
        Value::Undefined | Value::Null => {
            return Err(type_error("Cannot convert undefined or null to object"))
        }
        _ => Vec::new(),
    };
    Ok(Value::array(keys))
}

// ============================================================================
// Array methods
// ============================================================================

/// Built-in method of arrays, looked up by property name
pub fn array_method(name: &str) -> Option<Value> {
    let sync: SyncFn = match name {
        "push" => array_push,
        "pop" => array_pop,
        "includes" => array_includes,
        "indexOf" => array_index_of,
        "join" => array_join,
        "slice" => array_slice,
        _ => {
            let f: AsyncFn = match name {
                "map" => array_map,
                "filter" => array_filter,
                "forEach" => array_for_each,
                "some" => array_some,
                "find" => array_find,
                "reduce" => array_reduce,
                _ => return None,
            };
            return Some(Value::native(name, f));
        }
    };
    Some(sync_native(name, sync))
}

fn this_array(this: &Value, method: &str) -> Result<Rc<Items>, Value> {
    match this {
        Value::Array(items) => Ok(items.clone()),
        _ => Err(type_error(&format!("Array.prototype.{} called on a non-array", method))),
    }
}

fn array_push(this: &Value, args: &[Value]) -> Eval {
    let items = this_array(this, "push")?;
    let mut items = items.borrow_mut();
    items.extend(args.iter().cloned());
    Ok(Value::Number(items.len() as f64))
}

fn array_pop(this: &Value, _: &[Value]) -> Eval {
    let items = this_array(this, "pop")?;
    let popped = items.borrow_mut().pop();
    Ok(popped.unwrap_or(Value::Undefined))
}

fn array_includes(this: &Value, args: &[Value]) -> Eval {
    let needle = arg(args, 0);
    let items = this_array(this, "includes")?;
    let found = items.borrow().iter().any(|item| {
        item.strict_equals(&needle)
            || matches!((item, &needle), (Value::Number(a), Value::Number(b)) if a.is_nan() && b.is_nan())
    });
    Ok(Value::Bool(found))
}

fn array_index_of(this: &Value, args: &[Value]) -> Eval {
    let needle = arg(args, 0);
    let items = this_array(this, "indexOf")?;
    let index = items.borrow().iter().position(|item| item.strict_equals(&needle));
    Ok(Value::Number(index.map(|i| i as f64).unwrap_or(-1.0)))
}

fn array_join(this: &Value, args: &[Value]) -> Eval {
    let separator = match arg(args, 0) {
        Value::Undefined => ",".to_string(),
        other => other.to_js_string(),
    };
    let items = this_array(this, "join")?;
    let parts: Vec<String> = items
        .borrow()
        .iter()
        .map(|v| if v.is_nullish() { String::new() } else { v.to_js_string() })
        .collect();
    Ok(Value::from(parts.join(&separator)))
}

/// Resolve a relative `slice` bound against a length
fn slice_bound(value: &Value, len: usize, default: usize) -> usize {
    if matches!(value, Value::Undefined) {
        return default;
    }
    let n = value.to_number();
    if n.is_nan() {
        return 0;
    }
    let len = len as f64;
    let resolved = if n < 0.0 { (len + n.trunc()).max(0.0) } else { n.trunc().min(len) };
    resolved as usize
}

fn array_slice(this: &Value, args: &[Value]) -> Eval {
    let items = this_array(this, "slice")?;
    let items = items.borrow();
    let start = slice_bound(&arg(args, 0), items.len(), 0);
    let end = slice_bound(&arg(args, 1), items.len(), items.len());
    let slice = if start < end { items[start..end].to_vec() } else { Vec::new() };
    Ok(Value::array(slice))
}

fn callback_arg(args: &[Value], method: &str) -> Result<Value, Value> {
    match arg(args, 0) {
        f @ Value::Function(_) => Ok(f),
        other => Err(type_error(&format!(
            "{} is not a function (in Array.prototype.{})",
            other.inspect(),
            method
        ))),
    }
}

/// Call the callback for each element over a snapshot of the array,
/// stopping early once a result's truthiness equals `stop_when`
async fn each_element(
    interp: &Interp,
    this: &Value,
    args: &[Value],
    method: &str,
    stop_when: Option<bool>,
) -> Result<Vec<(Value, Value)>, Value> {
    let items = this_array(this, method)?.borrow().clone();
    let callback = callback_arg(args, method)?;
    let mut results = Vec::with_capacity(items.len());
    for (index, item) in items.into_iter().enumerate() {
        let result = interp
            .call_function(
                callback.clone(),
                Value::Undefined,
                vec![item.clone(), Value::Number(index as f64), this.clone()],
            )
            .await?;
        let stop = stop_when == Some(result.is_truthy());
        results.push((item, result));
        if stop {
            break;
        }
    }
    Ok(results)
}

fn array_map(interp: Interp, this: Value, args: Vec<Value>) -> LocalBoxFuture<'static, Eval> {
    Box::pin(async move {
        let results = each_element(&interp, &this, &args, "map", None).await?;
        Ok(Value::array(results.into_iter().map(|(_, r)| r).collect()))
    })
}

fn array_filter(interp: Interp, this: Value, args: Vec<Value>) -> LocalBoxFuture<'static, Eval> {
    Box::pin(async move {
        let results = each_element(&interp, &this, &args, "filter", None).await?;
        Ok(Value::array(
            results
                .into_iter()
                .filter(|(_, r)| r.is_truthy())
                .map(|(item, _)| item)
                .collect(),
        ))
    })
}

fn array_for_each(interp: Interp, this: Value, args: Vec<Value>) -> LocalBoxFuture<'static, Eval> {
    Box::pin(async move {
        each_element(&interp, &this, &args, "forEach", None).await?;
        Ok(Value::Undefined)
    })
}

fn array_some(interp: Interp, this: Value, args: Vec<Value>) -> LocalBoxFuture<'static, Eval> {
    Box::pin(async move {
        let results = each_element(&interp, &this, &args, "some", Some(true)).await?;
        Ok(Value::Bool(results.iter().any(|(_, r)| r.is_truthy())))
    })
}

fn array_find(interp: Interp, this: Value, args: Vec<Value>) -> LocalBoxFuture<'static, Eval> {
    Box::pin(async move {
        let results = each_element(&interp, &this, &args, "find", Some(true)).await?;
        Ok(results
            .into_iter()
            .find(|(_, r)| r.is_truthy())
            .map(|(item, _)| item)
            .unwrap_or(Value::Undefined))
    })
}

fn array_reduce(interp: Interp, this: Value, args: Vec<Value>) -> LocalBoxFuture<'static, Eval> {
    Box::pin(async move {
        let items = this_array(&this, "reduce")?.borrow().clone();
        let callback = callback_arg(&args, "reduce")?;
        let mut iter = items.into_iter().enumerate();
        let mut acc = match args.get(1) {
            Some(initial) => initial.clone(),
            None => match iter.next() {
                Some((_, first)) => first,
                None => return Err(type_error("Reduce of empty array with no initial value")),
            },
        };
        for (index, item) in iter {
            acc = interp
                .call_function(
                    callback.clone(),
                    Value::Undefined,
                    vec![acc, item, Value::Number(index as f64), this.clone()],
                )
                .await?;
        }
        Ok(acc)
    })
}

// ============================================================================
// String methods
// ============================================================================

/// Built-in method of strings, looked up by property name
pub fn string_method(name: &str) -> Option<Value> {
    let f: SyncFn = match name {
        "includes" => |s, args| Ok(Value::Bool(this_str(s, "includes")?.contains(&*arg_str(args)))),
        "startsWith" => {
            |s, args| Ok(Value::Bool(this_str(s, "startsWith")?.starts_with(&*arg_str(args))))
        }
        "endsWith" => |s, args| Ok(Value::Bool(this_str(s, "endsWith")?.ends_with(&*arg_str(args)))),
        "toUpperCase" => |s, _| Ok(Value::from(this_str(s, "toUpperCase")?.to_uppercase())),
        "toLowerCase" => |s, _| Ok(Value::from(this_str(s, "toLowerCase")?.to_lowercase())),
        "trim" => |s, _| Ok(Value::str(this_str(s, "trim")?.trim())),
        "indexOf" => string_index_of,
        "split" => string_split,
        "slice" => string_slice,
        _ => return None,
    };
    Some(sync_native(name, f))
}

fn this_str(this: &Value, method: &str) -> Result<Rc<str>, Value> {
    match this {
        Value::Str(s) => Ok(s.clone()),
        _ => Err(type_error(&format!("String.prototype.{} called on a non-string", method))),
    }
}

fn arg_str(args: &[Value]) -> String {
    arg(args, 0).to_js_string()
}

fn string_index_of(this: &Value, args: &[Value]) -> Eval {
    let s = this_str(this, "indexOf")?;
    let needle = arg_str(args);
    let index = s
        .find(&needle)
        .map(|byte| s[..byte].chars().count() as f64)
        .unwrap_or(-1.0);
    Ok(Value::Number(index))
}

fn string_split(this: &Value, args: &[Value]) -> Eval {
    let s = this_str(this, "split")?;
    let parts: Vec<Value> = match arg(args, 0) {
        Value::Undefined => vec![Value::Str(s)],
        separator => {
            let separator = separator.to_js_string();
            if separator.is_empty() {
                s.chars().map(|c| Value::from(c.to_string())).collect()
            } else {
                s.split(separator.as_str()).map(Value::str).collect()
            }
        }
    };
    Ok(Value::array(parts))
}

fn string_slice(this: &Value, args: &[Value]) -> Eval {
    let s = this_str(this, "slice")?;
    let chars: Vec<char> = s.chars().collect();
    let start = slice_bound(&arg(args, 0), chars.len(), 0);
    let end = slice_bound(&arg(args, 1), chars.len(), chars.len());
    if start >= end {
        return Ok(Value::str(""));
    }
    Ok(Value::from(chars[start..end].iter().collect::<String>()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::parse;

    async fn eval(source: &str) -> Value {
        let interp = Interp::new(1024);
        let program = parse(&format!("var result\n{}", source)).unwrap();
        interp.run(&program).await.unwrap();
        let result = interp.global("result").unwrap();
        interp.dispose();
        result
    }

    #[tokio::test]
    async fn test_array_methods() {
        let value = eval("const xs = [3, 1, 2]\nxs.push(4)\nresult = xs.filter(x => x > 1).map(x => x * 10).join('-')").await;
        assert_eq!(value.to_js_string(), "30-20-40");
        let value = eval("result = [1, 2, 3].reduce((a, b) => a + b, 0) + [NaN].includes(NaN)").await;
        assert_eq!(value.to_js_string(), "7");
    }

    #[tokio::test]
    async fn test_string_methods() {
        let value = eval("result = '  Hello World '.trim().toLowerCase().split(' ').join('_')").await;
        assert_eq!(value.to_js_string(), "hello_world");
        let value = eval("result = 'abcdef'.slice(1, -1) + 'xyz'.indexOf('z')").await;
        assert_eq!(value.to_js_string(), "bcde2");
    }

    #[tokio::test]
    async fn test_json_stringify_keeps_insertion_order() {
        let value = eval("result = JSON.stringify({ b: 1, a: [true, null, undefined], s: 'q\"' })").await;
        assert_eq!(value.to_js_string(), r#"{"b":1,"a":[true,null,null],"s":"q\""}"#);
    }

    #[tokio::test]
    async fn test_error_constructors() {
        let value = eval("const e = new TypeError('bad')\nresult = e.name + ':' + e.message").await;
        assert_eq!(value.to_js_string(), "TypeError:bad");
    }

    #[tokio::test]
    async fn test_promise_executor_and_statics() {
        let value = eval(
            "const p = new Promise((resolve) => resolve(41))\nresult = (await p) + (await Promise.resolve(1))",
        )
        .await;
        assert_eq!(value.to_number(), 42.0);

        let value = eval("try { await Promise.reject(new Error('no')) } catch (e) { result = e.message }").await;
        assert_eq!(value.to_js_string(), "no");
    }

    #[tokio::test]
    async fn test_sleep_waits() {
        let start = std::time::Instant::now();
        eval("await sleep(20)\nresult = 1").await;
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[tokio::test]
    async fn test_math_and_object_keys() {
        let value = eval("result = [Math.max(1, 5, 3), Math.round(2.5), Object.keys({ x: 1, y: 2 }).join('')].join(',')").await;
        assert_eq!(value.to_js_string(), "5,3,xy");
    }
}
