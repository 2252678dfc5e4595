//! Declaration globals bound to the registry
//!
//! Installs `describe`, `test`/`it`, `xit`, the lifecycle hook registrars,
//! `expect` and `console` into an interpreter. Script functions handed to
//! these globals become [`Callable`]s that the scheduler can race against a
//! timeout.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use futures_util::future::LocalBoxFuture;
use futures_util::FutureExt;

use crate::ipc::protocol::{FailureDetail, FailureKind, LogLevel};
use crate::script::builtins::arg;
use crate::script::value::Value;
use crate::script::Interp;

use super::console::Console;
use super::matchers::{thrown_message, AssertionError, Expectation, ASSERTION_ERROR};
use super::registry::{Callable, Declarations, HookKind, Mode, RegistryError};

type Eval = Result<Value, Value>;
type SyncMatcher = fn(&Expectation, &[Value]) -> Result<bool, AssertionError>;

/// Matchers evaluated without calling back into the script
const SYNC_MATCHERS: &[&str] = &[
    "toBe",
    "toEqual",
    "toStrictEqual",
    "toBeTruthy",
    "toBeFalsy",
    "toBeNull",
    "toBeUndefined",
    "toBeDefined",
    "toBeNaN",
    "toContain",
    "toHaveLength",
    "toHaveProperty",
    "toBeGreaterThan",
    "toBeGreaterThanOrEqual",
    "toBeLessThan",
    "toBeLessThanOrEqual",
    "toBeCloseTo",
    "toBeTypeOf",
    "toBeInstanceOf",
    "toMatch",
];

/// Install the declaration globals
pub fn install(interp: &Interp, decls: Rc<RefCell<Declarations>>, console: Rc<Console>) {
    let describe = describe_fn(&decls, Mode::Normal, "describe");
    with_members(
        &describe,
        vec![
            ("skip", describe_fn(&decls, Mode::Skip, "skip")),
            ("only", describe_fn(&decls, Mode::Only, "only")),
        ],
    );
    interp.define_global("describe", describe);

    let test = test_fn(&decls, Mode::Normal, "test");
    with_members(
        &test,
        vec![
            ("skip", test_fn(&decls, Mode::Skip, "skip")),
            ("only", test_fn(&decls, Mode::Only, "only")),
        ],
    );
    interp.define_global("test", test.clone());
    interp.define_global("it", test);
    interp.define_global("xit", test_fn(&decls, Mode::Skip, "xit"));

    for (name, kind) in [
        ("beforeAll", HookKind::BeforeAll),
        ("afterAll", HookKind::AfterAll),
        ("beforeEach", HookKind::BeforeEach),
        ("afterEach", HookKind::AfterEach),
    ] {
        interp.define_global(name, hook_fn(&decls, kind, name));
    }

    interp.define_global(
        "expect",
        Value::native("expect", |_, _, args| {
            let expectation = Expectation::new(arg(&args, 0));
            ready(Ok(expectation_object(&expectation, true)))
        }),
    );

    interp.define_global("console", console_object(console));
}

fn ready(result: Eval) -> LocalBoxFuture<'static, Eval> {
    futures_util::future::ready(result).boxed_local()
}

fn with_members(function: &Value, members: Vec<(&str, Value)>) {
    if let Value::Function(f) = function {
        let mut props = f.props.borrow_mut();
        for (name, value) in members {
            props.set(name, value);
        }
    }
}

fn registry_error(err: RegistryError) -> Value {
    Value::error("Error", &err.to_string())
}

/// Wrap a script function as a test or hook body. A returned promise is
/// awaited; a thrown `AssertionError` is classified as an assertion failure.
pub fn script_callable(interp: &Interp, function: Value) -> Callable {
    let interp = interp.clone();
    Rc::new(move || {
        let interp = interp.clone();
        let function = function.clone();
        async move {
            let outcome = match interp.call_function(function, Value::Undefined, Vec::new()).await {
                Ok(returned) => interp.settle(returned).await,
                Err(thrown) => Err(thrown),
            };
            outcome.map(|_| ()).map_err(|thrown| failure_from_thrown(&thrown))
        }
        .boxed_local()
    })
}

/// Classify a thrown script value
pub fn failure_from_thrown(thrown: &Value) -> FailureDetail {
    match thrown.error_parts() {
        Some((name, message)) if name == ASSERTION_ERROR => FailureDetail {
            kind: FailureKind::Assertion,
            message,
        },
        _ => FailureDetail {
            kind: FailureKind::Error,
            message: thrown.to_js_string(),
        },
    }
}

// ============================================================================
// describe / test / hooks
// ============================================================================

fn describe_fn(decls: &Rc<RefCell<Declarations>>, mode: Mode, name: &str) -> Value {
    let decls = decls.clone();
    Value::native(name, move |interp, _, args| {
        let decls = decls.clone();
        async move {
            let name = arg(&args, 0).to_js_string();
            let body = arg(&args, 1);
            let id = decls.borrow_mut().open_suite(&name, mode).map_err(registry_error)?;

            let outcome = match body {
                Value::Function(_) => match interp.call_function(body, Value::Undefined, Vec::new()).await {
                    Ok(returned) => interp.settle(returned).await.map(|_| ()),
                    Err(thrown) => Err(thrown),
                },
                other => Err(Value::error(
                    "TypeError",
                    &format!("describe '{}' expects a function body, received {}", name, other.inspect()),
                )),
            };
            if let Err(thrown) = outcome {
                let message = thrown.to_js_string();
                tracing::debug!(suite = %name, error = %message, "Suite declaration failed");
                decls.borrow_mut().record_error(id, message);
            }
            decls.borrow_mut().close_suite(id);
            Ok(Value::Undefined)
        }
        .boxed_local()
    })
}

fn test_fn(decls: &Rc<RefCell<Declarations>>, mode: Mode, name: &str) -> Value {
    let decls = decls.clone();
    Value::native(name, move |interp, _, args| {
        ready(declare_test(&interp, &decls, mode, &args).map(|_| Value::Undefined))
    })
}

fn declare_test(
    interp: &Interp,
    decls: &RefCell<Declarations>,
    mode: Mode,
    args: &[Value],
) -> Result<(), Value> {
    let name = arg(args, 0).to_js_string();
    let body = match arg(args, 1) {
        f @ Value::Function(_) => script_callable(interp, f),
        Value::Undefined if mode == Mode::Skip => Rc::new(|| async { Ok(()) }.boxed_local()) as Callable,
        other => {
            return Err(Value::error(
                "TypeError",
                &format!("test '{}' expects a function body, received {}", name, other.inspect()),
            ))
        }
    };
    let timeout = match arg(args, 2) {
        Value::Number(ms) if ms.is_finite() && ms >= 0.0 => Some(Duration::from_millis(ms as u64)),
        _ => None,
    };
    decls
        .borrow_mut()
        .add_test(&name, body, timeout, mode)
        .map_err(registry_error)
}

fn hook_fn(decls: &Rc<RefCell<Declarations>>, kind: HookKind, name: &str) -> Value {
    let decls = decls.clone();
    Value::native(name, move |interp, _, args| {
        let result = match arg(&args, 0) {
            f @ Value::Function(_) => decls
                .borrow_mut()
                .add_hook(kind, script_callable(&interp, f))
                .map(|_| Value::Undefined)
                .map_err(registry_error),
            other => Err(Value::error(
                "TypeError",
                &format!("{} expects a function, received {}", kind, other.inspect()),
            )),
        };
        ready(result)
    })
}

// ============================================================================
// expect
// ============================================================================

fn assertion_value(err: AssertionError) -> Value {
    Value::error(ASSERTION_ERROR, &err.message)
}

fn sync_matcher(name: &str) -> Option<SyncMatcher> {
    let matcher: SyncMatcher = match name {
        "toBe" => |e, args| e.to_be(&arg(args, 0)),
        "toEqual" => |e, args| e.to_equal(&arg(args, 0)),
        "toStrictEqual" => |e, args| e.to_strict_equal(&arg(args, 0)),
        "toBeTruthy" => |e, _| e.to_be_truthy(),
        "toBeFalsy" => |e, _| e.to_be_falsy(),
        "toBeNull" => |e, _| e.to_be_null(),
        "toBeUndefined" => |e, _| e.to_be_undefined(),
        "toBeDefined" => |e, _| e.to_be_defined(),
        "toBeNaN" => |e, _| e.to_be_nan(),
        "toContain" => |e, args| e.to_contain(&arg(args, 0)),
        "toHaveLength" => |e, args| e.to_have_length(&arg(args, 0)),
        "toHaveProperty" => |e, args| {
            let path = arg(args, 0).to_js_string();
            e.to_have_property(&path, args.get(1))
        },
        "toBeGreaterThan" => |e, args| e.to_be_greater_than(&arg(args, 0)),
        "toBeGreaterThanOrEqual" => |e, args| e.to_be_greater_than_or_equal(&arg(args, 0)),
        "toBeLessThan" => |e, args| e.to_be_less_than(&arg(args, 0)),
        "toBeLessThanOrEqual" => |e, args| e.to_be_less_than_or_equal(&arg(args, 0)),
        "toBeCloseTo" => |e, args| {
            let digits = match arg(args, 1) {
                Value::Number(n) if n.is_finite() => Some(n as i32),
                _ => None,
            };
            e.to_be_close_to(&arg(args, 0), digits)
        },
        "toBeTypeOf" => |e, args| e.to_be_type_of(&arg(args, 0).to_js_string()),
        "toBeInstanceOf" => |e, args| e.to_be_instance_of(&arg(args, 0)),
        "toMatch" => |e, args| e.to_match(&arg(args, 0).to_js_string()),
        _ => return None,
    };
    Some(matcher)
}

fn expectation_object(expectation: &Expectation, with_not: bool) -> Value {
    let mut members: Vec<(String, Value)> = SYNC_MATCHERS
        .iter()
        .filter_map(|name| {
            let check = sync_matcher(name)?;
            let expectation = expectation.clone();
            let matcher = Value::native(name, move |_, _, args| {
                ready(check(&expectation, &args).map(Value::Bool).map_err(assertion_value))
            });
            Some((name.to_string(), matcher))
        })
        .collect();

    members.push(("toThrow".to_string(), to_throw_matcher(expectation.clone())));
    if with_not {
        members.push(("not".to_string(), expectation_object(&expectation.not(), false)));
    }
    Value::object(members)
}

fn to_throw_matcher(expectation: Expectation) -> Value {
    Value::native("toThrow", move |interp, _, args| {
        let expectation = expectation.clone();
        async move {
            let actual = expectation.actual().clone();
            if !matches!(actual, Value::Function(_)) {
                return Err(assertion_value(AssertionError::new(format!(
                    "toThrow expects a function, received {}",
                    actual.inspect()
                ))));
            }
            let thrown = interp
                .call_function(actual, Value::Undefined, Vec::new())
                .await
                .err();
            let expected = match arg(&args, 0) {
                Value::Undefined => None,
                other => Some(thrown_message(&other)),
            };
            expectation
                .to_throw(thrown.as_ref(), expected.as_deref())
                .map(Value::Bool)
                .map_err(assertion_value)
        }
        .boxed_local()
    })
}

// ============================================================================
// console
// ============================================================================

fn console_object(console: Rc<Console>) -> Value {
    let members = [
        ("log", LogLevel::Log),
        ("info", LogLevel::Info),
        ("warn", LogLevel::Warn),
        ("error", LogLevel::Error),
        ("debug", LogLevel::Debug),
    ]
    .into_iter()
    .map(|(name, level)| {
        let console = console.clone();
        let method = Value::native(name, move |_, _, args| {
            console.log(level, args.iter().map(Value::console_string).collect());
            ready(Ok(Value::Undefined))
        });
        (name.to_string(), method)
    });
    Value::object(members)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipc::protocol::{Envelope, ProtocolEvent};
    use crate::runtime::emitter::Emitter;
    use crate::script::parse;
    use tokio::sync::mpsc;

    struct Harness {
        interp: Interp,
        decls: Rc<RefCell<Declarations>>,
        rx: mpsc::UnboundedReceiver<Envelope>,
    }

    fn harness() -> Harness {
        let (tx, rx) = mpsc::unbounded_channel();
        let interp = Interp::new(1024);
        let decls = Rc::new(RefCell::new(Declarations::new(Duration::from_millis(5000))));
        let console = Rc::new(Console::new(Emitter::new("t", tx)));
        install(&interp, decls.clone(), console);
        Harness { interp, decls, rx }
    }

    async fn run(h: &Harness, source: &str) -> Result<(), Value> {
        h.interp.run(&parse(source).unwrap()).await
    }

    #[tokio::test]
    async fn test_describe_registers_tests() {
        let h = harness();
        run(&h, "describe('Math', () => { test('adds', () => expect(1 + 1).toBe(2)); it('subs', () => {}, 50) })")
            .await
            .unwrap();
        let registry = h.decls.borrow_mut().freeze();
        assert_eq!(registry.suite_names(), vec!["Math"]);
        let tests = &registry.suites[0].tests;
        assert_eq!(tests.len(), 2);
        assert_eq!(tests[1].timeout, Duration::from_millis(50));

        assert!((tests[0].body)().await.is_ok());
        h.interp.dispose();
    }

    #[tokio::test]
    async fn test_declaration_error_is_recorded_on_suite() {
        let h = harness();
        run(&h, "describe('Broken', () => { test('first', () => {}); throw new Error('halfway'); test('never', () => {}) })\ndescribe('Fine', () => { test('ok', () => {}) })")
            .await
            .unwrap();
        let registry = h.decls.borrow_mut().freeze();
        assert_eq!(registry.suites[0].tests.len(), 1);
        assert_eq!(registry.suites[0].errors, vec!["Error: halfway"]);
        assert_eq!(registry.suites[1].tests.len(), 1);
        h.interp.dispose();
    }

    #[tokio::test]
    async fn test_assertion_failure_is_classified() {
        let h = harness();
        run(&h, "test('fails', () => { expect([1, 2]).toEqual([2, 1]) })\ntest('throws', () => { null.x })")
            .await
            .unwrap();
        let registry = h.decls.borrow_mut().freeze();
        let tests = &registry.suites[0].tests;

        let failure = (tests[0].body)().await.unwrap_err();
        assert_eq!(failure.kind, FailureKind::Assertion);
        assert_eq!(failure.message, "expected [ 1, 2 ] to equal [ 2, 1 ]");

        let failure = (tests[1].body)().await.unwrap_err();
        assert_eq!(failure.kind, FailureKind::Error);
        assert!(failure.message.starts_with("TypeError: Cannot read properties of null"));
        h.interp.dispose();
    }

    #[tokio::test]
    async fn test_to_throw_and_not() {
        let h = harness();
        run(
            &h,
            "expect(() => { throw new Error('bad input') }).toThrow('bad')\nexpect(() => {}).not.toThrow()\nexpect(1).not.toBe(2)",
        )
        .await
        .unwrap();

        let thrown = run(&h, "expect(() => {}).toThrow()").await.unwrap_err();
        let (name, message) = thrown.error_parts().unwrap();
        assert_eq!(name, ASSERTION_ERROR);
        assert_eq!(message, "expected function to throw");
        h.interp.dispose();
    }

    #[tokio::test]
    async fn test_console_emits_log_events() {
        let mut h = harness();
        run(&h, "console.warn('count', 3, { a: [1] })").await.unwrap();
        let envelope = h.rx.try_recv().unwrap();
        match envelope.event {
            ProtocolEvent::Log(entry) => {
                assert_eq!(entry.level, LogLevel::Warn);
                assert_eq!(entry.args, vec!["count", "3", "{ a: [ 1 ] }"]);
            }
            other => panic!("unexpected event {:?}", other),
        }
        h.interp.dispose();
    }

    #[tokio::test]
    async fn test_declaring_after_freeze_throws_into_script() {
        let h = harness();
        h.decls.borrow_mut().freeze();
        let thrown = run(&h, "test('late', () => {})").await.unwrap_err();
        assert!(thrown.to_js_string().contains("once tests have started running"));
        h.interp.dispose();
    }
}
