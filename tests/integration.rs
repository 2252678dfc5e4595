//! End-to-end integration tests for testbox
//!
//! These tests drive the public `run_tests` API through both isolation
//! kinds and run the built binary against the fixtures and scenarios under
//! `tests/`.

use std::path::PathBuf;
use std::process::Command;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use testbox::{run_tests, Error, FailureKind, Isolation, RunOptions, TestStatus};

fn manifest_path(relative: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join(relative)
}

fn process_isolation() -> Isolation {
    Isolation::Process {
        program: PathBuf::from(env!("CARGO_BIN_EXE_testbox")),
        args: vec!["sandbox".to_string()],
    }
}

/// Run the binary with config and data dirs pointed at a temp dir
fn run_testbox(args: &[&str]) -> std::process::Output {
    let home = tempfile::tempdir().expect("Failed to create temp dir");
    Command::new(env!("CARGO_BIN_EXE_testbox"))
        .args(args)
        .env("XDG_CONFIG_HOME", home.path().join("config"))
        .env("XDG_DATA_HOME", home.path().join("data"))
        .env("NO_COLOR", "1")
        .output()
        .expect("Failed to run testbox")
}

// ============== Library: thread isolation ==============

#[tokio::test(flavor = "multi_thread")]
async fn test_single_passing_suite() {
    let suites = run_tests(
        "describe('Math', () => { test('adds', () => expect(1+1).toBe(2)) })",
        RunOptions::default(),
    )
    .await
    .unwrap();

    assert_eq!(suites.len(), 1);
    assert_eq!(suites[0].name, "Math");
    assert_eq!(suites[0].tests.len(), 1);
    assert_eq!(suites[0].tests[0].name, "adds");
    assert_eq!(suites[0].tests[0].status, TestStatus::Passed);
    assert_eq!((suites[0].passed, suites[0].failed, suites[0].skipped), (1, 0, 0));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_every_test_and_suite_completes_in_order() {
    let source = r#"
        describe('A', () => { test('a1', () => {}); test('a2', () => {}) })
        describe('B', () => { test('b1', () => {}) })
        describe('C', () => { test('c1', () => {}); test('c2', () => {}); test('c3', () => {}) })
    "#;
    let completed = Arc::new(Mutex::new(Vec::new()));
    let suites_done = Arc::new(Mutex::new(Vec::new()));
    let (tests_sink, suites_sink) = (completed.clone(), suites_done.clone());

    let options = RunOptions::default()
        .on_test_complete(move |t| tests_sink.lock().unwrap().push(t.name.clone()))
        .on_suite_complete(move |s| suites_sink.lock().unwrap().push(s.name.clone()));
    let suites = run_tests(source, options).await.unwrap();

    let counts: Vec<usize> = suites.iter().map(|s| s.tests.len()).collect();
    assert_eq!(counts, vec![2, 1, 3]);
    assert_eq!(
        *completed.lock().unwrap(),
        vec!["a1", "a2", "b1", "c1", "c2", "c3"]
    );
    assert_eq!(*suites_done.lock().unwrap(), vec!["A", "B", "C"]);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_identical_source_gives_identical_results() {
    let source = std::fs::read_to_string(manifest_path("tests/fixtures/math.js")).unwrap();
    let summary = |suites: &[testbox::SuiteResult]| -> Vec<(String, usize, usize, usize, Vec<String>)> {
        suites
            .iter()
            .map(|s| {
                (
                    s.name.clone(),
                    s.passed,
                    s.failed,
                    s.skipped,
                    s.tests.iter().map(|t| t.name.clone()).collect(),
                )
            })
            .collect()
    };

    let first = run_tests(&source, RunOptions::default()).await.unwrap();
    let second = run_tests(&source, RunOptions::default()).await.unwrap();
    assert_eq!(summary(&first), summary(&second));
    assert_eq!(
        summary(&first).iter().map(|s| s.0.as_str()).collect::<Vec<_>>(),
        vec!["Math", "Math > floats", "Collections"]
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn test_never_settling_test_times_out_without_blocking_others() {
    let source = r#"
        test('hangs', () => new Promise(() => {}), 200)
        test('spins', () => { while (true) {} }, 200)
        test('next', () => expect(true).toBeTruthy())
    "#;
    let started = Instant::now();
    let suites = run_tests(source, RunOptions::default()).await.unwrap();
    assert!(started.elapsed() < Duration::from_secs(3));

    let tests = &suites[0].tests;
    for timed_out in &tests[..2] {
        let error = timed_out.error.as_ref().unwrap();
        assert_eq!(timed_out.status, TestStatus::Failed);
        assert_eq!(error.kind, FailureKind::Timeout);
        assert_eq!(error.message, "Test timed out after 200 ms");
    }
    assert_eq!(tests[2].status, TestStatus::Passed);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_throwing_before_all_runs_no_bodies() {
    let source = r#"
        describe('S', () => {
            beforeAll(() => { throw new Error('no db') })
            test('one', () => { console.log('body ran') })
            test('two', () => { console.log('body ran') })
        })
    "#;
    let logs = Arc::new(Mutex::new(Vec::new()));
    let sink = logs.clone();
    let options = RunOptions::default().on_log(move |_, args| sink.lock().unwrap().push(args.join(" ")));
    let suites = run_tests(source, options).await.unwrap();

    assert!(logs.lock().unwrap().is_empty());
    assert_eq!(suites[0].failed, 2);
    for test in &suites[0].tests {
        let error = test.error.as_ref().unwrap();
        assert_eq!(error.kind, FailureKind::Hook);
        assert!(error.message.contains("no db"));
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_matcher_semantics() {
    let source = r#"
        test('object key order', () => expect({a: 1, b: 2}).toEqual({b: 2, a: 1}))
        test('array order', () => expect([1, 2]).toEqual([2, 1]))
        test('throws matching', () => expect(() => { throw new Error('bad input') }).toThrow('bad'))
        test('does not throw', () => expect(() => {}).toThrow())
    "#;
    let suites = run_tests(source, RunOptions::default()).await.unwrap();
    let statuses: Vec<TestStatus> = suites[0].tests.iter().map(|t| t.status).collect();
    assert_eq!(
        statuses,
        vec![TestStatus::Passed, TestStatus::Failed, TestStatus::Passed, TestStatus::Failed]
    );
    let kind = suites[0].tests[1].error.as_ref().unwrap().kind;
    assert_eq!(kind, FailureKind::Assertion);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_run_timeout_discards_partial_results() {
    let source = r#"
        test('quick', () => {})
        test('forever', async () => { await sleep(Infinity) })
    "#;
    let started_tests = Arc::new(Mutex::new(Vec::new()));
    let sink = started_tests.clone();
    let options = RunOptions::default()
        .with_timeout(Duration::from_millis(500))
        .with_test_timeout(Duration::from_secs(60))
        .on_test_start(move |name| sink.lock().unwrap().push(name.to_string()));

    let started = Instant::now();
    let err = run_tests(source, options).await.unwrap_err();
    let elapsed = started.elapsed();

    assert!(matches!(err, Error::RunTimeout(500)), "unexpected error: {err}");
    assert!(err.is_timeout());
    assert!(elapsed >= Duration::from_millis(500));
    assert!(elapsed < Duration::from_secs(2), "took {:?}", elapsed);
    assert_eq!(*started_tests.lock().unwrap(), vec!["quick", "forever"]);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_syntax_error_rejects_run() {
    let err = run_tests("describe('x', () => {", RunOptions::default())
        .await
        .unwrap_err();
    match err {
        Error::Declaration(message) => assert!(message.starts_with("SyntaxError"), "{message}"),
        other => panic!("expected declaration error, got {other}"),
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_suite_declaration_error_does_not_stop_other_suites() {
    let source = r#"
        describe('Bad', () => { null.boom })
        describe('Good', () => { test('ok', () => {}) })
    "#;
    let errors = Arc::new(Mutex::new(Vec::new()));
    let sink = errors.clone();
    let options = RunOptions::default().on_error(move |e| sink.lock().unwrap().push(e.to_string()));
    let suites = run_tests(source, options).await.unwrap();

    assert_eq!(suites.len(), 2);
    assert_eq!(suites[0].tests.len(), 0);
    assert!(suites[0].errors[0].starts_with("TypeError: Cannot read properties of null"));
    assert_eq!(suites[1].passed, 1);
    assert_eq!(errors.lock().unwrap().len(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_runaway_recursion_fails_only_its_test() {
    let source = r#"
        function down(n) { return down(n + 1) }
        test('recurses', () => down(0))
        test('after', () => {})
    "#;
    let suites = run_tests(source, RunOptions::default()).await.unwrap();
    let error = suites[0].tests[0].error.as_ref().unwrap();
    assert_eq!(error.kind, FailureKind::Error);
    assert!(error.message.contains("Maximum call stack size exceeded"));
    assert_eq!(suites[0].tests[1].status, TestStatus::Passed);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_oversized_array_fails_only_its_test() {
    let source = r#"
        test('sparse index', () => { const a = []; a[1e18] = 1 })
        test('huge length', () => { const a = []; a.length = 1e19 })
        test('big index', () => { const a = []; a[1e9] = 1 })
        test('after', () => { const a = []; a[9] = 1; expect(a.length).toBe(10) })
    "#;
    let suites = run_tests(source, RunOptions::default()).await.unwrap();
    let tests = &suites[0].tests;
    for failed in &tests[..3] {
        let error = failed.error.as_ref().unwrap();
        assert_eq!(error.kind, FailureKind::Error, "{}", failed.name);
        assert_eq!(error.message, "RangeError: Invalid array length");
    }
    assert_eq!(tests[3].status, TestStatus::Passed);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_deeply_nested_structures_fail_only_their_test() {
    let source = r#"
        function chain(depth) {
            let node = null
            for (let i = 0; i < depth; i++) { node = { n: node } }
            return node
        }
        const deep = chain(200000)
        test('deep equality', () => expect(deep).toEqual({}), 30000)
        test('deep stringify', () => { JSON.stringify(deep) }, 30000)
        test('deep log', () => { console.log(deep) }, 30000)
        test('after', () => expect(chain(3)).toEqual({ n: { n: { n: null } } }))
    "#;
    let options = RunOptions::default().with_timeout(Duration::from_secs(120));
    let suites = run_tests(source, options).await.unwrap();
    let tests = &suites[0].tests;

    let equality = tests[0].error.as_ref().unwrap();
    assert_eq!(equality.kind, FailureKind::Assertion);
    assert!(equality.message.contains("structure too deep"), "{}", equality.message);

    let stringify = tests[1].error.as_ref().unwrap();
    assert!(stringify.message.starts_with("RangeError"), "{}", stringify.message);

    assert_eq!(tests[2].status, TestStatus::Passed);
    assert!(tests[2].logs[0].args[0].contains("[Object]"));
    assert_eq!(tests[3].status, TestStatus::Passed);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_only_focuses_run() {
    let source = r#"
        test('plain', () => {})
        test.only('focused', () => {})
        xit('disabled', () => {})
    "#;
    let suites = run_tests(source, RunOptions::default()).await.unwrap();
    let statuses: Vec<(&str, TestStatus)> = suites[0]
        .tests
        .iter()
        .map(|t| (t.name.as_str(), t.status))
        .collect();
    assert_eq!(
        statuses,
        vec![
            ("plain", TestStatus::Skipped),
            ("focused", TestStatus::Passed),
            ("disabled", TestStatus::Skipped)
        ]
    );
}

// ============== Library: process isolation ==============

#[tokio::test(flavor = "multi_thread")]
async fn test_process_isolation_runs_fixture() {
    let source = std::fs::read_to_string(manifest_path("tests/fixtures/math.js")).unwrap();
    let options = RunOptions::default().with_isolation(process_isolation());
    let suites = run_tests(&source, options).await.unwrap();

    assert_eq!(suites.len(), 3);
    assert_eq!((suites[0].passed, suites[0].failed), (3, 0));
    assert_eq!(suites[2].skipped, 1);
    let fib = suites[0].tests.iter().find(|t| t.name == "fibonacci").unwrap();
    assert_eq!(fib.logs[0].args, vec!["fib(10) =", "55"]);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_process_isolation_timeout() {
    let options = RunOptions::default()
        .with_isolation(process_isolation())
        .with_timeout(Duration::from_millis(500))
        .with_test_timeout(Duration::from_secs(60));
    let started = Instant::now();
    let err = run_tests("test('spin', () => { while (true) {} })", options)
        .await
        .unwrap_err();
    assert!(err.is_timeout());
    assert!(started.elapsed() < Duration::from_secs(3));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_missing_sandbox_program_fails_to_spawn() {
    let options = RunOptions::default().with_isolation(Isolation::Process {
        program: PathBuf::from("/nonexistent/testbox-sandbox"),
        args: Vec::new(),
    });
    let err = run_tests("test('a', () => {})", options).await.unwrap_err();
    assert!(matches!(err, Error::SandboxSpawn(_)), "unexpected error: {err}");
}

// ============== Binary ==============

#[test]
fn test_cli_run_passing_fixture() {
    let fixture = manifest_path("tests/fixtures/math.js");
    let output = run_testbox(&["run", fixture.to_str().unwrap()]);
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(output.status.success(), "stdout: {stdout}");
    assert!(stdout.contains("fibonacci"));
    assert!(stdout.contains("6 passed, 1 skipped"));
}

#[test]
fn test_cli_run_failing_fixture_exits_nonzero() {
    let fixture = manifest_path("tests/fixtures/failing.js");
    let output = run_testbox(&["run", fixture.to_str().unwrap(), "--json"]);
    assert_eq!(output.status.code(), Some(1));

    let suites: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(suites[0]["name"], "Failures");
    assert_eq!(suites[0]["failed"], 2);
    assert_eq!(suites[0]["tests"][0]["error"]["kind"], "assertion");
    assert_eq!(suites[0]["tests"][1]["error"]["message"], "TypeError: boom");
}

#[test]
fn test_cli_run_with_process_isolation() {
    let fixture = manifest_path("tests/fixtures/failing.js");
    let output = run_testbox(&["run", fixture.to_str().unwrap(), "--process", "--json"]);
    assert_eq!(output.status.code(), Some(1));
    let suites: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(suites[0]["passed"], 1);
}

#[test]
fn test_cli_scenarios() {
    for scenario in ["math.yaml", "hooks.yaml", "timeout.yaml"] {
        let path = manifest_path("tests/scenarios").join(scenario);
        let output = run_testbox(&["scenario", path.to_str().unwrap()]);
        assert!(
            output.status.success(),
            "scenario {scenario} failed:\nstdout: {}\nstderr: {}",
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr)
        );
    }
}

#[test]
fn test_cli_missing_file() {
    let output = run_testbox(&["run", "/nonexistent/script.js"]);
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("Failed to read file"));
}
