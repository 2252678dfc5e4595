//! Execution scheduler
//!
//! Runs a frozen [`Registry`] suite by suite, test by test, strictly
//! sequentially. Each test body and each hook invocation races its own
//! timer; the losing future is dropped so a late settlement cannot touch
//! later tests.

use std::rc::Rc;
use std::time::{Duration, Instant};

use tokio::time;

use crate::common::{elapsed_ms, Error, Result};
use crate::ipc::protocol::{
    ErrorEvent, ErrorKind, FailureDetail, FailureKind, ProtocolEvent, SuiteResult, TestResult,
    TestStatus,
};

use super::console::Console;
use super::emitter::Emitter;
use super::registry::{Callable, CaseStatus, HookKind, Registry, RegistryError, TestCase, TestSuite};

pub struct Scheduler {
    emitter: Emitter,
    console: Rc<Console>,
    hook_timeout: Duration,
}

/// `beforeEach` and `afterEach` hooks that apply to one suite's tests,
/// already in invocation order
struct EachHooks {
    before: Vec<Callable>,
    after: Vec<Callable>,
}

fn internal(err: RegistryError) -> Error {
    Error::Internal(err.to_string())
}

impl Scheduler {
    pub fn new(emitter: Emitter, console: Rc<Console>, hook_timeout: Duration) -> Self {
        Self {
            emitter,
            console,
            hook_timeout,
        }
    }

    /// Run every suite in registration order
    pub async fn run(&self, registry: Registry) -> Result<Vec<SuiteResult>> {
        let each_hooks: Vec<EachHooks> = registry
            .suites
            .iter()
            .map(|suite| {
                let chain = registry.ancestry(suite.id);
                EachHooks {
                    before: chain
                        .iter()
                        .flat_map(|id| registry.suites[id.0].hooks.before_each.iter().cloned())
                        .collect(),
                    after: chain
                        .iter()
                        .rev()
                        .flat_map(|id| registry.suites[id.0].hooks.after_each.iter().cloned())
                        .collect(),
                }
            })
            .collect();

        let mut results = Vec::with_capacity(registry.suites.len());
        for (suite, hooks) in registry.suites.into_iter().zip(each_hooks) {
            results.push(self.run_suite(suite, &hooks).await?);
        }
        Ok(results)
    }

    async fn run_suite(&self, suite: TestSuite, each: &EachHooks) -> Result<SuiteResult> {
        let started = Instant::now();
        let TestSuite {
            name,
            mut tests,
            hooks,
            mut errors,
            ..
        } = suite;
        tracing::debug!(suite = %name, tests = tests.len(), "Running suite");

        for error in &errors {
            self.suite_error(&name, ErrorKind::Declaration, error.clone());
        }

        let runnable = tests.iter().any(|t| !t.skip);
        let mut before_all_failure = None;
        if runnable {
            if let Err(failure) = self.run_hooks(HookKind::BeforeAll, &hooks.before_all).await {
                tracing::debug!(suite = %name, error = %failure.message, "beforeAll failed");
                errors.push(failure.message.clone());
                self.suite_error(&name, ErrorKind::Hook, failure.message.clone());
                before_all_failure = Some(failure);
            }
        }

        let mut results = Vec::with_capacity(tests.len());
        for test in &mut tests {
            self.emitter.emit(ProtocolEvent::TestStart {
                test: test.name.clone(),
                suite: name.clone(),
            });

            if test.skip {
                test.transition(CaseStatus::Skipped).map_err(internal)?;
            } else if let Some(failure) = &before_all_failure {
                test.failure = Some(FailureDetail::new(FailureKind::Hook, failure.message.clone()));
                test.transition(CaseStatus::Failed).map_err(internal)?;
            } else {
                self.run_test(test, each).await?;
            }

            let result = test_result(test)?;
            self.emitter.emit(ProtocolEvent::TestComplete(result.clone()));
            results.push(result);
        }

        if runnable {
            for hook in &hooks.after_all {
                if let Err(failure) = self.run_hook(HookKind::AfterAll, hook).await {
                    errors.push(failure.message.clone());
                    self.suite_error(&name, ErrorKind::Hook, failure.message);
                }
            }
        }

        let count = |status: TestStatus| results.iter().filter(|r| r.status == status).count();
        let result = SuiteResult {
            passed: count(TestStatus::Passed),
            failed: count(TestStatus::Failed),
            skipped: count(TestStatus::Skipped),
            name,
            tests: results,
            duration: elapsed_ms(started),
            errors,
        };
        tracing::debug!(
            suite = %result.name,
            passed = result.passed,
            failed = result.failed,
            skipped = result.skipped,
            "Suite complete"
        );
        self.emitter.emit(ProtocolEvent::SuiteComplete(result.clone()));
        Ok(result)
    }

    async fn run_test(&self, test: &mut TestCase, each: &EachHooks) -> Result<()> {
        test.transition(CaseStatus::Running).map_err(internal)?;
        let started = Instant::now();
        self.console.begin_capture();

        let mut failure = self.run_hooks(HookKind::BeforeEach, &each.before).await.err();
        if failure.is_none() {
            failure = match time::timeout(test.timeout, (test.body)()).await {
                Ok(outcome) => outcome.err(),
                Err(_) => Some(FailureDetail::new(
                    FailureKind::Timeout,
                    format!("Test timed out after {} ms", test.timeout.as_millis()),
                )),
            };
        }
        for hook in &each.after {
            if let Err(hook_failure) = self.run_hook(HookKind::AfterEach, hook).await {
                failure.get_or_insert(hook_failure);
            }
        }

        test.logs = self.console.end_capture();
        test.duration = elapsed_ms(started);
        let status = if failure.is_some() {
            CaseStatus::Failed
        } else {
            CaseStatus::Passed
        };
        tracing::trace!(test = %test.name, %status, duration = test.duration, "Test finished");
        test.failure = failure;
        test.transition(status).map_err(internal)
    }

    /// Run hooks in order, stopping at the first failure
    async fn run_hooks(&self, kind: HookKind, hooks: &[Callable]) -> std::result::Result<(), FailureDetail> {
        for hook in hooks {
            self.run_hook(kind, hook).await?;
        }
        Ok(())
    }

    async fn run_hook(&self, kind: HookKind, hook: &Callable) -> std::result::Result<(), FailureDetail> {
        match time::timeout(self.hook_timeout, hook()).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(failure)) => Err(FailureDetail::new(
                FailureKind::Hook,
                format!("{} hook: {}", kind, failure.message),
            )),
            Err(_) => Err(FailureDetail::new(
                FailureKind::Timeout,
                format!("{} hook timed out after {} ms", kind, self.hook_timeout.as_millis()),
            )),
        }
    }

    fn suite_error(&self, suite: &str, kind: ErrorKind, error: String) {
        self.emitter.emit(ProtocolEvent::Error(ErrorEvent {
            error,
            kind,
            suite: Some(suite.to_string()),
        }));
    }
}

fn test_result(test: &TestCase) -> Result<TestResult> {
    let status = test
        .status()
        .as_result()
        .ok_or_else(|| Error::Internal(format!("test '{}' finished in state {}", test.name, test.status())))?;
    Ok(TestResult {
        name: test.name.clone(),
        status,
        duration: test.duration,
        error: test.failure.clone(),
        logs: test.logs.clone(),
    })
}
