//! Host orchestrator
//!
//! [`run_tests`] spawns a fresh sandbox, sends it the run request and
//! collects the event stream until every registered suite has completed.
//! The whole exchange runs under one timeout; on timeout or on any fatal
//! error the sandbox is torn down and partial results are discarded.

mod isolate;

use std::io;
use std::time::Duration;

use tokio::io::AsyncRead;
use uuid::Uuid;

pub use isolate::Isolation;

use crate::common::config::Config;
use crate::common::{millis, Error, Result};
use crate::ipc::protocol::{
    Envelope, ErrorEvent, ErrorKind, LogLevel, ProtocolEvent, RunRequest, SuiteResult, TestResult,
};
use crate::ipc::transport::{self, limit_from_mb, MAX_MESSAGE_SIZE};
use isolate::Sandbox;

/// Progress callbacks, invoked in stream order before the run settles
#[derive(Default)]
struct Callbacks {
    test_start: Option<Box<dyn FnMut(&str) + Send>>,
    test_complete: Option<Box<dyn FnMut(&TestResult) + Send>>,
    suite_complete: Option<Box<dyn FnMut(&SuiteResult) + Send>>,
    error: Option<Box<dyn FnMut(&str) + Send>>,
    log: Option<Box<dyn FnMut(LogLevel, &[String]) + Send>>,
}

/// Options for one run
pub struct RunOptions {
    /// Whole-run budget
    pub timeout: Duration,
    /// Default per-test budget
    pub test_timeout: Duration,
    /// Budget for each hook invocation
    pub hook_timeout: Duration,
    pub isolation: Isolation,
    /// Maximum size of one protocol message in bytes
    pub max_message_size: u32,
    /// Interpreter steps between cooperative yields
    pub yield_interval: u32,
    callbacks: Callbacks,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(30_000),
            test_timeout: Duration::from_millis(5_000),
            hook_timeout: Duration::from_millis(5_000),
            isolation: Isolation::Thread,
            max_message_size: MAX_MESSAGE_SIZE,
            yield_interval: 1024,
            callbacks: Callbacks::default(),
        }
    }
}

impl RunOptions {
    /// Defaults seeded from configuration
    pub fn from_config(config: &Config) -> Result<Self> {
        let isolation = Isolation::from_kind(config.sandbox.isolation, config)?;
        Ok(Self {
            timeout: millis(config.timeouts.run_ms),
            test_timeout: millis(config.timeouts.test_ms),
            hook_timeout: millis(config.timeouts.hook_ms),
            isolation,
            max_message_size: limit_from_mb(config.sandbox.max_message_mb),
            yield_interval: config.sandbox.yield_interval,
            callbacks: Callbacks::default(),
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_test_timeout(mut self, timeout: Duration) -> Self {
        self.test_timeout = timeout;
        self
    }

    pub fn with_hook_timeout(mut self, timeout: Duration) -> Self {
        self.hook_timeout = timeout;
        self
    }

    pub fn with_isolation(mut self, isolation: Isolation) -> Self {
        self.isolation = isolation;
        self
    }

    /// Called with the test name when a test starts
    pub fn on_test_start(mut self, f: impl FnMut(&str) + Send + 'static) -> Self {
        self.callbacks.test_start = Some(Box::new(f));
        self
    }

    pub fn on_test_complete(mut self, f: impl FnMut(&TestResult) + Send + 'static) -> Self {
        self.callbacks.test_complete = Some(Box::new(f));
        self
    }

    pub fn on_suite_complete(mut self, f: impl FnMut(&SuiteResult) + Send + 'static) -> Self {
        self.callbacks.suite_complete = Some(Box::new(f));
        self
    }

    /// Called with every error message, suite-level or fatal
    pub fn on_error(mut self, f: impl FnMut(&str) + Send + 'static) -> Self {
        self.callbacks.error = Some(Box::new(f));
        self
    }

    /// Called for every console call made by the script
    pub fn on_log(mut self, f: impl FnMut(LogLevel, &[String]) + Send + 'static) -> Self {
        self.callbacks.log = Some(Box::new(f));
        self
    }
}

/// Run a test script in a fresh sandbox
///
/// Resolves with every suite's result in registration order, or rejects
/// with the fatal error, [`Error::RunTimeout`], or [`Error::SandboxExited`].
pub async fn run_tests(source: &str, options: RunOptions) -> Result<Vec<SuiteResult>> {
    let RunOptions {
        timeout,
        test_timeout,
        hook_timeout,
        isolation,
        max_message_size: limit,
        yield_interval,
        mut callbacks,
    } = options;

    let run_id = Uuid::new_v4().to_string();
    let request = RunRequest {
        run_id: run_id.clone(),
        source: source.to_string(),
        timeout_ms: duration_ms(timeout),
        test_timeout_ms: duration_ms(test_timeout),
        hook_timeout_ms: duration_ms(hook_timeout),
        yield_interval,
    };

    let mut sandbox = Sandbox::spawn(&isolation, limit)?;
    tracing::debug!(%run_id, ?isolation, "Run started");

    let exchange = async {
        transport::send_json(&mut sandbox.control, &request, limit)
            .await
            .map_err(|e| channel_error("send run request", e))?;
        drop(request);
        collect(&mut sandbox.events, &run_id, limit, &mut callbacks).await
    };
    let outcome = match tokio::time::timeout(timeout, exchange).await {
        Ok(outcome) => outcome,
        Err(_) => Err(Error::RunTimeout(duration_ms(timeout))),
    };

    match &outcome {
        Ok(suites) => tracing::debug!(%run_id, suites = suites.len(), "Run finished"),
        Err(e) => tracing::debug!(%run_id, "Run rejected: {}", e),
    }
    sandbox.terminate(outcome.is_ok()).await;
    outcome
}

/// Read events until every registered suite has completed
async fn collect<R>(events: &mut R, run_id: &str, limit: u32, callbacks: &mut Callbacks) -> Result<Vec<SuiteResult>>
where
    R: AsyncRead + Unpin,
{
    let mut expected: Option<usize> = None;
    let mut suites = Vec::new();

    loop {
        if expected.is_some_and(|n| suites.len() >= n) {
            return Ok(suites);
        }

        let envelope: Envelope = transport::recv_json(events, limit)
            .await
            .map_err(|e| channel_error("read event", e))?;
        if envelope.run_id != run_id {
            return Err(Error::Protocol(format!(
                "event for unknown run '{}'",
                envelope.run_id
            )));
        }

        match envelope.event {
            ProtocolEvent::Registered { suites: names } => {
                tracing::debug!(?names, "Suites registered");
                expected = Some(names.len());
            }
            ProtocolEvent::TestStart { test, .. } => {
                if let Some(f) = callbacks.test_start.as_mut() {
                    f(&test);
                }
            }
            ProtocolEvent::TestComplete(result) => {
                if let Some(f) = callbacks.test_complete.as_mut() {
                    f(&result);
                }
            }
            ProtocolEvent::SuiteComplete(result) => {
                if let Some(f) = callbacks.suite_complete.as_mut() {
                    f(&result);
                }
                suites.push(result);
            }
            ProtocolEvent::Log(entry) => {
                if let Some(f) = callbacks.log.as_mut() {
                    f(entry.level, &entry.args);
                }
            }
            ProtocolEvent::Error(ErrorEvent { error, kind, suite }) => {
                if let Some(f) = callbacks.error.as_mut() {
                    f(&error);
                }
                if suite.is_none() {
                    return Err(match kind {
                        ErrorKind::Declaration => Error::Declaration(error),
                        ErrorKind::Hook | ErrorKind::Internal => Error::SandboxFault(error),
                    });
                }
            }
        }
    }
}

fn channel_error(action: &str, e: io::Error) -> Error {
    match e.kind() {
        io::ErrorKind::UnexpectedEof | io::ErrorKind::BrokenPipe => Error::SandboxExited,
        _ => Error::Protocol(format!("failed to {}: {}", action, e)),
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
