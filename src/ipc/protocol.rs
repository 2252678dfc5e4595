//! IPC protocol message types
//!
//! Defines the one-shot run request sent host → sandbox and the event
//! stream sent sandbox → host. Only these DTOs ever cross the isolation
//! boundary; registry entities stay inside the sandbox.

use serde::{Deserialize, Serialize};

/// Run request from host to sandbox
///
/// Deliberately not `Clone`: the sandbox takes it by value and it is
/// consumed exactly once.
#[derive(Debug, Serialize, Deserialize)]
pub struct RunRequest {
    /// Identifier stamped on every event of this run
    pub run_id: String,
    /// Test script source text
    pub source: String,
    /// Whole-run budget, informational inside the sandbox
    pub timeout_ms: u64,
    /// Default per-test budget
    pub test_timeout_ms: u64,
    /// Budget for each lifecycle hook invocation
    pub hook_timeout_ms: u64,
    /// Interpreter steps between cooperative yields
    #[serde(default = "default_yield_interval")]
    pub yield_interval: u32,
}

fn default_yield_interval() -> u32 {
    1024
}

/// Event envelope from sandbox to host
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    /// Run this event belongs to
    pub run_id: String,
    /// The event itself
    pub event: ProtocolEvent,
}

/// Events streamed from sandbox to host, in send order
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "data", rename_all = "kebab-case")]
pub enum ProtocolEvent {
    /// Registration finished; names every suite that will complete
    Registered { suites: Vec<String> },

    /// A test is about to run
    TestStart { test: String, suite: String },

    /// A test reached its terminal status
    TestComplete(TestResult),

    /// Every test of a suite finished
    SuiteComplete(SuiteResult),

    /// Console output from the script
    Log(LogEntry),

    /// Suite-level error, or fatal error when `suite` is absent
    Error(ErrorEvent),
}

impl ProtocolEvent {
    /// Whether this event terminates the stream
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Error(ErrorEvent { suite: None, .. }))
    }
}

/// Terminal test status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TestStatus {
    Passed,
    Failed,
    Skipped,
}

impl std::fmt::Display for TestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Passed => write!(f, "passed"),
            Self::Failed => write!(f, "failed"),
            Self::Skipped => write!(f, "skipped"),
        }
    }
}

/// Classification of a test failure
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// A lifecycle hook threw
    Hook,
    /// A matcher failed
    Assertion,
    /// The per-test or per-hook budget ran out
    Timeout,
    /// Anything else thrown by the test body
    Error,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Hook => "hook",
            Self::Assertion => "assertion",
            Self::Timeout => "timeout",
            Self::Error => "error",
        };
        write!(f, "{}", name)
    }
}

/// Why a test failed
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FailureDetail {
    pub kind: FailureKind,
    pub message: String,
}

impl FailureDetail {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Console log level
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Debug,
    Log,
    Info,
    Warn,
    Error,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Debug => "debug",
            Self::Log => "log",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        };
        write!(f, "{}", name)
    }
}

/// One console call
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogEntry {
    pub level: LogLevel,
    pub args: Vec<String>,
}

/// Result of a single test
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TestResult {
    pub name: String,
    pub status: TestStatus,
    /// Milliseconds
    pub duration: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<FailureDetail>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub logs: Vec<LogEntry>,
}

/// Result of a suite
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SuiteResult {
    pub name: String,
    pub tests: Vec<TestResult>,
    /// Milliseconds
    pub duration: u64,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    /// Suite-level errors (declaration, beforeAll, afterAll)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

/// Where an error event originated
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Evaluating the source failed
    Declaration,
    /// beforeAll or afterAll failed
    Hook,
    /// Unexpected fault inside the sandbox
    Internal,
}

/// Error event payload
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorEvent {
    pub error: String,
    pub kind: ErrorKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suite: Option<String>,
}
