//! testbox - sandboxed test-execution engine
//!
//! Test scripts declare suites, tests and hooks through `describe`, `test`,
//! `beforeEach` and friends. [`run_tests`] evaluates a script in an isolated
//! sandbox (a dedicated thread or a child process) and streams progress back
//! over a length-prefixed JSON event protocol.

pub mod cli;
pub mod commands;
pub mod common;
pub mod host;
pub mod ipc;
pub mod runtime;
pub mod sandbox;
pub mod script;
pub mod testing;

// Re-export commonly used types
pub use common::{Error, Result};
pub use host::{run_tests, Isolation, RunOptions};
pub use ipc::protocol::{FailureDetail, FailureKind, LogLevel, SuiteResult, TestResult, TestStatus};
