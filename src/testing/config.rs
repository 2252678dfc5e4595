//! Test scenario configuration types
//!
//! Defines the data structures for deserializing YAML test scenarios.

use serde::Deserialize;
use std::path::PathBuf;

use crate::common::config::IsolationKind;
use crate::ipc::protocol::TestStatus;

/// A complete test scenario loaded from a YAML file
#[derive(Deserialize, Debug)]
pub struct TestScenario {
    /// Name of the test scenario
    pub name: String,
    /// Optional description of what the scenario verifies
    pub description: Option<String>,
    /// Inline test script
    pub source: Option<String>,
    /// Test script file, relative to the scenario file
    pub file: Option<PathBuf>,
    /// Whole-run timeout in milliseconds
    pub timeout_ms: Option<u64>,
    /// Default per-test timeout in milliseconds
    pub test_timeout_ms: Option<u64>,
    /// Isolation override: "thread" or "process"
    pub isolation: Option<IsolationKind>,
    /// What the run must produce
    pub expect: RunExpectation,
}

/// Expectations for the whole run
#[derive(Deserialize, Debug, Default)]
pub struct RunExpectation {
    /// The run must reject with an error containing this text
    pub error_contains: Option<String>,
    /// Suites that must be present in the results
    #[serde(default)]
    pub suites: Vec<SuiteExpectation>,
}

/// Expectations for one suite
#[derive(Deserialize, Debug)]
pub struct SuiteExpectation {
    /// Suite name (nested suites use `Outer > Inner`)
    pub name: String,
    pub passed: Option<usize>,
    pub failed: Option<usize>,
    pub skipped: Option<usize>,
    /// Substring expected in one of the suite-level errors
    pub errors_contain: Option<String>,
    /// Tests that must be present in the suite
    #[serde(default)]
    pub tests: Vec<TestExpectation>,
}

/// Expectations for one test
#[derive(Deserialize, Debug)]
pub struct TestExpectation {
    /// Test name
    pub name: String,
    /// Expected terminal status
    pub status: Option<TestStatus>,
    /// Substring expected in the failure message
    pub error_contains: Option<String>,
    /// Substring expected in one captured console line
    pub logs_contain: Option<String>,
}
