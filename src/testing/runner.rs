//! Scenario runner implementation
//!
//! Runs a scenario's script through [`run_tests`] and checks the returned
//! suite results against the scenario's expectations.

use std::path::{Path, PathBuf};

use colored::Colorize;

use crate::common::config::Config;
use crate::common::{millis, Error, Result};
use crate::host::{run_tests, Isolation, RunOptions};
use crate::ipc::protocol::{SuiteResult, TestResult};

use super::config::{RunExpectation, SuiteExpectation, TestExpectation, TestScenario};

/// Result of a scenario run
#[derive(Debug)]
pub struct ScenarioResult {
    pub name: String,
    pub passed: bool,
    /// Number of expectations that were checked
    pub checks: usize,
    pub error: Option<String>,
}

/// Run a test scenario from a YAML file
pub async fn run_scenario(path: &Path, verbose: bool) -> Result<ScenarioResult> {
    let content = std::fs::read_to_string(path).map_err(|e| Error::file_read(path, &e))?;
    let scenario: TestScenario = serde_yaml::from_str(&content)
        .map_err(|e| Error::Config(format!("Failed to parse test scenario: {}", e)))?;

    println!(
        "\n{} {}",
        "Running Scenario:".blue().bold(),
        scenario.name.white().bold()
    );
    if let Some(desc) = &scenario.description {
        println!("  {}", desc.dimmed());
    }

    let source = load_source(&scenario, path)?;
    let options = scenario_options(&scenario)?;
    let options = if verbose {
        options.on_test_complete(|test| {
            println!("  {} {} ({})", "·".dimmed(), test.name, test.status.to_string().dimmed())
        })
    } else {
        options
    };

    let outcome = run_tests(&source, options).await;
    match check_outcome(&scenario.expect, outcome) {
        Ok(checks) => {
            println!(
                "\n{} {} ({} checks)",
                "✓".green().bold(),
                "Scenario Passed".green().bold(),
                checks
            );
            Ok(ScenarioResult {
                name: scenario.name,
                passed: true,
                checks,
                error: None,
            })
        }
        Err(e) => {
            println!("\n{} {}", "✗".red().bold(), "Scenario Failed".red().bold());
            println!("  {}", e.to_string().red());
            Ok(ScenarioResult {
                name: scenario.name,
                passed: false,
                checks: 0,
                error: Some(e.to_string()),
            })
        }
    }
}

/// Script source: inline `source`, or `file` resolved against the scenario
fn load_source(scenario: &TestScenario, scenario_path: &Path) -> Result<String> {
    match (&scenario.source, &scenario.file) {
        (Some(source), None) => Ok(source.clone()),
        (None, Some(file)) => {
            let scenario_dir = scenario_path.parent().unwrap_or(Path::new("."));
            let file: PathBuf = if file.is_relative() {
                scenario_dir.join(file)
            } else {
                file.clone()
            };
            std::fs::read_to_string(&file).map_err(|e| Error::file_read(&file, &e))
        }
        (Some(_), Some(_)) => Err(Error::Config(
            "scenario must set only one of 'source' and 'file'".to_string(),
        )),
        (None, None) => Err(Error::Config(
            "scenario must set 'source' or 'file'".to_string(),
        )),
    }
}

fn scenario_options(scenario: &TestScenario) -> Result<RunOptions> {
    let config = Config::load()?;
    let mut options = RunOptions::from_config(&config)?;
    if let Some(ms) = scenario.timeout_ms {
        options = options.with_timeout(millis(ms));
    }
    if let Some(ms) = scenario.test_timeout_ms {
        options = options.with_test_timeout(millis(ms));
    }
    if let Some(kind) = scenario.isolation {
        options = options.with_isolation(Isolation::from_kind(kind, &config)?);
    }
    Ok(options)
}

fn fail(message: String) -> Error {
    Error::ScenarioAssertion(message)
}

/// Check a run outcome against expectations; returns how many checks ran
pub fn check_outcome(expect: &RunExpectation, outcome: Result<Vec<SuiteResult>>) -> Result<usize> {
    let suites = match (outcome, &expect.error_contains) {
        (Err(e), Some(expected)) => {
            let message = e.to_string();
            if !message.contains(expected.as_str()) {
                return Err(fail(format!(
                    "expected run error containing '{}', got '{}'",
                    expected, message
                )));
            }
            return Ok(1);
        }
        (Ok(_), Some(expected)) => {
            return Err(fail(format!(
                "expected the run to fail with '{}', but it completed",
                expected
            )))
        }
        (Err(e), None) => return Err(fail(format!("run failed: {}", e))),
        (Ok(suites), None) => suites,
    };

    let mut checks = 0;
    for expected in &expect.suites {
        let suite = suites.iter().find(|s| s.name == expected.name).ok_or_else(|| {
            let names: Vec<&str> = suites.iter().map(|s| s.name.as_str()).collect();
            fail(format!("suite '{}' not found (have {:?})", expected.name, names))
        })?;
        checks += check_suite(expected, suite)?;
    }
    Ok(checks)
}

fn check_count(suite: &str, what: &str, expected: Option<usize>, actual: usize) -> Result<usize> {
    match expected {
        Some(expected) if expected != actual => Err(fail(format!(
            "suite '{}': expected {} {}, got {}",
            suite, expected, what, actual
        ))),
        Some(_) => Ok(1),
        None => Ok(0),
    }
}

fn check_suite(expected: &SuiteExpectation, suite: &SuiteResult) -> Result<usize> {
    let mut checks = 1;
    checks += check_count(&suite.name, "passed", expected.passed, suite.passed)?;
    checks += check_count(&suite.name, "failed", expected.failed, suite.failed)?;
    checks += check_count(&suite.name, "skipped", expected.skipped, suite.skipped)?;

    if let Some(needle) = &expected.errors_contain {
        if !suite.errors.iter().any(|e| e.contains(needle.as_str())) {
            return Err(fail(format!(
                "suite '{}': no suite error contains '{}' (errors: {:?})",
                suite.name, needle, suite.errors
            )));
        }
        checks += 1;
    }

    for test_expectation in &expected.tests {
        let test = suite
            .tests
            .iter()
            .find(|t| t.name == test_expectation.name)
            .ok_or_else(|| {
                fail(format!(
                    "suite '{}': test '{}' not found",
                    suite.name, test_expectation.name
                ))
            })?;
        checks += check_test(&suite.name, test_expectation, test)?;
    }
    Ok(checks)
}

fn check_test(suite: &str, expected: &TestExpectation, test: &TestResult) -> Result<usize> {
    let mut checks = 1;
    if let Some(status) = expected.status {
        if status != test.status {
            return Err(fail(format!(
                "{} > {}: expected status {}, got {}",
                suite, test.name, status, test.status
            )));
        }
        checks += 1;
    }

    if let Some(needle) = &expected.error_contains {
        let message = test.error.as_ref().map(|e| e.message.as_str()).unwrap_or("");
        if !message.contains(needle.as_str()) {
            return Err(fail(format!(
                "{} > {}: expected error containing '{}', got '{}'",
                suite, test.name, needle, message
            )));
        }
        checks += 1;
    }

    if let Some(needle) = &expected.logs_contain {
        let found = test
            .logs
            .iter()
            .any(|entry| entry.args.join(" ").contains(needle.as_str()));
        if !found {
            return Err(fail(format!(
                "{} > {}: no captured log contains '{}'",
                suite, test.name, needle
            )));
        }
        checks += 1;
    }
    Ok(checks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipc::protocol::{FailureDetail, FailureKind, LogEntry, LogLevel, TestStatus};

    fn results() -> Vec<SuiteResult> {
        vec![SuiteResult {
            name: "Math".to_string(),
            tests: vec![
                TestResult {
                    name: "adds".to_string(),
                    status: TestStatus::Passed,
                    duration: 1,
                    error: None,
                    logs: vec![LogEntry {
                        level: LogLevel::Log,
                        args: vec!["sum".to_string(), "2".to_string()],
                    }],
                },
                TestResult {
                    name: "divides".to_string(),
                    status: TestStatus::Failed,
                    duration: 1,
                    error: Some(FailureDetail::new(FailureKind::Assertion, "expected 1 to be 2")),
                    logs: Vec::new(),
                },
            ],
            duration: 2,
            passed: 1,
            failed: 1,
            skipped: 0,
            errors: Vec::new(),
        }]
    }

    fn expectation(yaml: &str) -> RunExpectation {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn test_matching_expectations_pass() {
        let expect = expectation(
            r#"
suites:
  - name: Math
    passed: 1
    failed: 1
    tests:
      - name: adds
        status: passed
        logs_contain: "sum 2"
      - name: divides
        status: failed
        error_contains: "to be 2"
"#,
        );
        let checks = check_outcome(&expect, Ok(results())).unwrap();
        assert_eq!(checks, 9);
    }

    #[test]
    fn test_count_mismatch_fails() {
        let expect = expectation("suites:\n  - name: Math\n    passed: 2\n");
        let err = check_outcome(&expect, Ok(results())).unwrap_err();
        assert!(err.to_string().contains("expected 2 passed, got 1"));
    }

    #[test]
    fn test_missing_suite_fails() {
        let expect = expectation("suites:\n  - name: Strings\n");
        let err = check_outcome(&expect, Ok(results())).unwrap_err();
        assert!(err.to_string().contains("suite 'Strings' not found"));
    }

    #[test]
    fn test_expected_error() {
        let expect = expectation("error_contains: timed out\n");
        assert_eq!(check_outcome(&expect, Err(Error::RunTimeout(500))).unwrap(), 1);
        assert!(check_outcome(&expect, Ok(results())).is_err());
        assert!(check_outcome(&expect, Err(Error::SandboxExited)).is_err());
    }

    #[test]
    fn test_scenario_file_parses() {
        let scenario: TestScenario = serde_yaml::from_str(
            r#"
name: inline
source: |
  test('a', () => {})
isolation: process
timeout_ms: 2000
expect:
  suites:
    - name: default
      passed: 1
"#,
        )
        .unwrap();
        assert_eq!(scenario.timeout_ms, Some(2000));
        assert_eq!(
            scenario.isolation,
            Some(crate::common::config::IsolationKind::Process)
        );
        assert_eq!(load_source(&scenario, Path::new("x.yaml")).unwrap(), "test('a', () => {})\n");
    }
}
