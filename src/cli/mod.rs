//! CLI command handling
//!
//! Runs scripts and scenarios through the host and formats output.

use std::path::Path;

use colored::Colorize;

use crate::commands::Commands;
use crate::common::config::{Config, IsolationKind};
use crate::common::{millis, Error, Result};
use crate::host::{run_tests, Isolation, RunOptions};
use crate::ipc::protocol::{LogLevel, SuiteResult, TestResult, TestStatus};
use crate::testing;

/// Dispatch a CLI command
///
/// Returns whether everything passed; the caller maps that to the exit code.
pub async fn dispatch(command: Commands) -> Result<bool> {
    match command {
        Commands::Sandbox => Err(Error::Internal(
            "sandbox command must be handled in main".to_string(),
        )),

        Commands::Run {
            file,
            timeout_ms,
            test_timeout_ms,
            process,
            json,
            verbose,
        } => {
            let config = Config::load()?;
            let mut options = RunOptions::from_config(&config)?;
            if let Some(ms) = timeout_ms {
                options = options.with_timeout(millis(ms));
            }
            if let Some(ms) = test_timeout_ms {
                options = options.with_test_timeout(millis(ms));
            }
            if process {
                options = options.with_isolation(Isolation::from_kind(IsolationKind::Process, &config)?);
            }
            run_file(&file, options, json, verbose).await
        }

        Commands::Scenario { path, verbose } => {
            let result = testing::run_scenario(&path, verbose).await?;
            Ok(result.passed)
        }
    }
}

async fn run_file(path: &Path, options: RunOptions, json: bool, verbose: bool) -> Result<bool> {
    let source = std::fs::read_to_string(path).map_err(|e| Error::file_read(path, &e))?;

    let options = if json {
        options
    } else {
        println!("\n{} {}", "Running".blue().bold(), path.display().to_string().white().bold());
        let options = options
            .on_test_complete(print_test)
            .on_suite_complete(print_suite_footer)
            .on_error(|error| println!("  {} {}", "!".yellow().bold(), error.yellow()));
        if verbose {
            options.on_log(print_log)
        } else {
            options
        }
    };

    let suites = run_tests(&source, options).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&suites)?);
    } else {
        print_summary(&suites);
    }
    Ok(suites.iter().all(|s| s.failed == 0 && s.errors.is_empty()))
}

fn print_test(result: &TestResult) {
    let mark = match result.status {
        TestStatus::Passed => "✓".green(),
        TestStatus::Failed => "✗".red(),
        TestStatus::Skipped => "-".dimmed(),
    };
    println!(
        "  {} {} {}",
        mark,
        result.name,
        format!("({} ms)", result.duration).dimmed()
    );
    if let Some(error) = &result.error {
        println!("      {} {}", format!("[{}]", error.kind).red(), error.message);
    }
}

fn print_suite_footer(suite: &SuiteResult) {
    println!(
        "  {} {}: {} passed, {} failed, {} skipped",
        "▸".cyan(),
        suite.name.bold(),
        suite.passed,
        suite.failed,
        suite.skipped
    );
}

fn print_log(level: LogLevel, args: &[String]) {
    let line = args.join(" ");
    match level {
        LogLevel::Warn => println!("    {} {}", "console.warn".yellow(), line),
        LogLevel::Error => println!("    {} {}", "console.error".red(), line),
        other => println!("    {} {}", format!("console.{}", other).dimmed(), line),
    }
}

fn print_summary(suites: &[SuiteResult]) {
    let passed: usize = suites.iter().map(|s| s.passed).sum();
    let failed: usize = suites.iter().map(|s| s.failed).sum();
    let skipped: usize = suites.iter().map(|s| s.skipped).sum();
    let errors: usize = suites.iter().map(|s| s.errors.len()).sum();

    println!();
    if failed == 0 && errors == 0 {
        println!(
            "{} {} passed, {} skipped",
            "✓".green().bold(),
            passed.to_string().green().bold(),
            skipped
        );
    } else {
        println!(
            "{} {} passed, {} failed, {} skipped, {} suite errors",
            "✗".red().bold(),
            passed,
            failed.to_string().red().bold(),
            skipped,
            errors
        );
    }
}
