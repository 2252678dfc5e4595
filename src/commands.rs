//! CLI command definitions
//!
//! Defines the clap commands for the testbox CLI.

use clap::Subcommand;
use std::path::PathBuf;

#[derive(Subcommand)]
pub enum Commands {
    /// Run a test script and print its results
    Run {
        /// Path to the test script
        file: PathBuf,

        /// Whole-run timeout in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,

        /// Default per-test timeout in milliseconds
        #[arg(long)]
        test_timeout_ms: Option<u64>,

        /// Run the sandbox in a child process instead of a thread
        #[arg(long)]
        process: bool,

        /// Print suite results as JSON instead of progress output
        #[arg(long)]
        json: bool,

        /// Show console output and debug logging
        #[arg(long, short)]
        verbose: bool,
    },

    /// Execute a test scenario defined in a YAML file
    Scenario {
        /// Path to the YAML scenario file
        path: PathBuf,

        /// Verbose output
        #[arg(long, short)]
        verbose: bool,
    },

    /// [Hidden] Serve one run on stdin/stdout - spawned by process isolation
    #[command(hide = true)]
    Sandbox,
}
