//! testbox CLI - run test scripts in an isolated sandbox
//!
//! `run` and `scenario` drive the host; the hidden `sandbox` command serves
//! one run on stdin/stdout for process isolation.

use clap::Parser;
use commands::Commands;
use testbox::common::{config::Config, logging};
use testbox::ipc::transport::limit_from_mb;
use testbox::{cli, commands, sandbox};

#[derive(Parser)]
#[command(name = "testbox", about = "Sandboxed test-execution engine")]
#[command(version, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

fn main() {
    let cli = Cli::parse();

    let code = match cli.command {
        Commands::Sandbox => run_sandbox(),
        command => run_cli(command),
    };
    std::process::exit(code);
}

/// Serve one run on stdin/stdout
///
/// Runs on the sandbox thread rather than `main` so nested script calls get
/// the larger stack.
fn run_sandbox() -> i32 {
    let (log_file, _guard) = logging::init_sandbox();
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = std::process::id(),
        log_file = ?log_file,
        "Starting sandbox"
    );

    let limit = match Config::load() {
        Ok(config) => limit_from_mb(config.sandbox.max_message_mb),
        Err(e) => {
            tracing::warn!("Using default configuration: {}", e);
            limit_from_mb(Config::default().sandbox.max_message_mb)
        }
    };

    let handle = match sandbox::spawn_thread(|| (tokio::io::stdin(), tokio::io::stdout()), limit) {
        Ok(handle) => handle,
        Err(e) => {
            tracing::error!("Failed to start sandbox thread: {}", e);
            return 1;
        }
    };
    match handle.join() {
        Ok(()) => 0,
        Err(_) => 1,
    }
}

fn run_cli(command: Commands) -> i32 {
    let verbose = match &command {
        Commands::Run { verbose, .. } | Commands::Scenario { verbose, .. } => *verbose,
        Commands::Sandbox => false,
    };
    logging::init_cli(verbose);

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Error: failed to start runtime: {e}");
            return 1;
        }
    };

    match runtime.block_on(cli::dispatch(command)) {
        Ok(true) => 0,
        Ok(false) => 1,
        Err(e) => {
            eprintln!("Error: {e}");
            1
        }
    }
}
