//! Logging and tracing configuration
//!
//! The CLI logs to stderr so stdout stays free for results. A process
//! sandbox must never write logs to stdout (it carries the event stream), so
//! it logs to a file plus stderr.

use std::path::PathBuf;
use tracing::Subscriber;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use super::paths;

/// Initialize tracing for the CLI (stderr logging)
///
/// Logs are controlled by the `RUST_LOG` environment variable.
/// Default level is WARN so progress output stays readable.
pub fn init_cli(verbose: bool) {
    let default = if verbose { "testbox=debug,warn" } else { "testbox=warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false)
                .compact(),
        )
        .init();
}

/// Initialize tracing for a process sandbox (file + stderr logging)
///
/// Returns the log file path and the appender guard; the guard must live
/// until the sandbox exits or buffered lines are lost.
pub fn init_sandbox() -> (Option<PathBuf>, Option<tracing_appender::non_blocking::WorkerGuard>) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("testbox=debug,info"));

    match paths::ensure_log_dir() {
        Ok(Some(dir)) => {
            let appender = tracing_appender::rolling::never(&dir, "sandbox.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let file_layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true);

            tracing_subscriber::registry()
                .with(filter)
                .with(file_layer)
                .with(stderr_layer())
                .init();

            (Some(dir.join("sandbox.log")), Some(guard))
        }
        Ok(None) => {
            tracing_subscriber::registry().with(filter).with(stderr_layer()).init();
            (None, None)
        }
        Err(e) => {
            eprintln!("Warning: Could not create log directory: {}", e);
            tracing_subscriber::registry().with(filter).with(stderr_layer()).init();
            (None, None)
        }
    }
}

/// Compact stderr layer shared by every sandbox subscriber stack
fn stderr_layer<S>() -> impl Layer<S>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(false)
        .compact()
}
