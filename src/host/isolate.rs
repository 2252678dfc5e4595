//! Isolated execution contexts
//!
//! One context per run, never reused. A thread context talks over in-memory
//! duplex pipes; a process context talks over the child's stdin/stdout.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::thread::JoinHandle;
use std::time::Duration;

use tokio::io::{duplex, AsyncRead, AsyncWrite};
use tokio::process::{Child, Command};

use crate::common::config::{Config, IsolationKind};
use crate::common::{Error, Result};
use crate::sandbox;

/// Capacity of each in-memory pipe
const PIPE_CAPACITY: usize = 64 * 1024;

/// How long a finished child gets to exit on its own before it is killed
const EXIT_GRACE: Duration = Duration::from_millis(500);

/// Where the sandbox runs
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Isolation {
    /// Dedicated OS thread with its own runtime
    #[default]
    Thread,
    /// Child process serving the run on stdin/stdout
    Process { program: PathBuf, args: Vec<String> },
}

impl Isolation {
    /// Resolve a configured isolation kind; process isolation runs the
    /// configured sandbox program with the hidden `sandbox` command
    pub fn from_kind(kind: IsolationKind, config: &Config) -> Result<Self> {
        Ok(match kind {
            IsolationKind::Thread => Self::Thread,
            IsolationKind::Process => Self::Process {
                program: config.sandbox_program()?,
                args: vec!["sandbox".to_string()],
            },
        })
    }
}

enum Handle {
    Thread(JoinHandle<()>),
    Process(Child),
}

/// A live sandbox and the host ends of its pipes
pub struct Sandbox {
    pub control: Box<dyn AsyncWrite + Unpin + Send>,
    pub events: Box<dyn AsyncRead + Unpin + Send>,
    handle: Handle,
}

impl Sandbox {
    pub fn spawn(isolation: &Isolation, limit: u32) -> Result<Self> {
        match isolation {
            Isolation::Thread => Self::spawn_thread(limit),
            Isolation::Process { program, args } => Self::spawn_process(program, args),
        }
    }

    fn spawn_thread(limit: u32) -> Result<Self> {
        let (host_control, sandbox_control) = duplex(PIPE_CAPACITY);
        let (sandbox_events, host_events) = duplex(PIPE_CAPACITY);
        let handle = sandbox::spawn_thread(move || (sandbox_control, sandbox_events), limit)
            .map_err(|e| Error::SandboxSpawn(format!("Failed to start sandbox thread: {}", e)))?;
        tracing::debug!("Sandbox thread started");

        Ok(Self {
            control: Box::new(host_control),
            events: Box::new(host_events),
            handle: Handle::Thread(handle),
        })
    }

    fn spawn_process(program: &Path, args: &[String]) -> Result<Self> {
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                Error::SandboxSpawn(format!("Failed to start {}: {}", program.display(), e))
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::SandboxSpawn("Failed to get sandbox stdin".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::SandboxSpawn("Failed to get sandbox stdout".to_string()))?;
        tracing::debug!(pid = ?child.id(), program = %program.display(), "Sandbox process started");

        Ok(Self {
            control: Box::new(stdin),
            events: Box::new(stdout),
            handle: Handle::Process(child),
        })
    }

    /// Tear the sandbox down. Dropping the pipes tells a thread sandbox to
    /// abort; a child that does not exit promptly after a clean run, or any
    /// child after a failed one, is killed.
    pub async fn terminate(self, clean: bool) {
        let Self {
            control,
            events,
            handle,
        } = self;
        drop(control);
        drop(events);

        match handle {
            Handle::Thread(handle) => {
                if handle.is_finished() {
                    tracing::trace!("Sandbox thread already exited");
                } else {
                    tracing::debug!("Sandbox thread detached; it stops at its next suspension point");
                }
            }
            Handle::Process(mut child) => {
                if clean {
                    match tokio::time::timeout(EXIT_GRACE, child.wait()).await {
                        Ok(Ok(status)) => {
                            tracing::debug!(%status, "Sandbox process exited");
                            return;
                        }
                        Ok(Err(e)) => tracing::warn!("Failed to wait for sandbox process: {}", e),
                        Err(_) => tracing::debug!("Sandbox process still running, killing it"),
                    }
                }
                if let Err(e) = child.kill().await {
                    tracing::warn!("Failed to kill sandbox process: {}", e);
                }
            }
        }
    }
}
