//! Sandbox side of a run
//!
//! A sandbox consumes exactly one [`RunRequest`] from its control pipe,
//! evaluates the source, runs the scheduler and streams events back over
//! its event pipe. Closing the control pipe aborts the run at the next
//! suspension point.
//!
//! The sandbox runs on a dedicated OS thread with its own current-thread
//! runtime, both for thread isolation inside the host process and for the
//! hidden `testbox sandbox` entry point used by process isolation.

use std::cell::RefCell;
use std::io;
use std::panic::AssertUnwindSafe;
use std::rc::Rc;
use std::thread::JoinHandle;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::sync::{mpsc, oneshot};

use crate::common::{millis, Error, Result};
use crate::ipc::protocol::{Envelope, ErrorEvent, ErrorKind, ProtocolEvent, RunRequest};
use crate::ipc::transport;
use crate::runtime::console::Console;
use crate::runtime::dsl;
use crate::runtime::emitter::Emitter;
use crate::runtime::registry::Declarations;
use crate::runtime::scheduler::Scheduler;
use crate::script::{self, Interp};

/// Stack for the sandbox thread; nested script calls recurse through
/// boxed futures
const SANDBOX_STACK_SIZE: usize = 64 * 1024 * 1024;

/// How long runtime shutdown waits for blocking stdin reads
const SHUTDOWN_GRACE: Duration = Duration::from_millis(100);

/// Run a sandbox on its own thread
///
/// `connect` is called on the new thread, inside its runtime, to produce
/// the control reader and event writer.
pub fn spawn_thread<F, R, W>(connect: F, limit: u32) -> io::Result<JoinHandle<()>>
where
    F: FnOnce() -> (R, W) + Send + 'static,
    R: AsyncRead + Unpin + 'static,
    W: AsyncWrite + Unpin + 'static,
{
    std::thread::Builder::new()
        .name("testbox-sandbox".to_string())
        .stack_size(SANDBOX_STACK_SIZE)
        .spawn(move || {
            let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
                Ok(runtime) => runtime,
                Err(e) => {
                    tracing::error!("Failed to build sandbox runtime: {}", e);
                    return;
                }
            };

            let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| {
                runtime.block_on(async move {
                    let (control, events) = connect();
                    serve(control, events, limit).await
                })
            }));
            match outcome {
                Ok(Ok(())) => tracing::debug!("Sandbox finished"),
                Ok(Err(e)) => tracing::warn!("Sandbox failed: {}", e),
                Err(_) => tracing::error!("Sandbox panicked; dropping the run"),
            }
            runtime.shutdown_timeout(SHUTDOWN_GRACE);
        })
}

/// Serve one run over the given pipes
pub async fn serve<R, W>(mut control: R, mut events: W, limit: u32) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let request: RunRequest = transport::recv_json(&mut control, limit)
        .await
        .map_err(|e| Error::Protocol(format!("failed to read run request: {}", e)))?;
    tracing::info!(
        run_id = %request.run_id,
        bytes = request.source.len(),
        run_budget_ms = request.timeout_ms,
        test_timeout_ms = request.test_timeout_ms,
        "Run request received"
    );

    let (tx, mut rx) = mpsc::unbounded_channel::<Envelope>();
    let (done_tx, mut done_rx) = oneshot::channel::<()>();
    let emitter = Emitter::new(&request.run_id, tx);

    let producer = async move {
        let finished = tokio::select! {
            result = execute(request, emitter.clone()) => Some(result),
            _ = control_closed(&mut control) => None,
        };
        match &finished {
            Some(Ok(suites)) => tracing::info!(suites, "Run complete"),
            Some(Err(e)) => {
                tracing::warn!("Run failed: {}", e);
                emitter.emit(fatal_event(e));
            }
            None => tracing::warn!("Control channel closed, run aborted"),
        }
        let _ = done_tx.send(());
    };

    let writer = async move {
        loop {
            tokio::select! {
                biased;
                Some(envelope) = rx.recv() => {
                    transport::send_json(&mut events, &envelope, limit).await?;
                }
                _ = &mut done_rx => {
                    while let Ok(envelope) = rx.try_recv() {
                        transport::send_json(&mut events, &envelope, limit).await?;
                    }
                    return Ok::<(), io::Error>(());
                }
            }
        }
    };

    let ((), written) = tokio::join!(producer, writer);
    written.map_err(|e| Error::Protocol(format!("failed to write events: {}", e)))
}

/// Evaluate the source and run every declared test; returns the number of
/// suites completed
async fn execute(request: RunRequest, emitter: Emitter) -> Result<usize> {
    let console = Rc::new(Console::new(emitter.clone()));
    let decls = Rc::new(RefCell::new(Declarations::new(millis(request.test_timeout_ms))));
    let interp = Interp::new(request.yield_interval);
    let _dispose = DisposeOnDrop(interp.clone());
    dsl::install(&interp, decls.clone(), console.clone());

    let program = script::parse(&request.source).map_err(|e| Error::Declaration(e.to_string()))?;
    interp
        .run(&program)
        .await
        .map_err(|thrown| Error::Declaration(thrown.to_js_string()))?;

    let registry = decls.borrow_mut().freeze();
    let suites = registry.suite_names();
    tracing::debug!(?suites, "Registration frozen");
    emitter.emit(ProtocolEvent::Registered { suites });

    let scheduler = Scheduler::new(emitter, console, millis(request.hook_timeout_ms));
    let results = scheduler.run(registry).await?;
    Ok(results.len())
}

/// Resolves once the host closes the control pipe
async fn control_closed<R: AsyncRead + Unpin>(control: &mut R) {
    let mut buf = [0u8; 64];
    loop {
        match control.read(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(_) => continue,
        }
    }
}

fn fatal_event(err: &Error) -> ProtocolEvent {
    let (kind, error) = match err {
        Error::Declaration(message) => (ErrorKind::Declaration, message.clone()),
        other => (ErrorKind::Internal, other.to_string()),
    };
    ProtocolEvent::Error(ErrorEvent {
        error,
        kind,
        suite: None,
    })
}

/// Breaks interpreter reference cycles however the run ends
struct DisposeOnDrop(Interp);

impl Drop for DisposeOnDrop {
    fn drop(&mut self) {
        self.0.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipc::protocol::TestStatus;
    use crate::ipc::transport::MAX_MESSAGE_SIZE;
    use tokio::io::duplex;

    fn request(source: &str) -> RunRequest {
        RunRequest {
            run_id: "run-1".to_string(),
            source: source.to_string(),
            timeout_ms: 5000,
            test_timeout_ms: 1000,
            hook_timeout_ms: 1000,
            yield_interval: 64,
        }
    }

    async fn run_to_end(source: &str) -> Vec<ProtocolEvent> {
        let (mut host_control, sandbox_control) = duplex(64 * 1024);
        let (sandbox_events, mut host_events) = duplex(64 * 1024);
        transport::send_json(&mut host_control, &request(source), MAX_MESSAGE_SIZE)
            .await
            .unwrap();

        serve(sandbox_control, sandbox_events, MAX_MESSAGE_SIZE).await.unwrap();

        let mut events = Vec::new();
        while let Ok(envelope) = transport::recv_json::<_, Envelope>(&mut host_events, MAX_MESSAGE_SIZE).await {
            assert_eq!(envelope.run_id, "run-1");
            events.push(envelope.event);
        }
        events
    }

    #[tokio::test]
    async fn test_stream_for_passing_suite() {
        let events = run_to_end("describe('Math', () => { test('adds', () => expect(1 + 1).toBe(2)) })").await;
        assert_eq!(
            events[0],
            ProtocolEvent::Registered {
                suites: vec!["Math".to_string()]
            }
        );
        assert!(matches!(&events[1], ProtocolEvent::TestStart { test, suite } if test == "adds" && suite == "Math"));
        match &events[2] {
            ProtocolEvent::TestComplete(result) => assert_eq!(result.status, TestStatus::Passed),
            other => panic!("unexpected {:?}", other),
        }
        match &events[3] {
            ProtocolEvent::SuiteComplete(suite) => assert_eq!((suite.passed, suite.failed, suite.skipped), (1, 0, 0)),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(events.len(), 4);
    }

    #[tokio::test]
    async fn test_syntax_error_is_single_fatal_event() {
        let events = run_to_end("describe('x', () => {").await;
        assert_eq!(events.len(), 1);
        match &events[0] {
            ProtocolEvent::Error(error) => {
                assert_eq!(error.kind, ErrorKind::Declaration);
                assert!(error.suite.is_none());
                assert!(error.error.starts_with("SyntaxError"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_top_level_throw_is_declaration_error() {
        let events = run_to_end("test('a', () => {})\nthrow new TypeError('bad setup')").await;
        assert_eq!(
            events,
            vec![ProtocolEvent::Error(ErrorEvent {
                error: "TypeError: bad setup".to_string(),
                kind: ErrorKind::Declaration,
                suite: None,
            })]
        );
    }

    #[tokio::test]
    async fn test_closing_control_aborts_run() {
        let (mut host_control, sandbox_control) = duplex(64 * 1024);
        let (sandbox_events, mut host_events) = duplex(64 * 1024);
        transport::send_json(
            &mut host_control,
            &request("test('forever', async () => { await sleep(Infinity) })"),
            MAX_MESSAGE_SIZE,
        )
        .await
        .unwrap();

        let sandbox = serve(sandbox_control, sandbox_events, MAX_MESSAGE_SIZE);
        let host = async {
            let first: Envelope = transport::recv_json(&mut host_events, MAX_MESSAGE_SIZE).await.unwrap();
            assert!(matches!(first.event, ProtocolEvent::Registered { .. }));
            drop(host_control);
        };
        let (served, ()) = tokio::time::timeout(Duration::from_secs(5), async { tokio::join!(sandbox, host) })
            .await
            .unwrap();
        served.unwrap();
    }
}
