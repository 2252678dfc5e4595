//! Fire-and-forget event emission from the sandbox
//!
//! Events go into an unbounded channel drained by the sandbox's writer
//! loop, so emitting never suspends the scheduler.

use std::rc::Rc;

use tokio::sync::mpsc::UnboundedSender;

use crate::ipc::protocol::{Envelope, ProtocolEvent};

#[derive(Clone)]
pub struct Emitter {
    run_id: Rc<str>,
    tx: UnboundedSender<Envelope>,
}

impl Emitter {
    pub fn new(run_id: &str, tx: UnboundedSender<Envelope>) -> Self {
        Self {
            run_id: Rc::from(run_id),
            tx,
        }
    }

    pub fn emit(&self, event: ProtocolEvent) {
        let envelope = Envelope {
            run_id: self.run_id.to_string(),
            event,
        };
        if self.tx.send(envelope).is_err() {
            tracing::debug!("Event channel closed, dropping event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipc::protocol::{LogEntry, LogLevel};
    use tokio::sync::mpsc;

    #[test]
    fn test_events_are_stamped_with_run_id() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let emitter = Emitter::new("run-7", tx);
        emitter.emit(ProtocolEvent::Registered { suites: vec![] });
        let envelope = rx.try_recv().unwrap();
        assert_eq!(envelope.run_id, "run-7");
        assert_eq!(envelope.event, ProtocolEvent::Registered { suites: vec![] });
    }

    #[test]
    fn test_emit_after_receiver_dropped_is_silent() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let emitter = Emitter::new("run-8", tx);
        emitter.emit(ProtocolEvent::Log(LogEntry {
            level: LogLevel::Info,
            args: vec!["ignored".to_string()],
        }));
    }
}
