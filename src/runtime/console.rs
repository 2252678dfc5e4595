//! Script console
//!
//! Every console call is emitted as a `log` event. While a test is running
//! the entries are also captured into that test's result.

use std::cell::RefCell;

use crate::ipc::protocol::{LogEntry, LogLevel, ProtocolEvent};

use super::emitter::Emitter;

pub struct Console {
    emitter: Emitter,
    capture: RefCell<Option<Vec<LogEntry>>>,
}

impl Console {
    pub fn new(emitter: Emitter) -> Self {
        Self {
            emitter,
            capture: RefCell::new(None),
        }
    }

    pub fn log(&self, level: LogLevel, args: Vec<String>) {
        tracing::trace!(%level, ?args, "console");
        let entry = LogEntry { level, args };
        if let Some(captured) = self.capture.borrow_mut().as_mut() {
            captured.push(entry.clone());
        }
        self.emitter.emit(ProtocolEvent::Log(entry));
    }

    /// Start collecting entries for the test about to run
    pub fn begin_capture(&self) {
        *self.capture.borrow_mut() = Some(Vec::new());
    }

    /// Stop collecting and return what was captured
    pub fn end_capture(&self) -> Vec<LogEntry> {
        self.capture.borrow_mut().take().unwrap_or_default()
    }
}
