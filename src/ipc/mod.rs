//! IPC between host and sandbox
//!
//! Length-prefixed JSON over byte pipes: in-memory duplex pipes for thread
//! isolation, child stdin/stdout for process isolation.

pub mod protocol;
pub mod transport;

pub use protocol::{Envelope, ProtocolEvent, RunRequest};
