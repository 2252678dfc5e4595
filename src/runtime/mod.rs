//! Test runtime living inside the sandbox
//!
//! The registry collects declarations, the scheduler runs them and the
//! emitter streams progress back to the host.

pub mod console;
pub mod dsl;
pub mod emitter;
pub mod matchers;
pub mod registry;
pub mod scheduler;
