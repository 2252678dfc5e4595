//! Error types for testbox
//!
//! Per-test failures never surface here: they are folded into a failed
//! test result inside the sandbox. This type covers whatever rejects a whole
//! run or a CLI command.

use std::io;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for testbox
#[derive(Error, Debug)]
pub enum Error {
    // === Run Errors ===
    #[error("Declaration error: {0}")]
    Declaration(String),

    #[error("Sandbox fault: {0}")]
    SandboxFault(String),

    #[error("Test run timed out after {0} ms")]
    RunTimeout(u64),

    #[error("Sandbox exited before the run completed")]
    SandboxExited,

    #[error("Failed to spawn sandbox: {0}")]
    SandboxSpawn(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    // === Configuration Errors ===
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(String),

    // === IO Errors ===
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to read file '{path}': {error}")]
    FileRead { path: String, error: String },

    // === Serialization Errors ===
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // === Scenario Errors ===
    #[error("Scenario assertion failed: {0}")]
    ScenarioAssertion(String),

    // === Internal Errors ===
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a file read error for a path
    pub fn file_read(path: &std::path::Path, error: &io::Error) -> Self {
        Self::FileRead {
            path: path.display().to_string(),
            error: error.to_string(),
        }
    }

    /// Whether the run was rejected by the host's whole-run timeout
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::RunTimeout(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_message_mentions_budget() {
        let err = Error::RunTimeout(500);
        assert!(err.is_timeout());
        assert_eq!(err.to_string(), "Test run timed out after 500 ms");
    }

    #[test]
    fn test_io_conversion() {
        let io_err = io::Error::new(io::ErrorKind::BrokenPipe, "pipe closed");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
        assert!(!err.is_timeout());
    }
}
