//! Configuration file handling

use serde::Deserialize;
use std::path::{Path, PathBuf};

use super::paths::config_path;
use super::Result;

/// Main configuration structure
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    /// Timeout settings
    #[serde(default)]
    pub timeouts: Timeouts,

    /// Sandbox settings
    #[serde(default)]
    pub sandbox: SandboxConfig,
}

/// Timeout settings in milliseconds
#[derive(Debug, Deserialize)]
pub struct Timeouts {
    /// Whole-run budget enforced by the host
    #[serde(default = "default_run_ms")]
    pub run_ms: u64,

    /// Default per-test budget inside the sandbox
    #[serde(default = "default_test_ms")]
    pub test_ms: u64,

    /// Budget for each lifecycle hook invocation
    #[serde(default = "default_hook_ms")]
    pub hook_ms: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            run_ms: default_run_ms(),
            test_ms: default_test_ms(),
            hook_ms: default_hook_ms(),
        }
    }
}

fn default_run_ms() -> u64 {
    30_000
}
fn default_test_ms() -> u64 {
    5_000
}
fn default_hook_ms() -> u64 {
    5_000
}

/// Which kind of isolated context runs the tests
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum IsolationKind {
    /// Dedicated OS thread with its own runtime
    #[default]
    Thread,
    /// Child process running `testbox sandbox`
    Process,
}

/// Sandbox configuration
#[derive(Debug, Deserialize)]
pub struct SandboxConfig {
    /// Default isolation kind
    #[serde(default)]
    pub isolation: IsolationKind,

    /// Sandbox executable for process isolation (defaults to the current binary)
    #[serde(default)]
    pub program: Option<PathBuf>,

    /// Maximum size of one protocol message
    #[serde(default = "default_max_message_mb")]
    pub max_message_mb: usize,

    /// Interpreter steps between cooperative yields
    #[serde(default = "default_yield_interval")]
    pub yield_interval: u32,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            isolation: IsolationKind::default(),
            program: None,
            max_message_mb: default_max_message_mb(),
            yield_interval: default_yield_interval(),
        }
    }
}

fn default_max_message_mb() -> usize {
    10
}
fn default_yield_interval() -> u32 {
    1024
}

impl Config {
    /// Load configuration from the default config file
    ///
    /// Returns default configuration if file doesn't exist
    pub fn load() -> Result<Self> {
        match config_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Load configuration from an explicit file
    pub fn load_from(path: &Path) -> Result<Self> {
        let content =
            std::fs::read_to_string(path).map_err(|e| super::Error::file_read(path, &e))?;
        Self::from_toml(&content)
    }

    /// Parse configuration from TOML text
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| super::Error::ConfigParse(e.to_string()))
    }

    /// Resolve the sandbox executable for process isolation
    ///
    /// A bare program name is looked up in PATH; with nothing configured the
    /// current executable is used.
    pub fn sandbox_program(&self) -> Result<PathBuf> {
        match &self.sandbox.program {
            Some(program) if program.components().count() == 1 => which::which(program)
                .map_err(|e| {
                    super::Error::Config(format!(
                        "sandbox program '{}' not found: {}",
                        program.display(),
                        e
                    ))
                }),
            Some(program) => Ok(program.clone()),
            None => std::env::current_exe().map_err(|e| {
                super::Error::Internal(format!("Failed to get current executable path: {}", e))
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_when_empty() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config.timeouts.run_ms, 30_000);
        assert_eq!(config.timeouts.test_ms, 5_000);
        assert_eq!(config.sandbox.isolation, IsolationKind::Thread);
        assert_eq!(config.sandbox.max_message_mb, 10);
    }

    #[test]
    fn test_partial_override() {
        let config = Config::from_toml(
            r#"
[timeouts]
test_ms = 250

[sandbox]
isolation = "process"
"#,
        )
        .unwrap();
        assert_eq!(config.timeouts.test_ms, 250);
        assert_eq!(config.timeouts.run_ms, 30_000);
        assert_eq!(config.sandbox.isolation, IsolationKind::Process);
    }

    #[test]
    fn test_invalid_isolation_rejected() {
        let err = Config::from_toml("[sandbox]\nisolation = \"vm\"\n").unwrap_err();
        assert!(matches!(err, crate::Error::ConfigParse(_)));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[timeouts]\nrun_ms = 1000\n").unwrap();
        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.timeouts.run_ms, 1000);
    }
}
