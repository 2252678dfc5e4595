//! Scenario runner
//!
//! Reads YAML scenarios, runs their test scripts through the host and
//! asserts on the structured results rather than on printed output.

mod config;
mod runner;

pub use config::*;
pub use runner::{check_outcome, run_scenario, ScenarioResult};
