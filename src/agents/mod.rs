//! Verification agents and the capability interface they implement.

mod lint;
mod security_scan;

pub use lint::{LintAgent, LintIssue, Linter};
pub use security_scan::{SecurityAnalysis, SecurityScanAgent, Vulnerability};

use crate::data::{AgentContext, AgentResult};
use crate::providers::ProviderError;
use std::io;
use thiserror::Error;

/// Errors an agent cannot turn into a result on its own.
///
/// Expected conditions such as a missing linter or an empty diff are reported
/// as `skipped` or `failure` results instead.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("failed to encode agent output: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Failed(String),
}

/// A pluggable verification check
pub trait Agent {
    fn id(&self) -> &str;

    fn description(&self) -> &str {
        ""
    }

    /// Runs the check against one change
    fn execute(&self, context: &AgentContext) -> Result<AgentResult, ExecutionError>;
}
