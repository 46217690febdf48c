use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// The change under verification, as handed to an agent for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentContext {
    /// Paths touched by the change, in collection order
    pub files: Vec<String>,
    /// Unified diff text; empty when nothing is staged
    pub diff: String,
    /// Active branch name; empty when detached or unknown
    pub branch: String,
}

impl AgentContext {
    pub fn new(files: Vec<String>, diff: impl Into<String>, branch: impl Into<String>) -> Self {
        Self {
            files,
            diff: diff.into(),
            branch: branch.into(),
        }
    }
}

/// Outcome of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Success,
    Failure,
    Skipped,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentStatus::Success => "success",
            AgentStatus::Failure => "failure",
            AgentStatus::Skipped => "skipped",
        }
    }
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How loudly a result should be surfaced to the operator
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    #[default]
    Info,
    Warning,
    Blocking,
}

/// A file an agent produced, referenced by path
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    #[serde(rename = "type")]
    pub kind: String,
    pub path: PathBuf,
}

/// The structured outcome of one run.
///
/// Every run yields exactly one of these, including runs that were skipped
/// for budget reasons and runs whose agent raised an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentResult {
    pub agent_id: String,
    pub status: AgentStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub data: serde_json::Value,
    #[serde(default)]
    pub severity: Severity,
    #[serde(default)]
    pub tokens_used: u64,
    #[serde(default)]
    pub cost: f64,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub artifacts: Vec<Artifact>,
}

impl AgentResult {
    fn with_status(agent_id: impl Into<String>, status: AgentStatus) -> Self {
        Self {
            agent_id: agent_id.into(),
            status,
            error: None,
            score: None,
            data: serde_json::Value::Null,
            severity: Severity::Info,
            tokens_used: 0,
            cost: 0.0,
            timestamp: Utc::now(),
            artifacts: Vec::new(),
        }
    }

    pub fn success(agent_id: impl Into<String>) -> Self {
        Self::with_status(agent_id, AgentStatus::Success)
    }

    pub fn skipped(agent_id: impl Into<String>, reason: impl Into<String>) -> Self {
        let mut result = Self::with_status(agent_id, AgentStatus::Skipped);
        result.error = Some(reason.into());
        result
    }

    pub fn failure(agent_id: impl Into<String>, message: impl Into<String>) -> Self {
        let mut result = Self::with_status(agent_id, AgentStatus::Failure);
        result.error = Some(message.into());
        result
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = data;
        self
    }

    pub fn with_score(mut self, score: f64) -> Self {
        self.score = Some(score);
        self
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    /// Sets consumption; negative or non-finite costs are clamped to zero
    pub fn with_usage(mut self, tokens_used: u64, cost: f64) -> Self {
        self.tokens_used = tokens_used;
        self.cost = if cost.is_finite() && cost > 0.0 { cost } else { 0.0 };
        self
    }

    pub fn with_artifact(mut self, kind: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        self.artifacts.push(Artifact {
            kind: kind.into(),
            path: path.into(),
        });
        self
    }

    pub fn is_blocking(&self) -> bool {
        self.severity == Severity::Blocking
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_skipped_carries_reason() {
        let result = AgentResult::skipped("lint", "No files to lint");
        assert_eq!(result.status, AgentStatus::Skipped);
        assert_eq!(result.error.as_deref(), Some("No files to lint"));
        assert_eq!(result.tokens_used, 0);
    }

    #[test]
    fn test_usage_clamps_negative_cost() {
        let result = AgentResult::success("lint").with_usage(10, -1.5);
        assert_eq!(result.tokens_used, 10);
        assert_eq!(result.cost, 0.0);
    }

    #[test]
    fn test_serialized_shape() {
        let result = AgentResult::failure("security-scan", "boom")
            .with_severity(Severity::Blocking)
            .with_artifact("report", ".verifier/artifacts/report.json");
        let json = serde_json::to_value(&result).unwrap();

        assert_eq!(json["status"], "failure");
        assert_eq!(json["severity"], "blocking");
        assert_eq!(json["error"], "boom");
        assert_eq!(json["artifacts"][0]["type"], "report");
        assert!(json.get("score").is_none());
        assert!(json.get("data").is_none());
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Blocking > Severity::Warning);
        assert!(Severity::Warning > Severity::Info);
    }
}
