mod agent;
mod metric;

pub use agent::{AgentContext, AgentResult, AgentStatus, Artifact, Severity};
pub use metric::{Metric, MetricsStore, StoreError, total_tokens};
