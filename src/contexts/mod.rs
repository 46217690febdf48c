mod agent_runner;
mod metrics_store;

pub use agent_runner::{AgentRunner, BUDGET_EXHAUSTED, RunReport, RunnerError, budget_window};
pub use metrics_store::{DEFAULT_METRICS_DIR, FileMetricsStore};
