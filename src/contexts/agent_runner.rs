use crate::agents::Agent;
use crate::config::Config;
use crate::data::{AgentContext, AgentResult, Metric, MetricsStore, StoreError, total_tokens};
use crate::registries::{AgentRegistry, RegistryError};
use chrono::{Duration, Utc};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::time::Instant;
use thiserror::Error;

/// Reason attached to results skipped because the daily budget is spent
pub const BUDGET_EXHAUSTED: &str = "Daily token budget exhausted";

/// Trailing window the daily token budget is measured over
pub fn budget_window() -> Duration {
    Duration::hours(24)
}

/// Errors that prevent identifying what to run.
///
/// Anything that goes wrong once an agent has been resolved is reported in
/// the returned [`AgentResult`] instead.
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

impl RunnerError {
    /// Registered ids the caller can choose from, when the id was unknown
    pub fn available_agents(&self) -> &[String] {
        match self {
            RunnerError::Registry(RegistryError::NotFound { available, .. }) => available,
            RunnerError::Registry(_) => &[],
        }
    }
}

/// The result of a run together with the fate of its metric
#[derive(Debug)]
pub struct RunReport {
    pub result: AgentResult,
    /// Set when the metric for an executed run could not be persisted
    pub metering_error: Option<StoreError>,
}

/// Agent Runner gates agents on the token budget, executes them and meters
/// every executed run.
///
/// Runs are synchronous: the caller blocks for the whole agent execution,
/// including any subprocess or network call the agent makes.
pub struct AgentRunner<'r, S>
where
    S: MetricsStore,
{
    config: Config,
    registry: &'r AgentRegistry,
    metrics: S,
}

impl<'r, S> AgentRunner<'r, S>
where
    S: MetricsStore,
{
    /// Creates a new AgentRunner
    ///
    /// # Arguments
    /// * `config` - Configuration handed to agent constructors; supplies the daily budget
    /// * `registry` - Registry used to resolve agent ids
    /// * `metrics` - Store consulted for the budget and appended to after each run
    pub fn new(config: Config, registry: &'r AgentRegistry, metrics: S) -> Self {
        Self {
            config,
            registry,
            metrics,
        }
    }

    pub fn metrics(&self) -> &S {
        &self.metrics
    }

    /// Tokens recorded within the trailing budget window
    pub fn tokens_used_in_window(&self) -> Result<u64, StoreError> {
        let metrics = self.metrics.get_metrics(budget_window())?;
        Ok(total_tokens(&metrics))
    }

    /// Runs agent `id` against `context`.
    ///
    /// Returns an error only when `id` is not registered.
    pub fn run_agent(&self, id: &str, context: &AgentContext) -> Result<AgentResult, RunnerError> {
        self.run_agent_report(id, context).map(|report| report.result)
    }

    /// Same as [`AgentRunner::run_agent`], also reporting metering failures
    pub fn run_agent_report(
        &self,
        id: &str,
        context: &AgentContext,
    ) -> Result<RunReport, RunnerError> {
        let daily_budget = self.config.budgets.daily_tokens;
        let used = self.tokens_used_in_window().unwrap_or_else(|e| {
            tracing::warn!(agent_id = id, error = %e, "could not read token usage; assuming none");
            0
        });
        tracing::debug!(agent_id = id, tokens_used = used, daily_budget, "budget check");

        if used >= daily_budget {
            tracing::warn!(
                agent_id = id,
                tokens_used = used,
                daily_budget,
                "daily token budget exhausted; run skipped"
            );
            let reason = format!(
                "{BUDGET_EXHAUSTED}: {used} of {daily_budget} tokens used in the last 24h"
            );
            return Ok(RunReport {
                result: AgentResult::skipped(id, reason),
                metering_error: None,
            });
        }

        let agent = self.registry.resolve(id, &self.config)?;

        tracing::info!(
            agent_id = id,
            files = context.files.len(),
            branch = %context.branch,
            "running agent"
        );
        let start = Instant::now();
        let outcome = execute_guarded(agent.as_ref(), context);
        let elapsed = start.elapsed();

        let result = match outcome {
            Ok(result) => result,
            Err(message) => {
                tracing::warn!(agent_id = id, error = %message, "agent execution failed");
                AgentResult::failure(id, message)
            }
        };

        let metric = Metric {
            agent_id: id.to_string(),
            timestamp: Utc::now(),
            tokens_used: result.tokens_used,
            cost: result.cost,
            result: result.status.to_string(),
            duration_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
        };
        tracing::info!(
            agent_id = id,
            status = %result.status,
            tokens_used = metric.tokens_used,
            duration_ms = metric.duration_ms,
            "agent finished"
        );

        let metering_error = match self.metrics.record(&metric) {
            Ok(()) => None,
            Err(e) => {
                tracing::error!(agent_id = id, error = %e, "failed to record run metric");
                Some(e)
            }
        };

        Ok(RunReport {
            result,
            metering_error,
        })
    }
}

/// Executes `agent`, turning errors and panics into a failure message
fn execute_guarded(agent: &dyn Agent, context: &AgentContext) -> Result<AgentResult, String> {
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| agent.execute(context)));
    let message = match outcome {
        Ok(Ok(result)) => return Ok(result),
        Ok(Err(e)) => e.to_string(),
        Err(payload) => format!("agent panicked: {}", panic_message(payload.as_ref())),
    };

    if message.trim().is_empty() {
        Err("agent execution failed".to_string())
    } else {
        Err(message)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        *s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "unknown panic"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::ExecutionError;
    use crate::data::AgentStatus;
    use chrono::DateTime;
    use std::cell::RefCell;
    use std::io;
    use tracing_test::traced_test;

    #[derive(Default)]
    struct MemoryStore {
        metrics: RefCell<Vec<Metric>>,
    }

    impl MemoryStore {
        fn with(metrics: Vec<Metric>) -> Self {
            Self {
                metrics: RefCell::new(metrics),
            }
        }

        fn len(&self) -> usize {
            self.metrics.borrow().len()
        }
    }

    impl MetricsStore for MemoryStore {
        fn record(&self, metric: &Metric) -> Result<(), StoreError> {
            self.metrics.borrow_mut().push(metric.clone());
            Ok(())
        }

        fn metrics_within(
            &self,
            period: Duration,
            now: DateTime<Utc>,
        ) -> Result<Vec<Metric>, StoreError> {
            let start = now - period;
            Ok(self
                .metrics
                .borrow()
                .iter()
                .filter(|m| m.timestamp > start && m.timestamp <= now)
                .cloned()
                .collect())
        }
    }

    struct BrokenStore;

    impl MetricsStore for BrokenStore {
        fn record(&self, _metric: &Metric) -> Result<(), StoreError> {
            Err(io::Error::new(io::ErrorKind::PermissionDenied, "read-only").into())
        }

        fn metrics_within(
            &self,
            _period: Duration,
            _now: DateTime<Utc>,
        ) -> Result<Vec<Metric>, StoreError> {
            Err(io::Error::new(io::ErrorKind::PermissionDenied, "unreadable").into())
        }
    }

    enum Behaviour {
        Succeed(u64),
        Fail(&'static str),
        Panic,
        Skip,
    }

    struct StubAgent(Behaviour);

    impl Agent for StubAgent {
        fn id(&self) -> &str {
            "embedded-id"
        }

        fn execute(&self, _context: &AgentContext) -> Result<AgentResult, ExecutionError> {
            match self.0 {
                Behaviour::Succeed(tokens) => {
                    Ok(AgentResult::success(self.id()).with_usage(tokens, 0.5))
                }
                Behaviour::Fail(message) => Err(ExecutionError::Failed(message.to_string())),
                Behaviour::Panic => panic!("linter exploded"),
                Behaviour::Skip => Ok(AgentResult::skipped(self.id(), "nothing to do")),
            }
        }
    }

    fn registry() -> AgentRegistry {
        let mut registry = AgentRegistry::new();
        registry.register("ok", |_: &Config| -> Box<dyn Agent> {
            Box::new(StubAgent(Behaviour::Succeed(40)))
        });
        registry.register("fails", |_: &Config| -> Box<dyn Agent> {
            Box::new(StubAgent(Behaviour::Fail("provider unreachable")))
        });
        registry.register("fails-silently", |_: &Config| -> Box<dyn Agent> {
            Box::new(StubAgent(Behaviour::Fail("")))
        });
        registry.register("panics", |_: &Config| -> Box<dyn Agent> {
            Box::new(StubAgent(Behaviour::Panic))
        });
        registry.register("skips", |_: &Config| -> Box<dyn Agent> {
            Box::new(StubAgent(Behaviour::Skip))
        });
        registry
    }

    fn config_with_budget(daily_tokens: u64) -> Config {
        let mut config = Config::default();
        config.budgets.daily_tokens = daily_tokens;
        config
    }

    fn prior(tokens: u64, age: Duration) -> Metric {
        Metric {
            agent_id: "lint".to_string(),
            timestamp: Utc::now() - age,
            tokens_used: tokens,
            cost: 0.0,
            result: "success".to_string(),
            duration_ms: 1,
        }
    }

    #[test]
    fn test_success_is_metered_under_requested_id() {
        let registry = registry();
        let runner = AgentRunner::new(config_with_budget(1000), &registry, MemoryStore::default());

        let result = runner.run_agent("ok", &AgentContext::default()).unwrap();
        assert_eq!(result.status, AgentStatus::Success);

        let metrics = runner.metrics().metrics.borrow();
        assert_eq!(metrics.len(), 1);
        assert_eq!(metrics[0].agent_id, "ok");
        assert_eq!(metrics[0].tokens_used, 40);
        assert_eq!(metrics[0].cost, 0.5);
        assert_eq!(metrics[0].result, "success");
    }

    #[test]
    fn test_unknown_agent_is_an_error() {
        let registry = registry();
        let runner = AgentRunner::new(config_with_budget(1000), &registry, MemoryStore::default());

        let err = runner
            .run_agent("nonexistent", &AgentContext::default())
            .unwrap_err();
        assert!(matches!(
            err,
            RunnerError::Registry(RegistryError::NotFound { ref id, .. }) if id == "nonexistent"
        ));
        assert!(err.available_agents().contains(&"ok".to_string()));
        assert_eq!(runner.metrics().len(), 0);
    }

    #[traced_test]
    #[test]
    fn test_exhausted_budget_skips_without_metric() {
        let registry = registry();
        let store = MemoryStore::with(vec![
            prior(60, Duration::hours(1)),
            prior(40, Duration::hours(2)),
        ]);
        let runner = AgentRunner::new(config_with_budget(100), &registry, store);

        let result = runner.run_agent("ok", &AgentContext::default()).unwrap();
        assert_eq!(result.status, AgentStatus::Skipped);
        assert_eq!(result.agent_id, "ok");
        assert!(result.error.unwrap().contains(BUDGET_EXHAUSTED));
        assert_eq!(runner.metrics().len(), 2);
        assert!(logs_contain("daily token budget exhausted"));
    }

    #[test]
    fn test_budget_check_precedes_resolution() {
        let registry = registry();
        let store = MemoryStore::with(vec![prior(100, Duration::minutes(5))]);
        let runner = AgentRunner::new(config_with_budget(100), &registry, store);

        let result = runner
            .run_agent("nonexistent", &AgentContext::default())
            .unwrap();
        assert_eq!(result.status, AgentStatus::Skipped);
    }

    #[test]
    fn test_usage_outside_window_does_not_count() {
        let registry = registry();
        let store = MemoryStore::with(vec![prior(500, Duration::hours(25))]);
        let runner = AgentRunner::new(config_with_budget(100), &registry, store);

        let result = runner.run_agent("ok", &AgentContext::default()).unwrap();
        assert_eq!(result.status, AgentStatus::Success);
        assert_eq!(runner.metrics().len(), 2);
    }

    #[test]
    fn test_execution_error_becomes_failure_result() {
        let registry = registry();
        let runner = AgentRunner::new(config_with_budget(1000), &registry, MemoryStore::default());

        let result = runner.run_agent("fails", &AgentContext::default()).unwrap();
        assert_eq!(result.status, AgentStatus::Failure);
        assert_eq!(result.agent_id, "fails");
        assert_eq!(result.error.as_deref(), Some("provider unreachable"));

        let metrics = runner.metrics().metrics.borrow();
        assert_eq!(metrics.len(), 1);
        assert_eq!(metrics[0].result, "failure");
        assert_eq!(metrics[0].tokens_used, 0);
    }

    #[test]
    fn test_failure_message_is_never_empty() {
        let registry = registry();
        let runner = AgentRunner::new(config_with_budget(1000), &registry, MemoryStore::default());

        let result = runner
            .run_agent("fails-silently", &AgentContext::default())
            .unwrap();
        assert_eq!(result.status, AgentStatus::Failure);
        assert!(!result.error.unwrap().is_empty());
    }

    #[test]
    fn test_panicking_agent_becomes_failure_result() {
        let registry = registry();
        let runner = AgentRunner::new(config_with_budget(1000), &registry, MemoryStore::default());

        let result = runner.run_agent("panics", &AgentContext::default()).unwrap();
        assert_eq!(result.status, AgentStatus::Failure);
        assert!(result.error.unwrap().contains("linter exploded"));
        assert_eq!(runner.metrics().len(), 1);
    }

    #[test]
    fn test_agent_skip_is_still_metered() {
        let registry = registry();
        let runner = AgentRunner::new(config_with_budget(1000), &registry, MemoryStore::default());

        let result = runner.run_agent("skips", &AgentContext::default()).unwrap();
        assert_eq!(result.status, AgentStatus::Skipped);
        assert_eq!(runner.metrics().metrics.borrow()[0].result, "skipped");
    }

    #[traced_test]
    #[test]
    fn test_metering_failure_keeps_result() {
        let registry = registry();
        let runner = AgentRunner::new(config_with_budget(1000), &registry, BrokenStore);

        let report = runner
            .run_agent_report("ok", &AgentContext::default())
            .unwrap();
        assert_eq!(report.result.status, AgentStatus::Success);
        assert!(matches!(report.metering_error, Some(StoreError::Io(_))));
        assert!(logs_contain("failed to record run metric"));
    }

    #[test]
    fn test_panic_message_extraction() {
        let payload: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(payload.as_ref()), "owned");
        let payload: Box<dyn Any + Send> = Box::new("static");
        assert_eq!(panic_message(payload.as_ref()), "static");
        let payload: Box<dyn Any + Send> = Box::new(7_u8);
        assert_eq!(panic_message(payload.as_ref()), "unknown panic");
    }
}
