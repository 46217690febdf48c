use chrono::Duration;
use clap::ValueEnum;
use serde::Serialize;
use std::collections::BTreeMap;
use verifier::data::Metric;

/// Trailing window reported by `token-usage`
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Period {
    Hourly,
    Daily,
    Weekly,
    Monthly,
}

impl Period {
    pub fn duration(self) -> Duration {
        match self {
            Period::Hourly => Duration::hours(1),
            Period::Daily => Duration::hours(24),
            Period::Weekly => Duration::days(7),
            Period::Monthly => Duration::days(30),
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Period::Hourly => "last hour",
            Period::Daily => "last 24 hours",
            Period::Weekly => "last 7 days",
            Period::Monthly => "last 30 days",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Table,
    Json,
}

#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct AgentUsage {
    pub runs: usize,
    pub failures: usize,
    pub tokens_used: u64,
    pub cost: f64,
    pub duration_ms: u64,
}

impl AgentUsage {
    fn add(&mut self, metric: &Metric) {
        self.runs += 1;
        if metric.result == "failure" {
            self.failures += 1;
        }
        self.tokens_used = self.tokens_used.saturating_add(metric.tokens_used);
        self.cost += metric.cost;
        self.duration_ms = self.duration_ms.saturating_add(metric.duration_ms);
    }
}

/// Per-agent totals over a set of metrics, ordered by agent id
#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct UsageSummary {
    pub agents: BTreeMap<String, AgentUsage>,
    pub total: AgentUsage,
}

impl UsageSummary {
    pub fn from_metrics(metrics: &[Metric]) -> Self {
        let mut summary = Self::default();
        for metric in metrics {
            summary
                .agents
                .entry(metric.agent_id.clone())
                .or_default()
                .add(metric);
            summary.total.add(metric);
        }
        summary
    }

    pub fn render_table(&self) -> String {
        let width = self
            .agents
            .keys()
            .map(String::len)
            .chain(["AGENT".len(), "TOTAL".len()])
            .max()
            .unwrap_or(5);

        let mut out = format!(
            "{:<width$}  {:>6}  {:>8}  {:>12}  {:>10}\n",
            "AGENT", "RUNS", "FAILURES", "TOKENS", "COST ($)"
        );
        let row = |name: &str, usage: &AgentUsage| {
            format!(
                "{:<width$}  {:>6}  {:>8}  {:>12}  {:>10.4}\n",
                name, usage.runs, usage.failures, usage.tokens_used, usage.cost
            )
        };
        for (agent_id, usage) in &self.agents {
            out.push_str(&row(agent_id, usage));
        }
        out.push_str(&row("TOTAL", &self.total));
        out
    }
}
