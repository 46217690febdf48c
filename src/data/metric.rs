use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Durable record of one executed run.
///
/// Once appended to a store a metric is never rewritten; it is identified only
/// by its partition and position within it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    pub agent_id: String,
    pub timestamp: DateTime<Utc>,
    pub tokens_used: u64,
    pub cost: f64,
    /// Status string of the result this metric describes
    pub result: String,
    pub duration_ms: u64,
}

/// Errors raised by a metrics store
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("metrics store I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("metrics partition {} is corrupt: {source}", path.display())]
    CorruptPartition {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to encode metrics partition: {0}")]
    Encode(#[source] serde_json::Error),
}

/// Append-only store of run metrics.
///
/// Implementations must make `record` safe against concurrent writers, across
/// processes as well as threads.
pub trait MetricsStore {
    /// Appends `metric` to the partition for the calendar date of its timestamp.
    fn record(&self, metric: &Metric) -> Result<(), StoreError>;

    /// Returns metrics with a timestamp in `(now - period, now]`.
    ///
    /// A store with no data yet yields an empty sequence.
    fn metrics_within(&self, period: Duration, now: DateTime<Utc>)
    -> Result<Vec<Metric>, StoreError>;

    /// Same as [`MetricsStore::metrics_within`] using the current time.
    fn get_metrics(&self, period: Duration) -> Result<Vec<Metric>, StoreError> {
        self.metrics_within(period, Utc::now())
    }
}

/// Sums tokens consumed across `metrics`
pub fn total_tokens(metrics: &[Metric]) -> u64 {
    metrics
        .iter()
        .map(|m| m.tokens_used)
        .fold(0, u64::saturating_add)
}
