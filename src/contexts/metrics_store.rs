use crate::data::{Metric, MetricsStore, StoreError};
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Default location of metric partitions, relative to the working tree root
pub const DEFAULT_METRICS_DIR: &str = ".verifier/metrics";

const PARTITION_DATE_FORMAT: &str = "%Y-%m-%d";
const PARTITION_EXTENSION: &str = "json";
const LOCK_SUFFIX: &str = "lock";

/// FileMetricsStore keeps one JSON array of metrics per calendar day.
///
/// The store is organized as: `{metrics_dir}/{YYYY-MM-DD}.json`, with dates in
/// UTC. Every append holds an exclusive advisory lock on a sibling
/// `{YYYY-MM-DD}.json.lock` file for the whole read-append-rewrite cycle, and
/// the rewrite goes through a temp file so readers never observe a torn array.
#[derive(Debug, Clone)]
pub struct FileMetricsStore {
    metrics_dir: PathBuf,
}

impl FileMetricsStore {
    /// Creates a new FileMetricsStore
    ///
    /// # Arguments
    /// * `metrics_dir` - Optional partition directory. If None, defaults to ".verifier/metrics"
    pub fn new(metrics_dir: Option<PathBuf>) -> Self {
        Self {
            metrics_dir: metrics_dir.unwrap_or_else(|| PathBuf::from(DEFAULT_METRICS_DIR)),
        }
    }

    /// Store rooted in the `.verifier/metrics` directory under `root`
    pub fn in_workspace(root: &Path) -> Self {
        Self::new(Some(root.join(DEFAULT_METRICS_DIR)))
    }

    pub fn metrics_dir(&self) -> &Path {
        &self.metrics_dir
    }

    /// Path of the partition holding metrics for `date`
    ///
    /// Path format: `{metrics_dir}/{YYYY-MM-DD}.json`
    pub fn partition_path(&self, date: NaiveDate) -> PathBuf {
        self.metrics_dir.join(format!(
            "{}.{}",
            date.format(PARTITION_DATE_FORMAT),
            PARTITION_EXTENSION
        ))
    }

    fn lock_path(&self, date: NaiveDate) -> PathBuf {
        self.metrics_dir.join(format!(
            "{}.{}.{}",
            date.format(PARTITION_DATE_FORMAT),
            PARTITION_EXTENSION,
            LOCK_SUFFIX
        ))
    }

    /// Reads every record of one partition in on-disk order
    pub fn read_partition(&self, date: NaiveDate) -> Result<Vec<Metric>, StoreError> {
        read_partition_file(&self.partition_path(date))
    }

    fn write_partition(&self, path: &Path, metrics: &[Metric]) -> Result<(), StoreError> {
        let mut tmp = NamedTempFile::new_in(&self.metrics_dir)?;
        {
            let mut writer = BufWriter::new(tmp.as_file_mut());
            serde_json::to_writer_pretty(&mut writer, metrics).map_err(StoreError::Encode)?;
            writer.flush()?;
        }
        tmp.as_file().sync_all()?;
        tmp.persist(path).map_err(|e| e.error)?;
        Ok(())
    }
}

impl MetricsStore for FileMetricsStore {
    fn record(&self, metric: &Metric) -> Result<(), StoreError> {
        fs::create_dir_all(&self.metrics_dir)?;

        let date = metric.timestamp.date_naive();
        let path = self.partition_path(date);
        let _lock = PartitionLock::acquire(&self.lock_path(date))?;

        // A partition that fails to decode is left untouched rather than
        // overwritten with the single new record.
        let mut metrics = read_partition_file(&path)?;
        metrics.push(metric.clone());
        self.write_partition(&path, &metrics)?;

        tracing::debug!(
            agent_id = %metric.agent_id,
            partition = %path.display(),
            records = metrics.len(),
            "metric recorded"
        );
        Ok(())
    }

    fn metrics_within(
        &self,
        period: Duration,
        now: DateTime<Utc>,
    ) -> Result<Vec<Metric>, StoreError> {
        let start = now - period;
        // A partition dated the day before `start` can still hold records
        // that fall inside the window near midnight.
        let earliest_partition = start - Duration::days(1);

        let entries = match fs::read_dir(&self.metrics_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut results = Vec::new();
        for entry in entries {
            let entry = entry?;
            let Some(date) = partition_date(&entry.file_name().to_string_lossy()) else {
                continue;
            };
            if date.and_time(NaiveTime::MIN).and_utc() < earliest_partition {
                continue;
            }

            match read_partition_file(&entry.path()) {
                Ok(metrics) => results.extend(
                    metrics
                        .into_iter()
                        .filter(|m| m.timestamp > start && m.timestamp <= now),
                ),
                Err(StoreError::CorruptPartition { path, source }) => {
                    tracing::warn!(
                        partition = %path.display(),
                        error = %source,
                        "skipping unreadable metrics partition"
                    );
                }
                Err(e) => return Err(e),
            }
        }

        Ok(results)
    }
}

/// Parses `YYYY-MM-DD.json` into its date; anything else is not a partition
fn partition_date(file_name: &str) -> Option<NaiveDate> {
    let stem = file_name.strip_suffix(PARTITION_EXTENSION)?.strip_suffix('.')?;
    NaiveDate::parse_from_str(stem, PARTITION_DATE_FORMAT).ok()
}

fn read_partition_file(path: &Path) -> Result<Vec<Metric>, StoreError> {
    let data = match fs::read(path) {
        Ok(data) => data,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    if data.iter().all(u8::is_ascii_whitespace) {
        return Ok(Vec::new());
    }

    serde_json::from_slice(&data).map_err(|source| StoreError::CorruptPartition {
        path: path.to_path_buf(),
        source,
    })
}

/// Exclusive advisory lock on a partition, released on drop
struct PartitionLock {
    file: File,
}

impl PartitionLock {
    fn acquire(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        FileExt::lock_exclusive(&file)?;
        Ok(Self { file })
    }
}

impl Drop for PartitionLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            tracing::warn!(error = %e, "failed to release metrics partition lock");
        }
    }
}
