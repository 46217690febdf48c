use std::time::Instant;
use verifier::data::{AgentResult, AgentStatus};

/// Tracks a sequence of agent runs; all output goes to stderr so stdout
/// stays machine-readable.
pub struct ProgressIndicator {
    total: usize,
    passed: usize,
    skipped: usize,
    failed: usize,
    start_time: Instant,
}

impl ProgressIndicator {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            passed: 0,
            skipped: 0,
            failed: 0,
            start_time: Instant::now(),
        }
    }

    fn done(&self) -> usize {
        self.passed + self.skipped + self.failed
    }

    pub fn start_item(&self, name: &str) {
        eprintln!("Running agent: {} ({}/{})", name, self.done() + 1, self.total);
    }

    /// Counts a run as failed when it failed or produced a blocking finding
    pub fn complete_item(&mut self, result: &AgentResult) -> bool {
        let failed = result.status == AgentStatus::Failure || result.is_blocking();
        if failed {
            self.failed += 1;
        } else if result.status == AgentStatus::Skipped {
            self.skipped += 1;
        } else {
            self.passed += 1;
        }
        failed
    }

    pub fn finish(&self) {
        let elapsed = self.start_time.elapsed();
        eprintln!("\n{}", "=".repeat(60));
        eprintln!("Summary:");
        eprintln!("  Total:    {}", self.total);
        eprintln!("  Passed:   {}", self.passed);
        eprintln!("  Skipped:  {}", self.skipped);
        eprintln!("  Failed:   {}", self.failed);
        eprintln!("  Duration: {:.2}s", elapsed.as_secs_f64());
        eprintln!("{}", "=".repeat(60));
    }
}
