//! Stage counters, progress reporting and the per-dataset performance ledger.

use serde::{Serialize, Serializer};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::time::interval;

fn serialize_duration<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_f64(duration.as_secs_f64())
}

/// Format a duration as `HH:MM:SS`, hours unbounded.
pub fn format_hms(duration: Duration) -> String {
    let secs = duration.as_secs();
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs / 60) % 60, secs % 60)
}

/// Counters for one executor run.
#[derive(Debug)]
pub struct StageMetrics {
    /// Stage name used in log lines
    pub stage: &'static str,

    /// Units handed to the pool
    pub submitted: AtomicU64,

    /// Units that returned a value
    pub succeeded: AtomicU64,

    /// Units that returned a toolkit error
    pub failed: AtomicU64,

    /// Units whose worker panicked
    pub panicked: AtomicU64,

    /// Time spent inside unit functions (microseconds, summed across workers)
    pub busy_us: AtomicU64,

    start_time: Instant,
}

impl StageMetrics {
    pub fn new(stage: &'static str) -> Arc<Self> {
        Arc::new(Self {
            stage,
            submitted: AtomicU64::new(0),
            succeeded: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            panicked: AtomicU64::new(0),
            busy_us: AtomicU64::new(0),
            start_time: Instant::now(),
        })
    }

    pub fn add_submitted(&self, count: u64) {
        self.submitted.fetch_add(count, Ordering::Relaxed);
    }

    pub fn add_succeeded(&self) {
        self.succeeded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_panicked(&self) {
        self.panicked.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_busy_time(&self, duration: Duration) {
        self.busy_us
            .fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Units that reached a terminal outcome.
    pub fn completed(&self) -> u64 {
        self.succeeded.load(Ordering::Relaxed)
            + self.failed.load(Ordering::Relaxed)
            + self.panicked.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> StageSnapshot {
        let elapsed = self.elapsed();
        let completed = self.completed();
        let secs = elapsed.as_secs_f64();
        StageSnapshot {
            stage: self.stage,
            submitted: self.submitted.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            panicked: self.panicked.load(Ordering::Relaxed),
            busy_secs: self.busy_us.load(Ordering::Relaxed) as f64 / 1_000_000.0,
            elapsed,
            records_per_second: if secs > 0.0 {
                completed as f64 / secs
            } else {
                0.0
            },
        }
    }
}

/// Stage counters at a point in time.
#[derive(Debug, Clone, Serialize)]
pub struct StageSnapshot {
    pub stage: &'static str,
    pub submitted: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub panicked: u64,
    /// Total time inside unit functions (seconds, summed across workers)
    pub busy_secs: f64,
    #[serde(serialize_with = "serialize_duration")]
    pub elapsed: Duration,
    pub records_per_second: f64,
}

impl StageSnapshot {
    pub fn completed(&self) -> u64 {
        self.succeeded + self.failed + self.panicked
    }
}

impl std::fmt::Display for StageSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}: {}/{} done, {} ok, {} failed, {} panicked | {:.1} rec/s | busy {:.1}s | elapsed {:.1}s",
            self.stage,
            self.completed(),
            self.submitted,
            self.succeeded,
            self.failed,
            self.panicked,
            self.records_per_second,
            self.busy_secs,
            self.elapsed.as_secs_f64(),
        )
    }
}

/// Periodic progress logger for a running stage.
pub struct ProgressReporter {
    metrics: Arc<StageMetrics>,
    interval_secs: u64,
    total: u64,
}

impl ProgressReporter {
    pub fn new(metrics: Arc<StageMetrics>, interval_secs: u64, total: u64) -> Self {
        Self {
            metrics,
            interval_secs: interval_secs.max(1),
            total,
        }
    }

    /// Log progress until a shutdown message arrives.
    pub async fn run(self, mut shutdown: mpsc::Receiver<()>) {
        let mut ticker = interval(Duration::from_secs(self.interval_secs));
        // the first tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let snapshot = self.metrics.snapshot();
                    let progress = if self.total > 0 {
                        snapshot.completed() as f64 / self.total as f64 * 100.0
                    } else {
                        0.0
                    };
                    tracing::info!("[{:.1}%] {}", progress, snapshot);
                }
                _ = shutdown.recv() => break,
            }
        }
    }
}

/// Timings for one processed dataset.
#[derive(Debug, Clone, Serialize)]
pub struct DatasetPerformance {
    /// Input file name
    pub dataset: String,

    /// Records read from the input
    pub records: usize,

    #[serde(serialize_with = "serialize_duration")]
    pub total: Duration,

    /// Conformer generation stage
    #[serde(serialize_with = "serialize_duration")]
    pub geometry: Duration,

    /// PDBQT conversion stage
    #[serde(serialize_with = "serialize_duration")]
    pub conversion: Duration,
}

impl std::fmt::Display for DatasetPerformance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} in {} 3D generation in {} PDBQT conversion in {}",
            self.dataset,
            format_hms(self.total),
            format_hms(self.geometry),
            format_hms(self.conversion)
        )
    }
}

/// Accumulated dataset timings of one invocation.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PerformanceLedger {
    pub datasets: Vec<DatasetPerformance>,
}

impl PerformanceLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, performance: DatasetPerformance) {
        self.datasets.push(performance);
    }

    pub fn total_records(&self) -> usize {
        self.datasets.iter().map(|d| d.records).sum()
    }

    pub fn total_time(&self) -> Duration {
        self.datasets.iter().map(|d| d.total).sum()
    }

    /// Records per second over all datasets.
    pub fn throughput(&self) -> f64 {
        let secs = self.total_time().as_secs_f64();
        if secs > 0.0 {
            self.total_records() as f64 / secs
        } else {
            0.0
        }
    }

    /// One-line batch summary.
    pub fn headline(&self) -> String {
        format!(
            "{} datasets ({} mols.) processed in {} ({:.2} mols/s)",
            self.datasets.len(),
            self.total_records(),
            format_hms(self.total_time()),
            self.throughput()
        )
    }

    /// Summary text: headline then one line per dataset.
    pub fn report(&self) -> String {
        let mut text = self.headline();
        text.push('\n');
        for dataset in &self.datasets {
            text.push_str(&dataset.to_string());
            text.push('\n');
        }
        text
    }

    pub fn print_summary(&self) {
        println!("\n=== Batch Summary ===");
        for dataset in &self.datasets {
            println!("{}", dataset);
        }
        println!("{}", self.headline());
        println!("=====================\n");
    }

    /// Write `PERFORMANCE_METRICS.txt`-style report.
    pub fn write_report(&self, path: &Path) -> anyhow::Result<()> {
        std::fs::write(path, self.report())?;
        tracing::info!("Performance report saved to {}", path.display());
        Ok(())
    }

    /// Save the ledger as JSON.
    pub fn save_to_file(&self, path: &str) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        tracing::info!("Metrics saved to {}", path);
        Ok(())
    }
}
