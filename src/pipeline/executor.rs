//! Bounded fan-out/fan-in runner for per-record stage work.
//!
//! Each call to [`StageExecutor::run`] owns its own window of in-flight
//! tasks: the stream is created, drained and dropped inside the call, so no
//! two stages ever share workers. Units run on the blocking pool; a panicking
//! unit is caught at the join boundary and reported like any other failure.
//! Outcomes reach the caller's collector one at a time, in completion order.

use crate::pipeline::metrics::{ProgressReporter, StageMetrics, StageSnapshot};
use crate::table::RowRef;
use crate::toolkit::ToolkitError;
use futures::stream::{self, StreamExt};
use std::any::Any;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::mpsc;

/// Why a unit of work did not produce a value.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error(transparent)]
    Failed(#[from] ToolkitError),

    #[error("worker panicked: {0}")]
    Panicked(String),
}

impl TaskError {
    pub fn is_panic(&self) -> bool {
        matches!(self, TaskError::Panicked(_))
    }
}

/// Terminal outcome of one submitted unit.
#[derive(Debug)]
pub struct TaskOutcome<T> {
    pub row: RowRef,
    pub result: Result<T, TaskError>,
}

/// Executor settings.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Maximum units in flight at once
    pub concurrency: usize,

    /// Log periodic progress while a stage runs
    pub enable_progress: bool,

    /// Progress interval in seconds
    pub progress_interval_secs: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            concurrency: 8,
            enable_progress: false,
            progress_interval_secs: 10,
        }
    }
}

/// Runs one stage's units across a bounded pool.
#[derive(Debug, Clone, Default)]
pub struct StageExecutor {
    config: ExecutorConfig,
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

impl StageExecutor {
    pub fn new(config: ExecutorConfig) -> Self {
        Self { config }
    }

    pub fn concurrency(&self) -> usize {
        self.config.concurrency.max(1)
    }

    /// Apply `f(index, input)` to every input and hand each outcome to
    /// `collect` as it completes.
    ///
    /// Every input produces exactly one outcome. Returns once all units have
    /// completed.
    pub async fn run<I, T, F, C>(
        &self,
        stage: &'static str,
        inputs: Vec<(RowRef, I)>,
        f: F,
        mut collect: C,
    ) -> StageSnapshot
    where
        I: Send + 'static,
        T: Send + 'static,
        F: Fn(usize, I) -> Result<T, ToolkitError> + Send + Sync + 'static,
        C: FnMut(TaskOutcome<T>),
    {
        let total = inputs.len() as u64;
        let metrics = StageMetrics::new(stage);
        metrics.add_submitted(total);

        tracing::debug!(
            "Stage {}: {} units ({} concurrent)",
            stage,
            total,
            self.concurrency()
        );

        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);
        let reporter_handle = if self.config.enable_progress && total > 0 {
            let reporter = ProgressReporter::new(
                metrics.clone(),
                self.config.progress_interval_secs,
                total,
            );
            Some(tokio::spawn(reporter.run(shutdown_rx)))
        } else {
            drop(shutdown_rx);
            None
        };

        let f = Arc::new(f);
        let mut completions = stream::iter(inputs)
            .map(|(row, input)| {
                let f = f.clone();
                let metrics = metrics.clone();
                async move {
                    let started = Instant::now();
                    let joined = tokio::task::spawn_blocking(move || (*f)(row.index, input)).await;
                    metrics.add_busy_time(started.elapsed());

                    let result = match joined {
                        Ok(Ok(value)) => {
                            metrics.add_succeeded();
                            Ok(value)
                        }
                        Ok(Err(e)) => {
                            metrics.add_failed();
                            Err(TaskError::Failed(e))
                        }
                        Err(join_error) => {
                            metrics.add_panicked();
                            let message = if join_error.is_panic() {
                                panic_message(join_error.into_panic())
                            } else {
                                join_error.to_string()
                            };
                            Err(TaskError::Panicked(message))
                        }
                    };
                    TaskOutcome { row, result }
                }
            })
            .buffer_unordered(self.concurrency());

        while let Some(outcome) = completions.next().await {
            collect(outcome);
        }

        let _ = shutdown_tx.send(()).await;
        if let Some(handle) = reporter_handle {
            let _ = handle.await;
        }

        let snapshot = metrics.snapshot();
        tracing::debug!("{}", snapshot);
        snapshot
    }
}
