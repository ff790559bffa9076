//! Stage orchestration: cleanup, filtering, parallel stages and scheduling.

pub mod cleanup;
pub mod conformer;
pub mod convert;
pub mod executor;
pub mod filter;
pub mod metrics;
mod scheduler;
mod stages;


pub use executor::{ExecutorConfig, StageExecutor, TaskError, TaskOutcome};
pub use metrics::{DatasetPerformance, PerformanceLedger, StageMetrics, StageSnapshot};
pub use scheduler::{BatchScheduler, BatchStats, PERFORMANCE_REPORT};
pub use stages::{DatasetPipeline, DatasetReport};
