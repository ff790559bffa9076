//! Dataset scheduling for single-file and batch runs.
//!
//! Datasets run one after another; parallelism lives inside each stage.

use crate::config::Config;
use crate::io::ingest::discover_datasets;
use crate::io::layout::OutputLayout;
use crate::pipeline::metrics::PerformanceLedger;
use crate::pipeline::stages::{DatasetPipeline, DatasetReport};
use crate::toolkit::Toolkit;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Batch-level performance report file.
pub const PERFORMANCE_REPORT: &str = "PERFORMANCE_METRICS.txt";

/// Outcome of one invocation.
#[derive(Debug, Default)]
pub struct BatchStats {
    pub reports: Vec<DatasetReport>,
    pub ledger: PerformanceLedger,

    /// Written only in batch mode
    pub report_path: Option<PathBuf>,
}

impl BatchStats {
    pub fn datasets(&self) -> usize {
        self.reports.len()
    }

    /// PDBQT files written across all datasets.
    pub fn converted(&self) -> usize {
        self.reports.iter().map(|r| r.conversion.converted).sum()
    }
}

impl std::fmt::Display for BatchStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Datasets: {}, Records: {}, Converted: {}",
            self.datasets(),
            self.ledger.total_records(),
            self.converted()
        )
    }
}

/// Runs datasets through the pipeline and owns the performance ledger.
pub struct BatchScheduler {
    pipeline: DatasetPipeline,
    config: Arc<Config>,
}

impl BatchScheduler {
    pub fn new(config: Arc<Config>, toolkit: Arc<dyn Toolkit>) -> Self {
        Self {
            pipeline: DatasetPipeline::new(config.clone(), toolkit),
            config,
        }
    }

    /// Process `input` as a dataset file, or as a directory when batch mode
    /// is enabled.
    pub async fn run(&self, input: &Path) -> Result<BatchStats> {
        let mut stats = BatchStats::default();

        if self.config.batch.enabled {
            if !input.is_dir() {
                anyhow::bail!("Batch directory {} does not exist", input.display());
            }
            let datasets = discover_datasets(input)
                .with_context(|| format!("Failed to scan {}", input.display()))?;
            if datasets.is_empty() {
                anyhow::bail!("No .smi, .csv or .sdf datasets found in {}", input.display());
            }
            tracing::info!("Found {} datasets in {}", datasets.len(), input.display());

            for (i, dataset) in datasets.iter().enumerate() {
                tracing::info!("Dataset {}/{}: {}", i + 1, datasets.len(), dataset.display());
                let layout = OutputLayout::batch(input, dataset);
                let report = self.pipeline.run(dataset, &layout).await?;
                stats.ledger.record(report.performance.clone());
                stats.reports.push(report);
            }

            let path = OutputLayout::batch_root(input).join(PERFORMANCE_REPORT);
            stats.ledger.write_report(&path)?;
            stats.report_path = Some(path);
        } else {
            if !input.is_file() {
                anyhow::bail!("Dataset {} does not exist", input.display());
            }
            let layout = OutputLayout::single(input);
            let report = self.pipeline.run(input, &layout).await?;
            stats.ledger.record(report.performance.clone());
            stats.reports.push(report);
        }

        stats.ledger.print_summary();
        if let Some(ref path) = self.config.processing.metrics_output_path {
            if let Err(e) = stats.ledger.save_to_file(path) {
                tracing::warn!("Failed to save metrics to {}: {}", path, e);
            }
        }

        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::toolkit::mock::MockToolkit;
    use std::fs;
    use tempfile::TempDir;

    fn scheduler(config: Config) -> BatchScheduler {
        BatchScheduler::new(Arc::new(config), Arc::new(MockToolkit::new()))
    }

    #[tokio::test]
    async fn test_batch_mode_layout_and_report() {
        let dir = TempDir::new().unwrap();
        let batch = dir.path().join("libs");
        fs::create_dir_all(batch.join("nested")).unwrap();
        fs::write(batch.join("b.smi"), "CCCC b1\nCCCN b2\n").unwrap();
        fs::write(batch.join("nested").join("a.csv"), "Smiles;Name\nCCCCO;a1\n").unwrap();
        fs::write(batch.join("notes.txt"), "ignored").unwrap();

        let mut config = Config::default();
        config.batch.enabled = true;
        let metrics_path = dir.path().join("ledger.json");
        config.processing.metrics_output_path = Some(metrics_path.to_string_lossy().into_owned());

        let stats = scheduler(config).run(&batch).await.unwrap();

        let order: Vec<_> = stats.reports.iter().map(|r| r.dataset.as_str()).collect();
        assert_eq!(order, vec!["b", "a"]);
        assert_eq!(stats.ledger.total_records(), 3);
        assert_eq!(stats.converted(), 3);

        assert!(batch.join("b").join("b1.pdbqt").exists());
        assert!(batch.join("a").join("a1.pdbqt").exists());
        assert!(dir.path().join("CSV").join("a_processed.csv").exists());
        assert!(dir.path().join("ERRORS").join("b_error_log_pdbqt.txt").exists());

        let report = fs::read_to_string(dir.path().join(PERFORMANCE_REPORT)).unwrap();
        assert!(report.starts_with("2 datasets (3 mols.) processed in "));
        assert!(report.contains("b.smi in "));
        assert!(metrics_path.exists());
    }

    #[tokio::test]
    async fn test_single_mode_has_no_performance_report() {
        let dir = TempDir::new().unwrap();
        let dataset = dir.path().join("lib.smi");
        fs::write(&dataset, "CCCC one\n").unwrap();

        let stats = scheduler(Config::default()).run(&dataset).await.unwrap();
        assert_eq!(stats.datasets(), 1);
        assert!(stats.report_path.is_none());
        assert!(dir.path().join("pdbqt").join("one.pdbqt").exists());
        assert!(!dir.path().join(PERFORMANCE_REPORT).exists());
    }

    #[tokio::test]
    async fn test_missing_inputs_are_fatal() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("nope");

        assert!(scheduler(Config::default()).run(&missing).await.is_err());

        let mut config = Config::default();
        config.batch.enabled = true;
        assert!(scheduler(config.clone()).run(&missing).await.is_err());

        let empty = dir.path().join("empty");
        fs::create_dir_all(&empty).unwrap();
        assert!(scheduler(config).run(&empty).await.is_err());
    }

    #[test]
    fn test_batch_stats_display() {
        let display = BatchStats::default().to_string();
        assert!(display.contains("Datasets: 0"));
    }
}
