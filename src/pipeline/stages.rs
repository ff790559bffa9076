//! The per-dataset stage chain.
//!
//! ```text
//! ingest ─▶ invalid removal ─▶ dedup ─▶ resume pre-filter
//!    ─▶ desalt* ─▶ dedup ─▶ descriptors* ─▶ range filters ─▶ dedup
//!    ─▶ protonate* ─▶ dedup ─▶ rename collisions
//!    ─▶ conformers* ─▶ partition ─▶ export ─▶ pdbqt*
//! ```
//!
//! Stages marked `*` fan out over the [`StageExecutor`]; everything else
//! runs on the whole table between them. A record that fails desalting,
//! descriptors or protonation is dropped and listed in the structure
//! manifest, which is written once after the last structural stage.

use crate::config::Config;
use crate::io::export::{write_csv, write_sdf, write_xlsx};
use crate::io::ingest::read_dataset;
use crate::io::layout::OutputLayout;
use crate::io::manifest::{ErrorManifest, ManifestKind};
use crate::pipeline::cleanup::{self, CleanupReport};
use crate::pipeline::conformer::{partition_failures, render_depictions, run_conformer_stage};
use crate::pipeline::convert::{
    drop_already_converted, run_conversion_stage, ConversionReport, ConversionTarget,
};
use crate::pipeline::executor::StageExecutor;
use crate::pipeline::filter::{apply_filters, FilterOutcome};
use crate::pipeline::metrics::{format_hms, DatasetPerformance, StageSnapshot};
use crate::table::{RawRecord, Record, RecordTable, Structure};
use crate::toolkit::{Toolkit, ToolkitError};
use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

/// Everything that happened to one dataset.
#[derive(Debug)]
pub struct DatasetReport {
    pub dataset: String,

    /// Rows read from the input
    pub input_records: usize,

    /// Rows with missing or unparsable SMILES
    pub invalid: usize,

    /// Rows removed by all duplicate passes together
    pub duplicates: usize,

    /// Rows skipped because their PDBQT file already existed
    pub already_converted: usize,

    /// Rows dropped by desalting, descriptor or protonation failures
    pub stage_failures: usize,

    pub filters: Vec<FilterOutcome>,

    /// Identifiers given a numeric suffix
    pub renamed: usize,

    pub embedded: usize,
    pub via_fallback: usize,
    pub geometry_failed: usize,

    pub conversion: ConversionReport,
    pub performance: DatasetPerformance,
}

impl DatasetReport {
    /// Rows dropped by the range filters.
    pub fn filtered(&self) -> usize {
        self.filters.iter().map(|f| f.dropped).sum()
    }
}

impl std::fmt::Display for DatasetReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}: {} read, {} invalid, {} duplicates, {} filtered, {} embedded, {} without 3D, {} converted in {}",
            self.dataset,
            self.input_records,
            self.invalid,
            self.duplicates,
            self.filtered(),
            self.embedded,
            self.geometry_failed,
            self.conversion.converted,
            format_hms(self.performance.total)
        )
    }
}

/// Runs the full stage chain for one dataset at a time.
pub struct DatasetPipeline {
    config: Arc<Config>,
    toolkit: Arc<dyn Toolkit>,
    executor: StageExecutor,
}

impl DatasetPipeline {
    pub fn new(config: Arc<Config>, toolkit: Arc<dyn Toolkit>) -> Self {
        let executor = StageExecutor::new(config.executor_config());
        Self {
            config,
            toolkit,
            executor,
        }
    }

    /// Process one dataset file, writing every artifact under `layout`.
    pub async fn run(&self, dataset_path: &Path, layout: &OutputLayout) -> Result<DatasetReport> {
        let started = Instant::now();
        layout.ensure().with_context(|| {
            format!("Failed to create output directories under {}", layout.root().display())
        })?;

        let raw = self.read(dataset_path).await?;
        let input_records = raw.len();
        tracing::info!("Loaded {} records from {}", input_records, dataset_path.display());

        let table = RecordTable::load(raw, layout.dataset());
        let structure_errors = ErrorManifest::new(ManifestKind::Structure);
        let (mut table, mut structure_errors, invalid) =
            self.remove_invalid(table, structure_errors).await?;
        let mut duplicates = cleanup::remove_duplicates(&mut table).dropped;

        let already_converted = if self.config.conversion.overwrite {
            tracing::info!("Overwrite mode on");
            0
        } else {
            drop_already_converted(&mut table, layout.pdbqt_dir()).with_context(|| {
                format!("Failed to list {}", layout.pdbqt_dir().display())
            })?
        };

        let mut stage_failures = self
            .transform(
                "desalt",
                &mut table,
                &mut structure_errors,
                |toolkit, structure| toolkit.strip_salts(structure),
                |record, structure| record.set_structure(structure),
            )
            .await;
        duplicates += cleanup::remove_duplicates(&mut table).dropped;

        stage_failures += self
            .transform(
                "descriptors",
                &mut table,
                &mut structure_errors,
                |toolkit, structure| toolkit.descriptors(structure),
                |record, descriptors| record.set_descriptors(&descriptors),
            )
            .await;
        let filters = apply_filters(&mut table, &self.config.filter.range_filters());
        duplicates += cleanup::remove_duplicates(&mut table).dropped;

        let ph = self.config.protonation.ph;
        stage_failures += self
            .transform(
                "protonation",
                &mut table,
                &mut structure_errors,
                move |toolkit, structure| toolkit.protonate(structure, ph),
                |record, structure| record.set_structure(structure),
            )
            .await;
        duplicates += cleanup::remove_duplicates(&mut table).dropped;

        let renamed = cleanup::rename_collisions(&mut table);

        structure_errors
            .write(&layout.structure_log())
            .with_context(|| format!("Failed to write {}", layout.structure_log().display()))?;

        let conformers = run_conformer_stage(
            &self.executor,
            &mut table,
            self.toolkit.clone(),
            self.config.conformer.clone(),
        )
        .await?;
        conformers
            .manifest
            .write(&layout.conformer_log())
            .with_context(|| format!("Failed to write {}", layout.conformer_log().display()))?;

        let toolkit = self.toolkit.clone();
        let (succeeded, failed, depictions) = tokio::task::spawn_blocking(move || {
            let (succeeded, failed) = partition_failures(table, toolkit.as_ref());
            let depictions = render_depictions(&failed, toolkit.as_ref());
            (succeeded, failed, depictions)
        })
        .await
        .context("2D depiction of failed records panicked")?;

        self.export(layout, &succeeded, &failed, &depictions)?;

        let target = ConversionTarget {
            dir: layout.pdbqt_dir().to_path_buf(),
            log_path: layout.conversion_log(),
            overwrite: self.config.conversion.overwrite,
        };
        let conversion =
            run_conversion_stage(&self.executor, &succeeded, self.toolkit.clone(), &target).await?;

        let performance = DatasetPerformance {
            dataset: dataset_path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| layout.dataset().to_string()),
            records: input_records,
            total: started.elapsed(),
            geometry: conformers.elapsed,
            conversion: conversion.elapsed,
        };

        let report = DatasetReport {
            dataset: layout.dataset().to_string(),
            input_records,
            invalid: invalid.dropped,
            duplicates,
            already_converted,
            stage_failures,
            filters,
            renamed,
            embedded: conformers.embedded,
            via_fallback: conformers.via_fallback,
            geometry_failed: failed.len(),
            conversion,
            performance,
        };
        tracing::info!("{}", report);
        Ok(report)
    }

    /// SDF blocks go through the toolkit one by one, so reading blocks.
    async fn read(&self, dataset_path: &Path) -> Result<Vec<RawRecord>> {
        let toolkit = self.toolkit.clone();
        let path = dataset_path.to_path_buf();
        tokio::task::spawn_blocking(move || read_dataset(&path, toolkit.as_ref()))
            .await
            .context("Dataset ingestion panicked")?
            .with_context(|| format!("Failed to read dataset {}", dataset_path.display()))
    }

    async fn remove_invalid(
        &self,
        mut table: RecordTable,
        mut manifest: ErrorManifest,
    ) -> Result<(RecordTable, ErrorManifest, CleanupReport)> {
        let toolkit = self.toolkit.clone();
        tokio::task::spawn_blocking(move || {
            let report = cleanup::remove_invalid(&mut table, toolkit.as_ref(), &mut manifest);
            (table, manifest, report)
        })
        .await
        .context("Structure validation panicked")
    }

    /// Run one per-record structural stage and drop the records it failed on.
    ///
    /// Returns the number of records dropped.
    async fn transform<T, F, W>(
        &self,
        stage: &'static str,
        table: &mut RecordTable,
        manifest: &mut ErrorManifest,
        f: F,
        write: W,
    ) -> usize
    where
        T: Send + 'static,
        F: Fn(&dyn Toolkit, &Structure) -> Result<T, ToolkitError> + Send + Sync + 'static,
        W: Fn(&mut Record, T),
    {
        let mut doomed = Vec::new();
        let mut inputs = Vec::with_capacity(table.len());
        for row in table.row_refs() {
            let Some(record) = table.row(row.index) else {
                continue;
            };
            match &record.structure {
                Some(structure) => inputs.push((row, structure.clone())),
                None => {
                    manifest.push(record.name.clone(), format!("{}: no structure", stage));
                    doomed.push(row.index);
                }
            }
        }

        let toolkit = self.toolkit.clone();
        let snapshot: StageSnapshot = self
            .executor
            .run(
                stage,
                inputs,
                move |_, structure| f(toolkit.as_ref(), &structure),
                |outcome| match outcome.result {
                    Ok(value) => {
                        if let Err(e) = table.apply(outcome.row, |record| write(record, value)) {
                            tracing::error!("Dropped {} result: {}", stage, e);
                        }
                    }
                    Err(e) => {
                        if let Some(record) = table.row(outcome.row.index) {
                            tracing::warn!("{} failed for {}: {}", stage, record.name, e);
                            manifest.push(record.name.clone(), format!("{}: {}", stage, e));
                        }
                        doomed.push(outcome.row.index);
                    }
                },
            )
            .await;

        let dropped = table.drop_rows(&doomed);
        tracing::info!(
            "{}: {} ok, {} dropped, {} retained",
            stage,
            snapshot.succeeded,
            dropped,
            table.len()
        );
        dropped
    }

    fn export(
        &self,
        layout: &OutputLayout,
        succeeded: &RecordTable,
        failed: &RecordTable,
        depictions: &[Option<Vec<u8>>],
    ) -> Result<()> {
        write_csv(&layout.processed_csv(), succeeded.records())?;
        let saved = write_sdf(&layout.sdf(), succeeded.records())?;
        tracing::info!("{} molecules were saved to {}", saved, layout.sdf().display());

        if !failed.is_empty() {
            write_csv(&layout.error_csv(), failed.records())?;
            write_xlsx(&layout.error_xlsx(), failed.records(), depictions)?;
            write_sdf(&layout.error_sdf(), failed.records())?;
            tracing::info!(
                "{} molecules without 3D coordinates saved to {}",
                failed.len(),
                layout.error_csv().display()
            );
        }
        Ok(())
    }
}
