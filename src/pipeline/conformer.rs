//! Two-tier 3D conformer generation.
//!
//! Each record walks a small state machine:
//!
//! ```text
//! Primary --EmbeddingFailed--> Fallback --EmbeddingFailed--> Failed
//!    |                            |
//!    +--------- ok -------> Done <+
//! ```
//!
//! Only [`ToolkitError::EmbeddingFailed`] moves a record to the next tier.
//! Any other toolkit error, or a panicking worker, aborts the stage once all
//! in-flight units have completed.

use crate::config::ConformerConfig;
use crate::io::manifest::{ErrorManifest, ManifestKind};
use crate::pipeline::executor::{StageExecutor, TaskError};
use crate::pipeline::metrics::StageSnapshot;
use crate::table::{Geometry, RecordTable, Structure};
use crate::toolkit::{EmbedMethod, EmbedParams, Toolkit, ToolkitError};
use anyhow::{bail, Result};
use rayon::prelude::*;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Embedding state of one record.
#[derive(Debug, Clone, PartialEq)]
pub enum EmbedState {
    Primary,
    Fallback,
    Done(EmbedMethod),
    Failed(String),
}

/// Terminal result for one record.
#[derive(Debug, Clone, PartialEq)]
pub enum ConformerOutcome {
    Embedded {
        structure: Structure,
        method: EmbedMethod,
    },
    Failed {
        reason: String,
    },
}

impl ConformerConfig {
    /// Embedding parameters and refinement cap for a tier.
    pub fn attempt(&self, method: EmbedMethod, atoms: usize) -> (EmbedParams, usize) {
        match method {
            EmbedMethod::Stochastic => (
                EmbedParams {
                    method,
                    max_iterations: self.primary_iteration_factor * atoms,
                    random_coords: true,
                },
                self.primary_refine_iterations,
            ),
            EmbedMethod::DistanceGeometry => (
                EmbedParams {
                    method,
                    max_iterations: self.fallback_iteration_factor * atoms,
                    random_coords: true,
                },
                self.fallback_refine_iterations,
            ),
        }
    }
}

/// Run the state machine for one structure.
pub fn generate_conformer(
    toolkit: &dyn Toolkit,
    structure: &Structure,
    config: &ConformerConfig,
) -> Result<ConformerOutcome, ToolkitError> {
    let hydrogenated = toolkit.add_hydrogens(structure)?;
    let atoms = toolkit.atom_count(&hydrogenated)?;

    let attempt = |method: EmbedMethod| -> Result<Structure, ToolkitError> {
        let (params, refine_iterations) = config.attempt(method, atoms);
        let embedded = toolkit.embed(&hydrogenated, &params)?;
        toolkit.refine(&embedded, refine_iterations)
    };

    let mut state = EmbedState::Primary;
    let mut refined = None;
    loop {
        state = match state {
            EmbedState::Primary => match attempt(EmbedMethod::Stochastic) {
                Ok(s) => {
                    refined = Some(s);
                    EmbedState::Done(EmbedMethod::Stochastic)
                }
                Err(e) if e.is_embedding_failure() => {
                    tracing::debug!("Primary embedding failed for {}: {}", structure.smiles(), e);
                    EmbedState::Fallback
                }
                Err(e) => return Err(e),
            },
            EmbedState::Fallback => match attempt(EmbedMethod::DistanceGeometry) {
                Ok(s) => {
                    refined = Some(s);
                    EmbedState::Done(EmbedMethod::DistanceGeometry)
                }
                Err(e) if e.is_embedding_failure() => EmbedState::Failed(e.to_string()),
                Err(e) => return Err(e),
            },
            EmbedState::Done(method) => {
                return match refined {
                    Some(structure) => Ok(ConformerOutcome::Embedded { structure, method }),
                    None => Err(ToolkitError::output("embed", "no structure after embedding")),
                }
            }
            EmbedState::Failed(reason) => return Ok(ConformerOutcome::Failed { reason }),
        };
    }
}

/// Counts and failure list of one conformer stage run.
#[derive(Debug)]
pub struct ConformerReport {
    pub embedded: usize,
    /// Records that needed the fallback tier
    pub via_fallback: usize,
    pub failed: usize,
    pub elapsed: Duration,
    pub manifest: ErrorManifest,
    pub snapshot: StageSnapshot,
}

/// Generate 3D coordinates for every row of the table.
///
/// Records that exhaust both tiers keep their structure, are flagged
/// [`Geometry::Failed`] and are listed in the returned manifest.
pub async fn run_conformer_stage(
    executor: &StageExecutor,
    table: &mut RecordTable,
    toolkit: Arc<dyn Toolkit>,
    config: ConformerConfig,
) -> Result<ConformerReport> {
    let started = Instant::now();
    let mut manifest = ErrorManifest::new(ManifestKind::Conformer);

    let mut inputs = Vec::with_capacity(table.len());
    let mut missing = Vec::new();
    for row in table.row_refs() {
        match table.row(row.index).and_then(|r| r.structure.clone()) {
            Some(structure) => inputs.push((row, structure)),
            None => missing.push(row),
        }
    }
    for row in missing {
        table.apply(row, |r| {
            r.geometry = Geometry::Failed;
            manifest.push(r.name.clone(), "no structure");
        })?;
    }

    let mut embedded = 0;
    let mut via_fallback = 0;
    let mut fatal: Option<TaskError> = None;

    let snapshot = executor
        .run(
            "conformer",
            inputs,
            move |_, structure| generate_conformer(toolkit.as_ref(), &structure, &config),
            |outcome| {
                let applied = table.apply(outcome.row, |record| match outcome.result {
                    Ok(ConformerOutcome::Embedded { structure, method }) => {
                        record.structure = Some(structure);
                        record.geometry = Geometry::Embedded;
                        embedded += 1;
                        if method == EmbedMethod::DistanceGeometry {
                            via_fallback += 1;
                        }
                    }
                    Ok(ConformerOutcome::Failed { reason }) => {
                        record.geometry = Geometry::Failed;
                        tracing::warn!("3D generation failed for {}: {}", record.name, reason);
                        manifest.push(record.name.clone(), reason);
                    }
                    Err(e) => {
                        tracing::error!("Conformer stage fault on {}: {}", record.name, e);
                        fatal.get_or_insert(e);
                    }
                });
                if let Err(e) = applied {
                    tracing::error!("Dropped conformer result: {}", e);
                }
            },
        )
        .await;

    if let Some(e) = fatal {
        bail!("Conformer generation aborted: {}", e);
    }

    let report = ConformerReport {
        embedded,
        via_fallback,
        failed: manifest.len(),
        elapsed: started.elapsed(),
        manifest,
        snapshot,
    };
    tracing::info!(
        "3D generation: {} embedded ({} via fallback), {} failed",
        report.embedded,
        report.via_fallback,
        report.failed
    );
    Ok(report)
}

/// Split off geometry-failed records and give them a 2D depiction.
///
/// Returns `(succeeded, failed)`; order is preserved in both.
pub fn partition_failures(table: RecordTable, toolkit: &dyn Toolkit) -> (RecordTable, RecordTable) {
    let (failed, succeeded) = table.partition(|r| r.geometry == Geometry::Failed);

    let failed_rows = failed
        .into_records()
        .into_iter()
        .map(|mut record| {
            if let Some(structure) = record.structure.as_ref() {
                match toolkit.depict_2d(structure) {
                    Ok(depicted) => {
                        record.structure = Some(depicted);
                        record.geometry = Geometry::Depicted;
                    }
                    Err(e) => tracing::warn!("No 2D depiction for {}: {}", record.name, e),
                }
            }
            record
        })
        .collect();

    (succeeded, RecordTable::from_records(failed_rows))
}

/// PNG depictions of `records` in row order; a failed render yields `None`.
pub fn render_depictions(records: &RecordTable, toolkit: &dyn Toolkit) -> Vec<Option<Vec<u8>>> {
    records
        .records()
        .par_iter()
        .map(|record| {
            let structure = record.structure.as_ref()?;
            match toolkit.render_png(structure) {
                Ok(png) => Some(png),
                Err(e) => {
                    tracing::warn!("No rendered depiction for {}: {}", record.name, e);
                    None
                }
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::executor::ExecutorConfig;
    use crate::table::Record;
    use crate::toolkit::mock::MockToolkit;

    fn structure(smiles: &str) -> Structure {
        Structure::new(smiles)
    }

    fn table(smiles: &[&str]) -> RecordTable {
        RecordTable::from_records(
            smiles
                .iter()
                .map(|s| {
                    let mut record = Record::new(format!("mol_{}", s), *s);
                    record.set_structure(Structure::new(*s));
                    record
                })
                .collect(),
        )
    }

    #[test]
    fn test_budgets_scale_with_atom_count() {
        let config = ConformerConfig::default();
        let (primary, refine) = config.attempt(EmbedMethod::Stochastic, 20);
        assert_eq!(primary.max_iterations, 60);
        assert!(primary.random_coords);
        assert_eq!(refine, 100);

        let (fallback, refine) = config.attempt(EmbedMethod::DistanceGeometry, 20);
        assert_eq!(fallback.max_iterations, 200);
        assert!(fallback.random_coords);
        assert_eq!(refine, 10_000);
    }

    #[test]
    fn test_primary_success_never_falls_back() {
        let toolkit = MockToolkit::new();
        let outcome =
            generate_conformer(&toolkit, &structure("CCO"), &ConformerConfig::default()).unwrap();
        assert!(matches!(
            outcome,
            ConformerOutcome::Embedded { method: EmbedMethod::Stochastic, .. }
        ));
        assert_eq!(toolkit.embed_methods_for("CCO"), vec![EmbedMethod::Stochastic]);
        // 3 heavy atoms, doubled for hydrogens, times 3
        assert_eq!(toolkit.embed_calls.lock().unwrap()[0].2, 18);
    }

    #[test]
    fn test_fallback_attempted_exactly_once() {
        let toolkit = MockToolkit::new().fail_primary("CCN");
        let outcome =
            generate_conformer(&toolkit, &structure("CCN"), &ConformerConfig::default()).unwrap();
        assert!(matches!(
            outcome,
            ConformerOutcome::Embedded { method: EmbedMethod::DistanceGeometry, .. }
        ));
        assert_eq!(
            toolkit.embed_methods_for("CCN"),
            vec![EmbedMethod::Stochastic, EmbedMethod::DistanceGeometry]
        );
        assert_eq!(toolkit.refine_calls.lock().unwrap()[0].1, 10_000);
    }

    #[test]
    fn test_both_tiers_fail() {
        let toolkit = MockToolkit::new().fail_embedding("CC");
        let outcome =
            generate_conformer(&toolkit, &structure("CC"), &ConformerConfig::default()).unwrap();
        assert!(matches!(outcome, ConformerOutcome::Failed { .. }));
        assert_eq!(toolkit.embed_methods_for("CC").len(), 2);
    }

    #[test]
    fn test_other_faults_do_not_fall_back() {
        let toolkit = MockToolkit::new().fault_embedding("CS");
        let err = generate_conformer(&toolkit, &structure("CS"), &ConformerConfig::default())
            .unwrap_err();
        assert!(matches!(err, ToolkitError::Io(_)));
        assert_eq!(toolkit.embed_methods_for("CS"), vec![EmbedMethod::Stochastic]);
    }

    #[tokio::test]
    async fn test_stage_flags_failures_and_partitions() {
        let toolkit = Arc::new(
            MockToolkit::new()
                .fail_primary("CCN")
                .fail_embedding("CC"),
        );
        let mut table = table(&["CCO", "CC", "CCN", "CCCC"]);
        let executor = StageExecutor::new(ExecutorConfig::default());

        let report = run_conformer_stage(
            &executor,
            &mut table,
            toolkit.clone(),
            ConformerConfig::default(),
        )
        .await
        .unwrap();

        assert_eq!(report.embedded, 3);
        assert_eq!(report.via_fallback, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(report.manifest.identifiers().collect::<Vec<_>>(), vec!["mol_CC"]);
        assert_eq!(toolkit.embed_methods_for("CCN").len(), 2);
        assert_eq!(toolkit.embed_methods_for("CCO").len(), 1);

        let (ok, failed) = partition_failures(table, toolkit.as_ref());
        let ok_names: Vec<_> = ok.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(ok_names, vec!["mol_CCO", "mol_CCN", "mol_CCCC"]);
        assert!(ok.iter().all(|r| r.geometry == Geometry::Embedded));

        assert_eq!(failed.len(), 1);
        let failed_row = failed.row(0).unwrap();
        assert_eq!(failed_row.geometry, Geometry::Depicted);
        assert!(failed_row.structure.as_ref().unwrap().block().unwrap().contains("mock2d"));
    }

    #[test]
    fn test_render_depictions_follow_row_order() {
        let mut rows = table(&["CC", "CCN"]).into_records();
        rows.push(Record::new("bare", "N"));
        let failed = RecordTable::from_records(rows);

        let depictions = render_depictions(&failed, &MockToolkit::new());
        assert_eq!(depictions.len(), 3);
        assert!(depictions[0].as_deref().unwrap().starts_with(b"\x89PNG"));
        assert!(depictions[1].is_some());
        assert!(depictions[2].is_none());
    }

    #[tokio::test]
    async fn test_stage_aborts_on_unrelated_fault() {
        let toolkit = Arc::new(MockToolkit::new().fault_embedding("CS"));
        let mut table = table(&["CCO", "CS", "CN"]);
        let executor = StageExecutor::new(ExecutorConfig::default());

        let result =
            run_conformer_stage(&executor, &mut table, toolkit.clone(), ConformerConfig::default())
                .await;
        assert!(result.is_err());
        // siblings still ran to completion
        assert_eq!(toolkit.embed_methods_for("CCO").len(), 1);
        assert_eq!(toolkit.embed_methods_for("CN").len(), 1);
    }
}
