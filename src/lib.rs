//! Ligand preparation pipeline
//!
//! Turns datasets of small-molecule SMILES into per-molecule, docking-ready
//! PDBQT files.
//!
//! # Architecture
//!
//! The pipeline consists of:
//!
//! - **Table**: index-addressed record table with generation-checked write-back
//! - **Toolkit**: chemistry seam, backed by the Open Babel command line
//! - **I/O**: dataset ingestion, error manifests, CSV/SDF export, output layout
//! - **Pipeline**: cleanup, range filters, a bounded parallel stage executor,
//!   two-tier conformer generation, resumable PDBQT conversion and metrics
//!
//! # Usage
//!
//! ```no_run
//! use ligprep::{run_pipeline, Config};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_file(&"config.yaml".into())?;
//!     run_pipeline(config, "ligands.smi".as_ref()).await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod io;
pub mod pipeline;
pub mod table;
pub mod toolkit;

pub use config::{Config, ConformerConfig, FilterConfig};
pub use pipeline::{BatchScheduler, BatchStats, DatasetPipeline, DatasetReport};
pub use table::{Record, RecordTable};
pub use toolkit::{ObabelToolkit, Toolkit, ToolkitError};

use anyhow::Result;
use std::path::Path;
use std::sync::Arc;

/// Run the pipeline on a dataset file, or a directory in batch mode.
pub async fn run_pipeline(config: Config, input: &Path) -> Result<BatchStats> {
    config.validate()?;

    tracing::info!("Starting ligand preparation");
    tracing::info!(
        "pH {}, {} concurrent records per stage, toolkit {}",
        config.protonation.ph,
        config.processing.concurrency,
        config.toolkit.obabel_path
    );

    let toolkit: Arc<dyn Toolkit> = Arc::new(ObabelToolkit::new(
        &config.toolkit.obabel_path,
        config.toolkit.force_field.clone(),
    ));
    let scheduler = BatchScheduler::new(Arc::new(config), toolkit);

    let stats = scheduler.run(input).await?;
    tracing::info!("Pipeline complete: {}", stats);

    Ok(stats)
}

/// Build a Tokio runtime with the specified configuration.
pub fn build_runtime(worker_threads: Option<usize>) -> Result<tokio::runtime::Runtime> {
    let mut builder = tokio::runtime::Builder::new_multi_thread();

    if let Some(threads) = worker_threads {
        builder.worker_threads(threads);
    }

    builder.enable_all();

    Ok(builder.build()?)
}

/// Initialize the Rayon thread pool.
pub fn init_rayon(threads: Option<usize>) -> Result<()> {
    if let Some(threads) = threads {
        rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build_global()?;
    }
    Ok(())
}
