//! Ligand preparation CLI
//!
//! Cleans, filters and protonates SMILES datasets, generates 3D conformers
//! and writes docking-ready PDBQT files.

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use ligprep::pipeline::filter::Bounds;
use ligprep::{build_runtime, init_rayon, run_pipeline, Config};

#[derive(Parser)]
#[command(name = "ligprep")]
#[command(about = "Prepare ligand libraries for molecular docking", long_about = None)]
#[command(args_conflicts_with_subcommands = true)]
struct Cli {
    /// Dataset file (.smi, .csv, .sdf), or a directory with --batch
    input: Option<PathBuf>,

    /// Path to a YAML or JSON configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Process every dataset below INPUT
    #[arg(long)]
    batch: bool,

    /// Re-convert molecules whose PDBQT file already exists
    #[arg(long)]
    overwrite: bool,

    /// Protonation pH
    #[arg(long)]
    ph: Option<f64>,

    /// Override concurrency level
    #[arg(long, global = true)]
    concurrency: Option<usize>,

    #[command(flatten)]
    filters: FilterArgs,

    #[command(subcommand)]
    command: Option<Commands>,
}

/// Inclusive descriptor bounds.
#[derive(Args, Debug, Default)]
struct FilterArgs {
    #[arg(long)]
    mw_min: Option<f64>,
    #[arg(long)]
    mw_max: Option<f64>,

    #[arg(long)]
    logp_min: Option<f64>,
    #[arg(long)]
    logp_max: Option<f64>,

    /// Rotatable bonds
    #[arg(long)]
    rotb_min: Option<f64>,
    #[arg(long)]
    rotb_max: Option<f64>,

    #[arg(long)]
    hba_min: Option<f64>,
    #[arg(long)]
    hba_max: Option<f64>,

    #[arg(long)]
    hbd_min: Option<f64>,
    #[arg(long)]
    hbd_max: Option<f64>,

    #[arg(long)]
    tpsa_min: Option<f64>,
    #[arg(long)]
    tpsa_max: Option<f64>,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate configuration
    Validate,

    /// Generate a sample configuration file
    GenerateConfig {
        /// Output path for configuration file
        #[arg(short, long, default_value = "config.yaml")]
        output: PathBuf,
    },
}

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let cli = Cli::parse();

    match &cli.command {
        None => {
            let Some(input) = cli.input.clone() else {
                anyhow::bail!("An input dataset or directory is required");
            };
            let config = load_config(&cli)?;
            run_command(config, input)?;
        }

        Some(Commands::Validate) => {
            validate_command(&cli)?;
        }

        Some(Commands::GenerateConfig { output }) => {
            generate_config_command(output)?;
        }
    }

    Ok(())
}

fn merge(bounds: &mut Bounds, min: Option<f64>, max: Option<f64>) {
    if min.is_some() {
        bounds.min = min;
    }
    if max.is_some() {
        bounds.max = max;
    }
}

/// Configuration file (or defaults) with command-line overrides applied.
fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };

    // Apply overrides
    if let Some(c) = cli.concurrency {
        config.processing.concurrency = c;
    }
    if let Some(ph) = cli.ph {
        config.protonation.ph = ph;
    }
    if cli.batch {
        config.batch.enabled = true;
    }
    if cli.overwrite {
        config.conversion.overwrite = true;
    }

    let f = &cli.filters;
    let filter = &mut config.filter;
    merge(&mut filter.mw, f.mw_min, f.mw_max);
    merge(&mut filter.logp, f.logp_min, f.logp_max);
    merge(&mut filter.rotatable_bonds, f.rotb_min, f.rotb_max);
    merge(&mut filter.hba, f.hba_min, f.hba_max);
    merge(&mut filter.hbd, f.hbd_min, f.hbd_max);
    merge(&mut filter.tpsa, f.tpsa_min, f.tpsa_max);

    Ok(config)
}

fn run_command(config: Config, input: PathBuf) -> Result<()> {
    config.validate()?;

    // Initialize Rayon
    init_rayon(config.processing.rayon_threads)?;

    // Build and run Tokio runtime
    let runtime = build_runtime(config.processing.worker_threads)?;
    runtime.block_on(async { run_pipeline(config, &input).await })?;

    Ok(())
}

fn validate_command(cli: &Cli) -> Result<()> {
    let config = load_config(cli)?;
    config.validate()?;
    println!("Configuration is valid");
    Ok(())
}

fn generate_config_command(output: &Path) -> Result<()> {
    // Generate a commented YAML config
    let yaml = r#"# Ligand preparation pipeline configuration

# === PROCESSING: Performance tuning ===
processing:
  # Records processed concurrently within each parallel stage
  concurrency: 8

  # Tokio async worker threads (null = num CPUs)
  # worker_threads: 8

  # Rayon thread pool size for SMILES parsing (null = num CPUs)
  # rayon_threads: 8

  # Log stage progress periodically
  enable_metrics: true

  # Progress interval in seconds
  progress_interval_secs: 10

  # Save the per-dataset timings as JSON after the run
  # metrics_output_path: "metrics.json"

# === PROTONATION ===
protonation:
  # Target pH, strictly between 0 and 14
  ph: 7.2

# === FILTER: Inclusive descriptor ranges ===
# A descriptor is filtered when min or max is set; a missing bound defaults
# to the lowest or highest value in the dataset.
filter:
  mw:
    min: null
    max: null
  logp:
    min: null
    max: null
  rotatable_bonds:
    min: null
    max: null
  hba:
    min: null
    max: null
  hbd:
    min: null
    max: null
  tpsa:
    min: null
    max: null

# === CONFORMER: 3D generation ===
conformer:
  # Embedding iterations per atom for the fast stochastic method
  primary_iteration_factor: 3

  # Embedding iterations per atom for the distance-geometry fallback
  fallback_iteration_factor: 10

  # Force-field refinement caps
  primary_refine_iterations: 100
  fallback_refine_iterations: 10000

# === CONVERSION: PDBQT output ===
conversion:
  # Re-convert molecules whose PDBQT file already exists
  overwrite: false

# === TOOLKIT: Open Babel ===
toolkit:
  obabel_path: "obabel"
  force_field: "MMFF94"

# === BATCH: Treat the input as a directory of datasets ===
batch:
  enabled: false
"#;

    std::fs::write(output, yaml)?;
    println!("Generated sample configuration at: {}", output.display());

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parse_input() {
        let cli = Cli::try_parse_from(["ligprep", "lib.smi"]).unwrap();
        assert_eq!(cli.input, Some(PathBuf::from("lib.smi")));
        assert!(cli.command.is_none());
    }

    #[test]
    fn test_cli_overrides() {
        let cli = Cli::try_parse_from([
            "ligprep",
            "--batch",
            "--overwrite",
            "--ph",
            "6.4",
            "--mw-min",
            "200",
            "--tpsa-max",
            "140",
            "--concurrency",
            "4",
            "libs",
        ])
        .unwrap();
        let config = load_config(&cli).unwrap();
        assert!(config.batch.enabled);
        assert!(config.conversion.overwrite);
        assert_eq!(config.protonation.ph, 6.4);
        assert_eq!(config.processing.concurrency, 4);
        assert_eq!(config.filter.mw, Bounds::new(Some(200.0), None));
        assert_eq!(config.filter.tpsa, Bounds::new(None, Some(140.0)));
        assert!(!config.filter.logp.is_active());
    }

    #[test]
    fn test_invalid_ph_fails_validation() {
        let cli = Cli::try_parse_from(["ligprep", "--ph", "14", "lib.smi"]).unwrap();
        assert!(load_config(&cli).unwrap().validate().is_err());
    }

    #[test]
    fn test_cli_parse_validate() {
        let cli = Cli::try_parse_from(["ligprep", "validate", "-c", "test.json"]);
        assert!(cli.is_ok());
    }

    #[test]
    fn test_generated_config_is_valid() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.yaml");
        generate_config_command(&path).unwrap();

        let config = Config::from_file(&path).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.conformer.fallback_refine_iterations, 10_000);
        assert!(!config.filter.is_active());
    }
}
