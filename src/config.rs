//! Configuration for the ligand preparation pipeline.

use crate::pipeline::executor::ExecutorConfig;
use crate::pipeline::filter::{Bounds, RangeFilter};
use crate::table::Column;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main configuration for a pipeline run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Worker pools and metrics
    #[serde(default)]
    pub processing: ProcessingConfig,

    /// Protonation-state assignment
    #[serde(default)]
    pub protonation: ProtonationConfig,

    /// Descriptor range filters
    #[serde(default)]
    pub filter: FilterConfig,

    /// 3D conformer generation
    #[serde(default)]
    pub conformer: ConformerConfig,

    /// Docking-format conversion
    #[serde(default)]
    pub conversion: ConversionConfig,

    /// External chemistry toolkit
    #[serde(default)]
    pub toolkit: ToolkitConfig,

    /// Directory mode
    #[serde(default)]
    pub batch: BatchConfig,
}

/// Processing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingConfig {
    /// Maximum records in flight per parallel stage
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Number of Tokio worker threads
    #[serde(default)]
    pub worker_threads: Option<usize>,

    /// Rayon thread pool size for the parse pass
    #[serde(default)]
    pub rayon_threads: Option<usize>,

    /// Log periodic progress while a stage runs
    #[serde(default = "default_true")]
    pub enable_metrics: bool,

    /// Progress interval in seconds
    #[serde(default = "default_progress_interval")]
    pub progress_interval_secs: u64,

    /// Optional path to save the performance ledger as JSON after the run
    #[serde(default)]
    pub metrics_output_path: Option<String>,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            worker_threads: None,
            rayon_threads: None,
            enable_metrics: true,
            progress_interval_secs: default_progress_interval(),
            metrics_output_path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtonationConfig {
    /// Target pH, strictly between 0 and 14
    #[serde(default = "default_ph")]
    pub ph: f64,
}

impl Default for ProtonationConfig {
    fn default() -> Self {
        Self { ph: default_ph() }
    }
}

/// Inclusive descriptor bounds. A filter with neither bound set is skipped.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FilterConfig {
    /// Molecular weight
    #[serde(default)]
    pub mw: Bounds,

    /// Octanol/water partition coefficient
    #[serde(default)]
    pub logp: Bounds,

    #[serde(default)]
    pub rotatable_bonds: Bounds,

    /// Hydrogen-bond acceptors
    #[serde(default)]
    pub hba: Bounds,

    /// Hydrogen-bond donors
    #[serde(default)]
    pub hbd: Bounds,

    /// Topological polar surface area
    #[serde(default)]
    pub tpsa: Bounds,
}

impl FilterConfig {
    fn bounds(&self, column: Column) -> Bounds {
        match column {
            Column::MolWeight => self.mw,
            Column::LogP => self.logp,
            Column::RotatableBonds => self.rotatable_bonds,
            Column::HBondAcceptors => self.hba,
            Column::HBondDonors => self.hbd,
            Column::Tpsa => self.tpsa,
            Column::Smiles | Column::Name => Bounds::default(),
        }
    }

    /// One filter per descriptor, in `MW, LogP, numRot, HBA, HBD, TPSA` order.
    pub fn range_filters(&self) -> Vec<RangeFilter> {
        Column::DESCRIPTORS
            .iter()
            .map(|&column| RangeFilter::new(column, self.bounds(column)))
            .collect()
    }

    pub fn is_active(&self) -> bool {
        Column::DESCRIPTORS
            .iter()
            .any(|&column| self.bounds(column).is_active())
    }
}

/// Budgets of the two embedding tiers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConformerConfig {
    /// Primary embedding iterations per atom
    #[serde(default = "default_primary_iteration_factor")]
    pub primary_iteration_factor: usize,

    /// Fallback embedding iterations per atom
    #[serde(default = "default_fallback_iteration_factor")]
    pub fallback_iteration_factor: usize,

    /// Refinement cap after a primary embedding
    #[serde(default = "default_primary_refine_iterations")]
    pub primary_refine_iterations: usize,

    /// Refinement cap after a fallback embedding
    #[serde(default = "default_fallback_refine_iterations")]
    pub fallback_refine_iterations: usize,
}

impl Default for ConformerConfig {
    fn default() -> Self {
        Self {
            primary_iteration_factor: default_primary_iteration_factor(),
            fallback_iteration_factor: default_fallback_iteration_factor(),
            primary_refine_iterations: default_primary_refine_iterations(),
            fallback_refine_iterations: default_fallback_refine_iterations(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversionConfig {
    /// Re-convert records whose PDBQT file already exists
    #[serde(default)]
    pub overwrite: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolkitConfig {
    /// Path to the `obabel` executable
    #[serde(default = "default_obabel_path")]
    pub obabel_path: String,

    /// Force field used for refinement
    #[serde(default = "default_force_field")]
    pub force_field: String,
}

impl Default for ToolkitConfig {
    fn default() -> Self {
        Self {
            obabel_path: default_obabel_path(),
            force_field: default_force_field(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Treat the input as a directory of datasets
    #[serde(default)]
    pub enabled: bool,
}

impl Config {
    /// Load configuration from a YAML or JSON file.
    /// Format is auto-detected from file extension (.yaml, .yml, or .json).
    pub fn from_file(path: &PathBuf) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");

        let config: Config = match ext {
            "json" => serde_json::from_str(&contents)?,
            // YAML is a superset of JSON
            _ => serde_yaml::from_str(&contents)?,
        };
        Ok(config)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> anyhow::Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    /// Load configuration from a JSON string.
    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        let config: Config = serde_json::from_str(json)?;
        Ok(config)
    }

    /// Serialize configuration to YAML.
    pub fn to_yaml(&self) -> anyhow::Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Executor settings derived from the processing section.
    pub fn executor_config(&self) -> ExecutorConfig {
        ExecutorConfig {
            concurrency: self.processing.concurrency,
            enable_progress: self.processing.enable_metrics,
            progress_interval_secs: self.processing.progress_interval_secs,
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> anyhow::Result<()> {
        let ph = self.protonation.ph;
        if !(ph > 0.0 && ph < 14.0) {
            anyhow::bail!("pH must be between 0 and 14 (exclusive), got {}", ph);
        }

        for filter in self.filter.range_filters() {
            if let (Some(min), Some(max)) = (filter.bounds.min, filter.bounds.max) {
                if min > max {
                    anyhow::bail!(
                        "{} filter minimum {} is greater than maximum {}",
                        filter.column,
                        min,
                        max
                    );
                }
            }
        }

        if self.processing.concurrency == 0 {
            anyhow::bail!("Concurrency must be > 0");
        }
        if self.processing.progress_interval_secs == 0 {
            anyhow::bail!("Progress interval must be > 0");
        }
        if self.conformer.primary_iteration_factor == 0
            || self.conformer.fallback_iteration_factor == 0
        {
            anyhow::bail!("Conformer iteration factors must be > 0");
        }
        if self.toolkit.obabel_path.trim().is_empty() {
            anyhow::bail!("toolkit.obabel_path must not be empty");
        }
        Ok(())
    }
}

// Default value functions for serde
fn default_concurrency() -> usize { 8 }
fn default_true() -> bool { true }
fn default_progress_interval() -> u64 { 10 }
fn default_ph() -> f64 { 7.2 }
fn default_primary_iteration_factor() -> usize { 3 }
fn default_fallback_iteration_factor() -> usize { 10 }
fn default_primary_refine_iterations() -> usize { 100 }
fn default_fallback_refine_iterations() -> usize { 10_000 }
fn default_obabel_path() -> String { "obabel".to_string() }
fn default_force_field() -> String { "MMFF94".to_string() }
