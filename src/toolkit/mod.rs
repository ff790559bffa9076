//! Chemistry toolkit seam.
//!
//! The pipeline never interprets chemistry itself. Parsing, canonicalization,
//! salt stripping, descriptors, protonation, coordinate generation and
//! format conversion all go through the [`Toolkit`] trait. The shipped
//! implementation drives the Open Babel command line.

mod obabel;

#[cfg(test)]
pub(crate) mod mock;

pub use obabel::ObabelToolkit;

use crate::table::{Descriptors, Structure};
use thiserror::Error;

/// Errors reported by toolkit operations.
#[derive(Debug, Error)]
pub enum ToolkitError {
    /// Input could not be turned into a structure.
    #[error("failed to parse structure '{input}': {details}")]
    Parse { input: String, details: String },

    /// Coordinate embedding did not produce a geometry.
    ///
    /// This is the only error that escalates the conformer stage to its
    /// fallback method.
    #[error("coordinate embedding failed: {0}")]
    EmbeddingFailed(String),

    /// The structure is valid but the operation cannot handle it.
    #[error("unsupported structure for {operation}: {details}")]
    Unsupported {
        operation: &'static str,
        details: String,
    },

    /// The toolkit produced output that could not be interpreted.
    #[error("unexpected toolkit output from {operation}: {details}")]
    Output {
        operation: &'static str,
        details: String,
    },

    /// An external toolkit process failed.
    #[error("toolkit process '{program}' failed: {details}")]
    Process { program: String, details: String },

    #[error("toolkit I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

impl ToolkitError {
    pub fn parse(input: impl Into<String>, details: impl Into<String>) -> Self {
        Self::Parse {
            input: input.into(),
            details: details.into(),
        }
    }

    pub fn output(operation: &'static str, details: impl Into<String>) -> Self {
        Self::Output {
            operation,
            details: details.into(),
        }
    }

    /// Whether this error is the distinguished embedding failure.
    pub fn is_embedding_failure(&self) -> bool {
        matches!(self, ToolkitError::EmbeddingFailed(_))
    }
}

/// Coordinate embedding method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbedMethod {
    /// Stochastic knowledge-based embedding; fast, used first.
    Stochastic,
    /// Exhaustive distance-geometry embedding; slower, used as fallback.
    DistanceGeometry,
}

/// Parameters for one embedding attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EmbedParams {
    pub method: EmbedMethod,

    /// Iteration budget for the embedding itself
    pub max_iterations: usize,

    /// Start from random coordinates rather than eigenvalue-derived ones
    pub random_coords: bool,
}

/// External chemistry capabilities consumed by the pipeline.
///
/// Implementations must be callable from many worker threads at once.
pub trait Toolkit: Send + Sync {
    /// Parse a SMILES string into a canonical structure.
    fn parse(&self, smiles: &str) -> Result<Structure, ToolkitError>;

    /// Convert an MDL molblock into a canonical structure.
    fn from_block(&self, block: &str) -> Result<Structure, ToolkitError>;

    /// Remove disconnected counter-ion fragments.
    fn strip_salts(&self, structure: &Structure) -> Result<Structure, ToolkitError>;

    /// Compute the six filter descriptors.
    fn descriptors(&self, structure: &Structure) -> Result<Descriptors, ToolkitError>;

    /// Dominant protonation state at the given pH.
    fn protonate(&self, structure: &Structure, ph: f64) -> Result<Structure, ToolkitError>;

    /// Add explicit hydrogens.
    fn add_hydrogens(&self, structure: &Structure) -> Result<Structure, ToolkitError>;

    /// Number of atoms, counting explicit hydrogens.
    fn atom_count(&self, structure: &Structure) -> Result<usize, ToolkitError>;

    /// Generate 3D coordinates.
    ///
    /// Must return [`ToolkitError::EmbeddingFailed`] when no geometry could
    /// be produced.
    fn embed(&self, structure: &Structure, params: &EmbedParams)
        -> Result<Structure, ToolkitError>;

    /// Force-field refinement of existing 3D coordinates.
    fn refine(&self, structure: &Structure, max_iterations: usize)
        -> Result<Structure, ToolkitError>;

    /// 2D depiction without explicit hydrogens, for reporting.
    fn depict_2d(&self, structure: &Structure) -> Result<Structure, ToolkitError>;

    /// Render a 2D drawing as PNG bytes.
    fn render_png(&self, structure: &Structure) -> Result<Vec<u8>, ToolkitError>;

    /// Serialize a 3D structure to the docking-ready PDBQT format.
    fn to_pdbqt(&self, structure: &Structure) -> Result<String, ToolkitError>;
}
