//! Deterministic in-memory toolkit for tests.
//!
//! Rules:
//! - parsing fails on empty input, `?`, or unbalanced parentheses
//! - the canonical form of each fragment is the smaller of the fragment and
//!   its reverse, so `OCC` and `CCO` collapse onto the same key
//! - salt stripping keeps the longest fragment
//! - every uppercase letter counts as one heavy atom of 50 Da
//! - embedding behaviour is configured per canonical SMILES

use super::{EmbedMethod, EmbedParams, Toolkit, ToolkitError};
use crate::table::{Descriptors, Structure};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

#[derive(Debug, Default)]
pub struct MockToolkit {
    fail_primary: HashSet<String>,
    fail_both: HashSet<String>,
    fault: HashSet<String>,
    fail_pdbqt: HashSet<String>,
    fail_descriptors: HashSet<String>,
    protonation: HashMap<String, String>,

    /// (canonical smiles, method, iteration budget) per embed call
    pub embed_calls: Mutex<Vec<(String, EmbedMethod, usize)>>,

    /// (canonical smiles, iteration cap) per refine call
    pub refine_calls: Mutex<Vec<(String, usize)>>,

    pub pdbqt_calls: AtomicUsize,
}

fn canonical_fragment(fragment: &str) -> String {
    let reversed: String = fragment.chars().rev().collect();
    if reversed.as_str() < fragment {
        reversed
    } else {
        fragment.to_string()
    }
}

/// A valid 1x1 transparent PNG.
pub const PIXEL_PNG: &[u8] = &[
    0x89, 0x50, 0x4e, 0x47, 0x0d, 0x0a, 0x1a, 0x0a, 0x00, 0x00, 0x00, 0x0d, 0x49, 0x48, 0x44, 0x52,
    0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x08, 0x06, 0x00, 0x00, 0x00, 0x1f, 0x15, 0xc4,
    0x89, 0x00, 0x00, 0x00, 0x0a, 0x49, 0x44, 0x41, 0x54, 0x78, 0x9c, 0x63, 0x00, 0x01, 0x00, 0x00,
    0x05, 0x00, 0x01, 0x0d, 0x0a, 0x2d, 0xb4, 0x00, 0x00, 0x00, 0x00, 0x49, 0x45, 0x4e, 0x44, 0xae,
    0x42, 0x60, 0x82,
];

fn heavy_atoms(smiles: &str) -> usize {
    smiles.chars().filter(|c| c.is_ascii_uppercase()).count()
}

fn count(smiles: &str, atom: char) -> i64 {
    smiles.chars().filter(|c| *c == atom).count() as i64
}

/// Molblock stand-in; the SMILES rides on the comment line.
pub fn mock_block(smiles: &str, tag: &str) -> String {
    format!(
        "{0}\n  {1}\n{0}\n  0  0  0  0  0  0  0  0  0  0999 V2000\nM  END\n",
        smiles, tag
    )
}

impl MockToolkit {
    pub fn new() -> Self {
        Self::default()
    }

    /// Primary embedding fails for this structure; fallback succeeds.
    pub fn fail_primary(mut self, smiles: &str) -> Self {
        self.fail_primary.insert(smiles.to_string());
        self
    }

    /// Both embedding methods fail for this structure.
    pub fn fail_embedding(mut self, smiles: &str) -> Self {
        self.fail_both.insert(smiles.to_string());
        self
    }

    /// Embedding raises a non-embedding fault for this structure.
    pub fn fault_embedding(mut self, smiles: &str) -> Self {
        self.fault.insert(smiles.to_string());
        self
    }

    /// PDBQT conversion fails for this structure.
    pub fn fail_pdbqt(mut self, smiles: &str) -> Self {
        self.fail_pdbqt.insert(smiles.to_string());
        self
    }

    /// Descriptor computation fails for this structure.
    pub fn fail_descriptors(mut self, smiles: &str) -> Self {
        self.fail_descriptors.insert(smiles.to_string());
        self
    }

    /// Protonation maps one canonical form onto another.
    pub fn protonate_as(mut self, from: &str, to: &str) -> Self {
        self.protonation.insert(from.to_string(), to.to_string());
        self
    }

    pub fn embed_methods_for(&self, smiles: &str) -> Vec<EmbedMethod> {
        self.embed_calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(s, _, _)| s == smiles)
            .map(|(_, m, _)| *m)
            .collect()
    }

    fn canonicalize(&self, smiles: &str) -> Result<String, ToolkitError> {
        let trimmed = smiles.trim();
        if trimmed.is_empty() || trimmed.contains('?') {
            return Err(ToolkitError::parse(smiles, "unreadable"));
        }
        if count(trimmed, '(') != count(trimmed, ')') {
            return Err(ToolkitError::parse(smiles, "unbalanced branch"));
        }
        Ok(trimmed
            .split('.')
            .map(canonical_fragment)
            .collect::<Vec<_>>()
            .join("."))
    }
}

impl Toolkit for MockToolkit {
    fn parse(&self, smiles: &str) -> Result<Structure, ToolkitError> {
        self.canonicalize(smiles).map(Structure::new)
    }

    fn from_block(&self, block: &str) -> Result<Structure, ToolkitError> {
        // The mock stores SMILES on the molblock's comment line.
        let smiles = block
            .lines()
            .nth(2)
            .ok_or_else(|| ToolkitError::parse(block, "short molblock"))?;
        self.parse(smiles)
    }

    fn strip_salts(&self, structure: &Structure) -> Result<Structure, ToolkitError> {
        let largest = structure
            .smiles()
            .split('.')
            .fold("", |best, f| if f.len() > best.len() { f } else { best });
        Ok(Structure::new(largest))
    }

    fn descriptors(&self, structure: &Structure) -> Result<Descriptors, ToolkitError> {
        let s = structure.smiles();
        if self.fail_descriptors.contains(s) {
            return Err(ToolkitError::Unsupported {
                operation: "descriptors",
                details: s.to_string(),
            });
        }
        let heavy = heavy_atoms(s) as i64;
        Ok(Descriptors {
            mol_weight: 50.0 * heavy as f64,
            logp: 0.5 * count(s, 'C') as f64 - count(s, 'O') as f64,
            rotatable_bonds: (heavy - 3).max(0),
            hbond_acceptors: count(s, 'O') + count(s, 'N'),
            hbond_donors: count(s, 'O'),
            tpsa: 20.0 * (count(s, 'O') + count(s, 'N')) as f64,
        })
    }

    fn protonate(&self, structure: &Structure, _ph: f64) -> Result<Structure, ToolkitError> {
        Ok(match self.protonation.get(structure.smiles()) {
            Some(to) => Structure::new(to.clone()),
            None => structure.clone(),
        })
    }

    fn add_hydrogens(&self, structure: &Structure) -> Result<Structure, ToolkitError> {
        Ok(Structure::new(structure.smiles()))
    }

    fn atom_count(&self, structure: &Structure) -> Result<usize, ToolkitError> {
        Ok(heavy_atoms(structure.smiles()) * 2)
    }

    fn embed(
        &self,
        structure: &Structure,
        params: &EmbedParams,
    ) -> Result<Structure, ToolkitError> {
        let smiles = structure.smiles().to_string();
        self.embed_calls
            .lock()
            .unwrap()
            .push((smiles.clone(), params.method, params.max_iterations));

        if self.fault.contains(&smiles) {
            return Err(ToolkitError::Io(std::io::Error::other("toolkit crashed")));
        }
        let fails = self.fail_both.contains(&smiles)
            || (params.method == EmbedMethod::Stochastic && self.fail_primary.contains(&smiles));
        if fails {
            return Err(ToolkitError::EmbeddingFailed(format!("{:?}", params.method)));
        }
        Ok(structure.clone().with_block(mock_block(&smiles, "mock3d")))
    }

    fn refine(
        &self,
        structure: &Structure,
        max_iterations: usize,
    ) -> Result<Structure, ToolkitError> {
        self.refine_calls
            .lock()
            .unwrap()
            .push((structure.smiles().to_string(), max_iterations));
        Ok(structure.clone())
    }

    fn depict_2d(&self, structure: &Structure) -> Result<Structure, ToolkitError> {
        Ok(Structure::new(structure.smiles())
            .with_block(mock_block(structure.smiles(), "mock2d")))
    }

    fn render_png(&self, _structure: &Structure) -> Result<Vec<u8>, ToolkitError> {
        Ok(PIXEL_PNG.to_vec())
    }

    fn to_pdbqt(&self, structure: &Structure) -> Result<String, ToolkitError> {
        self.pdbqt_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_pdbqt.contains(structure.smiles()) {
            return Err(ToolkitError::Unsupported {
                operation: "pdbqt",
                details: "no rigid root".to_string(),
            });
        }
        if structure.block().is_none() {
            return Err(ToolkitError::output("pdbqt", "structure has no coordinates"));
        }
        Ok("ROOT\nENDROOT\nTORSDOF 0\n".to_string())
    }
}
