//! Open Babel command-line adapter.

use super::{EmbedMethod, EmbedParams, Toolkit, ToolkitError};
use crate::table::{Descriptors, Structure};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::debug;

/// Descriptor names requested from the `txt` writer, in filter order.
const DESCRIPTOR_FIELDS: &str = "MW logP rotors HBA1 HBD TPSA";

/// Edge length of rendered depictions.
const DEPICTION_PIXELS: u32 = 250;

const PNG_SIGNATURE: &[u8] = b"\x89PNG\r\n\x1a\n";

/// [`Toolkit`] backed by the `obabel` executable.
///
/// Every operation spawns one process and exchanges structures over
/// stdin/stdout, so the adapter is freely shareable across threads.
#[derive(Debug, Clone)]
pub struct ObabelToolkit {
    program: PathBuf,
    force_field: String,
}

impl ObabelToolkit {
    pub fn new(program: impl Into<PathBuf>, force_field: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            force_field: force_field.into(),
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Run `obabel` and return its output as text.
    fn run(&self, args: &[&str], input: &str) -> Result<String, ToolkitError> {
        String::from_utf8(self.run_raw(args, input)?)
            .map_err(|e| ToolkitError::output("obabel", format!("non UTF-8 output: {}", e)))
    }

    /// Run `obabel` with the given arguments, feeding `input` on stdin.
    fn run_raw(&self, args: &[&str], input: &str) -> Result<Vec<u8>, ToolkitError> {
        let mut child = Command::new(&self.program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| ToolkitError::Process {
                program: self.program.display().to_string(),
                details: e.to_string(),
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(input.as_bytes())?;
        }

        let output = child.wait_with_output()?;
        if !output.status.success() {
            return Err(ToolkitError::Process {
                program: self.program.display().to_string(),
                details: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(output.stdout)
    }

    /// SMILES in, canonical SMILES out.
    fn smiles_to_smiles(&self, smiles: &str, extra: &[&str]) -> Result<Structure, ToolkitError> {
        let mut args = vec!["-ismi", "-ocan"];
        args.extend_from_slice(extra);
        let out = self.run(&args, &line(smiles))?;
        first_token(&out)
            .map(Structure::new)
            .ok_or_else(|| ToolkitError::parse(smiles, "no structure produced"))
    }

    fn require_block<'a>(
        structure: &'a Structure,
        operation: &'static str,
    ) -> Result<&'a str, ToolkitError> {
        structure.block().ok_or_else(|| ToolkitError::Unsupported {
            operation,
            details: "structure has no coordinates".to_string(),
        })
    }
}

impl Toolkit for ObabelToolkit {
    fn parse(&self, smiles: &str) -> Result<Structure, ToolkitError> {
        if smiles.trim().is_empty() {
            return Err(ToolkitError::parse(smiles, "empty SMILES"));
        }
        self.smiles_to_smiles(smiles, &[])
    }

    fn from_block(&self, block: &str) -> Result<Structure, ToolkitError> {
        let out = self.run(&["-isdf", "-ocan"], block)?;
        first_token(&out)
            .map(Structure::new)
            .ok_or_else(|| ToolkitError::parse(title_line(block), "unreadable molblock"))
    }

    fn strip_salts(&self, structure: &Structure) -> Result<Structure, ToolkitError> {
        self.smiles_to_smiles(structure.smiles(), &["-r"])
    }

    fn descriptors(&self, structure: &Structure) -> Result<Descriptors, ToolkitError> {
        let out = self.run(
            &["-ismi", "-otxt", "--append", DESCRIPTOR_FIELDS],
            &line(structure.smiles()),
        )?;
        parse_descriptors(&out)
    }

    fn protonate(&self, structure: &Structure, ph: f64) -> Result<Structure, ToolkitError> {
        let ph = format!("{}", ph);
        self.smiles_to_smiles(structure.smiles(), &["-p", ph.as_str()])
    }

    fn add_hydrogens(&self, structure: &Structure) -> Result<Structure, ToolkitError> {
        self.smiles_to_smiles(structure.smiles(), &["-h"])
    }

    fn atom_count(&self, structure: &Structure) -> Result<usize, ToolkitError> {
        let out = self.run(
            &["-ismi", "-otxt", "-h", "--append", "atoms"],
            &line(structure.smiles()),
        )?;
        out.split_whitespace()
            .last()
            .and_then(|t| t.parse().ok())
            .ok_or_else(|| ToolkitError::output("atom_count", out.trim().to_string()))
    }

    fn embed(
        &self,
        structure: &Structure,
        params: &EmbedParams,
    ) -> Result<Structure, ToolkitError> {
        // gen3d exposes speed presets rather than iteration budgets
        let speed = match params.method {
            EmbedMethod::Stochastic => "fast",
            EmbedMethod::DistanceGeometry => "best",
        };
        debug!(
            smiles = structure.smiles(),
            speed,
            max_iterations = params.max_iterations,
            random_coords = params.random_coords,
            "Embedding"
        );

        let out = self.run(
            &["-ismi", "-osdf", "-h", "--gen3d", speed],
            &line(structure.smiles()),
        )?;
        let block = strip_terminator(&out);
        if has_geometry(block) {
            Ok(structure.clone().with_block(block))
        } else {
            Err(ToolkitError::EmbeddingFailed(format!(
                "no coordinates for {} ({:?})",
                structure.smiles(),
                params.method
            )))
        }
    }

    fn refine(
        &self,
        structure: &Structure,
        max_iterations: usize,
    ) -> Result<Structure, ToolkitError> {
        let block = Self::require_block(structure, "refine")?;
        let steps = max_iterations.to_string();
        let out = self.run(
            &[
                "-isdf",
                "-osdf",
                "--minimize",
                "--ff",
                self.force_field.as_str(),
                "--steps",
                steps.as_str(),
            ],
            block,
        )?;
        let refined = strip_terminator(&out);
        if refined.trim().is_empty() {
            return Err(ToolkitError::output("refine", "empty output"));
        }
        Ok(structure.clone().with_block(refined))
    }

    fn depict_2d(&self, structure: &Structure) -> Result<Structure, ToolkitError> {
        let out = self.run(
            &["-ismi", "-osdf", "--gen2d", "-d"],
            &line(structure.smiles()),
        )?;
        let block = strip_terminator(&out);
        if block.trim().is_empty() {
            return Err(ToolkitError::output("depict_2d", "empty output"));
        }
        Ok(Structure::new(structure.smiles()).with_block(block))
    }

    fn render_png(&self, structure: &Structure) -> Result<Vec<u8>, ToolkitError> {
        let size = DEPICTION_PIXELS.to_string();
        let png = self.run_raw(
            &["-ismi", "-opng", "-d", "-xp", size.as_str()],
            &line(structure.smiles()),
        )?;
        if !png.starts_with(PNG_SIGNATURE) {
            return Err(ToolkitError::output("render_png", "not a PNG image"));
        }
        Ok(png)
    }

    fn to_pdbqt(&self, structure: &Structure) -> Result<String, ToolkitError> {
        let block = Self::require_block(structure, "pdbqt")?;
        let out = self.run(&["-isdf", "-opdbqt"], block)?;
        if out.trim().is_empty() {
            return Err(ToolkitError::output("pdbqt", "empty output"));
        }
        Ok(out)
    }
}

fn line(smiles: &str) -> String {
    format!("{}\n", smiles.trim())
}

fn first_token(output: &str) -> Option<String> {
    output.split_whitespace().next().map(str::to_string)
}

fn title_line(block: &str) -> &str {
    block.lines().next().unwrap_or_default()
}

/// Drop the `$$$$` record terminator so blocks can be re-emitted.
fn strip_terminator(sdf: &str) -> &str {
    match sdf.find("$$$$") {
        Some(pos) => &sdf[..pos],
        None => sdf,
    }
}

/// Parse the six values appended by the `txt` writer.
///
/// The line may start with a title; the descriptors are always the last
/// six tokens.
pub(crate) fn parse_descriptors(output: &str) -> Result<Descriptors, ToolkitError> {
    let tokens: Vec<&str> = output.split_whitespace().collect();
    if tokens.len() < 6 {
        return Err(ToolkitError::output("descriptors", output.trim().to_string()));
    }
    let t = &tokens[tokens.len() - 6..];

    let float = |s: &str| {
        s.parse::<f64>()
            .map_err(|_| ToolkitError::output("descriptors", format!("bad number '{}'", s)))
    };
    let int = |s: &str| {
        s.parse::<f64>()
            .map(|v| v.round() as i64)
            .map_err(|_| ToolkitError::output("descriptors", format!("bad count '{}'", s)))
    };

    Ok(Descriptors {
        mol_weight: float(t[0])?,
        logp: float(t[1])?,
        rotatable_bonds: int(t[2])?,
        hbond_acceptors: int(t[3])?,
        hbond_donors: int(t[4])?,
        tpsa: float(t[5])?,
    })
}

/// Atom coordinates of a V2000 molblock.
pub(crate) fn atom_coordinates(block: &str) -> Option<Vec<[f64; 3]>> {
    let mut lines = block.lines();
    let counts = lines.nth(3)?;
    let atoms: usize = counts.get(0..3)?.trim().parse().ok()?;

    let field = |atom: &str, range: std::ops::Range<usize>| -> Option<f64> {
        atom.get(range)?.trim().parse().ok()
    };
    lines
        .take(atoms)
        .map(|atom| {
            Some([
                field(atom, 0..10)?,
                field(atom, 10..20)?,
                field(atom, 20..30)?,
            ])
        })
        .collect()
}

/// Whether the builder placed any atom at all.
///
/// Planar molecules legitimately come back with every z at zero; only an
/// empty block or one with every atom at the origin is a failed embedding.
pub(crate) fn has_geometry(block: &str) -> bool {
    match atom_coordinates(block) {
        Some(atoms) => atoms
            .iter()
            .any(|xyz| xyz.iter().any(|v| v.abs() > f64::EPSILON)),
        None => false,
    }
}
