//! Dataset ingestion: format inference, separator detection and row reading.

use crate::table::RawRecord;
use crate::toolkit::Toolkit;
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use thiserror::Error;
use tracing::{debug, warn};

/// Errors that make a dataset unreadable.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed table in {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("{path} has no '{column}' column")]
    MissingColumn { path: PathBuf, column: &'static str },
}

/// Input dataset variants, inferred from the file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatasetFormat {
    /// Headerless `Smiles Name` lines
    Smi,
    /// Delimited table with a header carrying `Smiles` and `Name`
    Csv,
    /// MDL structure-data file
    Sdf,
}

impl DatasetFormat {
    /// Infer the format; unknown extensions are read as tables with a header.
    pub fn from_path(path: &Path) -> Self {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase);
        match ext.as_deref() {
            Some("smi") => DatasetFormat::Smi,
            Some("sdf") => DatasetFormat::Sdf,
            _ => DatasetFormat::Csv,
        }
    }

    /// Whether batch discovery picks up this file.
    pub fn is_dataset(path: &Path) -> bool {
        matches!(
            path.extension()
                .and_then(|e| e.to_str())
                .map(str::to_lowercase)
                .as_deref(),
            Some("smi" | "csv" | "sdf")
        )
    }
}

/// Column separator of a delimited dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Separator {
    /// A single-byte delimiter
    Byte(u8),
    /// A run of exactly this many spaces
    Spaces(usize),
    /// Nothing recognizable; split on any whitespace
    Whitespace,
}

fn space_run() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s{2,}").ok()).as_ref()
}

/// Detect the separator from the first line of a dataset.
///
/// Candidates are tried in order `;`, tab, `,`, then a run of two or more
/// spaces whose exact length becomes the separator.
pub fn detect_separator(first_line: &str) -> Separator {
    let line = first_line.trim_end_matches(['\r', '\n']);
    for byte in [b';', b'\t', b','] {
        if line.as_bytes().contains(&byte) {
            return Separator::Byte(byte);
        }
    }
    match space_run().and_then(|re| re.find(line)) {
        Some(m) => Separator::Spaces(m.as_str().len()),
        None => Separator::Whitespace,
    }
}

/// Dataset name used for artifacts: the file stem.
pub fn dataset_name(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "dataset".to_string())
}

/// Read a dataset into raw rows.
///
/// SDF blocks are converted to SMILES through the toolkit; a block the
/// toolkit cannot read yields a row with no SMILES, which cleanup records.
pub fn read_dataset(path: &Path, toolkit: &dyn Toolkit) -> Result<Vec<RawRecord>, IngestError> {
    let content = fs::read_to_string(path).map_err(|source| IngestError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let format = DatasetFormat::from_path(path);
    match format {
        DatasetFormat::Sdf => Ok(read_sdf(&content, toolkit)),
        DatasetFormat::Smi | DatasetFormat::Csv => {
            let separator = detect_separator(content.lines().next().unwrap_or_default());
            debug!(path = %path.display(), ?separator, "Detected separator");
            let rows = split_rows(&content, separator).map_err(|source| IngestError::Csv {
                path: path.to_path_buf(),
                source,
            })?;
            if format == DatasetFormat::Smi {
                Ok(rows_headerless(rows))
            } else {
                rows_with_header(rows, path)
            }
        }
    }
}

fn split_rows(content: &str, separator: Separator) -> Result<Vec<Vec<String>>, csv::Error> {
    match separator {
        Separator::Byte(delimiter) => {
            let mut reader = csv::ReaderBuilder::new()
                .delimiter(delimiter)
                .has_headers(false)
                .flexible(true)
                .trim(csv::Trim::All)
                .from_reader(content.as_bytes());
            reader
                .records()
                .map(|r| r.map(|rec| rec.iter().map(str::to_string).collect()))
                .collect()
        }
        Separator::Spaces(n) => {
            let sep = " ".repeat(n);
            Ok(non_blank(content)
                .map(|l| l.split(sep.as_str()).map(|f| f.trim().to_string()).collect())
                .collect())
        }
        Separator::Whitespace => Ok(non_blank(content)
            .map(|l| l.split_whitespace().map(str::to_string).collect())
            .collect()),
    }
}

fn non_blank(content: &str) -> impl Iterator<Item = &str> {
    content.lines().filter(|l| !l.trim().is_empty())
}

fn cell(row: &[String], index: usize) -> Option<&str> {
    row.get(index).map(String::as_str).filter(|s| !s.is_empty())
}

fn rows_headerless(rows: Vec<Vec<String>>) -> Vec<RawRecord> {
    rows.iter()
        .map(|row| RawRecord::new(cell(row, 0), cell(row, 1)))
        .collect()
}

fn rows_with_header(rows: Vec<Vec<String>>, path: &Path) -> Result<Vec<RawRecord>, IngestError> {
    let mut rows = rows.into_iter();
    let header = rows.next().unwrap_or_default();
    let position = |column: &'static str| {
        header
            .iter()
            .position(|h| h == column)
            .ok_or_else(|| IngestError::MissingColumn {
                path: path.to_path_buf(),
                column,
            })
    };
    let smiles = position("Smiles")?;
    let name = position("Name")?;

    Ok(rows
        .map(|row| RawRecord::new(cell(&row, smiles), cell(&row, name)))
        .collect())
}

fn read_sdf(content: &str, toolkit: &dyn Toolkit) -> Vec<RawRecord> {
    split_sdf(content)
        .into_iter()
        .map(|block| {
            let title = block.lines().next().map(str::trim).filter(|t| !t.is_empty());
            let smiles = match toolkit.from_block(block) {
                Ok(structure) => Some(structure.smiles().to_string()),
                Err(e) => {
                    warn!(title = title.unwrap_or_default(), error = %e, "Unreadable SDF block");
                    None
                }
            };
            RawRecord {
                name: title.map(str::to_string),
                smiles,
            }
        })
        .collect()
}

/// Split an SDF document into molblocks (terminator and data items removed).
pub fn split_sdf(content: &str) -> Vec<&str> {
    content
        .split("$$$$")
        .enumerate()
        .map(|(i, record)| match i {
            // the line break closing the previous terminator
            0 => record,
            _ => record
                .strip_prefix("\r\n")
                .or_else(|| record.strip_prefix('\n'))
                .unwrap_or(record),
        })
        .filter(|record| !record.trim().is_empty())
        .map(|record| match record.find("M  END") {
            Some(pos) => &record[..pos + "M  END".len()],
            None => record,
        })
        .collect()
}

/// Recursively collect dataset files below `root`, sorted by path.
pub fn discover_datasets(root: &Path) -> Result<Vec<PathBuf>, IngestError> {
    let mut found = Vec::new();
    let mut pending = vec![root.to_path_buf()];

    while let Some(dir) = pending.pop() {
        let entries = fs::read_dir(&dir).map_err(|source| IngestError::Io {
            path: dir.clone(),
            source,
        })?;
        for entry in entries {
            let path = entry
                .map_err(|source| IngestError::Io {
                    path: dir.clone(),
                    source,
                })?
                .path();
            if path.is_dir() {
                pending.push(path);
            } else if DatasetFormat::is_dataset(&path) {
                found.push(path);
            }
        }
    }

    found.sort();
    Ok(found)
}
