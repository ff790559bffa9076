//! Resumable conversion of embedded records to PDBQT files.

use crate::io::manifest::ConversionLog;
use crate::pipeline::executor::StageExecutor;
use crate::pipeline::metrics::StageSnapshot;
use crate::table::RecordTable;
use crate::toolkit::Toolkit;
use anyhow::{Context, Result};
use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Title written into the artifact header: the name without `/`.
pub fn sanitize_title(name: &str) -> String {
    name.replace('/', "")
}

/// File stem of the artifact for a title: `:` becomes `x`.
pub fn artifact_stem(title: &str) -> String {
    title.replace(':', "x")
}

/// Stems of the `*.pdbqt` files present in `dir`; empty if it does not exist.
pub fn list_converted(dir: &Path) -> io::Result<HashSet<String>> {
    if !dir.is_dir() {
        return Ok(HashSet::new());
    }
    let mut stems = HashSet::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) == Some("pdbqt") {
            if let Some(stem) = path.file_stem() {
                stems.insert(stem.to_string_lossy().into_owned());
            }
        }
    }
    Ok(stems)
}

/// Drop rows whose artifact already exists in `dir`.
///
/// Runs before any expensive stage so resumed runs only process new records.
pub fn drop_already_converted(table: &mut RecordTable, dir: &Path) -> io::Result<usize> {
    let converted = list_converted(dir)?;
    if converted.is_empty() {
        return Ok(0);
    }
    tracing::info!(
        "{} converted molecules in {}, skipping them",
        converted.len(),
        dir.display()
    );
    Ok(table.retain(|r| !converted.contains(&artifact_stem(&sanitize_title(&r.name)))))
}

/// Outcome of one conversion stage.
#[derive(Debug)]
pub struct ConversionReport {
    pub converted: usize,
    /// Records whose artifact already existed
    pub skipped: usize,
    pub failed: usize,
    /// `*.pdbqt` files found in the target directory afterwards
    pub on_disk: usize,
    /// Records of the table without an artifact afterwards
    pub missing: Vec<String>,
    pub elapsed: Duration,
    pub snapshot: StageSnapshot,
}

impl ConversionReport {
    /// Whether the directory listing agrees with the table.
    pub fn is_consistent(&self) -> bool {
        self.missing.is_empty()
    }
}

/// Where and how the conversion stage writes.
#[derive(Debug, Clone)]
pub struct ConversionTarget {
    pub dir: PathBuf,
    pub log_path: PathBuf,
    pub overwrite: bool,
}

fn write_artifact(dir: &Path, title: &str, pdbqt: &str) -> io::Result<()> {
    let path = dir.join(format!("{}.pdbqt", artifact_stem(title)));
    fs::write(path, format!("REMARK  Name = {}\n{}", title, pdbqt))
}

/// Convert every record of `table` that has no artifact yet.
///
/// Per-record failures go to the conversion log and never stop siblings.
/// Afterwards the directory is listed again and compared with the table.
pub async fn run_conversion_stage(
    executor: &StageExecutor,
    table: &RecordTable,
    toolkit: Arc<dyn Toolkit>,
    target: &ConversionTarget,
) -> Result<ConversionReport> {
    let started = Instant::now();
    fs::create_dir_all(&target.dir)
        .with_context(|| format!("Failed to create {}", target.dir.display()))?;
    let mut log = ConversionLog::create(&target.log_path)
        .with_context(|| format!("Failed to create {}", target.log_path.display()))?;

    let existing = if target.overwrite {
        HashSet::new()
    } else {
        list_converted(&target.dir)?
    };

    let titles: Vec<String> = table.iter().map(|r| sanitize_title(&r.name)).collect();
    let mut skipped = 0;
    let mut inputs = Vec::new();
    for row in table.row_refs() {
        let title = &titles[row.index];
        if existing.contains(&artifact_stem(title)) {
            skipped += 1;
            continue;
        }
        match table.row(row.index).and_then(|r| r.structure.clone()) {
            Some(structure) => inputs.push((row, (title.clone(), structure))),
            None => {
                tracing::warn!("No structure to convert for {}", title);
                log.record(title)?;
            }
        }
    }

    let dir = target.dir.clone();
    let mut converted = 0;
    let mut write_errors = Vec::new();
    let snapshot = executor
        .run(
            "pdbqt",
            inputs,
            move |_, (title, structure)| {
                let pdbqt = toolkit.to_pdbqt(&structure)?;
                write_artifact(&dir, &title, &pdbqt)?;
                Ok(())
            },
            |outcome| match outcome.result {
                Ok(()) => converted += 1,
                Err(e) => {
                    let title = &titles[outcome.row.index];
                    tracing::warn!("Error converting {}: {}", title, e);
                    if let Err(io_err) = log.record(title) {
                        write_errors.push(io_err);
                    }
                }
            },
        )
        .await;

    if let Some(e) = write_errors.into_iter().next() {
        return Err(e).context("Failed to append to the conversion log");
    }
    let failed = log.finish()?;

    let on_disk = list_converted(&target.dir)?;
    let missing: Vec<String> = titles
        .iter()
        .filter(|t| !on_disk.contains(&artifact_stem(t)))
        .cloned()
        .collect();

    tracing::info!(
        "{} molecules successfully converted to pdbqt in {}",
        on_disk.len(),
        target.dir.display()
    );
    if !missing.is_empty() {
        tracing::warn!(
            "{} of {} records have no pdbqt file in {}",
            missing.len(),
            titles.len(),
            target.dir.display()
        );
    }

    Ok(ConversionReport {
        converted,
        skipped,
        failed,
        on_disk: on_disk.len(),
        missing,
        elapsed: started.elapsed(),
        snapshot,
    })
}
