//! Null/invalid removal, duplicate removal and identifier collision renaming.

use crate::io::manifest::ErrorManifest;
use crate::table::{Record, RecordTable};
use crate::toolkit::Toolkit;
use rayon::prelude::*;
use std::collections::HashSet;

/// Counts reported by a cleanup pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CleanupReport {
    pub stage: &'static str,
    pub dropped: usize,
    pub retained: usize,
}

impl CleanupReport {
    fn log(self) -> Self {
        tracing::info!(
            "{}: {} dropped, {} retained",
            self.stage,
            self.dropped,
            self.retained
        );
        self
    }
}

impl std::fmt::Display for CleanupReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}: dropped {}, retained {}",
            self.stage, self.dropped, self.retained
        )
    }
}

/// Drop rows with null, empty or unparsable SMILES.
///
/// Parsing runs on the rayon pool. Surviving rows get their canonical
/// structure attached; every dropped row is recorded in `manifest`.
pub fn remove_invalid(
    table: &mut RecordTable,
    toolkit: &dyn Toolkit,
    manifest: &mut ErrorManifest,
) -> CleanupReport {
    let parsed: Vec<_> = table
        .records()
        .par_iter()
        .map(|record| {
            let smiles = record.smiles.trim();
            if smiles.is_empty() {
                Err("missing SMILES".to_string())
            } else {
                toolkit
                    .parse(smiles)
                    .map_err(|e| format!("unreadable SMILES '{}': {}", smiles, e))
            }
        })
        .collect();

    let refs: Vec<_> = table.row_refs().collect();
    let mut doomed = Vec::new();
    for (index, result) in parsed.into_iter().enumerate() {
        match result {
            Ok(structure) => {
                // a row left without a structure must not stay active
                if let Err(e) = table.apply(refs[index], |r| r.structure = Some(structure)) {
                    tracing::error!("Dropped parsed structure for row {}: {}", index, e);
                    doomed.push(index);
                }
            }
            Err(reason) => {
                if let Some(record) = table.row(index) {
                    manifest.push(record.name.clone(), reason);
                }
                doomed.push(index);
            }
        }
    }

    let dropped = table.drop_rows(&doomed);
    CleanupReport {
        stage: "invalid removal",
        dropped,
        retained: table.len(),
    }
    .log()
}

/// Drop rows whose canonical key already appeared earlier, keeping the first.
pub fn remove_duplicates(table: &mut RecordTable) -> CleanupReport {
    let mut seen = HashSet::new();
    let dropped = table.retain(|record: &Record| seen.insert(record.dedup_key().to_string()));
    CleanupReport {
        stage: "duplicate removal",
        dropped,
        retained: table.len(),
    }
    .log()
}

/// Give every repeated name a `_2`, `_3`, ... suffix, first occurrence kept.
///
/// A generated name that would itself collide keeps counting up. Returns the
/// number of records renamed.
pub fn rename_collisions(table: &mut RecordTable) -> usize {
    let mut taken: HashSet<String> = table.iter().map(|r| r.name.clone()).collect();
    let mut first_seen = HashSet::new();
    let mut renames = Vec::new();

    for (index, record) in table.iter().enumerate() {
        if first_seen.insert(record.name.clone()) {
            continue;
        }
        let mut suffix = 2;
        let mut candidate = format!("{}_{}", record.name, suffix);
        while taken.contains(&candidate) {
            suffix += 1;
            candidate = format!("{}_{}", record.name, suffix);
        }
        taken.insert(candidate.clone());
        renames.push((index, candidate));
    }

    let refs: Vec<_> = table.row_refs().collect();
    let mut renamed = 0;
    for (index, name) in &renames {
        match table.apply(refs[*index], |r| r.name = name.clone()) {
            Ok(()) => renamed += 1,
            Err(e) => tracing::error!("Failed to rename row {} to {}: {}", index, name, e),
        }
    }

    tracing::info!("Renamed {} duplicate identifiers", renamed);
    renamed
}
