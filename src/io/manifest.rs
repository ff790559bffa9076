//! Per-stage failure logs.
//!
//! Every log is created fresh for each dataset and is always written, even
//! when no failure occurred, so downstream tooling can rely on its presence.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Which stage a manifest belongs to; decides header and sentinel text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestKind {
    /// Null, empty or unparsable structures, plus stage-local drops
    Structure,
    /// Records for which no 3D geometry could be generated
    Conformer,
}

impl ManifestKind {
    fn header(&self, count: usize) -> String {
        match self {
            ManifestKind::Structure => "Following SMILES were dropped: \n".to_string(),
            ManifestKind::Conformer => format!(
                "Unable to generate 3D conformations for the following {} molecules:\n",
                count
            ),
        }
    }

    fn sentinel(&self) -> &'static str {
        match self {
            ManifestKind::Structure => "No invalid SMILES detected\n",
            ManifestKind::Conformer => "No errors detected in 3D conformer generation\n",
        }
    }
}

/// One recorded failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    pub identifier: String,
    pub reason: String,
}

/// In-memory failure list, flushed to disk once at stage end.
#[derive(Debug, Clone)]
pub struct ErrorManifest {
    kind: ManifestKind,
    entries: Vec<ManifestEntry>,
}

impl ErrorManifest {
    pub fn new(kind: ManifestKind) -> Self {
        Self {
            kind,
            entries: Vec::new(),
        }
    }

    pub fn push(&mut self, identifier: impl Into<String>, reason: impl Into<String>) {
        self.entries.push(ManifestEntry {
            identifier: identifier.into(),
            reason: reason.into(),
        });
    }

    pub fn entries(&self) -> &[ManifestEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn identifiers(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.identifier.as_str())
    }

    /// Text written to the log file.
    pub fn render(&self) -> String {
        if self.entries.is_empty() {
            return self.kind.sentinel().to_string();
        }
        let mut text = self.kind.header(self.entries.len());
        for entry in &self.entries {
            text.push_str(&entry.identifier);
            if !entry.reason.is_empty() {
                text.push_str(": ");
                text.push_str(&entry.reason);
            }
            text.push('\n');
        }
        text
    }

    /// Write the manifest, replacing any previous file.
    pub fn write(&self, path: &Path) -> io::Result<()> {
        std::fs::write(path, self.render())
    }
}

/// Conversion failure log, appended as conversions complete.
///
/// Each entry is one `write_all` of a complete line so concurrent appends
/// never interleave within a line.
#[derive(Debug)]
pub struct ConversionLog {
    path: PathBuf,
    errors: usize,
}

impl ConversionLog {
    /// Create the log fresh with its header.
    pub fn create(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        let mut file = File::create(&path)?;
        file.write_all(b"ERROR LOG:\n")?;
        Ok(Self { path, errors: 0 })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn errors(&self) -> usize {
        self.errors
    }

    /// Append one conversion failure.
    pub fn record(&mut self, title: &str) -> io::Result<()> {
        self.append(&format!("Error converting {}\n", title))?;
        self.errors += 1;
        Ok(())
    }

    /// Close the log; writes the sentinel when nothing failed.
    pub fn finish(self) -> io::Result<usize> {
        if self.errors == 0 {
            self.append("No errors in pdbqt conversion\n")?;
        }
        Ok(self.errors)
    }

    fn append(&self, line: &str) -> io::Result<()> {
        let mut file = OpenOptions::new().append(true).open(&self.path)?;
        file.write_all(line.as_bytes())
    }
}
