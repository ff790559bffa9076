//! Output directory layout for one dataset.

use crate::io::ingest::dataset_name;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

fn parent_or_cwd(path: &Path) -> PathBuf {
    path.parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
        .to_path_buf()
}

/// Where every artifact of a dataset run lands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLayout {
    root: PathBuf,
    dataset: String,
    pdbqt_dir: PathBuf,
}

impl OutputLayout {
    /// Single-dataset mode: artifacts next to the input, PDBQT in `pdbqt/`.
    pub fn single(dataset_path: &Path) -> Self {
        let root = parent_or_cwd(dataset_path);
        Self {
            pdbqt_dir: root.join("pdbqt"),
            dataset: dataset_name(dataset_path),
            root,
        }
    }

    /// Batch mode: artifacts beside the batch directory, PDBQT in
    /// `<batch dir>/<dataset>/`.
    pub fn batch(batch_dir: &Path, dataset_path: &Path) -> Self {
        let dataset = dataset_name(dataset_path);
        Self {
            root: Self::batch_root(batch_dir),
            pdbqt_dir: batch_dir.join(&dataset),
            dataset,
        }
    }

    /// Artifact root shared by every dataset of a batch.
    pub fn batch_root(batch_dir: &Path) -> PathBuf {
        parent_or_cwd(batch_dir)
    }

    pub fn dataset(&self) -> &str {
        &self.dataset
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn pdbqt_dir(&self) -> &Path {
        &self.pdbqt_dir
    }

    pub fn processed_csv(&self) -> PathBuf {
        self.root
            .join("CSV")
            .join(format!("{}_processed.csv", self.dataset))
    }

    pub fn error_csv(&self) -> PathBuf {
        self.root
            .join("CSV")
            .join(format!("{}_error3Dgen.csv", self.dataset))
    }

    /// Spreadsheet of geometry failures with rendered depictions.
    pub fn error_xlsx(&self) -> PathBuf {
        self.root
            .join("CSV")
            .join(format!("{}_error3Dgen.xlsx", self.dataset))
    }

    pub fn error_sdf(&self) -> PathBuf {
        self.root
            .join("CSV")
            .join(format!("{}_error3Dgen.sdf", self.dataset))
    }

    pub fn sdf(&self) -> PathBuf {
        self.root.join("SDF").join(format!("{}.sdf", self.dataset))
    }

    pub fn structure_log(&self) -> PathBuf {
        self.errors_file("_log_error_smi.txt")
    }

    pub fn conformer_log(&self) -> PathBuf {
        self.errors_file("_log_error_3d_gen.txt")
    }

    pub fn conversion_log(&self) -> PathBuf {
        self.errors_file("_error_log_pdbqt.txt")
    }

    fn errors_file(&self, suffix: &str) -> PathBuf {
        self.root
            .join("ERRORS")
            .join(format!("{}{}", self.dataset, suffix))
    }

    /// Create every output directory.
    pub fn ensure(&self) -> io::Result<()> {
        for dir in ["CSV", "SDF", "ERRORS"] {
            fs::create_dir_all(self.root.join(dir))?;
        }
        fs::create_dir_all(&self.pdbqt_dir)
    }
}
