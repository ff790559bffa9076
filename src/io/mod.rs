//! Dataset ingestion, artifact writers and output layout.

pub mod export;
pub mod ingest;
pub mod layout;
pub mod manifest;

pub use ingest::{discover_datasets, read_dataset, DatasetFormat, IngestError};
pub use layout::OutputLayout;
pub use manifest::{ConversionLog, ErrorManifest, ManifestKind};
