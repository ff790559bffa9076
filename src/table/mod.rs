//! Index-addressed record table shared by the pipeline stages.
//!
//! Rows are stored densely: removing rows compacts the table immediately, so
//! indices always run `0..len`. Every removal bumps the table's generation.
//! Stage tasks receive [`RowRef`]s tagged with the generation they were
//! issued under, and a write-back through a stale reference is rejected.

mod record;

pub use record::{Column, Descriptors, Geometry, RawRecord, Record, Structure, Value};

use std::collections::HashSet;
use thiserror::Error;

/// Errors raised by table access.
#[derive(Debug, Error, PartialEq)]
pub enum TableError {
    #[error("row {index} is out of bounds for a table of {len} rows")]
    OutOfBounds { index: usize, len: usize },

    #[error("row reference from generation {stale} used against generation {current}")]
    StaleIndex { stale: u64, current: u64 },

    #[error("column '{column}' cannot hold a {kind} value")]
    TypeMismatch { column: Column, kind: &'static str },
}

/// Generation-tagged row index handed to stage tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RowRef {
    pub index: usize,
    pub generation: u64,
}

/// Ordered collection of molecule records.
#[derive(Debug, Clone, Default)]
pub struct RecordTable {
    rows: Vec<Record>,
    generation: u64,
}

impl RecordTable {
    /// Initialize a table from ingested rows.
    ///
    /// Rows without a name get `<dataset>_<row>` (1-based input row).
    /// Rows without SMILES are kept with an empty SMILES column so that
    /// cleanup can account for them.
    pub fn load(rows: impl IntoIterator<Item = RawRecord>, dataset: &str) -> Self {
        let rows = rows
            .into_iter()
            .enumerate()
            .map(|(i, raw)| {
                let name = raw
                    .name
                    .map(|n| n.trim().to_string())
                    .filter(|n| !n.is_empty())
                    .unwrap_or_else(|| format!("{}_{}", dataset, i + 1));
                Record::new(name, raw.smiles.unwrap_or_default())
            })
            .collect();

        Self { rows, generation: 0 }
    }

    /// Build a table from already-formed records.
    pub fn from_records(rows: Vec<Record>) -> Self {
        Self { rows, generation: 0 }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Current generation; bumped on every row removal.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn records(&self) -> &[Record] {
        &self.rows
    }

    pub fn iter(&self) -> impl Iterator<Item = &Record> {
        self.rows.iter()
    }

    pub fn row(&self, index: usize) -> Option<&Record> {
        self.rows.get(index)
    }

    pub fn into_records(self) -> Vec<Record> {
        self.rows
    }

    /// References to every row, valid for the current generation.
    pub fn row_refs(&self) -> impl Iterator<Item = RowRef> + '_ {
        (0..self.rows.len()).map(move |index| RowRef {
            index,
            generation: self.generation,
        })
    }

    /// Independent copy keeping only the given columns.
    ///
    /// Cells of other columns are cleared; dropping `Smiles` also drops the
    /// structure handle.
    pub fn project(&self, columns: &[Column]) -> RecordTable {
        let rows = self
            .rows
            .iter()
            .map(|record| {
                let mut copy = record.clone();
                for column in Column::ALL {
                    if !columns.contains(&column) {
                        copy.clear(column);
                    }
                }
                copy
            })
            .collect();

        RecordTable {
            rows,
            generation: 0,
        }
    }

    /// Remove rows by index and compact the table.
    ///
    /// Duplicate and out-of-range indices are ignored. Returns the number of
    /// rows removed.
    pub fn drop_rows(&mut self, indices: &[usize]) -> usize {
        let doomed: HashSet<usize> = indices.iter().copied().collect();
        let mut position = 0;
        self.retain_indexed(|_| {
            let keep = !doomed.contains(&position);
            position += 1;
            keep
        })
    }

    /// Keep rows matching the predicate; returns the number removed.
    pub fn retain(&mut self, mut keep: impl FnMut(&Record) -> bool) -> usize {
        self.retain_indexed(|record| keep(record))
    }

    fn retain_indexed(&mut self, keep: impl FnMut(&Record) -> bool) -> usize {
        let before = self.rows.len();
        self.rows.retain(keep);
        let removed = before - self.rows.len();
        if removed > 0 {
            self.generation += 1;
        }
        removed
    }

    /// Split into (matching, non-matching) tables, preserving order.
    pub fn partition(self, pred: impl FnMut(&Record) -> bool) -> (RecordTable, RecordTable) {
        let (matching, rest): (Vec<_>, Vec<_>) = self.rows.into_iter().partition(pred);
        (
            RecordTable::from_records(matching),
            RecordTable::from_records(rest),
        )
    }

    /// Read one cell.
    pub fn get(&self, index: usize, column: Column) -> Result<Option<Value>, TableError> {
        self.rows
            .get(index)
            .map(|r| r.get(column))
            .ok_or(TableError::OutOfBounds {
                index,
                len: self.rows.len(),
            })
    }

    /// Write one cell.
    pub fn set(&mut self, index: usize, column: Column, value: Value) -> Result<(), TableError> {
        let len = self.rows.len();
        let record = self
            .rows
            .get_mut(index)
            .ok_or(TableError::OutOfBounds { index, len })?;
        record
            .set(column, value)
            .map_err(|v| TableError::TypeMismatch {
                column,
                kind: v.kind(),
            })
    }

    /// Apply a mutation to the row behind a generation-tagged reference.
    pub fn apply<R>(
        &mut self,
        row: RowRef,
        f: impl FnOnce(&mut Record) -> R,
    ) -> Result<R, TableError> {
        if row.generation != self.generation {
            return Err(TableError::StaleIndex {
                stale: row.generation,
                current: self.generation,
            });
        }
        let len = self.rows.len();
        self.rows
            .get_mut(row.index)
            .map(f)
            .ok_or(TableError::OutOfBounds {
                index: row.index,
                len,
            })
    }

    /// Minimum and maximum of a numeric column over rows that have it.
    pub fn column_extrema(&self, column: Column) -> Option<(f64, f64)> {
        self.rows
            .iter()
            .filter_map(|r| r.numeric(column))
            .filter(|v| !v.is_nan())
            .fold(None, |acc, v| match acc {
                None => Some((v, v)),
                Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_table() -> RecordTable {
        RecordTable::load(
            vec![
                RawRecord::new(Some("CCO"), Some("ethanol")),
                RawRecord::new(Some("CC"), None),
                RawRecord::new(None, Some("empty")),
                RawRecord::new(Some("c1ccccc1"), Some("benzene")),
            ],
            "set",
        )
    }

    #[test]
    fn test_load_names_missing_identifiers() {
        let table = sample_table();
        assert_eq!(table.len(), 4);
        assert_eq!(table.row(1).unwrap().name, "set_2");
        assert_eq!(table.row(2).unwrap().smiles, "");
    }

    #[test]
    fn test_drop_rows_keeps_indices_dense() {
        let mut table = sample_table();
        let removed = table.drop_rows(&[1, 2, 2, 99]);
        assert_eq!(removed, 2);
        assert_eq!(table.len(), 2);

        let indices: Vec<_> = table.row_refs().map(|r| r.index).collect();
        assert_eq!(indices, vec![0, 1]);
        assert_eq!(table.row(0).unwrap().name, "ethanol");
        assert_eq!(table.row(1).unwrap().name, "benzene");
    }

    #[test]
    fn test_removal_bumps_generation() {
        let mut table = sample_table();
        let before = table.generation();
        table.drop_rows(&[]);
        assert_eq!(table.generation(), before);
        table.drop_rows(&[0]);
        assert_eq!(table.generation(), before + 1);
    }

    #[test]
    fn test_apply_rejects_stale_reference() {
        let mut table = sample_table();
        let stale: Vec<_> = table.row_refs().collect();
        table.drop_rows(&[0]);

        let err = table.apply(stale[1], |r| r.name.clone()).unwrap_err();
        assert!(matches!(err, TableError::StaleIndex { .. }));

        let fresh = table.row_refs().next().unwrap();
        assert_eq!(table.apply(fresh, |r| r.name.clone()).unwrap(), "set_2");
    }

    #[test]
    fn test_set_and_get() {
        let mut table = sample_table();
        table.set(0, Column::MolWeight, Value::Float(46.07)).unwrap();
        assert_eq!(
            table.get(0, Column::MolWeight).unwrap(),
            Some(Value::Float(46.07))
        );
        assert_eq!(table.get(1, Column::MolWeight).unwrap(), None);
        assert!(matches!(
            table.set(9, Column::LogP, Value::Float(0.0)),
            Err(TableError::OutOfBounds { index: 9, len: 4 })
        ));
        assert!(matches!(
            table.set(0, Column::HBondDonors, Value::Text("x".into())),
            Err(TableError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_project_is_independent() {
        let mut table = sample_table();
        table.set(0, Column::LogP, Value::Float(-0.3)).unwrap();

        let mut projected = table.project(&[Column::Smiles, Column::Name]);
        assert_eq!(projected.row(0).unwrap().logp, None);
        assert_eq!(projected.row(0).unwrap().smiles, "CCO");

        projected.set(0, Column::Name, Value::Text("changed".into())).unwrap();
        assert_eq!(table.row(0).unwrap().name, "ethanol");
        assert_eq!(table.row(0).unwrap().logp, Some(-0.3));
    }

    #[test]
    fn test_column_extrema() {
        let mut table = sample_table();
        assert_eq!(table.column_extrema(Column::Tpsa), None);
        table.set(0, Column::Tpsa, Value::Float(20.2)).unwrap();
        table.set(3, Column::Tpsa, Value::Float(0.0)).unwrap();
        table.set(1, Column::Tpsa, Value::Float(f64::NAN)).unwrap();
        assert_eq!(table.column_extrema(Column::Tpsa), Some((0.0, 20.2)));
    }

    #[test]
    fn test_partition_preserves_order() {
        let table = sample_table();
        let (named, rest) = table.partition(|r| r.name.starts_with('e') || r.name.starts_with('b'));
        let names: Vec<_> = named.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["ethanol", "empty", "benzene"]);
        assert_eq!(rest.len(), 1);
    }
}
