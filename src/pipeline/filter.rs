//! Inclusive range filters over descriptor columns.

use crate::table::{Column, RecordTable};
use serde::{Deserialize, Serialize};

/// Optional inclusive bounds for one descriptor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
}

impl Bounds {
    pub fn new(min: Option<f64>, max: Option<f64>) -> Self {
        Self { min, max }
    }

    /// A filter runs only when at least one bound is set.
    pub fn is_active(&self) -> bool {
        self.min.is_some() || self.max.is_some()
    }
}

/// One descriptor filter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RangeFilter {
    pub column: Column,
    pub bounds: Bounds,
}

/// Result of applying one filter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FilterOutcome {
    pub column: Column,
    /// Effective lower bound after defaulting
    pub min: f64,
    /// Effective upper bound after defaulting
    pub max: f64,
    pub dropped: usize,
    pub remaining: usize,
}

impl RangeFilter {
    pub fn new(column: Column, bounds: Bounds) -> Self {
        Self { column, bounds }
    }

    /// Keep rows with `min <= value <= max`.
    ///
    /// A missing bound defaults to the column's current extremum. Rows that
    /// lack the attribute or hold NaN never satisfy the range. Returns `None`
    /// without touching the table when no bound is set.
    pub fn apply(&self, table: &mut RecordTable) -> Option<FilterOutcome> {
        if !self.bounds.is_active() {
            return None;
        }

        let extrema = table.column_extrema(self.column);
        let min = self
            .bounds
            .min
            .or(extrema.map(|(lo, _)| lo))
            .unwrap_or(f64::NEG_INFINITY);
        let max = self
            .bounds
            .max
            .or(extrema.map(|(_, hi)| hi))
            .unwrap_or(f64::INFINITY);

        let column = self.column;
        let dropped = table.retain(|record| {
            record
                .numeric(column)
                .is_some_and(|v| v >= min && v <= max)
        });

        let outcome = FilterOutcome {
            column,
            min,
            max,
            dropped,
            remaining: table.len(),
        };
        tracing::info!(
            "{} filter [{}, {}]: {} dropped, {} remaining",
            column,
            min,
            max,
            dropped,
            outcome.remaining
        );
        Some(outcome)
    }
}

/// Apply filters in order; each sees the table left by the previous one.
pub fn apply_filters(table: &mut RecordTable, filters: &[RangeFilter]) -> Vec<FilterOutcome> {
    filters.iter().filter_map(|f| f.apply(table)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::{Descriptors, Record};

    fn table(weights: &[f64]) -> RecordTable {
        RecordTable::from_records(
            weights
                .iter()
                .enumerate()
                .map(|(i, &mw)| {
                    let mut record = Record::new(format!("m{}", i), "C");
                    record.set_descriptors(&Descriptors {
                        mol_weight: mw,
                        logp: i as f64,
                        rotatable_bonds: i as i64,
                        hbond_acceptors: 1,
                        hbond_donors: 0,
                        tpsa: 10.0,
                    });
                    record
                })
                .collect(),
        )
    }

    #[test]
    fn test_inclusive_bounds() {
        let weights = [150.0, 200.0, 350.0, 500.0, 501.0, 499.99, 500.01, 199.99];
        let mut table = table(&weights);
        let before: Vec<_> = table.iter().map(|r| r.name.clone()).collect();

        let outcome = RangeFilter::new(Column::MolWeight, Bounds::new(Some(200.0), Some(500.0)))
            .apply(&mut table)
            .unwrap();
        assert_eq!(outcome.dropped, 4);
        assert_eq!(outcome.remaining, 4);
        assert_eq!(outcome.dropped + outcome.remaining, before.len());
        assert!(table.iter().all(|r| {
            let mw = r.mol_weight.unwrap();
            (200.0..=500.0).contains(&mw)
        }));

        // every dropped row lies outside the bounds
        let kept: Vec<_> = table.iter().map(|r| r.name.as_str()).collect();
        let dropped: Vec<f64> = before
            .iter()
            .zip(weights)
            .filter(|(name, _)| !kept.contains(&name.as_str()))
            .map(|(_, mw)| mw)
            .collect();
        assert_eq!(dropped.len(), outcome.dropped);
        assert!(dropped.iter().all(|mw| !(200.0..=500.0).contains(mw)));
    }

    #[test]
    fn test_missing_bound_defaults_to_extremum() {
        let mut table = table(&[100.0, 300.0, 900.0]);
        let outcome = RangeFilter::new(Column::MolWeight, Bounds::new(Some(250.0), None))
            .apply(&mut table)
            .unwrap();
        assert_eq!(outcome.max, 900.0);
        assert_eq!(outcome.dropped, 1);

        let outcome = RangeFilter::new(Column::MolWeight, Bounds::new(None, Some(500.0)))
            .apply(&mut table)
            .unwrap();
        assert_eq!(outcome.min, 300.0);
        assert_eq!(outcome.remaining, 1);
    }

    #[test]
    fn test_inactive_filter_is_skipped() {
        let mut table = table(&[1.0, 2.0]);
        let generation = table.generation();
        assert!(RangeFilter::new(Column::LogP, Bounds::default())
            .apply(&mut table)
            .is_none());
        assert_eq!(table.generation(), generation);
    }

    #[test]
    fn test_missing_and_nan_values_are_dropped() {
        let mut table = table(&[250.0, f64::NAN, 300.0]);
        table
            .set(2, Column::MolWeight, crate::table::Value::Float(f64::NAN))
            .unwrap();
        let mut bare = Record::new("bare", "C");
        bare.logp = Some(0.0);
        let mut rows = table.into_records();
        rows.push(bare);
        let mut table = RecordTable::from_records(rows);

        let outcome = RangeFilter::new(Column::MolWeight, Bounds::new(Some(0.0), Some(1000.0)))
            .apply(&mut table)
            .unwrap();
        assert_eq!(outcome.dropped, 3);
        assert_eq!(table.row(0).unwrap().name, "m0");
    }

    #[test]
    fn test_filters_compose_in_order() {
        let mut table = table(&[210.0, 220.0, 230.0, 240.0]);
        let outcomes = apply_filters(
            &mut table,
            &[
                RangeFilter::new(Column::MolWeight, Bounds::new(Some(215.0), None)),
                RangeFilter::new(Column::LogP, Bounds::default()),
                RangeFilter::new(Column::RotatableBonds, Bounds::new(None, Some(2.0))),
            ],
        );
        assert_eq!(outcomes.len(), 2);
        assert_eq!(outcomes[0].remaining, 3);
        assert_eq!(outcomes[1].remaining, 2);

        let names: Vec<_> = table.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["m1", "m2"]);
    }
}
