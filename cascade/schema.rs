//! Aligns a live feature table to the column layout a classifier was trained on.
//!
//! Classifiers downstream are order sensitive, not name sensitive, so the
//! aligned table must list exactly the training columns in training order:
//! untrained live columns are dropped and absent training columns are
//! inserted as zeros.

use crate::types::{FeatureTable, TableError};
use ahash::{AHashMap, AHashSet};
use ndarray::Array2;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    #[error("Training schema lists column '{0}' more than once.")]
    DuplicateTrainingColumn(String),
    #[error(
        "The classifier reports {scorer} trained features, but the reference training table has {reference} columns after exclusions (first difference: '{first_difference}')."
    )]
    TrainingSchemaMismatch {
        scorer: usize,
        reference: usize,
        first_difference: String,
    },
    #[error(transparent)]
    Table(#[from] TableError),
}

/// A live table aligned to a training schema, plus what the alignment changed.
#[derive(Debug, Clone, PartialEq)]
pub struct Reconciled<K> {
    pub table: FeatureTable<K>,
    /// Live columns the classifier was never trained on.
    pub dropped: Vec<String>,
    /// Training columns absent from the live table, inserted as zeros.
    pub filled: Vec<String>,
}

/// Reorders `live` to exactly `training_columns`.
///
/// When a live column name repeats, its first occurrence is used. Running the
/// alignment on an already aligned table is a no-op.
pub fn reconcile<K: Clone>(
    live: &FeatureTable<K>,
    training_columns: &[String],
) -> Result<Reconciled<K>, SchemaError> {
    let mut seen = AHashSet::with_capacity(training_columns.len());
    for column in training_columns {
        if !seen.insert(column.as_str()) {
            return Err(SchemaError::DuplicateTrainingColumn(column.clone()));
        }
    }

    let mut live_index: AHashMap<&str, usize> = AHashMap::with_capacity(live.ncols());
    for (i, column) in live.columns().iter().enumerate() {
        live_index.entry(column.as_str()).or_insert(i);
    }

    let dropped: Vec<String> = live
        .columns()
        .iter()
        .filter(|column| !seen.contains(column.as_str()))
        .cloned()
        .collect();
    let filled: Vec<String> = training_columns
        .iter()
        .filter(|column| !live_index.contains_key(column.as_str()))
        .cloned()
        .collect();

    let source = live.values();
    let mut values = Array2::<f64>::zeros((live.nrows(), training_columns.len()));
    for (target, column) in training_columns.iter().enumerate() {
        if let Some(&i) = live_index.get(column.as_str()) {
            values.column_mut(target).assign(&source.column(i));
        }
    }

    if !dropped.is_empty() || !filled.is_empty() {
        log::debug!(
            "schema reconciliation dropped {} untrained column(s) and zero-filled {} missing column(s)",
            dropped.len(),
            filled.len()
        );
    }

    Ok(Reconciled {
        table: FeatureTable::new(live.keys().to_vec(), training_columns.to_vec(), values)?,
        dropped,
        filled,
    })
}

/// Checks that a classifier's own trained feature list agrees with a reference
/// training schema. A classifier that reports no names is not checked.
pub fn ensure_same_schema(scorer_columns: &[String], reference: &[String]) -> Result<(), SchemaError> {
    if scorer_columns.is_empty() || scorer_columns == reference {
        return Ok(());
    }
    let first_difference = scorer_columns
        .iter()
        .zip(reference)
        .find(|(a, b)| a != b)
        .map(|(a, _)| a.clone())
        .or_else(|| {
            scorer_columns
                .get(reference.len())
                .or_else(|| reference.get(scorer_columns.len()))
                .cloned()
        })
        .unwrap_or_default();
    Err(SchemaError::TrainingSchemaMismatch {
        scorer: scorer_columns.len(),
        reference: reference.len(),
        first_difference,
    })
}
