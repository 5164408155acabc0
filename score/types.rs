// ========================================================================================
//                             High-Level Data Contracts
// ========================================================================================

// This file is ONLY for types that are SHARED BETWEEN FILES, not types that only are used in one file.

use ahash::{AHashMap, AHashSet};
use chrono::NaiveDate;
use ndarray::{Array2, ArrayView1, ArrayView2, Axis};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use thiserror::Error;

/// A patient identifier. Identifiers are opaque strings, but they are ordered
/// naturally so that numeric identifiers sort the way a clinician expects
/// (`"9"` before `"10"`). Byte order breaks ties, keeping `Ord` consistent with `Eq`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubjectId(String);

impl SubjectId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Ord for SubjectId {
    fn cmp(&self, other: &Self) -> Ordering {
        natord::compare(&self.0, &other.0).then_with(|| self.0.cmp(&other.0))
    }
}

impl PartialOrd for SubjectId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for SubjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SubjectId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for SubjectId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Per-subject zero point for every relative time bin.
pub type AnchorDates = AHashMap<SubjectId, NaiveDate>;

/// One roster row: a patient and the date all of their bins are measured from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RosterEntry {
    pub subject: SubjectId,
    pub anchor: NaiveDate,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum RosterError {
    #[error("Subject '{0}' appears more than once in the patient roster. Subject ids must be unique.")]
    DuplicateSubject(SubjectId),
}

/// The patient roster. Every patient-level output has exactly one row per entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Roster {
    entries: Vec<RosterEntry>,
}

impl Roster {
    pub fn new(entries: Vec<RosterEntry>) -> Result<Self, RosterError> {
        let mut seen = AHashSet::with_capacity(entries.len());
        for entry in &entries {
            if !seen.insert(&entry.subject) {
                return Err(RosterError::DuplicateSubject(entry.subject.clone()));
            }
        }
        Ok(Self { entries })
    }

    pub fn entries(&self) -> &[RosterEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn anchor_dates(&self) -> AnchorDates {
        self.entries
            .iter()
            .map(|entry| (entry.subject.clone(), entry.anchor))
            .collect()
    }
}

/// A dated, scored event produced by an upstream note-level model.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredEvent {
    pub subject: SubjectId,
    pub date: NaiveDate,
    pub decision: bool,
    pub probability: f64,
}

/// Identifies one clinical note in a feature table.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NoteKey {
    pub subject: SubjectId,
    pub date: NaiveDate,
    pub note_id: Option<String>,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TableError {
    #[error("Feature table has {rows} rows of values but {keys} row keys.")]
    RowCountMismatch { rows: usize, keys: usize },
    #[error("Feature table has {values} value columns but {names} column names.")]
    ColumnCountMismatch { values: usize, names: usize },
}

/// A wide numeric feature block with an explicit, ordered list of column names
/// and one key per row. Tables are never mutated in place; every transformation
/// returns a new table.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureTable<K> {
    keys: Vec<K>,
    columns: Vec<String>,
    values: Array2<f64>,
}

impl<K> FeatureTable<K> {
    pub fn new(keys: Vec<K>, columns: Vec<String>, values: Array2<f64>) -> Result<Self, TableError> {
        if values.nrows() != keys.len() {
            return Err(TableError::RowCountMismatch {
                rows: values.nrows(),
                keys: keys.len(),
            });
        }
        if values.ncols() != columns.len() {
            return Err(TableError::ColumnCountMismatch {
                values: values.ncols(),
                names: columns.len(),
            });
        }
        Ok(Self {
            keys,
            columns,
            values,
        })
    }

    pub fn keys(&self) -> &[K] {
        &self.keys
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> ArrayView2<'_, f64> {
        self.values.view()
    }

    pub fn nrows(&self) -> usize {
        self.keys.len()
    }

    pub fn ncols(&self) -> usize {
        self.columns.len()
    }

    /// Position of the first column with this name.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn column(&self, name: &str) -> Option<ArrayView1<'_, f64>> {
        self.column_index(name)
            .map(|index| self.values.column(index))
    }

    /// Collapses repeated column names onto their first occurrence.
    pub fn dedup_columns(&self) -> Self
    where
        K: Clone,
    {
        let mut seen = AHashSet::with_capacity(self.columns.len());
        let kept: Vec<usize> = (0..self.columns.len())
            .filter(|&i| seen.insert(self.columns[i].as_str()))
            .collect();
        Self {
            keys: self.keys.clone(),
            columns: kept.iter().map(|&i| self.columns[i].clone()).collect(),
            values: self.values.select(Axis(1), &kept),
        }
    }

    /// Keeps the listed rows, in the listed order.
    pub fn select_rows(&self, rows: &[usize]) -> Self
    where
        K: Clone,
    {
        Self {
            keys: rows.iter().map(|&i| self.keys[i].clone()).collect(),
            columns: self.columns.clone(),
            values: self.values.select(Axis(0), rows),
        }
    }

    /// Drops every listed column that is present. Absent names are ignored.
    pub fn without_columns(&self, excluded: &[String]) -> Self
    where
        K: Clone,
    {
        let excluded: AHashSet<&str> = excluded.iter().map(String::as_str).collect();
        let kept: Vec<usize> = (0..self.columns.len())
            .filter(|&i| !excluded.contains(self.columns[i].as_str()))
            .collect();
        Self {
            keys: self.keys.clone(),
            columns: kept.iter().map(|&i| self.columns[i].clone()).collect(),
            values: self.values.select(Axis(1), &kept),
        }
    }

    /// Replaces NaN cells (missing features) with `fill`.
    pub fn fill_missing(&self, fill: f64) -> Self
    where
        K: Clone,
    {
        Self {
            keys: self.keys.clone(),
            columns: self.columns.clone(),
            values: self.values.mapv(|v| if v.is_nan() { fill } else { v }),
        }
    }
}

/// Final per-note output of the cascade: the baseline decision and the
/// false-positive corrected decision side by side.
#[derive(Debug, Clone, PartialEq)]
pub struct NoteResult {
    pub key: NoteKey,
    pub baseline_decision: bool,
    pub baseline_probability: f64,
    pub adjusted_decision: bool,
    pub adjusted_probability: f64,
}

/// Final per-patient output of the cascade.
#[derive(Debug, Clone, PartialEq)]
pub struct PatientResult {
    pub subject: SubjectId,
    pub anchor: NaiveDate,
    pub decision: bool,
    pub probability: f64,
    /// False when the patient had no baseline-positive notes and the row was
    /// filled with zeros instead of being scored.
    pub predicted: bool,
}
