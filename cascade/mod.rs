//! # The Scoring Cascade
//!
//! Three classifiers chained on shared features. The baseline stage scores
//! every note, the note-level stage re-scores only baseline positives to
//! remove false positives, and the patient-level stage bins baseline output
//! over time and classifies each patient once.

pub mod baseline;
pub mod note_level;
pub mod patient_level;
pub mod schema;
pub mod scorer;
pub mod threshold;
pub mod trajectory;

use crate::timeline::aggregate::AggregateError;
use crate::timeline::bins::BinError;
use crate::timeline::pivot::PivotError;
use crate::types::TableError;
use ndarray::ArrayView2;
use schema::SchemaError;
use scorer::{Scorer, ScorerError};
use std::fmt;
use thiserror::Error;
use threshold::ThresholdError;

/// The classifier stages, for error reporting and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Baseline,
    NoteCorrector,
    PatientClassifier,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Baseline => "baseline",
            Stage::NoteCorrector => "note-level",
            Stage::PatientClassifier => "patient-level",
        })
    }
}

#[derive(Error, Debug)]
pub enum CascadeError {
    #[error(transparent)]
    Scorer(#[from] ScorerError),
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error(transparent)]
    Threshold(#[from] ThresholdError),
    #[error(transparent)]
    Aggregate(#[from] AggregateError),
    #[error(transparent)]
    Pivot(#[from] PivotError),
    #[error(transparent)]
    Bins(#[from] BinError),
    #[error(transparent)]
    Table(#[from] TableError),
    #[error("The {stage} classifier returned invalid probabilities: {reason}")]
    InvalidProbabilities { stage: Stage, reason: String },
    #[error("The reference training table has {features} feature rows but {labels} labels.")]
    ReferenceLabelCount { features: usize, labels: usize },
}

/// Runs `scorer` and returns `P(class = 1)` per row, after checking that the
/// output is an `[n_rows, 2]` matrix of probabilities.
pub(crate) fn positive_probabilities(
    stage: Stage,
    scorer: &dyn Scorer,
    features: ArrayView2<f64>,
) -> Result<Vec<f64>, CascadeError> {
    let probabilities = scorer.predict_proba(features)?;
    if probabilities.dim() != (features.nrows(), 2) {
        return Err(CascadeError::InvalidProbabilities {
            stage,
            reason: format!(
                "expected a {}x2 matrix, got {}x{}",
                features.nrows(),
                probabilities.nrows(),
                probabilities.ncols()
            ),
        });
    }
    if let Some(((row, col), value)) = probabilities
        .indexed_iter()
        .find(|(_, p)| !p.is_finite() || !(0.0..=1.0).contains(*p))
    {
        return Err(CascadeError::InvalidProbabilities {
            stage,
            reason: format!("row {row}, column {col} holds {value}"),
        });
    }
    Ok(probabilities.column(1).to_vec())
}
