//! # Stage B: Note-Level False-Positive Correction
//!
//! Only baseline-positive notes are re-scored. Baseline negatives are carried
//! through with an adjusted decision of `false` and their baseline probability,
//! so every note keeps one continuous score.

use super::baseline::BaselineScores;
use super::schema::reconcile;
use super::scorer::Scorer;
use super::{CascadeError, Stage, positive_probabilities};
use crate::config::NoteLevelConfig;
use crate::types::NoteResult;

/// Merges baseline and corrected scores into one row per note, ordered by
/// (subject, date). Notes sharing a subject and date keep their input order.
pub fn correct_notes(
    baseline: &BaselineScores,
    corrector: &dyn Scorer,
    config: &NoteLevelConfig,
) -> Result<Vec<NoteResult>, CascadeError> {
    let positives: Vec<usize> = baseline
        .notes
        .iter()
        .enumerate()
        .filter(|(_, note)| note.decision)
        .map(|(i, _)| i)
        .collect();

    let mut adjusted: Vec<Option<f64>> = vec![None; baseline.notes.len()];
    if !positives.is_empty() {
        let subset = baseline.features.select_rows(&positives);
        let aligned = reconcile(&subset, corrector.trained_feature_names())?;
        let probabilities =
            positive_probabilities(Stage::NoteCorrector, corrector, aligned.table.values())?;
        for (&row, probability) in positives.iter().zip(probabilities) {
            adjusted[row] = Some(probability);
        }
    }

    let mut results: Vec<NoteResult> = baseline
        .notes
        .iter()
        .zip(adjusted)
        .map(|(note, corrected)| match corrected {
            Some(probability) => NoteResult {
                key: note.key.clone(),
                baseline_decision: note.decision,
                baseline_probability: note.probability,
                adjusted_decision: probability >= config.threshold,
                adjusted_probability: probability,
            },
            None => NoteResult {
                key: note.key.clone(),
                baseline_decision: note.decision,
                baseline_probability: note.probability,
                adjusted_decision: false,
                adjusted_probability: note.probability,
            },
        })
        .collect();
    results.sort_by(|a, b| {
        a.key
            .subject
            .cmp(&b.key.subject)
            .then_with(|| a.key.date.cmp(&b.key.date))
    });

    let kept = results.iter().filter(|r| r.adjusted_decision).count();
    log::info!(
        "Note-level correction kept {kept} of {} baseline-positive notes",
        positives.len()
    );

    Ok(results)
}
