//! # Stage C: Patient-Level Classification
//!
//! Baseline note decisions are binned relative to each patient's anchor date,
//! pivoted into one feature vector per patient and classified once. Patients
//! with no baseline-positive note are never shown to the classifier; they are
//! filled with a negative decision.

use super::schema::reconcile;
use super::scorer::Scorer;
use super::{CascadeError, Stage, positive_probabilities};
use crate::config::PatientLevelConfig;
use crate::timeline::aggregate::aggregate_events;
use crate::timeline::bins::{BinSet, make_bins};
use crate::timeline::pivot::pivot_features;
use crate::types::{FeatureTable, NoteResult, PatientResult, Roster, ScoredEvent, SubjectId};
use ahash::{AHashMap, AHashSet};

/// Turns scored notes of roster patients into timeline events, reading the
/// decision and probability chosen by `pick`. Notes of patients missing from
/// the roster have no anchor date and are skipped with a warning.
pub(crate) fn roster_events(
    roster: &Roster,
    notes: &[NoteResult],
    pick: impl Fn(&NoteResult) -> (bool, f64),
) -> Vec<ScoredEvent> {
    let members: AHashSet<&SubjectId> = roster.entries().iter().map(|e| &e.subject).collect();
    let (events, skipped): (Vec<_>, Vec<_>) = notes
        .iter()
        .partition(|note| members.contains(&note.key.subject));
    if !skipped.is_empty() {
        log::warn!(
            "{} note(s) belong to patients missing from the roster and were left out of the timeline",
            skipped.len()
        );
    }
    events
        .into_iter()
        .map(|note| {
            let (decision, probability) = pick(note);
            ScoredEvent {
                subject: note.key.subject.clone(),
                date: note.key.date,
                decision,
                probability,
            }
        })
        .collect()
}

/// One row per roster patient (natural subject order) holding the pivoted
/// baseline timeline features for `bins`.
pub fn build_patient_features(
    roster: &Roster,
    notes: &[NoteResult],
    bins: &BinSet,
) -> Result<FeatureTable<SubjectId>, CascadeError> {
    let events = roster_events(roster, notes, |note| {
        (note.baseline_decision, note.baseline_probability)
    });
    let aggregates = aggregate_events(&events, &roster.anchor_dates(), bins)?;
    Ok(pivot_features(&aggregates, &bins.labels())?)
}

/// Classifies every roster patient. The result holds exactly one row per
/// roster entry, sorted by subject.
pub fn score_patients(
    roster: &Roster,
    notes: &[NoteResult],
    classifier: &dyn Scorer,
    config: &PatientLevelConfig,
) -> Result<Vec<PatientResult>, CascadeError> {
    let bins = make_bins(config.bins.window, config.bins.n_years)?;
    let features = build_patient_features(roster, notes, &bins)?;

    let flagged: AHashSet<&SubjectId> = notes
        .iter()
        .filter(|note| note.baseline_decision)
        .map(|note| &note.key.subject)
        .collect();
    let rows: Vec<usize> = features
        .keys()
        .iter()
        .enumerate()
        .filter(|(_, subject)| flagged.contains(subject))
        .map(|(i, _)| i)
        .collect();

    let mut scored: AHashMap<SubjectId, f64> = AHashMap::with_capacity(rows.len());
    if !rows.is_empty() {
        let subset = features.select_rows(&rows);
        let aligned = reconcile(&subset, classifier.trained_feature_names())?;
        let probabilities =
            positive_probabilities(Stage::PatientClassifier, classifier, aligned.table.values())?;
        scored.extend(subset.keys().iter().cloned().zip(probabilities));
    }

    let mut results: Vec<PatientResult> = roster
        .entries()
        .iter()
        .map(|entry| match scored.get(&entry.subject) {
            Some(&probability) => PatientResult {
                subject: entry.subject.clone(),
                anchor: entry.anchor,
                decision: probability >= config.threshold,
                probability,
                predicted: true,
            },
            None => PatientResult {
                subject: entry.subject.clone(),
                anchor: entry.anchor,
                decision: false,
                probability: 0.0,
                predicted: false,
            },
        })
        .collect();
    results.sort_by(|a, b| a.subject.cmp(&b.subject));

    log::info!(
        "Identified {} patients with acquired epilepsy out of {} patients ({} scored, {} filled)",
        results.iter().filter(|r| r.decision).count(),
        roster.len(),
        scored.len(),
        roster.len() - scored.len()
    );

    Ok(results)
}
