//! # Stage A: Baseline Phenotyping
//!
//! Scores every note with the baseline classifier. The decision threshold is
//! either fixed or calibrated once on the reference training set as the
//! max-F-score point of its precision-recall curve.

use super::schema::{ensure_same_schema, reconcile};
use super::scorer::Scorer;
use super::threshold::{ThresholdPolicy, max_f_score_threshold};
use super::{CascadeError, Stage, positive_probabilities};
use crate::config::BaselineConfig;
use crate::types::{FeatureTable, NoteKey};

/// The baseline classifier's training features and their binary outcomes.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingReference {
    features: FeatureTable<usize>,
    labels: Vec<bool>,
}

impl TrainingReference {
    pub fn new(features: FeatureTable<usize>, labels: Vec<bool>) -> Result<Self, CascadeError> {
        if features.nrows() != labels.len() {
            return Err(CascadeError::ReferenceLabelCount {
                features: features.nrows(),
                labels: labels.len(),
            });
        }
        Ok(Self { features, labels })
    }

    pub fn features(&self) -> &FeatureTable<usize> {
        &self.features
    }

    pub fn labels(&self) -> &[bool] {
        &self.labels
    }
}

/// Stage A output for one note.
#[derive(Debug, Clone, PartialEq)]
pub struct BaselineNote {
    pub key: NoteKey,
    pub decision: bool,
    pub probability: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BaselineScores {
    /// One entry per input note, in input order.
    pub notes: Vec<BaselineNote>,
    pub threshold: f64,
    /// The live note features after missing values were zeroed and repeated
    /// columns collapsed. Later stages align this table to their own schemas.
    pub features: FeatureTable<NoteKey>,
}

pub fn score_baseline(
    notes: &FeatureTable<NoteKey>,
    scorer: &dyn Scorer,
    reference: &TrainingReference,
    config: &BaselineConfig,
) -> Result<BaselineScores, CascadeError> {
    let training = reference.features.without_columns(&config.excluded_columns);
    let training_columns = training.columns().to_vec();
    ensure_same_schema(scorer.trained_feature_names(), &training_columns)?;

    let features = notes.fill_missing(0.0).dedup_columns();
    let aligned = reconcile(&features, &training_columns)?;

    let threshold = match config.threshold {
        ThresholdPolicy::Fixed { value } => value,
        ThresholdPolicy::MaxFScore => {
            let reference_scores =
                positive_probabilities(Stage::Baseline, scorer, training.values())?;
            let calibration = max_f_score_threshold(&reference.labels, &reference_scores)?;
            log::info!(
                "Calibrated baseline threshold {:.4} on {} reference notes (precision {:.3}, recall {:.3}, F {:.3})",
                calibration.threshold,
                reference.labels.len(),
                calibration.precision,
                calibration.recall,
                calibration.f_score
            );
            calibration.threshold
        }
    };

    let probabilities = positive_probabilities(Stage::Baseline, scorer, aligned.table.values())?;
    let scored: Vec<BaselineNote> = notes
        .keys()
        .iter()
        .zip(probabilities)
        .map(|(key, probability)| BaselineNote {
            key: key.clone(),
            decision: probability >= threshold,
            probability,
        })
        .collect();

    log::info!(
        "Baseline flagged {} of {} notes at threshold {:.4}",
        scored.iter().filter(|n| n.decision).count(),
        scored.len(),
        threshold
    );

    Ok(BaselineScores {
        notes: scored,
        threshold,
        features,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cascade::schema::SchemaError;
    use crate::cascade::scorer::LogisticScorer;
    use crate::cascade::test_support::FirstColumnScorer;
    use crate::cascade::threshold::ThresholdError;
    use approx::assert_abs_diff_eq;
    use chrono::NaiveDate;
    use ndarray::array;

    fn cols(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn key(subject: &str, day: u32) -> NoteKey {
        NoteKey {
            subject: subject.into(),
            date: NaiveDate::from_ymd_opt(2021, 3, day).unwrap(),
            note_id: None,
        }
    }

    fn reference() -> TrainingReference {
        // "Age" is a leakage column and is excluded before scoring.
        let features = FeatureTable::new(
            (0..4).collect(),
            cols(&["score", "Age", "other"]),
            array![[0.1, 60.0, 0.0], [0.35, 40.0, 0.0], [0.4, 50.0, 0.0], [0.8, 30.0, 0.0]],
        )
        .unwrap();
        TrainingReference::new(features, vec![false, true, false, true]).unwrap()
    }

    fn live() -> FeatureTable<NoteKey> {
        FeatureTable::new(
            vec![key("1", 1), key("1", 2), key("2", 1)],
            cols(&["other", "score", "score", "unseen"]),
            array![
                [1.0, 0.2, 0.9, 5.0],
                [f64::NAN, 0.36, 0.1, 5.0],
                [0.0, f64::NAN, 0.3, 5.0]
            ],
        )
        .unwrap()
    }

    #[test]
    fn calibrated_threshold_decides_notes() {
        let scorer = FirstColumnScorer {
            names: cols(&["score", "other"]),
        };
        let scores =
            score_baseline(&live(), &scorer, &reference(), &BaselineConfig::default()).unwrap();

        // Max-F on the reference curve is at 0.35.
        assert_abs_diff_eq!(scores.threshold, 0.35);
        let decisions: Vec<bool> = scores.notes.iter().map(|n| n.decision).collect();
        assert_eq!(decisions, vec![false, true, false]);
        let probabilities: Vec<f64> = scores.notes.iter().map(|n| n.probability).collect();
        // Repeated "score" uses its first occurrence; a missing value becomes zero.
        assert_eq!(probabilities, vec![0.2, 0.36, 0.0]);
        assert_eq!(scores.notes[2].key, key("2", 1));
    }

    #[test]
    fn live_features_are_cleaned_but_not_reduced() {
        let scorer = FirstColumnScorer { names: vec![] };
        let scores =
            score_baseline(&live(), &scorer, &reference(), &BaselineConfig::default()).unwrap();
        assert_eq!(scores.features.columns(), cols(&["other", "score", "unseen"]).as_slice());
        assert!(scores.features.values().iter().all(|v| v.is_finite()));
    }

    #[test]
    fn fixed_threshold_skips_calibration() {
        let scorer = FirstColumnScorer { names: vec![] };
        let config = BaselineConfig {
            threshold: ThresholdPolicy::Fixed { value: 0.2 },
            ..BaselineConfig::default()
        };
        let unlabeled = TrainingReference::new(
            FeatureTable::new(vec![0], cols(&["score", "other"]), array![[0.5, 0.0]]).unwrap(),
            vec![false],
        )
        .unwrap();
        let scores = score_baseline(&live(), &scorer, &unlabeled, &config).unwrap();
        let decisions: Vec<bool> = scores.notes.iter().map(|n| n.decision).collect();
        assert_eq!(decisions, vec![true, true, false]);
    }

    #[test]
    fn reference_without_positives_cannot_calibrate() {
        let scorer = FirstColumnScorer { names: vec![] };
        let unlabeled = TrainingReference::new(
            FeatureTable::new(vec![0], cols(&["score"]), array![[0.5]]).unwrap(),
            vec![false],
        )
        .unwrap();
        assert!(matches!(
            score_baseline(&live(), &scorer, &unlabeled, &BaselineConfig::default()),
            Err(CascadeError::Threshold(ThresholdError::NoPositiveLabels))
        ));
    }

    #[test]
    fn scorer_schema_must_match_the_reference() {
        let scorer = LogisticScorer::new(cols(&["score", "Age", "other"]), 0.0, vec![1.0; 3]).unwrap();
        assert!(matches!(
            score_baseline(&live(), &scorer, &reference(), &BaselineConfig::default()),
            Err(CascadeError::Schema(SchemaError::TrainingSchemaMismatch { .. }))
        ));
    }

    #[test]
    fn reference_label_count_is_checked() {
        let features = FeatureTable::new(vec![0, 1], cols(&["a"]), array![[0.0], [1.0]]).unwrap();
        assert!(matches!(
            TrainingReference::new(features, vec![true]),
            Err(CascadeError::ReferenceLabelCount {
                features: 2,
                labels: 1
            })
        ));
    }
}
