//! # Decision Threshold Calibration
//!
//! Either a fixed cutoff, or the point on a reference precision-recall curve
//! that maximizes the F-score (harmonic mean of precision and recall).
//!
//! The curve follows the usual construction: every distinct score is a
//! candidate threshold, a sample is predicted positive when its score is at
//! or above the threshold, and thresholds are reported in ascending order.
//! `precision` and `recall` carry one extra trailing point `(1, 0)` that has
//! no threshold.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ThresholdError {
    #[error("Cannot calibrate a threshold: {labels} labels were given for {scores} scores.")]
    LengthMismatch { labels: usize, scores: usize },
    #[error("Cannot calibrate a threshold on an empty reference set.")]
    Empty,
    #[error("Cannot calibrate a threshold: the reference labels contain no positive examples.")]
    NoPositiveLabels,
    #[error("Reference score at position {index} is {value}, which is not finite.")]
    NonFiniteScore { index: usize, value: f64 },
    #[error("Every point on the precision-recall curve has an undefined F-score.")]
    NoDefinedFScore,
    #[error("Fixed threshold {0} is outside [0, 1].")]
    OutOfRange(f64),
}

/// How a stage turns probabilities into decisions.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum ThresholdPolicy {
    Fixed { value: f64 },
    /// Calibrated once on reference training labels.
    MaxFScore,
}

impl ThresholdPolicy {
    pub fn validate(&self) -> Result<(), ThresholdError> {
        match *self {
            ThresholdPolicy::Fixed { value } if !(0.0..=1.0).contains(&value) => {
                Err(ThresholdError::OutOfRange(value))
            }
            _ => Ok(()),
        }
    }
}

impl fmt::Display for ThresholdPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ThresholdPolicy::Fixed { value } => write!(f, "fixed at {value}"),
            ThresholdPolicy::MaxFScore => f.write_str("max F-score on reference labels"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PrecisionRecallCurve {
    pub precision: Vec<f64>,
    pub recall: Vec<f64>,
    pub thresholds: Vec<f64>,
}

/// The chosen operating point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Calibration {
    pub threshold: f64,
    pub precision: f64,
    pub recall: f64,
    pub f_score: f64,
}

pub fn precision_recall_curve(
    labels: &[bool],
    scores: &[f64],
) -> Result<PrecisionRecallCurve, ThresholdError> {
    if labels.len() != scores.len() {
        return Err(ThresholdError::LengthMismatch {
            labels: labels.len(),
            scores: scores.len(),
        });
    }
    if scores.is_empty() {
        return Err(ThresholdError::Empty);
    }
    if let Some((index, &value)) = scores.iter().enumerate().find(|(_, v)| !v.is_finite()) {
        return Err(ThresholdError::NonFiniteScore { index, value });
    }
    let total_positive = labels.iter().filter(|&&l| l).count();
    if total_positive == 0 {
        return Err(ThresholdError::NoPositiveLabels);
    }

    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]));

    // Cumulative counts at the last sample of every run of equal scores,
    // walking from the highest score down.
    let mut true_positives = 0usize;
    let mut false_positives = 0usize;
    let mut points: Vec<(f64, usize, usize)> = Vec::new();
    for (position, &i) in order.iter().enumerate() {
        if labels[i] {
            true_positives += 1;
        } else {
            false_positives += 1;
        }
        let run_ends = order
            .get(position + 1)
            .is_none_or(|&next| scores[next] != scores[i]);
        if run_ends {
            points.push((scores[i], true_positives, false_positives));
        }
    }
    points.reverse();

    let mut precision = Vec::with_capacity(points.len() + 1);
    let mut recall = Vec::with_capacity(points.len() + 1);
    let mut thresholds = Vec::with_capacity(points.len());
    for &(threshold, tp, fp) in &points {
        precision.push(tp as f64 / (tp + fp) as f64);
        recall.push(tp as f64 / total_positive as f64);
        thresholds.push(threshold);
    }
    precision.push(1.0);
    recall.push(0.0);

    Ok(PrecisionRecallCurve {
        precision,
        recall,
        thresholds,
    })
}

/// Picks the threshold with the highest F-score on the reference set.
///
/// Points where precision and recall are both zero have no F-score and are
/// skipped. On ties the lowest threshold (the first point in ascending order)
/// wins.
pub fn max_f_score_threshold(labels: &[bool], scores: &[f64]) -> Result<Calibration, ThresholdError> {
    let curve = precision_recall_curve(labels, scores)?;

    let mut best: Option<Calibration> = None;
    for (i, &threshold) in curve.thresholds.iter().enumerate() {
        let (p, r) = (curve.precision[i], curve.recall[i]);
        if p + r == 0.0 {
            continue;
        }
        let f_score = 2.0 * p * r / (p + r);
        if best.is_none_or(|b| f_score > b.f_score) {
            best = Some(Calibration {
                threshold,
                precision: p,
                recall: r,
                f_score,
            });
        }
    }
    best.ok_or(ThresholdError::NoDefinedFScore)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn separable_classes_calibrate_to_the_lowest_positive_score() {
        let labels = [false, true, false, true, true];
        let scores = [0.10, 0.70, 0.20, 0.90, 0.75];
        let calibration = max_f_score_threshold(&labels, &scores).unwrap();
        assert_abs_diff_eq!(calibration.threshold, 0.70);
        assert_abs_diff_eq!(calibration.f_score, 1.0);
    }

    #[test]
    fn curve_matches_hand_computation() {
        let labels = [false, false, true, true];
        let scores = [0.1, 0.4, 0.35, 0.8];
        let curve = precision_recall_curve(&labels, &scores).unwrap();

        assert_eq!(curve.thresholds, vec![0.1, 0.35, 0.4, 0.8]);
        let expected_precision = [0.5, 2.0 / 3.0, 0.5, 1.0, 1.0];
        let expected_recall = [1.0, 1.0, 0.5, 0.5, 0.0];
        for i in 0..5 {
            assert_abs_diff_eq!(curve.precision[i], expected_precision[i], epsilon = 1e-12);
            assert_abs_diff_eq!(curve.recall[i], expected_recall[i], epsilon = 1e-12);
        }

        let calibration = max_f_score_threshold(&labels, &scores).unwrap();
        assert_abs_diff_eq!(calibration.threshold, 0.35);
        assert_abs_diff_eq!(calibration.f_score, 0.8, epsilon = 1e-12);
    }

    #[test]
    fn tied_scores_form_a_single_threshold() {
        let labels = [true, false, true];
        let scores = [0.5, 0.5, 0.9];
        let curve = precision_recall_curve(&labels, &scores).unwrap();
        assert_eq!(curve.thresholds, vec![0.5, 0.9]);
        assert_eq!(curve.precision.len(), 3);
    }

    #[test]
    fn first_maximum_wins_ties() {
        // F = 2/3 at both 0.2 (p=1/2, r=1) and 0.8 (p=1, r=1/2).
        let labels = [true, false, false, true];
        let scores = [0.2, 0.4, 0.6, 0.8];
        let calibration = max_f_score_threshold(&labels, &scores).unwrap();
        assert_abs_diff_eq!(calibration.threshold, 0.2);
    }

    #[test]
    fn undefined_f_scores_are_skipped() {
        // The highest score is a negative: precision and recall are both zero there.
        let labels = [true, false];
        let scores = [0.3, 0.9];
        let calibration = max_f_score_threshold(&labels, &scores).unwrap();
        assert_abs_diff_eq!(calibration.threshold, 0.3);
        assert!(calibration.f_score.is_finite());
    }

    #[test]
    fn degenerate_inputs_are_rejected() {
        assert_eq!(
            max_f_score_threshold(&[false, false], &[0.1, 0.2]).unwrap_err(),
            ThresholdError::NoPositiveLabels
        );
        assert_eq!(
            max_f_score_threshold(&[], &[]).unwrap_err(),
            ThresholdError::Empty
        );
        assert!(matches!(
            max_f_score_threshold(&[true], &[0.1, 0.2]),
            Err(ThresholdError::LengthMismatch { .. })
        ));
        assert!(matches!(
            max_f_score_threshold(&[true, false], &[f64::NAN, 0.2]),
            Err(ThresholdError::NonFiniteScore { index: 0, .. })
        ));
    }

    #[test]
    fn fixed_policy_must_be_a_probability() {
        assert!(ThresholdPolicy::Fixed { value: 0.3 }.validate().is_ok());
        assert!(ThresholdPolicy::MaxFScore.validate().is_ok());
        assert_eq!(
            ThresholdPolicy::Fixed { value: 1.2 }.validate().unwrap_err(),
            ThresholdError::OutOfRange(1.2)
        );
    }
}
