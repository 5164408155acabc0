//! Reshapes long (subject, bin) aggregates into one wide feature vector per
//! subject: `p_<label>` then `n_<label>` for every bin, in bin order.

use crate::timeline::aggregate::SubjectBinAggregate;
use crate::types::{FeatureTable, SubjectId, TableError};
use ahash::{AHashMap, AHashSet};
use itertools::Itertools;
use ndarray::Array2;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PivotError {
    #[error(
        "Subject '{subject}' has no aggregate for bin '{label}'. Every subject must carry every bin before pivoting."
    )]
    MissingFeature { subject: SubjectId, label: String },
    #[error("Subject '{subject}' has more than one aggregate for bin '{label}'.")]
    DuplicateAggregate { subject: SubjectId, label: String },
    #[error("Bin label '{0}' appears more than once in the bin ordering.")]
    DuplicateLabel(String),
    #[error(transparent)]
    Table(#[from] TableError),
}

pub fn probability_column(label: &str) -> String {
    format!("p_{label}")
}

pub fn hit_column(label: &str) -> String {
    format!("n_{label}")
}

/// The pivoted column names for `labels`, in order.
pub fn feature_columns(labels: &[String]) -> Vec<String> {
    labels
        .iter()
        .flat_map(|label| [probability_column(label), hit_column(label)])
        .collect()
}

/// Builds one row per distinct subject (natural subject order) with columns
/// laid out by [`feature_columns`]. A missing (subject, bin) pair is an error;
/// nothing is imputed.
pub fn pivot_features(
    aggregates: &[SubjectBinAggregate],
    labels: &[String],
) -> Result<FeatureTable<SubjectId>, PivotError> {
    let mut seen_labels = AHashSet::with_capacity(labels.len());
    for label in labels {
        if !seen_labels.insert(label.as_str()) {
            return Err(PivotError::DuplicateLabel(label.clone()));
        }
    }

    let mut lookup: AHashMap<(&SubjectId, &str), &SubjectBinAggregate> =
        AHashMap::with_capacity(aggregates.len());
    for aggregate in aggregates {
        if lookup
            .insert((&aggregate.subject, aggregate.label.as_str()), aggregate)
            .is_some()
        {
            return Err(PivotError::DuplicateAggregate {
                subject: aggregate.subject.clone(),
                label: aggregate.label.clone(),
            });
        }
    }

    let subjects: Vec<SubjectId> = aggregates
        .iter()
        .map(|aggregate| &aggregate.subject)
        .sorted()
        .dedup()
        .cloned()
        .collect();

    let mut values = Array2::<f64>::zeros((subjects.len(), 2 * labels.len()));
    for (row, subject) in subjects.iter().enumerate() {
        for (b, label) in labels.iter().enumerate() {
            let aggregate = lookup.get(&(subject, label.as_str())).ok_or_else(|| {
                PivotError::MissingFeature {
                    subject: subject.clone(),
                    label: label.clone(),
                }
            })?;
            values[[row, 2 * b]] = aggregate.representative_probability;
            values[[row, 2 * b + 1]] = f64::from(aggregate.hit_count);
        }
    }

    Ok(FeatureTable::new(subjects, feature_columns(labels), values)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timeline::aggregate::NO_INFORMATION_PROBABILITY;
    use ndarray::array;

    fn aggregate(subject: &str, bin_index: usize, label: &str, hits: u32, p: f64) -> SubjectBinAggregate {
        SubjectBinAggregate {
            subject: subject.into(),
            bin_index,
            label: label.to_string(),
            hit_count: hits,
            representative_probability: p,
        }
    }

    fn labels() -> Vec<String> {
        vec!["0to3month".to_string(), "3to6month".to_string()]
    }

    #[test]
    fn pivot_interleaves_probability_and_hits_in_bin_order() {
        let rows = vec![
            aggregate("2", 0, "0to3month", 0, NO_INFORMATION_PROBABILITY),
            aggregate("10", 0, "0to3month", 3, 0.8),
            aggregate("2", 1, "3to6month", 1, 0.6),
            aggregate("10", 1, "3to6month", 0, NO_INFORMATION_PROBABILITY),
        ];

        let table = pivot_features(&rows, &labels()).unwrap();
        assert_eq!(
            table.columns(),
            &["p_0to3month", "n_0to3month", "p_3to6month", "n_3to6month"]
        );
        let subjects: Vec<&str> = table.keys().iter().map(SubjectId::as_str).collect();
        assert_eq!(subjects, vec!["2", "10"]);
        assert_eq!(
            table.values(),
            array![
                [NO_INFORMATION_PROBABILITY, 0.0, 0.6, 1.0],
                [0.8, 3.0, NO_INFORMATION_PROBABILITY, 0.0]
            ]
        );
    }

    #[test]
    fn width_is_two_columns_per_bin() {
        let rows = vec![
            aggregate("1", 0, "0to3month", 0, 0.1),
            aggregate("1", 1, "3to6month", 0, 0.1),
        ];
        let table = pivot_features(&rows, &labels()).unwrap();
        assert_eq!(table.ncols(), 2 * labels().len());
    }

    #[test]
    fn missing_bin_fails_loudly() {
        let rows = vec![
            aggregate("1", 0, "0to3month", 0, 0.1),
            aggregate("1", 1, "3to6month", 0, 0.1),
            aggregate("2", 0, "0to3month", 0, 0.1),
        ];
        match pivot_features(&rows, &labels()) {
            Err(PivotError::MissingFeature { subject, label }) => {
                assert_eq!(subject.as_str(), "2");
                assert_eq!(label, "3to6month");
            }
            other => panic!("Expected MissingFeature, got {:?}", other),
        }
    }

    #[test]
    fn duplicate_aggregates_and_labels_are_rejected() {
        let rows = vec![
            aggregate("1", 0, "0to3month", 0, 0.1),
            aggregate("1", 0, "0to3month", 1, 0.4),
        ];
        assert!(matches!(
            pivot_features(&rows, &labels()),
            Err(PivotError::DuplicateAggregate { .. })
        ));

        let repeated = vec!["0to3month".to_string(), "0to3month".to_string()];
        assert_eq!(
            pivot_features(&[], &repeated).unwrap_err(),
            PivotError::DuplicateLabel("0to3month".to_string())
        );
    }
}
