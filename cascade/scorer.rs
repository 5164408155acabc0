use ahash::AHashSet;
use ndarray::{Array1, Array2, ArrayView2};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{BufWriter, Write};
use std::path::Path;
use thiserror::Error;

/// Custom error type for scorer loading, saving, and prediction.
#[derive(Error, Debug)]
pub enum ScorerError {
    #[error("Failed to read or write scorer file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse TOML scorer file: {0}")]
    TomlParseError(#[from] toml::de::Error),
    #[error("Failed to serialize scorer to TOML format: {0}")]
    TomlSerializeError(#[from] toml::ser::Error),
    #[error("Feature matrix has {found} columns, but the scorer was trained on {expected}.")]
    MismatchedFeatureCount { found: usize, expected: usize },
    #[error("Scorer lists {names} feature names but carries {coefficients} coefficients.")]
    CoefficientCountMismatch { names: usize, coefficients: usize },
    #[error("Feature '{0}' is listed more than once in the scorer's trained feature names.")]
    DuplicateFeature(String),
    #[error("Scorer parameter '{0}' is not finite.")]
    NonFiniteParameter(String),
    #[error("Scorer backend failed: {0}")]
    Backend(Box<dyn std::error::Error + Send + Sync>),
}

/// A pre-trained binary classifier.
///
/// Implementations are schema-order sensitive: column `j` of the matrix handed
/// to [`Scorer::predict_proba`] is interpreted as `trained_feature_names()[j]`.
pub trait Scorer {
    /// Feature names in the exact order the classifier was trained on.
    fn trained_feature_names(&self) -> &[String];

    /// Returns an `[n_rows, 2]` matrix of `[P(class = 0), P(class = 1)]`.
    fn predict_proba(&self, features: ArrayView2<f64>) -> Result<Array2<f64>, ScorerError>;
}

/// A logistic-regression classifier persisted as human-readable TOML.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogisticScorer {
    feature_names: Vec<String>,
    intercept: f64,
    coefficients: Vec<f64>,
}

impl LogisticScorer {
    pub fn new(
        feature_names: Vec<String>,
        intercept: f64,
        coefficients: Vec<f64>,
    ) -> Result<Self, ScorerError> {
        let scorer = Self {
            feature_names,
            intercept,
            coefficients,
        };
        scorer.validate()?;
        Ok(scorer)
    }

    fn validate(&self) -> Result<(), ScorerError> {
        if self.feature_names.len() != self.coefficients.len() {
            return Err(ScorerError::CoefficientCountMismatch {
                names: self.feature_names.len(),
                coefficients: self.coefficients.len(),
            });
        }
        let mut seen = AHashSet::with_capacity(self.feature_names.len());
        for name in &self.feature_names {
            if !seen.insert(name.as_str()) {
                return Err(ScorerError::DuplicateFeature(name.clone()));
            }
        }
        if !self.intercept.is_finite() {
            return Err(ScorerError::NonFiniteParameter("intercept".to_string()));
        }
        for (name, beta) in self.feature_names.iter().zip(&self.coefficients) {
            if !beta.is_finite() {
                return Err(ScorerError::NonFiniteParameter(name.clone()));
            }
        }
        Ok(())
    }

    /// Saves the scorer to a file in a human-readable TOML format.
    pub fn save(&self, path: &Path) -> Result<(), ScorerError> {
        let toml_string = toml::to_string_pretty(self)?;
        let mut file = BufWriter::new(fs::File::create(path)?);
        file.write_all(toml_string.as_bytes())?;
        Ok(())
    }

    /// Loads a scorer from a TOML file and checks it is internally consistent.
    pub fn load(path: &Path) -> Result<Self, ScorerError> {
        let toml_string = fs::read_to_string(path)?;
        let scorer: Self = toml::from_str(&toml_string)?;
        scorer.validate()?;
        Ok(scorer)
    }
}

impl Scorer for LogisticScorer {
    fn trained_feature_names(&self) -> &[String] {
        &self.feature_names
    }

    fn predict_proba(&self, features: ArrayView2<f64>) -> Result<Array2<f64>, ScorerError> {
        if features.ncols() != self.coefficients.len() {
            return Err(ScorerError::MismatchedFeatureCount {
                found: features.ncols(),
                expected: self.coefficients.len(),
            });
        }

        let beta = Array1::from_vec(self.coefficients.clone());
        let eta = features.dot(&beta) + self.intercept;
        // Clamp eta to prevent overflow in exp().
        let positive = eta.mapv(|e| 1.0 / (1.0 + f64::exp(-e.clamp(-700.0, 700.0))));
        let negative = positive.mapv(|p| 1.0 - p);

        let mut probabilities = Array2::zeros((features.nrows(), 2));
        probabilities.column_mut(0).assign(&negative);
        probabilities.column_mut(1).assign(&positive);
        Ok(probabilities)
    }
}
