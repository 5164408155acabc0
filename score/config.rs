//! # Run Configuration
//!
//! Every tunable of the cascade lives in a typed structure with defaults that
//! reproduce the published pipeline. A configuration file is TOML; an empty
//! file is a valid configuration. Unknown bin window keywords are rejected
//! while the file is parsed, before anything is scored.

use crate::cascade::threshold::{ThresholdError, ThresholdPolicy};
use crate::timeline::bins::{BinError, Window, make_bins};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Diagnosis, demographic and medication columns of the baseline training
/// table. They leak the outcome label and are never used for scoring notes.
pub const BASELINE_LEAKAGE_COLUMNS: [&str; 39] = [
    "convulsions seizures",
    "epilepsy and recurrent seizures",
    "syncope",
    "n_icds",
    "Age",
    "Sex",
    "n_meds",
    "Acetazolamide",
    "Brivaracetam",
    "Cannabidiol",
    "carbamezapine",
    "cenobamate",
    "clobazam",
    "clonazepam",
    "clorazepate",
    "diazepam",
    "eslicarbazepine",
    "ethosuximide",
    "ezogabine",
    "felbamate",
    "gabapentin",
    "ketamine",
    "lacosamide",
    "lamotrigine",
    "levetiracetam",
    "lorazepam",
    "methsuximide",
    "midazolam",
    "oxcarbazepine",
    "perampanel",
    "phenobarbital",
    "phenytoin",
    "pregabalin",
    "primidone",
    "rufinamide",
    "tiagabine",
    "topiramate",
    "valproic acid",
    "zonisamide",
];

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read or write configuration file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse TOML configuration: {0}")]
    TomlParseError(#[from] toml::de::Error),
    #[error("Failed to serialize configuration to TOML format: {0}")]
    TomlSerializeError(#[from] toml::ser::Error),
    #[error("Invalid threshold for the {stage} stage: {source}")]
    Threshold {
        stage: &'static str,
        #[source]
        source: ThresholdError,
    },
    #[error("Invalid bins for the {stage} stage: {source}")]
    Bins {
        stage: &'static str,
        #[source]
        source: BinError,
    },
    #[error("Column binding '{0}' must not be empty.")]
    EmptyColumnName(&'static str),
}

/// A bin window and horizon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BinSpec {
    pub window: Window,
    pub n_years: u32,
}

/// Column bindings for a table of scored events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventColumns {
    pub subject: String,
    pub date: String,
    pub decision: String,
    pub probability: String,
}

impl Default for EventColumns {
    fn default() -> Self {
        Self {
            subject: "PatientID".to_string(),
            date: "Date".to_string(),
            decision: "model_answer".to_string(),
            probability: "prob_YES".to_string(),
        }
    }
}

/// Column bindings for the patient roster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RosterColumns {
    pub subject: String,
    pub anchor_date: String,
}

impl Default for RosterColumns {
    fn default() -> Self {
        Self {
            subject: "PatientID".to_string(),
            anchor_date: "admit_date".to_string(),
        }
    }
}

/// Key columns of the per-note feature table. Every other column is a feature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NoteColumns {
    pub subject: String,
    pub date: String,
    /// Read when present in the file; notes are still keyed by subject and date without it.
    pub note_id: String,
}

impl Default for NoteColumns {
    fn default() -> Self {
        Self {
            subject: "PatientID".to_string(),
            date: "Date".to_string(),
            note_id: "NoteID".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BaselineConfig {
    pub excluded_columns: Vec<String>,
    pub threshold: ThresholdPolicy,
}

impl Default for BaselineConfig {
    fn default() -> Self {
        Self {
            excluded_columns: BASELINE_LEAKAGE_COLUMNS
                .iter()
                .map(|c| c.to_string())
                .collect(),
            threshold: ThresholdPolicy::MaxFScore,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NoteLevelConfig {
    pub threshold: f64,
}

impl Default for NoteLevelConfig {
    fn default() -> Self {
        Self { threshold: 0.5 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PatientLevelConfig {
    pub bins: BinSpec,
    pub threshold: f64,
}

impl Default for PatientLevelConfig {
    fn default() -> Self {
        Self {
            bins: BinSpec {
                window: Window::ThreeMonth,
                n_years: 2,
            },
            threshold: 0.3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrajectoryConfig {
    pub enabled: bool,
    pub bins: BinSpec,
}

impl Default for TrajectoryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bins: BinSpec {
                window: Window::Week,
                n_years: 2,
            },
        }
    }
}

/// File names of the pre-trained artifacts, relative to a model directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArtifactPaths {
    pub baseline_model: PathBuf,
    pub note_corrector: PathBuf,
    pub patient_classifier: PathBuf,
    pub training_features: PathBuf,
    pub training_labels: PathBuf,
    pub label_column: String,
}

impl Default for ArtifactPaths {
    fn default() -> Self {
        Self {
            baseline_model: PathBuf::from("baseline_model.toml"),
            note_corrector: PathBuf::from("note_corrector.toml"),
            patient_classifier: PathBuf::from("patient_classifier.toml"),
            training_features: PathBuf::from("X_train.csv"),
            training_labels: PathBuf::from("y_train.csv"),
            label_column: "outcome".to_string(),
        }
    }
}

/// The complete blueprint of one scoring run.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CascadeConfig {
    pub roster_columns: RosterColumns,
    pub note_columns: NoteColumns,
    pub event_columns: EventColumns,
    pub baseline: BaselineConfig,
    pub note_level: NoteLevelConfig,
    pub patient_level: PatientLevelConfig,
    pub trajectory: TrajectoryConfig,
    pub artifacts: ArtifactPaths,
}

impl CascadeConfig {
    /// Loads a configuration from a TOML file and validates it.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let toml_string = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&toml_string)?;
        config.validate()?;
        Ok(config)
    }

    /// Saves the configuration in a human-readable TOML format.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let toml_string = toml::to_string_pretty(self)?;
        let mut file = BufWriter::new(fs::File::create(path)?);
        file.write_all(toml_string.as_bytes())?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let threshold = |stage, policy: ThresholdPolicy| {
            policy
                .validate()
                .map_err(|source| ConfigError::Threshold { stage, source })
        };
        threshold("baseline", self.baseline.threshold)?;
        threshold(
            "note-level",
            ThresholdPolicy::Fixed {
                value: self.note_level.threshold,
            },
        )?;
        threshold(
            "patient-level",
            ThresholdPolicy::Fixed {
                value: self.patient_level.threshold,
            },
        )?;

        let bins = |stage, requested: BinSpec| {
            make_bins(requested.window, requested.n_years)
                .map(|_| ())
                .map_err(|source| ConfigError::Bins { stage, source })
        };
        bins("patient-level", self.patient_level.bins)?;
        bins("trajectory", self.trajectory.bins)?;

        let bindings = [
            ("roster_columns.subject", &self.roster_columns.subject),
            ("roster_columns.anchor_date", &self.roster_columns.anchor_date),
            ("note_columns.subject", &self.note_columns.subject),
            ("note_columns.date", &self.note_columns.date),
            ("note_columns.note_id", &self.note_columns.note_id),
            ("event_columns.subject", &self.event_columns.subject),
            ("event_columns.date", &self.event_columns.date),
            ("event_columns.decision", &self.event_columns.decision),
            ("event_columns.probability", &self.event_columns.probability),
            ("artifacts.label_column", &self.artifacts.label_column),
        ];
        for (name, value) in bindings {
            if value.trim().is_empty() {
                return Err(ConfigError::EmptyColumnName(name));
            }
        }
        Ok(())
    }
}
