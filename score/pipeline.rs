// ========================================================================================
//
//                               END-TO-END ORCHESTRATION
//
// ========================================================================================
//
// ### Purpose ###
//
// Wires the three classifier stages together: baseline phenotyping of every note,
// note-level false-positive correction, and patient-level classification over binned
// baseline timelines. Optional trajectory tables are built from the corrected notes.
// A run either completes or returns the first error; nothing is written until every
// stage has succeeded.

use crate::cascade::baseline::{TrainingReference, score_baseline};
use crate::cascade::note_level::correct_notes;
use crate::cascade::patient_level::score_patients;
use crate::cascade::scorer::{LogisticScorer, Scorer, ScorerError};
use crate::cascade::trajectory::{TrajectoryPoint, build_trajectories};
use crate::cascade::CascadeError;
use crate::config::{ArtifactPaths, BinSpec, CascadeConfig, ConfigError};
use crate::io::{
    self, DataError, notes_frame, patients_frame, trajectories_frame, write_csv,
};
use crate::timeline::aggregate::{SubjectBinAggregate, aggregate_events};
use crate::timeline::bins::make_bins;
use crate::types::{FeatureTable, NoteKey, NoteResult, PatientResult, Roster};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const NOTE_LEVEL_FILE: &str = "note_level_predictions.csv";
pub const PATIENT_LEVEL_FILE: &str = "patient_level_predictions.csv";
pub const TRAJECTORY_FILE: &str = "trajectories.csv";

// ========================================================================================
//                          Public API, context & error handling
// ========================================================================================

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Failed to load input data: {0}")]
    Data(#[from] DataError),
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("Failed to load classifier artifact '{path}': {source}")]
    Artifact {
        path: PathBuf,
        #[source]
        source: ScorerError,
    },
    #[error("Scoring failed: {0}")]
    Cascade(#[from] CascadeError),
    #[error("I/O error during pipeline execution: {0}")]
    Io(#[from] std::io::Error),
}

/// The three pre-trained classifiers of one run.
#[derive(Clone, Copy)]
pub struct CascadeModels<'a> {
    pub baseline: &'a dyn Scorer,
    pub note_corrector: &'a dyn Scorer,
    pub patient_classifier: &'a dyn Scorer,
}

/// Classifier artifacts and the baseline reference set, loaded from a model directory.
#[derive(Debug, Clone)]
pub struct LoadedArtifacts {
    pub baseline: LogisticScorer,
    pub note_corrector: LogisticScorer,
    pub patient_classifier: LogisticScorer,
    pub reference: TrainingReference,
}

impl LoadedArtifacts {
    pub fn models(&self) -> CascadeModels<'_> {
        CascadeModels {
            baseline: &self.baseline,
            note_corrector: &self.note_corrector,
            patient_classifier: &self.patient_classifier,
        }
    }
}

pub fn load_artifacts(
    model_dir: &Path,
    paths: &ArtifactPaths,
) -> Result<LoadedArtifacts, PipelineError> {
    let scorer = |file: &Path| {
        let path = model_dir.join(file);
        LogisticScorer::load(&path).map_err(|source| PipelineError::Artifact { path, source })
    };
    let baseline = scorer(&paths.baseline_model)?;
    let note_corrector = scorer(&paths.note_corrector)?;
    let patient_classifier = scorer(&paths.patient_classifier)?;

    let features = io::load_reference_features(&model_dir.join(&paths.training_features))?;
    let labels = io::load_reference_labels(
        &model_dir.join(&paths.training_labels),
        &paths.label_column,
    )?;
    let reference = TrainingReference::new(features, labels)?;

    log::info!(
        "Loaded classifiers and {} reference rows from '{}'",
        reference.labels().len(),
        model_dir.display()
    );
    Ok(LoadedArtifacts {
        baseline,
        note_corrector,
        patient_classifier,
        reference,
    })
}

/// Everything one run produces.
#[derive(Debug, Clone, PartialEq)]
pub struct CascadeOutput {
    pub baseline_threshold: f64,
    pub notes: Vec<NoteResult>,
    pub patients: Vec<PatientResult>,
    /// Present when trajectories are enabled in the configuration.
    pub trajectories: Option<Vec<TrajectoryPoint>>,
}

impl CascadeOutput {
    /// Writes the note-level, patient-level and (when present) trajectory
    /// tables into `dir`, creating it if needed. Returns the written paths.
    pub fn write_tables(&self, dir: &Path) -> Result<Vec<PathBuf>, PipelineError> {
        fs::create_dir_all(dir)?;
        let mut written = Vec::with_capacity(3);

        let path = dir.join(NOTE_LEVEL_FILE);
        write_csv(&mut notes_frame(&self.notes)?, &path)?;
        written.push(path);

        let path = dir.join(PATIENT_LEVEL_FILE);
        write_csv(&mut patients_frame(&self.patients)?, &path)?;
        written.push(path);

        if let Some(points) = &self.trajectories {
            let path = dir.join(TRAJECTORY_FILE);
            write_csv(&mut trajectories_frame(points)?, &path)?;
            written.push(path);
        }

        log::info!("Wrote {} output tables to '{}'", written.len(), dir.display());
        Ok(written)
    }
}

// ========================================================================================
//                                    Orchestration
// ========================================================================================

/// Runs every stage on in-memory inputs.
pub fn run_cascade(
    roster: &Roster,
    notes: &FeatureTable<NoteKey>,
    models: CascadeModels<'_>,
    reference: &TrainingReference,
    config: &CascadeConfig,
) -> Result<CascadeOutput, PipelineError> {
    config.validate()?;

    log::info!("running baseline phenotyping");
    let baseline = score_baseline(notes, models.baseline, reference, &config.baseline)?;

    log::info!("running note-level identification");
    let corrected = correct_notes(&baseline, models.note_corrector, &config.note_level)?;

    log::info!("running patient-level identification");
    let patients = score_patients(
        roster,
        &corrected,
        models.patient_classifier,
        &config.patient_level,
    )?;

    let trajectories = if config.trajectory.enabled {
        Some(build_trajectories(roster, &corrected, &config.trajectory)?)
    } else {
        None
    };

    Ok(CascadeOutput {
        baseline_threshold: baseline.threshold,
        notes: corrected,
        patients,
        trajectories,
    })
}

/// Loads the roster, the note features and the model directory, then runs every stage.
pub fn run_from_files(
    roster_path: &Path,
    notes_path: &Path,
    model_dir: &Path,
    config: &CascadeConfig,
) -> Result<CascadeOutput, PipelineError> {
    let roster = io::load_roster(roster_path, &config.roster_columns)?;
    let notes = io::load_note_features(notes_path, &config.note_columns)?;
    log::info!(
        "Loaded {} patients and {} notes with {} feature columns",
        roster.len(),
        notes.nrows(),
        notes.ncols()
    );
    let artifacts = load_artifacts(model_dir, &config.artifacts)?;
    run_cascade(
        &roster,
        &notes,
        artifacts.models(),
        &artifacts.reference,
        config,
    )
}

/// Bins a table of previously scored events, such as a saved baseline-score
/// table, against the roster's anchor dates.
pub fn aggregate_from_files(
    roster_path: &Path,
    events_path: &Path,
    bins: BinSpec,
    config: &CascadeConfig,
) -> Result<Vec<SubjectBinAggregate>, PipelineError> {
    config.validate()?;
    let bins = make_bins(bins.window, bins.n_years).map_err(CascadeError::from)?;
    let roster = io::load_roster(roster_path, &config.roster_columns)?;
    let events = io::load_scored_events(events_path, &config.event_columns)?;
    log::info!(
        "Binning {} scored events for {} patients into {} time blocks",
        events.len(),
        roster.len(),
        bins.len()
    );
    let aggregates =
        aggregate_events(&events, &roster.anchor_dates(), &bins).map_err(CascadeError::from)?;
    Ok(aggregates)
}
