// ========================================================================================
//
//                              TABULAR INPUT AND OUTPUT
//
// ========================================================================================
//
// ### Purpose ###
//
// Reads the comma-separated tables the cascade consumes (patient roster, per-note
// feature table, reference training tables, previously scored events) into the
// typed structures of `types.rs`, and renders every result back into a polars
// `DataFrame` for persistence. Nothing in this file makes a modelling decision.

use crate::cascade::trajectory::TrajectoryPoint;
use crate::config::{EventColumns, NoteColumns, RosterColumns};
use crate::timeline::aggregate::SubjectBinAggregate;
use crate::types::{
    FeatureTable, NoteKey, NoteResult, PatientResult, Roster, RosterEntry, RosterError,
    ScoredEvent, SubjectId, TableError,
};
use ahash::AHashSet;
use chrono::NaiveDate;
use ndarray::Array2;
use polars::prelude::*;
use std::fs::File;
use std::path::Path;
use thiserror::Error;

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Suffix polars appends to repeated header names while reading a CSV file.
const DUPLICATE_HEADER_MARKER: &str = "_duplicated_";

/// A comprehensive error type for all table loading and writing failures.
#[derive(Error, Debug)]
pub enum DataError {
    #[error("Error from the underlying Polars DataFrame library: {0}")]
    PolarsError(#[from] PolarsError),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error(
        "The required column '{0}' was not found in the input file. Please check spelling and case."
    )]
    ColumnNotFound(String),
    #[error(
        "The column '{column_name}' could not be converted to the expected type '{expected_type}'. (Found type: {found_type})"
    )]
    ColumnWrongType {
        column_name: String,
        expected_type: &'static str,
        found_type: String,
    },
    #[error(
        "Missing or null values were found in the required column '{0}'. This table requires complete data with no missing values."
    )]
    MissingValuesFound(String),
    #[error(
        "Non-finite values (NaN or Infinity) were found in the column '{0}'. All feature values must be finite."
    )]
    NonFiniteValuesFound(String),
    #[error("Row {row} of column '{column}' holds '{value}', which is not a YYYY-MM-DD date.")]
    InvalidDate {
        column: String,
        row: usize,
        value: String,
    },
    #[error(
        "Row {row} of column '{column}' holds '{value}'. Binary columns accept 0/1, true/false or YES/NO."
    )]
    InvalidFlag {
        column: String,
        row: usize,
        value: String,
    },
    #[error(transparent)]
    Roster(#[from] RosterError),
    #[error(transparent)]
    Table(#[from] TableError),
}

// ========================================================================================
//                                   Reading tables
// ========================================================================================

/// Reads a comma-separated file with a header row.
pub fn read_csv(path: &Path) -> Result<DataFrame, DataError> {
    log::debug!("Loading table from '{}'", path.display());
    let df = CsvReader::new(File::open(path)?)
        .with_options(
            CsvReadOptions::default()
                .with_has_header(true)
                .with_parse_options(CsvParseOptions::default().with_separator(b',')),
        )
        .finish()?;
    Ok(df)
}

pub fn load_roster(path: &Path, columns: &RosterColumns) -> Result<Roster, DataError> {
    roster_from_frame(&read_csv(path)?, columns)
}

/// Builds the roster from a frame. Repeated identical rows collapse to one;
/// a subject listed with two different anchor dates is an error.
pub fn roster_from_frame(df: &DataFrame, columns: &RosterColumns) -> Result<Roster, DataError> {
    let subjects = required_strings(df, &columns.subject)?;
    let anchors = date_values(df, &columns.anchor_date)?;

    let mut seen = AHashSet::with_capacity(subjects.len());
    let entries: Vec<RosterEntry> = subjects
        .into_iter()
        .zip(anchors)
        .filter(|(subject, anchor)| seen.insert((subject.clone(), *anchor)))
        .map(|(subject, anchor)| RosterEntry {
            subject: SubjectId::new(subject),
            anchor,
        })
        .collect();
    Ok(Roster::new(entries)?)
}

pub fn load_note_features(
    path: &Path,
    columns: &NoteColumns,
) -> Result<FeatureTable<NoteKey>, DataError> {
    note_features_from_frame(&read_csv(path)?, columns)
}

/// Splits a per-note frame into keys and a feature block. Every column that
/// is not a key column is a feature. Missing feature values are kept as NaN;
/// the baseline stage decides how to fill them.
pub fn note_features_from_frame(
    df: &DataFrame,
    columns: &NoteColumns,
) -> Result<FeatureTable<NoteKey>, DataError> {
    let subjects = required_strings(df, &columns.subject)?;
    let dates = date_values(df, &columns.date)?;
    let note_ids: Vec<Option<String>> = if has_column(df, &columns.note_id) {
        optional_strings(df, &columns.note_id)?
    } else {
        vec![None; df.height()]
    };

    let keys: Vec<NoteKey> = subjects
        .into_iter()
        .zip(dates)
        .zip(note_ids)
        .map(|((subject, date), note_id)| NoteKey {
            subject: SubjectId::new(subject),
            date,
            note_id,
        })
        .collect();

    let key_columns = [
        columns.subject.as_str(),
        columns.date.as_str(),
        columns.note_id.as_str(),
    ];
    let header = column_names(df);
    let (feature_names, names): (Vec<String>, Vec<String>) = header
        .iter()
        .cloned()
        .zip(original_names(&header))
        .filter(|(raw, _)| !key_columns.contains(&raw.as_str()))
        .unzip();
    let values = feature_matrix(df, &feature_names, false)?;
    Ok(FeatureTable::new(keys, names, values)?)
}

/// Reads the reference training features. Every column is a feature and every
/// value must be present and finite. Rows are keyed by position.
pub fn load_reference_features(path: &Path) -> Result<FeatureTable<usize>, DataError> {
    let df = read_csv(path)?;
    let names = column_names(&df);
    let values = feature_matrix(&df, &names, true)?;
    let names = original_names(&names);
    Ok(FeatureTable::new((0..df.height()).collect(), names, values)?)
}

/// Reads binary reference outcomes from `label_column`.
pub fn load_reference_labels(path: &Path, label_column: &str) -> Result<Vec<bool>, DataError> {
    flag_values(&read_csv(path)?, label_column)
}

pub fn load_scored_events(
    path: &Path,
    columns: &EventColumns,
) -> Result<Vec<ScoredEvent>, DataError> {
    events_from_frame(&read_csv(path)?, columns)
}

/// Reads scored events, for example a saved baseline-score table.
pub fn events_from_frame(
    df: &DataFrame,
    columns: &EventColumns,
) -> Result<Vec<ScoredEvent>, DataError> {
    let subjects = required_strings(df, &columns.subject)?;
    let dates = date_values(df, &columns.date)?;
    let decisions = flag_values(df, &columns.decision)?;
    let probabilities = numeric_values(df, &columns.probability, true)?;

    Ok(subjects
        .into_iter()
        .zip(dates)
        .zip(decisions.into_iter().zip(probabilities))
        .map(|((subject, date), (decision, probability))| ScoredEvent {
            subject: SubjectId::new(subject),
            date,
            decision,
            probability,
        })
        .collect())
}

// ========================================================================================
//                                 Column extraction
// ========================================================================================

fn column_names(df: &DataFrame) -> Vec<String> {
    df.get_column_names()
        .into_iter()
        .map(|name| name.to_string())
        .collect()
}

fn has_column(df: &DataFrame, name: &str) -> bool {
    df.get_column_names().iter().any(|c| c.as_str() == name)
}

fn get_column<'a>(df: &'a DataFrame, name: &str) -> Result<&'a Column, DataError> {
    df.column(name)
        .map_err(|_| DataError::ColumnNotFound(name.to_string()))
}

/// The stem of a name shaped like polars' rename of a repeated header.
fn duplicate_stem(name: &str) -> Option<&str> {
    let at = name.rfind(DUPLICATE_HEADER_MARKER)?;
    let suffix = &name[at + DUPLICATE_HEADER_MARKER.len()..];
    (!suffix.is_empty() && suffix.chars().all(|c| c.is_ascii_digit())).then_some(&name[..at])
}

/// Restores header names that polars renamed because they repeated. A name is
/// only restored when its stem appears earlier in the same header.
fn original_names(header: &[String]) -> Vec<String> {
    let mut seen: AHashSet<&str> = AHashSet::with_capacity(header.len());
    header
        .iter()
        .map(|name| {
            let restored = match duplicate_stem(name) {
                Some(stem) if seen.contains(stem) => stem.to_string(),
                _ => name.clone(),
            };
            seen.insert(name.as_str());
            restored
        })
        .collect()
}

fn optional_strings(df: &DataFrame, name: &str) -> Result<Vec<Option<String>>, DataError> {
    let series = get_column(df, name)?;
    let casted = series
        .cast(&DataType::String)
        .map_err(|_| DataError::ColumnWrongType {
            column_name: name.to_string(),
            expected_type: "string",
            found_type: series.dtype().to_string(),
        })?;
    Ok(casted
        .str()?
        .into_iter()
        .map(|value| {
            value
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        })
        .collect())
}

fn required_strings(df: &DataFrame, name: &str) -> Result<Vec<String>, DataError> {
    optional_strings(df, name)?
        .into_iter()
        .map(|value| value.ok_or_else(|| DataError::MissingValuesFound(name.to_string())))
        .collect()
}

fn parse_date(value: &str) -> Option<NaiveDate> {
    // Timestamps such as "2020-01-01 00:00:00" keep only their date part.
    let date_part = value.get(..10)?;
    match value.as_bytes().get(10) {
        None | Some(b' ') | Some(b'T') => NaiveDate::parse_from_str(date_part, DATE_FORMAT).ok(),
        Some(_) => None,
    }
}

fn date_values(df: &DataFrame, name: &str) -> Result<Vec<NaiveDate>, DataError> {
    required_strings(df, name)?
        .into_iter()
        .enumerate()
        .map(|(row, value)| {
            parse_date(&value).ok_or_else(|| DataError::InvalidDate {
                column: name.to_string(),
                row,
                value,
            })
        })
        .collect()
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "1.0" | "true" | "yes" => Some(true),
        "0" | "0.0" | "false" | "no" => Some(false),
        _ => None,
    }
}

fn flag_values(df: &DataFrame, name: &str) -> Result<Vec<bool>, DataError> {
    required_strings(df, name)?
        .into_iter()
        .enumerate()
        .map(|(row, value)| {
            parse_flag(&value).ok_or_else(|| DataError::InvalidFlag {
                column: name.to_string(),
                row,
                value,
            })
        })
        .collect()
}

/// Extracts a numeric column. In strict mode nulls and non-finite values are
/// errors; otherwise nulls become NaN and infinities are still rejected.
fn numeric_values(df: &DataFrame, name: &str, strict: bool) -> Result<Vec<f64>, DataError> {
    let series = get_column(df, name)?;
    if strict && series.null_count() > 0 {
        return Err(DataError::MissingValuesFound(name.to_string()));
    }
    let wrong_type = || DataError::ColumnWrongType {
        column_name: name.to_string(),
        expected_type: "f64 (numeric)",
        found_type: series.dtype().to_string(),
    };
    let casted = series.cast(&DataType::Float64).map_err(|_| wrong_type())?;
    // Values that fail to parse become nulls during the cast.
    if casted.null_count() > series.null_count() {
        return Err(wrong_type());
    }

    let values: Vec<f64> = casted
        .f64()?
        .into_iter()
        .map(|value| value.unwrap_or(f64::NAN))
        .collect();
    let rejected = |v: &f64| if strict { !v.is_finite() } else { v.is_infinite() };
    if values.iter().any(rejected) {
        return Err(DataError::NonFiniteValuesFound(name.to_string()));
    }
    Ok(values)
}

fn feature_matrix(df: &DataFrame, names: &[String], strict: bool) -> Result<Array2<f64>, DataError> {
    let mut matrix = Array2::<f64>::zeros((df.height(), names.len()));
    for (j, name) in names.iter().enumerate() {
        let values = numeric_values(df, name, strict)?;
        for (i, value) in values.into_iter().enumerate() {
            matrix[[i, j]] = value;
        }
    }
    Ok(matrix)
}

// ========================================================================================
//                                   Writing tables
// ========================================================================================

pub fn write_csv(frame: &mut DataFrame, path: &Path) -> Result<(), DataError> {
    let mut file = File::create(path)?;
    CsvWriter::new(&mut file)
        .include_header(true)
        .with_separator(b',')
        .finish(frame)?;
    log::debug!("Wrote {} rows to '{}'", frame.height(), path.display());
    Ok(())
}

fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

fn flag(value: bool) -> i32 {
    i32::from(value)
}

/// `PatientID, Date, baseline_answer, baseline_probability, adjusted_answer, adjusted_probability`
///
/// Output headers are fixed and do not follow the input column bindings.
pub fn notes_frame(notes: &[NoteResult]) -> Result<DataFrame, DataError> {
    let df = DataFrame::new(vec![
        Series::new(
            "PatientID".into(),
            notes.iter().map(|n| n.key.subject.to_string()).collect::<Vec<_>>(),
        )
        .into(),
        Series::new(
            "Date".into(),
            notes.iter().map(|n| format_date(n.key.date)).collect::<Vec<_>>(),
        )
        .into(),
        Series::new(
            "baseline_answer".into(),
            notes.iter().map(|n| flag(n.baseline_decision)).collect::<Vec<_>>(),
        )
        .into(),
        Series::new(
            "baseline_probability".into(),
            notes.iter().map(|n| n.baseline_probability).collect::<Vec<_>>(),
        )
        .into(),
        Series::new(
            "adjusted_answer".into(),
            notes.iter().map(|n| flag(n.adjusted_decision)).collect::<Vec<_>>(),
        )
        .into(),
        Series::new(
            "adjusted_probability".into(),
            notes.iter().map(|n| n.adjusted_probability).collect::<Vec<_>>(),
        )
        .into(),
    ])?;
    Ok(df)
}

/// `PatientID, admit_date, prediction, probability`
///
/// Output headers are fixed and do not follow the input column bindings.
pub fn patients_frame(patients: &[PatientResult]) -> Result<DataFrame, DataError> {
    let df = DataFrame::new(vec![
        Series::new(
            "PatientID".into(),
            patients.iter().map(|p| p.subject.to_string()).collect::<Vec<_>>(),
        )
        .into(),
        Series::new(
            "admit_date".into(),
            patients.iter().map(|p| format_date(p.anchor)).collect::<Vec<_>>(),
        )
        .into(),
        Series::new(
            "prediction".into(),
            patients.iter().map(|p| flag(p.decision)).collect::<Vec<_>>(),
        )
        .into(),
        Series::new(
            "probability".into(),
            patients.iter().map(|p| p.probability).collect::<Vec<_>>(),
        )
        .into(),
    ])?;
    Ok(df)
}

/// `PatientID, time_interval, t, hit_count, highest_probability`
pub fn aggregates_frame(aggregates: &[SubjectBinAggregate]) -> Result<DataFrame, DataError> {
    let df = DataFrame::new(vec![
        Series::new(
            "PatientID".into(),
            aggregates.iter().map(|a| a.subject.to_string()).collect::<Vec<_>>(),
        )
        .into(),
        Series::new(
            "time_interval".into(),
            aggregates.iter().map(|a| a.label.clone()).collect::<Vec<_>>(),
        )
        .into(),
        Series::new(
            "t".into(),
            aggregates.iter().map(|a| a.bin_index as u32).collect::<Vec<_>>(),
        )
        .into(),
        Series::new(
            "hit_count".into(),
            aggregates.iter().map(|a| a.hit_count).collect::<Vec<_>>(),
        )
        .into(),
        Series::new(
            "highest_probability".into(),
            aggregates
                .iter()
                .map(|a| a.representative_probability)
                .collect::<Vec<_>>(),
        )
        .into(),
    ])?;
    Ok(df)
}

/// `PatientID, time_interval, t, baseline_hits, baseline_probability, adjusted_hits, adjusted_probability`
pub fn trajectories_frame(points: &[TrajectoryPoint]) -> Result<DataFrame, DataError> {
    let df = DataFrame::new(vec![
        Series::new(
            "PatientID".into(),
            points.iter().map(|p| p.subject.to_string()).collect::<Vec<_>>(),
        )
        .into(),
        Series::new(
            "time_interval".into(),
            points.iter().map(|p| p.label.clone()).collect::<Vec<_>>(),
        )
        .into(),
        Series::new(
            "t".into(),
            points.iter().map(|p| p.t as u32).collect::<Vec<_>>(),
        )
        .into(),
        Series::new(
            "baseline_hits".into(),
            points.iter().map(|p| p.baseline_hits).collect::<Vec<_>>(),
        )
        .into(),
        Series::new(
            "baseline_probability".into(),
            points.iter().map(|p| p.baseline_probability).collect::<Vec<_>>(),
        )
        .into(),
        Series::new(
            "adjusted_hits".into(),
            points.iter().map(|p| p.adjusted_hits).collect::<Vec<_>>(),
        )
        .into(),
        Series::new(
            "adjusted_probability".into(),
            points.iter().map(|p| p.adjusted_probability).collect::<Vec<_>>(),
        )
        .into(),
    ])?;
    Ok(df)
}

/// The subject column followed by every feature column, in table order.
pub fn patient_features_frame(table: &FeatureTable<SubjectId>) -> Result<DataFrame, DataError> {
    let mut columns: Vec<Column> = Vec::with_capacity(table.ncols() + 1);
    columns.push(
        Series::new(
            "PatientID".into(),
            table.keys().iter().map(SubjectId::to_string).collect::<Vec<_>>(),
        )
        .into(),
    );
    let values = table.values();
    for (j, name) in table.columns().iter().enumerate() {
        columns.push(Series::new(name.as_str().into(), values.column(j).to_vec()).into());
    }
    Ok(DataFrame::new(columns)?)
}
