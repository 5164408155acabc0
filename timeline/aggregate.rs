//! # Temporal Aggregation
//!
//! Joins scored events to per-subject anchor dates and reduces every
//! (subject, bin) pair to a hit count and a representative probability.
//!
//! Bin membership is inclusive at both ends: an event dated exactly on a
//! shared boundary (`end` of bin `i` == `start` of bin `i + 1`) is counted in
//! both adjacent bins. Historical outputs were produced with this rule, so it
//! is kept as-is.

use crate::timeline::bins::{BinSet, TimeBin};
use crate::types::{AnchorDates, ScoredEvent, SubjectId};
use ahash::AHashMap;
use chrono::NaiveDate;
use itertools::Itertools;
use rayon::prelude::*;
use thiserror::Error;

/// Probability assigned to a bin with no events: the base rate of positive
/// classification observed with zero information.
pub const NO_INFORMATION_PROBABILITY: f64 = 0.2138259917276594;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AggregateError {
    #[error(
        "Event for subject '{subject}' on {date} has probability {value}, which is not a finite value in [0, 1]."
    )]
    InvalidProbability {
        subject: SubjectId,
        date: NaiveDate,
        value: f64,
    },
    #[error("Bin '{label}' cannot be placed on the calendar for subject '{subject}': date out of range.")]
    DateOverflow { subject: SubjectId, label: String },
}

/// The reduced features of one subject within one bin.
#[derive(Debug, Clone, PartialEq)]
pub struct SubjectBinAggregate {
    pub subject: SubjectId,
    /// Position of the bin within its [`BinSet`].
    pub bin_index: usize,
    pub label: String,
    /// Number of positive decisions among the events in the bin.
    pub hit_count: u32,
    /// Probability of the highest-probability event in the bin, or
    /// [`NO_INFORMATION_PROBABILITY`] when the bin is empty.
    pub representative_probability: f64,
}

/// Assigns `events` to `bins` relative to each subject's anchor date.
///
/// Every subject in `anchors` and every subject that has events receives one
/// aggregate per bin. Subjects without an anchor date cannot be placed on the
/// calendar, so all of their bins are empty. Output is ordered by bin, then by
/// subject.
pub fn aggregate_events(
    events: &[ScoredEvent],
    anchors: &AnchorDates,
    bins: &BinSet,
) -> Result<Vec<SubjectBinAggregate>, AggregateError> {
    for event in events {
        if !event.probability.is_finite() || !(0.0..=1.0).contains(&event.probability) {
            return Err(AggregateError::InvalidProbability {
                subject: event.subject.clone(),
                date: event.date,
                value: event.probability,
            });
        }
    }

    let timelines = group_by_subject(events);

    let subjects: Vec<&SubjectId> = anchors
        .keys()
        .chain(timelines.keys().copied())
        .sorted()
        .dedup()
        .collect();

    let unanchored = timelines
        .keys()
        .filter(|subject| !anchors.contains_key(**subject))
        .count();
    if unanchored > 0 {
        log::warn!(
            "{unanchored} subject(s) have scored events but no anchor date; their bins are left empty"
        );
    }

    let per_bin: Vec<Vec<SubjectBinAggregate>> = (0..bins.len())
        .into_par_iter()
        .map(|bin_index| {
            let bin = &bins.bins()[bin_index];
            subjects
                .iter()
                .map(|&subject| {
                    let timeline = timelines.get(subject).map(Vec::as_slice).unwrap_or(&[]);
                    aggregate_one(subject, anchors.get(subject).copied(), timeline, bin_index, bin)
                })
                .collect::<Result<Vec<_>, _>>()
        })
        .collect::<Result<Vec<_>, _>>()?;

    let mut rows: Vec<SubjectBinAggregate> = per_bin.into_iter().flatten().collect();
    // Parallel collection order is not relied upon.
    rows.sort_by(|a, b| {
        a.bin_index
            .cmp(&b.bin_index)
            .then_with(|| a.subject.cmp(&b.subject))
    });

    log::debug!(
        "aggregated {} events for {} subjects into {} bins",
        events.len(),
        subjects.len(),
        bins.len()
    );

    Ok(rows)
}

/// Groups events per subject, each group sorted by date so bin windows can be
/// located by binary search.
fn group_by_subject(events: &[ScoredEvent]) -> AHashMap<&SubjectId, Vec<&ScoredEvent>> {
    let mut timelines: AHashMap<&SubjectId, Vec<&ScoredEvent>> = AHashMap::new();
    for event in events {
        timelines.entry(&event.subject).or_default().push(event);
    }
    for timeline in timelines.values_mut() {
        timeline.sort_by_key(|event| event.date);
    }
    timelines
}

fn aggregate_one(
    subject: &SubjectId,
    anchor: Option<NaiveDate>,
    timeline: &[&ScoredEvent],
    bin_index: usize,
    bin: &TimeBin,
) -> Result<SubjectBinAggregate, AggregateError> {
    let in_bin: &[&ScoredEvent] = match anchor {
        Some(anchor) => {
            let (first, last) =
                bin.date_bounds(anchor)
                    .ok_or_else(|| AggregateError::DateOverflow {
                        subject: subject.clone(),
                        label: bin.label.clone(),
                    })?;
            let lo = timeline.partition_point(|event| event.date < first);
            let hi = timeline.partition_point(|event| event.date <= last);
            &timeline[lo..hi.max(lo)]
        }
        None => &[],
    };

    let hit_count = in_bin.iter().filter(|event| event.decision).count() as u32;
    let representative_probability = in_bin
        .iter()
        .map(|event| event.probability)
        .reduce(f64::max)
        .unwrap_or(NO_INFORMATION_PROBABILITY);

    Ok(SubjectBinAggregate {
        subject: subject.clone(),
        bin_index,
        label: bin.label.clone(),
        hit_count,
        representative_probability,
    })
}
