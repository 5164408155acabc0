//! Per-patient probability trajectories: baseline and corrected note scores
//! binned on the same calendar so the two curves can be compared bin by bin.

use super::CascadeError;
use super::patient_level::roster_events;
use crate::config::TrajectoryConfig;
use crate::timeline::aggregate::aggregate_events;
use crate::timeline::bins::make_bins;
use crate::types::{NoteResult, Roster, SubjectId};

#[derive(Debug, Clone, PartialEq)]
pub struct TrajectoryPoint {
    pub subject: SubjectId,
    /// Bin label, e.g. `3to4week`.
    pub label: String,
    /// Bin position, counted from the anchor date.
    pub t: usize,
    pub baseline_hits: u32,
    pub baseline_probability: f64,
    pub adjusted_hits: u32,
    pub adjusted_probability: f64,
}

/// One point per (roster patient, bin), ordered by bin then subject.
pub fn build_trajectories(
    roster: &Roster,
    notes: &[NoteResult],
    config: &TrajectoryConfig,
) -> Result<Vec<TrajectoryPoint>, CascadeError> {
    let bins = make_bins(config.bins.window, config.bins.n_years)?;
    let anchors = roster.anchor_dates();

    let baseline_events = roster_events(roster, notes, |note| {
        (note.baseline_decision, note.baseline_probability)
    });
    let adjusted_events = roster_events(roster, notes, |note| {
        (note.adjusted_decision, note.adjusted_probability)
    });
    let baseline = aggregate_events(&baseline_events, &anchors, &bins)?;
    let adjusted = aggregate_events(&adjusted_events, &anchors, &bins)?;

    // Same subjects and bins on both sides, so the two runs line up row for row.
    let points: Vec<TrajectoryPoint> = baseline
        .into_iter()
        .zip(adjusted)
        .map(|(base, adj)| TrajectoryPoint {
            subject: base.subject,
            label: base.label,
            t: base.bin_index,
            baseline_hits: base.hit_count,
            baseline_probability: base.representative_probability,
            adjusted_hits: adj.hit_count,
            adjusted_probability: adj.representative_probability,
        })
        .collect();

    log::debug!(
        "built {} trajectory points for {} patients over {} bins",
        points.len(),
        roster.len(),
        bins.len()
    );
    Ok(points)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BinSpec;
    use crate::timeline::aggregate::NO_INFORMATION_PROBABILITY;
    use crate::timeline::bins::Window;
    use crate::types::{NoteKey, RosterEntry};
    use chrono::NaiveDate;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn baseline_and_adjusted_curves_share_bins() {
        let roster = Roster::new(vec![
            RosterEntry {
                subject: "1".into(),
                anchor: date(2021, 6, 1),
            },
            RosterEntry {
                subject: "2".into(),
                anchor: date(2021, 6, 1),
            },
        ])
        .unwrap();
        let notes = vec![NoteResult {
            key: NoteKey {
                subject: "1".into(),
                date: date(2021, 6, 3),
                note_id: None,
            },
            baseline_decision: true,
            baseline_probability: 0.9,
            adjusted_decision: false,
            adjusted_probability: 0.2,
        }];
        let config = TrajectoryConfig {
            enabled: true,
            bins: BinSpec {
                window: Window::Month,
                n_years: 1,
            },
        };

        let points = build_trajectories(&roster, &notes, &config).unwrap();
        assert_eq!(points.len(), 2 * 12);

        let first = &points[0];
        assert_eq!(first.subject.as_str(), "1");
        assert_eq!(first.label, "0to1month");
        assert_eq!(first.t, 0);
        assert_eq!((first.baseline_hits, first.adjusted_hits), (1, 0));
        assert_eq!(first.baseline_probability, 0.9);
        assert_eq!(first.adjusted_probability, 0.2);

        let untouched = &points[1];
        assert_eq!(untouched.subject.as_str(), "2");
        assert_eq!(untouched.baseline_probability, NO_INFORMATION_PROBABILITY);
        assert_eq!(untouched.adjusted_probability, NO_INFORMATION_PROBABILITY);

        assert!(points.windows(2).all(|w| w[0].t <= w[1].t));
    }
}
