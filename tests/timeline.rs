use chrono::NaiveDate;
use epitrace::io::{aggregates_frame, patient_features_frame};
use epitrace::timeline::aggregate::{NO_INFORMATION_PROBABILITY, aggregate_events};
use epitrace::timeline::bins::{Window, make_bins};
use epitrace::timeline::pivot::{PivotError, pivot_features};
use epitrace::types::{AnchorDates, ScoredEvent, SubjectId};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn event(subject: &str, day: NaiveDate, decision: bool, probability: f64) -> ScoredEvent {
    ScoredEvent {
        subject: subject.into(),
        date: day,
        decision,
        probability,
    }
}

fn anchors(list: &[(&str, NaiveDate)]) -> AnchorDates {
    list.iter()
        .map(|(subject, anchor)| (SubjectId::from(*subject), *anchor))
        .collect()
}

#[test]
fn weekly_scenario_from_bins_to_features() {
    init_logging();
    let bins = make_bins(Window::Week, 2).unwrap();
    assert_eq!(bins.len(), 104);
    assert_eq!(bins.bins()[0].label, "0to1week");
    assert_eq!(bins.bins()[103].label, "103to104week");

    let events = vec![
        event("A", date(2020, 1, 1), true, 0.9),
        event("A", date(2020, 1, 8), true, 0.7),
    ];
    let anchors = anchors(&[("A", date(2020, 1, 1)), ("B", date(2020, 1, 1))]);
    let aggregates = aggregate_events(&events, &anchors, &bins).unwrap();
    assert_eq!(aggregates.len(), 2 * 104);

    let a_first = aggregates
        .iter()
        .find(|a| a.subject.as_str() == "A" && a.label == "0to1week")
        .unwrap();
    assert_eq!(a_first.hit_count, 2);
    assert_eq!(a_first.representative_probability, 0.9);

    // The shared boundary day belongs to both adjacent weeks.
    let a_second = aggregates
        .iter()
        .find(|a| a.subject.as_str() == "A" && a.label == "1to2week")
        .unwrap();
    assert_eq!(a_second.hit_count, 1);
    assert_eq!(a_second.representative_probability, 0.7);

    let b_first = aggregates
        .iter()
        .find(|a| a.subject.as_str() == "B" && a.label == "0to1week")
        .unwrap();
    assert_eq!(b_first.hit_count, 0);
    assert_eq!(b_first.representative_probability, NO_INFORMATION_PROBABILITY);

    let features = pivot_features(&aggregates, &bins.labels()).unwrap();
    assert_eq!(features.nrows(), 2);
    assert_eq!(features.ncols(), 2 * 104);

    let frame = patient_features_frame(&features).unwrap();
    assert_eq!(frame.width(), 2 * 104 + 1);
    let long = aggregates_frame(&aggregates).unwrap();
    assert_eq!(long.height(), 2 * 104);
}

#[test]
fn aggregation_is_deterministic_across_runs() {
    let bins = make_bins(Window::Month, 2).unwrap();
    let anchors = anchors(&[
        ("3", date(2019, 1, 31)),
        ("12", date(2019, 6, 15)),
        ("1", date(2020, 2, 29)),
    ]);
    let events: Vec<ScoredEvent> = (0..200)
        .map(|i| {
            let subject = ["3", "12", "1"][i % 3];
            let day = date(2019, 1, 1) + chrono::Days::new((i * 5) as u64);
            event(subject, day, i % 4 == 0, (i % 10) as f64 / 10.0)
        })
        .collect();

    let first = aggregate_events(&events, &anchors, &bins).unwrap();
    for _ in 0..5 {
        assert_eq!(aggregate_events(&events, &anchors, &bins).unwrap(), first);
    }

    let order: Vec<(usize, &str)> = first
        .iter()
        .take(3)
        .map(|a| (a.bin_index, a.subject.as_str()))
        .collect();
    assert_eq!(order, vec![(0, "1"), (0, "3"), (0, "12")]);

    let positives = events.iter().filter(|e| e.decision).count() as u32;
    for subject in ["1", "3", "12"] {
        for aggregate in first.iter().filter(|a| a.subject.as_str() == subject) {
            assert!(aggregate.hit_count <= positives);
            assert!((0.0..=1.0).contains(&aggregate.representative_probability));
        }
    }
}

#[test]
fn pivot_refuses_an_incomplete_timeline() {
    let bins = make_bins(Window::SixMonth, 1).unwrap();
    let anchors = anchors(&[("1", date(2020, 1, 1))]);
    let mut aggregates = aggregate_events(&[], &anchors, &bins).unwrap();
    aggregates.pop();
    assert!(matches!(
        pivot_features(&aggregates, &bins.labels()),
        Err(PivotError::MissingFeature { .. })
    ));
}
