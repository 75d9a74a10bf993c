//! Tests for per-event expansion: windows, overrides and lookups.

use chrono::{DateTime, Duration, TimeZone, Utc};
use schedule_engine::occurrence::Occurrence;
use schedule_engine::rule::{Frequency, RecurrenceRule};
use schedule_engine::{Event, ScheduleError};

fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
}

/// Daily 10:00-11:00 from 2024-01-01, repeating for a week.
fn daily_event() -> Event {
    let rule = RecurrenceRule::new("Daily", Frequency::Daily, "").unwrap();
    Event::new(1, "X", utc(2024, 1, 1, 10, 0), utc(2024, 1, 1, 11, 0))
        .with_id(1)
        .with_rule(rule, utc(2024, 1, 1, 10, 0) + Duration::days(7))
}

fn persisted_override(
    id: i64,
    original: DateTime<Utc>,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Occurrence {
    let mut occ = Occurrence::new(Some(1), "X", "", original, original + Duration::hours(1));
    occ.id = Some(id);
    occ.start = start;
    occ.end = end;
    occ
}

fn starts(occurrences: &[Occurrence]) -> Vec<DateTime<Utc>> {
    occurrences.iter().map(|o| o.start).collect()
}

// ---------------------------------------------------------------------------
// Windows
// ---------------------------------------------------------------------------

#[test]
fn daily_window_returns_intersecting_days() {
    let event = daily_event();
    let occurrences = event
        .get_occurrences(utc(2024, 1, 3, 0, 0), utc(2024, 1, 5, 0, 0))
        .unwrap();

    assert_eq!(
        starts(&occurrences),
        vec![utc(2024, 1, 3, 10, 0), utc(2024, 1, 4, 10, 0)]
    );
    for occ in &occurrences {
        assert_eq!(occ.end - occ.start, Duration::hours(1));
        assert_eq!(occ.title, "X");
        assert_eq!(occ.event_id, Some(1));
        assert!(!occ.persisted());
    }
}

#[test]
fn single_event_is_returned_only_when_it_intersects() {
    let event = Event::new(1, "Lunch", utc(2024, 1, 1, 10, 0), utc(2024, 1, 1, 11, 0));

    let cases = [
        (utc(2024, 1, 1, 9, 0), utc(2024, 1, 1, 10, 0), 0),
        (utc(2024, 1, 1, 11, 0), utc(2024, 1, 1, 12, 0), 0),
        (utc(2024, 1, 1, 10, 30), utc(2024, 1, 1, 10, 31), 1),
        (utc(2024, 1, 1, 0, 0), utc(2024, 1, 2, 0, 0), 1),
    ];
    for (start, end, expected) in cases {
        let got = event.get_occurrences(start, end).unwrap().len();
        assert_eq!(got, expected, "window {start} -- {end}");
    }
}

#[test]
fn empty_window_is_empty() {
    let event = daily_event();
    let at = utc(2024, 1, 3, 10, 0);
    assert!(event.get_occurrences(at, at).unwrap().is_empty());
    assert!(event.get_occurrences(at, at - Duration::hours(1)).unwrap().is_empty());
}

#[test]
fn all_occurrences_runs_to_inclusive_horizon() {
    let occurrences = daily_event().all_occurrences().unwrap();
    assert_eq!(occurrences.len(), 8);
    assert_eq!(occurrences.last().unwrap().start, utc(2024, 1, 8, 10, 0));
}

// ---------------------------------------------------------------------------
// Overrides
// ---------------------------------------------------------------------------

#[test]
fn moved_override_replaces_its_slot() {
    let moved = persisted_override(
        7,
        utc(2024, 1, 4, 10, 0),
        utc(2024, 1, 4, 14, 0),
        utc(2024, 1, 4, 15, 0),
    );
    let event = daily_event().with_overrides(vec![moved.clone()]);

    let occurrences = event
        .get_occurrences(utc(2024, 1, 4, 0, 0), utc(2024, 1, 5, 0, 0))
        .unwrap();
    assert_eq!(occurrences, vec![moved]);
}

#[test]
fn override_moved_out_of_window_hides_the_slot() {
    let moved = persisted_override(
        7,
        utc(2024, 1, 4, 10, 0),
        utc(2024, 1, 6, 10, 0),
        utc(2024, 1, 6, 11, 0),
    );
    let event = daily_event().with_overrides(vec![moved]);

    let jan_4 = event
        .get_occurrences(utc(2024, 1, 4, 0, 0), utc(2024, 1, 5, 0, 0))
        .unwrap();
    assert!(jan_4.is_empty(), "the slot moved away from Jan 4");

    let jan_6 = event
        .get_occurrences(utc(2024, 1, 6, 0, 0), utc(2024, 1, 7, 0, 0))
        .unwrap();
    assert_eq!(jan_6.len(), 2);
    // Same effective start: ordered by original start.
    assert_eq!(jan_6[0].id, Some(7));
    assert_eq!(jan_6[0].original_start, utc(2024, 1, 4, 10, 0));
    assert_eq!(jan_6[1].id, None);
    assert_eq!(jan_6[1].original_start, utc(2024, 1, 6, 10, 0));
}

#[test]
fn cancelled_override_is_still_enumerated() {
    let mut cancelled = persisted_override(
        3,
        utc(2024, 1, 3, 10, 0),
        utc(2024, 1, 3, 10, 0),
        utc(2024, 1, 3, 11, 0),
    );
    cancelled.cancel();
    let event = daily_event().with_overrides(vec![cancelled]);

    let occurrences = event
        .get_occurrences(utc(2024, 1, 3, 0, 0), utc(2024, 1, 4, 0, 0))
        .unwrap();
    assert_eq!(occurrences.len(), 1);
    assert!(occurrences[0].cancelled);
}

#[test]
fn orphan_override_is_included_when_it_intersects() {
    // Original slot at 09:00 is not on the 10:00 cadence.
    let orphan = persisted_override(
        9,
        utc(2024, 1, 5, 9, 0),
        utc(2024, 1, 5, 16, 0),
        utc(2024, 1, 5, 17, 0),
    );
    let event = daily_event().with_overrides(vec![orphan]);

    let occurrences = event
        .get_occurrences(utc(2024, 1, 5, 0, 0), utc(2024, 1, 6, 0, 0))
        .unwrap();
    assert_eq!(
        starts(&occurrences),
        vec![utc(2024, 1, 5, 10, 0), utc(2024, 1, 5, 16, 0)]
    );
}

#[test]
fn retitled_override_keeps_its_title() {
    let mut retitled = persisted_override(
        4,
        utc(2024, 1, 2, 10, 0),
        utc(2024, 1, 2, 10, 0),
        utc(2024, 1, 2, 11, 0),
    );
    retitled.title = "X (moved room)".to_string();
    let event = daily_event().with_overrides(vec![retitled]);

    let occ = event.get_occurrence(utc(2024, 1, 2, 10, 0)).unwrap().unwrap();
    assert_eq!(occ.title, "X (moved room)");
    assert_eq!(occ.id, Some(4));
}

// ---------------------------------------------------------------------------
// Lookups
// ---------------------------------------------------------------------------

#[test]
fn get_occurrence_requires_exact_slot_start() {
    let event = daily_event();

    let hit = event.get_occurrence(utc(2024, 1, 3, 10, 0)).unwrap().unwrap();
    assert_eq!(hit.start, utc(2024, 1, 3, 10, 0));
    assert!(!hit.persisted());

    assert!(event.get_occurrence(utc(2024, 1, 3, 10, 30)).unwrap().is_none());
    assert!(event.get_occurrence(utc(2023, 12, 31, 10, 0)).unwrap().is_none());
    assert!(event.get_occurrence(utc(2024, 1, 8, 10, 0)).unwrap().is_some());
    assert!(event.get_occurrence(utc(2024, 1, 9, 10, 0)).unwrap().is_none());
}

#[test]
fn next_occurrence_finds_the_following_slot() {
    let event = daily_event();
    let next = event.next_occurrence(utc(2024, 1, 3, 10, 30)).unwrap().unwrap();
    assert_eq!(next.start, utc(2024, 1, 4, 10, 0));
    assert!(event.next_occurrence(utc(2024, 1, 8, 10, 1)).unwrap().is_none());
}

// ---------------------------------------------------------------------------
// Validation and edits
// ---------------------------------------------------------------------------

#[test]
fn end_before_start_is_rejected() {
    let event = Event::new(1, "Backwards", utc(2024, 1, 1, 11, 0), utc(2024, 1, 1, 10, 0));
    assert!(matches!(event.validate(), Err(ScheduleError::Configuration(_))));
}

#[test]
fn rule_without_horizon_is_rejected() {
    let mut event = daily_event();
    event.end_recurring_period = None;

    assert!(matches!(event.validate(), Err(ScheduleError::Configuration(_))));
    assert!(matches!(
        event.get_occurrences(utc(2024, 1, 1, 0, 0), utc(2024, 1, 2, 0, 0)),
        Err(ScheduleError::Configuration(_))
    ));
}

#[test]
fn horizon_before_start_is_rejected() {
    let mut event = daily_event();
    event.end_recurring_period = Some(utc(2023, 12, 1, 0, 0));
    assert!(matches!(event.validate(), Err(ScheduleError::Configuration(_))));
}

#[test]
fn reschedule_reanchors_overrides() {
    let mut cancelled = persisted_override(
        3,
        utc(2024, 1, 3, 10, 0),
        utc(2024, 1, 3, 10, 0),
        utc(2024, 1, 3, 11, 0),
    );
    cancelled.cancel();
    let mut event = daily_event().with_overrides(vec![cancelled]);

    let (ds, de) = event.reschedule(utc(2024, 1, 1, 11, 0), utc(2024, 1, 1, 12, 0));
    assert_eq!(ds, Duration::hours(1));
    assert_eq!(de, Duration::hours(1));

    let occ = event.get_occurrence(utc(2024, 1, 3, 11, 0)).unwrap().unwrap();
    assert_eq!(occ.id, Some(3));
    assert!(occ.cancelled);
    assert_eq!(occ.original_end, utc(2024, 1, 3, 12, 0));

    // The override stays bound to Jan 3; no duplicate appears for that day.
    let jan_3 = event
        .get_occurrences(utc(2024, 1, 3, 0, 0), utc(2024, 1, 4, 0, 0))
        .unwrap();
    assert_eq!(jan_3.len(), 1);
}

#[test]
fn event_json_defaults() {
    let event: Event = serde_json::from_str(
        r#"{
            "calendar_id": 1,
            "title": "Standup",
            "start": "2024-01-01T09:00:00Z",
            "end": "2024-01-01T09:15:00Z"
        }"#,
    )
    .unwrap();
    assert_eq!(event.id, None);
    assert_eq!(event.timezone, chrono_tz::Tz::UTC);
    assert!(!event.is_recurring());
    assert_eq!(event.duration(), Duration::minutes(15));
}
