//! Tests for the JSON feed read model and the "live now" query.

use std::collections::HashSet;

use chrono::{DateTime, Duration, TimeZone, Utc};
use schedule_engine::feed::live_now;
use schedule_engine::occurrence::Occurrence;
use schedule_engine::rule::{Frequency, RecurrenceRule};
use schedule_engine::{build_feed, Calendar, Event, FeedId};

fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
}

fn calendar() -> Calendar {
    Calendar::new(1, "team", "Team")
}

/// Event X with Jan 3 cancelled and Jan 4 moved to 14:00.
fn event_x() -> Event {
    let rule = RecurrenceRule::new("Daily", Frequency::Daily, "").unwrap();

    let mut cancelled = Occurrence::new(Some(1), "X", "", utc(2024, 1, 3, 10, 0), utc(2024, 1, 3, 11, 0));
    cancelled.id = Some(3);
    cancelled.cancel();

    let mut moved = Occurrence::new(Some(1), "X", "", utc(2024, 1, 4, 10, 0), utc(2024, 1, 4, 11, 0));
    moved.id = Some(4);
    moved.move_by(Duration::hours(4), false);

    Event::on_calendar(&calendar(), "X", utc(2024, 1, 1, 10, 0), utc(2024, 1, 1, 11, 0))
        .with_id(1)
        .with_rule(rule, utc(2024, 1, 8, 10, 0))
        .with_creator("ada")
        .with_overrides(vec![cancelled, moved])
}

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

#[test]
fn virtual_and_persisted_ids_never_collide() {
    let events = vec![event_x()];
    let feed = build_feed(
        &events,
        &[calendar()],
        utc(2024, 1, 1, 0, 0),
        utc(2024, 1, 9, 0, 0),
        true,
    )
    .unwrap();
    assert_eq!(feed.len(), 8);

    let ids: HashSet<&FeedId> = feed.iter().map(|e| &e.id).collect();
    assert_eq!(ids.len(), feed.len(), "feed ids must be unique");

    for entry in &feed {
        assert_eq!(entry.existed, entry.id.is_persisted());
        match &entry.id {
            FeedId::Persisted(id) => assert!([3, 4].contains(id)),
            FeedId::Virtual(id) => assert!(id.starts_with("1@"), "{id}"),
        }
    }
    assert_eq!(feed.iter().filter(|e| e.existed).count(), 2);
}

#[test]
fn ids_serialize_as_number_or_string() {
    let events = vec![event_x()];
    let feed = build_feed(
        &events,
        &[calendar()],
        utc(2024, 1, 4, 0, 0),
        utc(2024, 1, 6, 0, 0),
        false,
    )
    .unwrap();
    let json = serde_json::to_value(&feed).unwrap();

    assert_eq!(json[0]["id"], 4);
    assert_eq!(json[0]["existed"], true);
    assert_eq!(json[0]["start"], "2024-01-04T14:00:00Z");
    // 2024-01-05T10:00:00Z
    assert_eq!(json[1]["id"], "1@1704448800");
    assert_eq!(json[1]["existed"], false);
}

// ---------------------------------------------------------------------------
// Entry fields
// ---------------------------------------------------------------------------

#[test]
fn entries_carry_event_metadata() {
    let events = vec![event_x()];
    let feed = build_feed(
        &events,
        &[calendar()],
        utc(2024, 1, 2, 0, 0),
        utc(2024, 1, 3, 0, 0),
        false,
    )
    .unwrap();
    assert_eq!(feed.len(), 1);

    let entry = &feed[0];
    assert_eq!(entry.title, "X");
    assert_eq!(entry.event_id, Some(1));
    assert_eq!(entry.rule.as_deref(), Some("Daily"));
    assert_eq!(entry.end_recurring_period, Some(utc(2024, 1, 8, 10, 0)));
    assert_eq!(entry.creator.as_deref(), Some("ada"));
    assert_eq!(entry.calendar.as_deref(), Some("team"));
    assert!(!entry.cancelled);
}

#[test]
fn cancelled_entries_only_on_request() {
    let events = vec![event_x()];
    let window = (utc(2024, 1, 3, 0, 0), utc(2024, 1, 4, 0, 0));

    let hidden = build_feed(&events, &[calendar()], window.0, window.1, false).unwrap();
    assert!(hidden.is_empty());

    let shown = build_feed(&events, &[calendar()], window.0, window.1, true).unwrap();
    assert_eq!(shown.len(), 1);
    assert!(shown[0].cancelled);
    assert_eq!(shown[0].id, FeedId::Persisted(3));
}

// ---------------------------------------------------------------------------
// Live now
// ---------------------------------------------------------------------------

#[test]
fn live_now_returns_running_occurrences() {
    let events = vec![event_x()];
    let second = Duration::seconds(1);

    let running = live_now(&events, utc(2024, 1, 2, 10, 30), second).unwrap();
    assert_eq!(running.len(), 1);
    assert_eq!(running[0].start, utc(2024, 1, 2, 10, 0));

    assert_eq!(live_now(&events, utc(2024, 1, 2, 10, 0), second).unwrap().len(), 1);
    assert!(live_now(&events, utc(2024, 1, 2, 11, 0), second).unwrap().is_empty());
}

#[test]
fn live_now_skips_cancelled_and_follows_moves() {
    let events = vec![event_x()];
    let second = Duration::seconds(1);

    assert!(live_now(&events, utc(2024, 1, 3, 10, 30), second).unwrap().is_empty());
    assert!(live_now(&events, utc(2024, 1, 4, 10, 30), second).unwrap().is_empty());
    assert_eq!(live_now(&events, utc(2024, 1, 4, 14, 30), second).unwrap().len(), 1);
}
