//! JSON event-feed read model.
//!
//! Calendar front ends treat every item with the same id as one object, so
//! virtual occurrences get a synthesized id. Synthesized ids are strings
//! (`"<event id>@<unix original start>"`) and can never collide with the
//! numeric ids of persisted occurrences.

use std::collections::HashMap;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::calendar::{Calendar, CalendarId};
use crate::error::Result;
use crate::event::{Event, EventId};
use crate::occurrence::{Occurrence, OccurrenceId};
use crate::period;

/// Stable feed identifier of an occurrence.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FeedId {
    Persisted(OccurrenceId),
    Virtual(String),
}

impl FeedId {
    pub fn for_occurrence(occurrence: &Occurrence) -> Self {
        match occurrence.id {
            Some(id) => FeedId::Persisted(id),
            None => {
                let event = occurrence
                    .event_id
                    .map(|id| id.to_string())
                    .unwrap_or_else(|| "new".to_string());
                FeedId::Virtual(format!(
                    "{}@{}",
                    event,
                    occurrence.original_start.timestamp()
                ))
            }
        }
    }

    pub fn is_persisted(&self) -> bool {
        matches!(self, FeedId::Persisted(_))
    }
}

/// One occurrence as exposed on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedEntry {
    pub id: FeedId,
    pub title: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    /// Whether `id` is a persisted occurrence id.
    pub existed: bool,
    pub event_id: Option<EventId>,
    pub description: String,
    pub cancelled: bool,
    pub rule: Option<String>,
    pub end_recurring_period: Option<DateTime<Utc>>,
    pub creator: Option<String>,
    pub calendar: Option<String>,
}

impl FeedEntry {
    pub fn new(occurrence: &Occurrence, event: Option<&Event>, calendar: Option<&Calendar>) -> Self {
        let id = FeedId::for_occurrence(occurrence);
        FeedEntry {
            existed: id.is_persisted(),
            id,
            title: occurrence.title.clone(),
            start: occurrence.start,
            end: occurrence.end,
            event_id: occurrence.event_id,
            description: occurrence.description.clone(),
            cancelled: occurrence.cancelled,
            rule: event
                .and_then(|e| e.rule.as_ref())
                .map(|rule| rule.name().to_string()),
            end_recurring_period: event.and_then(|e| e.end_recurring_period),
            creator: event.and_then(|e| e.creator.clone()),
            calendar: calendar.map(|c| c.slug.clone()),
        }
    }
}

/// Feed entries for every occurrence of `events` intersecting `[start, end)`.
///
/// Cancelled occurrences are left out unless `include_cancelled`.
pub fn build_feed(
    events: &[Event],
    calendars: &[Calendar],
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    include_cancelled: bool,
) -> Result<Vec<FeedEntry>> {
    let occurrences = period::expand(events, start, end)?;
    Ok(entries(events, calendars, &occurrences, include_cancelled))
}

fn entries(
    events: &[Event],
    calendars: &[Calendar],
    occurrences: &[Occurrence],
    include_cancelled: bool,
) -> Vec<FeedEntry> {
    let by_id: HashMap<EventId, &Event> = events
        .iter()
        .filter_map(|e| e.id.map(|id| (id, e)))
        .collect();
    let calendars: HashMap<CalendarId, &Calendar> = calendars.iter().map(|c| (c.id, c)).collect();

    occurrences
        .iter()
        .filter(|occ| include_cancelled || !occ.cancelled)
        .map(|occ| {
            let event = occ.event_id.and_then(|id| by_id.get(&id).copied());
            let calendar = event.and_then(|e| calendars.get(&e.calendar_id).copied());
            FeedEntry::new(occ, event, calendar)
        })
        .collect()
}

/// Non-cancelled occurrences running during `[now, now + window)`.
pub fn live_now(events: &[Event], now: DateTime<Utc>, window: TimeDelta) -> Result<Vec<Occurrence>> {
    let mut live = period::expand(events, now, now + window)?;
    live.retain(|occ| !occ.cancelled);
    Ok(live)
}

/// [`live_now`] rendered as feed entries.
pub fn live_feed(
    events: &[Event],
    calendars: &[Calendar],
    now: DateTime<Utc>,
    window: TimeDelta,
) -> Result<Vec<FeedEntry>> {
    let live = live_now(events, now, window)?;
    Ok(entries(events, calendars, &live, false))
}
