//! Storage interface and an in-memory implementation.
//!
//! The engine never persists anything itself. Callers load events (with their
//! overrides) through a [`Repository`], validate, then write back through it.
//! [`MemoryRepository`] backs tests and the CLI, and can be loaded from a JSON
//! [`Snapshot`].

use std::collections::BTreeMap;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::calendar::{Calendar, CalendarId};
use crate::error::{Result, ScheduleError};
use crate::event::{Event, EventId};
use crate::occurrence::{Occurrence, OccurrenceId};
use crate::rule::{RecurrenceRule, RuleId};

pub trait Repository {
    fn calendar(&self, id: CalendarId) -> Result<Calendar>;

    fn calendar_by_slug(&self, slug: &str) -> Result<Calendar>;

    fn calendars(&self) -> Result<Vec<Calendar>>;

    /// Events of a calendar, with overrides loaded. With a window, events that
    /// cannot have an occurrence in `[start, end)` may be left out.
    fn events_for_calendar(
        &self,
        calendar_id: CalendarId,
        window: Option<(DateTime<Utc>, DateTime<Utc>)>,
    ) -> Result<Vec<Event>>;

    fn event(&self, id: EventId) -> Result<Event>;

    fn occurrence(&self, id: OccurrenceId) -> Result<Occurrence>;

    /// Persisted occurrences of an event.
    fn occurrences_for_event(&self, event_id: EventId) -> Result<Vec<Occurrence>>;

    /// Insert or update; returns the id.
    fn save_event(&mut self, event: &Event) -> Result<EventId>;

    /// Insert or update; returns the id.
    fn save_occurrence(&mut self, occurrence: &Occurrence) -> Result<OccurrenceId>;

    /// Delete an event and its occurrences.
    fn delete_event(&mut self, id: EventId) -> Result<()>;

    fn delete_occurrence(&mut self, id: OccurrenceId) -> Result<()>;

    /// Shift the original slot of every occurrence of an event in one step.
    fn shift_occurrences(
        &mut self,
        event_id: EventId,
        delta_start: TimeDelta,
        delta_end: TimeDelta,
    ) -> Result<()>;
}

/// Whether `event` may have an occurrence intersecting `[start, end)`.
fn may_intersect(event: &Event, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
    let base = event.start < end
        && match (&event.rule, event.end_recurring_period) {
            (Some(_), Some(horizon)) => horizon + event.duration() > start,
            (Some(_), None) => true,
            (None, _) => event.end > start,
        };
    base || event.overrides.iter().any(|occ| occ.intersects(start, end))
}

#[derive(Debug, Default, Clone)]
pub struct MemoryRepository {
    calendars: BTreeMap<CalendarId, Calendar>,
    events: BTreeMap<EventId, Event>,
    occurrences: BTreeMap<OccurrenceId, Occurrence>,
    next_event_id: EventId,
    next_occurrence_id: OccurrenceId,
}

impl MemoryRepository {
    pub fn new() -> Self {
        MemoryRepository {
            next_event_id: 1,
            next_occurrence_id: 1,
            ..Default::default()
        }
    }

    pub fn add_calendar(&mut self, calendar: Calendar) {
        self.calendars.insert(calendar.id, calendar);
    }

    /// Load a snapshot, resolving rule references and copying each calendar's
    /// timezone onto its events.
    ///
    /// # Errors
    /// Returns `ScheduleError::NotFound` for dangling calendar, rule or event
    /// references, and `ScheduleError::Configuration` for an event that
    /// cannot be expanded.
    pub fn from_snapshot(snapshot: Snapshot) -> Result<Self> {
        let mut repo = MemoryRepository::new();
        for calendar in snapshot.calendars {
            repo.add_calendar(calendar);
        }

        let rules: BTreeMap<RuleId, RecurrenceRule> = snapshot
            .rules
            .into_iter()
            .filter_map(|rule| rule.id().map(|id| (id, rule)))
            .collect();

        for record in snapshot.events {
            let calendar = repo.calendar(record.calendar_id)?;
            let rule = match record.rule_id {
                Some(id) => Some(
                    rules
                        .get(&id)
                        .cloned()
                        .ok_or_else(|| ScheduleError::NotFound(format!("rule {id}")))?,
                ),
                None => None,
            };
            let event = Event {
                id: Some(record.id),
                calendar_id: record.calendar_id,
                title: record.title,
                description: record.description,
                start: record.start,
                end: record.end,
                rule,
                end_recurring_period: record.end_recurring_period,
                timezone: calendar.timezone,
                creator: record.creator,
                created_on: record.created_on,
                overrides: Vec::new(),
            };
            event.validate()?;
            repo.next_event_id = repo.next_event_id.max(record.id + 1);
            repo.events.insert(record.id, event);
        }

        for occurrence in snapshot.occurrences {
            repo.save_occurrence(&occurrence)?;
        }
        Ok(repo)
    }

    fn with_overrides(&self, mut event: Event) -> Event {
        event.overrides = self
            .occurrences
            .values()
            .filter(|occ| occ.event_id.is_some() && occ.event_id == event.id)
            .cloned()
            .collect();
        event
    }
}

impl Repository for MemoryRepository {
    fn calendar(&self, id: CalendarId) -> Result<Calendar> {
        self.calendars
            .get(&id)
            .cloned()
            .ok_or_else(|| ScheduleError::NotFound(format!("calendar {id}")))
    }

    fn calendar_by_slug(&self, slug: &str) -> Result<Calendar> {
        self.calendars
            .values()
            .find(|c| c.slug == slug)
            .cloned()
            .ok_or_else(|| ScheduleError::NotFound(format!("calendar '{slug}'")))
    }

    fn calendars(&self) -> Result<Vec<Calendar>> {
        Ok(self.calendars.values().cloned().collect())
    }

    fn events_for_calendar(
        &self,
        calendar_id: CalendarId,
        window: Option<(DateTime<Utc>, DateTime<Utc>)>,
    ) -> Result<Vec<Event>> {
        self.calendar(calendar_id)?;
        Ok(self
            .events
            .values()
            .filter(|e| e.calendar_id == calendar_id)
            .map(|e| self.with_overrides(e.clone()))
            .filter(|e| match window {
                Some((start, end)) => may_intersect(e, start, end),
                None => true,
            })
            .collect())
    }

    fn event(&self, id: EventId) -> Result<Event> {
        self.events
            .get(&id)
            .map(|e| self.with_overrides(e.clone()))
            .ok_or_else(|| ScheduleError::NotFound(format!("event {id}")))
    }

    fn occurrence(&self, id: OccurrenceId) -> Result<Occurrence> {
        self.occurrences
            .get(&id)
            .cloned()
            .ok_or_else(|| ScheduleError::NotFound(format!("occurrence {id}")))
    }

    fn occurrences_for_event(&self, event_id: EventId) -> Result<Vec<Occurrence>> {
        self.event(event_id).map(|e| e.overrides)
    }

    fn save_event(&mut self, event: &Event) -> Result<EventId> {
        let calendar = self.calendar(event.calendar_id)?;
        let id = match event.id {
            Some(id) => {
                if !self.events.contains_key(&id) {
                    return Err(ScheduleError::NotFound(format!("event {id}")));
                }
                id
            }
            None => {
                let id = self.next_event_id;
                self.next_event_id += 1;
                id
            }
        };

        let mut stored = event.clone();
        stored.id = Some(id);
        stored.timezone = calendar.timezone;
        stored.overrides.clear();
        if stored.created_on.is_none() {
            stored.created_on = Some(Utc::now());
        }
        self.events.insert(id, stored);
        Ok(id)
    }

    fn save_occurrence(&mut self, occurrence: &Occurrence) -> Result<OccurrenceId> {
        let event_id = occurrence
            .event_id
            .ok_or_else(|| ScheduleError::Storage("occurrence has no event".to_string()))?;
        if !self.events.contains_key(&event_id) {
            return Err(ScheduleError::NotFound(format!("event {event_id}")));
        }

        let duplicate = self.occurrences.values().any(|other| {
            other.event_id == Some(event_id)
                && other.original_start == occurrence.original_start
                && other.id != occurrence.id
        });
        if duplicate {
            return Err(ScheduleError::Storage(format!(
                "event {} already has an occurrence for {}",
                event_id, occurrence.original_start
            )));
        }

        let id = match occurrence.id {
            Some(id) => id,
            None => {
                let id = self.next_occurrence_id;
                self.next_occurrence_id += 1;
                id
            }
        };
        self.next_occurrence_id = self.next_occurrence_id.max(id + 1);

        let mut stored = occurrence.clone();
        stored.id = Some(id);
        self.occurrences.insert(id, stored);
        Ok(id)
    }

    fn delete_event(&mut self, id: EventId) -> Result<()> {
        self.events
            .remove(&id)
            .ok_or_else(|| ScheduleError::NotFound(format!("event {id}")))?;
        self.occurrences.retain(|_, occ| occ.event_id != Some(id));
        Ok(())
    }

    fn delete_occurrence(&mut self, id: OccurrenceId) -> Result<()> {
        self.occurrences
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| ScheduleError::NotFound(format!("occurrence {id}")))
    }

    fn shift_occurrences(
        &mut self,
        event_id: EventId,
        delta_start: TimeDelta,
        delta_end: TimeDelta,
    ) -> Result<()> {
        for occ in self
            .occurrences
            .values_mut()
            .filter(|occ| occ.event_id == Some(event_id))
        {
            occ.shift_original(delta_start, delta_end);
        }
        Ok(())
    }
}

/// An event row as stored: the rule is referenced by id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    pub id: EventId,
    pub calendar_id: CalendarId,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    #[serde(default)]
    pub rule_id: Option<RuleId>,
    #[serde(default)]
    pub end_recurring_period: Option<DateTime<Utc>>,
    #[serde(default)]
    pub creator: Option<String>,
    #[serde(default)]
    pub created_on: Option<DateTime<Utc>>,
}

/// A serialized calendar database.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Snapshot {
    pub calendars: Vec<Calendar>,
    pub rules: Vec<RecurrenceRule>,
    pub events: Vec<EventRecord>,
    pub occurrences: Vec<Occurrence>,
}

impl Snapshot {
    /// # Errors
    /// Returns `ScheduleError::Configuration` for malformed JSON, including
    /// rules whose params do not parse.
    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| ScheduleError::Configuration(format!("invalid snapshot: {e}")))
    }
}
