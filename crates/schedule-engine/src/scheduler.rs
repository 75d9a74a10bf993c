//! The caller-facing service: expansion, validation and the edit flows that
//! write through a [`Repository`].
//!
//! Every write is validated before anything is persisted, so a failed
//! validation leaves the repository untouched.

use chrono::{DateTime, TimeDelta, Utc};

use crate::calendar::{Calendar, CalendarId};
use crate::conflict;
use crate::error::{Result, ScheduleError};
use crate::event::{Event, EventId};
use crate::feed::{self, FeedEntry};
use crate::occurrence::{Occurrence, OccurrenceId};
use crate::period::{self, Frame, Granularity};
use crate::repository::Repository;
use crate::settings::Settings;

/// How an edit/cancel flow names the occurrence it acts on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OccurrenceLookup {
    /// A persisted occurrence.
    Id(OccurrenceId),
    /// The original slot start of a (possibly virtual) occurrence.
    Instant(DateTime<Utc>),
}

/// What a drag-and-drop move or resize applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveTarget {
    /// A persisted occurrence: only that instance moves.
    Occurrence(OccurrenceId),
    /// The whole event: every slot moves and overrides are re-anchored.
    Event(EventId),
}

#[derive(Debug)]
pub struct Scheduler<R> {
    repo: R,
    settings: Settings,
}

impl<R: Repository> Scheduler<R> {
    pub fn new(repo: R, settings: Settings) -> Self {
        Scheduler { repo, settings }
    }

    pub fn repository(&self) -> &R {
        &self.repo
    }

    pub fn into_repository(self) -> R {
        self.repo
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Occurrences of a calendar in `[start, end)`.
    pub fn expand(
        &self,
        calendar_id: CalendarId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Occurrence>> {
        let events = self.repo.events_for_calendar(calendar_id, Some((start, end)))?;
        period::expand(&events, start, end)
    }

    /// Period alignment for a calendar: its timezone and the configured
    /// first day of week.
    pub fn frame(&self, calendar_id: CalendarId, granularity: Granularity) -> Result<Frame> {
        let calendar = self.repo.calendar(calendar_id)?;
        Ok(Frame::new(
            granularity,
            calendar.timezone,
            self.settings.first_day_of_week,
        ))
    }

    fn calendars_for(&self, slug: Option<&str>) -> Result<Vec<Calendar>> {
        match slug {
            Some(slug) => Ok(vec![self.repo.calendar_by_slug(slug)?]),
            None => self.repo.calendars(),
        }
    }

    fn events_for(
        &self,
        calendars: &[Calendar],
        window: (DateTime<Utc>, DateTime<Utc>),
    ) -> Result<Vec<Event>> {
        let mut events = Vec::new();
        for calendar in calendars {
            events.extend(self.repo.events_for_calendar(calendar.id, Some(window))?);
        }
        Ok(events)
    }

    /// Feed entries for one calendar (by slug) or all of them.
    pub fn feed(
        &self,
        calendar_slug: Option<&str>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        include_cancelled: bool,
    ) -> Result<Vec<FeedEntry>> {
        if start >= end {
            return Err(ScheduleError::Configuration(
                "feed start must be before its end".to_string(),
            ));
        }
        let calendars = self.calendars_for(calendar_slug)?;
        let events = self.events_for(&calendars, (start, end))?;
        feed::build_feed(&events, &calendars, start, end, include_cancelled)
    }

    /// What is running on a calendar at `now`.
    pub fn live_now(&self, calendar_slug: &str, now: DateTime<Utc>) -> Result<Vec<FeedEntry>> {
        let calendars = self.calendars_for(Some(calendar_slug))?;
        let window = self.settings.live_now_window();
        let events = self.events_for(&calendars, (now, now + window))?;
        feed::live_feed(&events, &calendars, now, window)
    }

    /// Check a new or edited event against the rest of its calendar.
    ///
    /// The candidate is expanded in its calendar's timezone, the zone it is
    /// stored and expanded in afterwards.
    ///
    /// # Errors
    /// `ScheduleError::Configuration` or `ScheduleError::Conflict`.
    pub fn validate_event(&self, candidate: &Event, exclude: Option<EventId>) -> Result<()> {
        let candidate = self.in_calendar_zone(candidate.clone())?;
        self.check_event(&candidate, exclude)
    }

    fn in_calendar_zone(&self, event: Event) -> Result<Event> {
        let calendar = self.repo.calendar(event.calendar_id)?;
        Ok(event.with_timezone(calendar.timezone))
    }

    fn check_event(&self, candidate: &Event, exclude: Option<EventId>) -> Result<()> {
        candidate.validate()?;
        let pool = self.repo.events_for_calendar(candidate.calendar_id, None)?;
        conflict::check_event(candidate, &pool, exclude.or(candidate.id))
    }

    /// Check an edited occurrence against every other event of its calendar.
    ///
    /// # Errors
    /// `ScheduleError::Conflict` when it overlaps.
    pub fn validate_occurrence(&self, candidate: &Occurrence, owning: &Event) -> Result<()> {
        if candidate.cancelled {
            return Ok(());
        }
        let pool = self
            .repo
            .events_for_calendar(owning.calendar_id, Some((candidate.start, candidate.end)))?;
        conflict::check_occurrence(candidate, owning, &pool)
    }

    /// Find an occurrence either by persisted id or by rebuilding its slot.
    ///
    /// # Errors
    /// `ScheduleError::NotFound` when the event or occurrence does not exist,
    /// when a persisted occurrence belongs to another event, or when the
    /// instant is not on the event's cadence.
    pub fn resolve_occurrence(
        &self,
        event_id: EventId,
        lookup: OccurrenceLookup,
    ) -> Result<(Event, Occurrence)> {
        match lookup {
            OccurrenceLookup::Id(id) => {
                let occurrence = self.repo.occurrence(id)?;
                if occurrence.event_id != Some(event_id) {
                    return Err(ScheduleError::NotFound(format!(
                        "occurrence {id} of event {event_id}"
                    )));
                }
                let event = self.repo.event(event_id)?;
                Ok((event, occurrence))
            }
            OccurrenceLookup::Instant(instant) => {
                let event = self.repo.event(event_id)?;
                let occurrence = event.get_occurrence(instant)?.ok_or_else(|| {
                    ScheduleError::NotFound(format!(
                        "event {event_id} has no occurrence starting at {instant}"
                    ))
                })?;
                Ok((event, occurrence))
            }
        }
    }

    /// Validate and insert a new event.
    pub fn create_event(&mut self, mut event: Event) -> Result<Event> {
        event.id = None;
        let event = self.in_calendar_zone(event)?;
        self.check_event(&event, None)?;
        let id = self.repo.save_event(&event)?;
        tracing::info!(event_id = id, title = %event.title, "event created");
        self.repo.event(id)
    }

    /// Create a placeholder-titled event from a selected time range.
    pub fn select_create(
        &mut self,
        calendar_id: CalendarId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Event> {
        let calendar = self.repo.calendar(calendar_id)?;
        let event = Event::on_calendar(
            &calendar,
            self.settings.event_name_placeholder.clone(),
            start,
            end,
        );
        self.create_event(event)
    }

    /// Validate and store an edited event. Overrides are re-anchored by the
    /// start and end deltas so they stay bound to their logical slots.
    ///
    /// # Errors
    /// `ScheduleError::NotFound` for an unsaved or unknown event, plus the
    /// errors of [`Scheduler::validate_event`].
    pub fn update_event(&mut self, event: Event) -> Result<Event> {
        let id = event
            .id
            .ok_or_else(|| ScheduleError::NotFound("event has no id".to_string()))?;
        let stored = self.repo.event(id)?;

        let mut candidate = self.in_calendar_zone(event)?;
        candidate.overrides = stored.overrides.clone();
        let delta_start = candidate.start - stored.start;
        let delta_end = candidate.end - stored.end;
        candidate.shift_overrides(delta_start, delta_end);

        self.check_event(&candidate, Some(id))?;
        self.repo.save_event(&candidate)?;
        self.repo.shift_occurrences(id, delta_start, delta_end)?;
        tracing::info!(event_id = id, %delta_start, %delta_end, "event updated");
        self.repo.event(id)
    }

    pub fn delete_event(&mut self, id: EventId) -> Result<()> {
        self.repo.delete_event(id)
    }

    /// Validate and store an occurrence override.
    ///
    /// # Errors
    /// `ScheduleError::Configuration` for an empty interval or an occurrence
    /// without event, `ScheduleError::NotFound` for an unknown event,
    /// `ScheduleError::Conflict` when it overlaps another event.
    pub fn save_occurrence(&mut self, occurrence: Occurrence) -> Result<Occurrence> {
        if occurrence.end <= occurrence.start {
            return Err(ScheduleError::Configuration(
                "the end time must be later than the start time".to_string(),
            ));
        }
        let event_id = occurrence.event_id.ok_or_else(|| {
            ScheduleError::Configuration("occurrence has no event".to_string())
        })?;
        let owning = self.repo.event(event_id)?;
        self.validate_occurrence(&occurrence, &owning)?;
        let id = self.repo.save_occurrence(&occurrence)?;
        self.repo.occurrence(id)
    }

    /// Cancel an occurrence, persisting it if it was virtual.
    pub fn cancel_occurrence(
        &mut self,
        event_id: EventId,
        lookup: OccurrenceLookup,
    ) -> Result<Occurrence> {
        let (_, mut occurrence) = self.resolve_occurrence(event_id, lookup)?;
        occurrence.cancel();
        let id = self.repo.save_occurrence(&occurrence)?;
        tracing::info!(event_id, occurrence_id = id, "occurrence cancelled");
        self.repo.occurrence(id)
    }

    /// Move (or, with `resize`, stretch) an occurrence or a whole event by
    /// `delta`.
    pub fn move_or_resize(&mut self, target: MoveTarget, delta: TimeDelta, resize: bool) -> Result<()> {
        match target {
            MoveTarget::Occurrence(id) => {
                let mut occurrence = self.repo.occurrence(id)?;
                occurrence.move_by(delta, resize);
                self.save_occurrence(occurrence)?;
            }
            MoveTarget::Event(id) => {
                let mut event = self.repo.event(id)?;
                if !resize {
                    event.start += delta;
                }
                event.end += delta;
                self.update_event(event)?;
            }
        }
        Ok(())
    }
}
