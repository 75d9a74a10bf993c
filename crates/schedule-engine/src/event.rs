//! Events: the definitions occurrences are computed from.
//!
//! An event without a rule has exactly one slot, `[start, end)`. An event with
//! a rule repeats that slot up to its `end_recurring_period` horizon. Persisted
//! overrides loaded for the event (`overrides`) replace the virtual slot they
//! are anchored to by `original_start`.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, TimeDelta, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::calendar::{Calendar, CalendarId};
use crate::error::{Result, ScheduleError};
use crate::occurrence::Occurrence;
use crate::rule::{RecurrenceRule, Recurrence, Slot};

pub type EventId = i64;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(default)]
    pub id: Option<EventId>,
    pub calendar_id: CalendarId,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    #[serde(default)]
    pub rule: Option<RecurrenceRule>,
    #[serde(default)]
    pub end_recurring_period: Option<DateTime<Utc>>,
    #[serde(default = "utc")]
    pub timezone: Tz,
    #[serde(default)]
    pub creator: Option<String>,
    #[serde(default)]
    pub created_on: Option<DateTime<Utc>>,
    /// Persisted occurrences owned by this event.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub overrides: Vec<Occurrence>,
}

fn utc() -> Tz {
    Tz::UTC
}

impl Event {
    /// A single, unsaved event in UTC.
    pub fn new(
        calendar_id: CalendarId,
        title: impl Into<String>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Self {
        Event {
            id: None,
            calendar_id,
            title: title.into(),
            description: String::new(),
            start,
            end,
            rule: None,
            end_recurring_period: None,
            timezone: Tz::UTC,
            creator: None,
            created_on: None,
            overrides: Vec::new(),
        }
    }

    /// A single, unsaved event on `calendar`, expanded in its timezone.
    pub fn on_calendar(
        calendar: &Calendar,
        title: impl Into<String>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Self {
        Event::new(calendar.id, title, start, end).with_timezone(calendar.timezone)
    }

    pub fn with_id(mut self, id: EventId) -> Self {
        self.id = Some(id);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_rule(mut self, rule: RecurrenceRule, end_recurring_period: DateTime<Utc>) -> Self {
        self.rule = Some(rule);
        self.end_recurring_period = Some(end_recurring_period);
        self
    }

    pub fn with_timezone(mut self, timezone: Tz) -> Self {
        self.timezone = timezone;
        self
    }

    pub fn with_creator(mut self, creator: impl Into<String>) -> Self {
        self.creator = Some(creator.into());
        self
    }

    pub fn with_overrides(mut self, overrides: Vec<Occurrence>) -> Self {
        self.overrides = overrides;
        self
    }

    pub fn is_recurring(&self) -> bool {
        self.rule.is_some()
    }

    pub fn duration(&self) -> TimeDelta {
        self.end - self.start
    }

    /// Reject definitions that cannot be expanded.
    ///
    /// # Errors
    /// Returns `ScheduleError::Configuration` when `end <= start`, when a
    /// recurring event has no horizon or a horizon before its start, or when
    /// the rule does not compile.
    pub fn validate(&self) -> Result<()> {
        if self.end <= self.start {
            return Err(ScheduleError::Configuration(
                "the end time must be later than the start time".to_string(),
            ));
        }
        if self.rule.is_some() {
            match self.end_recurring_period {
                None => {
                    return Err(ScheduleError::Configuration(
                        "recurring events must have an end_recurring_period".to_string(),
                    ))
                }
                Some(horizon) if horizon < self.start => {
                    return Err(ScheduleError::Configuration(
                        "end_recurring_period must not precede the start time".to_string(),
                    ))
                }
                Some(_) => {}
            }
        }
        self.recurrence().map(|_| ())
    }

    /// The bounded expansion of this event's rule, or `None` for a single event.
    ///
    /// # Errors
    /// Returns `ScheduleError::Configuration` for a rule without horizon or a
    /// rule the expander rejects.
    pub fn recurrence(&self) -> Result<Option<Recurrence>> {
        let Some(rule) = &self.rule else {
            return Ok(None);
        };
        let horizon = self.end_recurring_period.ok_or_else(|| {
            ScheduleError::Configuration(format!(
                "event '{}' has rule '{}' but no end_recurring_period",
                self.title,
                rule.name()
            ))
        })?;
        rule.recurrence(self.start, self.end, horizon, self.timezone)
            .map(Some)
    }

    fn base_slot(&self) -> Slot {
        Slot {
            start: self.start,
            end: self.end,
        }
    }

    /// The persisted override anchored at `original_start`, if any.
    pub fn override_for(&self, original_start: DateTime<Utc>) -> Option<&Occurrence> {
        self.overrides
            .iter()
            .find(|occ| occ.original_start == original_start)
    }

    fn virtual_occurrence(&self, slot: Slot) -> Occurrence {
        Occurrence::new(
            self.id,
            self.title.clone(),
            self.description.clone(),
            slot.start,
            slot.end,
        )
    }

    fn occurrence_for_slot(&self, slot: Slot) -> Occurrence {
        match self.override_for(slot.start) {
            Some(persisted) => persisted.clone(),
            None => self.virtual_occurrence(slot),
        }
    }

    /// The occurrence whose original slot starts exactly at `instant`.
    ///
    /// Returns `Ok(None)` when `instant` is off the rule's cadence, before the
    /// event start or past its horizon.
    pub fn get_occurrence(&self, instant: DateTime<Utc>) -> Result<Option<Occurrence>> {
        let slot = match self.recurrence()? {
            Some(recurrence) => recurrence
                .slots()
                .take_while(|slot| slot.start <= instant)
                .find(|slot| slot.start == instant),
            None => Some(self.base_slot()).filter(|slot| slot.start == instant),
        };
        Ok(slot.map(|slot| self.occurrence_for_slot(slot)))
    }

    /// The first occurrence whose original slot starts at or after `instant`.
    pub fn next_occurrence(&self, instant: DateTime<Utc>) -> Result<Option<Occurrence>> {
        let slot = match self.recurrence()? {
            Some(recurrence) => recurrence.first_at_or_after(instant),
            None => Some(self.base_slot()).filter(|slot| slot.start >= instant),
        };
        Ok(slot.map(|slot| self.occurrence_for_slot(slot)))
    }

    /// Every occurrence whose effective interval intersects `[start, end)`,
    /// sorted by effective start.
    pub fn get_occurrences(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Occurrence>> {
        if start >= end {
            return Ok(Vec::new());
        }
        let occurrences = match self.recurrence()? {
            Some(recurrence) => self.merge(recurrence.slots_between(start, end), Some((start, end))),
            None => {
                let base = self.base_slot();
                let slots = Some(base).filter(|slot| slot.intersects(start, end));
                self.merge(slots.into_iter(), Some((start, end)))
            }
        };
        tracing::trace!(
            event_id = ?self.id,
            %start,
            %end,
            count = occurrences.len(),
            "expanded event"
        );
        Ok(occurrences)
    }

    /// Every occurrence of this event up to its horizon.
    pub fn all_occurrences(&self) -> Result<Vec<Occurrence>> {
        Ok(match self.recurrence()? {
            Some(recurrence) => self.merge(recurrence.slots(), None),
            None => self.merge(std::iter::once(self.base_slot()), None),
        })
    }

    /// Substitute overrides into virtual slots, then add overrides whose
    /// original slot was not generated here but whose effective interval falls
    /// inside the window.
    fn merge(
        &self,
        slots: impl Iterator<Item = Slot>,
        window: Option<(DateTime<Utc>, DateTime<Utc>)>,
    ) -> Vec<Occurrence> {
        let in_window = |occ: &Occurrence| match window {
            Some((start, end)) => occ.intersects(start, end),
            None => true,
        };

        let by_original: HashMap<DateTime<Utc>, &Occurrence> = self
            .overrides
            .iter()
            .map(|occ| (occ.original_start, occ))
            .collect();
        let mut matched = HashSet::new();
        let mut out = Vec::new();

        for slot in slots {
            match by_original.get(&slot.start) {
                Some(persisted) => {
                    matched.insert(slot.start);
                    if in_window(persisted) {
                        out.push((*persisted).clone());
                    }
                }
                None => out.push(self.virtual_occurrence(slot)),
            }
        }

        out.extend(
            self.overrides
                .iter()
                .filter(|occ| !matched.contains(&occ.original_start) && in_window(occ))
                .cloned(),
        );

        out.sort_by_key(|occ| (occ.start, occ.original_start));
        out
    }

    /// Shift every override's original slot, keeping it bound to the same
    /// logical instance after the event's start/end moved.
    pub fn shift_overrides(&mut self, delta_start: TimeDelta, delta_end: TimeDelta) {
        for occ in &mut self.overrides {
            occ.shift_original(delta_start, delta_end);
        }
    }

    /// Move the event to a new `[start, end)` and re-anchor its overrides.
    ///
    /// Returns the `(start, end)` deltas applied, for the repository to apply
    /// to stored overrides.
    pub fn reschedule(
        &mut self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> (TimeDelta, TimeDelta) {
        let delta_start = start - self.start;
        let delta_end = end - self.end;
        self.start = start;
        self.end = end;
        self.shift_overrides(delta_start, delta_end);
        (delta_start, delta_end)
    }
}
