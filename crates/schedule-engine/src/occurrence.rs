//! Occurrences: concrete instances of an event in time.
//!
//! An occurrence is either virtual (computed during expansion, never stored)
//! or persisted (an override record with an id). A persisted occurrence stays
//! anchored to the slot it replaces through `original_start`/`original_end`,
//! while `start`/`end` carry the effective, possibly moved, interval.

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::event::EventId;

pub type OccurrenceId = i64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Occurrence {
    #[serde(default)]
    pub id: Option<OccurrenceId>,
    #[serde(default)]
    pub event_id: Option<EventId>,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub original_start: DateTime<Utc>,
    pub original_end: DateTime<Utc>,
    #[serde(default)]
    pub cancelled: bool,
}

impl Occurrence {
    /// A virtual occurrence sitting exactly on its original slot.
    pub fn new(
        event_id: Option<EventId>,
        title: impl Into<String>,
        description: impl Into<String>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Self {
        Occurrence {
            id: None,
            event_id,
            title: title.into(),
            description: description.into(),
            start,
            end,
            original_start: start,
            original_end: end,
            cancelled: false,
        }
    }

    /// Whether this occurrence has an identity in storage.
    pub fn persisted(&self) -> bool {
        self.id.is_some()
    }

    /// Identity used to match overrides against virtual slots.
    pub fn key(&self) -> (Option<EventId>, DateTime<Utc>) {
        (self.event_id, self.original_start)
    }

    /// Whether the effective interval differs from the original slot.
    pub fn is_moved(&self) -> bool {
        self.start != self.original_start || self.end != self.original_end
    }

    /// Mark as cancelled. The caller persists it; cancelled occurrences are
    /// kept rather than deleted.
    pub fn cancel(&mut self) {
        self.cancelled = true;
    }

    pub fn uncancel(&mut self) {
        self.cancelled = false;
    }

    /// Move the effective interval. A resize only moves the end.
    pub fn move_by(&mut self, delta: TimeDelta, resize: bool) {
        self.end += delta;
        if !resize {
            self.start += delta;
        }
    }

    /// Re-anchor to a shifted original slot after the owning event was edited.
    pub fn shift_original(&mut self, delta_start: TimeDelta, delta_end: TimeDelta) {
        self.original_start += delta_start;
        self.original_end += delta_end;
    }

    /// Half-open intersection of the effective interval with `[start, end)`.
    pub fn intersects(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        self.start < end && self.end > start
    }

    pub fn duration(&self) -> TimeDelta {
        self.end - self.start
    }
}
