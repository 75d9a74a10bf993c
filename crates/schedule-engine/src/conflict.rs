//! Detect overlapping occurrences before a write is committed.
//!
//! Intervals are half-open: an occurrence ending exactly when another starts is
//! NOT a conflict. Cancelled occurrences never raise or receive a conflict.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;

use crate::error::{ConflictError, Result, ScheduleError};
use crate::event::{Event, EventId};
use crate::occurrence::Occurrence;
use crate::period;

/// Whether `[start1, end1)` overlaps `[start2, end2)`.
///
/// Equivalent to `start1 < end2 && start2 < end1` for non-empty intervals.
/// An empty interval (`end <= start`) occupies no time and never conflicts.
pub fn time_conflicts(
    start1: DateTime<Utc>,
    end1: DateTime<Utc>,
    start2: DateTime<Utc>,
    end2: DateTime<Utc>,
) -> bool {
    if end1 <= start1 || end2 <= start2 {
        return false;
    }
    // Starts inside the other interval (start1 == end2 is allowed).
    if start2 <= start1 && start1 < end2 {
        return true;
    }
    // Ends inside the other interval (end1 == start2 is allowed).
    if start2 < end1 && end1 <= end2 {
        return true;
    }
    // Contained in the other interval.
    if start2 <= start1 && end1 <= end2 {
        return true;
    }
    // Contains the other interval.
    start1 <= start2 && end2 <= end1
}

/// A detected overlap between a candidate and an existing occurrence.
#[derive(Debug, Clone, PartialEq)]
pub struct Conflict {
    pub candidate: Occurrence,
    pub existing: Occurrence,
    pub overlap_minutes: i64,
}

/// Find all pairwise conflicts between candidate and existing occurrences,
/// skipping cancelled ones on either side.
pub fn find_conflicts(candidates: &[Occurrence], existing: &[Occurrence]) -> Vec<Conflict> {
    let mut conflicts = Vec::new();

    for a in candidates.iter().filter(|o| !o.cancelled) {
        for b in existing.iter().filter(|o| !o.cancelled) {
            if time_conflicts(a.start, a.end, b.start, b.end) {
                let overlap_start = a.start.max(b.start);
                let overlap_end = a.end.min(b.end);
                conflicts.push(Conflict {
                    candidate: a.clone(),
                    existing: b.clone(),
                    overlap_minutes: (overlap_end - overlap_start).num_minutes(),
                });
            }
        }
    }

    conflicts
}

/// Test one occurrence against every non-cancelled occurrence of `events`.
///
/// A cancelled candidate is never checked.
///
/// # Errors
/// Returns `ScheduleError::Conflict` for the first overlap found.
pub fn check_occurrence_against(candidate: &Occurrence, events: &[Event]) -> Result<()> {
    if candidate.cancelled {
        return Ok(());
    }
    first_conflict(std::slice::from_ref(candidate), events.iter(), Tz::UTC)
}

/// Validate a new or edited event against the other events of its calendar.
///
/// Every occurrence of the candidate (the single one, or each instance up to
/// its horizon) is tested. Events with id `exclude`, events with the
/// candidate's own id and events on other calendars are left out of `pool`.
///
/// # Errors
/// Returns `ScheduleError::Configuration` when the candidate is not
/// expandable, or `ScheduleError::Conflict` for the first overlap found.
pub fn check_event(candidate: &Event, pool: &[Event], exclude: Option<EventId>) -> Result<()> {
    candidate.validate()?;

    let skip = |event: &Event| {
        event.id.is_some() && (event.id == exclude || event.id == candidate.id)
    };
    let others = pool
        .iter()
        .filter(|event| event.calendar_id == candidate.calendar_id && !skip(event));

    let occurrences = candidate.all_occurrences()?;
    tracing::debug!(
        event_id = ?candidate.id,
        occurrences = occurrences.len(),
        "checking event for conflicts"
    );
    first_conflict(&occurrences, others, candidate.timezone)
}

/// Validate an edited occurrence of `owning` against every other event.
///
/// Cancelled occurrences are always accepted. The owning event is excluded
/// from the comparison, so an occurrence never conflicts with its siblings.
///
/// # Errors
/// Returns `ScheduleError::Configuration` for an empty interval, or
/// `ScheduleError::Conflict` for the first overlap found.
pub fn check_occurrence(candidate: &Occurrence, owning: &Event, pool: &[Event]) -> Result<()> {
    if candidate.cancelled {
        return Ok(());
    }
    let standalone = Event::new(
        owning.calendar_id,
        candidate.title.clone(),
        candidate.start,
        candidate.end,
    )
    .with_timezone(owning.timezone);
    standalone.validate()?;

    let others = pool.iter().filter(|event| {
        event.calendar_id == owning.calendar_id && (owning.id.is_none() || event.id != owning.id)
    });
    first_conflict(&standalone.all_occurrences()?, others, owning.timezone)
}

/// Expand `others` once over the candidates' overall span and return the
/// first overlap with a non-cancelled occurrence.
fn first_conflict<'e>(
    candidates: &[Occurrence],
    others: impl Iterator<Item = &'e Event> + Clone,
    fallback_tz: Tz,
) -> Result<()> {
    let live: Vec<&Occurrence> = candidates.iter().filter(|o| !o.cancelled).collect();
    let (Some(span_start), Some(span_end)) = (
        live.iter().map(|o| o.start).min(),
        live.iter().map(|o| o.end).max(),
    ) else {
        return Ok(());
    };

    let existing: Vec<Occurrence> = period::expand(others.clone(), span_start, span_end)?
        .into_iter()
        .filter(|o| !o.cancelled)
        .collect();

    for occ in live {
        // `existing` is sorted by start; nothing at or past `occ.end` can overlap.
        let upper = existing.partition_point(|e| e.start < occ.end);
        if let Some(hit) = existing[..upper]
            .iter()
            .find(|e| time_conflicts(occ.start, occ.end, e.start, e.end))
        {
            let timezone = others
                .clone()
                .find(|event| event.id.is_some() && event.id == hit.event_id)
                .map(|event| event.timezone)
                .unwrap_or(fallback_tz);
            tracing::warn!(
                event_id = ?hit.event_id,
                title = %hit.title,
                start = %hit.start,
                end = %hit.end,
                "conflict detected"
            );
            return Err(ScheduleError::Conflict(ConflictError {
                title: hit.title.clone(),
                event_id: hit.event_id,
                start: hit.start,
                end: hit.end,
                timezone,
            }));
        }
    }

    Ok(())
}
