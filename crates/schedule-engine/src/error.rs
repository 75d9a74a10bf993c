//! Error types for schedule-engine operations.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use thiserror::Error;

use crate::event::EventId;

/// A temporal overlap found while validating a pending write.
///
/// Carries the conflicting occurrence's title, its owning event and its
/// effective interval, plus the zone the interval is rendered in.
#[derive(Debug, Clone, PartialEq)]
pub struct ConflictError {
    pub title: String,
    pub event_id: Option<EventId>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub timezone: Tz,
}

impl std::fmt::Display for ConflictError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        const FMT: &str = "%Y-%m-%d %H:%M%Z";
        let id = self
            .event_id
            .map(|id| id.to_string())
            .unwrap_or_else(|| "unsaved".to_string());
        write!(
            f,
            "conflicts with an occurrence of event '{}' (id = {}): conflicting occurrence runs {} -- {}",
            self.title,
            id,
            self.start.with_timezone(&self.timezone).format(FMT),
            self.end.with_timezone(&self.timezone).format(FMT),
        )
    }
}

impl std::error::Error for ConflictError {}

#[derive(Error, Debug)]
pub enum ScheduleError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Conflict: {0}")]
    Conflict(#[from] ConflictError),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl ScheduleError {
    /// The conflict details, if this is a conflict.
    pub fn as_conflict(&self) -> Option<&ConflictError> {
        match self {
            ScheduleError::Conflict(c) => Some(c),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, ScheduleError>;
