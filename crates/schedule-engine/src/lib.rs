//! # schedule-engine
//!
//! Recurring event expansion, occurrence overrides and conflict detection for
//! calendars.
//!
//! Events are durable definitions (a slot, optionally repeated by a
//! [`RecurrenceRule`] up to a horizon). Occurrences are computed from them on
//! demand; the ones a user moved, retitled or cancelled are persisted as
//! overrides anchored to their original slot. The engine merges both, answers
//! "what occurs in `[start, end)`", and rejects writes that would overlap an
//! existing occurrence on the same calendar.
//!
//! ## Modules
//!
//! - [`rule`]: frequency + params → bounded, lazy slot sequences (via `rrule`)
//! - [`calendar`]: calendars and their timezone
//! - [`event`]: events and per-event occurrence expansion
//! - [`occurrence`]: virtual and persisted occurrences
//! - [`period`]: windowed multi-event merge, day/week/month/year navigation
//! - [`conflict`]: overlap validation for events and occurrences
//! - [`feed`]: JSON read model and "live now" query
//! - [`repository`]: storage interface and in-memory implementation
//! - [`scheduler`]: validated edit flows over a repository
//! - [`settings`]: engine configuration
//! - [`error`]: error types

pub mod calendar;
pub mod conflict;
pub mod error;
pub mod event;
pub mod feed;
pub mod occurrence;
pub mod period;
pub mod repository;
pub mod rule;
pub mod scheduler;
pub mod settings;

pub use calendar::Calendar;
pub use conflict::{check_event, check_occurrence, time_conflicts};
pub use error::{ConflictError, ScheduleError};
pub use event::Event;
pub use feed::{build_feed, FeedEntry, FeedId};
pub use occurrence::Occurrence;
pub use period::{expand, Frame, Granularity, Period, SpanClass};
pub use repository::{MemoryRepository, Repository, Snapshot};
pub use rule::{Frequency, RecurrenceRule};
pub use scheduler::{MoveTarget, OccurrenceLookup, Scheduler};
pub use settings::Settings;
