//! Calendars own events and fix the timezone they are expanded and displayed in.

use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

pub type CalendarId = i64;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Calendar {
    pub id: CalendarId,
    pub slug: String,
    pub name: String,
    #[serde(default = "default_timezone")]
    pub timezone: Tz,
}

fn default_timezone() -> Tz {
    Tz::UTC
}

impl Calendar {
    pub fn new(id: CalendarId, slug: impl Into<String>, name: impl Into<String>) -> Self {
        Calendar {
            id,
            slug: slug.into(),
            name: name.into(),
            timezone: Tz::UTC,
        }
    }

    pub fn with_timezone(mut self, timezone: Tz) -> Self {
        self.timezone = timezone;
        self
    }
}
