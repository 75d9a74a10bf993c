//! Engine configuration.
//!
//! Every field has a default, so an empty JSON object is a valid config.

use std::path::Path;

use chrono::{TimeDelta, Weekday};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::error::{Result, ScheduleError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// First column of week and month grids.
    pub first_day_of_week: Weekday,
    /// Title given to events created by a bare time-range selection.
    pub event_name_placeholder: String,
    /// Whether period views list cancelled occurrences.
    pub show_cancelled_occurrences: bool,
    /// Length of the "happening now" window, in seconds.
    pub live_now_window_seconds: i64,
    /// Zone naive date/times are read in.
    pub default_timezone: Tz,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            first_day_of_week: Weekday::Sun,
            event_name_placeholder: "Event Name".to_string(),
            show_cancelled_occurrences: false,
            live_now_window_seconds: 1,
            default_timezone: Tz::UTC,
        }
    }
}

impl Settings {
    /// # Errors
    /// Returns `ScheduleError::Configuration` for malformed JSON or values.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let settings: Settings = serde_json::from_str(json)
            .map_err(|e| ScheduleError::Configuration(format!("invalid settings: {e}")))?;
        settings.validate()?;
        Ok(settings)
    }

    /// # Errors
    /// Returns `ScheduleError::Configuration` if the file cannot be read or parsed.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            ScheduleError::Configuration(format!("cannot read {}: {e}", path.display()))
        })?;
        Settings::from_json_str(&json)
    }

    fn validate(&self) -> Result<()> {
        if self.live_now_window_seconds <= 0 {
            return Err(ScheduleError::Configuration(
                "live_now_window_seconds must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn live_now_window(&self) -> TimeDelta {
        TimeDelta::seconds(self.live_now_window_seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_object_is_default() {
        assert_eq!(Settings::from_json_str("{}").unwrap(), Settings::default());
    }

    #[test]
    fn overrides_fields() {
        let settings = Settings::from_json_str(
            r#"{"first_day_of_week":"Mon","default_timezone":"Europe/Berlin"}"#,
        )
        .unwrap();
        assert_eq!(settings.first_day_of_week, Weekday::Mon);
        assert_eq!(settings.default_timezone, chrono_tz::Europe::Berlin);
        assert_eq!(settings.event_name_placeholder, "Event Name");
    }

    #[test]
    fn rejects_empty_live_window() {
        assert!(Settings::from_json_str(r#"{"live_now_window_seconds":0}"#).is_err());
    }
}
