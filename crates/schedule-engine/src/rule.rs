//! Recurrence rules and their expansion into concrete slots.
//!
//! A rule only describes cadence. The anchor (an event's first start/end), the
//! horizon (`end_recurring_period`) and the wall-clock timezone come from the
//! event being expanded. Expansion is delegated to the `rrule` crate, with the
//! body of the RRULE rendered from a closed [`Frequency`] enum and typed
//! [`RuleParams`].

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeDelta, Utc, Weekday};
use chrono_tz::Tz;
use rrule::RRuleSet;
use serde::{Deserialize, Serialize};

use crate::error::{Result, ScheduleError};

pub type RuleId = i64;

/// How often a rule repeats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Frequency {
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

impl Frequency {
    /// The RFC 5545 `FREQ` value for this frequency.
    pub fn as_str(&self) -> &'static str {
        match self {
            Frequency::Daily => "DAILY",
            Frequency::Weekly => "WEEKLY",
            Frequency::Monthly => "MONTHLY",
            Frequency::Yearly => "YEARLY",
        }
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Frequency {
    type Err = ScheduleError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "DAILY" => Ok(Frequency::Daily),
            "WEEKLY" => Ok(Frequency::Weekly),
            "MONTHLY" => Ok(Frequency::Monthly),
            "YEARLY" => Ok(Frequency::Yearly),
            other => Err(ScheduleError::Configuration(format!(
                "unsupported frequency '{other}'"
            ))),
        }
    }
}

/// A weekday filter, optionally restricted to the n-th such day of the
/// month/year (`+1MO`, `-1FR`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WeekdaySpec {
    pub weekday: Weekday,
    pub ordinal: Option<i16>,
}

impl WeekdaySpec {
    fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim().to_ascii_uppercase();

        // Plain integers follow the python-dateutil convention: Monday = 0.
        if let Ok(n) = raw.parse::<u8>() {
            let weekday = match n {
                0 => Weekday::Mon,
                1 => Weekday::Tue,
                2 => Weekday::Wed,
                3 => Weekday::Thu,
                4 => Weekday::Fri,
                5 => Weekday::Sat,
                6 => Weekday::Sun,
                _ => return Err(invalid("byweekday", &raw, "expected 0-6")),
            };
            return Ok(WeekdaySpec {
                weekday,
                ordinal: None,
            });
        }

        // "MO(+1)" form.
        if let Some(open) = raw.find('(') {
            let code = &raw[..open];
            let inner = raw[open + 1..]
                .strip_suffix(')')
                .ok_or_else(|| invalid("byweekday", &raw, "unbalanced parenthesis"))?;
            let weekday = weekday_from_code(code)
                .ok_or_else(|| invalid("byweekday", &raw, "unknown day"))?;
            return Ok(WeekdaySpec {
                weekday,
                ordinal: Some(parse_ordinal(inner, &raw)?),
            });
        }

        // "+1MO" / "-1FR" / "MO" form.
        if raw.len() < 2 || !raw.is_char_boundary(raw.len() - 2) {
            return Err(invalid("byweekday", &raw, "unknown day"));
        }
        let (prefix, code) = raw.split_at(raw.len() - 2);
        let weekday =
            weekday_from_code(code).ok_or_else(|| invalid("byweekday", &raw, "unknown day"))?;
        let ordinal = if prefix.is_empty() {
            None
        } else {
            Some(parse_ordinal(prefix, &raw)?)
        };
        Ok(WeekdaySpec { weekday, ordinal })
    }

    fn to_rrule(self) -> String {
        match self.ordinal {
            Some(n) => format!("{}{}", n, weekday_code(self.weekday)),
            None => weekday_code(self.weekday).to_string(),
        }
    }
}

fn parse_ordinal(raw: &str, whole: &str) -> Result<i16> {
    let n: i16 = raw
        .trim_start_matches('+')
        .parse()
        .map_err(|_| invalid("byweekday", whole, "bad ordinal"))?;
    if n == 0 || !(-53..=53).contains(&n) {
        return Err(invalid("byweekday", whole, "ordinal out of range"));
    }
    Ok(n)
}

fn weekday_from_code(code: &str) -> Option<Weekday> {
    match code {
        "MO" => Some(Weekday::Mon),
        "TU" => Some(Weekday::Tue),
        "WE" => Some(Weekday::Wed),
        "TH" => Some(Weekday::Thu),
        "FR" => Some(Weekday::Fri),
        "SA" => Some(Weekday::Sat),
        "SU" => Some(Weekday::Sun),
        _ => None,
    }
}

fn weekday_code(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "MO",
        Weekday::Tue => "TU",
        Weekday::Wed => "WE",
        Weekday::Thu => "TH",
        Weekday::Fri => "FR",
        Weekday::Sat => "SA",
        Weekday::Sun => "SU",
    }
}

fn invalid(key: &str, value: &str, reason: &str) -> ScheduleError {
    ScheduleError::Configuration(format!("invalid rule param {key}:{value} ({reason})"))
}

/// Typed rule parameters, parsed from `key:value[,value];key:value` text.
///
/// ```
/// use schedule_engine::rule::RuleParams;
///
/// let params: RuleParams = "interval:2;byweekday:MO,WE;count:10".parse().unwrap();
/// assert_eq!(params.interval, Some(2));
/// assert_eq!(params.count, Some(10));
/// assert_eq!(params.by_weekday.len(), 2);
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RuleParams {
    pub interval: Option<u16>,
    pub count: Option<u32>,
    pub until: Option<DateTime<Utc>>,
    pub by_set_pos: Vec<i16>,
    pub by_month: Vec<u8>,
    pub by_month_day: Vec<i8>,
    pub by_year_day: Vec<i16>,
    pub by_week_no: Vec<i8>,
    pub by_weekday: Vec<WeekdaySpec>,
    pub by_hour: Vec<u8>,
    pub by_minute: Vec<u8>,
    pub by_second: Vec<u8>,
    pub week_start: Option<Weekday>,
}

impl FromStr for RuleParams {
    type Err = ScheduleError;

    fn from_str(s: &str) -> Result<Self> {
        let mut params = RuleParams::default();

        for pair in s.split(';').map(str::trim).filter(|p| !p.is_empty()) {
            let (key, value) = pair
                .split_once(':')
                .ok_or_else(|| invalid(pair, "", "expected key:value"))?;
            let key = key.trim().to_ascii_lowercase();
            let value = value.trim();
            if value.is_empty() {
                return Err(invalid(&key, value, "empty value"));
            }

            match key.as_str() {
                "interval" => {
                    let n: u16 = scalar(&key, value)?;
                    if n == 0 {
                        return Err(invalid(&key, value, "must be at least 1"));
                    }
                    params.interval = Some(n);
                }
                "count" => {
                    let n: u32 = scalar(&key, value)?;
                    if n == 0 {
                        return Err(invalid(&key, value, "must be at least 1"));
                    }
                    params.count = Some(n);
                }
                "until" => params.until = Some(parse_until(value)?),
                "bysetpos" => params.by_set_pos = signed_list(&key, value, 366)?,
                "bymonth" => params.by_month = unsigned_list(&key, value, 1, 12)?,
                "bymonthday" => params.by_month_day = signed_list(&key, value, 31)?,
                "byyearday" => params.by_year_day = signed_list(&key, value, 366)?,
                "byweekno" => params.by_week_no = signed_list(&key, value, 53)?,
                "byweekday" | "byday" => {
                    params.by_weekday = value
                        .split(',')
                        .map(WeekdaySpec::parse)
                        .collect::<Result<_>>()?;
                }
                "byhour" => params.by_hour = unsigned_list(&key, value, 0, 23)?,
                "byminute" => params.by_minute = unsigned_list(&key, value, 0, 59)?,
                "bysecond" => params.by_second = unsigned_list(&key, value, 0, 59)?,
                "wkst" => {
                    let spec = WeekdaySpec::parse(value)?;
                    if spec.ordinal.is_some() {
                        return Err(invalid(&key, value, "week start takes no ordinal"));
                    }
                    params.week_start = Some(spec.weekday);
                }
                _ => return Err(invalid(&key, value, "unknown parameter")),
            }
        }

        Ok(params)
    }
}

fn scalar<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| invalid(key, value, "not a number"))
}

fn unsigned_list(key: &str, value: &str, min: u8, max: u8) -> Result<Vec<u8>> {
    value
        .split(',')
        .map(|v| {
            let n: u8 = scalar(key, v.trim())?;
            if n < min || n > max {
                return Err(invalid(key, value, "out of range"));
            }
            Ok(n)
        })
        .collect()
}

fn signed_list<T>(key: &str, value: &str, bound: i16) -> Result<Vec<T>>
where
    T: TryFrom<i16>,
{
    value
        .split(',')
        .map(|v| {
            let n: i16 = scalar(key, v.trim().trim_start_matches('+'))?;
            if n == 0 || n.abs() > bound {
                return Err(invalid(key, value, "out of range"));
            }
            T::try_from(n).map_err(|_| invalid(key, value, "out of range"))
        })
        .collect()
}

/// Parse an `until` value. A bare date includes that whole (UTC) day.
fn parse_until(value: &str) -> Result<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Ok(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S", "%Y%m%dT%H%M%SZ", "%Y%m%dT%H%M%S"] {
        if let Ok(ndt) = NaiveDateTime::parse_from_str(value, fmt) {
            return Ok(ndt.and_utc());
        }
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(23, 59, 59))
        .map(|ndt| ndt.and_utc())
        .ok_or_else(|| invalid("until", value, "not a date or datetime"))
}

impl RuleParams {
    /// Render the RRULE body (without DTSTART) for the given frequency.
    ///
    /// `until` is not rendered; it is applied as an expansion bound instead,
    /// which avoids the DTSTART/UNTIL timezone pairing rules of RFC 5545.
    pub fn to_rrule(&self, frequency: Frequency) -> String {
        fn join<T: ToString>(values: &[T]) -> String {
            values
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(",")
        }

        let mut parts = vec![format!("FREQ={}", frequency.as_str())];
        if let Some(n) = self.interval {
            parts.push(format!("INTERVAL={n}"));
        }
        if let Some(n) = self.count {
            parts.push(format!("COUNT={n}"));
        }
        if let Some(day) = self.week_start {
            parts.push(format!("WKST={}", weekday_code(day)));
        }
        if !self.by_set_pos.is_empty() {
            parts.push(format!("BYSETPOS={}", join(&self.by_set_pos)));
        }
        if !self.by_month.is_empty() {
            parts.push(format!("BYMONTH={}", join(&self.by_month)));
        }
        if !self.by_month_day.is_empty() {
            parts.push(format!("BYMONTHDAY={}", join(&self.by_month_day)));
        }
        if !self.by_year_day.is_empty() {
            parts.push(format!("BYYEARDAY={}", join(&self.by_year_day)));
        }
        if !self.by_week_no.is_empty() {
            parts.push(format!("BYWEEKNO={}", join(&self.by_week_no)));
        }
        if !self.by_weekday.is_empty() {
            let days: Vec<String> = self.by_weekday.iter().map(|d| d.to_rrule()).collect();
            parts.push(format!("BYDAY={}", days.join(",")));
        }
        if !self.by_hour.is_empty() {
            parts.push(format!("BYHOUR={}", join(&self.by_hour)));
        }
        if !self.by_minute.is_empty() {
            parts.push(format!("BYMINUTE={}", join(&self.by_minute)));
        }
        if !self.by_second.is_empty() {
            parts.push(format!("BYSECOND={}", join(&self.by_second)));
        }
        parts.join(";")
    }
}

/// Raw, serde-facing form of a rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RuleRecord {
    #[serde(default)]
    id: Option<RuleId>,
    name: String,
    #[serde(default)]
    description: String,
    frequency: Frequency,
    #[serde(default)]
    params: String,
}

/// A named, shareable recurrence rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RuleRecord", into = "RuleRecord")]
pub struct RecurrenceRule {
    id: Option<RuleId>,
    name: String,
    description: String,
    frequency: Frequency,
    params: String,
    parsed: RuleParams,
}

impl TryFrom<RuleRecord> for RecurrenceRule {
    type Error = ScheduleError;

    fn try_from(record: RuleRecord) -> Result<Self> {
        let mut rule = RecurrenceRule::new(record.name, record.frequency, &record.params)?;
        rule.id = record.id;
        rule.description = record.description;
        Ok(rule)
    }
}

impl From<RecurrenceRule> for RuleRecord {
    fn from(rule: RecurrenceRule) -> Self {
        RuleRecord {
            id: rule.id,
            name: rule.name,
            description: rule.description,
            frequency: rule.frequency,
            params: rule.params,
        }
    }
}

impl RecurrenceRule {
    /// Build a rule, rejecting malformed `params` up front.
    ///
    /// # Errors
    /// Returns `ScheduleError::Configuration` if `params` cannot be parsed or
    /// do not fit `frequency` (e.g. `bymonthday` on a weekly rule).
    pub fn new(name: impl Into<String>, frequency: Frequency, params: &str) -> Result<Self> {
        let name: String = name.into();
        let parsed: RuleParams = params.parse()?;
        format!("DTSTART:19700101T000000Z\nRRULE:{}", parsed.to_rrule(frequency))
            .parse::<RRuleSet>()
            .map_err(|e| ScheduleError::Configuration(format!("rule '{name}' is invalid: {e}")))?;
        Ok(RecurrenceRule {
            id: None,
            name,
            description: String::new(),
            frequency,
            params: params.to_string(),
            parsed,
        })
    }

    pub fn with_id(mut self, id: RuleId) -> Self {
        self.id = Some(id);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn id(&self) -> Option<RuleId> {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn frequency(&self) -> Frequency {
        self.frequency
    }

    /// The params exactly as written.
    pub fn params(&self) -> &str {
        &self.params
    }

    pub fn parsed_params(&self) -> &RuleParams {
        &self.parsed
    }

    /// Prepare a bounded expansion of this rule for one event.
    ///
    /// # Arguments
    /// - `anchor_start`, `anchor_end`: the event's first slot; its length is
    ///   the length of every generated slot
    /// - `horizon`: no slot starts after this instant (inclusive)
    /// - `timezone`: wall-clock zone the cadence is computed in
    ///
    /// # Errors
    /// Returns `ScheduleError::Configuration` if the anchor is empty or the
    /// `rrule` crate rejects the rendered rule.
    pub fn recurrence(
        &self,
        anchor_start: DateTime<Utc>,
        anchor_end: DateTime<Utc>,
        horizon: DateTime<Utc>,
        timezone: Tz,
    ) -> Result<Recurrence> {
        if anchor_end <= anchor_start {
            return Err(ScheduleError::Configuration(
                "the end time must be later than the start time".to_string(),
            ));
        }

        let dtstart = anchor_start
            .with_timezone(&timezone)
            .format("%Y%m%dT%H%M%S");
        let rrule_text = format!(
            "DTSTART;TZID={}:{}\nRRULE:{}",
            timezone.name(),
            dtstart,
            self.parsed.to_rrule(self.frequency)
        );

        let set: RRuleSet = rrule_text.parse().map_err(|e| {
            ScheduleError::Configuration(format!("rule '{}' is invalid: {}", self.name, e))
        })?;

        let horizon = match self.parsed.until {
            Some(until) => horizon.min(until),
            None => horizon,
        };

        Ok(Recurrence {
            set,
            anchor_start,
            duration: anchor_end - anchor_start,
            horizon,
        })
    }
}

/// One generated `(start, end)` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Slot {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl Slot {
    /// Whether this slot intersects the half-open window `[start, end)`.
    pub fn intersects(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        self.start < end && self.end > start
    }
}

/// A rule bound to an anchor, a horizon and a timezone.
///
/// Iterators returned from here are lazy and finite, and calling them again
/// restarts from the anchor.
#[derive(Debug, Clone)]
pub struct Recurrence {
    set: RRuleSet,
    anchor_start: DateTime<Utc>,
    duration: TimeDelta,
    horizon: DateTime<Utc>,
}

impl Recurrence {
    pub fn duration(&self) -> TimeDelta {
        self.duration
    }

    /// The effective horizon (the event's, or the rule's `until` if earlier).
    pub fn horizon(&self) -> DateTime<Utc> {
        self.horizon
    }

    /// Every slot from the anchor up to the horizon.
    pub fn slots(&self) -> impl Iterator<Item = Slot> + '_ {
        let anchor = self.anchor_start;
        let horizon = self.horizon;
        let duration = self.duration;
        (&self.set)
            .into_iter()
            .map(|dt| dt.with_timezone(&Utc))
            .skip_while(move |start| *start < anchor)
            .take_while(move |start| *start <= horizon)
            .map(move |start| Slot {
                start,
                end: start + duration,
            })
    }

    /// Slots intersecting `[window_start, window_end)`.
    pub fn slots_between(
        &self,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> impl Iterator<Item = Slot> + '_ {
        self.slots()
            .skip_while(move |slot| slot.end <= window_start)
            .take_while(move |slot| slot.start < window_end)
    }

    /// The first slot starting at or after `instant`.
    pub fn first_at_or_after(&self, instant: DateTime<Utc>) -> Option<Slot> {
        self.slots().find(|slot| slot.start >= instant)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_params_are_valid() {
        assert_eq!("".parse::<RuleParams>().unwrap(), RuleParams::default());
    }

    #[test]
    fn weekday_forms() {
        assert_eq!(
            WeekdaySpec::parse("0").unwrap(),
            WeekdaySpec {
                weekday: Weekday::Mon,
                ordinal: None
            }
        );
        assert_eq!(WeekdaySpec::parse("-1FR").unwrap().ordinal, Some(-1));
        assert_eq!(WeekdaySpec::parse("MO(+2)").unwrap().ordinal, Some(2));
        assert!(WeekdaySpec::parse("XX").is_err());
        assert!(WeekdaySpec::parse("7").is_err());
    }

    #[test]
    fn renders_rrule_body() {
        let params: RuleParams = "interval:2;byweekday:0,2;bysetpos:-1".parse().unwrap();
        assert_eq!(
            params.to_rrule(Frequency::Monthly),
            "FREQ=MONTHLY;INTERVAL=2;BYSETPOS=-1;BYDAY=MO,WE"
        );
    }

    #[test]
    fn date_only_until_covers_the_day() {
        let params: RuleParams = "until:2024-01-05".parse().unwrap();
        assert_eq!(
            params.until.unwrap().to_rfc3339(),
            "2024-01-05T23:59:59+00:00"
        );
    }
}
