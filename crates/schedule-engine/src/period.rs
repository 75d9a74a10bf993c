//! Windowed merging of many events, and calendar-aligned periods.
//!
//! A [`Period`] expands a set of events over `[start, end)` into one sorted list
//! of occurrences. Periods built with [`Period::around`] are aligned to a
//! calendar day, week, month or year in a given timezone and can be navigated
//! (`next`/`prev`) and split into sub-periods, which reuse the parent's
//! occurrences instead of expanding again.

use chrono::{
    DateTime, Datelike, Months, NaiveDate, NaiveTime, TimeDelta, TimeZone, Utc, Weekday,
};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::error::{Result, ScheduleError};
use crate::event::Event;
use crate::occurrence::Occurrence;

/// Expand `events` over `[start, end)` into one ordered list.
///
/// Sorted by effective start, ties broken by event id and then original start.
pub fn expand<'e>(
    events: impl IntoIterator<Item = &'e Event>,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<Vec<Occurrence>> {
    let mut occurrences = Vec::new();
    let mut count = 0usize;
    for event in events {
        occurrences.extend(event.get_occurrences(start, end)?);
        count += 1;
    }
    sort_occurrences(&mut occurrences);
    tracing::debug!(
        events = count,
        occurrences = occurrences.len(),
        %start,
        %end,
        "expanded period"
    );
    Ok(occurrences)
}

fn sort_occurrences(occurrences: &mut [Occurrence]) {
    occurrences.sort_by_key(|occ| (occ.start, occ.event_id, occ.original_start));
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    Day,
    Week,
    Month,
    Year,
}

impl std::str::FromStr for Granularity {
    type Err = ScheduleError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "day" => Ok(Granularity::Day),
            "week" => Ok(Granularity::Week),
            "month" => Ok(Granularity::Month),
            "year" => Ok(Granularity::Year),
            other => Err(ScheduleError::Configuration(format!(
                "unknown period granularity '{other}'"
            ))),
        }
    }
}

/// How an occurrence sits relative to a period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpanClass {
    /// Starts in the period and ends after it.
    Starts,
    /// Starts and ends in the period.
    Within,
    /// Started before the period and ends after it.
    Continues,
    /// Started before the period and ends in it.
    Ends,
}

/// Alignment of a period on the calendar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame {
    pub granularity: Granularity,
    pub timezone: Tz,
    pub first_weekday: Weekday,
}

impl Frame {
    pub fn new(granularity: Granularity, timezone: Tz, first_weekday: Weekday) -> Self {
        Frame {
            granularity,
            timezone,
            first_weekday,
        }
    }

    fn with_granularity(self, granularity: Granularity) -> Self {
        Frame {
            granularity,
            ..self
        }
    }

    /// First local date of the frame containing `date`.
    fn first_date(&self, date: NaiveDate) -> NaiveDate {
        match self.granularity {
            Granularity::Day => date,
            Granularity::Week => {
                let back = (7 + date.weekday().num_days_from_monday()
                    - self.first_weekday.num_days_from_monday())
                    % 7;
                date - TimeDelta::days(i64::from(back))
            }
            Granularity::Month => date.with_day(1).unwrap_or(date),
            Granularity::Year => date.with_ordinal(1).unwrap_or(date),
        }
    }

    /// `date` moved by `n` frame units.
    fn shift_date(&self, date: NaiveDate, n: i32) -> Result<NaiveDate> {
        let out_of_range = || ScheduleError::Configuration("date out of range".to_string());
        let months = |count: i32| -> Result<NaiveDate> {
            let delta = Months::new(count.unsigned_abs());
            if count >= 0 {
                date.checked_add_months(delta)
            } else {
                date.checked_sub_months(delta)
            }
            .ok_or_else(out_of_range)
        };
        match self.granularity {
            Granularity::Day => date
                .checked_add_signed(TimeDelta::days(i64::from(n)))
                .ok_or_else(out_of_range),
            Granularity::Week => date
                .checked_add_signed(TimeDelta::weeks(i64::from(n)))
                .ok_or_else(out_of_range),
            Granularity::Month => months(n),
            Granularity::Year => months(n.checked_mul(12).ok_or_else(out_of_range)?),
        }
    }

    /// UTC bounds of the frame containing the local `date`.
    fn bounds(&self, date: NaiveDate) -> Result<(DateTime<Utc>, DateTime<Utc>)> {
        let first = self.first_date(date);
        let next = self.shift_date(first, 1)?;
        Ok((
            local_midnight(self.timezone, first),
            local_midnight(self.timezone, next),
        ))
    }

    fn local_date(&self, instant: DateTime<Utc>) -> NaiveDate {
        instant.with_timezone(&self.timezone).date_naive()
    }
}

/// Start of the local day as a UTC instant. Days whose midnight falls in a DST
/// gap start at the first valid local time.
fn local_midnight(tz: Tz, date: NaiveDate) -> DateTime<Utc> {
    let midnight = date.and_time(NaiveTime::MIN);
    (0..24)
        .find_map(|h| {
            tz.from_local_datetime(&(midnight + TimeDelta::hours(h)))
                .earliest()
        })
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|| midnight.and_utc())
}

/// A window over a set of events and the occurrences it contains.
#[derive(Debug, Clone)]
pub struct Period<'a> {
    events: &'a [Event],
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    occurrences: Vec<Occurrence>,
    frame: Option<Frame>,
}

impl<'a> Period<'a> {
    /// Expand `events` over `[start, end)`.
    ///
    /// # Errors
    /// Returns `ScheduleError::Configuration` if any event cannot be expanded.
    pub fn new(events: &'a [Event], start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self> {
        Ok(Period {
            events,
            start,
            end,
            occurrences: expand(events, start, end)?,
            frame: None,
        })
    }

    /// A period over occurrences that were already expanded, e.g. a parent
    /// period's. Only occurrences intersecting `[start, end)` are kept.
    pub fn from_pool(
        events: &'a [Event],
        pool: &[Occurrence],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Self {
        let mut occurrences: Vec<Occurrence> = pool
            .iter()
            .filter(|occ| occ.intersects(start, end))
            .cloned()
            .collect();
        sort_occurrences(&mut occurrences);
        Period {
            events,
            start,
            end,
            occurrences,
            frame: None,
        }
    }

    /// The day/week/month/year containing `reference`, in `frame.timezone`.
    pub fn around(events: &'a [Event], reference: DateTime<Utc>, frame: Frame) -> Result<Self> {
        Period::around_date(events, frame.local_date(reference), frame)
    }

    /// The frame containing the local calendar date `date`.
    pub fn around_date(events: &'a [Event], date: NaiveDate, frame: Frame) -> Result<Self> {
        let (start, end) = frame.bounds(date)?;
        let mut period = Period::new(events, start, end)?;
        period.frame = Some(frame);
        Ok(period)
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    pub fn events(&self) -> &'a [Event] {
        self.events
    }

    pub fn frame(&self) -> Option<Frame> {
        self.frame
    }

    pub fn granularity(&self) -> Option<Granularity> {
        self.frame.map(|f| f.granularity)
    }

    pub fn occurrences(&self) -> &[Occurrence] {
        &self.occurrences
    }

    pub fn into_occurrences(self) -> Vec<Occurrence> {
        self.occurrences
    }

    pub fn has_occurrences(&self) -> bool {
        !self.occurrences.is_empty()
    }

    /// Whether `instant` falls in `[start, end)`.
    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        self.start <= instant && instant < self.end
    }

    /// The period `n` units away. Aligned periods move by their granularity,
    /// plain ones by their own length.
    pub fn shifted(&self, n: i32) -> Result<Period<'a>> {
        match self.frame {
            Some(frame) => {
                let date = frame.shift_date(frame.local_date(self.start), n)?;
                Period::around_date(self.events, date, frame)
            }
            None => {
                let out_of_range = || ScheduleError::Configuration("date out of range".to_string());
                let step = (self.end - self.start).checked_mul(n).ok_or_else(out_of_range)?;
                let start = self.start.checked_add_signed(step).ok_or_else(out_of_range)?;
                let end = self.end.checked_add_signed(step).ok_or_else(out_of_range)?;
                Period::new(self.events, start, end)
            }
        }
    }

    pub fn next(&self) -> Result<Period<'a>> {
        self.shifted(1)
    }

    pub fn prev(&self) -> Result<Period<'a>> {
        self.shifted(-1)
    }

    /// Sub-periods of `granularity` covering this period, reusing its
    /// occurrences. Week sub-periods may start before or end after this
    /// period, as a month grid does.
    fn split(&self, granularity: Granularity) -> Result<Vec<Period<'a>>> {
        let frame = match self.frame {
            Some(frame) => frame.with_granularity(granularity),
            None => Frame::new(granularity, Tz::UTC, Weekday::Mon),
        };

        // Week grids may spill past this period; those sub-periods draw from
        // one wider expansion computed on first need.
        let (wide_start, _) = frame.bounds(frame.local_date(self.start))?;
        let (_, wide_end) = frame.bounds(frame.local_date(self.end - TimeDelta::seconds(1)))?;
        let mut cursor = frame.local_date(self.start);
        let mut periods = Vec::new();
        let mut wide: Option<Vec<Occurrence>> = None;

        loop {
            let (start, end) = frame.bounds(cursor)?;
            if start >= self.end {
                break;
            }
            let sub = if start >= self.start && end <= self.end {
                Period::from_pool(self.events, &self.occurrences, start, end)
            } else {
                if wide.is_none() {
                    wide = Some(expand(
                        self.events,
                        wide_start.min(self.start),
                        wide_end.max(self.end),
                    )?);
                }
                Period::from_pool(self.events, wide.as_deref().unwrap_or(&[]), start, end)
            };
            periods.push(Period {
                frame: Some(frame),
                ..sub
            });
            cursor = frame.shift_date(frame.first_date(cursor), 1)?;
        }
        Ok(periods)
    }

    pub fn days(&self) -> Result<Vec<Period<'a>>> {
        self.split(Granularity::Day)
    }

    pub fn weeks(&self) -> Result<Vec<Period<'a>>> {
        self.split(Granularity::Week)
    }

    pub fn months(&self) -> Result<Vec<Period<'a>>> {
        self.split(Granularity::Month)
    }

    /// Where `occurrence` sits relative to this period, or `None` if it does
    /// not intersect it. An occurrence ending exactly at `end` ends within it.
    pub fn classify(&self, occurrence: &Occurrence) -> Option<SpanClass> {
        if !occurrence.intersects(self.start, self.end) {
            return None;
        }
        let starts = self.start <= occurrence.start && occurrence.start < self.end;
        let ends = self.start < occurrence.end && occurrence.end <= self.end;
        Some(match (starts, ends) {
            (true, true) => SpanClass::Within,
            (true, false) => SpanClass::Starts,
            (false, true) => SpanClass::Ends,
            (false, false) => SpanClass::Continues,
        })
    }

    /// Occurrences paired with their [`SpanClass`]; cancelled ones are dropped
    /// unless `show_cancelled`.
    pub fn occurrence_partials(&self, show_cancelled: bool) -> Vec<(&Occurrence, SpanClass)> {
        self.occurrences
            .iter()
            .filter(|occ| show_cancelled || !occ.cancelled)
            .filter_map(|occ| self.classify(occ).map(|class| (occ, class)))
            .collect()
    }
}
