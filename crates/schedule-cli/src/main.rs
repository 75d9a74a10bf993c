//! `schedule` CLI: expand, inspect and validate calendar snapshots.
//!
//! ## Usage
//!
//! ```sh
//! # Feed entries of calendar "team" for a week
//! schedule expand -d calendar.json -c team --start 2024-01-01 --end 2024-01-08
//!
//! # Include cancelled occurrences, write to a file
//! schedule expand -d calendar.json -c team --start 2024-01-01 --end 2024-02-01 \
//!     --include-cancelled -o january.json
//!
//! # What is running right now (or at --at)
//! schedule live -d calendar.json -c team --at 2024-01-03T10:30:00Z
//!
//! # The month containing a date, with per-occurrence span classes
//! schedule period -d calendar.json -c team -g month --at 2024-01-15
//!
//! # Would this event (JSON on stdin) conflict?
//! echo '{"calendar_id":1,"title":"Y","start":"2024-01-03T10:30:00Z","end":"2024-01-03T10:45:00Z"}' \
//!     | schedule check-event -d calendar.json
//!
//! # Would this moved occurrence conflict?
//! schedule check-occurrence -d calendar.json -i moved.json
//! ```
//!
//! Date arguments are RFC 3339 instants, or naive `YYYY-MM-DD[THH:MM[:SS]]`
//! values read in the configured `default_timezone`. Logs go to stderr and are
//! filtered with `RUST_LOG`.

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use clap::{Parser, Subcommand};
use schedule_engine::{
    Event, Granularity, MemoryRepository, Occurrence, Period, Repository, ScheduleError,
    Scheduler, Settings, Snapshot,
};
use std::io::{self, Read};
use std::process;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Exit code for a rejected (conflicting or invalid) candidate.
const EXIT_REJECTED: i32 = 2;

#[derive(Parser)]
#[command(
    name = "schedule",
    version,
    about = "Expand and validate recurring calendar events"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Settings file (JSON); defaults apply to missing fields
    #[arg(long, global = true)]
    config: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Print feed entries for a calendar window
    Expand {
        /// Calendar snapshot (JSON)
        #[arg(short, long)]
        data: String,
        /// Calendar slug (all calendars if omitted)
        #[arg(short, long)]
        calendar: Option<String>,
        /// Window start
        #[arg(long)]
        start: String,
        /// Window end (exclusive)
        #[arg(long)]
        end: String,
        /// Keep cancelled occurrences in the output
        #[arg(long)]
        include_cancelled: bool,
        /// Output file (writes to stdout if omitted)
        #[arg(short, long)]
        output: Option<String>,
    },
    /// Print occurrences running at an instant
    Live {
        #[arg(short, long)]
        data: String,
        #[arg(short, long)]
        calendar: String,
        /// Instant to check (now if omitted)
        #[arg(long)]
        at: Option<String>,
    },
    /// Print the day/week/month/year around a date
    Period {
        #[arg(short, long)]
        data: String,
        #[arg(short, long)]
        calendar: String,
        /// day, week, month or year
        #[arg(short, long, default_value = "week")]
        granularity: String,
        /// Any instant inside the period (now if omitted)
        #[arg(long)]
        at: Option<String>,
        /// Also list cancelled occurrences
        #[arg(long)]
        show_cancelled: bool,
    },
    /// Validate a new or edited event (JSON) against its calendar
    CheckEvent {
        #[arg(short, long)]
        data: String,
        /// Event JSON file (reads from stdin if omitted)
        #[arg(short, long)]
        input: Option<String>,
        /// Event id to leave out of the comparison
        #[arg(long)]
        exclude: Option<i64>,
    },
    /// Validate an edited occurrence (JSON) against the other events
    CheckOccurrence {
        #[arg(short, long)]
        data: String,
        /// Occurrence JSON file (reads from stdin if omitted)
        #[arg(short, long)]
        input: Option<String>,
    },
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let settings = match cli.config.as_deref() {
        Some(path) => Settings::from_path(path)
            .with_context(|| format!("Failed to load settings: {}", path))?,
        None => Settings::default(),
    };

    match cli.command {
        Commands::Expand {
            data,
            calendar,
            start,
            end,
            include_cancelled,
            output,
        } => {
            let start = parse_instant(&start, &settings.default_timezone)?;
            let end = parse_instant(&end, &settings.default_timezone)?;
            let scheduler = load(&data, settings)?;
            let feed = scheduler
                .feed(calendar.as_deref(), start, end, include_cancelled)
                .context("Failed to expand calendar")?;
            let json = serde_json::to_string_pretty(&feed)?;
            write_output(output.as_deref(), &json)?;
        }
        Commands::Live { data, calendar, at } => {
            let now = parse_or_now(at.as_deref(), &settings.default_timezone)?;
            let scheduler = load(&data, settings)?;
            let live = scheduler
                .live_now(&calendar, now)
                .context("Failed to query live occurrences")?;
            write_output(None, &serde_json::to_string_pretty(&live)?)?;
        }
        Commands::Period {
            data,
            calendar,
            granularity,
            at,
            show_cancelled,
        } => {
            let granularity: Granularity = granularity.parse()?;
            let reference = parse_or_now(at.as_deref(), &settings.default_timezone)?;
            let show_cancelled = show_cancelled || settings.show_cancelled_occurrences;
            let scheduler = load(&data, settings)?;
            let json = render_period(&scheduler, &calendar, granularity, reference, show_cancelled)?;
            write_output(None, &serde_json::to_string_pretty(&json)?)?;
        }
        Commands::CheckEvent {
            data,
            input,
            exclude,
        } => {
            let raw = read_input(input.as_deref())?;
            let event: Event = serde_json::from_str(&raw).context("Failed to parse event JSON")?;
            let scheduler = load(&data, settings)?;
            report(scheduler.validate_event(&event, exclude))?;
        }
        Commands::CheckOccurrence { data, input } => {
            let raw = read_input(input.as_deref())?;
            let occurrence: Occurrence =
                serde_json::from_str(&raw).context("Failed to parse occurrence JSON")?;
            let scheduler = load(&data, settings)?;
            let event_id = occurrence
                .event_id
                .context("Occurrence JSON has no event_id")?;
            let owning = scheduler
                .repository()
                .event(event_id)
                .with_context(|| format!("Failed to load event {}", event_id))?;
            report(scheduler.validate_occurrence(&occurrence, &owning))?;
        }
    }

    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();
}

fn load(path: &str, settings: Settings) -> Result<Scheduler<MemoryRepository>> {
    let raw = read_input(Some(path))?;
    let snapshot = Snapshot::from_json_str(&raw)
        .with_context(|| format!("Failed to parse snapshot: {}", path))?;
    let repo = MemoryRepository::from_snapshot(snapshot)
        .with_context(|| format!("Failed to load snapshot: {}", path))?;
    tracing::debug!(path, "snapshot loaded");
    Ok(Scheduler::new(repo, settings))
}

fn render_period(
    scheduler: &Scheduler<MemoryRepository>,
    slug: &str,
    granularity: Granularity,
    reference: DateTime<Utc>,
    show_cancelled: bool,
) -> Result<serde_json::Value> {
    let calendar = scheduler.repository().calendar_by_slug(slug)?;
    let events = scheduler.repository().events_for_calendar(calendar.id, None)?;
    let frame = scheduler.frame(calendar.id, granularity)?;
    let period = Period::around(&events, reference, frame)?;

    let occurrences: Vec<serde_json::Value> = period
        .occurrence_partials(show_cancelled)
        .into_iter()
        .map(|(occ, span)| {
            serde_json::json!({
                "title": occ.title,
                "event_id": occ.event_id,
                "start": occ.start,
                "end": occ.end,
                "cancelled": occ.cancelled,
                "span": span,
            })
        })
        .collect();

    Ok(serde_json::json!({
        "calendar": calendar.slug,
        "granularity": granularity,
        "start": period.start(),
        "end": period.end(),
        "occurrences": occurrences,
    }))
}

/// Print the outcome of a validation. Rejections exit with `EXIT_REJECTED`.
fn report(outcome: schedule_engine::error::Result<()>) -> Result<()> {
    match outcome {
        Ok(()) => {
            println!("ok");
            Ok(())
        }
        Err(ScheduleError::Conflict(conflict)) => {
            eprintln!("conflict: {}", conflict);
            process::exit(EXIT_REJECTED);
        }
        Err(ScheduleError::Configuration(msg)) => {
            eprintln!("invalid: {}", msg);
            process::exit(EXIT_REJECTED);
        }
        Err(other) => Err(other.into()),
    }
}

/// Parse an RFC 3339 instant, or a naive date/date-time in `tz`.
fn parse_instant<Z: TimeZone>(text: &str, tz: &Z) -> Result<DateTime<Utc>> {
    if let Ok(instant) = DateTime::parse_from_rfc3339(text) {
        return Ok(instant.with_timezone(&Utc));
    }
    let naive = ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(text, "%Y-%m-%d")
                .ok()
                .and_then(|date| date.and_hms_opt(0, 0, 0))
        })
        .with_context(|| format!("Invalid date/time: '{}'", text))?;
    tz.from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("'{}' does not exist in the configured timezone", text))
}

fn parse_or_now<Z: TimeZone>(text: Option<&str>, tz: &Z) -> Result<DateTime<Utc>> {
    match text {
        Some(text) => parse_instant(text, tz),
        None => Ok(Utc::now()),
    }
}

fn read_input(path: Option<&str>) -> Result<String> {
    match path {
        Some(path) => {
            std::fs::read_to_string(path).with_context(|| format!("Failed to read file: {}", path))
        }
        None => {
            let mut buf = String::new();
            io::stdin()
                .read_to_string(&mut buf)
                .context("Failed to read from stdin")?;
            Ok(buf)
        }
    }
}

fn write_output(path: Option<&str>, content: &str) -> Result<()> {
    match path {
        Some(path) => {
            std::fs::write(path, content)
                .with_context(|| format!("Failed to write file: {}", path))?;
        }
        None => {
            println!("{}", content);
        }
    }
    Ok(())
}
