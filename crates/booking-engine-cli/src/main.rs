use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use booking_engine::{
    parse_minutes, BookingEngine, BookingId, CommitRequest, CreditSource, EngineConfig, Snapshot,
};
use chrono::{DateTime, NaiveDate, Utc};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::debug;
use tracing_subscriber::EnvFilter;

/// Query open slots and credits, and commit bookings against a schedule snapshot.
#[derive(Parser)]
#[command(name = "booking", version, about)]
struct Cli {
    /// Schedule snapshot (JSON): providers, rates, windows, bookings, credits
    #[arg(long)]
    schedule: PathBuf,

    /// Engine config (JSON); defaults to UTC, Monday weeks, 90-day horizon
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log debug output to stderr (overridden by BOOKING_LOG)
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List open start times for a rate
    Slots {
        #[arg(long)]
        provider: String,
        #[arg(long)]
        rate: String,
        #[arg(long)]
        from: NaiveDate,
        #[arg(long)]
        to: NaiveDate,
        /// Reference instant (RFC 3339); defaults to the system clock
        #[arg(long)]
        now: Option<DateTime<Utc>>,
    },
    /// List course bookings and tokens that could pay for a rate
    Credits {
        #[arg(long)]
        counterparty: String,
        #[arg(long)]
        provider: String,
        #[arg(long)]
        rate: String,
    },
    /// Commit a booking, paying cash unless a course or token is given
    Book {
        #[arg(long)]
        provider: String,
        #[arg(long)]
        counterparty: String,
        #[arg(long)]
        rate: String,
        #[arg(long)]
        date: NaiveDate,
        /// Start time as HH:MM
        #[arg(long)]
        start: String,
        #[arg(long, conflicts_with = "token")]
        course: Option<String>,
        #[arg(long)]
        token: Option<String>,
        /// Reference instant (RFC 3339); defaults to the system clock
        #[arg(long)]
        now: Option<DateTime<Utc>>,
        /// Write the updated snapshot here
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Cancel a booking
    Cancel {
        #[arg(long)]
        provider: String,
        #[arg(long)]
        booking: BookingId,
        /// Write the updated snapshot here
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = match &cli.config {
        Some(path) => {
            let json = read(path)?;
            EngineConfig::from_json(&json)
                .with_context(|| format!("Invalid config {}", path.display()))?
        }
        None => EngineConfig::default(),
    };
    let snapshot: Snapshot = serde_json::from_str(&read(&cli.schedule)?)
        .with_context(|| format!("Invalid schedule {}", cli.schedule.display()))?;
    debug!(
        providers = snapshot.providers.len(),
        courses = snapshot.courses.len(),
        tokens = snapshot.tokens.len(),
        "schedule loaded"
    );
    let engine = BookingEngine::from_snapshot(config, snapshot)
        .with_context(|| format!("Cannot load schedule {}", cli.schedule.display()))?;

    match cli.command {
        Command::Slots {
            provider,
            rate,
            from,
            to,
            now,
        } => {
            let now = now.unwrap_or_else(Utc::now);
            let slots = engine.list_available_slots(
                &provider.into(),
                &rate.into(),
                from,
                to,
                now,
            )?;
            print_json(&slots)
        }
        Command::Credits {
            counterparty,
            provider,
            rate,
        } => {
            let sources =
                engine.list_credit_sources(&counterparty.into(), &provider.into(), &rate.into());
            print_json(&sources)
        }
        Command::Book {
            provider,
            counterparty,
            rate,
            date,
            start,
            course,
            token,
            now,
            out,
        } => {
            let source = match (course, token) {
                (Some(id), _) => Some(CreditSource::Course(id.into())),
                (None, Some(id)) => Some(CreditSource::Token(id.into())),
                (None, None) => None,
            };
            let request = CommitRequest {
                provider: provider.into(),
                counterparty: counterparty.into(),
                rate: rate.into(),
                date,
                start_minutes: parse_minutes(&start)?,
                source,
            };
            let booking = engine.commit_booking(&request, now.unwrap_or_else(Utc::now))?;
            if let Some(out) = out {
                write_snapshot(&out, &engine.snapshot())?;
            }
            print_json(&booking)
        }
        Command::Cancel {
            provider,
            booking,
            out,
        } => {
            let cancelled = engine.cancel_booking(&provider.into(), &booking)?;
            if let Some(out) = out {
                write_snapshot(&out, &engine.snapshot())?;
            }
            print_json(&cancelled)
        }
    }
}

fn init_tracing(verbose: bool) {
    let filter = EnvFilter::try_from_env("BOOKING_LOG")
        .unwrap_or_else(|_| EnvFilter::new(if verbose { "debug" } else { "warn" }));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn read(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
}

fn write_snapshot(path: &Path, snapshot: &Snapshot) -> Result<()> {
    let json = serde_json::to_string_pretty(snapshot)?;
    fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
