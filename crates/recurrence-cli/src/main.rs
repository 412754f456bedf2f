//! `recur` CLI -- build and inspect recurrence patterns, and expand a
//! recurring calendar entry into its occurrences from the command line.
//!
//! ## Usage
//!
//! ```sh
//! # Canonical pattern for a monthly series
//! recur pattern --frequency monthly --start 2023-01-04T14:48:00Z --until 2024-01-04T14:48:00Z
//!
//! # Parse a pattern (stdin or file) and print its fields as JSON
//! recur inspect -i pattern.txt
//!
//! # Expand an entry plus its exceptions over a window
//! recur expand -i entry.json --exceptions exceptions.json \
//!     --start 2023-01-01 --end 2023-04-01 --sorted
//! ```
//!
//! Diagnostics go to stderr and are controlled by `RUST_LOG` (default `warn`).

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use recurrence_engine::{
    build_rule, sort_chronologically, CalendarEntry, CalendarService, EngineConfig,
    EntryException, Frequency, InMemoryEntryStore, InMemoryExceptionStore, ListQuery,
    RecurrenceRule,
};
use std::io::{self, Read};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "recur",
    version,
    about = "Recurring calendar entry toolkit"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Engine configuration file (JSON)
    #[arg(long, global = true)]
    config: Option<String>,

    /// Reject windows holding more occurrences than this (overrides --config)
    #[arg(long, global = true)]
    max_occurrences: Option<usize>,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the canonical recurrence pattern for a rule
    Pattern {
        /// daily, weekly or monthly
        #[arg(short, long)]
        frequency: String,
        /// First occurrence (RFC 3339 or YYYY-MM-DD)
        #[arg(long)]
        start: String,
        /// Last instant an occurrence may start at, inclusive
        #[arg(long)]
        until: String,
    },
    /// Parse a recurrence pattern and print its fields as JSON
    Inspect {
        /// Input file (reads from stdin if omitted)
        #[arg(short, long)]
        input: Option<String>,
    },
    /// Expand an entry and its exceptions over a window
    Expand {
        /// Entry JSON file (reads from stdin if omitted)
        #[arg(short, long)]
        input: Option<String>,
        /// JSON array of exception records for the entry
        #[arg(long)]
        exceptions: Option<String>,
        /// Window start, inclusive
        #[arg(long)]
        start: String,
        /// Window end, exclusive
        #[arg(long)]
        end: String,
        /// Sort occurrences by start time
        #[arg(long)]
        sorted: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref(), cli.max_occurrences)?;

    match cli.command {
        Commands::Pattern {
            frequency,
            start,
            until,
        } => {
            let frequency: Frequency = frequency.parse().context("Invalid --frequency")?;
            let start = recurrence_engine::time::parse_instant(&start).context("Invalid --start")?;
            let until = recurrence_engine::time::parse_instant(&until).context("Invalid --until")?;
            println!("{}", build_rule(frequency, start, until));
        }
        Commands::Inspect { input } => {
            let text = read_input(input.as_deref())?;
            let rule: RecurrenceRule = text.parse().context("Failed to parse recurrence pattern")?;
            println!("{}", serde_json::to_string_pretty(&rule)?);
        }
        Commands::Expand {
            input,
            exceptions,
            start,
            end,
            sorted,
        } => {
            let json = read_input(input.as_deref())?;
            let entry: CalendarEntry =
                serde_json::from_str(&json).context("Failed to parse entry JSON")?;
            let entry = with_pattern(entry)?;
            let exceptions: Vec<EntryException> = match exceptions.as_deref() {
                Some(path) => serde_json::from_str(&read_input(Some(path))?)
                    .context("Failed to parse exceptions JSON")?,
                None => Vec::new(),
            };
            tracing::debug!(entry_id = %entry.id, exceptions = exceptions.len(), "loaded entry");

            let service = CalendarService::with_config(
                InMemoryEntryStore::with_entries([entry]),
                InMemoryExceptionStore::with_exceptions(exceptions),
                config,
            );
            let query = ListQuery::from_params(Some(&start), Some(&end))
                .context("Invalid --start/--end")?;
            let mut occurrences = service.list(query).await.context("Failed to expand entry")?;
            if sorted {
                sort_chronologically(&mut occurrences);
            }
            println!("{}", serde_json::to_string_pretty(&occurrences)?);
        }
    }

    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn load_config(path: Option<&str>, max_occurrences: Option<usize>) -> Result<EngineConfig> {
    let mut config = match path {
        Some(path) => EngineConfig::from_json(&read_input(Some(path))?)
            .with_context(|| format!("Invalid config file: {}", path))?,
        None => EngineConfig::default(),
    };
    if let Some(max) = max_occurrences {
        config.max_occurrences = max;
    }
    Ok(config)
}

/// Entries exported without a stored pattern get one derived from their
/// recurrence fields.
fn with_pattern(mut entry: CalendarEntry) -> Result<CalendarEntry> {
    if !entry.recurring || entry.recurrence_pattern.is_some() {
        return Ok(entry);
    }
    let frequency = entry
        .frequency
        .context("Recurring entry has neither a recurrencePattern nor a frequency")?;
    let ends = entry
        .recurrence_ends_utc
        .context("Recurring entry has neither a recurrencePattern nor a recurrenceEndsUtc")?;
    entry.recurrence_pattern = Some(build_rule(frequency, entry.start_time_utc, ends).serialize());
    Ok(entry)
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
