//! CLI for the slidestore statistics engine.
//!
//! Provides commands for validating retention policies and for replaying a
//! recorded event file into a store and querying it.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use serde::Deserialize;
use slidestore::{
    MetricKind, MetricsStore, Query, QueryOutcome, QueryRange, Range, RetentionPolicies,
    SeriesKey, SlideSource, Values,
};
use tracing_subscriber::EnvFilter;

/// slidestore: sliding-window statistics store CLI.
#[derive(Parser)]
#[command(name = "slidestore", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Validate and print retention policies.
    Policies {
        /// Policy file to load instead of the built-in defaults.
        #[arg(long)]
        file: Option<PathBuf>,
    },

    /// Replay recorded events into a store and print a query result.
    Replay {
        /// JSON file holding an array of `{kind, id, owners?, ts, values}` events.
        events: PathBuf,

        /// Policy file to load instead of the built-in defaults.
        #[arg(long)]
        policies: Option<PathBuf>,

        /// Metric kind to query (e.g. "queue_stats_publish").
        #[arg(long)]
        kind: MetricKind,

        /// Series id to query; repeat to aggregate several series.
        #[arg(long = "id")]
        ids: Vec<String>,

        /// Aggregate every series of `kind` indexed under this owner.
        #[arg(long)]
        owner: Option<String>,

        /// Range query as "first,last,incr" in milliseconds.
        #[arg(long, value_parser = parse_range)]
        range: Option<Range>,

        /// Query time in milliseconds (defaults to the newest event).
        #[arg(long)]
        now: Option<u64>,
    },
}

/// One recorded write.
#[derive(Debug, Deserialize)]
struct Event {
    kind: MetricKind,
    id: String,
    #[serde(default)]
    owners: Vec<String>,
    ts: u64,
    values: Values,
}

/// Query parameters of the `replay` command.
struct ReplayQuery {
    kind: MetricKind,
    ids: Vec<String>,
    owner: Option<String>,
    range: Option<Range>,
    now: Option<u64>,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Policies { file } => cmd_policies(file.as_deref()),
        Commands::Replay {
            events,
            policies,
            kind,
            ids,
            owner,
            range,
            now,
        } => cmd_replay(
            &events,
            policies.as_deref(),
            &ReplayQuery {
                kind,
                ids,
                owner,
                range,
                now,
            },
        ),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

/// Implements `slidestore policies [--file <json>]`.
fn cmd_policies(file: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let policies = load_policies(file)?;
    println!("{}", policies.to_json_pretty()?);
    Ok(())
}

/// Implements `slidestore replay <events>`.
fn cmd_replay(
    events: &Path,
    policies: Option<&Path>,
    query: &ReplayQuery,
) -> Result<(), Box<dyn std::error::Error>> {
    let policies = load_policies(policies)?;
    let output = replay(events, &policies, query)?;
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn load_policies(file: Option<&Path>) -> Result<RetentionPolicies, Box<dyn std::error::Error>> {
    match file {
        Some(path) => Ok(RetentionPolicies::load(path)?),
        None => Ok(RetentionPolicies::default()),
    }
}

/// Replays `events` into a fresh store and runs the query against it.
fn replay(
    events: &Path,
    policies: &RetentionPolicies,
    query: &ReplayQuery,
) -> Result<serde_json::Value, Box<dyn std::error::Error>> {
    let data = std::fs::read_to_string(events)
        .map_err(|e| format!("cannot read '{}': {e}", events.display()))?;
    let events: Vec<Event> = serde_json::from_str(&data)?;

    let store = MetricsStore::new(policies.clone());
    let mut newest = 0;
    let mut skipped = 0usize;
    for event in events {
        let key = SeriesKey::new(event.kind, event.id);
        let owners: Vec<&str> = event.owners.iter().map(String::as_str).collect();
        match store.record_owned(&key, &owners, event.ts, event.values) {
            Ok(()) => newest = newest.max(event.ts),
            Err(e) => {
                tracing::warn!("skipping event for {key} at {}: {e}", event.ts);
                skipped += 1;
            }
        }
    }
    tracing::debug!(
        "replayed {} series, skipped {skipped} event(s)",
        store.series_count()
    );

    let mut keys: Vec<SeriesKey> = query
        .ids
        .iter()
        .map(|id| SeriesKey::new(query.kind, id.as_str()))
        .collect();
    if let Some(owner) = &query.owner {
        keys.extend(
            store
                .keys_for_owner(owner)
                .into_iter()
                .filter(|key| key.kind == query.kind),
        );
    }
    if keys.is_empty() {
        return Err("no series selected: pass --id or --owner".into());
    }

    let range = query.range.map_or(QueryRange::Instant, QueryRange::Range);
    let now = query.now.unwrap_or(newest);
    let sources: [&dyn SlideSource; 1] = [&store];

    match Query::new(policies).run(&sources, &keys, &range, now)? {
        QueryOutcome::Found(result) => Ok(serde_json::to_value(&result)?),
        QueryOutcome::NotFound => Ok(serde_json::json!({ "error": "not_found" })),
    }
}

/// Parses a "first,last,incr" range in milliseconds.
fn parse_range(s: &str) -> Result<Range, String> {
    let parts: Vec<&str> = s.split(',').map(str::trim).collect();
    let [first, last, incr] = parts.as_slice() else {
        return Err(format!("expected \"first,last,incr\", got '{s}'"));
    };

    let parse = |part: &str| {
        part.parse::<u64>()
            .map_err(|e| format!("invalid range bound '{part}': {e}"))
    };
    Range::new(parse(*first)?, parse(*last)?, parse(*incr)?).map_err(|e| e.to_string())
}
