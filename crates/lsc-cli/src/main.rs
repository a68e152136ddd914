use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use lsc_core::{dispatch, HostEvent, HpmTime, TaskId, TrackerConfig};
use lsc_memhost::{HostCounters, HostSnapshot, MemoryHost};
use lsc_tracker::{BackfillReport, EventOutcome, StatusChangeTracker};
use serde::Serialize;
use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "lsc")]
#[command(about = "Last-status-change tracker", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the tracker against a recorded host snapshot
    Replay {
        #[arg(long)]
        config: PathBuf,
        #[arg(long)]
        snapshot: PathBuf,
        /// Only run the startup sweep, skip recorded notifications
        #[arg(long, default_value_t = false)]
        no_events: bool,
    },
    /// Validate a tracker config without a host
    Check {
        #[arg(long)]
        config: PathBuf,
    },
}

#[derive(Debug, Serialize)]
struct ReplayReport {
    title: String,
    backfill: BackfillReport,
    events: Vec<ReplayedEvent>,
    tracking: BTreeMap<TaskId, TrackedValue>,
    counters: HostCounters,
}

#[derive(Debug, Serialize)]
struct ReplayedEvent {
    event: HostEvent,
    outcome: EventOutcome,
}

#[derive(Debug, Serialize)]
struct TrackedValue {
    micros: u64,
    display: String,
}

impl From<HpmTime> for TrackedValue {
    fn from(value: HpmTime) -> Self {
        Self {
            micros: value.as_micros(),
            display: value.to_string(),
        }
    }
}

fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();

    match cli.command {
        Commands::Replay {
            config,
            snapshot,
            no_events,
        } => {
            let report = replay(&config, &snapshot, !no_events)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Check { config } => {
            let tracker = load_tracker(&config)?;
            println!("{}", tracker.title());
        }
    }

    Ok(())
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}

fn load_tracker(path: &Path) -> Result<StatusChangeTracker> {
    let config = TrackerConfig::load(path)
        .with_context(|| format!("Failed to load config {}", path.display()))?;
    StatusChangeTracker::new(config).context("Invalid tracker config")
}

fn replay(config: &Path, snapshot: &Path, with_events: bool) -> Result<ReplayReport> {
    let mut tracker = load_tracker(config)?;
    let snapshot = HostSnapshot::load(snapshot)
        .with_context(|| format!("Failed to load snapshot {}", snapshot.display()))?;
    let host = MemoryHost::from_snapshot(&snapshot).context("Invalid host snapshot")?;

    let backfill = tracker
        .initialize(&host)
        .context("Tracker initialization failed")?;

    let mut events = Vec::new();
    if with_events {
        for event in &snapshot.events {
            let outcome = dispatch(&tracker, &host, event);
            events.push(ReplayedEvent {
                event: event.clone(),
                outcome,
            });
        }
        info!(event = "replay_complete", events = events.len());
    }

    let tracking = host
        .column_values(&tracker.config().tracking_column)
        .into_iter()
        .map(|(task, value)| (task, TrackedValue::from(value)))
        .collect();

    Ok(ReplayReport {
        title: tracker.title(),
        backfill,
        events,
        tracking,
        counters: host.counters(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    const CONFIG: &str = r#"
project = "Proj1"
view = "Backlog"
tracked_column = "Status"
tracking_column = "Changed"
"#;

    const SNAPSHOT: &str = r#"{
  "now": 1000,
  "projects": [{
    "id": 1,
    "name": "Proj1",
    "views": [{
      "id": 10,
      "view_type": "backlog",
      "columns": [{"hash": 100, "name": "Status"}, {"hash": 200, "name": "Changed"}],
      "tasks": [
        {"id": 1, "history": {"latest": 20, "entries": [{"field_id": 15, "time": 10}, {"field_id": 15, "time": 20}]}},
        {"id": 2, "values": {"Changed": 25}, "history": {"latest": 20, "entries": [{"field_id": 15, "time": 20}]}}
      ]
    }]
  }],
  "events": [
    {"kind": "column_changed", "column_hash": 100, "task": 2},
    {"kind": "column_changed", "column_hash": 200, "task": 1}
  ]
}"#;

    fn write_inputs(dir: &TempDir) -> (PathBuf, PathBuf) {
        let config = dir.path().join("tracker.toml");
        let snapshot = dir.path().join("host.json");
        fs::write(&config, CONFIG).expect("write config");
        fs::write(&snapshot, SNAPSHOT).expect("write snapshot");
        (config, snapshot)
    }

    #[test]
    fn replay_runs_sweep_and_recorded_events() {
        let dir = TempDir::new().expect("temp dir");
        let (config, snapshot) = write_inputs(&dir);

        let report = replay(&config, &snapshot, true).expect("replay");

        assert_eq!(report.backfill.advanced, 1);
        assert_eq!(report.events.len(), 2);
        assert!(report.events[0].outcome.wrote_column());
        assert!(!report.events[1].outcome.wrote_column());
        assert_eq!(report.tracking[&TaskId(1)].micros, 20);
        assert_eq!(report.tracking[&TaskId(2)].micros, 1000);
        assert_eq!(report.counters.column_writes, 2);
    }

    #[test]
    fn replay_without_events_only_sweeps() {
        let dir = TempDir::new().expect("temp dir");
        let (config, snapshot) = write_inputs(&dir);

        let report = replay(&config, &snapshot, false).expect("replay");

        assert!(report.events.is_empty());
        assert_eq!(report.tracking[&TaskId(2)].micros, 25);
    }

    #[test]
    fn bad_view_keyword_is_reported() {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join("tracker.toml");
        fs::write(&path, CONFIG.replace("Backlog", "Kanban")).expect("write config");

        let err = load_tracker(&path).expect_err("bad view");
        assert!(format!("{err:#}").contains("Kanban"));
    }
}
