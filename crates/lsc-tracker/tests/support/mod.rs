#![allow(dead_code)]

use lsc_core::{HistoryEntry, HistoryRecord, HpmTime, TrackerConfig, ViewType, STATUS_FIELD_ID};
use lsc_memhost::{HostSnapshot, MemoryHost, ProjectSpec, TaskSpec, ViewSpec};
use lsc_tracker::StatusChangeTracker;

pub const STATUS: &str = "Status";
pub const CHANGED: &str = "Last status change";
pub const STATUS_HASH: u32 = 100;
pub const CHANGED_HASH: u32 = 200;
pub const NOW: u64 = 1_000;

pub fn config(project: &str) -> TrackerConfig {
    TrackerConfig {
        project: project.to_string(),
        inverted_match: false,
        view: "Backlog".to_string(),
        tracked_column: STATUS.to_string(),
        tracking_column: CHANGED.to_string(),
        multi_view: true,
        use_marker: false,
    }
}

pub fn marker_config(project: &str) -> TrackerConfig {
    TrackerConfig {
        use_marker: true,
        ..config(project)
    }
}

/// Backlog view carrying the tracked column and a tracking column with the given hash.
pub fn backlog(id: u32, tracking_hash: u32) -> ViewSpec {
    ViewSpec::new(id, ViewType::Backlog)
        .column(STATUS_HASH, STATUS)
        .column(tracking_hash, CHANGED)
}

pub fn single_project(tasks: Vec<TaskSpec>) -> MemoryHost {
    let view = tasks
        .into_iter()
        .fold(backlog(10, CHANGED_HASH), |view, task| view.task(task));
    let snapshot = HostSnapshot::new(HpmTime(NOW)).project(ProjectSpec::new(1, "Proj1").view(view));
    MemoryHost::from_snapshot(&snapshot).expect("host")
}

pub fn ready(host: &MemoryHost, config: TrackerConfig) -> StatusChangeTracker {
    let mut tracker = StatusChangeTracker::new(config).expect("tracker");
    tracker.initialize(host).expect("initialize");
    tracker
}

/// History mixing status entries with entries for another field.
pub fn mixed_history(status: &[u64], other: &[u64]) -> HistoryRecord {
    let mut entries = status
        .iter()
        .map(|time| HistoryEntry {
            field_id: STATUS_FIELD_ID,
            time: HpmTime(*time),
        })
        .collect::<Vec<_>>();
    entries.extend(other.iter().map(|time| HistoryEntry {
        field_id: 3,
        time: HpmTime(*time),
    }));
    let latest = status.iter().chain(other).copied().max().unwrap_or(0);
    HistoryRecord {
        latest: HpmTime(latest),
        entries,
    }
}
