mod support;

use lsc_core::{HpmTime, ProcessedMarker, TaskId};
use lsc_memhost::TaskSpec;
use lsc_tracker::{EventOutcome, StatusChangeTracker, TaskOutcome};
use support::*;

fn decoded_marker(host: &lsc_memhost::MemoryHost, task: u32) -> Option<ProcessedMarker> {
    host.raw_marker(TaskId(task))
        .and_then(|bytes| ProcessedMarker::decode(&bytes))
}

#[test]
fn untouched_tasks_are_not_rescanned() {
    let host = single_project(vec![
        TaskSpec::new(1).status_history(&[10, 20]),
        TaskSpec::new(2).value(CHANGED, 50).status_history(&[10, 20]),
    ]);
    let tracker = ready(&host, marker_config("Proj1"));
    assert_eq!(host.counters().history_fetches, 2);
    assert_eq!(host.counters().marker_writes, 2);
    assert_eq!(
        decoded_marker(&host, 1),
        Some(ProcessedMarker::new(HpmTime(NOW)))
    );
    assert_eq!(
        decoded_marker(&host, 2),
        Some(ProcessedMarker::new(HpmTime(20)))
    );

    host.reset_counters();
    let report = tracker.backfill(&host);

    assert_eq!(report.skipped_by_marker, 2);
    assert_eq!(report.history_fetches, 0);
    assert_eq!(host.counters().history_fetches, 0);
    assert_eq!(host.counters().column_writes, 0);
}

#[test]
fn modified_task_is_rescanned() {
    let host = single_project(vec![TaskSpec::new(1).status_history(&[10, 20])]);
    let tracker = ready(&host, marker_config("Proj1"));
    host.advance(100);
    let changed_at = host.record_status_change(TaskId(1)).expect("status change");
    host.reset_counters();

    let report = tracker.backfill(&host);

    assert_eq!(report.advanced, 1);
    assert_eq!(host.counters().history_fetches, 1);
    assert_eq!(host.column_value(TaskId(1), CHANGED), Some(changed_at));
}

#[test]
fn corrupt_marker_means_never_processed() {
    let host = single_project(vec![TaskSpec::new(1)
        .status_history(&[10, 20])
        .marker(b"\x00\x01garbage".to_vec())]);

    let tracker = ready(&host, marker_config("Proj1"));

    assert_eq!(host.counters().history_fetches, 1);
    assert_eq!(host.column_value(TaskId(1), CHANGED), Some(HpmTime(20)));
    assert!(decoded_marker(&host, 1).is_some());
    assert!(tracker.is_ready());
}

#[test]
fn marker_read_failure_falls_back_to_fetch() {
    let host = single_project(vec![TaskSpec::new(1).status_history(&[10, 20])]);
    host.fail_marker_reads(true);

    let tracker = ready(&host, marker_config("Proj1"));
    host.reset_counters();
    let report = tracker.backfill(&host);

    assert_eq!(report.skipped_by_marker, 0);
    assert_eq!(report.current, 1);
    assert_eq!(report.failed, 0);
    assert_eq!(host.counters().history_fetches, 1);
}

#[test]
fn marker_write_failure_does_not_fail_task() {
    let host = single_project(vec![TaskSpec::new(1).status_history(&[10, 20])]);
    host.fail_marker_writes(true);

    let mut tracker =
        StatusChangeTracker::new(marker_config("Proj1")).expect("tracker");
    let report = tracker.initialize(&host).expect("initialize");

    assert_eq!(report.advanced, 1);
    assert_eq!(report.failed, 0);
    assert_eq!(host.raw_marker(TaskId(1)), None);
    assert_eq!(host.column_value(TaskId(1), CHANGED), Some(HpmTime(20)));
}

#[test]
fn task_without_history_gets_no_marker() {
    let host = single_project(vec![TaskSpec::new(1)]);

    let tracker = ready(&host, marker_config("Proj1"));

    assert_eq!(host.raw_marker(TaskId(1)), None);
    host.reset_counters();
    tracker.backfill(&host);
    assert_eq!(host.counters().history_fetches, 1);
}

#[test]
fn live_stamp_refreshes_marker() {
    let host = single_project(vec![TaskSpec::new(1).status_history(&[10, 20])]);
    let tracker = ready(&host, marker_config("Proj1"));
    let now = host.advance(250);

    tracker.handle_column_changed(&host, STATUS_HASH, TaskId(1));

    assert_eq!(decoded_marker(&host, 1), Some(ProcessedMarker::new(now)));
    host.reset_counters();
    let report = tracker.backfill(&host);
    assert_eq!(report.skipped_by_marker, 1);
    assert_eq!(host.column_value(TaskId(1), CHANGED), Some(now));
}

#[test]
fn marker_and_plain_trackers_agree() {
    let tasks = || {
        vec![
            TaskSpec::new(1).status_history(&[10, 20]),
            TaskSpec::new(2).value(CHANGED, 50).status_history(&[30]),
            TaskSpec::new(3).history(mixed_history(&[5], &[60])),
            TaskSpec::new(4),
        ]
    };
    let plain_host = single_project(tasks());
    let marker_host = single_project(tasks());
    let plain = ready(&plain_host, config("Proj1"));
    let marked = ready(&marker_host, marker_config("Proj1"));

    for host in [&plain_host, &marker_host] {
        host.advance(10);
        host.record_status_change(TaskId(3)).expect("status change");
    }
    plain.backfill(&plain_host);
    marked.backfill(&marker_host);

    assert_eq!(
        plain_host.column_values(CHANGED),
        marker_host.column_values(CHANGED)
    );
    assert!(marker_host.counters().history_fetches < plain_host.counters().history_fetches);
}

#[test]
fn history_notification_reconciles_despite_covering_marker() {
    let stale = ProcessedMarker::new(HpmTime(5_000)).encode();
    let host = single_project(vec![TaskSpec::new(1).status_history(&[10, 20]).marker(stale)]);
    let mut tracker = StatusChangeTracker::new(marker_config("Proj1")).expect("tracker");
    let report = tracker.initialize(&host).expect("initialize");
    assert_eq!(report.skipped_by_marker, 1);
    assert_eq!(host.column_value(TaskId(1), CHANGED), Some(HpmTime::ZERO));
    host.reset_counters();

    let outcome = tracker.handle_history_received(&host, 1);

    assert_eq!(
        outcome,
        EventOutcome::Reconciled {
            task: TaskId(1),
            result: TaskOutcome::Advanced {
                from: HpmTime::ZERO,
                to: HpmTime(20),
            },
        }
    );
    assert_eq!(host.counters().history_fetches, 1);
    assert_eq!(host.column_value(TaskId(1), CHANGED), Some(HpmTime(20)));
    assert_eq!(
        decoded_marker(&host, 1),
        Some(ProcessedMarker::new(HpmTime(NOW)))
    );
}
