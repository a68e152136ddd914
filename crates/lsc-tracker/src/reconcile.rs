use lsc_core::{
    ColumnRef, HistoryRecord, Host, HostError, HpmTime, MarkerStore, ProcessedMarker, TaskId,
    TaskInfo,
};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::scope::Scope;
use crate::StatusChangeTracker;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum TaskOutcome {
    /// Marker shows the task was processed after its last modification; history not fetched.
    SkippedByMarker,
    NoHistory,
    /// Latest change in the history is not newer than the stored value.
    Current,
    /// History is newer but holds no status change after the stored value.
    Unchanged,
    Advanced { from: HpmTime, to: HpmTime },
}

impl TaskOutcome {
    pub fn fetched_history(&self) -> bool {
        !matches!(self, TaskOutcome::SkippedByMarker)
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct BackfillReport {
    pub views_scanned: usize,
    pub tasks_seen: usize,
    pub history_fetches: usize,
    pub skipped_by_marker: usize,
    pub no_history: usize,
    pub current: usize,
    pub unchanged: usize,
    pub advanced: usize,
    pub failed: usize,
}

impl BackfillReport {
    fn record(&mut self, outcome: TaskOutcome) {
        if outcome.fetched_history() {
            self.history_fetches += 1;
        }
        match outcome {
            TaskOutcome::SkippedByMarker => self.skipped_by_marker += 1,
            TaskOutcome::NoHistory => self.no_history += 1,
            TaskOutcome::Current => self.current += 1,
            TaskOutcome::Unchanged => self.unchanged += 1,
            TaskOutcome::Advanced { .. } => self.advanced += 1,
        }
    }
}

/// Most recent status change strictly after `stored`, if the history holds one.
///
/// A history whose overall latest change is not after `stored` is not scanned at all.
pub fn latest_status_change(history: &HistoryRecord, stored: HpmTime) -> Option<HpmTime> {
    if history.latest <= stored {
        return None;
    }
    history
        .entries
        .iter()
        .filter(|entry| entry.is_status_change() && entry.time > stored)
        .map(|entry| entry.time)
        .max()
}

impl StatusChangeTracker {
    /// Reconciles every leaf task of every view in scope. Per-task host failures are logged and
    /// counted; they never stop the sweep. Does nothing before initialization.
    pub fn backfill<H>(&self, host: &H) -> BackfillReport
    where
        H: Host + MarkerStore + ?Sized,
    {
        let mut report = BackfillReport::default();
        let Some(scope) = self.scope() else {
            debug!(event = "backfill_skipped_not_ready");
            return report;
        };

        for view in scope.views() {
            report.views_scanned += 1;
            let leaves = match host.leaf_tasks(view) {
                Ok(leaves) => leaves,
                Err(err) => {
                    warn!(event = "leaf_tasks_failed", view = %view, error = %err);
                    report.failed += 1;
                    continue;
                }
            };

            for id in leaves {
                report.tasks_seen += 1;
                let task = match host.task(id) {
                    Ok(Some(task)) => task,
                    Ok(None) => continue,
                    Err(err) => {
                        warn!(event = "task_lookup_failed", task = %id, error = %err);
                        report.failed += 1;
                        continue;
                    }
                };
                match self.reconcile(host, scope, &task) {
                    Ok(outcome) => report.record(outcome),
                    Err(err) => {
                        warn!(event = "reconcile_failed", task = %id, error = %err);
                        report.failed += 1;
                    }
                }
            }
        }

        info!(
            event = "backfill_complete",
            views = report.views_scanned,
            tasks = report.tasks_seen,
            fetched = report.history_fetches,
            skipped = report.skipped_by_marker,
            advanced = report.advanced,
            failed = report.failed,
        );
        report
    }

    /// Brings one task's tracking column up to its latest status change. Writes the column at
    /// most once and never moves it backwards.
    pub(crate) fn reconcile<H>(
        &self,
        host: &H,
        scope: &Scope,
        task: &TaskInfo,
    ) -> Result<TaskOutcome, HostError>
    where
        H: Host + MarkerStore + ?Sized,
    {
        if self.config().use_marker {
            if let Some(marker) = read_marker(host, task.id) {
                if marker.covers(task.last_modified) {
                    debug!(event = "reconcile_skipped", task = %task.id, marker = %marker.last_processed_at);
                    return Ok(TaskOutcome::SkippedByMarker);
                }
            }
        }
        self.reconcile_from_history(host, scope, task)
    }

    /// Reconciles from freshly fetched history without consulting the marker. History
    /// notifications enter here directly.
    pub(crate) fn reconcile_from_history<H>(
        &self,
        host: &H,
        scope: &Scope,
        task: &TaskInfo,
    ) -> Result<TaskOutcome, HostError>
    where
        H: Host + MarkerStore + ?Sized,
    {
        let Some(history) = host.history(task.id)? else {
            debug!(event = "reconcile_no_history", task = %task.id);
            return Ok(TaskOutcome::NoHistory);
        };

        let column = self.tracking_column_for(host, scope, task)?;
        let stored = host.column_time(task.id, &column)?;

        let outcome = if history.latest <= stored {
            TaskOutcome::Current
        } else {
            match latest_status_change(&history, stored) {
                Some(to) => {
                    host.set_column_time(task.id, &column, to)?;
                    TaskOutcome::Advanced { from: stored, to }
                }
                None => TaskOutcome::Unchanged,
            }
        };
        debug!(event = "reconciled", task = %task.id, outcome = ?outcome);

        if self.config().use_marker {
            self.refresh_marker(host, task);
        }
        Ok(outcome)
    }

    /// Tracking column handle valid for the task's own view. Views of a multi-view scope carry
    /// distinct handles with equal structure, so the column is looked up again by name.
    pub(crate) fn tracking_column_for<H>(
        &self,
        host: &H,
        scope: &Scope,
        task: &TaskInfo,
    ) -> Result<ColumnRef, HostError>
    where
        H: Host + ?Sized,
    {
        if !self.config().multi_view {
            return Ok(scope.tracking().clone());
        }
        match host.column_by_name(task.view, &scope.tracking().name)? {
            Some(column) => Ok(column),
            None => {
                debug!(
                    event = "tracking_column_fallback",
                    task = %task.id,
                    column = %scope.tracking().name,
                    bound_hash = scope.tracking().hash,
                );
                Ok(scope.tracking().clone())
            }
        }
    }

    /// Records the task's post-processing modification time so the next sweep can skip it
    /// until the host modifies it again. Failures are logged and otherwise ignored.
    pub(crate) fn refresh_marker<H>(&self, host: &H, task: &TaskInfo)
    where
        H: Host + MarkerStore + ?Sized,
    {
        let processed_at = match host.task(task.id) {
            Ok(Some(current)) => current.last_modified,
            Ok(None) => task.last_modified,
            Err(err) => {
                warn!(event = "marker_refresh_lookup_failed", task = %task.id, error = %err);
                task.last_modified
            }
        };
        let marker = ProcessedMarker::new(processed_at);
        if let Err(err) = host.set_marker(task.id, &marker.encode()) {
            warn!(event = "marker_write_failed", task = %task.id, error = %err);
        }
    }
}

fn read_marker<H>(host: &H, task: TaskId) -> Option<ProcessedMarker>
where
    H: MarkerStore + ?Sized,
{
    match host.marker(task) {
        Ok(Some(bytes)) => {
            let marker = ProcessedMarker::decode(&bytes);
            if marker.is_none() {
                debug!(event = "marker_unreadable", task = %task, len = bytes.len());
            }
            marker
        }
        Ok(None) => None,
        Err(err) => {
            warn!(event = "marker_read_failed", task = %task, error = %err);
            None
        }
    }
}
