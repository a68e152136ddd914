use lsc_core::{Host, HostError, HpmTime, MarkerStore, TaskId, TaskInfo};
use serde::Serialize;
use tracing::{debug, warn};

use crate::reconcile::TaskOutcome;
use crate::scope::Scope;
use crate::StatusChangeTracker;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IgnoreReason {
    NotReady,
    OtherColumn,
    NotATask,
    UnknownTask,
    OutOfScope,
    /// The stored value is already later than the host clock.
    AlreadyNewer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum EventOutcome {
    Ignored { reason: IgnoreReason },
    Stamped { task: TaskId, at: HpmTime },
    Reconciled { task: TaskId, result: TaskOutcome },
    Failed { task: TaskId },
}

impl EventOutcome {
    fn ignored(reason: IgnoreReason) -> Self {
        Self::Ignored { reason }
    }

    pub fn wrote_column(&self) -> bool {
        matches!(
            self,
            EventOutcome::Stamped { .. }
                | EventOutcome::Reconciled {
                    result: TaskOutcome::Advanced { .. },
                    ..
                }
        )
    }
}

impl StatusChangeTracker {
    /// A custom column changed on a task. Only the tracked column on tasks in scope matters.
    pub fn handle_column_changed<H>(&self, host: &H, column_hash: u32, task: TaskId) -> EventOutcome
    where
        H: Host + MarkerStore + ?Sized,
    {
        let Some(scope) = self.scope() else {
            return EventOutcome::ignored(IgnoreReason::NotReady);
        };
        if column_hash != scope.tracked().hash {
            return EventOutcome::ignored(IgnoreReason::OtherColumn);
        }
        let task = match self.task_in_scope(host, scope, task) {
            Ok(task) => task,
            Err(outcome) => return outcome,
        };

        match self.stamp(host, scope, &task) {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(event = "stamp_failed", task = %task.id, error = %err);
                EventOutcome::Failed { task: task.id }
            }
        }
    }

    /// The host delivered fresh history for `subject`. Task and task-reference subjects in scope
    /// are reconciled; everything else is ignored.
    pub fn handle_history_received<H>(&self, host: &H, subject: u32) -> EventOutcome
    where
        H: Host + MarkerStore + ?Sized,
    {
        let Some(scope) = self.scope() else {
            return EventOutcome::ignored(IgnoreReason::NotReady);
        };
        if !host.classify(subject).is_task() {
            return EventOutcome::ignored(IgnoreReason::NotATask);
        }
        let task = match self.task_in_scope(host, scope, TaskId(subject)) {
            Ok(task) => task,
            Err(outcome) => return outcome,
        };

        match self.reconcile_from_history(host, scope, &task) {
            Ok(result) => EventOutcome::Reconciled {
                task: task.id,
                result,
            },
            Err(err) => {
                warn!(event = "reconcile_failed", task = %task.id, error = %err);
                EventOutcome::Failed { task: task.id }
            }
        }
    }

    fn task_in_scope<H>(&self, host: &H, scope: &Scope, id: TaskId) -> Result<TaskInfo, EventOutcome>
    where
        H: Host + ?Sized,
    {
        let task = match host.task(id) {
            Ok(Some(task)) => task,
            Ok(None) => return Err(EventOutcome::ignored(IgnoreReason::UnknownTask)),
            Err(err) => {
                warn!(event = "task_lookup_failed", task = %id, error = %err);
                return Err(EventOutcome::Failed { task: id });
            }
        };
        if !scope.contains(task.project, task.view) {
            debug!(event = "event_out_of_scope", task = %task.id, view = %task.view);
            return Err(EventOutcome::ignored(IgnoreReason::OutOfScope));
        }
        Ok(task)
    }

    fn stamp<H>(&self, host: &H, scope: &Scope, task: &TaskInfo) -> Result<EventOutcome, HostError>
    where
        H: Host + MarkerStore + ?Sized,
    {
        let column = self.tracking_column_for(host, scope, task)?;
        let now = host.now();
        let stored = host.column_time(task.id, &column)?;
        if stored > now {
            debug!(event = "stamp_skipped", task = %task.id, stored = %stored, now = %now);
            return Ok(EventOutcome::ignored(IgnoreReason::AlreadyNewer));
        }
        host.set_column_time(task.id, &column, now)?;
        debug!(event = "stamped", task = %task.id, at = %now);
        if self.config().use_marker {
            self.refresh_marker(host, task);
        }
        Ok(EventOutcome::Stamped {
            task: task.id,
            at: now,
        })
    }
}
