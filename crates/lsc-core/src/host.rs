use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::contracts::{
    ColumnRef, HistoryRecord, HpmTime, ProjectId, ProjectPattern, SubjectKind, TaskId, TaskInfo,
    ViewId, ViewType,
};

#[derive(Debug, Error)]
pub enum HostError {
    #[error("host rejected {operation}: {reason}")]
    Rejected {
        operation: &'static str,
        reason: String,
    },
    #[error("unknown task {0}")]
    UnknownTask(TaskId),
    #[error("column {column} not available on {task}")]
    UnknownColumn { task: TaskId, column: String },
}

impl HostError {
    pub fn rejected(operation: &'static str, reason: impl Into<String>) -> Self {
        Self::Rejected {
            operation,
            reason: reason.into(),
        }
    }
}

/// Synchronous request/response surface of the project-management host.
///
/// Every call returns or fails before the caller continues; the host serializes notification
/// delivery, so implementations are only ever driven from one thread at a time.
pub trait Host {
    /// Projects selected by the pattern, in host order.
    fn find_projects(&self, pattern: &ProjectPattern) -> Result<Vec<ProjectId>, HostError>;

    fn project_name(&self, project: ProjectId) -> Result<Option<String>, HostError>;

    fn project_view(
        &self,
        project: ProjectId,
        view_type: ViewType,
    ) -> Result<Option<ViewId>, HostError>;

    fn column_by_name(&self, view: ViewId, name: &str) -> Result<Option<ColumnRef>, HostError>;

    /// Leaf tasks of the view, depth first.
    fn leaf_tasks(&self, view: ViewId) -> Result<Vec<TaskId>, HostError>;

    /// Resolves a task or task reference id to the owning task.
    fn task(&self, id: TaskId) -> Result<Option<TaskInfo>, HostError>;

    /// Current date/time value of a custom column; unset values read as [`HpmTime::ZERO`].
    fn column_time(&self, task: TaskId, column: &ColumnRef) -> Result<HpmTime, HostError>;

    fn set_column_time(
        &self,
        task: TaskId,
        column: &ColumnRef,
        value: HpmTime,
    ) -> Result<(), HostError>;

    /// Full change history of the task, unfiltered by statistic field or scope.
    fn history(&self, task: TaskId) -> Result<Option<HistoryRecord>, HostError>;

    fn classify(&self, raw_id: u32) -> SubjectKind;

    fn now(&self) -> HpmTime;
}

/// Opaque per-task bytes stored outside the column schema.
pub trait MarkerStore {
    fn marker(&self, task: TaskId) -> Result<Option<Vec<u8>>, HostError>;

    fn set_marker(&self, task: TaskId, bytes: &[u8]) -> Result<(), HostError>;
}

/// Notification delivered by the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HostEvent {
    ColumnChanged { column_hash: u32, task: TaskId },
    HistoryReceived { subject: u32 },
}

/// A plugin attached to the host: initialized once, then fed notifications in delivery order.
pub trait Behavior<H: ?Sized> {
    type Report;
    type Outcome;
    type Error: std::error::Error;

    fn title(&self) -> String;

    fn initialize(&mut self, host: &H) -> Result<Self::Report, Self::Error>;

    fn on_column_changed(&self, host: &H, column_hash: u32, task: TaskId) -> Self::Outcome;

    fn on_history_received(&self, host: &H, subject: u32) -> Self::Outcome;
}

pub fn dispatch<H, B>(behavior: &B, host: &H, event: &HostEvent) -> B::Outcome
where
    H: ?Sized,
    B: Behavior<H>,
{
    match *event {
        HostEvent::ColumnChanged { column_hash, task } => {
            behavior.on_column_changed(host, column_hash, task)
        }
        HostEvent::HistoryReceived { subject } => behavior.on_history_received(host, subject),
    }
}
