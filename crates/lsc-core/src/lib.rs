pub mod config;
pub mod contracts;
pub mod host;

pub use config::{ConfigError, TrackerConfig};
pub use contracts::{
    ColumnRef, HistoryEntry, HistoryRecord, HpmTime, MatchMode, ProcessedMarker, ProjectId,
    ProjectPattern, SubjectKind, TaskId, TaskInfo, ViewId, ViewType, STATUS_FIELD_ID,
};
pub use host::{dispatch, Behavior, Host, HostError, HostEvent, MarkerStore};
