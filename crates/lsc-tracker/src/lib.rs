//! Keeps a date/time "tracking" column in step with the last change of a watched status column.
//!
//! The tracker resolves its scope once, sweeps every task in scope against its change history,
//! and afterwards reacts to host notifications: a change of the tracked column stamps the
//! tracking column with the host time, and a history delivery reconciles that single task.

mod live;
mod reconcile;
mod scope;

use lsc_core::{
    Behavior, ConfigError, Host, HostError, MarkerStore, ProjectPattern, TaskId, TrackerConfig,
    ViewType,
};
use thiserror::Error;
use tracing::info;

pub use live::{EventOutcome, IgnoreReason};
pub use reconcile::{latest_status_change, BackfillReport, TaskOutcome};
pub use scope::Scope;

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("unsupported view type: {0}")]
    UnsupportedViewType(String),
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("could not find any matching project: {0}")]
    NoMatchingProject(String),
    #[error("project {project} has no {view_type} view")]
    MissingView { project: String, view_type: ViewType },
    #[error("could not find custom column {column} in view {view_type}")]
    MissingColumn { column: String, view_type: ViewType },
    #[error("host error: {0}")]
    Host(#[from] HostError),
}

#[derive(Debug, Clone)]
enum TrackerState {
    Uninitialized,
    Ready(Scope),
}

#[derive(Debug)]
pub struct StatusChangeTracker {
    config: TrackerConfig,
    pattern: ProjectPattern,
    view_type: ViewType,
    state: TrackerState,
}

impl StatusChangeTracker {
    /// Validates the view keyword and project pattern. No host call happens until
    /// [`StatusChangeTracker::initialize`].
    pub fn new(config: TrackerConfig) -> Result<Self, TrackerError> {
        let view_type = config
            .view
            .parse::<ViewType>()
            .map_err(|_| TrackerError::UnsupportedViewType(config.view.clone()))?;
        let pattern = config.project_pattern()?;
        Ok(Self {
            config,
            pattern,
            view_type,
            state: TrackerState::Uninitialized,
        })
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    pub fn view_type(&self) -> ViewType {
        self.view_type
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.state, TrackerState::Ready(_))
    }

    pub fn scope(&self) -> Option<&Scope> {
        match &self.state {
            TrackerState::Ready(scope) => Some(scope),
            TrackerState::Uninitialized => None,
        }
    }

    pub fn title(&self) -> String {
        format!(
            "last-status-change: {} [{}] {} -> {}",
            self.pattern, self.view_type, self.config.tracked_column, self.config.tracking_column
        )
    }

    /// Resolves the scope, enters the ready state and runs the full backfill sweep.
    ///
    /// On error the tracker stays uninitialized and ignores every notification.
    pub fn initialize<H>(&mut self, host: &H) -> Result<BackfillReport, TrackerError>
    where
        H: Host + MarkerStore + ?Sized,
    {
        self.state = TrackerState::Uninitialized;
        let scope = Scope::resolve(
            host,
            &self.pattern,
            self.view_type,
            &self.config.tracked_column,
            &self.config.tracking_column,
            self.config.multi_view,
        )?;
        info!(
            event = "tracker_ready",
            title = %self.title(),
            views = scope.pairs().len(),
            tracked_hash = scope.tracked().hash,
            tracking_hash = scope.tracking().hash,
            use_marker = self.config.use_marker,
        );
        self.state = TrackerState::Ready(scope);
        Ok(self.backfill(host))
    }
}

impl<H> Behavior<H> for StatusChangeTracker
where
    H: Host + MarkerStore + ?Sized,
{
    type Report = BackfillReport;
    type Outcome = EventOutcome;
    type Error = TrackerError;

    fn title(&self) -> String {
        StatusChangeTracker::title(self)
    }

    fn initialize(&mut self, host: &H) -> Result<BackfillReport, TrackerError> {
        StatusChangeTracker::initialize(self, host)
    }

    fn on_column_changed(&self, host: &H, column_hash: u32, task: TaskId) -> EventOutcome {
        self.handle_column_changed(host, column_hash, task)
    }

    fn on_history_received(&self, host: &H, subject: u32) -> EventOutcome {
        self.handle_history_received(host, subject)
    }
}
