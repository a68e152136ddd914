use lsc_core::{
    ColumnRef, HistoryEntry, HistoryRecord, Host, HostError, HostEvent, HpmTime, MarkerStore,
    ProjectId, ProjectPattern, SubjectKind, TaskId, TaskInfo, ViewId, ViewType, STATUS_FIELD_ID,
};
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MemHostError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("snapshot parse error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("duplicate task id {0}")]
    DuplicateTask(TaskId),
    #[error("task reference {0} collides with an existing id")]
    DuplicateReference(u32),
    #[error("{task} sets value for column {column} which its view does not carry")]
    UnknownColumn { task: TaskId, column: String },
}

/// Serializable description of a host: projects, their views, columns and tasks, plus the
/// notifications to replay against it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HostSnapshot {
    #[serde(default)]
    pub now: HpmTime,
    #[serde(default)]
    pub projects: Vec<ProjectSpec>,
    #[serde(default)]
    pub events: Vec<HostEvent>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectSpec {
    pub id: ProjectId,
    pub name: String,
    #[serde(default)]
    pub views: Vec<ViewSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViewSpec {
    pub id: ViewId,
    pub view_type: ViewType,
    #[serde(default)]
    pub columns: Vec<ColumnRef>,
    #[serde(default)]
    pub tasks: Vec<TaskSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSpec {
    pub id: TaskId,
    #[serde(default)]
    pub last_modified: HpmTime,
    /// Date/time column values keyed by column name.
    #[serde(default)]
    pub values: BTreeMap<String, HpmTime>,
    #[serde(default)]
    pub history: Option<HistoryRecord>,
    /// Ids of task references that resolve to this task.
    #[serde(default)]
    pub refs: Vec<u32>,
    #[serde(default)]
    pub marker: Option<Vec<u8>>,
}

impl HostSnapshot {
    pub fn new(now: HpmTime) -> Self {
        Self {
            now,
            ..Self::default()
        }
    }

    pub fn project(mut self, project: ProjectSpec) -> Self {
        self.projects.push(project);
        self
    }

    pub fn from_json_str(contents: &str) -> Result<Self, MemHostError> {
        Ok(serde_json::from_str(contents)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, MemHostError> {
        let contents = fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }
}

impl ProjectSpec {
    pub fn new(id: u32, name: impl Into<String>) -> Self {
        Self {
            id: ProjectId(id),
            name: name.into(),
            views: Vec::new(),
        }
    }

    pub fn view(mut self, view: ViewSpec) -> Self {
        self.views.push(view);
        self
    }
}

impl ViewSpec {
    pub fn new(id: u32, view_type: ViewType) -> Self {
        Self {
            id: ViewId(id),
            view_type,
            columns: Vec::new(),
            tasks: Vec::new(),
        }
    }

    pub fn column(mut self, hash: u32, name: impl Into<String>) -> Self {
        self.columns.push(ColumnRef::new(hash, name));
        self
    }

    pub fn task(mut self, task: TaskSpec) -> Self {
        self.tasks.push(task);
        self
    }
}

impl TaskSpec {
    pub fn new(id: u32) -> Self {
        Self {
            id: TaskId(id),
            last_modified: HpmTime::ZERO,
            values: BTreeMap::new(),
            history: None,
            refs: Vec::new(),
            marker: None,
        }
    }

    pub fn modified_at(mut self, time: u64) -> Self {
        self.last_modified = HpmTime(time);
        self
    }

    pub fn value(mut self, column: impl Into<String>, time: u64) -> Self {
        self.values.insert(column.into(), HpmTime(time));
        self
    }

    /// History with one status entry per given time; `latest` is the largest of them.
    pub fn status_history(self, times: &[u64]) -> Self {
        let entries = times
            .iter()
            .map(|time| HistoryEntry {
                field_id: STATUS_FIELD_ID,
                time: HpmTime(*time),
            })
            .collect::<Vec<_>>();
        let latest = times.iter().copied().max().unwrap_or(0);
        self.history(HistoryRecord {
            latest: HpmTime(latest),
            entries,
        })
    }

    pub fn history(mut self, history: HistoryRecord) -> Self {
        if history.latest > self.last_modified {
            self.last_modified = history.latest;
        }
        self.history = Some(history);
        self
    }

    pub fn reference(mut self, raw_id: u32) -> Self {
        self.refs.push(raw_id);
        self
    }

    pub fn marker(mut self, bytes: impl Into<Vec<u8>>) -> Self {
        self.marker = Some(bytes.into());
        self
    }
}

/// Calls observed by the host since creation or the last [`MemoryHost::reset_counters`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HostCounters {
    pub column_writes: usize,
    pub history_fetches: usize,
    pub marker_reads: usize,
    pub marker_writes: usize,
}

#[derive(Debug, Clone)]
struct ProjectState {
    id: ProjectId,
    name: String,
    views: Vec<ViewState>,
}

#[derive(Debug, Clone)]
struct ViewState {
    id: ViewId,
    view_type: ViewType,
    columns: Vec<ColumnRef>,
    leaves: Vec<TaskId>,
}

#[derive(Debug, Clone)]
struct TaskState {
    info: TaskInfo,
    values: BTreeMap<u32, HpmTime>,
    history: Option<HistoryRecord>,
    marker: Option<Vec<u8>>,
}

#[derive(Debug, Default)]
struct Faults {
    marker_reads: bool,
    marker_writes: bool,
    history: BTreeSet<TaskId>,
}

#[derive(Debug)]
struct State {
    clock: HpmTime,
    tasks: BTreeMap<TaskId, TaskState>,
    counters: HostCounters,
    faults: Faults,
}

/// In-process host. Interior mutability mirrors the host session: every call goes through a
/// shared handle, one call at a time.
#[derive(Debug)]
pub struct MemoryHost {
    projects: Vec<ProjectState>,
    refs: BTreeMap<u32, TaskId>,
    state: RefCell<State>,
}

impl MemoryHost {
    pub fn from_snapshot(snapshot: &HostSnapshot) -> Result<Self, MemHostError> {
        let mut projects = Vec::with_capacity(snapshot.projects.len());
        let mut tasks = BTreeMap::new();
        let mut refs = BTreeMap::new();

        for project in &snapshot.projects {
            let mut views = Vec::with_capacity(project.views.len());
            for view in &project.views {
                let mut leaves = Vec::with_capacity(view.tasks.len());
                for task in &view.tasks {
                    let mut values = BTreeMap::new();
                    for (name, value) in &task.values {
                        let column = view
                            .columns
                            .iter()
                            .find(|column| &column.name == name)
                            .ok_or_else(|| MemHostError::UnknownColumn {
                                task: task.id,
                                column: name.clone(),
                            })?;
                        values.insert(column.hash, *value);
                    }
                    let state = TaskState {
                        info: TaskInfo {
                            id: task.id,
                            project: project.id,
                            view: view.id,
                            last_modified: task.last_modified,
                        },
                        values,
                        history: task.history.clone(),
                        marker: task.marker.clone(),
                    };
                    if tasks.insert(task.id, state).is_some() {
                        return Err(MemHostError::DuplicateTask(task.id));
                    }
                    for raw in &task.refs {
                        if refs.insert(*raw, task.id).is_some() {
                            return Err(MemHostError::DuplicateReference(*raw));
                        }
                    }
                    leaves.push(task.id);
                }
                views.push(ViewState {
                    id: view.id,
                    view_type: view.view_type,
                    columns: view.columns.clone(),
                    leaves,
                });
            }
            projects.push(ProjectState {
                id: project.id,
                name: project.name.clone(),
                views,
            });
        }

        if let Some(raw) = refs.keys().find(|raw| tasks.contains_key(&TaskId(**raw))) {
            return Err(MemHostError::DuplicateReference(*raw));
        }

        Ok(Self {
            projects,
            refs,
            state: RefCell::new(State {
                clock: snapshot.now,
                tasks,
                counters: HostCounters::default(),
                faults: Faults::default(),
            }),
        })
    }

    pub fn set_now(&self, now: HpmTime) {
        self.state.borrow_mut().clock = now;
    }

    pub fn advance(&self, micros: u64) -> HpmTime {
        let mut state = self.state.borrow_mut();
        state.clock = HpmTime(state.clock.0.saturating_add(micros));
        state.clock
    }

    pub fn counters(&self) -> HostCounters {
        self.state.borrow().counters
    }

    pub fn reset_counters(&self) {
        self.state.borrow_mut().counters = HostCounters::default();
    }

    pub fn fail_marker_reads(&self, fail: bool) {
        self.state.borrow_mut().faults.marker_reads = fail;
    }

    pub fn fail_marker_writes(&self, fail: bool) {
        self.state.borrow_mut().faults.marker_writes = fail;
    }

    pub fn fail_history(&self, task: TaskId, fail: bool) {
        let mut state = self.state.borrow_mut();
        if fail {
            state.faults.history.insert(task);
        } else {
            state.faults.history.remove(&task);
        }
    }

    /// Value of the named column on the task, looked up through the task's own view.
    pub fn column_value(&self, task: TaskId, column: &str) -> Option<HpmTime> {
        let state = self.state.borrow();
        let task_state = state.tasks.get(&task)?;
        let column = self.view_column(task_state.info.view, column)?;
        Some(
            task_state
                .values
                .get(&column.hash)
                .copied()
                .unwrap_or(HpmTime::ZERO),
        )
    }

    /// Every task carrying the named column, with its current value.
    pub fn column_values(&self, column: &str) -> BTreeMap<TaskId, HpmTime> {
        let ids = self.state.borrow().tasks.keys().copied().collect::<Vec<_>>();
        ids.into_iter()
            .filter_map(|id| self.column_value(id, column).map(|value| (id, value)))
            .collect()
    }

    pub fn raw_marker(&self, task: TaskId) -> Option<Vec<u8>> {
        self.state
            .borrow()
            .tasks
            .get(&task)
            .and_then(|task| task.marker.clone())
    }

    /// Simulates a user editing the task status at the current clock time.
    pub fn record_status_change(&self, task: TaskId) -> Result<HpmTime, HostError> {
        self.record_change(task, STATUS_FIELD_ID)
    }

    /// Simulates an edit of any history-tracked field at the current clock time.
    pub fn record_change(&self, task: TaskId, field_id: u32) -> Result<HpmTime, HostError> {
        let mut state = self.state.borrow_mut();
        let now = state.clock;
        let task_state = state
            .tasks
            .get_mut(&task)
            .ok_or(HostError::UnknownTask(task))?;
        let history = task_state.history.get_or_insert_with(HistoryRecord::default);
        history.entries.push(HistoryEntry {
            field_id,
            time: now,
        });
        if now > history.latest {
            history.latest = now;
        }
        task_state.info.last_modified = task_state.info.last_modified.max(now);
        Ok(now)
    }

    /// Simulates a manual edit of a date/time column, bypassing the tracker.
    pub fn edit_column(&self, task: TaskId, column: &str, value: HpmTime) -> Result<(), HostError> {
        let column_ref = {
            let state = self.state.borrow();
            let task_state = state.tasks.get(&task).ok_or(HostError::UnknownTask(task))?;
            self.view_column(task_state.info.view, column)
                .ok_or_else(|| HostError::UnknownColumn {
                    task,
                    column: column.to_string(),
                })?
                .clone()
        };
        let mut state = self.state.borrow_mut();
        let now = state.clock;
        if let Some(task_state) = state.tasks.get_mut(&task) {
            task_state.values.insert(column_ref.hash, value);
            task_state.info.last_modified = task_state.info.last_modified.max(now);
        }
        Ok(())
    }

    fn view(&self, view: ViewId) -> Option<&ViewState> {
        self.projects
            .iter()
            .flat_map(|project| project.views.iter())
            .find(|candidate| candidate.id == view)
    }

    fn view_column(&self, view: ViewId, name: &str) -> Option<&ColumnRef> {
        self.view(view)?
            .columns
            .iter()
            .find(|column| column.name == name)
    }

    fn view_carries(&self, view: ViewId, column: &ColumnRef) -> bool {
        self.view(view).is_some_and(|view| {
            view.columns
                .iter()
                .any(|candidate| candidate.same_column(column))
        })
    }

    fn resolve(&self, id: TaskId) -> TaskId {
        self.refs.get(&id.0).copied().unwrap_or(id)
    }
}

impl Host for MemoryHost {
    fn find_projects(&self, pattern: &ProjectPattern) -> Result<Vec<ProjectId>, HostError> {
        Ok(self
            .projects
            .iter()
            .filter(|project| pattern.selects(&project.name))
            .map(|project| project.id)
            .collect())
    }

    fn project_name(&self, project: ProjectId) -> Result<Option<String>, HostError> {
        Ok(self
            .projects
            .iter()
            .find(|candidate| candidate.id == project)
            .map(|candidate| candidate.name.clone()))
    }

    fn project_view(
        &self,
        project: ProjectId,
        view_type: ViewType,
    ) -> Result<Option<ViewId>, HostError> {
        Ok(self
            .projects
            .iter()
            .find(|candidate| candidate.id == project)
            .and_then(|project| {
                project
                    .views
                    .iter()
                    .find(|view| view.view_type == view_type)
            })
            .map(|view| view.id))
    }

    fn column_by_name(&self, view: ViewId, name: &str) -> Result<Option<ColumnRef>, HostError> {
        Ok(self.view_column(view, name).cloned())
    }

    fn leaf_tasks(&self, view: ViewId) -> Result<Vec<TaskId>, HostError> {
        Ok(self
            .view(view)
            .map(|view| view.leaves.clone())
            .unwrap_or_default())
    }

    fn task(&self, id: TaskId) -> Result<Option<TaskInfo>, HostError> {
        let id = self.resolve(id);
        Ok(self.state.borrow().tasks.get(&id).map(|task| task.info))
    }

    fn column_time(&self, task: TaskId, column: &ColumnRef) -> Result<HpmTime, HostError> {
        let state = self.state.borrow();
        let task_state = state.tasks.get(&task).ok_or(HostError::UnknownTask(task))?;
        if !self.view_carries(task_state.info.view, column) {
            return Err(HostError::UnknownColumn {
                task,
                column: column.name.clone(),
            });
        }
        Ok(task_state
            .values
            .get(&column.hash)
            .copied()
            .unwrap_or(HpmTime::ZERO))
    }

    fn set_column_time(
        &self,
        task: TaskId,
        column: &ColumnRef,
        value: HpmTime,
    ) -> Result<(), HostError> {
        let view = self
            .state
            .borrow()
            .tasks
            .get(&task)
            .map(|task| task.info.view)
            .ok_or(HostError::UnknownTask(task))?;
        if !self.view_carries(view, column) {
            return Err(HostError::UnknownColumn {
                task,
                column: column.name.clone(),
            });
        }
        let mut state = self.state.borrow_mut();
        let now = state.clock;
        state.counters.column_writes += 1;
        if let Some(task_state) = state.tasks.get_mut(&task) {
            task_state.values.insert(column.hash, value);
            task_state.info.last_modified = task_state.info.last_modified.max(now);
        }
        Ok(())
    }

    fn history(&self, task: TaskId) -> Result<Option<HistoryRecord>, HostError> {
        let mut state = self.state.borrow_mut();
        state.counters.history_fetches += 1;
        if state.faults.history.contains(&task) {
            return Err(HostError::rejected("history", format!("{task} unavailable")));
        }
        Ok(state
            .tasks
            .get(&task)
            .and_then(|task| task.history.clone()))
    }

    fn classify(&self, raw_id: u32) -> SubjectKind {
        if self.state.borrow().tasks.contains_key(&TaskId(raw_id)) {
            SubjectKind::Task
        } else if self.refs.contains_key(&raw_id) {
            SubjectKind::TaskRef
        } else {
            SubjectKind::Other
        }
    }

    fn now(&self) -> HpmTime {
        self.state.borrow().clock
    }
}

impl MarkerStore for MemoryHost {
    fn marker(&self, task: TaskId) -> Result<Option<Vec<u8>>, HostError> {
        let mut state = self.state.borrow_mut();
        state.counters.marker_reads += 1;
        if state.faults.marker_reads {
            return Err(HostError::rejected("marker read", "injected fault"));
        }
        Ok(state
            .tasks
            .get(&task)
            .and_then(|task| task.marker.clone()))
    }

    fn set_marker(&self, task: TaskId, bytes: &[u8]) -> Result<(), HostError> {
        let mut state = self.state.borrow_mut();
        state.counters.marker_writes += 1;
        if state.faults.marker_writes {
            return Err(HostError::rejected("marker write", "injected fault"));
        }
        let task_state = state
            .tasks
            .get_mut(&task)
            .ok_or(HostError::UnknownTask(task))?;
        task_state.marker = Some(bytes.to_vec());
        Ok(())
    }
}
