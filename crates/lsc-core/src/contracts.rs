use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::config::ConfigError;

/// History field id the host uses for the workflow status of a task.
///
/// The tracker correlates entries carrying this id with the configured tracked column. Nothing
/// verifies that the configured column really is the status field: if it is not, live
/// notifications and history reconciliation follow different signals.
pub const STATUS_FIELD_ID: u32 = 15;

const MICROS_PER_SECOND: u64 = 1_000_000;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ProjectId(pub u32);

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ViewId(pub u32);

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct TaskId(pub u32);

impl fmt::Display for ProjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "project:{}", self.0)
    }
}

impl fmt::Display for ViewId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "view:{}", self.0)
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task:{}", self.0)
    }
}

/// Host timestamp: microseconds since 1970-01-01 UTC. Zero means the value was never set.
#[derive(
    Debug,
    Default,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
)]
#[serde(transparent)]
pub struct HpmTime(pub u64);

impl HpmTime {
    pub const ZERO: HpmTime = HpmTime(0);

    pub fn as_micros(self) -> u64 {
        self.0
    }

    pub fn is_unset(self) -> bool {
        self.0 == 0
    }

    /// Times before the epoch clamp to [`HpmTime::ZERO`].
    pub fn from_datetime(ts: DateTime<Utc>) -> Self {
        Self(u64::try_from(ts.timestamp_micros()).unwrap_or(0))
    }

    pub fn to_datetime(self) -> Option<DateTime<Utc>> {
        let secs = i64::try_from(self.0 / MICROS_PER_SECOND).ok()?;
        let nanos = u32::try_from((self.0 % MICROS_PER_SECOND) * 1_000).ok()?;
        DateTime::<Utc>::from_timestamp(secs, nanos)
    }
}

impl fmt::Display for HpmTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_datetime() {
            Some(ts) if !self.is_unset() => f.write_str(&ts.to_rfc3339()),
            _ => write!(f, "{}us", self.0),
        }
    }
}

/// Handle to a custom column. The hash is the column identity; views of the same scope carry
/// structurally identical columns that share it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ColumnRef {
    pub hash: u32,
    pub name: String,
}

impl ColumnRef {
    pub fn new(hash: u32, name: impl Into<String>) -> Self {
        Self {
            hash,
            name: name.into(),
        }
    }

    pub fn same_column(&self, other: &ColumnRef) -> bool {
        self.hash == other.hash
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViewType {
    AgileMain,
    ScheduledMain,
    BugTracker,
    Backlog,
}

impl ViewType {
    pub fn keyword(&self) -> &'static str {
        match self {
            ViewType::AgileMain => "Agile",
            ViewType::ScheduledMain => "Scheduled",
            ViewType::BugTracker => "Bugs",
            ViewType::Backlog => "Backlog",
        }
    }
}

impl fmt::Display for ViewType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.keyword())
    }
}

impl FromStr for ViewType {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input {
            "Agile" => Ok(ViewType::AgileMain),
            "Scheduled" => Ok(ViewType::ScheduledMain),
            "Bugs" => Ok(ViewType::BugTracker),
            "Backlog" => Ok(ViewType::Backlog),
            other => Err(format!("Unsupported view type: {other}")),
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMode {
    #[default]
    Exact,
    /// Select every project the pattern does NOT match.
    Inverted,
}

/// Project name pattern. `*` matches any run of characters, everything else is literal and the
/// whole name must match.
#[derive(Debug, Clone)]
pub struct ProjectPattern {
    pattern: String,
    mode: MatchMode,
    matcher: Regex,
}

impl ProjectPattern {
    pub fn new(pattern: impl Into<String>, mode: MatchMode) -> Result<Self, ConfigError> {
        let pattern = pattern.into();
        let source = pattern
            .split('*')
            .map(regex::escape)
            .collect::<Vec<_>>()
            .join(".*");
        let matcher =
            Regex::new(&format!("^{source}$")).map_err(|err| ConfigError::InvalidPattern {
                pattern: pattern.clone(),
                reason: err.to_string(),
            })?;
        Ok(Self {
            pattern,
            mode,
            matcher,
        })
    }

    /// Whether a project with this name belongs to the selection, honoring the match mode.
    pub fn selects(&self, project_name: &str) -> bool {
        let hit = self.matcher.is_match(project_name);
        match self.mode {
            MatchMode::Exact => hit,
            MatchMode::Inverted => !hit,
        }
    }
}

impl fmt::Display for ProjectPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.mode {
            MatchMode::Exact => f.write_str(&self.pattern),
            MatchMode::Inverted => write!(f, "!{}", self.pattern),
        }
    }
}

/// Snapshot of the host-owned task attributes the tracker needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskInfo {
    pub id: TaskId,
    pub project: ProjectId,
    pub view: ViewId,
    pub last_modified: HpmTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub field_id: u32,
    pub time: HpmTime,
}

impl HistoryEntry {
    pub fn is_status_change(&self) -> bool {
        self.field_id == STATUS_FIELD_ID
    }
}

/// Full change history of one task, as returned by the host.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryRecord {
    /// Time of the most recent change to any field.
    pub latest: HpmTime,
    #[serde(default)]
    pub entries: Vec<HistoryEntry>,
}

/// How the host classifies a raw identifier carried by a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubjectKind {
    Task,
    TaskRef,
    Other,
}

impl SubjectKind {
    pub fn is_task(self) -> bool {
        matches!(self, SubjectKind::Task | SubjectKind::TaskRef)
    }
}

/// Per-task "last processed" entry kept outside the visible column schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessedMarker {
    pub last_processed_at: HpmTime,
}

impl ProcessedMarker {
    pub fn new(last_processed_at: HpmTime) -> Self {
        Self { last_processed_at }
    }

    pub fn encode(&self) -> Vec<u8> {
        serde_json::to_vec(self).unwrap_or_default()
    }

    /// Empty or unreadable bytes decode to `None`, i.e. "never processed".
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.is_empty() {
            return None;
        }
        serde_json::from_slice(bytes).ok()
    }

    /// A task modified at or before the marker time needs no history scan.
    pub fn covers(&self, last_modified: HpmTime) -> bool {
        self.last_processed_at >= last_modified
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn view_type_keywords_round_trip_and_reject_unknown() {
        for keyword in ["Agile", "Scheduled", "Bugs", "Backlog"] {
            let view_type: ViewType = keyword.parse().expect("known keyword");
            assert_eq!(view_type.keyword(), keyword);
        }
        let err = "Kanban".parse::<ViewType>().expect_err("unknown keyword");
        assert!(err.contains("Kanban"));
        assert!("agile".parse::<ViewType>().is_err());
    }

    #[test]
    fn exact_pattern_requires_full_name() {
        let pattern = ProjectPattern::new("Proj1", MatchMode::Exact).expect("pattern");
        assert!(pattern.selects("Proj1"));
        assert!(!pattern.selects("Proj10"));
        assert!(!pattern.selects("MyProj1"));
    }

    #[test]
    fn wildcard_pattern_matches_prefix_and_escapes_literals() {
        let pattern = ProjectPattern::new("Proj*", MatchMode::Exact).expect("pattern");
        assert!(pattern.selects("Proj"));
        assert!(pattern.selects("Proj1"));
        assert!(!pattern.selects("Other"));

        let dotted = ProjectPattern::new("a.b*", MatchMode::Exact).expect("pattern");
        assert!(dotted.selects("a.b-2"));
        assert!(!dotted.selects("axb"));
    }

    #[test]
    fn inverted_pattern_excludes_matches() {
        let pattern = ProjectPattern::new("Proj*", MatchMode::Inverted).expect("pattern");
        assert!(!pattern.selects("Proj1"));
        assert!(pattern.selects("Backoffice"));
        assert_eq!(pattern.to_string(), "!Proj*");
    }

    #[test]
    fn hpm_time_converts_through_chrono() {
        let ts = Utc
            .with_ymd_and_hms(2026, 2, 23, 12, 0, 0)
            .single()
            .expect("valid timestamp");
        let hpm = HpmTime::from_datetime(ts);
        assert_eq!(hpm.as_micros(), ts.timestamp_micros() as u64);
        assert_eq!(hpm.to_datetime(), Some(ts));

        let before_epoch = Utc
            .with_ymd_and_hms(1960, 1, 1, 0, 0, 0)
            .single()
            .expect("valid timestamp");
        assert_eq!(HpmTime::from_datetime(before_epoch), HpmTime::ZERO);
        assert!(HpmTime::ZERO.is_unset());
    }

    #[test]
    fn marker_decoding_treats_garbage_as_absent() {
        let marker = ProcessedMarker::new(HpmTime(42));
        assert_eq!(ProcessedMarker::decode(&marker.encode()), Some(marker));
        assert_eq!(ProcessedMarker::decode(&[]), None);
        assert_eq!(ProcessedMarker::decode(&[0xde, 0xad, 0xbe, 0xef]), None);
        assert_eq!(ProcessedMarker::decode(br#"{"other":1}"#), None);
    }

    #[test]
    fn marker_covers_unmodified_tasks_only() {
        let marker = ProcessedMarker::new(HpmTime(100));
        assert!(marker.covers(HpmTime(100)));
        assert!(marker.covers(HpmTime(99)));
        assert!(!marker.covers(HpmTime(101)));
    }

    #[test]
    fn status_entries_use_field_fifteen() {
        let status = HistoryEntry {
            field_id: STATUS_FIELD_ID,
            time: HpmTime(1),
        };
        let other = HistoryEntry {
            field_id: 3,
            time: HpmTime(1),
        };
        assert!(status.is_status_change());
        assert!(!other.is_status_change());
        assert!(SubjectKind::TaskRef.is_task());
        assert!(!SubjectKind::Other.is_task());
    }
}
