use lsc_core::{ColumnRef, Host, ProjectId, ProjectPattern, ViewId, ViewType};
use tracing::warn;

use crate::TrackerError;

/// Resolved (project, view) pairs and the two column handles bound against the first view.
#[derive(Debug, Clone)]
pub struct Scope {
    pairs: Vec<(ProjectId, ViewId)>,
    tracked: ColumnRef,
    tracking: ColumnRef,
}

impl Scope {
    pub fn resolve<H>(
        host: &H,
        pattern: &ProjectPattern,
        view_type: ViewType,
        tracked_column: &str,
        tracking_column: &str,
        multi_view: bool,
    ) -> Result<Self, TrackerError>
    where
        H: Host + ?Sized,
    {
        let projects = host.find_projects(pattern)?;
        if projects.is_empty() {
            return Err(TrackerError::NoMatchingProject(pattern.to_string()));
        }

        let mut pairs = Vec::with_capacity(projects.len());
        for project in projects {
            let view = host.project_view(project, view_type)?.ok_or_else(|| {
                TrackerError::MissingView {
                    project: host
                        .project_name(project)
                        .ok()
                        .flatten()
                        .unwrap_or_else(|| project.to_string()),
                    view_type,
                }
            })?;
            pairs.push((project, view));
        }

        if !multi_view && pairs.len() > 1 {
            warn!(
                event = "scope_truncated",
                pattern = %pattern,
                matched = pairs.len(),
            );
            pairs.truncate(1);
        }

        let (_, first_view) = pairs[0];
        let bind = |name: &str| -> Result<ColumnRef, TrackerError> {
            host.column_by_name(first_view, name)?
                .ok_or_else(|| TrackerError::MissingColumn {
                    column: name.to_string(),
                    view_type,
                })
        };
        let tracked = bind(tracked_column)?;
        let tracking = bind(tracking_column)?;

        Ok(Self {
            pairs,
            tracked,
            tracking,
        })
    }

    pub fn pairs(&self) -> &[(ProjectId, ViewId)] {
        &self.pairs
    }

    pub fn views(&self) -> impl Iterator<Item = ViewId> + '_ {
        self.pairs.iter().map(|(_, view)| *view)
    }

    pub fn contains(&self, project: ProjectId, view: ViewId) -> bool {
        self.pairs
            .iter()
            .any(|pair| *pair == (project, view))
    }

    pub fn tracked(&self) -> &ColumnRef {
        &self.tracked
    }

    pub fn tracking(&self) -> &ColumnRef {
        &self.tracking
    }
}
