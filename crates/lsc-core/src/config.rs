use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::contracts::{MatchMode, ProjectPattern};

pub const PARAM_PROJECT: &str = "HansoftProject";
pub const PARAM_INVERTED_MATCH: &str = "InvertedMatch";
pub const PARAM_VIEW: &str = "View";
pub const PARAM_TRACKED_COLUMN: &str = "TrackedColumn";
pub const PARAM_TRACKING_COLUMN: &str = "TrackingColumn";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("missing parameter: {0}")]
    MissingParameter(&'static str),
    #[error("invalid project pattern {pattern}: {reason}")]
    InvalidPattern { pattern: String, reason: String },
}

/// Settings for one tracker instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TrackerConfig {
    /// Project name pattern; `*` is a wildcard.
    pub project: String,
    #[serde(default)]
    pub inverted_match: bool,
    /// One of `Agile`, `Scheduled`, `Bugs`, `Backlog`.
    pub view: String,
    pub tracked_column: String,
    pub tracking_column: String,
    /// Keep every matched project view in scope instead of only the first one.
    #[serde(default = "default_multi_view")]
    pub multi_view: bool,
    /// Cache a per-task "last processed" marker to skip history scans of untouched tasks.
    #[serde(default)]
    pub use_marker: bool,
}

fn default_multi_view() -> bool {
    true
}

impl TrackerConfig {
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }

    /// Builds a config from the behavior parameter map used by existing host deployments.
    /// `InvertedMatch` is on only when set to "yes" (any case).
    pub fn from_parameters(params: &BTreeMap<String, String>) -> Result<Self, ConfigError> {
        let required = |key: &'static str| {
            params
                .get(key)
                .cloned()
                .ok_or(ConfigError::MissingParameter(key))
        };
        let inverted_match = params
            .get(PARAM_INVERTED_MATCH)
            .is_some_and(|value| value.to_lowercase() == "yes");

        Ok(Self {
            project: required(PARAM_PROJECT)?,
            inverted_match,
            view: required(PARAM_VIEW)?,
            tracked_column: required(PARAM_TRACKED_COLUMN)?,
            tracking_column: required(PARAM_TRACKING_COLUMN)?,
            multi_view: default_multi_view(),
            use_marker: false,
        })
    }

    pub fn match_mode(&self) -> MatchMode {
        if self.inverted_match {
            MatchMode::Inverted
        } else {
            MatchMode::Exact
        }
    }

    pub fn project_pattern(&self) -> Result<ProjectPattern, ConfigError> {
        ProjectPattern::new(self.project.clone(), self.match_mode())
    }
}
