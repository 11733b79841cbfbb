// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Feature Model
//!
//! A [`Feature`] is one unit of work inside a project. The full set of features
//! for a project is a [`FeatureList`], persisted as a single JSON document keyed
//! by project id (see `crate::domain::repository::FeatureRepository`).
//!
//! Status and priority were historically free-text strings. They are modelled
//! as enums here but parse case-insensitively and keep unknown values verbatim
//! in an `Other` variant, so documents written by older tooling survive a
//! load/save cycle.
//!
//! ```json
//! {
//!   "project_name": "todo-app",
//!   "features": [{
//!     "id": "auth",
//!     "category": "backend",
//!     "priority": "MVP",
//!     "description": "Login endpoint",
//!     "status": "pending",
//!     "passes": false,
//!     "steps": ["add route", "add tests"],
//!     "dependencies": {
//!       "depends_on_ids": ["db"],
//!       "exclusive_write_paths": ["src/auth.rs"],
//!       "read_only_paths": ["src/db.rs"]
//!     }
//!   }]
//! }
//! ```
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Feature and FeatureList value types

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status of a feature as written by agents and the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum FeatureStatus {
    #[default]
    Pending,
    InProgress,
    Done,
    /// Written by some agents instead of `done`. Counts as finished for
    /// scheduling but not for project completion.
    Implemented,
    Failed,
    Other(String),
}

impl FeatureStatus {
    pub fn as_str(&self) -> &str {
        match self {
            FeatureStatus::Pending => "pending",
            FeatureStatus::InProgress => "in_progress",
            FeatureStatus::Done => "done",
            FeatureStatus::Implemented => "implemented",
            FeatureStatus::Failed => "failed",
            FeatureStatus::Other(raw) => raw,
        }
    }

    /// True only for `done` (any casing).
    pub fn is_done(&self) -> bool {
        matches!(self, FeatureStatus::Done)
    }
}

impl From<String> for FeatureStatus {
    fn from(raw: String) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "" | "pending" | "todo" => FeatureStatus::Pending,
            "in_progress" | "in-progress" => FeatureStatus::InProgress,
            "done" => FeatureStatus::Done,
            "implemented" => FeatureStatus::Implemented,
            "failed" => FeatureStatus::Failed,
            _ => FeatureStatus::Other(raw),
        }
    }
}

impl From<&str> for FeatureStatus {
    fn from(raw: &str) -> Self {
        FeatureStatus::from(raw.to_string())
    }
}

impl From<FeatureStatus> for String {
    fn from(status: FeatureStatus) -> Self {
        match status {
            FeatureStatus::Other(raw) => raw,
            other => other.as_str().to_string(),
        }
    }
}

impl fmt::Display for FeatureStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Priority {
    Poc,
    #[default]
    Mvp,
    Production,
    Other(String),
}

impl From<String> for Priority {
    fn from(raw: String) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "POC" => Priority::Poc,
            "MVP" => Priority::Mvp,
            "PRODUCTION" => Priority::Production,
            _ => Priority::Other(raw),
        }
    }
}

impl From<Priority> for String {
    fn from(priority: Priority) -> Self {
        match priority {
            Priority::Poc => "POC".to_string(),
            Priority::Mvp => "MVP".to_string(),
            Priority::Production => "Production".to_string(),
            Priority::Other(raw) => raw,
        }
    }
}

/// Declared dependency edges and file-path footprint of a feature.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FeatureDependencies {
    #[serde(default)]
    pub depends_on_ids: Vec<String>,
    #[serde(default)]
    pub exclusive_write_paths: Vec<String>,
    #[serde(default)]
    pub read_only_paths: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Feature {
    pub id: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub status: FeatureStatus,
    #[serde(default)]
    pub passes: bool,
    #[serde(default)]
    pub steps: Vec<String>,
    #[serde(default)]
    pub dependencies: FeatureDependencies,
}

impl Feature {
    pub fn new(id: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            category: String::new(),
            priority: Priority::default(),
            description: description.into(),
            status: FeatureStatus::Pending,
            passes: false,
            steps: Vec::new(),
            dependencies: FeatureDependencies::default(),
        }
    }

    pub fn depends_on(mut self, ids: &[&str]) -> Self {
        self.dependencies.depends_on_ids = ids.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn writes(mut self, paths: &[&str]) -> Self {
        self.dependencies.exclusive_write_paths = paths.iter().map(|s| s.to_string()).collect();
        self
    }

    /// Done and verified.
    pub fn is_complete(&self) -> bool {
        self.status.is_done() && self.passes
    }
}

/// Ordered features of one project plus its display name.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FeatureList {
    #[serde(default)]
    pub project_name: String,
    #[serde(default)]
    pub features: Vec<Feature>,
}

impl FeatureList {
    pub fn parse(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn find(&self, id: &str) -> Option<&Feature> {
        self.features.iter().find(|f| f.id == id)
    }

    /// Every feature is done and passing. An empty list is never complete.
    pub fn all_complete(&self) -> bool {
        !self.features.is_empty() && self.features.iter().all(Feature::is_complete)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_parses_case_insensitively() {
        assert_eq!(FeatureStatus::from("DONE"), FeatureStatus::Done);
        assert_eq!(FeatureStatus::from("In_Progress"), FeatureStatus::InProgress);
        assert_eq!(FeatureStatus::from(""), FeatureStatus::Pending);
        assert_eq!(
            FeatureStatus::from("blocked-on-review"),
            FeatureStatus::Other("blocked-on-review".to_string())
        );
    }

    #[test]
    fn test_unknown_values_survive_serialization() {
        let json = r#"{"id":"a","priority":"Stretch","status":"Blocked-On-Review"}"#;
        let feature: Feature = serde_json::from_str(json).unwrap();
        let back = serde_json::to_value(&feature).unwrap();

        assert_eq!(back["priority"], "Stretch");
        assert_eq!(back["status"], "Blocked-On-Review");
    }

    #[test]
    fn test_missing_fields_default() {
        let list = FeatureList::parse(r#"{"features":[{"id":"only"}]}"#).unwrap();
        let feature = &list.features[0];

        assert_eq!(list.project_name, "");
        assert_eq!(feature.status, FeatureStatus::Pending);
        assert_eq!(feature.priority, Priority::Mvp);
        assert!(feature.dependencies.depends_on_ids.is_empty());
    }

    #[test]
    fn test_all_complete_requires_done_and_passes() {
        let mut done = Feature::new("a", "");
        done.status = FeatureStatus::Done;
        done.passes = true;

        let mut implemented = Feature::new("b", "");
        implemented.status = FeatureStatus::Implemented;
        implemented.passes = true;

        let complete = FeatureList { project_name: "p".into(), features: vec![done.clone()] };
        let mixed = FeatureList { project_name: "p".into(), features: vec![done, implemented] };

        assert!(complete.all_complete());
        assert!(!mixed.all_complete());
        assert!(!FeatureList::default().all_complete());
    }
}
