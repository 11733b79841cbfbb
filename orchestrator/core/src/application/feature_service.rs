// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Feature Service
//!
//! Owns the project documents: the FeatureList JSON and the project spec.
//! Saved documents are stored verbatim. A status update edits only `status`
//! and `passes` of one feature inside the store's read-modify-write
//! transaction and then applies the auto-completion rule: the update that
//! leaves every feature done and passing raises `COMPLETED`.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::ser::PrettyFormatter;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info};

use crate::application::signal_channel::{SignalChannel, SignalError};
use crate::domain::clock::Clock;
use crate::domain::feature::{FeatureList, FeatureStatus};
use crate::domain::repository::{FeatureRepository, RepositoryError, SpecRepository};
use crate::domain::signal::{COMPLETED, TRUE_VALUE};

#[derive(Debug, Error)]
pub enum FeatureError {
    #[error("feature '{0}' not found")]
    NotFound(String),

    #[error("project '{0}' has no feature list")]
    NoFeatureList(String),

    #[error("malformed feature list for project '{project_id}': {source}")]
    Malformed {
        project_id: String,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error(transparent)]
    Signal(#[from] SignalError),
}

#[derive(Clone)]
pub struct FeatureService {
    features: Arc<dyn FeatureRepository>,
    specs: Arc<dyn SpecRepository>,
    signals: SignalChannel,
    clock: Arc<dyn Clock>,
}

impl FeatureService {
    pub fn new(
        features: Arc<dyn FeatureRepository>,
        specs: Arc<dyn SpecRepository>,
        signals: SignalChannel,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            features,
            specs,
            signals,
            clock,
        }
    }

    /// Validate and store `content` as the project's FeatureList, byte for byte.
    pub async fn save_features(&self, project_id: &str, content: &str) -> Result<FeatureList, FeatureError> {
        let list = FeatureList::parse(content).map_err(|source| FeatureError::Malformed {
            project_id: project_id.to_string(),
            source,
        })?;
        self.features.save_features(project_id, content, self.clock.now()).await?;
        info!(project_id, features = list.features.len(), "Feature list saved");
        Ok(list)
    }

    /// Raw document, or an empty string when the project has none.
    pub async fn get_features(&self, project_id: &str) -> Result<String, FeatureError> {
        Ok(self.features.get_features(project_id).await?.unwrap_or_default())
    }

    pub async fn load_feature_list(&self, project_id: &str) -> Result<Option<FeatureList>, FeatureError> {
        match self.features.get_features(project_id).await? {
            None => Ok(None),
            Some(content) if content.trim().is_empty() => Ok(None),
            Some(content) => FeatureList::parse(&content)
                .map(Some)
                .map_err(|source| FeatureError::Malformed {
                    project_id: project_id.to_string(),
                    source,
                }),
        }
    }

    /// Set `status` and `passes` of one feature. Returns the updated list.
    pub async fn update_feature_status(
        &self,
        project_id: &str,
        feature_id: &str,
        status: &FeatureStatus,
        passes: bool,
    ) -> Result<FeatureList, FeatureError> {
        let rejection: Mutex<Option<FeatureError>> = Mutex::new(None);
        let status_value = status.as_str().to_string();

        let edit = |content: &str| -> Result<String, RepositoryError> {
            match set_feature_fields(content, feature_id, &status_value, passes) {
                Ok(updated) => Ok(updated),
                Err(EditFailure::Missing) => {
                    *rejection.lock() = Some(FeatureError::NotFound(feature_id.to_string()));
                    Err(RepositoryError::Unknown("edit rejected".to_string()))
                }
                Err(EditFailure::Malformed(source)) => {
                    *rejection.lock() = Some(FeatureError::Malformed {
                        project_id: project_id.to_string(),
                        source,
                    });
                    Err(RepositoryError::Unknown("edit rejected".to_string()))
                }
            }
        };

        let result = self.features.update_features(project_id, &edit, self.clock.now()).await;
        if let Some(err) = rejection.lock().take() {
            return Err(err);
        }
        let updated = match result {
            Ok(updated) => updated,
            Err(RepositoryError::NotFound(_)) => return Err(FeatureError::NoFeatureList(project_id.to_string())),
            Err(e) => return Err(e.into()),
        };
        debug!(project_id, feature_id, status = %status, passes, "Feature status updated");

        let list = FeatureList::parse(&updated).map_err(|source| FeatureError::Malformed {
            project_id: project_id.to_string(),
            source,
        })?;
        self.apply_completion(project_id, &list).await?;
        Ok(list)
    }

    async fn apply_completion(&self, project_id: &str, list: &FeatureList) -> Result<(), FeatureError> {
        if !list.all_complete() || self.signals.is_set(project_id, COMPLETED).await? {
            return Ok(());
        }
        self.signals.set_signal(project_id, COMPLETED, TRUE_VALUE).await?;
        info!(project_id, "All features done and passing; project marked COMPLETED");
        Ok(())
    }

    pub async fn save_spec(&self, project_id: &str, content: &str) -> Result<(), FeatureError> {
        self.specs.save_spec(project_id, content, self.clock.now()).await?;
        Ok(())
    }

    /// Empty string when no spec was stored.
    pub async fn get_spec(&self, project_id: &str) -> Result<String, FeatureError> {
        Ok(self.specs.get_spec(project_id).await?.unwrap_or_default())
    }
}

enum EditFailure {
    Missing,
    Malformed(serde_json::Error),
}

/// Patch one feature inside the raw document. Key order is preserved; a
/// multi-line document is re-rendered with its own indent unit.
fn set_feature_fields(content: &str, feature_id: &str, status: &str, passes: bool) -> Result<String, EditFailure> {
    let mut document: Value = serde_json::from_str(content).map_err(EditFailure::Malformed)?;

    let feature = document
        .get_mut("features")
        .and_then(Value::as_array_mut)
        .and_then(|features| {
            features
                .iter_mut()
                .find(|f| f.get("id").and_then(Value::as_str) == Some(feature_id))
        })
        .and_then(Value::as_object_mut)
        .ok_or(EditFailure::Missing)?;

    feature.insert("status".to_string(), Value::String(status.to_string()));
    feature.insert("passes".to_string(), Value::Bool(passes));

    match detect_indent(content) {
        Some(indent) => render_indented(&document, indent, content.ends_with('\n')),
        None => serde_json::to_string(&document).map_err(EditFailure::Malformed),
    }
}

/// Leading whitespace of the first indented line, if the document is
/// multi-line.
fn detect_indent(content: &str) -> Option<&str> {
    content.lines().skip(1).find_map(|line| {
        let body = line.trim_start_matches([' ', '\t']);
        let indent = &line[..line.len() - body.len()];
        (!indent.is_empty() && !body.is_empty()).then_some(indent)
    })
}

fn render_indented(document: &Value, indent: &str, trailing_newline: bool) -> Result<String, EditFailure> {
    let mut buf = Vec::new();
    let formatter = PrettyFormatter::with_indent(indent.as_bytes());
    let mut serializer = serde_json::Serializer::with_formatter(&mut buf, formatter);
    document.serialize(&mut serializer).map_err(EditFailure::Malformed)?;
    if trailing_newline {
        buf.push(b'\n');
    }
    // serde_json only emits UTF-8.
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::clock::SystemClock;
    use crate::infrastructure::repositories::InMemoryCoordinationStore;

    const TWO_FEATURES: &str = r#"{"project_name":"todo","features":[{"id":"a","description":"A","status":"pending","passes":false,"extra":1},{"id":"b","description":"B","status":"done","passes":true}]}"#;

    fn service() -> (FeatureService, SignalChannel) {
        let store = Arc::new(InMemoryCoordinationStore::new());
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let signals = SignalChannel::new(store.clone(), clock.clone());
        (FeatureService::new(store.clone(), store, signals.clone(), clock), signals)
    }

    #[tokio::test]
    async fn test_save_is_byte_identical() {
        let (features, _) = service();
        let pretty = "{\n  \"features\": [ {\"id\": \"a\"} ]\n}";
        features.save_features("p", pretty).await.unwrap();
        assert_eq!(features.get_features("p").await.unwrap(), pretty);
    }

    #[tokio::test]
    async fn test_save_rejects_malformed_with_project() {
        let (features, _) = service();
        let err = features.save_features("todo", "{not json").await.unwrap_err();
        assert!(err.to_string().contains("todo"));
        assert_eq!(features.get_features("todo").await.unwrap(), "");
    }

    #[tokio::test]
    async fn test_update_touches_only_status_and_passes() {
        let (features, _) = service();
        features.save_features("p", TWO_FEATURES).await.unwrap();
        features
            .update_feature_status("p", "a", &FeatureStatus::InProgress, false)
            .await
            .unwrap();

        let expected = TWO_FEATURES.replacen(r#""status":"pending""#, r#""status":"in_progress""#, 1);
        assert_eq!(features.get_features("p").await.unwrap(), expected);
    }

    #[tokio::test]
    async fn test_update_keeps_document_indentation() {
        let (features, _) = service();
        for indent in ["    ", "\t", "  "] {
            let doc = format!(
                "{{\n{i}\"features\": [\n{i}{i}{{\n{i}{i}{i}\"id\": \"a\",\n{i}{i}{i}\"status\": \"pending\",\n{i}{i}{i}\"passes\": false\n{i}{i}}}\n{i}]\n}}\n",
                i = indent
            );
            features.save_features("p", &doc).await.unwrap();
            features
                .update_feature_status("p", "a", &FeatureStatus::Done, true)
                .await
                .unwrap();

            let expected = doc
                .replace("\"pending\"", "\"done\"")
                .replace("\"passes\": false", "\"passes\": true");
            assert_eq!(features.get_features("p").await.unwrap(), expected);
        }
    }

    #[tokio::test]
    async fn test_update_missing_feature_is_not_found() {
        let (features, _) = service();
        features.save_features("p", TWO_FEATURES).await.unwrap();
        let err = features
            .update_feature_status("p", "zzz", &FeatureStatus::Done, true)
            .await
            .unwrap_err();
        assert!(matches!(err, FeatureError::NotFound(id) if id == "zzz"));
        assert_eq!(features.get_features("p").await.unwrap(), TWO_FEATURES);

        let err = features
            .update_feature_status("other", "a", &FeatureStatus::Done, true)
            .await
            .unwrap_err();
        assert!(matches!(err, FeatureError::NoFeatureList(_)));
    }

    #[tokio::test]
    async fn test_completion_raised_on_transition_only() {
        let (features, signals) = service();
        features.save_features("p", TWO_FEATURES).await.unwrap();

        features.update_feature_status("p", "a", &FeatureStatus::Done, false).await.unwrap();
        assert_eq!(signals.get_signal("p", COMPLETED).await.unwrap(), "");

        features.update_feature_status("p", "a", &FeatureStatus::from("DONE"), true).await.unwrap();
        assert_eq!(signals.get_signal("p", COMPLETED).await.unwrap(), "true");

        // Idempotent while already complete
        features.update_feature_status("p", "b", &FeatureStatus::Done, true).await.unwrap();
        assert_eq!(signals.get_signal("p", COMPLETED).await.unwrap(), "true");
    }

    #[tokio::test]
    async fn test_spec_round_trip() {
        let (features, _) = service();
        assert_eq!(features.get_spec("p").await.unwrap(), "");
        features.save_spec("p", "# Todo app\n").await.unwrap();
        assert_eq!(features.get_spec("p").await.unwrap(), "# Todo app\n");
    }
}
