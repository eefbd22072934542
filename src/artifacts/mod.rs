//! Artifact registry - named intermediate results, addressable by `@name`.
//!
//! # Ownership
//! Records are stored as `Arc<Artifact>`: the registry is the canonical home
//! of a value and `get_artifact` hands back the same allocation that was
//! stored. A branched registry starts with a copy of the parent's table; after
//! that, writes on either side are invisible to the other.

mod reference;

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::util::build_history_context;

/// A stored artifact record.
///
/// # Invariants
/// - `artifact_type` and `description` are non-empty
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    pub name: String,
    #[serde(rename = "type")]
    pub artifact_type: String,
    pub value: Value,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub purpose: Option<String>,
    /// Creation time in unix milliseconds
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

/// Input record for [`ArtifactRegistry::add_artifact`].
///
/// `value: None` means "absent" and is rejected; `Some(Value::Null)` is a
/// legitimate null value.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ArtifactSpec {
    #[serde(default, rename = "type")]
    pub artifact_type: Option<String>,
    #[serde(default, deserialize_with = "present")]
    pub value: Option<Value>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub purpose: Option<String>,
    #[serde(default)]
    pub metadata: Option<Value>,
}

/// Keeps an explicit JSON `null` as `Some(Value::Null)`; only a missing key
/// falls back to `None` via `#[serde(default)]`.
fn present<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

impl ArtifactSpec {
    pub fn new(
        artifact_type: impl Into<String>,
        value: Value,
        description: impl Into<String>,
    ) -> Self {
        Self {
            artifact_type: Some(artifact_type.into()),
            value: Some(value),
            description: Some(description.into()),
            purpose: None,
            metadata: None,
        }
    }

    pub fn with_purpose(mut self, purpose: impl Into<String>) -> Self {
        self.purpose = Some(purpose.into());
        self
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Errors raised by [`ArtifactRegistry::add_artifact`].
///
/// These are programmer errors: a malformed record is never stored.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ArtifactError {
    #[error("Invalid artifact name: {0:?}")]
    InvalidName(String),

    #[error("Artifact '{name}' is missing required fields: {}", fields.join(", "))]
    MissingFields {
        name: String,
        fields: Vec<&'static str>,
    },

    #[error("Artifact '{0}' has no value")]
    MissingValue(String),
}

/// One entry of the conversation context carried next to the artifacts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub role: String,
    pub content: String,
}

/// Mapping from artifact name to record, plus conversation history.
///
/// Any non-blank name can be stored, but only names made of ASCII letters,
/// digits, `_` and `-` can be referenced as `@name` (see
/// [`is_referenceable`](Self::is_referenceable)).
#[derive(Debug, Clone, Default)]
pub struct ArtifactRegistry {
    entries: HashMap<String, Arc<Artifact>>,
    /// Insertion order of names (overwrites keep their original position)
    order: Vec<String>,
    history: Vec<HistoryEntry>,
}

impl ArtifactRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a child registry: shallow copy of entries and history.
    ///
    /// # Postcondition
    /// Mutating the child never affects `self`, and vice versa.
    pub fn branch(&self) -> Self {
        self.clone()
    }

    /// Validate `spec` and insert (or overwrite) the artifact under `name`.
    ///
    /// # Errors
    /// - `InvalidName` if `name` is blank
    /// - `MissingFields` if `type` or `description` is missing or blank
    /// - `MissingValue` if the value is absent (`null` is accepted)
    pub fn add_artifact(
        &mut self,
        name: &str,
        spec: ArtifactSpec,
    ) -> Result<Arc<Artifact>, ArtifactError> {
        if name.trim().is_empty() {
            return Err(ArtifactError::InvalidName(name.to_string()));
        }

        let artifact_type = non_blank(spec.artifact_type);
        let description = non_blank(spec.description);
        let mut missing = Vec::new();
        if artifact_type.is_none() {
            missing.push("type");
        }
        if description.is_none() {
            missing.push("description");
        }
        let (Some(artifact_type), Some(description)) = (artifact_type, description) else {
            return Err(ArtifactError::MissingFields {
                name: name.to_string(),
                fields: missing,
            });
        };

        let value = spec
            .value
            .ok_or_else(|| ArtifactError::MissingValue(name.to_string()))?;

        let artifact = Arc::new(Artifact {
            name: name.to_string(),
            artifact_type,
            value,
            description,
            purpose: spec.purpose,
            timestamp: chrono::Utc::now().timestamp_millis(),
            metadata: spec.metadata,
        });
        self.insert(Arc::clone(&artifact));
        Ok(artifact)
    }

    /// Store an existing record, e.g. one produced in a child registry.
    ///
    /// If `name` differs from the record's own name, a renamed copy is stored.
    pub fn republish(&mut self, name: &str, artifact: &Arc<Artifact>) -> Result<Arc<Artifact>, ArtifactError> {
        if name.trim().is_empty() {
            return Err(ArtifactError::InvalidName(name.to_string()));
        }
        let stored = if artifact.name == name {
            Arc::clone(artifact)
        } else {
            Arc::new(Artifact {
                name: name.to_string(),
                ..Artifact::clone(artifact)
            })
        };
        self.insert(Arc::clone(&stored));
        Ok(stored)
    }

    fn insert(&mut self, artifact: Arc<Artifact>) {
        if !self.entries.contains_key(&artifact.name) {
            self.order.push(artifact.name.clone());
        }
        tracing::debug!(name = %artifact.name, kind = %artifact.artifact_type, "artifact stored");
        self.entries.insert(artifact.name.clone(), artifact);
    }

    /// Get the full record, or `None` if not found.
    pub fn get_artifact(&self, name: &str) -> Option<Arc<Artifact>> {
        self.entries.get(name).cloned()
    }

    /// Get the stored value, or `None` if not found.
    pub fn get_artifact_value(&self, name: &str) -> Option<&Value> {
        self.entries.get(name).map(|a| &a.value)
    }

    /// `(name, record)` pairs in insertion order.
    pub fn list_artifacts(&self) -> Vec<(String, Arc<Artifact>)> {
        self.order
            .iter()
            .filter_map(|name| self.entries.get(name).map(|a| (name.clone(), Arc::clone(a))))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Replace every resolvable `@name` token inside `input`.
    ///
    /// Unresolved tokens are left unchanged; use
    /// [`unresolved_references`](Self::unresolved_references) to check for them.
    pub fn resolve_references(&self, input: &Value) -> Value {
        reference::resolve(self, input)
    }

    /// Whether `name` can be written as an `@name` reference.
    pub fn is_referenceable(name: &str) -> bool {
        reference::is_referenceable(name)
    }

    /// Referenced names in `input` with no stored artifact.
    pub fn unresolved_references(&self, input: &Value) -> Vec<String> {
        reference::unresolved(self, input)
    }

    /// One line per artifact, for embedding into prompts.
    pub fn summary(&self) -> String {
        if self.is_empty() {
            return "(no artifacts)".to_string();
        }
        self.list_artifacts()
            .iter()
            .map(|(name, a)| match &a.purpose {
                Some(purpose) => format!("- @{} ({}): {} [purpose: {}]", name, a.artifact_type, a.description, purpose),
                None => format!("- @{} ({}): {}", name, a.artifact_type, a.description),
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Append an entry to the conversation history.
    pub fn record(&mut self, role: impl Into<String>, content: impl Into<String>) {
        self.history.push(HistoryEntry {
            role: role.into(),
            content: content.into(),
        });
    }

    pub fn history(&self) -> &[HistoryEntry] {
        &self.history
    }

    /// History rendered most-recent-last within `max_chars`.
    pub fn history_context(&self, max_chars: usize) -> String {
        build_history_context(&self.history, max_chars)
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}

/// JSON type name of a value, used as the artifact type of wrapped results.
pub fn value_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_add_then_get_returns_same_record() {
        let mut registry = ArtifactRegistry::new();
        let stored = registry
            .add_artifact("x", ArtifactSpec::new("number", json!(42), "answer"))
            .unwrap();
        let fetched = registry.get_artifact("x").unwrap();
        assert!(Arc::ptr_eq(&stored, &fetched));
        assert_eq!(registry.get_artifact_value("x"), Some(&json!(42)));
    }

    #[test]
    fn test_missing_lookups_are_none() {
        let registry = ArtifactRegistry::new();
        assert!(registry.get_artifact("nope").is_none());
        assert!(registry.get_artifact_value("nope").is_none());
    }

    #[test]
    fn test_invalid_name() {
        let mut registry = ArtifactRegistry::new();
        let err = registry
            .add_artifact("", ArtifactSpec::new("number", json!(1), "d"))
            .unwrap_err();
        assert_eq!(err, ArtifactError::InvalidName(String::new()));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_missing_type_and_description() {
        let mut registry = ArtifactRegistry::new();
        let spec = ArtifactSpec {
            value: Some(json!(1)),
            ..ArtifactSpec::default()
        };
        let err = registry.add_artifact("x", spec).unwrap_err();
        assert_eq!(
            err,
            ArtifactError::MissingFields {
                name: "x".to_string(),
                fields: vec!["type", "description"],
            }
        );

        let spec = ArtifactSpec {
            artifact_type: Some("number".to_string()),
            value: Some(json!(1)),
            description: Some("  ".to_string()),
            ..ArtifactSpec::default()
        };
        assert!(matches!(
            registry.add_artifact("x", spec),
            Err(ArtifactError::MissingFields { .. })
        ));
    }

    #[test]
    fn test_absent_value_fails_but_null_succeeds() {
        let mut registry = ArtifactRegistry::new();
        let absent = ArtifactSpec {
            artifact_type: Some("null".to_string()),
            description: Some("nothing".to_string()),
            ..ArtifactSpec::default()
        };
        assert_eq!(
            registry.add_artifact("x", absent).unwrap_err(),
            ArtifactError::MissingValue("x".to_string())
        );

        registry
            .add_artifact("x", ArtifactSpec::new("null", Value::Null, "nothing"))
            .unwrap();
        assert_eq!(registry.get_artifact_value("x"), Some(&Value::Null));
    }

    #[test]
    fn test_spec_deserialization_distinguishes_null_from_absent() {
        let with_null: ArtifactSpec =
            serde_json::from_value(json!({"type": "t", "description": "d", "value": null})).unwrap();
        assert_eq!(with_null.value, Some(Value::Null));

        let absent: ArtifactSpec = serde_json::from_value(json!({"type": "t", "description": "d"})).unwrap();
        assert_eq!(absent.value, None);
    }

    #[test]
    fn test_listing_keeps_insertion_order_on_overwrite() {
        let mut registry = ArtifactRegistry::new();
        for name in ["b", "a", "c"] {
            registry
                .add_artifact(name, ArtifactSpec::new("string", json!(name), "letter"))
                .unwrap();
        }
        registry
            .add_artifact("b", ArtifactSpec::new("string", json!("B"), "letter"))
            .unwrap();

        let names: Vec<String> = registry.list_artifacts().into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["b", "a", "c"]);
        assert_eq!(registry.get_artifact_value("b"), Some(&json!("B")));
    }

    #[test]
    fn test_branch_is_independent_both_ways() {
        let mut parent = ArtifactRegistry::new();
        parent
            .add_artifact("shared", ArtifactSpec::new("number", json!(1), "v1"))
            .unwrap();
        parent.record("user", "hello");

        let mut child = parent.branch();
        assert_eq!(child.get_artifact_value("shared"), Some(&json!(1)));
        assert_eq!(child.history().len(), 1);

        child
            .add_artifact("shared", ArtifactSpec::new("number", json!(2), "v2"))
            .unwrap();
        child
            .add_artifact("child_only", ArtifactSpec::new("number", json!(3), "c"))
            .unwrap();
        child.record("assistant", "child note");
        assert_eq!(parent.get_artifact_value("shared"), Some(&json!(1)));
        assert!(parent.get_artifact("child_only").is_none());
        assert_eq!(parent.history().len(), 1);

        parent
            .add_artifact("shared", ArtifactSpec::new("number", json!(10), "v10"))
            .unwrap();
        assert_eq!(child.get_artifact_value("shared"), Some(&json!(2)));
    }

    #[test]
    fn test_republish_renames_copy() {
        let mut child = ArtifactRegistry::new();
        let original = child
            .add_artifact("html", ArtifactSpec::new("string", json!("<p/>"), "markup"))
            .unwrap();

        let mut parent = ArtifactRegistry::new();
        let same = parent.republish("html", &original).unwrap();
        assert!(Arc::ptr_eq(&same, &original));

        let renamed = parent.republish("page", &original).unwrap();
        assert_eq!(renamed.name, "page");
        assert_eq!(renamed.value, json!("<p/>"));
    }

    #[test]
    fn test_summary_lists_artifacts() {
        let mut registry = ArtifactRegistry::new();
        assert_eq!(registry.summary(), "(no artifacts)");
        registry
            .add_artifact(
                "x",
                ArtifactSpec::new("number", json!(42), "answer").with_purpose("reuse"),
            )
            .unwrap();
        assert_eq!(registry.summary(), "- @x (number): answer [purpose: reuse]");
    }
}
