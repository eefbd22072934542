//! `@name` reference substitution inside strings and structured inputs.

use std::sync::LazyLock;

use regex::{Captures, Regex};
use serde_json::Value;

use super::ArtifactRegistry;

/// `@name` preceded by start-of-string or a non-word character, so that
/// addresses like `user@example.com` are not treated as references.
static REFERENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(^|[^A-Za-z0-9_])@([A-Za-z0-9_-]+)").expect("reference pattern is valid")
});

static WHOLE_REFERENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^@([A-Za-z0-9_-]+)$").expect("reference pattern is valid"));

/// Replace every resolvable `@name` token in `input`.
///
/// - A string that is exactly `@name` becomes the stored value, keeping its type.
/// - A token embedded in longer text is spliced in as text.
/// - Unresolved tokens are left unchanged.
pub(crate) fn resolve(registry: &ArtifactRegistry, input: &Value) -> Value {
    match input {
        Value::String(s) => resolve_str(registry, s),
        Value::Array(items) => Value::Array(items.iter().map(|v| resolve(registry, v)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), resolve(registry, v)))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn resolve_str(registry: &ArtifactRegistry, s: &str) -> Value {
    if let Some(caps) = WHOLE_REFERENCE.captures(s) {
        if let Some(value) = registry.get_artifact_value(&caps[1]) {
            return value.clone();
        }
        return Value::String(s.to_string());
    }

    let replaced = REFERENCE.replace_all(s, |caps: &Captures| {
        match registry.get_artifact_value(&caps[2]) {
            Some(value) => format!("{}{}", &caps[1], render(value)),
            None => caps[0].to_string(),
        }
    });
    Value::String(replaced.into_owned())
}

fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Whether `name` can be written as an `@name` token.
pub(crate) fn is_referenceable(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Names referenced in `input` that have no stored artifact, in order of
/// first appearance.
pub(crate) fn unresolved(registry: &ArtifactRegistry, input: &Value) -> Vec<String> {
    let mut names = Vec::new();
    collect_unresolved(registry, input, &mut names);
    names
}

fn collect_unresolved(registry: &ArtifactRegistry, input: &Value, out: &mut Vec<String>) {
    match input {
        Value::String(s) => {
            for caps in REFERENCE.captures_iter(s) {
                let name = &caps[2];
                if registry.get_artifact(name).is_none() && !out.iter().any(|n| n == name) {
                    out.push(name.to_string());
                }
            }
        }
        Value::Array(items) => items.iter().for_each(|v| collect_unresolved(registry, v, out)),
        Value::Object(map) => map.values().for_each(|v| collect_unresolved(registry, v, out)),
        _ => {}
    }
}
