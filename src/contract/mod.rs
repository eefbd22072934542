//! Structured-response contract: schema-validated, auto-repaired parsing of
//! model output.
//!
//! # Pipeline
//! ```text
//! raw text ──decode──▶ JSON ──validate──▶ Valid(data)
//!             │                 │
//!             ▼                 ▼ (invalid)
//!       Unparseable      repair once ──validate──▶ Valid(data) | SchemaViolation
//! ```
//! Undecodable text is never repaired. A schema violation gets exactly one
//! mechanical repair pass before it is reported.

mod instructions;
mod repair;
pub mod responses;

use jsonschema::Validator;
use serde_json::Value;

pub use instructions::InstructionOptions;

/// Outcome of [`ResponseContract::validate`].
#[derive(Debug, Clone, PartialEq)]
pub enum Validation {
    /// The candidate satisfies the schema.
    Valid(Value),
    /// Human-readable schema violations (never empty).
    Invalid(Vec<String>),
}

impl Validation {
    pub fn is_valid(&self) -> bool {
        matches!(self, Validation::Valid(_))
    }
}

/// Why model output could not be turned into structured data.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ContractFailure {
    #[error("could not parse model output")]
    Unparseable { preview: String },

    #[error("model output does not match the {contract} schema: {}", violations.join("; "))]
    SchemaViolation {
        contract: String,
        violations: Vec<String>,
    },

    /// The output validated but could not be mapped onto the typed response.
    #[error("model output for {contract} is inconsistent: {reason}")]
    Inconsistent { contract: String, reason: String },
}

/// Errors building a contract.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ContractError {
    #[error("Invalid schema for contract '{name}': {message}")]
    InvalidSchema { name: String, message: String },
}

/// A JSON Schema plus the machinery to turn model text into data matching it.
pub struct ResponseContract {
    name: String,
    schema: Value,
    validator: Validator,
}

impl std::fmt::Debug for ResponseContract {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseContract")
            .field("name", &self.name)
            .field("schema", &self.schema)
            .finish()
    }
}

impl ResponseContract {
    /// Compile `schema` into a contract.
    ///
    /// # Errors
    /// Returns `Err` if `schema` is not a valid JSON Schema.
    pub fn new(name: impl Into<String>, schema: Value) -> Result<Self, ContractError> {
        let name = name.into();
        let validator = jsonschema::validator_for(&schema).map_err(|e| ContractError::InvalidSchema {
            name: name.clone(),
            message: e.to_string(),
        })?;
        Ok(Self {
            name,
            schema,
            validator,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema(&self) -> &Value {
        &self.schema
    }

    /// Check `candidate` against the schema. Never fails.
    pub fn validate(&self, candidate: &Value) -> Validation {
        let violations: Vec<String> = self
            .validator
            .iter_errors(candidate)
            .map(|e| e.to_string())
            .collect();
        if violations.is_empty() {
            Validation::Valid(candidate.clone())
        } else {
            Validation::Invalid(violations)
        }
    }

    /// Decode, validate and (once) repair raw model output.
    pub fn process(&self, raw: &str) -> Result<Value, ContractFailure> {
        let Some(decoded) = decode(raw) else {
            tracing::warn!(contract = %self.name, "could not parse model output");
            return Err(ContractFailure::Unparseable {
                preview: crate::util::truncate_chars(raw.trim(), 200),
            });
        };

        let violations = match self.validate(&decoded) {
            Validation::Valid(data) => return Ok(data),
            Validation::Invalid(violations) => violations,
        };

        tracing::debug!(
            contract = %self.name,
            violations = ?violations,
            "model output invalid, attempting repair"
        );

        for candidate in repair::candidates(&decoded, &self.schema) {
            if let Validation::Valid(data) = self.validate(&candidate) {
                tracing::warn!(contract = %self.name, "model output repaired");
                return Ok(data);
            }
        }

        Err(ContractFailure::SchemaViolation {
            contract: self.name.clone(),
            violations,
        })
    }

    /// Process raw output and map it onto a typed response.
    pub fn process_as<T, F>(&self, raw: &str, convert: F) -> Result<T, ContractFailure>
    where
        F: FnOnce(Value) -> Result<T, String>,
    {
        let data = self.process(raw)?;
        convert(data).map_err(|reason| ContractFailure::Inconsistent {
            contract: self.name.clone(),
            reason,
        })
    }

    /// Natural-language description of the expected structure.
    ///
    /// Deterministic for a given schema and options.
    pub fn generate_instructions(&self, options: &InstructionOptions) -> String {
        instructions::generate(&self.schema, options)
    }
}

/// Decode model text into JSON.
///
/// Accepts bare JSON, JSON wrapped in a markdown code fence, or JSON embedded
/// in prose (outermost `{...}` span).
fn decode(raw: &str) -> Option<Value> {
    let cleaned = strip_markdown_code_blocks(raw);
    if let Ok(value) = serde_json::from_str::<Value>(cleaned) {
        return Some(value);
    }

    let start = cleaned.find('{')?;
    let end = cleaned.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str::<Value>(&cleaned[start..=end]).ok()
}

/// Many models wrap JSON in ```json fences even when told not to.
fn strip_markdown_code_blocks(output: &str) -> &str {
    let trimmed = output.trim();
    if !(trimmed.starts_with("```") && trimmed.ends_with("```") && trimmed.len() >= 6) {
        return trimmed;
    }
    let start = trimmed.find('\n').map(|pos| pos + 1).unwrap_or(3);
    let end = trimmed.rfind("\n```").unwrap_or(trimmed.len() - 3);
    if end <= start {
        return trimmed;
    }
    trimmed[start..end].trim()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn contract() -> ResponseContract {
        ResponseContract::new(
            "evaluation",
            json!({
                "type": "object",
                "required": ["decision", "reasoning"],
                "properties": {
                    "decision": {"type": "string", "enum": ["CONTINUE", "COMPLETE"]},
                    "reasoning": {"type": "string"}
                }
            }),
        )
        .unwrap()
    }

    #[test]
    fn test_invalid_schema_rejected() {
        let err = ResponseContract::new("bad", json!({"type": 12})).unwrap_err();
        assert!(err.to_string().contains("bad"));
    }

    #[test]
    fn test_validate_reports_violations() {
        match contract().validate(&json!({"decision": "MAYBE"})) {
            Validation::Invalid(violations) => assert!(violations.len() >= 2),
            Validation::Valid(_) => panic!("expected violations"),
        }
        assert!(contract()
            .validate(&json!({"decision": "COMPLETE", "reasoning": "done"}))
            .is_valid());
    }

    #[test]
    fn test_process_plain_json() {
        let data = contract()
            .process(r#"{"decision": "CONTINUE", "reasoning": "more to do"}"#)
            .unwrap();
        assert_eq!(data["decision"], "CONTINUE");
    }

    #[test]
    fn test_process_strips_fences_and_prose() {
        let fenced = "```json\n{\"decision\": \"COMPLETE\", \"reasoning\": \"ok\"}\n```";
        assert_eq!(contract().process(fenced).unwrap()["decision"], "COMPLETE");

        let prose = "Sure! Here you go: {\"decision\": \"COMPLETE\", \"reasoning\": \"ok\"} Hope it helps.";
        assert_eq!(contract().process(prose).unwrap()["decision"], "COMPLETE");
    }

    #[test]
    fn test_process_unparseable_is_not_repaired() {
        let err = contract().process("I think we should continue.").unwrap_err();
        assert!(matches!(err, ContractFailure::Unparseable { .. }));
        assert_eq!(err.to_string(), "could not parse model output");
    }

    #[test]
    fn test_process_repairs_near_misses() {
        let data = contract()
            .process(r#"{"Decision": " complete ", "reasoning": "  all subtasks done "}"#)
            .unwrap();
        assert_eq!(data, json!({"decision": "COMPLETE", "reasoning": "all subtasks done"}));
    }

    #[test]
    fn test_process_reports_unrepairable() {
        let err = contract().process(r#"{"decision": "PAUSE"}"#).unwrap_err();
        match err {
            ContractFailure::SchemaViolation { contract, violations } => {
                assert_eq!(contract, "evaluation");
                assert!(!violations.is_empty());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_process_as_maps_conversion_errors() {
        let err = contract()
            .process_as(r#"{"decision": "CONTINUE", "reasoning": "x"}"#, |_| {
                Err::<(), _>("nope".to_string())
            })
            .unwrap_err();
        assert!(matches!(err, ContractFailure::Inconsistent { .. }));
    }
}
