//! Terminal values handed from a task back to its parent or to the caller.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::artifacts::Artifact;

/// Result of executing a task.
///
/// # Invariants
/// - If `success == true`, the task reached a completed state
/// - If `success == false`, `result` and `message` hold a human-readable explanation
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    /// Whether the task was successful
    pub success: bool,

    /// The task's result value (or failure explanation)
    pub result: Value,

    /// Human-readable summary
    pub message: String,

    /// Artifacts published while executing this task
    pub artifacts: Option<BTreeMap<String, Arc<Artifact>>>,

    /// Diagnostic data (per tool-call results, evaluator reasoning, ...)
    pub data: Option<Value>,

    /// Reason why execution terminated
    pub terminal_reason: TerminalReason,
}

impl ExecutionResult {
    /// Create a successful result.
    pub fn success(result: Value, message: impl Into<String>) -> Self {
        Self {
            success: true,
            result,
            message: message.into(),
            artifacts: None,
            data: None,
            terminal_reason: TerminalReason::Completed,
        }
    }

    /// Create a failure result; the explanation doubles as the result value.
    pub fn failure(reason: TerminalReason, explanation: impl Into<String>) -> Self {
        let explanation = explanation.into();
        Self {
            success: false,
            result: Value::String(explanation.clone()),
            message: explanation,
            artifacts: None,
            data: None,
            terminal_reason: reason,
        }
    }

    /// Attach published artifacts (omitted when empty).
    pub fn with_artifacts(mut self, artifacts: Vec<Arc<Artifact>>) -> Self {
        if !artifacts.is_empty() {
            self.artifacts = Some(
                artifacts
                    .into_iter()
                    .map(|a| (a.name.clone(), a))
                    .collect(),
            );
        }
        self
    }

    /// Add diagnostic data to the result.
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Whether ancestors must stop without evaluating this outcome.
    pub fn is_fatal(&self) -> bool {
        self.terminal_reason.is_fatal()
    }
}

/// Reason why task execution terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalReason {
    /// Task completed successfully
    Completed,
    /// Cancellation was observed at a task boundary
    Cancelled,
    /// Depth exceeded the configured maximum
    RecursionLimit,
    /// Tool discovery returned nothing usable
    NoSuitableTools,
    /// A declared tool call failed
    ToolFailure,
    /// Model output did not satisfy the expected schema
    SchemaViolation,
    /// The completion service returned an error
    CompletionError,
    /// Completion evaluation judged the task incomplete
    Incomplete,
    /// The task description was rejected before execution
    InvalidTask,
}

impl TerminalReason {
    /// Fatal reasons terminate the whole branch: ancestors do not run parent
    /// evaluation for them and fail with the same explanation.
    pub fn is_fatal(&self) -> bool {
        matches!(self, TerminalReason::RecursionLimit | TerminalReason::Cancelled)
    }
}

/// Outcome of one declared tool call on the SIMPLE path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub tool: String,
    /// Inputs after reference resolution
    pub inputs: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_failure_explanation_is_result() {
        let r = ExecutionResult::failure(TerminalReason::NoSuitableTools, "unable to find suitable tools");
        assert!(!r.success);
        assert_eq!(r.result, json!("unable to find suitable tools"));
        assert_eq!(r.message, "unable to find suitable tools");
    }

    #[test]
    fn test_fatal_reasons() {
        assert!(TerminalReason::RecursionLimit.is_fatal());
        assert!(TerminalReason::Cancelled.is_fatal());
        assert!(!TerminalReason::ToolFailure.is_fatal());
    }

    #[test]
    fn test_empty_artifacts_omitted() {
        let r = ExecutionResult::success(json!(1), "ok").with_artifacts(vec![]);
        assert!(r.artifacts.is_none());
    }
}
