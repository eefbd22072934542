//! The response shapes the engine asks the model for, as schemas and as
//! typed values.
//!
//! Every schema here has a matching sum type or struct. Conversion happens
//! only after the contract has validated the data, so the `from_validated`
//! functions mostly guard against shapes a schema cannot express.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::task::{DecompositionPlan, Subtask};

use super::{ContractError, ResponseContract};

/// Contract for task classification.
pub fn classification_contract() -> Result<ResponseContract, ContractError> {
    ResponseContract::new("classification", classification_schema())
}

pub fn decomposition_contract() -> Result<ResponseContract, ContractError> {
    ResponseContract::new("decomposition", decomposition_schema())
}

pub fn simple_decision_contract() -> Result<ResponseContract, ContractError> {
    ResponseContract::new("simple_decision", simple_decision_schema())
}

pub fn parent_evaluation_contract() -> Result<ResponseContract, ContractError> {
    ResponseContract::new("parent_evaluation", parent_evaluation_schema())
}

pub fn completion_evaluation_contract() -> Result<ResponseContract, ContractError> {
    ResponseContract::new("completion_evaluation", completion_evaluation_schema())
}

pub fn classification_schema() -> Value {
    json!({
        "type": "object",
        "required": ["complexity", "reasoning"],
        "properties": {
            "complexity": {
                "type": "string",
                "enum": ["SIMPLE", "COMPLEX"],
                "description": "SIMPLE if a few tool calls or a direct answer suffice, COMPLEX if the task needs to be split into subtasks"
            },
            "reasoning": {"type": "string", "description": "Why this complexity was chosen"},
            "suggestedApproach": {"type": "string"},
            "estimatedSteps": {"type": "number", "minimum": 0}
        }
    })
}

fn subtasks_schema() -> Value {
    json!({
        "type": "array",
        "minItems": 1,
        "items": {
            "type": "object",
            "required": ["description"],
            "properties": {
                "description": {"type": "string", "minLength": 1},
                "outputs": {
                    "type": "string",
                    "minLength": 1,
                    "description": "Artifact name under which the subtask result is published"
                }
            }
        }
    })
}

pub fn decomposition_schema() -> Value {
    json!({
        "type": "object",
        "required": ["decompose", "subtasks"],
        "properties": {
            "decompose": {"const": true},
            "subtasks": subtasks_schema()
        }
    })
}

pub fn simple_decision_schema() -> Value {
    json!({
        "anyOf": [
            {
                "type": "object",
                "required": ["useTools", "toolCalls"],
                "properties": {
                    "useTools": {"const": true},
                    "toolCalls": {
                        "type": "array",
                        "minItems": 1,
                        "items": {
                            "type": "object",
                            "required": ["tool", "inputs"],
                            "properties": {
                                "tool": {"type": "string", "description": "Name of one of the available tools"},
                                "inputs": {
                                    "type": "object",
                                    "description": "Tool arguments; \"@name\" refers to a stored artifact"
                                },
                                "outputs": {
                                    "type": "object",
                                    "additionalProperties": {"type": "string"},
                                    "description": "Maps tool output fields to new artifact names"
                                }
                            }
                        }
                    }
                }
            },
            {
                "type": "object",
                "required": ["decompose", "subtasks"],
                "properties": {
                    "decompose": {"const": true},
                    "subtasks": subtasks_schema()
                }
            },
            {
                "type": "object",
                "required": ["response"],
                "properties": {
                    "response": {"type": "string", "description": "Direct answer to the task"}
                }
            }
        ]
    })
}

pub fn parent_evaluation_schema() -> Value {
    json!({
        "type": "object",
        "required": ["decision", "reasoning"],
        "properties": {
            "decision": {
                "type": "string",
                "enum": ["CONTINUE", "COMPLETE"],
                "description": "CONTINUE to run the next subtask, COMPLETE to stop and evaluate the task"
            },
            "reasoning": {"type": "string"}
        }
    })
}

pub fn completion_evaluation_schema() -> Value {
    json!({
        "type": "object",
        "required": ["complete", "reason"],
        "properties": {
            "complete": {"type": "boolean", "description": "Whether the task has been fully accomplished"},
            "result": {"description": "The final result of the task"},
            "reason": {"type": "string"}
        }
    })
}

/// How a task should be executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Complexity {
    Simple,
    Complex,
}

impl std::fmt::Display for Complexity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Complexity::Simple => write!(f, "SIMPLE"),
            Complexity::Complex => write!(f, "COMPLEX"),
        }
    }
}

/// Label attached to a task before execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Classification {
    pub complexity: Complexity,
    pub reasoning: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggested_approach: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_steps: Option<u32>,
}

impl Classification {
    /// The fallback label used whenever classification cannot be trusted.
    pub fn fallback(diagnostic: impl std::fmt::Display) -> Self {
        Self {
            complexity: Complexity::Complex,
            reasoning: format!("Classification error: {}", diagnostic),
            suggested_approach: None,
            estimated_steps: None,
        }
    }

    pub fn from_validated(value: Value) -> Result<Self, String> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Raw {
            complexity: Complexity,
            reasoning: String,
            #[serde(default)]
            suggested_approach: Option<String>,
            #[serde(default)]
            estimated_steps: Option<f64>,
        }

        let raw: Raw = serde_json::from_value(value).map_err(|e| e.to_string())?;
        Ok(Self {
            complexity: raw.complexity,
            reasoning: raw.reasoning,
            suggested_approach: raw.suggested_approach.filter(|s| !s.is_empty()),
            estimated_steps: raw.estimated_steps.map(|n| n.round().clamp(0.0, u32::MAX as f64) as u32),
        })
    }
}

#[derive(Deserialize)]
struct RawSubtask {
    description: String,
    #[serde(default)]
    outputs: Option<String>,
}

fn plan_from_raw(subtasks: Vec<RawSubtask>) -> Result<DecompositionPlan, String> {
    let subtasks = subtasks
        .into_iter()
        .map(|s| Subtask {
            description: s.description,
            outputs: s.outputs,
        })
        .collect();
    DecompositionPlan::new(subtasks).map_err(|e| e.to_string())
}

/// Decode a validated decomposition response into a plan.
pub fn plan_from_validated(value: Value) -> Result<DecompositionPlan, String> {
    #[derive(Deserialize)]
    struct Raw {
        subtasks: Vec<RawSubtask>,
    }
    let raw: Raw = serde_json::from_value(value).map_err(|e| e.to_string())?;
    plan_from_raw(raw.subtasks)
}

/// One tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallPlan {
    pub tool: String,
    #[serde(default = "empty_object")]
    pub inputs: Value,
    /// Output field to artifact name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outputs: Option<BTreeMap<String, String>>,
}

fn empty_object() -> Value {
    Value::Object(Default::default())
}

/// The model's decision for a SIMPLE task.
#[derive(Debug, Clone, PartialEq)]
pub enum SimpleDecision {
    UseTools { tool_calls: Vec<ToolCallPlan> },
    /// The model judged the task too large after all.
    Decompose { plan: DecompositionPlan },
    Respond { response: String },
}

impl SimpleDecision {
    pub fn from_validated(value: Value) -> Result<Self, String> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Raw {
            #[serde(default)]
            use_tools: Option<bool>,
            #[serde(default)]
            tool_calls: Option<Vec<ToolCallPlan>>,
            #[serde(default)]
            decompose: Option<bool>,
            #[serde(default)]
            subtasks: Option<Vec<RawSubtask>>,
            #[serde(default)]
            response: Option<String>,
        }

        let raw: Raw = serde_json::from_value(value).map_err(|e| e.to_string())?;
        match raw {
            Raw {
                use_tools: Some(true),
                tool_calls: Some(tool_calls),
                ..
            } if !tool_calls.is_empty() => Ok(SimpleDecision::UseTools { tool_calls }),
            Raw {
                decompose: Some(true),
                subtasks: Some(subtasks),
                ..
            } => Ok(SimpleDecision::Decompose {
                plan: plan_from_raw(subtasks)?,
            }),
            Raw {
                response: Some(response),
                ..
            } => Ok(SimpleDecision::Respond { response }),
            _ => Err("response matches none of useTools, decompose or response".to_string()),
        }
    }
}

/// Whether a parent keeps running its plan after a child finishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EvaluationDecision {
    Continue,
    Complete,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParentDecision {
    pub decision: EvaluationDecision,
    pub reasoning: String,
}

impl ParentDecision {
    pub fn from_validated(value: Value) -> Result<Self, String> {
        serde_json::from_value(value).map_err(|e| e.to_string())
    }
}

/// Final verdict on a COMPLEX task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionEvaluation {
    pub complete: bool,
    #[serde(default)]
    pub result: Value,
    pub reason: String,
}

impl CompletionEvaluation {
    pub fn from_validated(value: Value) -> Result<Self, String> {
        serde_json::from_value(value).map_err(|e| e.to_string())
    }
}
