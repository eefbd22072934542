//! Subtask definitions produced by decomposition.
//!
//! A plan is an ordered list of subtasks. Order is execution order; the
//! engine never reorders or parallelizes them.

use serde::{Deserialize, Serialize};

/// A planned subtask before it becomes a full [`Task`](super::Task).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subtask {
    /// Description of what this subtask should accomplish
    pub description: String,

    /// Artifact name under which the subtask's result is published in the
    /// parent's registry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outputs: Option<String>,
}

impl Subtask {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            outputs: None,
        }
    }

    /// Publish this subtask's result under `name`.
    pub fn with_outputs(mut self, name: impl Into<String>) -> Self {
        self.outputs = Some(name.into());
        self
    }
}

/// A plan for splitting a task into subtasks.
///
/// # Invariants
/// - `subtasks` is non-empty
/// - every subtask has a non-blank description
/// - declared `outputs` names are non-blank
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecompositionPlan {
    subtasks: Vec<Subtask>,
}

impl DecompositionPlan {
    /// Create a new plan.
    ///
    /// # Errors
    /// Returns `Err` if the invariants above are violated.
    pub fn new(subtasks: Vec<Subtask>) -> Result<Self, DecompositionPlanError> {
        if subtasks.is_empty() {
            return Err(DecompositionPlanError::EmptySubtasks);
        }

        for (index, subtask) in subtasks.iter().enumerate() {
            if subtask.description.trim().is_empty() {
                return Err(DecompositionPlanError::EmptyDescription { index });
            }
            if let Some(outputs) = &subtask.outputs {
                if outputs.trim().is_empty() {
                    return Err(DecompositionPlanError::EmptyOutputs { index });
                }
            }
        }

        Ok(Self { subtasks })
    }

    pub fn subtasks(&self) -> &[Subtask] {
        &self.subtasks
    }

    pub fn len(&self) -> usize {
        self.subtasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subtasks.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Subtask> {
        self.subtasks.get(index)
    }

    /// Descriptions of the subtasks after `index` (exclusive).
    pub fn remaining_after(&self, index: usize) -> Vec<&str> {
        self.subtasks
            .iter()
            .skip(index + 1)
            .map(|s| s.description.as_str())
            .collect()
    }
}

/// Errors in decomposition plan creation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecompositionPlanError {
    #[error("Subtask list cannot be empty")]
    EmptySubtasks,

    #[error("Subtask {index} has an empty description")]
    EmptyDescription { index: usize },

    #[error("Subtask {index} declares an empty outputs name")]
    EmptyOutputs { index: usize },
}
