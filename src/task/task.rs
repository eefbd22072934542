//! Core Task type tracked by the engine while a description is being processed.
//!
//! # Invariants
//! - `id` is unique within a task tree execution
//! - `depth == 0` iff `parent_id.is_none()`
//! - `result` is only set once the task reached a terminal status

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Unique identifier for a task.
///
/// # Properties
/// - Globally unique within an execution context
/// - Immutable once created
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId(Uuid);

impl TaskId {
    /// Create a new unique task ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the inner UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Status of a task in its lifecycle.
///
/// # State Machine
/// ```text
/// Pending -> Running -> Succeeded
///                   \-> Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl TaskStatus {
    /// `true` if the task is Succeeded or Failed.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Succeeded | TaskStatus::Failed)
    }
}

/// A unit of work: one natural-language description at a given tree depth.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    id: TaskId,
    description: String,
    depth: usize,
    parent_id: Option<TaskId>,
    status: TaskStatus,
    result: Option<Value>,
}

impl Task {
    /// Create a top-level task (depth 0, no parent).
    ///
    /// # Errors
    /// Returns `Err` if `description` is blank.
    pub fn new(description: impl Into<String>) -> Result<Self, TaskError> {
        let description = description.into();
        if description.trim().is_empty() {
            return Err(TaskError::EmptyDescription);
        }

        Ok(Self {
            id: TaskId::new(),
            description,
            depth: 0,
            parent_id: None,
            status: TaskStatus::Pending,
            result: None,
        })
    }

    /// Create a subtask one level below `parent`.
    pub fn new_subtask(description: impl Into<String>, parent: &Task) -> Result<Self, TaskError> {
        let mut task = Self::new(description)?;
        task.depth = parent.depth + 1;
        task.parent_id = Some(parent.id);
        Ok(task)
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn parent_id(&self) -> Option<TaskId> {
        self.parent_id
    }

    pub fn status(&self) -> TaskStatus {
        self.status
    }

    pub fn result(&self) -> Option<&Value> {
        self.result.as_ref()
    }

    /// Check if this task is a subtask (has a parent).
    pub fn is_subtask(&self) -> bool {
        self.parent_id.is_some()
    }

    /// Transition the task to Running state.
    ///
    /// # Errors
    /// Returns `Err` if the task is not Pending.
    pub fn start(&mut self) -> Result<(), TaskError> {
        match self.status {
            TaskStatus::Pending => {
                self.status = TaskStatus::Running;
                Ok(())
            }
            other => Err(TaskError::InvalidTransition {
                from: other,
                to: TaskStatus::Running,
            }),
        }
    }

    /// Transition the task to Succeeded and record its result.
    pub fn succeed(&mut self, result: Value) -> Result<(), TaskError> {
        self.finish(TaskStatus::Succeeded, result)
    }

    /// Transition the task to Failed and record the failure explanation.
    pub fn fail(&mut self, result: Value) -> Result<(), TaskError> {
        self.finish(TaskStatus::Failed, result)
    }

    fn finish(&mut self, to: TaskStatus, result: Value) -> Result<(), TaskError> {
        match self.status {
            TaskStatus::Running => {
                self.status = to;
                self.result = Some(result);
                Ok(())
            }
            other => Err(TaskError::InvalidTransition { from: other, to }),
        }
    }
}

/// Errors that can occur during task operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TaskError {
    #[error("Task description cannot be empty")]
    EmptyDescription,

    #[error("Invalid state transition from {from:?} to {to:?}")]
    InvalidTransition { from: TaskStatus, to: TaskStatus },
}
