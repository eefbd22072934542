//! Error taxonomy of the execution engine.
//!
//! Every variant is converted into a failed [`ExecutionResult`] at the
//! smallest enclosing task; none of them escapes [`TaskEngine::run`].
//!
//! [`ExecutionResult`]: crate::task::ExecutionResult
//! [`TaskEngine::run`]: crate::engine::TaskEngine::run

use thiserror::Error;

use crate::artifacts::ArtifactError;
use crate::config::ConfigError;
use crate::contract::{ContractError, ContractFailure};
use crate::task::TerminalReason;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Model output for a step could not be turned into the expected shape.
    #[error("{step} failed: {source}")]
    SchemaViolation {
        step: &'static str,
        #[source]
        source: ContractFailure,
    },

    /// A declared tool call failed.
    #[error("tool call {index} ({tool}) failed: {message}")]
    ToolExecution {
        index: usize,
        tool: String,
        message: String,
    },

    #[error("unable to find suitable tools")]
    NoSuitableTools,

    #[error("tool discovery failed: {0}")]
    Discovery(String),

    #[error("max recursion depth exceeded")]
    RecursionLimit { depth: usize, max_depth: usize },

    #[error("artifact error: {0}")]
    Artifact(#[from] ArtifactError),

    /// The completion service itself failed.
    #[error("{step} failed: completion service error: {message}")]
    Completion { step: &'static str, message: String },

    #[error("task incomplete: {0}")]
    Incomplete(String),

    #[error("task cancelled")]
    Cancelled,
}

impl EngineError {
    pub fn terminal_reason(&self) -> TerminalReason {
        match self {
            EngineError::SchemaViolation { .. } => TerminalReason::SchemaViolation,
            EngineError::ToolExecution { .. } => TerminalReason::ToolFailure,
            EngineError::NoSuitableTools | EngineError::Discovery(_) => TerminalReason::NoSuitableTools,
            EngineError::RecursionLimit { .. } => TerminalReason::RecursionLimit,
            EngineError::Artifact(_) => TerminalReason::ToolFailure,
            EngineError::Completion { .. } => TerminalReason::CompletionError,
            EngineError::Incomplete(_) => TerminalReason::Incomplete,
            EngineError::Cancelled => TerminalReason::Cancelled,
        }
    }
}

/// Errors building a [`TaskEngine`](crate::engine::TaskEngine).
#[derive(Debug, Error)]
pub enum SetupError {
    #[error(transparent)]
    Contract(#[from] ContractError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}
