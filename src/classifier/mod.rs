//! Task classification.
//!
//! Labels a task SIMPLE or COMPLEX before the engine executes it.
//!
//! # Algorithm
//! 1. Build a prompt from the task description, an optional artifact summary
//!    and the classification contract's format instructions
//! 2. Send it to the completion service
//! 3. Run the response through the contract
//!
//! Any failure degrades to COMPLEX: decomposing a simple task still
//! terminates, while treating a complex task as simple under-delivers.

use std::sync::Arc;

use futures::future::join_all;

use crate::artifacts::ArtifactRegistry;
use crate::contract::responses::{classification_contract, Classification};
use crate::contract::{ContractError, ContractFailure, InstructionOptions, ResponseContract};
use crate::llm::CompletionService;
use crate::task::Task;

/// Where a classification attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassifierState {
    Prompting,
    ParsedValid,
    ParsedInvalid,
    CallFailed,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum ClassificationError {
    /// The completion service returned an error.
    #[error("{0}")]
    CallFailed(String),

    /// The response was undecodable or violated the schema.
    #[error("{0}")]
    ParsedInvalid(#[from] ContractFailure),
}

impl ClassificationError {
    pub fn state(&self) -> ClassifierState {
        match self {
            ClassificationError::CallFailed(_) => ClassifierState::CallFailed,
            ClassificationError::ParsedInvalid(_) => ClassifierState::ParsedInvalid,
        }
    }
}

pub struct TaskClassifier {
    completion: Arc<dyn CompletionService>,
    contract: ResponseContract,
}

impl TaskClassifier {
    pub fn new(completion: Arc<dyn CompletionService>) -> Result<Self, ContractError> {
        Ok(Self {
            completion,
            contract: classification_contract()?,
        })
    }

    fn build_prompt(&self, task: &Task, artifacts: Option<&ArtifactRegistry>) -> String {
        let mut prompt = format!(
            "You are a task complexity analyzer. Decide how the following task should be executed.\n\n\
             Task: {}\n\n\
             SIMPLE: the task can be done with a short sequence of tool calls or answered directly.\n\
             COMPLEX: the task must be split into ordered subtasks.\n",
            task.description()
        );

        if let Some(registry) = artifacts.filter(|r| !r.is_empty()) {
            prompt.push_str("\nAvailable artifacts (refer to them as @name):\n");
            prompt.push_str(&registry.summary());
            prompt.push('\n');
        }

        prompt.push('\n');
        prompt.push_str(&self.contract.generate_instructions(&InstructionOptions::default()));
        prompt
    }

    /// Classify a task, reporting why classification failed.
    pub async fn try_classify(
        &self,
        task: &Task,
        artifacts: Option<&ArtifactRegistry>,
    ) -> Result<Classification, ClassificationError> {
        let prompt = self.build_prompt(task, artifacts);
        tracing::debug!(task_id = %task.id(), state = ?ClassifierState::Prompting, "Classifying task");

        let raw = self
            .completion
            .complete(&prompt)
            .await
            .map_err(|e| ClassificationError::CallFailed(e.to_string()))?;

        let classification = self
            .contract
            .process_as(&raw, Classification::from_validated)?;

        tracing::debug!(
            task_id = %task.id(),
            state = ?ClassifierState::ParsedValid,
            complexity = %classification.complexity,
            "Task classified"
        );
        Ok(classification)
    }

    /// Classify a task. Never fails: errors yield a COMPLEX fallback whose
    /// reasoning starts with "Classification error: ".
    pub async fn classify(&self, task: &Task, artifacts: Option<&ArtifactRegistry>) -> Classification {
        match self.try_classify(task, artifacts).await {
            Ok(classification) => classification,
            Err(e) => {
                tracing::warn!(
                    task_id = %task.id(),
                    state = ?e.state(),
                    error = %e,
                    "Classification failed, defaulting to COMPLEX"
                );
                Classification::fallback(e)
            }
        }
    }

    /// Classify several tasks independently; one failure does not affect the
    /// others. Results are in input order.
    pub async fn classify_batch(&self, tasks: &[Task]) -> Vec<Result<Classification, ClassificationError>> {
        join_all(tasks.iter().map(|task| self.try_classify(task, None))).await
    }
}
