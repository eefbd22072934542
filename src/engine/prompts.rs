//! Prompt builders for the engine's model calls.
//!
//! Wording is free-form; each prompt ends with the format instructions of
//! the contract that will decode the response.

use std::fmt::Write as _;
use std::sync::Arc;

use serde_json::Value;

use crate::artifacts::ArtifactRegistry;
use crate::contract::responses::Classification;
use crate::contract::{InstructionOptions, ResponseContract};
use crate::task::{DecompositionPlan, ExecutionResult, Task};
use crate::tools::Tool;
use crate::util::truncate_chars;

/// Longest rendering of a single result value inside a prompt.
const MAX_RESULT_CHARS: usize = 2000;

/// One finished subtask as reported to the parent.
#[derive(Debug, Clone)]
pub(crate) struct SubtaskOutcome {
    pub description: String,
    pub result: ExecutionResult,
}

fn push_common(prompt: &mut String, registry: &ArtifactRegistry, guidance: Option<&str>) {
    if let Some(guidance) = guidance {
        let _ = write!(prompt, "\nGuidance: {}\n", guidance);
    }
    if !registry.is_empty() {
        let _ = write!(
            prompt,
            "\nAvailable artifacts (refer to them as @name):\n{}\n",
            registry.summary()
        );
    }
}

fn push_instructions(prompt: &mut String, contract: &ResponseContract) {
    prompt.push('\n');
    prompt.push_str(&contract.generate_instructions(&InstructionOptions::default().with_example()));
}

pub(crate) fn render_value(value: &Value) -> String {
    let text = match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    truncate_chars(&text, MAX_RESULT_CHARS)
}

fn render_outcome(outcome: &SubtaskOutcome) -> String {
    if outcome.result.success {
        format!(
            "- \"{}\": succeeded with result: {}",
            outcome.description,
            render_value(&outcome.result.result)
        )
    } else {
        format!(
            "- \"{}\": FAILED: {}",
            outcome.description, outcome.result.message
        )
    }
}

pub(crate) fn tool_decision(
    task: &Task,
    tools: &[Arc<dyn Tool>],
    registry: &ArtifactRegistry,
    guidance: Option<&str>,
    contract: &ResponseContract,
) -> String {
    let mut prompt = format!(
        "You are executing a task with the tools listed below.\n\nTask: {}\n\nAvailable tools:\n",
        task.description()
    );
    for tool in tools {
        let _ = writeln!(
            prompt,
            "- {}: {}\n  inputs schema: {}",
            tool.name(),
            tool.description(),
            tool.parameters_schema()
        );
    }
    push_common(&mut prompt, registry, guidance);
    prompt.push_str(
        "\nEither call tools (inputs may reference artifacts as \"@name\"; \"outputs\" maps \
         fields of a tool's output to new artifact names), answer directly with \"response\", \
         or, if the task needs several independent steps, split it into subtasks.\n",
    );
    push_instructions(&mut prompt, contract);
    prompt
}

pub(crate) fn decomposition(
    task: &Task,
    classification: Option<&Classification>,
    registry: &ArtifactRegistry,
    guidance: Option<&str>,
    remediation: Option<(&str, &[SubtaskOutcome])>,
    contract: &ResponseContract,
) -> String {
    let mut prompt = format!(
        "You are planning the execution of a task. Split it into an ordered list of subtasks. \
         Subtasks run one after another; give a subtask an \"outputs\" name when later subtasks \
         need its result (they can refer to it as @name).\n\nTask: {}\n",
        task.description()
    );
    if let Some(classification) = classification {
        let _ = write!(prompt, "\nAnalysis: {}\n", classification.reasoning);
        if let Some(approach) = &classification.suggested_approach {
            let _ = writeln!(prompt, "Suggested approach: {}", approach);
        }
    }
    if let Some((reason, outcomes)) = remediation {
        let _ = write!(
            prompt,
            "\nA previous attempt did not finish the task. Evaluator's reason: {}\n",
            reason
        );
        if !outcomes.is_empty() {
            prompt.push_str("Subtasks already run:\n");
            for outcome in outcomes {
                let _ = writeln!(prompt, "{}", render_outcome(outcome));
            }
        }
        prompt.push_str("Plan only the remaining work.\n");
    }
    push_common(&mut prompt, registry, guidance);
    push_instructions(&mut prompt, contract);
    prompt
}

pub(crate) fn parent_evaluation(
    task: &Task,
    finished: &SubtaskOutcome,
    plan: &DecompositionPlan,
    next: usize,
    note: Option<&str>,
    contract: &ResponseContract,
) -> String {
    let mut prompt = format!(
        "You are supervising the task: {}\n\nA subtask just finished:\n{}\n",
        task.description(),
        render_outcome(finished)
    );
    let remaining = plan.remaining_after(next.saturating_sub(1));
    if remaining.is_empty() {
        prompt.push_str("\nNo subtasks remain in the plan.\n");
    } else {
        prompt.push_str("\nRemaining subtasks:\n");
        for description in remaining {
            let _ = writeln!(prompt, "- {}", description);
        }
    }
    if let Some(note) = note {
        let _ = write!(prompt, "\nNote: {}\n", note);
    }
    prompt.push_str(
        "\nAnswer CONTINUE to run the next subtask, or COMPLETE if the task is already \
         accomplished (or cannot be helped by the remaining subtasks).\n",
    );
    push_instructions(&mut prompt, contract);
    prompt
}

pub(crate) fn completion_evaluation(
    task: &Task,
    outcomes: &[SubtaskOutcome],
    registry: &ArtifactRegistry,
    history_chars: usize,
    contract: &ResponseContract,
) -> String {
    let mut prompt = format!(
        "Decide whether the following task has been fully accomplished and state its final result.\n\nTask: {}\n\nSubtask outcomes:\n",
        task.description()
    );
    for outcome in outcomes {
        let _ = writeln!(prompt, "{}", render_outcome(outcome));
    }
    let history = registry.history_context(history_chars);
    if !history.is_empty() {
        let _ = write!(prompt, "\nConversation history:\n{}", history);
    }
    push_common(&mut prompt, registry, None);
    push_instructions(&mut prompt, contract);
    prompt
}
