//! The execution control loop.
//!
//! # Per-task state machine
//! ```text
//! ENTER ─┬─ cancelled / depth > max_depth ──────────────▶ FAIL (fatal)
//!        ├─ SIMPLE ─▶ discover tools ─▶ decision ─┬─ tool calls ─▶ DONE
//!        │                                        ├─ response ───▶ DONE
//!        │                                        └─ subtasks ──┐
//!        └─ COMPLEX ─▶ decomposition plan ──────────────────────┤
//!                                                               ▼
//!      ┌──────────── child task (depth + 1, branched registry) ◀┘
//!      ▼
//!   parent evaluation ─ CONTINUE ─▶ next child
//!      │ COMPLETE / plan exhausted
//!      ▼
//!   completion evaluation ─ complete ─▶ DONE
//!      │ incomplete
//!      └─▶ remediation plan (bounded by `corrective_cycles`) or FAIL
//! ```
//!
//! The tree is walked with an explicit stack of [`Frame`]s rather than
//! recursive calls. The top frame is the task currently executing; pushing a
//! frame starts a child, popping one hands its result to the frame below.
//!
//! Fatal outcomes (recursion limit, cancellation) are propagated up the
//! stack without running any further evaluation.

mod prompts;

use std::sync::Arc;

use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use crate::artifacts::{value_type_name, Artifact, ArtifactRegistry, ArtifactSpec};
use crate::classifier::TaskClassifier;
use crate::config::EngineConfig;
use crate::contract::responses::{
    completion_evaluation_contract, decomposition_contract, parent_evaluation_contract,
    plan_from_validated, simple_decision_contract, Classification, CompletionEvaluation,
    Complexity, EvaluationDecision, ParentDecision, SimpleDecision, ToolCallPlan,
};
use crate::contract::ResponseContract;
use crate::error::{EngineError, SetupError};
use crate::llm::CompletionService;
use crate::strategy::{ChildMessage, ParentMessage, Strategy, StrategyRegistry};
use crate::task::{DecompositionPlan, ExecutionResult, Task, TerminalReason, ToolCallRecord};
use crate::tools::{Tool, ToolDiscovery};

use prompts::SubtaskOutcome;

const COMPLETED_MESSAGE: &str = "Task completed";

/// Runs tasks against a completion service and a tool discovery service.
///
/// Independent calls to [`run`](Self::run) share no mutable state and may
/// run concurrently.
pub struct TaskEngine {
    completion: Arc<dyn CompletionService>,
    tools: Arc<dyn ToolDiscovery>,
    classifier: TaskClassifier,
    strategies: StrategyRegistry,
    decomposition: ResponseContract,
    simple_decision: ResponseContract,
    parent_evaluation: ResponseContract,
    completion_evaluation: ResponseContract,
    config: EngineConfig,
}

/// One task on the execution stack.
struct Frame {
    task: Task,
    registry: ArtifactRegistry,
    strategy: Arc<dyn Strategy>,
    /// Cancellation of the run this frame belongs to
    cancel: CancellationToken,
    /// Strategy guidance received with the task from its parent
    guidance: Option<String>,
    /// Name under which the parent wants this task's result published
    outputs: Option<String>,
    /// Artifacts this task published into its own registry
    published: Vec<Arc<Artifact>>,
    /// Set while children of this task are running
    progress: Option<Progress>,
}

/// Where a COMPLEX task stands in its plan.
struct Progress {
    plan: DecompositionPlan,
    /// Index of the next subtask to dispatch
    next: usize,
    outcomes: Vec<SubtaskOutcome>,
    corrections_used: usize,
}

/// A finished child, handed to the frame below it.
struct Returned {
    description: String,
    outputs: Option<String>,
    registry: ArtifactRegistry,
    result: ExecutionResult,
}

enum Step {
    Push(Frame),
    Finish(ExecutionResult),
}

enum SimpleOutcome {
    Done(ExecutionResult),
    Decompose(DecompositionPlan),
}

impl Frame {
    fn new(
        task: Task,
        registry: ArtifactRegistry,
        strategy: Arc<dyn Strategy>,
        cancel: CancellationToken,
        guidance: Option<String>,
        outputs: Option<String>,
    ) -> Self {
        Self {
            task,
            registry,
            strategy,
            cancel,
            guidance,
            outputs,
            published: Vec::new(),
            progress: None,
        }
    }
}

impl TaskEngine {
    /// Build an engine around its two collaborators.
    ///
    /// # Errors
    /// Returns `Err` if `config` is invalid.
    pub fn new(
        completion: Arc<dyn CompletionService>,
        tools: Arc<dyn ToolDiscovery>,
        config: EngineConfig,
    ) -> Result<Self, SetupError> {
        config.validate()?;
        Ok(Self {
            classifier: TaskClassifier::new(Arc::clone(&completion))?,
            completion,
            tools,
            strategies: StrategyRegistry::new(),
            decomposition: decomposition_contract()?,
            simple_decision: simple_decision_contract()?,
            parent_evaluation: parent_evaluation_contract()?,
            completion_evaluation: completion_evaluation_contract()?,
            config,
        })
    }

    pub fn with_strategies(mut self, strategies: StrategyRegistry) -> Self {
        self.strategies = strategies;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Execute a task from its description. Never fails: every error ends
    /// up as an unsuccessful [`ExecutionResult`] with an explanation.
    pub async fn run(&self, description: &str) -> ExecutionResult {
        self.run_with_registry(description, ArtifactRegistry::new()).await
    }

    /// Execute a task with pre-populated artifacts.
    pub async fn run_with_registry(&self, description: &str, registry: ArtifactRegistry) -> ExecutionResult {
        self.run_with_cancellation(description, registry, CancellationToken::new())
            .await
    }

    /// Execute a task that stops at the next task boundary once `cancel`
    /// fires. The token only affects this run.
    pub async fn run_with_cancellation(
        &self,
        description: &str,
        registry: ArtifactRegistry,
        cancel: CancellationToken,
    ) -> ExecutionResult {
        let task = match Task::new(description) {
            Ok(task) => task,
            Err(e) => return ExecutionResult::failure(TerminalReason::InvalidTask, e.to_string()),
        };
        let strategy = self.strategies.select(description);
        tracing::info!(task_id = %task.id(), strategy = strategy.name(), "Starting task tree");

        let mut stack = vec![Frame::new(task, registry, strategy, cancel, None, None)];
        let mut returned: Option<Returned> = None;

        while let Some(frame) = stack.last_mut() {
            // A frame with a plan is only revisited after one of its children returns.
            let step = match (frame.progress.take(), returned.take()) {
                (Some(progress), Some(child)) => self.resume(frame, progress, child).await,
                _ => self.enter(frame).await,
            };

            match step {
                Step::Push(child) => stack.push(child),
                Step::Finish(result) => {
                    let Some(mut finished) = stack.pop() else { break };
                    settle(&mut finished.task, &result);
                    if stack.is_empty() {
                        return result;
                    }
                    returned = Some(Returned {
                        description: finished.task.description().to_string(),
                        outputs: finished.outputs,
                        registry: finished.registry,
                        result,
                    });
                }
            }
        }

        ExecutionResult::failure(TerminalReason::CompletionError, "execution stack emptied without a result")
    }

    async fn enter(&self, frame: &mut Frame) -> Step {
        if let Err(e) = frame.task.start() {
            tracing::warn!(task_id = %frame.task.id(), error = %e, "Task entered twice");
        }
        let depth = frame.task.depth();
        tracing::info!(
            task_id = %frame.task.id(),
            depth,
            strategy = frame.strategy.name(),
            description = %frame.task.description(),
            "Entering task"
        );

        if frame.cancel.is_cancelled() {
            return self.fail(frame, EngineError::Cancelled);
        }
        if depth > self.config.max_depth {
            return self.fail(
                frame,
                EngineError::RecursionLimit {
                    depth,
                    max_depth: self.config.max_depth,
                },
            );
        }

        let classification = self.classifier.classify(&frame.task, Some(&frame.registry)).await;
        frame.registry.record(
            "classifier",
            format!("{}: {}", classification.complexity, classification.reasoning),
        );

        match classification.complexity {
            Complexity::Simple => match self.simple_path(frame).await {
                Ok(SimpleOutcome::Done(result)) => Step::Finish(result),
                Ok(SimpleOutcome::Decompose(plan)) => self.install_plan(frame, None, plan),
                Err(e) => self.fail(frame, e),
            },
            Complexity::Complex => match self.request_plan(frame, Some(&classification), None).await {
                Ok(plan) => self.install_plan(frame, None, plan),
                Err(e) => self.fail(frame, e),
            },
        }
    }

    async fn simple_path(&self, frame: &mut Frame) -> Result<SimpleOutcome, EngineError> {
        let tools = self
            .tools
            .discover(frame.task.description())
            .await
            .map_err(|e| EngineError::Discovery(e.to_string()))?;
        if tools.is_empty() {
            return Err(EngineError::NoSuitableTools);
        }
        tracing::debug!(
            task_id = %frame.task.id(),
            tools = ?tools.iter().map(|t| t.name()).collect::<Vec<_>>(),
            "Discovered tools"
        );

        let prompt = prompts::tool_decision(
            &frame.task,
            &tools,
            &frame.registry,
            frame.guidance.as_deref(),
            &self.simple_decision,
        );
        let decision = self
            .ask(&prompt, &self.simple_decision, "tool planning", SimpleDecision::from_validated)
            .await?;

        match decision {
            SimpleDecision::UseTools { tool_calls } => {
                Ok(SimpleOutcome::Done(self.run_tool_calls(frame, &tools, tool_calls).await))
            }
            SimpleDecision::Decompose { plan } => {
                tracing::info!(
                    task_id = %frame.task.id(),
                    subtasks = plan.len(),
                    "Model decomposed a task classified SIMPLE"
                );
                Ok(SimpleOutcome::Decompose(plan))
            }
            SimpleDecision::Respond { response } => {
                frame.registry.record("assistant", response.clone());
                Ok(SimpleOutcome::Done(
                    ExecutionResult::success(Value::String(response), COMPLETED_MESSAGE)
                        .with_artifacts(frame.published.clone()),
                ))
            }
        }
    }

    /// Execute declared tool calls in order, stopping at the first error.
    async fn run_tool_calls(
        &self,
        frame: &mut Frame,
        tools: &[Arc<dyn Tool>],
        calls: Vec<ToolCallPlan>,
    ) -> ExecutionResult {
        let mut records: Vec<ToolCallRecord> = Vec::with_capacity(calls.len());
        let mut last_output = Value::Null;

        for (index, call) in calls.into_iter().enumerate() {
            let unresolved = frame.registry.unresolved_references(&call.inputs);
            if !unresolved.is_empty() {
                tracing::warn!(
                    task_id = %frame.task.id(),
                    tool = %call.tool,
                    unresolved = ?unresolved,
                    "Tool inputs reference unknown artifacts"
                );
            }
            let inputs = frame.registry.resolve_references(&call.inputs);

            let executed = match tools.iter().find(|t| t.name() == call.tool) {
                Some(tool) => tool.execute(inputs.clone()).await.map_err(|e| e.to_string()),
                None => Err(format!("tool '{}' is not among the discovered tools", call.tool)),
            };

            let (output, error) = match executed {
                Ok(output) => match self.publish_tool_outputs(frame, &call, &output) {
                    Ok(()) => (Some(output), None),
                    Err(message) => (Some(output), Some(message)),
                },
                Err(message) => (None, Some(message)),
            };

            records.push(ToolCallRecord {
                tool: call.tool.clone(),
                inputs,
                output: output.clone(),
                error: error.clone(),
            });

            if let Some(message) = error {
                tracing::error!(
                    task_id = %frame.task.id(),
                    tool = %call.tool,
                    index,
                    error = %message,
                    "Tool call failed"
                );
                let err = EngineError::ToolExecution {
                    index,
                    tool: call.tool,
                    message,
                };
                return ExecutionResult::failure(err.terminal_reason(), err.to_string())
                    .with_data(json!({ "results": records }));
            }

            tracing::debug!(task_id = %frame.task.id(), tool = %call.tool, index, "Tool call succeeded");
            last_output = output.unwrap_or(Value::Null);
        }

        frame.registry.record(
            "tools",
            format!("{} tool call(s) succeeded; last output: {}", records.len(), prompts::render_value(&last_output)),
        );

        ExecutionResult::success(unwrap_result_field(last_output), COMPLETED_MESSAGE)
            .with_data(json!({ "results": records }))
            .with_artifacts(frame.published.clone())
    }

    /// Publish the fields named in a call's `outputs` as artifacts.
    fn publish_tool_outputs(&self, frame: &mut Frame, call: &ToolCallPlan, output: &Value) -> Result<(), String> {
        let Some(outputs) = &call.outputs else {
            return Ok(());
        };

        for (field, name) in outputs {
            let value = match output {
                Value::Object(map) => map
                    .get(field)
                    .cloned()
                    .or_else(|| (field == "result").then(|| output.clone())),
                other if field == "result" => Some(other.clone()),
                _ => None,
            };
            let Some(value) = value else {
                return Err(format!("output field '{}' not present in {} output", field, call.tool));
            };

            let spec = ArtifactSpec::new(
                value_type_name(&value),
                value,
                format!("Output '{}' of tool {}", field, call.tool),
            )
            .with_purpose(frame.task.description())
            .with_metadata(json!({ "tool": call.tool, "task_id": frame.task.id().to_string() }));

            let artifact = frame.registry.add_artifact(name, spec).map_err(|e| e.to_string())?;
            warn_if_unreferenceable(&frame.task, name);
            frame.published.push(artifact);
        }
        Ok(())
    }

    async fn request_plan(
        &self,
        frame: &Frame,
        classification: Option<&Classification>,
        remediation: Option<(&str, &[SubtaskOutcome])>,
    ) -> Result<DecompositionPlan, EngineError> {
        let prompt = prompts::decomposition(
            &frame.task,
            classification,
            &frame.registry,
            frame.guidance.as_deref(),
            remediation,
            &self.decomposition,
        );
        self.ask(&prompt, &self.decomposition, "decomposition", plan_from_validated)
            .await
    }

    /// Start running `plan`, keeping earlier outcomes when remediating.
    fn install_plan(&self, frame: &mut Frame, previous: Option<Progress>, plan: DecompositionPlan) -> Step {
        let descriptions: Vec<&str> = plan.subtasks().iter().map(|s| s.description.as_str()).collect();
        tracing::info!(
            task_id = %frame.task.id(),
            subtasks = plan.len(),
            "Decomposition plan ready"
        );
        frame.registry.record("planner", format!("Plan: {}", descriptions.join("; ")));

        let progress = match previous {
            Some(previous) => Progress {
                plan,
                next: 0,
                ..previous
            },
            None => Progress {
                plan,
                next: 0,
                outcomes: Vec::new(),
                corrections_used: 0,
            },
        };
        self.dispatch(frame, progress)
    }

    /// Push the next subtask of the plan as a child frame.
    fn dispatch(&self, frame: &mut Frame, mut progress: Progress) -> Step {
        if frame.cancel.is_cancelled() {
            return self.fail(frame, EngineError::Cancelled);
        }
        let Some(subtask) = progress.plan.get(progress.next).cloned() else {
            return self.fail(
                frame,
                EngineError::Incomplete("decomposition plan has no remaining subtasks".to_string()),
            );
        };

        let child = match Task::new_subtask(subtask.description.clone(), &frame.task) {
            Ok(child) => child,
            Err(e) => return Step::Finish(ExecutionResult::failure(TerminalReason::InvalidTask, e.to_string())),
        };
        let strategy = self.strategies.select(&subtask.description);
        let guidance = strategy.on_parent_message(
            &child,
            &ParentMessage {
                parent_description: frame.task.description(),
                index: progress.next,
                total: progress.plan.len(),
            },
        );
        tracing::info!(
            task_id = %frame.task.id(),
            child_id = %child.id(),
            index = progress.next,
            total = progress.plan.len(),
            "Dispatching subtask"
        );

        progress.next += 1;
        let registry = frame.registry.branch();
        frame.progress = Some(progress);
        let cancel = frame.cancel.clone();
        Step::Push(Frame::new(child, registry, strategy, cancel, guidance, subtask.outputs))
    }

    /// Handle a finished child: publish its output, evaluate, go on.
    async fn resume(&self, frame: &mut Frame, mut progress: Progress, child: Returned) -> Step {
        let Returned {
            description,
            outputs,
            registry: child_registry,
            result,
        } = child;

        if result.is_fatal() {
            tracing::warn!(
                task_id = %frame.task.id(),
                reason = ?result.terminal_reason,
                "Fatal subtask outcome, abandoning task"
            );
            return Step::Finish(ExecutionResult::failure(result.terminal_reason, result.message));
        }

        if result.success {
            if let Some(name) = &outputs {
                if let Err(e) = self.publish_child_output(frame, name, &description, &child_registry, &result) {
                    return self.fail(frame, e);
                }
            }
        }

        frame.registry.record(
            "subtask",
            if result.success {
                format!("{} -> {}", description, prompts::render_value(&result.result))
            } else {
                format!("{} -> FAILED: {}", description, result.message)
            },
        );
        progress.outcomes.push(SubtaskOutcome { description, result });

        if frame.cancel.is_cancelled() {
            return self.fail(frame, EngineError::Cancelled);
        }

        let Some(finished) = progress.outcomes.last() else {
            return self.fail(frame, EngineError::Incomplete("no subtask outcome recorded".to_string()));
        };
        let note = frame.strategy.on_child_message(
            &frame.task,
            &ChildMessage {
                child_description: &finished.description,
                outcome: &finished.result,
            },
        );
        let prompt = prompts::parent_evaluation(
            &frame.task,
            finished,
            &progress.plan,
            progress.next,
            note.as_deref(),
            &self.parent_evaluation,
        );
        let decision = match self
            .ask(&prompt, &self.parent_evaluation, "parent evaluation", ParentDecision::from_validated)
            .await
        {
            Ok(decision) => decision,
            Err(e) => return self.fail(frame, e),
        };
        tracing::debug!(
            task_id = %frame.task.id(),
            decision = ?decision.decision,
            reasoning = %decision.reasoning,
            "Parent evaluation"
        );
        frame.registry.record(
            "evaluator",
            format!("{:?}: {}", decision.decision, decision.reasoning),
        );

        let has_more = progress.next < progress.plan.len();
        if decision.decision == EvaluationDecision::Continue && has_more {
            return self.dispatch(frame, progress);
        }

        self.evaluate_completion(frame, progress).await
    }

    /// Republish a child's declared output into this task's registry.
    ///
    /// Uses the child's own artifact of that name when it published one,
    /// otherwise wraps the child's result.
    fn publish_child_output(
        &self,
        frame: &mut Frame,
        name: &str,
        description: &str,
        child_registry: &ArtifactRegistry,
        result: &ExecutionResult,
    ) -> Result<(), EngineError> {
        let inherited = frame.registry.get_artifact(name);
        let from_child = child_registry
            .get_artifact(name)
            .filter(|a| !inherited.as_ref().is_some_and(|p| Arc::ptr_eq(p, a)));

        let artifact = match from_child {
            Some(existing) => frame.registry.republish(name, &existing)?,
            None => {
                let spec = ArtifactSpec::new(
                    value_type_name(&result.result),
                    result.result.clone(),
                    format!("Result of subtask: {}", description),
                )
                .with_purpose(frame.task.description());
                frame.registry.add_artifact(name, spec)?
            }
        };
        warn_if_unreferenceable(&frame.task, name);
        tracing::debug!(task_id = %frame.task.id(), artifact = %name, "Published subtask output");
        frame.published.push(artifact);
        Ok(())
    }

    async fn evaluate_completion(&self, frame: &mut Frame, mut progress: Progress) -> Step {
        let prompt = prompts::completion_evaluation(
            &frame.task,
            &progress.outcomes,
            &frame.registry,
            self.config.history_chars,
            &self.completion_evaluation,
        );
        let evaluation = match self
            .ask(
                &prompt,
                &self.completion_evaluation,
                "completion evaluation",
                CompletionEvaluation::from_validated,
            )
            .await
        {
            Ok(evaluation) => evaluation,
            Err(e) => return self.fail(frame, e),
        };
        frame.registry.record(
            "evaluator",
            format!("complete={}: {}", evaluation.complete, evaluation.reason),
        );

        if evaluation.complete {
            tracing::info!(task_id = %frame.task.id(), reason = %evaluation.reason, "Task complete");
            return Step::Finish(
                ExecutionResult::success(evaluation.result, COMPLETED_MESSAGE)
                    .with_data(json!({
                        "reason": evaluation.reason,
                        "subtasks": progress.outcomes.len(),
                    }))
                    .with_artifacts(frame.published.clone()),
            );
        }

        if progress.corrections_used >= self.config.corrective_cycles {
            return self.fail(frame, EngineError::Incomplete(evaluation.reason));
        }

        progress.corrections_used += 1;
        tracing::info!(
            task_id = %frame.task.id(),
            cycle = progress.corrections_used,
            reason = %evaluation.reason,
            "Task incomplete, requesting remediation plan"
        );
        match self
            .request_plan(frame, None, Some((evaluation.reason.as_str(), progress.outcomes.as_slice())))
            .await
        {
            Ok(plan) => self.install_plan(frame, Some(progress), plan),
            Err(e) => self.fail(frame, e),
        }
    }

    /// One model round-trip decoded through `contract`.
    async fn ask<T, F>(
        &self,
        prompt: &str,
        contract: &ResponseContract,
        step: &'static str,
        convert: F,
    ) -> Result<T, EngineError>
    where
        F: FnOnce(Value) -> Result<T, String>,
    {
        tracing::debug!(step, prompt_chars = prompt.len(), "Prompting model");
        let raw = self
            .completion
            .complete(prompt)
            .await
            .map_err(|e| EngineError::Completion {
                step,
                message: e.to_string(),
            })?;
        contract
            .process_as(&raw, convert)
            .map_err(|source| EngineError::SchemaViolation { step, source })
    }

    fn fail(&self, frame: &Frame, error: EngineError) -> Step {
        let reason = error.terminal_reason();
        if reason.is_fatal() {
            tracing::warn!(task_id = %frame.task.id(), depth = frame.task.depth(), error = %error, "Task aborted");
        } else {
            tracing::error!(task_id = %frame.task.id(), depth = frame.task.depth(), error = %error, "Task failed");
        }
        Step::Finish(ExecutionResult::failure(reason, error.to_string()))
    }
}

/// Move the task into its terminal status.
fn settle(task: &mut Task, result: &ExecutionResult) {
    let outcome = if result.success {
        task.succeed(result.result.clone())
    } else {
        task.fail(result.result.clone())
    };
    if let Err(e) = outcome {
        tracing::warn!(task_id = %task.id(), error = %e, "Could not record task outcome");
    }
    tracing::info!(
        task_id = %task.id(),
        depth = task.depth(),
        success = result.success,
        reason = ?result.terminal_reason,
        "Task finished"
    );
}

/// Stored names that `@name` cannot address are kept, but later steps will
/// not be able to refer to them.
fn warn_if_unreferenceable(task: &Task, name: &str) {
    if !ArtifactRegistry::is_referenceable(name) {
        tracing::warn!(
            task_id = %task.id(),
            artifact = %name,
            "Artifact name cannot be referenced as @name"
        );
    }
}

/// Tools commonly wrap their answer as `{"result": ...}`; a task's result
/// is the inner value.
fn unwrap_result_field(output: Value) -> Value {
    match output {
        Value::Object(mut map) if map.contains_key("result") => map.remove("result").unwrap_or(Value::Null),
        other => other,
    }
}

#[cfg(test)]
mod tests;
