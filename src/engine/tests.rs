use std::sync::{Arc, Mutex};

use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use super::*;
use crate::task::TerminalReason;
use crate::test_support::{FnCompletion, FnTool, OfferAll, ScriptedCompletion};
use crate::tools::{Tool, ToolRegistry};

fn engine(completion: Arc<dyn CompletionService>, tools: impl ToolDiscovery + 'static) -> TaskEngine {
    TaskEngine::new(completion, Arc::new(tools), EngineConfig::default()).unwrap()
}

fn simple() -> Value {
    json!({"complexity": "SIMPLE", "reasoning": "a single step"})
}

fn complex() -> Value {
    json!({"complexity": "COMPLEX", "reasoning": "several steps"})
}

fn plan(subtasks: Value) -> Value {
    json!({"decompose": true, "subtasks": subtasks})
}

fn respond(text: &str) -> Value {
    json!({"response": text})
}

fn decide(decision: &str) -> Value {
    json!({"decision": decision, "reasoning": "looks right"})
}

fn done(result: Value) -> Value {
    json!({"complete": true, "result": result, "reason": "everything finished"})
}

fn noop_tool() -> Arc<dyn Tool> {
    Arc::new(FnTool::new("noop", "does nothing", |_| Ok(json!({}))))
}

#[tokio::test]
async fn test_simple_task_runs_calculator() {
    let completion = Arc::new(
        ScriptedCompletion::new().reply(simple()).reply(json!({
            "useTools": true,
            "toolCalls": [{"tool": "calculator", "inputs": {"expression": "6*7"}}]
        })),
    );
    let engine = engine(completion.clone(), ToolRegistry::with_builtin_tools());

    let result = engine.run("Calculate 6 * 7").await;

    assert!(result.success, "{}", result.message);
    assert_eq!(result.result, json!(42));
    assert_eq!(result.message, "Task completed");
    assert_eq!(result.terminal_reason, TerminalReason::Completed);
    let data = result.data.unwrap();
    assert_eq!(data["results"][0]["output"], json!({"result": 42}));
    assert_eq!(completion.remaining(), 0);
    assert!(completion.prompts()[1].contains("calculator"));
}

#[tokio::test]
async fn test_complex_task_chains_subtask_outputs() {
    let written = Arc::new(Mutex::new(Vec::new()));
    let sink = written.clone();
    let write_file = FnTool::new("write_file", "write a file", move |inputs| {
        sink.lock().unwrap().push(inputs.clone());
        Ok(json!({"result": format!("wrote {}", inputs["path"].as_str().unwrap_or("?"))}))
    });

    let completion = Arc::new(
        ScriptedCompletion::new()
            .reply(complex())
            .reply(plan(json!([
                {"description": "Write the HTML page", "outputs": "html"},
                {"description": "Write the CSS stylesheet", "outputs": "css"}
            ])))
            .reply(simple())
            .reply(json!({
                "useTools": true,
                "toolCalls": [{"tool": "write_file", "inputs": {"path": "index.html"}}]
            }))
            .reply(decide("CONTINUE"))
            .reply(simple())
            .reply(json!({
                "useTools": true,
                "toolCalls": [{"tool": "write_file", "inputs": {"path": "style.css", "page": "@html"}}]
            }))
            .reply(decide("COMPLETE"))
            .reply(done(json!("All done"))),
    );
    let engine = engine(completion.clone(), OfferAll(vec![Arc::new(write_file) as Arc<dyn Tool>]));

    let result = engine.run("Build a complete web application").await;

    assert!(result.success, "{}", result.message);
    assert_eq!(result.result, json!("All done"));
    assert_eq!(result.message, "Task completed");
    let artifacts = result.artifacts.unwrap();
    assert_eq!(artifacts["html"].value, json!("wrote index.html"));
    assert_eq!(artifacts["css"].value, json!("wrote style.css"));
    assert_eq!(artifacts["html"].description, "Result of subtask: Write the HTML page");

    let written = written.lock().unwrap();
    assert_eq!(written[1]["page"], json!("wrote index.html"));

    let prompts = completion.prompts();
    assert!(prompts[5].contains("@html (string)"));
    assert!(prompts[4].contains("- Write the CSS stylesheet"));
    assert_eq!(completion.remaining(), 0);
}

#[tokio::test]
async fn test_complete_decision_skips_remaining_subtasks() {
    let completion = Arc::new(
        ScriptedCompletion::new()
            .reply(complex())
            .reply(plan(json!([
                {"description": "look up the answer"},
                {"description": "double check the answer"},
                {"description": "format the answer"}
            ])))
            .reply(simple())
            .reply(respond("42"))
            .reply(decide("COMPLETE"))
            .reply(done(json!("42"))),
    );
    let engine = engine(completion.clone(), OfferAll(vec![noop_tool()]));

    let result = engine.run("Answer the question").await;

    assert!(result.success, "{}", result.message);
    assert_eq!(result.result, json!("42"));
    assert_eq!(result.data.unwrap()["subtasks"], json!(1));

    let prompts = completion.prompts();
    assert_eq!(prompts.len(), 6);
    assert!(prompts[4].contains("- double check the answer\n- format the answer\n"));
    assert!(prompts[5].starts_with("Decide whether the following task has been fully accomplished"));
    assert!(!prompts.iter().any(|p| p.contains("Task: double check the answer")));
    assert_eq!(completion.remaining(), 0);
}

#[tokio::test]
async fn test_classifier_failure_falls_back_to_complex() {
    let completion = Arc::new(
        ScriptedCompletion::new()
            .fail("classifier offline")
            .reply("this is not json at all"),
    );
    let engine = engine(completion.clone(), OfferAll(vec![noop_tool()]));

    let result = engine.run("Organize my photos").await;

    assert!(!result.success);
    assert_eq!(result.terminal_reason, TerminalReason::SchemaViolation);
    assert!(result.message.starts_with("decomposition failed"));
    assert!(completion.prompts()[1].contains("Classification error: classifier offline"));
}

fn always_deeper(prompt: &str) -> anyhow::Result<String> {
    if prompt.contains("complexity analyzer") {
        Ok(complex().to_string())
    } else {
        Ok(plan(json!([{"description": "go one level deeper"}])).to_string())
    }
}

#[tokio::test]
async fn test_recursion_limit_is_fatal() {
    let completion = Arc::new(FnCompletion::new(always_deeper));
    let engine = engine(completion.clone(), OfferAll(vec![noop_tool()]));

    let result = engine.run("an endless task").await;

    assert!(!result.success);
    assert_eq!(result.terminal_reason, TerminalReason::RecursionLimit);
    assert_eq!(result.message, "max recursion depth exceeded");
    // depths 0..=5 each classify and decompose; depth 6 stops before any call
    assert_eq!(completion.calls(), 12);
}

#[tokio::test]
async fn test_recursion_limit_zero_allows_root_only() {
    let completion = Arc::new(FnCompletion::new(always_deeper));
    let engine = TaskEngine::new(
        completion.clone(),
        Arc::new(OfferAll(vec![noop_tool()])),
        EngineConfig::default().with_max_depth(0),
    )
    .unwrap();

    let result = engine.run("an endless task").await;

    assert_eq!(result.terminal_reason, TerminalReason::RecursionLimit);
    assert_eq!(completion.calls(), 2);
}

#[tokio::test]
async fn test_no_suitable_tools() {
    let completion = Arc::new(ScriptedCompletion::new().reply(simple()));
    let engine = engine(completion.clone(), ToolRegistry::empty());

    let result = engine.run("Translate this sentence").await;

    assert!(!result.success);
    assert_eq!(result.terminal_reason, TerminalReason::NoSuitableTools);
    assert_eq!(result.message, "unable to find suitable tools");
    assert_eq!(completion.prompts().len(), 1);
}

fn boom_tool() -> Arc<dyn Tool> {
    Arc::new(FnTool::new("boom", "always fails", |_| Err(anyhow::anyhow!("disk full"))))
}

#[tokio::test]
async fn test_tool_failure_stops_sequence() {
    let calls = Arc::new(Mutex::new(0));
    let counter = calls.clone();
    let ok = FnTool::new("ok", "succeeds", move |_| {
        *counter.lock().unwrap() += 1;
        Ok(json!({"result": 1}))
    });
    let completion = Arc::new(ScriptedCompletion::new().reply(simple()).reply(json!({
        "useTools": true,
        "toolCalls": [
            {"tool": "ok", "inputs": {}},
            {"tool": "boom", "inputs": {}},
            {"tool": "ok", "inputs": {}}
        ]
    })));
    let engine = engine(completion, OfferAll(vec![Arc::new(ok) as Arc<dyn Tool>, boom_tool()]));

    let result = engine.run("Save the report").await;

    assert!(!result.success);
    assert_eq!(result.terminal_reason, TerminalReason::ToolFailure);
    assert_eq!(result.message, "tool call 1 (boom) failed: disk full");
    let data = result.data.unwrap();
    let results = &data["results"];
    assert_eq!(results.as_array().unwrap().len(), 2);
    assert!(results[0].get("error").is_none());
    assert_eq!(results[1]["error"], json!("disk full"));
    assert_eq!(*calls.lock().unwrap(), 1);
}

#[tokio::test]
async fn test_unknown_tool_is_rejected() {
    let completion = Arc::new(ScriptedCompletion::new().reply(simple()).reply(json!({
        "useTools": true,
        "toolCalls": [{"tool": "rm_rf", "inputs": {}}]
    })));
    let engine = engine(completion, OfferAll(vec![noop_tool()]));

    let result = engine.run("Clean up").await;

    assert_eq!(result.terminal_reason, TerminalReason::ToolFailure);
    assert!(result.message.contains("tool 'rm_rf' is not among the discovered tools"));
}

#[tokio::test]
async fn test_tool_outputs_are_published_and_resolved() {
    let completion = Arc::new(ScriptedCompletion::new().reply(simple()).reply(json!({
        "useTools": true,
        "toolCalls": [
            {"tool": "calculator", "inputs": {"expression": "6*7"}, "outputs": {"result": "product"}},
            {"tool": "calculator", "inputs": {"expression": "@product + 1"}}
        ]
    })));
    let engine = engine(completion, ToolRegistry::with_builtin_tools());

    let result = engine.run("Calculate 6 * 7 plus one").await;

    assert!(result.success, "{}", result.message);
    assert_eq!(result.result, json!(43));
    let artifacts = result.artifacts.unwrap();
    let product = &artifacts["product"];
    assert_eq!(product.value, json!(42));
    assert_eq!(product.artifact_type, "number");
    assert_eq!(product.description, "Output 'result' of tool calculator");
    assert_eq!(product.metadata.as_ref().unwrap()["tool"], json!("calculator"));
    assert_eq!(result.data.unwrap()["results"][1]["inputs"]["expression"], json!("42 + 1"));
}

#[tokio::test]
async fn test_unreferenceable_output_name_is_still_published() {
    let completion = Arc::new(ScriptedCompletion::new().reply(simple()).reply(json!({
        "useTools": true,
        "toolCalls": [{"tool": "calculator", "inputs": {"expression": "2*3"}, "outputs": {"result": "six.value"}}]
    })));
    let engine = engine(completion, ToolRegistry::with_builtin_tools());

    let result = engine.run("Calculate 2 * 3").await;

    assert!(result.success, "{}", result.message);
    assert!(!ArtifactRegistry::is_referenceable("six.value"));
    assert_eq!(result.artifacts.unwrap()["six.value"].value, json!(6));
}

#[tokio::test]
async fn test_missing_output_field_fails_call() {
    let completion = Arc::new(ScriptedCompletion::new().reply(simple()).reply(json!({
        "useTools": true,
        "toolCalls": [{"tool": "calculator", "inputs": {"expression": "1+1"}, "outputs": {"sum": "total"}}]
    })));
    let engine = engine(completion, ToolRegistry::with_builtin_tools());

    let result = engine.run("Calculate 1 + 1").await;

    assert_eq!(result.terminal_reason, TerminalReason::ToolFailure);
    assert!(result.message.contains("output field 'sum' not present in calculator output"));
    assert_eq!(result.data.unwrap()["results"][0]["output"], json!({"result": 2}));
}

#[tokio::test]
async fn test_simple_task_may_decompose() {
    let completion = Arc::new(
        ScriptedCompletion::new()
            .reply(simple())
            .reply(plan(json!([{"description": "say hi"}])))
            .reply(simple())
            .reply(respond("hi"))
            .reply(decide("COMPLETE"))
            .reply(done(json!("hi"))),
    );
    let engine = engine(completion.clone(), OfferAll(vec![noop_tool()]));

    let result = engine.run("Greet the user").await;

    assert!(result.success, "{}", result.message);
    assert_eq!(result.result, json!("hi"));
    assert_eq!(completion.remaining(), 0);
}

#[tokio::test]
async fn test_direct_response() {
    let completion = Arc::new(ScriptedCompletion::new().reply(simple()).reply(respond("Paris")));
    let engine = engine(completion, OfferAll(vec![noop_tool()]));

    let result = engine.run("What is the capital of France?").await;

    assert!(result.success);
    assert_eq!(result.result, json!("Paris"));
    assert_eq!(result.message, "Task completed");
}

fn incomplete_then(script: ScriptedCompletion) -> ScriptedCompletion {
    script
        .reply(complex())
        .reply(plan(json!([{"description": "step A"}])))
        .reply(simple())
        .reply(respond("a"))
        .reply(decide("CONTINUE"))
        .reply(json!({"complete": false, "reason": "missing B"}))
}

#[tokio::test]
async fn test_corrective_cycle_recovers() {
    let completion = Arc::new(
        incomplete_then(ScriptedCompletion::new())
            .reply(plan(json!([{"description": "step B"}])))
            .reply(simple())
            .reply(respond("b"))
            .reply(decide("CONTINUE"))
            .reply(done(json!("a and b"))),
    );
    let engine = engine(completion.clone(), OfferAll(vec![noop_tool()]));

    let result = engine.run("Do A then B").await;

    assert!(result.success, "{}", result.message);
    assert_eq!(result.result, json!("a and b"));
    let prompts = completion.prompts();
    assert!(prompts[6].contains("Evaluator's reason: missing B"));
    assert!(prompts[6].contains("\"step A\": succeeded with result: a"));
    // the final evaluation sees both attempts
    assert!(prompts[10].contains("\"step A\""));
    assert!(prompts[10].contains("\"step B\""));
    assert_eq!(completion.remaining(), 0);
}

#[tokio::test]
async fn test_incomplete_without_corrective_cycles() {
    let completion = Arc::new(incomplete_then(ScriptedCompletion::new()));
    let engine = TaskEngine::new(
        completion.clone(),
        Arc::new(OfferAll(vec![noop_tool()])),
        EngineConfig::default().with_corrective_cycles(0),
    )
    .unwrap();

    let result = engine.run("Do A then B").await;

    assert!(!result.success);
    assert_eq!(result.terminal_reason, TerminalReason::Incomplete);
    assert_eq!(result.message, "task incomplete: missing B");
    assert_eq!(completion.remaining(), 0);
}

#[tokio::test]
async fn test_parent_continues_after_child_failure() {
    let completion = Arc::new(
        ScriptedCompletion::new()
            .reply(complex())
            .reply(plan(json!([{"description": "save draft"}, {"description": "answer anyway"}])))
            .reply(simple())
            .reply(json!({"useTools": true, "toolCalls": [{"tool": "boom", "inputs": {}}]}))
            .reply(decide("CONTINUE"))
            .reply(simple())
            .reply(respond("recovered"))
            .reply(decide("COMPLETE"))
            .reply(done(json!("partial"))),
    );
    let engine = engine(completion.clone(), OfferAll(vec![boom_tool()]));

    let result = engine.run("Draft and answer").await;

    assert!(result.success, "{}", result.message);
    assert_eq!(result.result, json!("partial"));
    let prompts = completion.prompts();
    let evaluation = &prompts[4];
    assert!(evaluation.contains("\"save draft\": FAILED: tool call 0 (boom) failed: disk full"));
    assert!(evaluation.contains("- answer anyway"));
}

#[tokio::test]
async fn test_cancelled_before_start() {
    let completion = Arc::new(ScriptedCompletion::new());
    let token = CancellationToken::new();
    token.cancel();
    let engine = engine(completion.clone(), OfferAll(vec![noop_tool()]));

    let result = engine
        .run_with_cancellation("anything", ArtifactRegistry::new(), token)
        .await;

    assert_eq!(result.terminal_reason, TerminalReason::Cancelled);
    assert_eq!(result.message, "task cancelled");
    assert!(completion.prompts().is_empty());
}

#[tokio::test]
async fn test_cancellation_is_scoped_to_one_run() {
    let completion = Arc::new(
        ScriptedCompletion::new()
            .reply(simple())
            .reply(respond("4")),
    );
    let engine = engine(completion.clone(), OfferAll(vec![noop_tool()]));

    let token = CancellationToken::new();
    token.cancel();
    let cancelled = engine
        .run_with_cancellation("first run", ArtifactRegistry::new(), token)
        .await;
    assert_eq!(cancelled.terminal_reason, TerminalReason::Cancelled);

    let result = engine.run("What is 2+2?").await;

    assert!(result.success, "{}", result.message);
    assert_eq!(result.result, json!("4"));
    assert_eq!(completion.remaining(), 0);
}

#[tokio::test]
async fn test_cancellation_observed_at_next_boundary() {
    let token = CancellationToken::new();
    let trigger = token.clone();
    let stop = FnTool::new("stop", "cancels the run", move |_| {
        trigger.cancel();
        Ok(json!({"result": "stopped"}))
    });
    let completion = Arc::new(
        ScriptedCompletion::new()
            .reply(complex())
            .reply(plan(json!([{"description": "first"}, {"description": "second"}])))
            .reply(simple())
            .reply(json!({"useTools": true, "toolCalls": [{"tool": "stop", "inputs": {}}]})),
    );
    let engine = engine(completion.clone(), OfferAll(vec![Arc::new(stop) as Arc<dyn Tool>]));

    let result = engine
        .run_with_cancellation("two steps", ArtifactRegistry::new(), token)
        .await;

    assert!(result.is_fatal());
    assert_eq!(result.terminal_reason, TerminalReason::Cancelled);
    assert_eq!(completion.prompts().len(), 4);
}

#[tokio::test]
async fn test_blank_description_rejected() {
    let completion = Arc::new(ScriptedCompletion::new());
    let engine = engine(completion.clone(), OfferAll(vec![]));

    let result = engine.run("   ").await;

    assert_eq!(result.terminal_reason, TerminalReason::InvalidTask);
    assert!(completion.prompts().is_empty());
}

#[tokio::test]
async fn test_parent_evaluation_parse_failure() {
    let completion = Arc::new(
        ScriptedCompletion::new()
            .reply(complex())
            .reply(plan(json!([{"description": "only step"}])))
            .reply(simple())
            .reply(respond("x"))
            .reply("garbage"),
    );
    let engine = engine(completion, OfferAll(vec![noop_tool()]));

    let result = engine.run("single step plan").await;

    assert_eq!(result.terminal_reason, TerminalReason::SchemaViolation);
    assert!(result.message.starts_with("parent evaluation failed"));
}

#[tokio::test]
async fn test_preloaded_artifacts_are_offered() {
    let mut registry = ArtifactRegistry::new();
    registry
        .add_artifact("notes", ArtifactSpec::new("string", json!("meeting notes"), "Raw notes"))
        .unwrap();
    let completion = Arc::new(ScriptedCompletion::new().reply(simple()).reply(respond("summary")));
    let engine = engine(completion.clone(), OfferAll(vec![noop_tool()]));

    let result = engine.run_with_registry("Summarize @notes", registry).await;

    assert!(result.success);
    assert!(completion.prompts()[0].contains("@notes (string): Raw notes"));
}
