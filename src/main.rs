//! task-tree - command line entry point
//!
//! Runs one task description through the engine and prints the result as JSON.
//!
//! ```text
//! task-tree "Calculate 6 * 7"
//! ```

use std::sync::Arc;

use clap::Parser;
use serde_json::{json, Map, Value};
use task_tree::{
    config::Config, ArtifactRegistry, ExecutionResult, OpenRouterCompletion, TaskEngine, ToolRegistry,
};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "task-tree")]
#[command(about = "Classify, decompose and execute a task with a language model")]
struct Cli {
    /// Task description (multiple words are joined with spaces)
    #[arg(required = true)]
    task: Vec<String>,

    /// Deepest allowed subtask level; overrides TASK_MAX_DEPTH
    #[arg(long)]
    max_depth: Option<usize>,

    /// Remediation rounds after an incomplete verdict; overrides TASK_CORRECTIVE_CYCLES
    #[arg(long)]
    corrective_cycles: Option<usize>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so stdout carries only the result
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "task_tree=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let description = cli.task.join(" ");

    let mut config = Config::from_env()?;
    if let Some(max_depth) = cli.max_depth {
        config.engine = config.engine.with_max_depth(max_depth);
    }
    if let Some(corrective_cycles) = cli.corrective_cycles {
        config.engine = config.engine.with_corrective_cycles(corrective_cycles);
    }
    info!(
        model = %config.default_model,
        max_depth = config.engine.max_depth,
        "Loaded configuration"
    );

    let completion =
        OpenRouterCompletion::new(config.api_key, config.default_model).with_retry_config(config.retry);
    let tools = ToolRegistry::with_builtin_tools();
    let engine = TaskEngine::new(Arc::new(completion), Arc::new(tools), config.engine)?;

    // Ctrl-C stops the tree at the next task boundary
    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });

    let result = engine
        .run_with_cancellation(&description, ArtifactRegistry::new(), cancel)
        .await;
    println!("{}", serde_json::to_string_pretty(&render(&result))?);

    if !result.success {
        std::process::exit(1);
    }
    Ok(())
}

fn render(result: &ExecutionResult) -> Value {
    let artifacts: Map<String, Value> = result
        .artifacts
        .iter()
        .flatten()
        .map(|(name, artifact)| {
            let value = serde_json::to_value(artifact.as_ref()).unwrap_or(Value::Null);
            (name.clone(), value)
        })
        .collect();

    json!({
        "success": result.success,
        "result": result.result,
        "message": result.message,
        "terminalReason": result.terminal_reason,
        "artifacts": artifacts,
        "data": result.data,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_joins_words_and_reads_overrides() {
        let cli = Cli::try_parse_from(["task-tree", "--max-depth", "2", "Calculate", "6", "*", "7"]).unwrap();
        assert_eq!(cli.task.join(" "), "Calculate 6 * 7");
        assert_eq!(cli.max_depth, Some(2));
        assert_eq!(cli.corrective_cycles, None);
    }

    #[test]
    fn test_cli_requires_a_task() {
        assert!(Cli::try_parse_from(["task-tree"]).is_err());
    }
}
