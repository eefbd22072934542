//! Execution strategies.
//!
//! A strategy shapes how a task talks to its parent and its children:
//! - `on_parent_message`: the task was handed to it by its parent. The
//!   returned text is added to the task's decision and planning prompts.
//! - `on_child_message`: a child reported back. The returned text is added
//!   to the parent-evaluation prompt.
//!
//! Strategies are picked per task by [`StrategyRegistry::select`].

use std::collections::HashMap;
use std::sync::Arc;

use crate::task::{ExecutionResult, Task};

/// A task handed down by the parent.
#[derive(Debug, Clone, Copy)]
pub struct ParentMessage<'a> {
    pub parent_description: &'a str,
    /// Position of this subtask in the parent's plan (0-based).
    pub index: usize,
    pub total: usize,
}

/// A child reporting its outcome.
#[derive(Debug, Clone, Copy)]
pub struct ChildMessage<'a> {
    pub child_description: &'a str,
    pub outcome: &'a ExecutionResult,
}

pub trait Strategy: Send + Sync {
    fn name(&self) -> &str;

    /// Guidance for the task that just received work from its parent.
    fn on_parent_message(&self, task: &Task, message: &ParentMessage<'_>) -> Option<String>;

    /// Evaluation notes for a task whose child just finished.
    fn on_child_message(&self, task: &Task, message: &ChildMessage<'_>) -> Option<String>;
}

/// Built-in strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StrategyKind {
    Coding,
    Testing,
    Debugging,
    General,
}

const DEBUGGING_KEYWORDS: &[&str] = &["debug", "fix", "error", "bug", "crash", "failing"];
const TESTING_KEYWORDS: &[&str] = &["test", "verify", "validate", "check"];
const CODING_KEYWORDS: &[&str] = &[
    "implement", "code", "function", "refactor", "build", "write", "program", "develop",
];

impl StrategyKind {
    pub const ALL: [StrategyKind; 4] = [
        StrategyKind::Coding,
        StrategyKind::Testing,
        StrategyKind::Debugging,
        StrategyKind::General,
    ];

    /// Pick a kind from the task description. Debugging wins over testing,
    /// testing over coding.
    pub fn for_description(description: &str) -> Self {
        let words: Vec<String> = description
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .map(str::to_lowercase)
            .collect();
        let mentions = |keywords: &[&str]| words.iter().any(|w| keywords.iter().any(|k| w.starts_with(k)));

        if mentions(DEBUGGING_KEYWORDS) {
            StrategyKind::Debugging
        } else if mentions(TESTING_KEYWORDS) {
            StrategyKind::Testing
        } else if mentions(CODING_KEYWORDS) {
            StrategyKind::Coding
        } else {
            StrategyKind::General
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::Coding => "coding",
            StrategyKind::Testing => "testing",
            StrategyKind::Debugging => "debugging",
            StrategyKind::General => "general",
        }
    }
}

impl Strategy for StrategyKind {
    fn name(&self) -> &str {
        self.as_str()
    }

    fn on_parent_message(&self, _task: &Task, message: &ParentMessage<'_>) -> Option<String> {
        let position = format!(
            "This is step {} of {} for: {}.",
            message.index + 1,
            message.total,
            message.parent_description
        );
        let focus = match self {
            StrategyKind::Coding => {
                "Produce working code. Publish anything later steps need as named outputs."
            }
            StrategyKind::Testing => "Exercise the behavior and report concrete pass/fail evidence.",
            StrategyKind::Debugging => {
                "Reproduce the problem first, then apply the smallest fix and confirm it."
            }
            StrategyKind::General => return Some(position),
        };
        Some(format!("{} {}", position, focus))
    }

    fn on_child_message(&self, _task: &Task, message: &ChildMessage<'_>) -> Option<String> {
        if !message.outcome.success {
            return Some(format!(
                "The step \"{}\" failed: {}. Decide whether the remaining steps can still succeed.",
                message.child_description, message.outcome.message
            ));
        }
        match self {
            StrategyKind::Testing => Some(
                "Only treat the task as done if the reported results show the checks passing."
                    .to_string(),
            ),
            StrategyKind::Debugging => Some(
                "Only treat the task as done once the fix has been confirmed.".to_string(),
            ),
            StrategyKind::Coding | StrategyKind::General => None,
        }
    }
}

/// Lookup table from strategy name to implementation.
///
/// Starts with the built-in kinds; registering a strategy under a built-in
/// name replaces it.
pub struct StrategyRegistry {
    strategies: HashMap<String, Arc<dyn Strategy>>,
}

impl StrategyRegistry {
    pub fn new() -> Self {
        let strategies = StrategyKind::ALL
            .iter()
            .map(|kind| (kind.as_str().to_string(), Arc::new(*kind) as Arc<dyn Strategy>))
            .collect();
        Self { strategies }
    }

    pub fn register(&mut self, strategy: Arc<dyn Strategy>) {
        self.strategies.insert(strategy.name().to_string(), strategy);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Strategy>> {
        self.strategies.get(name).cloned()
    }

    /// The strategy for a task description. Falls back to the built-in
    /// kind when the selected name has been removed or never registered.
    pub fn select(&self, description: &str) -> Arc<dyn Strategy> {
        let kind = StrategyKind::for_description(description);
        self.get(kind.as_str())
            .unwrap_or_else(|| Arc::new(kind) as Arc<dyn Strategy>)
    }
}

impl Default for StrategyRegistry {
    fn default() -> Self {
        Self::new()
    }
}
