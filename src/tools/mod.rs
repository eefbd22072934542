//! Tool system for the engine.
//!
//! A SIMPLE task is executed by asking the model for a list of tool calls.
//! The engine never decides which tools exist: it asks a [`ToolDiscovery`]
//! for candidates matching the task description and offers only those.
//! [`ToolRegistry`] is the bundled discovery implementation.

mod calculator;

pub use calculator::Calculator;

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

/// Trait for implementing tools.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool.
    fn name(&self) -> &str;

    /// A description of what this tool does. Also used for discovery.
    fn description(&self) -> &str;

    /// JSON schema for the tool's inputs.
    fn parameters_schema(&self) -> Value;

    /// Execute the tool. `inputs` have already had `@name` references resolved.
    async fn execute(&self, inputs: Value) -> anyhow::Result<Value>;
}

/// Finds tools relevant to a task description.
#[async_trait]
pub trait ToolDiscovery: Send + Sync {
    /// Candidate tools, most relevant first. Empty when nothing fits.
    async fn discover(&self, task_description: &str) -> anyhow::Result<Vec<Arc<dyn Tool>>>;
}

/// Registry of available tools.
///
/// Discovery scores each tool by how many words of the task description
/// appear (by a six-character stem) in the tool's name and description.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    max_candidates: usize,
}

const DEFAULT_MAX_CANDIDATES: usize = 8;

const STOP_WORDS: &[&str] = &[
    "the", "and", "for", "with", "from", "into", "that", "this", "then", "than", "use", "using",
    "make", "please", "some", "all", "any", "are", "was", "its", "you", "your", "our",
];

impl ToolRegistry {
    /// Create an empty registry (no built-in tools).
    pub fn empty() -> Self {
        Self {
            tools: HashMap::new(),
            max_candidates: DEFAULT_MAX_CANDIDATES,
        }
    }

    /// Create a registry with the built-in tools.
    pub fn with_builtin_tools() -> Self {
        let mut registry = Self::empty();
        registry.register(Arc::new(Calculator));
        tracing::debug!("ToolRegistry created with {} built-in tools", registry.len());
        registry
    }

    /// Limit how many candidates discovery returns.
    pub fn with_max_candidates(mut self, max_candidates: usize) -> Self {
        self.max_candidates = max_candidates.max(1);
        self
    }

    /// Register a tool, replacing any tool with the same name.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        if self.tools.insert(name.clone(), tool).is_some() {
            tracing::warn!(tool = %name, "Replaced previously registered tool");
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    fn rank(&self, task_description: &str) -> Vec<Arc<dyn Tool>> {
        let wanted = stems(task_description);
        let mut scored: Vec<(usize, &str, &Arc<dyn Tool>)> = self
            .tools
            .iter()
            .filter_map(|(name, tool)| {
                let offered = stems(&format!("{} {}", name.replace('_', " "), tool.description()));
                let score = wanted.intersection(&offered).count();
                (score > 0).then_some((score, name.as_str(), tool))
            })
            .collect();

        scored.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(b.1)));
        scored
            .into_iter()
            .take(self.max_candidates)
            .map(|(_, _, tool)| Arc::clone(tool))
            .collect()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::with_builtin_tools()
    }
}

#[async_trait]
impl ToolDiscovery for ToolRegistry {
    async fn discover(&self, task_description: &str) -> anyhow::Result<Vec<Arc<dyn Tool>>> {
        let found = self.rank(task_description);
        tracing::debug!(
            candidates = found.len(),
            registered = self.tools.len(),
            "Tool discovery finished"
        );
        Ok(found)
    }
}

/// Lowercased word stems (first six characters) of words with at least
/// three letters, minus stop words.
fn stems(text: &str) -> BTreeSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .map(str::to_lowercase)
        .filter(|w| w.chars().count() >= 3 && !STOP_WORDS.contains(&w.as_str()))
        .map(|w| w.chars().take(6).collect())
        .collect()
}
