//! Doubles shared by the unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::llm::CompletionService;
use crate::tools::{Tool, ToolDiscovery};

/// Completion service that replays queued responses in order and records
/// every prompt it receives.
#[derive(Default)]
pub(crate) struct ScriptedCompletion {
    responses: Mutex<VecDeque<Result<String, String>>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedCompletion {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Queue a successful response; JSON values are serialized.
    pub(crate) fn reply(self, response: impl Into<Reply>) -> Self {
        let text = match response.into() {
            Reply::Text(t) => t,
            Reply::Json(v) => v.to_string(),
        };
        self.lock_responses().push_back(Ok(text));
        self
    }

    /// Queue a service error.
    pub(crate) fn fail(self, message: &str) -> Self {
        self.lock_responses().push_back(Err(message.to_string()));
        self
    }

    pub(crate) fn prompts(&self) -> Vec<String> {
        self.prompts.lock().map(|p| p.clone()).unwrap_or_default()
    }

    pub(crate) fn remaining(&self) -> usize {
        self.lock_responses().len()
    }

    fn lock_responses(&self) -> std::sync::MutexGuard<'_, VecDeque<Result<String, String>>> {
        self.responses.lock().unwrap_or_else(|e| e.into_inner())
    }
}

pub(crate) enum Reply {
    Text(String),
    Json(Value),
}

impl From<&str> for Reply {
    fn from(s: &str) -> Self {
        Reply::Text(s.to_string())
    }
}

impl From<Value> for Reply {
    fn from(v: Value) -> Self {
        Reply::Json(v)
    }
}

#[async_trait]
impl CompletionService for ScriptedCompletion {
    async fn complete(&self, prompt: &str) -> anyhow::Result<String> {
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(prompt.to_string());
        }
        match self.lock_responses().pop_front() {
            Some(Ok(text)) => Ok(text),
            Some(Err(message)) => Err(anyhow::anyhow!(message)),
            None => Err(anyhow::anyhow!("no scripted response left")),
        }
    }
}

type ReplyFn = dyn Fn(&str) -> anyhow::Result<String> + Send + Sync;

/// Completion service that answers each prompt with a closure and counts calls.
pub(crate) struct FnCompletion {
    handler: Box<ReplyFn>,
    calls: AtomicUsize,
}

impl FnCompletion {
    pub(crate) fn new(handler: impl Fn(&str) -> anyhow::Result<String> + Send + Sync + 'static) -> Self {
        Self {
            handler: Box::new(handler),
            calls: AtomicUsize::new(0),
        }
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CompletionService for FnCompletion {
    async fn complete(&self, prompt: &str) -> anyhow::Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        (self.handler)(prompt)
    }
}

type ToolFn = dyn Fn(Value) -> anyhow::Result<Value> + Send + Sync;

/// Tool backed by a closure.
pub(crate) struct FnTool {
    name: String,
    description: String,
    handler: Box<ToolFn>,
}

impl FnTool {
    pub(crate) fn new(
        name: &str,
        description: &str,
        handler: impl Fn(Value) -> anyhow::Result<Value> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            handler: Box::new(handler),
        }
    }
}

#[async_trait]
impl Tool for FnTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters_schema(&self) -> Value {
        json!({"type": "object"})
    }

    async fn execute(&self, inputs: Value) -> anyhow::Result<Value> {
        (self.handler)(inputs)
    }
}

/// Discovery that always offers every registered tool.
pub(crate) struct OfferAll(pub(crate) Vec<Arc<dyn Tool>>);

#[async_trait]
impl ToolDiscovery for OfferAll {
    async fn discover(&self, _task_description: &str) -> anyhow::Result<Vec<Arc<dyn Tool>>> {
        Ok(self.0.clone())
    }
}

