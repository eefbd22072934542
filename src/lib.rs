//! # Task Tree
//!
//! Recursive task execution driven by a language model.
//!
//! A task description is classified as SIMPLE or COMPLEX. SIMPLE tasks run
//! a short sequence of discovered tools (or are answered directly); COMPLEX
//! tasks are split into ordered subtasks that are executed the same way,
//! one level deeper, until a depth limit is reached.
//!
//! ## Architecture
//!
//! ```text
//!        ┌──────────────────────────────────┐
//!        │            TaskEngine            │
//!        │   (explicit stack of frames)     │
//!        └───┬───────────┬──────────────┬───┘
//!            │           │              │
//!            ▼           ▼              ▼
//!   ┌──────────────┐ ┌────────────┐ ┌───────────────┐
//!   │TaskClassifier│ │ Strategies │ │ ToolDiscovery │
//!   └──────┬───────┘ └────────────┘ └───────────────┘
//!          ▼
//!   ┌──────────────────┐     ┌───────────────────┐
//!   │ ResponseContract │ ◀── │ CompletionService │
//!   └──────────────────┘     └───────────────────┘
//! ```
//!
//! Intermediate results live in an [`ArtifactRegistry`] and are referenced
//! from tool inputs as `@name`.
//!
//! ## Modules
//! - `engine`: the control loop
//! - `classifier`: SIMPLE / COMPLEX classification
//! - `contract`: JSON schema contracts for model output
//! - `artifacts`: named intermediate results
//! - `strategy`: per-task guidance
//! - `llm`: completion service abstraction and OpenRouter client
//! - `tools`: tool trait, discovery and built-in tools

pub mod artifacts;
pub mod classifier;
pub mod config;
pub mod contract;
pub mod engine;
pub mod error;
pub mod llm;
pub mod strategy;
pub mod task;
pub mod tools;
pub mod util;

#[cfg(test)]
mod test_support;

pub use artifacts::{Artifact, ArtifactRegistry, ArtifactSpec};
pub use classifier::TaskClassifier;
pub use config::{Config, EngineConfig};
pub use contract::ResponseContract;
pub use engine::TaskEngine;
pub use error::{EngineError, SetupError};
pub use llm::{CompletionService, OpenRouterCompletion};
pub use strategy::{Strategy, StrategyKind, StrategyRegistry};
pub use task::{ExecutionResult, Task, TerminalReason};
pub use tools::{Tool, ToolDiscovery, ToolRegistry};
