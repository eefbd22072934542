//! Task module - tasks, decomposition plans and execution results.
//!
//! - All types use algebraic data types with exhaustive matching
//! - Invariants are documented and enforced in constructors

mod result;
mod subtask;
pub mod task;

pub use result::{ExecutionResult, TerminalReason, ToolCallRecord};
pub use subtask::{DecompositionPlan, DecompositionPlanError, Subtask};
pub use task::{Task, TaskError, TaskId, TaskStatus};
