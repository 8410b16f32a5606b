//! Tool execution governance
//!
//! Decides whether a tool invocation runs immediately, waits for human
//! approval, or is answered from the result cache, and drives it through its
//! lifecycle to a terminal state.

pub mod cache_key;
pub mod models;
pub mod queue;
pub mod runner;
pub mod state_machine;
pub mod worker;

pub use cache_key::{canonical_json, CacheKey};
pub use models::{
    ApprovalDecision, ApprovalStatus, ExecutionStatus, ToolApproval, ToolCacheEntry,
    ToolDefinition, ToolExecution, ToolStatistics, ToolStatus,
};
pub use queue::{ExecutionJob, ExecutionQueue};
pub use runner::{HandlerRunner, ToolContext, ToolError, ToolHandler, ToolRunner};
pub use state_machine::ToolExecutionStateMachine;
pub use worker::{spawn_workers, ExecutionWorker};
