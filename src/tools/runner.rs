//! Tool body execution
//!
//! The state machine only knows the [`ToolRunner`] contract. [`HandlerRunner`]
//! is the default runner: it dispatches on the tool name to a registered
//! [`ToolHandler`] and enforces the tool's timeout.

use super::models::ToolDefinition;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

/// Per-invocation context handed to the tool body
#[derive(Clone, Debug)]
pub struct ToolContext {
    pub execution_id: Uuid,
    pub requester_id: String,
    pub timeout: Duration,
}

/// Errors a tool body can end with
#[derive(Error, Debug)]
pub enum ToolError {
    #[error("Execution error: {0}")]
    Exec(String),

    #[error("Invalid input: {0}")]
    Invalid(String),

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("No handler registered for tool '{0}'")]
    HandlerNotFound(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Runs a tool body; owns timeout enforcement
#[async_trait]
pub trait ToolRunner: Send + Sync {
    async fn run(
        &self,
        tool: &ToolDefinition,
        input: &Value,
        ctx: &ToolContext,
    ) -> Result<Value, ToolError>;
}

/// Implementation of one named tool
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Must match `ToolDefinition::name`
    fn name(&self) -> &str;

    async fn invoke(&self, input: Value, ctx: &ToolContext) -> Result<Value, ToolError>;

    fn validate_input(&self, _input: &Value) -> Result<(), ToolError> {
        Ok(())
    }
}

/// Runner dispatching to registered handlers by tool name
#[derive(Default)]
pub struct HandlerRunner {
    handlers: HashMap<String, Arc<dyn ToolHandler>>,
}

impl HandlerRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, handler: Arc<dyn ToolHandler>) {
        let name = handler.name().to_string();
        if self.handlers.insert(name.clone(), handler).is_some() {
            warn!("Replacing handler for tool '{}'", name);
        }
    }

    pub fn with_handler(mut self, handler: Arc<dyn ToolHandler>) -> Self {
        self.register(handler);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn ToolHandler>> {
        self.handlers.get(name)
    }

    pub fn list(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.handlers.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }
}

#[async_trait]
impl ToolRunner for HandlerRunner {
    async fn run(
        &self,
        tool: &ToolDefinition,
        input: &Value,
        ctx: &ToolContext,
    ) -> Result<Value, ToolError> {
        let handler = self
            .handlers
            .get(&tool.name)
            .ok_or_else(|| ToolError::HandlerNotFound(tool.name.clone()))?;

        handler.validate_input(input)?;

        debug!(
            "Invoking tool handler: tool={}, execution_id={}, timeout={:?}",
            tool.name, ctx.execution_id, ctx.timeout
        );

        tokio::time::timeout(ctx.timeout, handler.invoke(input.clone(), ctx))
            .await
            .map_err(|_| ToolError::Timeout(ctx.timeout))?
    }
}
