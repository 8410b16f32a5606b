//! Tool execution lifecycle: submission, approval gating, running, caching
//!
//! Flow for one submission:
//! 1. inactive tools and malformed input are refused up front
//! 2. a live cache entry short-circuits everything into a COMPLETED execution
//! 3. otherwise the execution starts PENDING; approval-gated tools wait for
//!    [`ToolExecutionStateMachine::resolve_approval`], the rest go to RUNNING
//! 4. RUNNING executions are handed to the [`ExecutionQueue`] and run in the
//!    background by [`ToolExecutionStateMachine::execute`]
//!
//! Approval expiry is checked lazily on every read so that a lapsed approval
//! can never be acted on, whether or not an external sweep has run.

use super::cache_key::{hash_input, CacheKey};
use super::models::*;
use super::queue::{ExecutionJob, ExecutionQueue};
use super::runner::{ToolContext, ToolRunner};
use crate::audit::{AuditEvent, AuditSink};
use crate::config::ToolsConfig;
use crate::error::{CoreError, Result};
use crate::metrics::Metrics;
use crate::storage::{StorageError, ToolStore};
use chrono::Utc;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

pub struct ToolExecutionStateMachine {
    store: Arc<dyn ToolStore>,
    runner: Arc<dyn ToolRunner>,
    queue: Arc<ExecutionQueue>,
    metrics: Arc<Metrics>,
    audit: Arc<dyn AuditSink>,
    config: ToolsConfig,
}

impl ToolExecutionStateMachine {
    pub fn new(
        store: Arc<dyn ToolStore>,
        runner: Arc<dyn ToolRunner>,
        queue: Arc<ExecutionQueue>,
        metrics: Arc<Metrics>,
        audit: Arc<dyn AuditSink>,
        config: ToolsConfig,
    ) -> Self {
        Self {
            store,
            runner,
            queue,
            metrics,
            audit,
            config,
        }
    }

    pub fn queue(&self) -> &Arc<ExecutionQueue> {
        &self.queue
    }

    /// Request a tool run.
    ///
    /// Returns COMPLETED (cache hit), PENDING (awaiting approval) or RUNNING
    /// (queued for background execution).
    pub async fn submit(
        &self,
        tool_id: Uuid,
        requester_id: &str,
        input_data: Value,
    ) -> Result<ToolExecution> {
        let tool = self.load_tool(tool_id).await?;
        if !tool.is_active() {
            return Err(CoreError::ToolInactive(tool.name));
        }
        validate_input(&tool, &input_data)?;

        let key = CacheKey::compute(tool.id, &input_data);
        if let Some(entry) = self.store.get_cache_entry(&key.key).await? {
            if entry.is_live(Utc::now()) {
                return self.serve_from_cache(&tool, requester_id, input_data, entry).await;
            }
        }

        let mut execution = ToolExecution::new(&tool, requester_id, input_data, key.key);

        if tool.requires_approval {
            let approval =
                ToolApproval::new(execution.id, requester_id, self.config.approval_ttl());
            execution.approval_id = Some(approval.id);
            self.store.insert_execution(&execution).await?;
            self.store.insert_approval(&approval).await?;

            info!(
                "Tool execution awaiting approval: execution_id={}, tool={}, approval_id={}",
                execution.id, tool.name, approval.id
            );
            self.metrics.record_tool_submission("pending_approval");
            self.audit.record(
                AuditEvent::new(
                    "tool.approval.requested",
                    requester_id,
                    "tool_execution",
                    execution.id,
                )
                .with_details(json!({
                    "tool_id": tool.id,
                    "approval_id": approval.id,
                    "expires_at": approval.expires_at,
                })),
            );
        } else {
            execution.transition(ExecutionStatus::Running)?;
            self.store.insert_execution(&execution).await?;
            self.queue.enqueue(execution.id);

            info!(
                "Tool execution queued: execution_id={}, tool={}",
                execution.id, tool.name
            );
            self.metrics.record_tool_submission("running");
            self.audit.record(
                AuditEvent::new(
                    "tool.execution.submitted",
                    requester_id,
                    "tool_execution",
                    execution.id,
                )
                .with_details(json!({ "tool_id": tool.id })),
            );
        }

        Ok(execution)
    }

    async fn serve_from_cache(
        &self,
        tool: &ToolDefinition,
        requester_id: &str,
        input_data: Value,
        entry: ToolCacheEntry,
    ) -> Result<ToolExecution> {
        let now = Utc::now();
        self.store.record_cache_hit(&entry.cache_key, now).await?;

        // Cached output was produced by an earlier, already-authorized run, so
        // the approval gate does not apply.
        let mut execution = ToolExecution::new(tool, requester_id, input_data, entry.cache_key);
        execution.requires_approval = false;
        execution.status = ExecutionStatus::Completed;
        execution.cached = true;
        execution.output_data = Some(entry.output_data);
        execution.execution_time_ms = Some(0);
        execution.started_at = Some(now);
        execution.completed_at = Some(now);
        self.store.insert_execution(&execution).await?;

        debug!(
            "Tool cache hit: execution_id={}, tool={}, key={}",
            execution.id, tool.name, execution.cache_key
        );
        self.metrics.record_tool_submission("cache_hit");
        self.audit.record(
            AuditEvent::new(
                "tool.execution.cache_hit",
                requester_id,
                "tool_execution",
                execution.id,
            )
            .with_details(json!({ "tool_id": tool.id })),
        );
        Ok(execution)
    }

    /// Approve or reject a pending approval.
    ///
    /// An approval whose window has lapsed is marked expired, its execution is
    /// cancelled, and the call fails with a validation error.
    pub async fn resolve_approval(
        &self,
        approval_id: Uuid,
        decision: ApprovalDecision,
        approver: &str,
    ) -> Result<ToolExecution> {
        let mut approval = self
            .store
            .get_approval(approval_id)
            .await?
            .ok_or_else(|| CoreError::not_found("approval", approval_id))?;

        if approval.status != ApprovalStatus::Pending {
            return Err(CoreError::AlreadyResolved(approval.id));
        }
        if self.expire_if_lapsed(&mut approval).await? {
            return Err(CoreError::Validation(format!(
                "Approval {} expired at {}",
                approval.id, approval.expires_at
            )));
        }

        let mut execution = self.load_execution(approval.execution_id).await?;
        if execution.status != ExecutionStatus::Pending {
            return Err(CoreError::AlreadyResolved(approval.id));
        }

        let status = match decision {
            ApprovalDecision::Approved => ApprovalStatus::Approved,
            ApprovalDecision::Rejected => ApprovalStatus::Rejected,
        };
        approval.resolve(status, Some(approver.to_string()), None);
        if !self
            .store
            .update_approval_if(&approval, ApprovalStatus::Pending)
            .await?
        {
            debug!(
                "Approval resolved concurrently: approval_id={}, approver={}",
                approval.id, approver
            );
            return Err(CoreError::AlreadyResolved(approval.id));
        }

        match decision {
            ApprovalDecision::Approved => {
                execution.transition(ExecutionStatus::Approved)?;
                execution.transition(ExecutionStatus::Running)?;
                self.commit_execution(&execution, ExecutionStatus::Pending).await?;
                self.queue.enqueue(execution.id);

                info!(
                    "Approval granted: approval_id={}, execution_id={}, approver={}",
                    approval.id, execution.id, approver
                );
                self.metrics.record_approval("approved");
            }
            ApprovalDecision::Rejected => {
                execution.transition(ExecutionStatus::Rejected)?;
                execution.error_message = Some(format!("Execution rejected by {}", approver));
                self.commit_execution(&execution, ExecutionStatus::Pending).await?;

                info!(
                    "Approval rejected: approval_id={}, execution_id={}, approver={}",
                    approval.id, execution.id, approver
                );
                self.metrics.record_approval("rejected");
            }
        }

        self.audit.record(
            AuditEvent::new("tool.approval.resolved", approver, "tool_approval", approval.id)
                .with_details(json!({
                    "execution_id": execution.id,
                    "decision": decision,
                })),
        );
        Ok(execution)
    }

    /// Run a RUNNING execution's tool body and record the outcome.
    ///
    /// Executions in any other state are returned untouched, which makes
    /// redelivered queue jobs harmless.
    pub async fn execute(&self, execution_id: Uuid) -> Result<ToolExecution> {
        let mut execution = self.load_execution(execution_id).await?;
        if execution.status != ExecutionStatus::Running {
            debug!(
                "Skipping execution not in running state: execution_id={}, status={}",
                execution.id, execution.status
            );
            return Ok(execution);
        }

        let tool = self.load_tool(execution.tool_id).await?;
        execution.started_at = Some(Utc::now());
        if !self
            .store
            .update_execution_if(&execution, ExecutionStatus::Running)
            .await?
        {
            return self.load_execution(execution_id).await;
        }

        let ctx = ToolContext {
            execution_id: execution.id,
            requester_id: execution.requester_id.clone(),
            timeout: Duration::from_secs(tool.timeout_seconds),
        };

        let started = Instant::now();
        let outcome = self.runner.run(&tool, &execution.input_data, &ctx).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;
        execution.execution_time_ms = Some(elapsed_ms);

        let output = match outcome {
            Ok(output) => {
                execution.output_data = Some(output.clone());
                execution.transition(ExecutionStatus::Completed)?;
                Some(output)
            }
            Err(e) => {
                execution.error_message = Some(e.to_string());
                execution.transition(ExecutionStatus::Failed)?;
                None
            }
        };

        if !self
            .store
            .update_execution_if(&execution, ExecutionStatus::Running)
            .await?
        {
            debug!("Execution finished by another worker: execution_id={}", execution.id);
            return self.load_execution(execution_id).await;
        }

        self.store
            .record_tool_outcome(tool.id, output.is_some(), elapsed_ms)
            .await?;
        match output {
            Some(output) => {
                self.write_cache(&tool, &execution, output).await;
                info!(
                    "Tool execution completed: execution_id={}, tool={}, elapsed_ms={}",
                    execution.id, tool.name, elapsed_ms
                );
            }
            None => {
                warn!(
                    "Tool execution failed: execution_id={}, tool={}, error={}",
                    execution.id,
                    tool.name,
                    execution.error_message.as_deref().unwrap_or_default()
                );
            }
        }

        self.metrics
            .record_tool_execution(execution.status.as_str(), elapsed_ms);
        self.audit.record(
            AuditEvent::new(
                format!("tool.execution.{}", execution.status),
                execution.requester_id.clone(),
                "tool_execution",
                execution.id,
            )
            .with_details(json!({
                "tool_id": tool.id,
                "execution_time_ms": elapsed_ms,
            })),
        );
        Ok(execution)
    }

    async fn write_cache(&self, tool: &ToolDefinition, execution: &ToolExecution, output: Value) {
        let now = Utc::now();
        let entry = ToolCacheEntry {
            cache_key: execution.cache_key.clone(),
            tool_id: tool.id,
            input_hash: hash_input(&execution.input_data),
            output_data: output,
            hit_count: 0,
            expires_at: Some(now + self.config.cache_ttl()),
            created_at: now,
            last_hit_at: None,
        };

        match self.store.insert_cache_entry(entry).await {
            Ok(()) => self.metrics.record_cache_write("written"),
            Err(StorageError::UniqueViolation(_)) => {
                // A concurrent run of the same input got there first.
                let existing = self.store.get_cache_entry(&execution.cache_key).await;
                debug!(
                    "Cache entry already present: key={}, readable={}",
                    execution.cache_key,
                    matches!(existing, Ok(Some(_)))
                );
                self.metrics.record_cache_write("race");
            }
            Err(e) => {
                warn!(
                    "Failed to write tool cache entry: key={}, error={}",
                    execution.cache_key, e
                );
                self.metrics.record_cache_write("error");
            }
        }
    }

    /// Take one job off the queue, if any, and run it
    pub async fn process_next(&self) -> Result<Option<ToolExecution>> {
        match self.queue.try_next().await {
            Some(job) => self.handle_job(job).await.map(Some),
            None => Ok(None),
        }
    }

    /// Execute a delivered job, acking on success and nacking on error
    pub async fn handle_job(&self, job: ExecutionJob) -> Result<ToolExecution> {
        match self.execute(job.execution_id).await {
            Ok(execution) => {
                self.queue.ack(job.execution_id);
                Ok(execution)
            }
            Err(e) => {
                warn!(
                    "Execution job errored: execution_id={}, attempt={}, error={}",
                    job.execution_id, job.attempt, e
                );
                self.queue.nack(job);
                Err(e)
            }
        }
    }

    /// Cancel an execution that has not started running
    pub async fn cancel(&self, execution_id: Uuid, actor: &str) -> Result<ToolExecution> {
        let mut execution = self.load_execution(execution_id).await?;
        let previous = execution.status;
        execution.transition(ExecutionStatus::Cancelled)?;
        execution.error_message = Some(format!("Execution cancelled by {}", actor));

        // A pending execution's approval is closed first so that a concurrent
        // decision on it loses.
        if let (ExecutionStatus::Pending, Some(approval_id)) = (previous, execution.approval_id) {
            if let Some(mut approval) = self.store.get_approval(approval_id).await? {
                approval.resolve(
                    ApprovalStatus::Rejected,
                    Some(actor.to_string()),
                    Some("execution cancelled".to_string()),
                );
                if !self
                    .store
                    .update_approval_if(&approval, ApprovalStatus::Pending)
                    .await?
                {
                    return Err(CoreError::AlreadyResolved(approval.id));
                }
            }
        }
        self.commit_execution(&execution, previous).await?;

        info!("Tool execution cancelled: execution_id={}, actor={}", execution.id, actor);
        self.audit.record(AuditEvent::new(
            "tool.execution.cancelled",
            actor,
            "tool_execution",
            execution.id,
        ));
        Ok(execution)
    }

    /// Read an execution, applying approval expiry first
    pub async fn get_execution(&self, execution_id: Uuid) -> Result<ToolExecution> {
        let execution = self.load_execution(execution_id).await?;
        if execution.status != ExecutionStatus::Pending {
            return Ok(execution);
        }
        let Some(approval_id) = execution.approval_id else {
            return Ok(execution);
        };
        if let Some(mut approval) = self.store.get_approval(approval_id).await? {
            if self.expire_if_lapsed(&mut approval).await? {
                return self.load_execution(execution_id).await;
            }
        }
        Ok(execution)
    }

    /// Read an approval, applying expiry first
    pub async fn get_approval(&self, approval_id: Uuid) -> Result<ToolApproval> {
        let mut approval = self
            .store
            .get_approval(approval_id)
            .await?
            .ok_or_else(|| CoreError::not_found("approval", approval_id))?;
        self.expire_if_lapsed(&mut approval).await?;
        Ok(approval)
    }

    /// Expire every lapsed pending approval; returns how many were expired.
    ///
    /// Optional: expiry is also enforced on read.
    pub async fn expire_pending_approvals(&self) -> Result<usize> {
        let mut expired = 0;
        for mut approval in self.store.pending_approvals().await? {
            if self.expire_if_lapsed(&mut approval).await? {
                expired += 1;
            }
        }
        if expired > 0 {
            info!("Expired {} lapsed approvals", expired);
        }
        Ok(expired)
    }

    pub async fn tool_statistics(&self, tool_id: Uuid) -> Result<ToolStatistics> {
        Ok(self.load_tool(tool_id).await?.statistics())
    }

    /// Mark a lapsed approval expired and cancel its execution.
    async fn expire_if_lapsed(&self, approval: &mut ToolApproval) -> Result<bool> {
        if !approval.has_lapsed(Utc::now()) {
            return Ok(false);
        }

        let mut expired = approval.clone();
        expired.resolve(
            ApprovalStatus::Expired,
            None,
            Some("approval window elapsed".to_string()),
        );
        if !self
            .store
            .update_approval_if(&expired, ApprovalStatus::Pending)
            .await?
        {
            if let Some(current) = self.store.get_approval(approval.id).await? {
                *approval = current;
            }
            return Ok(false);
        }
        *approval = expired;

        if let Some(mut execution) = self.store.get_execution(approval.execution_id).await? {
            if execution.status == ExecutionStatus::Pending {
                execution.transition(ExecutionStatus::Cancelled)?;
                execution.error_message = Some("Approval expired".to_string());
                if !self
                    .store
                    .update_execution_if(&execution, ExecutionStatus::Pending)
                    .await?
                {
                    debug!("Execution moved before expiry: execution_id={}", execution.id);
                }
            }
        }

        warn!(
            "Approval expired: approval_id={}, execution_id={}",
            approval.id, approval.execution_id
        );
        self.metrics.record_approval("expired");
        self.audit.record(AuditEvent::new(
            "tool.approval.expired",
            "system",
            "tool_approval",
            approval.id,
        ));
        Ok(true)
    }

    /// Write `execution` if the stored copy is still `expected`
    async fn commit_execution(
        &self,
        execution: &ToolExecution,
        expected: ExecutionStatus,
    ) -> Result<()> {
        if self.store.update_execution_if(execution, expected).await? {
            return Ok(());
        }
        let current = self.load_execution(execution.id).await?;
        Err(CoreError::InvalidTransition {
            from: current.status,
            to: execution.status,
        })
    }

    async fn load_tool(&self, tool_id: Uuid) -> Result<ToolDefinition> {
        self.store
            .get_tool(tool_id)
            .await?
            .ok_or_else(|| CoreError::not_found("tool", tool_id))
    }

    async fn load_execution(&self, execution_id: Uuid) -> Result<ToolExecution> {
        self.store
            .get_execution(execution_id)
            .await?
            .ok_or_else(|| CoreError::not_found("execution", execution_id))
    }
}

/// Input must be an object carrying every field the schema marks required
fn validate_input(tool: &ToolDefinition, input: &Value) -> Result<()> {
    let object = input.as_object().ok_or_else(|| {
        CoreError::Validation(format!("Input for tool '{}' must be a JSON object", tool.name))
    })?;

    let missing: Vec<&str> = tool
        .required_fields()
        .into_iter()
        .filter(|field| !object.contains_key(*field))
        .collect();

    if !missing.is_empty() {
        return Err(CoreError::Validation(format!(
            "Missing required fields for tool '{}': {}",
            tool.name,
            missing.join(", ")
        )));
    }
    Ok(())
}
