//! Tool registry, execution, approval and cache records

use crate::error::CoreError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Availability of a tool definition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolStatus {
    Active,
    Inactive,
    Deprecated,
}

/// Lifecycle of a single tool invocation
///
/// `Pending -> {Approved -> Running -> {Completed | Failed}, Rejected}` with
/// `Cancelled` reachable from `Pending` and `Approved`. Executions that skip
/// the approval gate go straight from `Pending` to `Running`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Pending,
    Approved,
    Rejected,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Rejected | Self::Cancelled
        )
    }

    pub fn can_transition_to(&self, next: ExecutionStatus) -> bool {
        use ExecutionStatus::*;
        matches!(
            (self, next),
            (Pending, Approved)
                | (Pending, Rejected)
                | (Pending, Running)
                | (Pending, Cancelled)
                | (Approved, Running)
                | (Approved, Cancelled)
                | (Running, Completed)
                | (Running, Failed)
        )
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State of a human approval request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
    Expired,
}

/// Decision an approver can take on a pending approval
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalDecision {
    Approved,
    Rejected,
}

impl FromStr for ApprovalDecision {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "approved" | "approve" => Ok(Self::Approved),
            "rejected" | "reject" => Ok(Self::Rejected),
            other => Err(CoreError::Validation(format!(
                "Unknown approval decision: {}",
                other
            ))),
        }
    }
}

/// Registered tool with its running statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    /// JSON schema for the input; only `required` is enforced
    pub input_schema: serde_json::Value,
    pub requires_approval: bool,
    pub status: ToolStatus,
    pub timeout_seconds: u64,
    pub execution_count: u64,
    pub success_count: u64,
    pub failure_count: u64,
    /// Mean duration of successful runs only
    pub avg_execution_time_ms: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ToolDefinition {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            description: description.into(),
            input_schema: serde_json::json!({ "type": "object" }),
            requires_approval: false,
            status: ToolStatus::Active,
            timeout_seconds: 30,
            execution_count: 0,
            success_count: 0,
            failure_count: 0,
            avg_execution_time_ms: 0.0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_approval(mut self, requires_approval: bool) -> Self {
        self.requires_approval = requires_approval;
        self
    }

    pub fn with_input_schema(mut self, schema: serde_json::Value) -> Self {
        self.input_schema = schema;
        self
    }

    pub fn with_timeout(mut self, timeout_seconds: u64) -> Self {
        self.timeout_seconds = timeout_seconds;
        self
    }

    pub fn with_status(mut self, status: ToolStatus) -> Self {
        self.status = status;
        self
    }

    pub fn is_active(&self) -> bool {
        self.status == ToolStatus::Active
    }

    /// Field names listed under `input_schema.required`
    pub fn required_fields(&self) -> Vec<&str> {
        self.input_schema
            .get("required")
            .and_then(|r| r.as_array())
            .map(|fields| fields.iter().filter_map(|f| f.as_str()).collect())
            .unwrap_or_default()
    }

    /// Fold one finished run into the statistics.
    ///
    /// The running average covers successful runs only and is weighted by
    /// `success_count`.
    pub fn record_outcome(&mut self, success: bool, elapsed_ms: u64) {
        self.execution_count += 1;
        if success {
            self.success_count += 1;
            let n = self.success_count as f64;
            self.avg_execution_time_ms = if self.success_count == 1 {
                elapsed_ms as f64
            } else {
                (self.avg_execution_time_ms * (n - 1.0) + elapsed_ms as f64) / n
            };
        } else {
            self.failure_count += 1;
        }
        self.updated_at = Utc::now();
    }

    pub fn statistics(&self) -> ToolStatistics {
        let success_rate = if self.execution_count > 0 {
            self.success_count as f64 / self.execution_count as f64 * 100.0
        } else {
            0.0
        };
        ToolStatistics {
            tool_id: self.id,
            name: self.name.clone(),
            execution_count: self.execution_count,
            success_count: self.success_count,
            failure_count: self.failure_count,
            success_rate,
            avg_execution_time_ms: self.avg_execution_time_ms,
        }
    }
}

/// Snapshot of a tool's counters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolStatistics {
    pub tool_id: Uuid,
    pub name: String,
    pub execution_count: u64,
    pub success_count: u64,
    pub failure_count: u64,
    /// Percentage in `0.0..=100.0`
    pub success_rate: f64,
    pub avg_execution_time_ms: f64,
}

/// One invocation of a tool
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolExecution {
    pub id: Uuid,
    pub tool_id: Uuid,
    pub requester_id: String,
    pub status: ExecutionStatus,
    pub input_data: serde_json::Value,
    pub cache_key: String,
    pub output_data: Option<serde_json::Value>,
    pub error_message: Option<String>,
    pub requires_approval: bool,
    pub approval_id: Option<Uuid>,
    /// Served from the result cache without running the tool
    pub cached: bool,
    pub execution_time_ms: Option<u64>,
    /// Informational; resubmission is always a new execution
    pub retry_count: u32,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl ToolExecution {
    pub fn new(
        tool: &ToolDefinition,
        requester_id: impl Into<String>,
        input_data: serde_json::Value,
        cache_key: String,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            tool_id: tool.id,
            requester_id: requester_id.into(),
            status: ExecutionStatus::Pending,
            input_data,
            cache_key,
            output_data: None,
            error_message: None,
            requires_approval: tool.requires_approval,
            approval_id: None,
            cached: false,
            execution_time_ms: None,
            retry_count: 0,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    /// Move to `next`, refusing anything the lifecycle does not allow.
    pub fn transition(&mut self, next: ExecutionStatus) -> Result<(), CoreError> {
        if !self.status.can_transition_to(next) {
            return Err(CoreError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        if next.is_terminal() {
            self.completed_at = Some(Utc::now());
        }
        Ok(())
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Human approval gate paired 1:1 with an execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolApproval {
    pub id: Uuid,
    pub execution_id: Uuid,
    pub requested_by: String,
    pub approver: Option<String>,
    pub status: ApprovalStatus,
    pub note: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl ToolApproval {
    pub fn new(execution_id: Uuid, requested_by: impl Into<String>, ttl: chrono::Duration) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            execution_id,
            requested_by: requested_by.into(),
            approver: None,
            status: ApprovalStatus::Pending,
            note: None,
            expires_at: now + ttl,
            created_at: now,
            resolved_at: None,
        }
    }

    /// Still marked pending but past its window
    pub fn has_lapsed(&self, now: DateTime<Utc>) -> bool {
        self.status == ApprovalStatus::Pending && self.expires_at <= now
    }

    pub fn resolve(
        &mut self,
        status: ApprovalStatus,
        approver: Option<String>,
        note: Option<String>,
    ) {
        self.status = status;
        self.approver = approver;
        self.note = note;
        self.resolved_at = Some(Utc::now());
    }
}

/// Cached tool output keyed by tool and canonical input
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCacheEntry {
    pub cache_key: String,
    pub tool_id: Uuid,
    pub input_hash: String,
    pub output_data: serde_json::Value,
    pub hit_count: u64,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub last_hit_at: Option<DateTime<Utc>>,
}

impl ToolCacheEntry {
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(true, |expires| expires > now)
    }
}
