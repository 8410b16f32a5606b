//! Fire-and-forget audit trail
//!
//! Recording never blocks and never fails the caller. Delivery to durable
//! storage or to notification transports happens outside the core.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};

/// One auditable action
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Dotted action name, e.g. `tool.execution.completed`
    pub action: String,
    pub actor: String,
    pub resource_type: String,
    pub resource_id: String,
    #[serde(default)]
    pub details: serde_json::Value,
    pub at: DateTime<Utc>,
}

impl AuditEvent {
    pub fn new(
        action: impl Into<String>,
        actor: impl Into<String>,
        resource_type: impl Into<String>,
        resource_id: impl ToString,
    ) -> Self {
        Self {
            action: action.into(),
            actor: actor.into(),
            resource_type: resource_type.into(),
            resource_id: resource_id.to_string(),
            details: serde_json::Value::Null,
            at: Utc::now(),
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }
}

pub trait AuditSink: Send + Sync {
    fn record(&self, event: AuditEvent);
}

/// Writes events to the `audit` tracing target
#[derive(Debug, Default, Clone)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, event: AuditEvent) {
        info!(
            target: "audit",
            action = %event.action,
            actor = %event.actor,
            resource_type = %event.resource_type,
            resource_id = %event.resource_id,
            details = %event.details,
            "audit event"
        );
    }
}

/// Forwards events to a consumer task over an unbounded channel
#[derive(Debug, Clone)]
pub struct ChannelAuditSink {
    sender: mpsc::UnboundedSender<AuditEvent>,
}

impl ChannelAuditSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<AuditEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl AuditSink for ChannelAuditSink {
    fn record(&self, event: AuditEvent) {
        if let Err(e) = self.sender.send(event) {
            warn!("Audit consumer gone, dropping event: action={}", e.0.action);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_channel_sink_delivers() {
        let (sink, mut rx) = ChannelAuditSink::new();
        sink.record(
            AuditEvent::new("tool.execution.submitted", "alice", "tool_execution", 42)
                .with_details(serde_json::json!({ "cached": false })),
        );

        let event = rx.recv().await.unwrap();
        assert_eq!(event.action, "tool.execution.submitted");
        assert_eq!(event.resource_id, "42");
        assert_eq!(event.details["cached"], false);
    }

    #[test]
    fn test_channel_sink_tolerates_closed_receiver() {
        let (sink, rx) = ChannelAuditSink::new();
        drop(rx);
        sink.record(AuditEvent::new("noop", "system", "none", "-"));
    }
}
