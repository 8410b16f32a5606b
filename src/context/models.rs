//! Data models for conversation context

use crate::error::CoreError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Author role of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Tool => "tool",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Plain role/content message as sent to a model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    /// Execution id when the message carries a tool result or call
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_reference: Option<String>,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_reference: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn tool(content: impl Into<String>, reference: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
            tool_reference: Some(reference.into()),
        }
    }

    pub fn with_tool_reference(mut self, reference: impl Into<String>) -> Self {
        self.tool_reference = Some(reference.into());
        self
    }
}

/// Persisted message; immutable once stored
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub role: Role,
    pub content: String,
    pub token_count: usize,
    pub tool_reference: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn new(conversation_id: Uuid, message: ChatMessage, token_count: usize) -> Self {
        Self {
            id: Uuid::new_v4(),
            conversation_id,
            role: message.role,
            content: message.content,
            token_count,
            tool_reference: message.tool_reference,
            created_at: Utc::now(),
        }
    }

    pub fn to_chat(&self) -> ChatMessage {
        ChatMessage {
            role: self.role,
            content: self.content.clone(),
            tool_reference: self.tool_reference.clone(),
        }
    }
}

/// Chat session owned by a single participant
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: Uuid,
    pub participant_id: String,
    pub model_id: String,
    pub temperature: f32,
    /// Overrides the model's limit when set
    pub max_context_tokens: Option<usize>,
    pub title: Option<String>,
    /// Last computed window; a cache, recomputed every turn
    pub context_window: Option<ContextWindowSnapshot>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    pub fn new(participant_id: impl Into<String>, model_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            participant_id: participant_id.into(),
            model_id: model_id.into(),
            temperature: 0.7,
            max_context_tokens: None,
            title: None,
            context_window: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Counters from the most recent context computation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextWindowSnapshot {
    pub total_tokens: usize,
    pub message_count: usize,
    pub utilization_percent: f64,
    pub truncated: bool,
    pub computed_at: DateTime<Utc>,
}

/// How to shrink a history that does not fit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TruncationStrategy {
    #[default]
    Sliding,
    Smart,
    /// Currently the same as `Smart`; no semantic compression happens
    Summary,
}

impl TruncationStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sliding => "sliding",
            Self::Smart => "smart",
            Self::Summary => "summary",
        }
    }
}

impl FromStr for TruncationStrategy {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sliding" => Ok(Self::Sliding),
            "smart" => Ok(Self::Smart),
            "summary" => Ok(Self::Summary),
            other => Err(CoreError::Validation(format!(
                "Unknown truncation strategy: {}",
                other
            ))),
        }
    }
}

/// Utilization report for a message list against one model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextStats {
    pub model_id: String,
    pub total_tokens: usize,
    pub max_tokens: usize,
    pub available_tokens: usize,
    pub utilization_percent: f64,
    pub fits: bool,
    pub message_count: usize,
}
