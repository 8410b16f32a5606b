//! One user turn of a conversation
//!
//! Persists the user message, fits the history to the model's window, calls
//! the routed provider and persists the reply.

use crate::audit::{AuditEvent, AuditSink};
use crate::context::{
    ChatMessage, ContextStats, ContextWindowManager, ContextWindowSnapshot, Conversation, Message,
};
use crate::error::{CoreError, Result};
use crate::metrics::Metrics;
use crate::providers::{Completion, CompletionRequest, ProviderRegistry};
use crate::storage::MessageStore;
use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Result of a completed turn
#[derive(Debug, Clone, Serialize)]
pub struct ChatTurn {
    pub user_message: Message,
    pub assistant_message: Message,
    pub context: ContextStats,
    pub truncated: bool,
    pub completion: Completion,
}

pub struct ChatService {
    store: Arc<dyn MessageStore>,
    context: Arc<ContextWindowManager>,
    providers: Arc<ProviderRegistry>,
    audit: Arc<dyn AuditSink>,
    max_history: Option<usize>,
    max_completion_tokens: Option<u32>,
    metrics: Option<Arc<Metrics>>,
}

impl ChatService {
    pub fn new(
        store: Arc<dyn MessageStore>,
        context: Arc<ContextWindowManager>,
        providers: Arc<ProviderRegistry>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            store,
            context,
            providers,
            audit,
            max_history: None,
            max_completion_tokens: None,
            metrics: None,
        }
    }

    pub fn with_max_history(mut self, max_history: Option<usize>) -> Self {
        self.max_history = max_history;
        self
    }

    pub fn with_max_completion_tokens(mut self, max_tokens: u32) -> Self {
        self.max_completion_tokens = Some(max_tokens);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub async fn start_conversation(
        &self,
        participant_id: &str,
        model_id: &str,
    ) -> Result<Conversation> {
        self.providers.resolve(model_id)?;
        let conversation = Conversation::new(participant_id, model_id);
        self.store.insert_conversation(&conversation).await?;

        self.audit.record(
            AuditEvent::new(
                "chat.conversation.created",
                participant_id,
                "conversation",
                conversation.id,
            )
            .with_details(json!({ "model_id": model_id })),
        );
        Ok(conversation)
    }

    /// Conversation owned by `participant_id`; others get `NotFound`
    pub async fn get_conversation(
        &self,
        conversation_id: Uuid,
        participant_id: &str,
    ) -> Result<Conversation> {
        self.store
            .get_conversation(conversation_id)
            .await?
            .filter(|c| c.participant_id == participant_id)
            .ok_or_else(|| CoreError::not_found("conversation", conversation_id))
    }

    pub async fn send_message(
        &self,
        conversation_id: Uuid,
        participant_id: &str,
        content: &str,
    ) -> Result<ChatTurn> {
        if content.trim().is_empty() {
            return Err(CoreError::Validation("Message content cannot be empty".to_string()));
        }

        let mut conversation = self.get_conversation(conversation_id, participant_id).await?;
        let route = self.providers.resolve(&conversation.model_id)?;

        let user_message = Message::new(
            conversation.id,
            ChatMessage::user(content),
            self.context.estimate_tokens(content),
        );
        self.store.append_message(&user_message).await?;
        self.audit.record(AuditEvent::new(
            "chat.message.sent",
            participant_id,
            "message",
            user_message.id,
        ));

        let history = self.store.messages(conversation.id).await?;
        let budget = self
            .context
            .limits()
            .budget_with_cap(&conversation.model_id, conversation.max_context_tokens);
        let prepared = self
            .context
            .prepare_for_model(&history, &budget, true, self.max_history);

        if prepared.truncated {
            info!(
                "Context truncated: conversation_id={}, removed_tokens={}, kept={}",
                conversation.id, prepared.tokens_removed, prepared.stats.message_count
            );
        }

        let now = Utc::now();
        conversation.context_window = Some(ContextWindowSnapshot {
            total_tokens: prepared.stats.total_tokens,
            message_count: prepared.stats.message_count,
            utilization_percent: prepared.stats.utilization_percent,
            truncated: prepared.truncated,
            computed_at: now,
        });
        conversation.updated_at = now;
        self.store.update_conversation(&conversation).await?;

        let request = CompletionRequest {
            model: route.upstream_model.clone(),
            messages: prepared.messages,
            temperature: conversation.temperature,
            max_tokens: self.max_completion_tokens,
        };

        let provider_name = route.provider.name().to_string();
        let completion = match route.provider.complete(&request).await {
            Ok(completion) => {
                if let Some(metrics) = &self.metrics {
                    metrics.record_provider_request(&provider_name, true);
                }
                completion
            }
            Err(e) => {
                error!(
                    "Completion failed: conversation_id={}, provider={}, error={}",
                    conversation.id, provider_name, e
                );
                if let Some(metrics) = &self.metrics {
                    metrics.record_provider_request(&provider_name, false);
                }
                self.audit.record(
                    AuditEvent::new(
                        "chat.message.failed",
                        participant_id,
                        "conversation",
                        conversation.id,
                    )
                    .with_details(json!({ "provider": provider_name, "error": e.to_string() })),
                );
                return Err(e.into());
            }
        };

        if completion.content.is_empty() {
            warn!("Provider returned an empty reply: conversation_id={}", conversation.id);
        }

        let reply_tokens = completion
            .completion_tokens
            .unwrap_or_else(|| self.context.estimate_tokens(&completion.content));
        let assistant_message = Message::new(
            conversation.id,
            ChatMessage::assistant(completion.content.clone()),
            reply_tokens,
        );
        self.store.append_message(&assistant_message).await?;

        self.audit.record(
            AuditEvent::new(
                "chat.message.completed",
                participant_id,
                "message",
                assistant_message.id,
            )
            .with_details(json!({
                "provider": provider_name,
                "model": completion.model,
                "context_tokens": prepared.stats.total_tokens,
                "truncated": prepared.truncated,
            })),
        );

        Ok(ChatTurn {
            user_message,
            assistant_message,
            context: prepared.stats,
            truncated: prepared.truncated,
            completion,
        })
    }
}
