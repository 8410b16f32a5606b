//! Context window manager
//!
//! Fits an ordered message history into a model's token budget:
//! - each message costs `estimate(content) + per_message_overhead`
//! - the budget is the model's size minus the response reserve
//! - when the history does not fit, a truncation strategy picks what stays
//!
//! System messages survive every strategy. If the protected messages alone
//! exceed the budget they are still returned; callers see `fits == false` in
//! the stats rather than losing instructions.

use super::budget::{ModelLimits, TokenBudget};
use super::models::{ChatMessage, ContextStats, Message, Role, TruncationStrategy};
use super::token_estimator::TokenEstimator;
use crate::config::ContextConfig;
use crate::metrics::Metrics;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

/// Output of [`ContextWindowManager::prepare_for_model`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreparedContext {
    pub messages: Vec<ChatMessage>,
    pub stats: ContextStats,
    pub truncated: bool,
    pub tokens_removed: usize,
}

/// Result of a truncation pass
#[derive(Debug, Clone, PartialEq)]
pub struct Truncation {
    pub messages: Vec<ChatMessage>,
    pub tokens_removed: usize,
}

pub struct ContextWindowManager {
    estimator: Arc<dyn TokenEstimator>,
    limits: ModelLimits,
    per_message_overhead: usize,
    default_system_prompt: String,
    metrics: Option<Arc<Metrics>>,
}

impl ContextWindowManager {
    pub fn new(config: &ContextConfig, estimator: Arc<dyn TokenEstimator>) -> Self {
        Self {
            estimator,
            limits: ModelLimits::new(config),
            per_message_overhead: config.per_message_overhead,
            default_system_prompt: config.default_system_prompt.clone(),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn limits(&self) -> &ModelLimits {
        &self.limits
    }

    pub fn budget(&self, model_id: &str) -> TokenBudget {
        self.limits.budget(model_id)
    }

    pub fn estimate_tokens(&self, text: &str) -> usize {
        self.estimator.estimate(text)
    }

    pub fn message_cost(&self, message: &ChatMessage) -> usize {
        self.estimator.estimate(&message.content) + self.per_message_overhead
    }

    pub fn count_tokens(&self, messages: &[ChatMessage]) -> usize {
        messages.iter().map(|m| self.message_cost(m)).sum()
    }

    /// Whether `messages` (plus an optional candidate) fit the budget
    pub fn fits(
        &self,
        messages: &[ChatMessage],
        new_message: Option<&ChatMessage>,
        budget: &TokenBudget,
    ) -> bool {
        let extra = new_message.map_or(0, |m| self.message_cost(m));
        self.count_tokens(messages) + extra <= budget.available_tokens
    }

    /// Shrink `messages` to the budget; a fitting list comes back unchanged
    pub fn truncate(
        &self,
        messages: &[ChatMessage],
        budget: &TokenBudget,
        strategy: TruncationStrategy,
    ) -> Truncation {
        if self.fits(messages, None, budget) {
            return Truncation {
                messages: messages.to_vec(),
                tokens_removed: 0,
            };
        }

        let kept = match strategy {
            TruncationStrategy::Sliding => self.sliding(messages, budget),
            TruncationStrategy::Smart => self.smart(messages, budget),
            TruncationStrategy::Summary => {
                debug!("Summary truncation requested, applying smart truncation");
                self.smart(messages, budget)
            }
        };

        let tokens_removed = self
            .count_tokens(messages)
            .saturating_sub(self.count_tokens(&kept));

        info!(
            "Truncated context: model={}, strategy={}, kept={}/{}, tokens_removed={}",
            budget.model_id,
            strategy.as_str(),
            kept.len(),
            messages.len(),
            tokens_removed
        );
        if let Some(metrics) = &self.metrics {
            metrics.record_truncation(strategy.as_str());
        }

        Truncation {
            messages: kept,
            tokens_removed,
        }
    }

    /// Keep system messages, then the longest suffix of the rest that fits.
    fn sliding(&self, messages: &[ChatMessage], budget: &TokenBudget) -> Vec<ChatMessage> {
        let (system, conversation): (Vec<_>, Vec<_>) =
            messages.iter().partition(|m| m.role == Role::System);

        let mut total: usize = system.iter().map(|m| self.message_cost(m)).sum();
        let mut recent = Vec::new();
        for message in conversation.into_iter().rev() {
            let cost = self.message_cost(message);
            if total + cost > budget.available_tokens {
                break;
            }
            total += cost;
            recent.push(message);
        }
        recent.reverse();

        system.into_iter().chain(recent).cloned().collect()
    }

    /// Keep system, first-user and tool messages, then fill with recent ones.
    ///
    /// Output is the protected set followed by the recent fill, each in
    /// chronological order.
    fn smart(&self, messages: &[ChatMessage], budget: &TokenBudget) -> Vec<ChatMessage> {
        if messages.len() <= 3 {
            return self.sliding(messages, budget);
        }

        let first_user = messages.iter().position(|m| m.role == Role::User);
        let protected: Vec<bool> = messages
            .iter()
            .enumerate()
            .map(|(i, m)| {
                m.role == Role::System
                    || Some(i) == first_user
                    || m.role == Role::Tool
                    || m.tool_reference.is_some()
            })
            .collect();

        let mut total: usize = messages
            .iter()
            .zip(&protected)
            .filter(|(_, keep)| **keep)
            .map(|(m, _)| self.message_cost(m))
            .sum();

        let mut recent = Vec::new();
        for (i, message) in messages.iter().enumerate().rev() {
            if protected[i] {
                continue;
            }
            let cost = self.message_cost(message);
            if total + cost > budget.available_tokens {
                break;
            }
            total += cost;
            recent.push(i);
        }
        recent.reverse();

        messages
            .iter()
            .zip(&protected)
            .filter(|(_, keep)| **keep)
            .map(|(m, _)| m.clone())
            .chain(recent.into_iter().map(|i| messages[i].clone()))
            .collect()
    }

    /// Turn persisted history into the bounded message list sent to a model.
    ///
    /// Steps: optional default system prompt, optional cap to the last
    /// `max_history` messages, then smart truncation if still over budget.
    pub fn prepare_for_model(
        &self,
        history: &[Message],
        budget: &TokenBudget,
        include_system: bool,
        max_history: Option<usize>,
    ) -> PreparedContext {
        let start = max_history.map_or(0, |n| history.len().saturating_sub(n));

        let mut messages = Vec::with_capacity(history.len() - start + 1);
        if include_system {
            messages.push(ChatMessage::system(self.default_system_prompt.clone()));
        }
        messages.extend(history[start..].iter().map(Message::to_chat));

        let (messages, truncated, tokens_removed) = if self.fits(&messages, None, budget) {
            (messages, false, 0)
        } else {
            let truncation = self.truncate(&messages, budget, TruncationStrategy::Smart);
            (truncation.messages, true, truncation.tokens_removed)
        };

        let stats = self.stats(&messages, budget);
        if let Some(metrics) = &self.metrics {
            metrics.record_context_utilization(stats.utilization_percent);
        }

        PreparedContext {
            messages,
            stats,
            truncated,
            tokens_removed,
        }
    }

    /// Utilization report for logging and telemetry
    pub fn stats(&self, messages: &[ChatMessage], budget: &TokenBudget) -> ContextStats {
        let total_tokens = self.count_tokens(messages);
        let utilization_percent = utilization(total_tokens, budget.available_tokens) * 100.0;

        ContextStats {
            model_id: budget.model_id.clone(),
            total_tokens,
            max_tokens: budget.max_tokens,
            available_tokens: budget.available_tokens,
            utilization_percent: (utilization_percent * 100.0).round() / 100.0,
            fits: total_tokens <= budget.available_tokens,
            message_count: messages.len(),
        }
    }

    /// Whether utilization has reached `threshold` (0.0-1.0)
    pub fn should_truncate(
        &self,
        messages: &[ChatMessage],
        budget: &TokenBudget,
        threshold: f64,
    ) -> bool {
        utilization(self.count_tokens(messages), budget.available_tokens) >= threshold
    }
}

fn utilization(total_tokens: usize, available_tokens: usize) -> f64 {
    if available_tokens == 0 {
        return if total_tokens == 0 { 0.0 } else { f64::INFINITY };
    }
    total_tokens as f64 / available_tokens as f64
}
