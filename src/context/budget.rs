//! Per-model token budgets
//!
//! Budgets come from a static table keyed by model family. Lookup tries an
//! exact match first, then the longest table entry the model id starts with
//! (so `gpt-4-0613` resolves through `gpt-4`), then falls back to a
//! conservative default.

use crate::config::ContextConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Context window sizes of known model families
pub const MODEL_LIMITS: &[(&str, usize)] = &[
    ("gpt-4", 128_000),
    ("gpt-4-turbo", 128_000),
    ("gpt-3.5-turbo", 16_385),
    ("claude-3-opus", 200_000),
    ("claude-3-sonnet", 200_000),
    ("claude-3-haiku", 200_000),
    ("llama3", 128_000),
    ("llama3-70b", 128_000),
    ("llama3.1", 128_000),
    ("llama3.3", 128_000),
    ("mistral", 32_000),
    ("codellama", 16_000),
];

/// Token budget for one model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenBudget {
    pub model_id: String,
    pub max_tokens: usize,
    /// `max_tokens` minus the response reserve; what truncation targets
    pub available_tokens: usize,
}

impl TokenBudget {
    pub fn new(model_id: impl Into<String>, max_tokens: usize, response_reserve: usize) -> Self {
        Self {
            model_id: model_id.into(),
            max_tokens,
            available_tokens: max_tokens.saturating_sub(response_reserve),
        }
    }
}

/// Model id to context size lookup
#[derive(Debug, Clone)]
pub struct ModelLimits {
    limits: HashMap<String, usize>,
    default_max_tokens: usize,
    response_reserve: usize,
}

impl ModelLimits {
    pub fn new(config: &ContextConfig) -> Self {
        let mut limits: HashMap<String, usize> = MODEL_LIMITS
            .iter()
            .map(|(model, tokens)| (model.to_string(), *tokens))
            .collect();
        limits.extend(config.model_limits.clone());

        Self {
            limits,
            default_max_tokens: config.default_max_tokens,
            response_reserve: config.response_reserve,
        }
    }

    /// Raw context size for a model id
    pub fn max_tokens(&self, model_id: &str) -> usize {
        if let Some(tokens) = self.limits.get(model_id) {
            return *tokens;
        }
        self.limits
            .iter()
            .filter(|(family, _)| model_id.starts_with(family.as_str()))
            .max_by_key(|(family, _)| family.len())
            .map(|(_, tokens)| *tokens)
            .unwrap_or(self.default_max_tokens)
    }

    pub fn budget(&self, model_id: &str) -> TokenBudget {
        TokenBudget::new(model_id, self.max_tokens(model_id), self.response_reserve)
    }

    /// Budget honoring a per-conversation cap, never above the model's size
    pub fn budget_with_cap(&self, model_id: &str, cap: Option<usize>) -> TokenBudget {
        let max = self.max_tokens(model_id);
        let max = cap.map_or(max, |cap| cap.min(max));
        TokenBudget::new(model_id, max, self.response_reserve)
    }

    pub fn response_reserve(&self) -> usize {
        self.response_reserve
    }
}

impl Default for ModelLimits {
    fn default() -> Self {
        Self::new(&ContextConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_models() {
        let limits = ModelLimits::default();
        assert_eq!(limits.max_tokens("gpt-4"), 128_000);
        assert_eq!(limits.max_tokens("gpt-3.5-turbo"), 16_385);
        assert_eq!(limits.max_tokens("claude-3-opus"), 200_000);
        assert_eq!(limits.max_tokens("codellama"), 16_000);
    }

    #[test]
    fn test_unknown_model_defaults() {
        let limits = ModelLimits::default();
        assert_eq!(limits.max_tokens("some-new-model"), 4096);
        assert_eq!(limits.budget("some-new-model").available_tokens, 2096);
    }

    #[test]
    fn test_longest_prefix_wins() {
        let limits = ModelLimits::default();
        assert_eq!(limits.max_tokens("gpt-3.5-turbo-0125"), 16_385);
        assert_eq!(limits.max_tokens("llama3-70b-instruct"), 128_000);
        assert_eq!(limits.max_tokens("mistral-7b"), 32_000);
    }

    #[test]
    fn test_config_overrides() {
        let mut config = ContextConfig::default();
        config.model_limits.insert("gpt-4".to_string(), 8192);
        config.model_limits.insert("local-model".to_string(), 10_000);
        let limits = ModelLimits::new(&config);
        assert_eq!(limits.max_tokens("gpt-4"), 8192);
        assert_eq!(limits.max_tokens("local-model"), 10_000);
    }

    #[test]
    fn test_budget_with_cap() {
        let limits = ModelLimits::default();
        let budget = limits.budget_with_cap("gpt-4", Some(8000));
        assert_eq!(budget.max_tokens, 8000);
        assert_eq!(budget.available_tokens, 6000);

        let budget = limits.budget_with_cap("gpt-3.5-turbo", Some(1_000_000));
        assert_eq!(budget.max_tokens, 16_385);
    }

    #[test]
    fn test_reserve_larger_than_max_saturates() {
        let budget = TokenBudget::new("tiny", 1000, 2000);
        assert_eq!(budget.available_tokens, 0);
    }
}
