//! LLM chat providers and model routing
//!
//! Each upstream API gets one [`ChatProvider`] implementation. The
//! [`ProviderRegistry`] maps model ids (glob patterns such as `gpt-4*`) to a
//! provider and, optionally, to the upstream model name to request.

pub mod anthropic;
pub mod ollama;
pub mod openai;

pub use anthropic::AnthropicProvider;
pub use ollama::OllamaProvider;
pub use openai::OpenAiProvider;

use crate::config::ProvidersConfig;
use crate::context::{ChatMessage, Role};
use async_trait::async_trait;
use glob::Pattern;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Provider returned status {status}: {body}")]
    Upstream { status: u16, body: String },

    #[error("Invalid provider response: {0}")]
    InvalidResponse(String),

    #[error("No provider registered for model {0}")]
    NoProvider(String),

    #[error("Invalid model pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },
}

impl ProviderError {
    pub(crate) fn from_reqwest(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout(e.to_string())
        } else {
            Self::RequestFailed(e.to_string())
        }
    }
}

/// Provider-agnostic completion request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRequest {
    /// Upstream model name
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Completion {
    pub content: String,
    pub model: String,
    pub prompt_tokens: Option<usize>,
    pub completion_tokens: Option<usize>,
    pub finish_reason: Option<String>,
}

#[async_trait]
pub trait ChatProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, ProviderError>;
}

/// Role string on the wire; tool results travel as user turns
pub(crate) fn wire_role(role: Role) -> &'static str {
    match role {
        Role::Tool => "user",
        other => other.as_str(),
    }
}

/// Reads the key from `var`, `None` when unset or empty
pub(crate) fn api_key_from_env(var: &str) -> Option<SecretString> {
    std::env::var(var)
        .ok()
        .filter(|k| !k.is_empty())
        .map(SecretString::new)
}

struct Route {
    pattern: Pattern,
    provider: Arc<dyn ChatProvider>,
    upstream_model: Option<String>,
}

/// Provider resolved for one model id
#[derive(Clone)]
pub struct ResolvedProvider {
    pub provider: Arc<dyn ChatProvider>,
    /// Model name to send upstream
    pub upstream_model: String,
}

/// Ordered model-pattern routes; the first match wins
#[derive(Default)]
pub struct ProviderRegistry {
    routes: Vec<Route>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route model ids matching `pattern` to `provider`
    ///
    /// With `upstream_model` unset the model id is forwarded unchanged.
    pub fn register(
        &mut self,
        pattern: &str,
        provider: Arc<dyn ChatProvider>,
        upstream_model: Option<&str>,
    ) -> Result<(), ProviderError> {
        let compiled = Pattern::new(pattern).map_err(|e| ProviderError::InvalidPattern {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })?;
        debug!("Registered model route: pattern={}, provider={}", pattern, provider.name());
        self.routes.push(Route {
            pattern: compiled,
            provider,
            upstream_model: upstream_model.map(str::to_string),
        });
        Ok(())
    }

    pub fn resolve(&self, model_id: &str) -> Result<ResolvedProvider, ProviderError> {
        self.routes
            .iter()
            .find(|route| route.pattern.matches(model_id))
            .map(|route| ResolvedProvider {
                provider: route.provider.clone(),
                upstream_model: route
                    .upstream_model
                    .clone()
                    .unwrap_or_else(|| model_id.to_string()),
            })
            .ok_or_else(|| ProviderError::NoProvider(model_id.to_string()))
    }

    pub fn patterns(&self) -> Vec<String> {
        self.routes.iter().map(|r| r.pattern.as_str().to_string()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Standard routes for every provider whose credentials are available
    ///
    /// OpenAI and Anthropic are registered only when their API key variable is
    /// set; the local Ollama endpoint is always registered.
    pub fn from_config(config: &ProvidersConfig) -> Result<Self, ProviderError> {
        let mut registry = Self::new();

        match api_key_from_env(&config.openai_api_key_env) {
            Some(key) => {
                let openai: Arc<dyn ChatProvider> = Arc::new(OpenAiProvider::new(config, key)?);
                registry.register("gpt-4", openai.clone(), Some("gpt-4-turbo-preview"))?;
                registry.register("gpt-4-turbo", openai.clone(), Some("gpt-4-turbo-preview"))?;
                registry.register("gpt-*", openai, None)?;
            }
            None => warn!(
                "OpenAI provider disabled: {} not set",
                config.openai_api_key_env
            ),
        }

        match api_key_from_env(&config.anthropic_api_key_env) {
            Some(key) => {
                let anthropic: Arc<dyn ChatProvider> =
                    Arc::new(AnthropicProvider::new(config, key)?);
                registry.register(
                    "claude-3-opus",
                    anthropic.clone(),
                    Some("claude-3-opus-20240229"),
                )?;
                registry.register(
                    "claude-3-sonnet",
                    anthropic.clone(),
                    Some("claude-3-sonnet-20240229"),
                )?;
                registry.register(
                    "claude-3-haiku",
                    anthropic.clone(),
                    Some("claude-3-haiku-20240307"),
                )?;
                registry.register("claude-*", anthropic, None)?;
            }
            None => warn!(
                "Anthropic provider disabled: {} not set",
                config.anthropic_api_key_env
            ),
        }

        let ollama: Arc<dyn ChatProvider> = Arc::new(OllamaProvider::new(config)?);
        registry.register("llama3", ollama.clone(), Some("llama3:8b"))?;
        registry.register("llama3-70b", ollama.clone(), Some("llama3:70b"))?;
        registry.register("mistral", ollama.clone(), Some("mistral:latest"))?;
        registry.register("codellama", ollama.clone(), Some("codellama:latest"))?;
        registry.register("llama*", ollama, None)?;

        info!("Provider registry initialized: routes={}", registry.routes.len());
        Ok(registry)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;

    /// Records requests and answers with a fixed reply
    pub struct EchoProvider {
        pub reply: String,
        pub requests: Mutex<Vec<CompletionRequest>>,
    }

    impl EchoProvider {
        pub fn new(reply: &str) -> Self {
            Self {
                reply: reply.to_string(),
                requests: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ChatProvider for EchoProvider {
        fn name(&self) -> &str {
            "echo"
        }

        async fn complete(&self, request: &CompletionRequest) -> Result<Completion, ProviderError> {
            self.requests.lock().unwrap().push(request.clone());
            Ok(Completion {
                content: self.reply.clone(),
                model: request.model.clone(),
                prompt_tokens: None,
                completion_tokens: None,
                finish_reason: Some("stop".to_string()),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::EchoProvider;
    use super::*;

    #[test]
    fn test_first_matching_route_wins() {
        let exact: Arc<dyn ChatProvider> = Arc::new(EchoProvider::new("exact"));
        let wildcard: Arc<dyn ChatProvider> = Arc::new(EchoProvider::new("wildcard"));
        let mut registry = ProviderRegistry::new();
        registry.register("gpt-4", exact.clone(), Some("gpt-4-turbo-preview")).unwrap();
        registry.register("gpt-*", wildcard, None).unwrap();

        let resolved = registry.resolve("gpt-4").unwrap();
        assert!(Arc::ptr_eq(&resolved.provider, &exact));
        assert_eq!(resolved.upstream_model, "gpt-4-turbo-preview");

        let resolved = registry.resolve("gpt-3.5-turbo").unwrap();
        assert_eq!(resolved.upstream_model, "gpt-3.5-turbo");
    }

    #[test]
    fn test_unknown_model() {
        let registry = ProviderRegistry::new();
        assert!(matches!(
            registry.resolve("mystery"),
            Err(ProviderError::NoProvider(model)) if model == "mystery"
        ));
    }

    #[test]
    fn test_invalid_pattern_rejected() {
        let mut registry = ProviderRegistry::new();
        let provider: Arc<dyn ChatProvider> = Arc::new(EchoProvider::new("x"));
        assert!(matches!(
            registry.register("gpt-[", provider, None),
            Err(ProviderError::InvalidPattern { .. })
        ));
    }

    #[test]
    fn test_from_config_always_routes_local_models() {
        let config = ProvidersConfig {
            openai_api_key_env: "CORE_TEST_UNSET_OPENAI_KEY".to_string(),
            anthropic_api_key_env: "CORE_TEST_UNSET_ANTHROPIC_KEY".to_string(),
            ..Default::default()
        };
        let registry = ProviderRegistry::from_config(&config).unwrap();
        assert_eq!(registry.resolve("llama3").unwrap().upstream_model, "llama3:8b");
        assert_eq!(registry.resolve("llama3.1").unwrap().upstream_model, "llama3.1");
        assert!(registry.resolve("gpt-4").is_err());
    }

    #[test]
    fn test_tool_messages_sent_as_user() {
        assert_eq!(wire_role(Role::Tool), "user");
        assert_eq!(wire_role(Role::System), "system");
    }
}
