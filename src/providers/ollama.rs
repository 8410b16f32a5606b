//! Local models served by Ollama

use super::{wire_role, ChatProvider, Completion, CompletionRequest, ProviderError};
use crate::config::ProvidersConfig;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

#[derive(Deserialize)]
struct ChatResponse {
    model: Option<String>,
    message: Option<ResponseMessage>,
    done_reason: Option<String>,
    prompt_eval_count: Option<usize>,
    eval_count: Option<usize>,
}

#[derive(Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: String,
}

pub struct OllamaProvider {
    http: Client,
    api_url: String,
}

impl OllamaProvider {
    pub fn new(config: &ProvidersConfig) -> Result<Self, ProviderError> {
        let http = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(ProviderError::from_reqwest)?;
        Ok(Self {
            http,
            api_url: config.ollama_url.clone(),
        })
    }
}

#[async_trait]
impl ChatProvider for OllamaProvider {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, ProviderError> {
        let messages: Vec<_> = request
            .messages
            .iter()
            .map(|m| json!({"role": wire_role(m.role), "content": m.content}))
            .collect();

        let mut options = json!({"temperature": request.temperature});
        if let Some(max_tokens) = request.max_tokens {
            options["num_predict"] = json!(max_tokens);
        }

        let body = json!({
            "model": request.model,
            "messages": messages,
            "stream": false,
            "options": options,
        });

        debug!("Calling Ollama: model={}, url={}", request.model, self.api_url);

        let response = self
            .http
            .post(&self.api_url)
            .json(&body)
            .send()
            .await
            .map_err(ProviderError::from_reqwest)?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ProviderError::Upstream {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;
        let message = parsed
            .message
            .ok_or_else(|| ProviderError::InvalidResponse("missing message".to_string()))?;

        Ok(Completion {
            content: message.content,
            model: parsed.model.unwrap_or_else(|| request.model.clone()),
            prompt_tokens: parsed.prompt_eval_count,
            completion_tokens: parsed.eval_count,
            finish_reason: parsed.done_reason,
        })
    }
}
