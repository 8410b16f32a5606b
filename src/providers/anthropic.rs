//! Anthropic messages API

use super::{wire_role, ChatProvider, Completion, CompletionRequest, ProviderError};
use crate::config::ProvidersConfig;
use crate::context::Role;
use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

/// Required by the API when the caller sets no limit
const DEFAULT_MAX_TOKENS: u32 = 4096;

#[derive(Deserialize)]
struct MessagesResponse {
    model: Option<String>,
    content: Vec<ContentBlock>,
    stop_reason: Option<String>,
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: String,
}

#[derive(Deserialize)]
struct Usage {
    input_tokens: usize,
    output_tokens: usize,
}

pub struct AnthropicProvider {
    http: Client,
    api_url: String,
    api_version: String,
    api_key: SecretString,
}

impl AnthropicProvider {
    pub fn new(config: &ProvidersConfig, api_key: SecretString) -> Result<Self, ProviderError> {
        let http = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(ProviderError::from_reqwest)?;
        Ok(Self {
            http,
            api_url: config.anthropic_api_url.clone(),
            api_version: config.anthropic_version.clone(),
            api_key,
        })
    }
}

#[async_trait]
impl ChatProvider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, ProviderError> {
        // system prompts go in a top-level field
        let system: Vec<&str> = request
            .messages
            .iter()
            .filter(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
            .collect();
        let messages: Vec<_> = request
            .messages
            .iter()
            .filter(|m| m.role != Role::System)
            .map(|m| json!({"role": wire_role(m.role), "content": m.content}))
            .collect();

        let mut body = json!({
            "model": request.model,
            "messages": messages,
            "temperature": request.temperature,
            "max_tokens": request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        });
        if !system.is_empty() {
            body["system"] = json!(system.join("\n\n"));
        }

        debug!(
            "Calling Anthropic: model={}, messages={}",
            request.model,
            messages.len()
        );

        let response = self
            .http
            .post(&self.api_url)
            .header("x-api-key", self.api_key.expose_secret())
            .header("anthropic-version", &self.api_version)
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

        let parsed: MessagesResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;

        let content = parsed
            .content
            .iter()
            .filter(|block| block.kind == "text")
            .map(|block| block.text.as_str())
            .collect::<Vec<_>>()
            .join("");

        Ok(Completion {
            content,
            model: parsed.model.unwrap_or_else(|| request.model.clone()),
            prompt_tokens: parsed.usage.as_ref().map(|u| u.input_tokens),
            completion_tokens: parsed.usage.as_ref().map(|u| u.output_tokens),
            finish_reason: parsed.stop_reason,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ChatMessage;
    use mockito::Matcher;

    #[tokio::test]
    async fn test_system_prompt_lifted_and_text_joined() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/messages")
            .match_header("x-api-key", "ak-test")
            .match_header("anthropic-version", "2023-06-01")
            .match_body(Matcher::PartialJson(json!({
                "model": "claude-3-haiku-20240307",
                "system": "Be brief.",
                "max_tokens": 4096,
                "messages": [{"role": "user", "content": "Hi"}]
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!({
                    "model": "claude-3-haiku-20240307",
                    "content": [
                        {"type": "text", "text": "Hello"},
                        {"type": "text", "text": " there"}
                    ],
                    "stop_reason": "end_turn",
                    "usage": {"input_tokens": 9, "output_tokens": 3}
                })
                .to_string(),
            )
            .create_async()
            .await;

        let config = ProvidersConfig {
            anthropic_api_url: format!("{}/v1/messages", server.url()),
            ..Default::default()
        };
        let provider =
            AnthropicProvider::new(&config, SecretString::new("ak-test".to_string())).unwrap();

        let completion = provider
            .complete(&CompletionRequest {
                model: "claude-3-haiku-20240307".to_string(),
                messages: vec![ChatMessage::system("Be brief."), ChatMessage::user("Hi")],
                temperature: 0.7,
                max_tokens: None,
            })
            .await
            .unwrap();

        assert_eq!(completion.content, "Hello there");
        assert_eq!(completion.prompt_tokens, Some(9));
        assert_eq!(completion.finish_reason.as_deref(), Some("end_turn"));
        mock.assert_async().await;
    }
}
