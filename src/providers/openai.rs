//! OpenAI chat completions

use super::{wire_role, ChatProvider, Completion, CompletionRequest, ProviderError};
use crate::config::ProvidersConfig;
use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

#[derive(Deserialize)]
struct ChatResponse {
    model: Option<String>,
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct Usage {
    prompt_tokens: usize,
    completion_tokens: usize,
}

pub struct OpenAiProvider {
    http: Client,
    api_url: String,
    api_key: SecretString,
}

impl OpenAiProvider {
    pub fn new(config: &ProvidersConfig, api_key: SecretString) -> Result<Self, ProviderError> {
        let http = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(ProviderError::from_reqwest)?;
        Ok(Self {
            http,
            api_url: config.openai_api_url.clone(),
            api_key,
        })
    }
}

#[async_trait]
impl ChatProvider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, ProviderError> {
        let messages: Vec<_> = request
            .messages
            .iter()
            .map(|m| json!({"role": wire_role(m.role), "content": m.content}))
            .collect();

        let mut body = json!({
            "model": request.model,
            "messages": messages,
            "temperature": request.temperature,
        });
        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }

        debug!(
            "Calling OpenAI: model={}, messages={}",
            request.model,
            request.messages.len()
        );

        let response = self
            .http
            .post(&self.api_url)
            .bearer_auth(self.api_key.expose_secret())
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
        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::InvalidResponse("no choices returned".to_string()))?;

        Ok(Completion {
            content: choice.message.content.unwrap_or_default(),
            model: parsed.model.unwrap_or_else(|| request.model.clone()),
            prompt_tokens: parsed.usage.as_ref().map(|u| u.prompt_tokens),
            completion_tokens: parsed.usage.as_ref().map(|u| u.completion_tokens),
            finish_reason: choice.finish_reason,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ChatMessage;
    use mockito::Matcher;

    fn provider(url: String) -> OpenAiProvider {
        let config = ProvidersConfig {
            openai_api_url: url,
            ..Default::default()
        };
        OpenAiProvider::new(&config, SecretString::new("sk-test".to_string())).unwrap()
    }

    fn request() -> CompletionRequest {
        CompletionRequest {
            model: "gpt-4-turbo-preview".to_string(),
            messages: vec![
                ChatMessage::system("Be brief."),
                ChatMessage::user("Hi"),
                ChatMessage::tool("{\"ok\":true}", "exec-1"),
            ],
            temperature: 0.2,
            max_tokens: Some(64),
        }
    }

    #[tokio::test]
    async fn test_completion() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/chat/completions")
            .match_header("authorization", "Bearer sk-test")
            .match_body(Matcher::PartialJson(json!({
                "model": "gpt-4-turbo-preview",
                "max_tokens": 64,
                "messages": [
                    {"role": "system", "content": "Be brief."},
                    {"role": "user", "content": "Hi"},
                    {"role": "user", "content": "{\"ok\":true}"}
                ]
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!({
                    "model": "gpt-4-turbo-preview",
                    "choices": [{"message": {"role": "assistant", "content": "Hello!"}, "finish_reason": "stop"}],
                    "usage": {"prompt_tokens": 12, "completion_tokens": 2, "total_tokens": 14}
                })
                .to_string(),
            )
            .create_async()
            .await;

        let completion = provider(format!("{}/v1/chat/completions", server.url()))
            .complete(&request())
            .await
            .unwrap();
        assert_eq!(completion.content, "Hello!");
        assert_eq!(completion.prompt_tokens, Some(12));
        assert_eq!(completion.completion_tokens, Some(2));
        assert_eq!(completion.finish_reason.as_deref(), Some("stop"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_error_status() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/v1/chat/completions")
            .with_status(401)
            .with_body("{\"error\":\"bad key\"}")
            .create_async()
            .await;

        let err = provider(format!("{}/v1/chat/completions", server.url()))
            .complete(&request())
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Upstream { status: 401, .. }));
    }
}
