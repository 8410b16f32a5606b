//! OpenAI-compatible embeddings client

use super::{EmbeddingError, EmbeddingProvider};
use crate::config::EmbeddingConfig;
use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    #[serde(default)]
    index: usize,
}

/// Client for `POST /v1/embeddings` style endpoints
pub struct HttpEmbeddingProvider {
    http: Client,
    api_url: String,
    model: String,
    dimension: usize,
    api_key: Option<SecretString>,
}

impl HttpEmbeddingProvider {
    /// Build from config, reading the API key from `config.api_key_env`
    pub fn from_config(config: &EmbeddingConfig) -> Result<Self, EmbeddingError> {
        let api_key = match std::env::var(&config.api_key_env) {
            Ok(key) if !key.is_empty() => Some(SecretString::new(key)),
            _ => {
                warn!(
                    "No embedding API key found in {}, sending unauthenticated requests",
                    config.api_key_env
                );
                None
            }
        };
        Self::new(config, api_key)
    }

    pub fn new(
        config: &EmbeddingConfig,
        api_key: Option<SecretString>,
    ) -> Result<Self, EmbeddingError> {
        let http = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| EmbeddingError::RequestFailed(e.to_string()))?;

        Ok(Self {
            http,
            api_url: config.api_url.clone(),
            model: config.model.clone(),
            dimension: config.dimension,
            api_key,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for HttpEmbeddingProvider {
    fn name(&self) -> &str {
        &self.model
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        debug!("Requesting embeddings: model={}, texts={}", self.model, texts.len());

        let mut req = self.http.post(&self.api_url).json(&EmbeddingRequest {
            model: &self.model,
            input: texts,
        });
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key.expose_secret());
        }

        let response = req.send().await.map_err(|e| {
            if e.is_timeout() {
                EmbeddingError::Timeout(e.to_string())
            } else {
                EmbeddingError::RequestFailed(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(EmbeddingError::Upstream {
                status: status.as_u16(),
                body,
            });
        }

        let mut parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| EmbeddingError::InvalidResponse(e.to_string()))?;

        if parsed.data.len() != texts.len() {
            return Err(EmbeddingError::InvalidResponse(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                parsed.data.len()
            )));
        }

        parsed.data.sort_by_key(|d| d.index);
        Ok(parsed.data.into_iter().map(|d| d.embedding).collect())
    }
}
