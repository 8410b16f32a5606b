//! Configuration for the conversation core
//!
//! Sections are loaded from (in order of precedence, lowest first):
//! built-in defaults, an optional TOML file, then environment variables of the
//! form `CORE__<SECTION>__<FIELD>` (for example `CORE__CHUNKING__CHUNK_SIZE`).

use crate::context::Tokenizer;
use crate::error::{CoreError, Result};
use crate::retrieval::KeywordScoring;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub context: ContextConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub vault: VaultConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from an optional file plus `CORE__*` environment variables.
    ///
    /// A `.env` file in the working directory is read first if present.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        dotenvy::dotenv().ok();

        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(false));
        }
        builder = builder.add_source(
            config::Environment::with_prefix("CORE")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config: Config = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a TOML string (no environment overlay)
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Config = config::Config::builder()
            .add_source(config::File::from_str(raw, config::FileFormat::Toml))
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints
    pub fn validate(&self) -> Result<()> {
        self.context.validate()?;
        self.chunking.validate()?;
        self.retrieval.validate()?;
        if self.embedding.batch_size == 0 {
            return Err(CoreError::Configuration(
                "embedding.batch_size must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Context window settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    /// Tokens held back for the model's reply
    #[serde(default = "default_response_reserve")]
    pub response_reserve: usize,

    /// Role/framing tokens charged per message
    #[serde(default = "default_per_message_overhead")]
    pub per_message_overhead: usize,

    /// Budget for models missing from the limits table
    #[serde(default = "default_unknown_model_tokens")]
    pub default_max_tokens: usize,

    #[serde(default = "default_system_prompt")]
    pub default_system_prompt: String,

    /// Utilization ratio at which `should_truncate` fires
    #[serde(default = "default_truncation_threshold")]
    pub truncation_threshold: f64,

    /// Cap on persisted messages considered per turn
    #[serde(default)]
    pub max_history: Option<usize>,

    /// Extra or overriding entries for the model limits table
    #[serde(default)]
    pub model_limits: HashMap<String, usize>,

    #[serde(default)]
    pub tokenizer: Tokenizer,
}

fn default_response_reserve() -> usize {
    2000
}

fn default_per_message_overhead() -> usize {
    4
}

fn default_unknown_model_tokens() -> usize {
    4096
}

fn default_system_prompt() -> String {
    "You are a helpful AI assistant with access to various tools and data sources.".to_string()
}

fn default_truncation_threshold() -> f64 {
    0.8
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            response_reserve: default_response_reserve(),
            per_message_overhead: default_per_message_overhead(),
            default_max_tokens: default_unknown_model_tokens(),
            default_system_prompt: default_system_prompt(),
            truncation_threshold: default_truncation_threshold(),
            max_history: None,
            model_limits: HashMap::new(),
            tokenizer: Tokenizer::default(),
        }
    }
}

impl ContextConfig {
    pub fn validate(&self) -> Result<()> {
        if self.response_reserve >= self.default_max_tokens {
            return Err(CoreError::Configuration(format!(
                "context.response_reserve ({}) must be below context.default_max_tokens ({})",
                self.response_reserve, self.default_max_tokens
            )));
        }
        if !(0.0..=1.0).contains(&self.truncation_threshold) {
            return Err(CoreError::Configuration(
                "context.truncation_threshold must be within 0.0..=1.0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Document chunking settings (sizes in characters)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,

    #[serde(default = "default_max_chunk_size")]
    pub max_chunk_size: usize,

    #[serde(default = "default_max_keywords")]
    pub max_keywords: usize,
}

fn default_chunk_size() -> usize {
    1000
}

fn default_chunk_overlap() -> usize {
    200
}

fn default_max_chunk_size() -> usize {
    2000
}

fn default_max_keywords() -> usize {
    10
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            max_chunk_size: default_max_chunk_size(),
            max_keywords: default_max_keywords(),
        }
    }
}

impl ChunkingConfig {
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(CoreError::Configuration(
                "chunking.chunk_size must be greater than zero".to_string(),
            ));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(CoreError::Configuration(format!(
                "chunking.chunk_overlap ({}) must be smaller than chunking.chunk_size ({})",
                self.chunk_overlap, self.chunk_size
            )));
        }
        if self.max_chunk_size < self.chunk_size {
            return Err(CoreError::Configuration(format!(
                "chunking.max_chunk_size ({}) must be at least chunking.chunk_size ({})",
                self.max_chunk_size, self.chunk_size
            )));
        }
        Ok(())
    }
}

/// Tool execution settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// How long an approval request stays open
    #[serde(default = "default_approval_ttl")]
    pub approval_ttl_secs: u64,

    /// Lifetime of a cached tool result
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_secs: u64,

    /// Deliveries of one job before the queue gives up on it
    #[serde(default = "default_max_delivery_attempts")]
    pub max_delivery_attempts: u32,

    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
}

fn default_approval_ttl() -> u64 {
    24 * 60 * 60
}

fn default_cache_ttl() -> u64 {
    24 * 60 * 60
}

fn default_max_delivery_attempts() -> u32 {
    3
}

fn default_worker_count() -> usize {
    2
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            approval_ttl_secs: default_approval_ttl(),
            cache_ttl_secs: default_cache_ttl(),
            max_delivery_attempts: default_max_delivery_attempts(),
            worker_count: default_worker_count(),
        }
    }
}

impl ToolsConfig {
    pub fn approval_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.approval_ttl_secs as i64)
    }

    pub fn cache_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.cache_ttl_secs as i64)
    }
}

/// Hybrid retrieval settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    #[serde(default = "default_vector_weight")]
    pub vector_weight: f32,

    #[serde(default = "default_keyword_weight")]
    pub keyword_weight: f32,

    #[serde(default = "default_top_k")]
    pub default_top_k: usize,

    #[serde(default)]
    pub keyword_scoring: KeywordScoring,

    /// Score given to every keyword hit under `KeywordScoring::Placeholder`
    #[serde(default = "default_placeholder_score")]
    pub placeholder_score: f32,
}

fn default_vector_weight() -> f32 {
    0.7
}

fn default_keyword_weight() -> f32 {
    0.3
}

fn default_top_k() -> usize {
    10
}

fn default_placeholder_score() -> f32 {
    0.5
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            vector_weight: default_vector_weight(),
            keyword_weight: default_keyword_weight(),
            default_top_k: default_top_k(),
            keyword_scoring: KeywordScoring::default(),
            placeholder_score: default_placeholder_score(),
        }
    }
}

impl RetrievalConfig {
    pub fn validate(&self) -> Result<()> {
        for (name, weight) in [
            ("vector_weight", self.vector_weight),
            ("keyword_weight", self.keyword_weight),
            ("placeholder_score", self.placeholder_score),
        ] {
            if !(0.0..=1.0).contains(&weight) {
                return Err(CoreError::Configuration(format!(
                    "retrieval.{} must be within 0.0..=1.0, got {}",
                    name, weight
                )));
            }
        }
        Ok(())
    }
}

/// Embedding provider settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_url")]
    pub api_url: String,

    /// Environment variable holding the API key
    #[serde(default = "default_openai_key_env")]
    pub api_key_env: String,

    #[serde(default = "default_embedding_model")]
    pub model: String,

    #[serde(default = "default_dimension")]
    pub dimension: usize,

    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    #[serde(default = "default_embedding_retries")]
    pub max_retries: usize,

    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(default = "default_query_cache_size")]
    pub query_cache_size: u64,

    #[serde(default = "default_query_cache_ttl")]
    pub query_cache_ttl_secs: u64,

    #[serde(default = "default_breaker_failures")]
    pub circuit_breaker_failures: usize,

    #[serde(default = "default_breaker_reset")]
    pub circuit_breaker_reset_secs: u64,
}

fn default_embedding_url() -> String {
    "https://api.openai.com/v1/embeddings".to_string()
}

fn default_openai_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}

fn default_dimension() -> usize {
    1536
}

fn default_batch_size() -> usize {
    100
}

fn default_embedding_retries() -> usize {
    3
}

fn default_retry_backoff_ms() -> u64 {
    1000
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_query_cache_size() -> u64 {
    1000
}

fn default_query_cache_ttl() -> u64 {
    600
}

fn default_breaker_failures() -> usize {
    5
}

fn default_breaker_reset() -> u64 {
    30
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            api_url: default_embedding_url(),
            api_key_env: default_openai_key_env(),
            model: default_embedding_model(),
            dimension: default_dimension(),
            batch_size: default_batch_size(),
            max_retries: default_embedding_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
            timeout_ms: default_timeout_ms(),
            query_cache_size: default_query_cache_size(),
            query_cache_ttl_secs: default_query_cache_ttl(),
            circuit_breaker_failures: default_breaker_failures(),
            circuit_breaker_reset_secs: default_breaker_reset(),
        }
    }
}

impl EmbeddingConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn query_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.query_cache_ttl_secs)
    }

    pub fn breaker_reset_timeout(&self) -> Duration {
        Duration::from_secs(self.circuit_breaker_reset_secs)
    }
}

/// LLM provider endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvidersConfig {
    #[serde(default = "default_openai_url")]
    pub openai_api_url: String,

    #[serde(default = "default_openai_key_env")]
    pub openai_api_key_env: String,

    #[serde(default = "default_anthropic_url")]
    pub anthropic_api_url: String,

    #[serde(default = "default_anthropic_key_env")]
    pub anthropic_api_key_env: String,

    #[serde(default = "default_anthropic_version")]
    pub anthropic_version: String,

    #[serde(default = "default_ollama_url")]
    pub ollama_url: String,

    #[serde(default = "default_provider_timeout_ms")]
    pub timeout_ms: u64,

    /// Completion length requested from the model
    #[serde(default = "default_completion_tokens")]
    pub max_completion_tokens: u32,
}

fn default_openai_url() -> String {
    "https://api.openai.com/v1/chat/completions".to_string()
}

fn default_anthropic_url() -> String {
    "https://api.anthropic.com/v1/messages".to_string()
}

fn default_anthropic_key_env() -> String {
    "ANTHROPIC_API_KEY".to_string()
}

fn default_anthropic_version() -> String {
    "2023-06-01".to_string()
}

fn default_ollama_url() -> String {
    "http://localhost:11434/api/chat".to_string()
}

fn default_provider_timeout_ms() -> u64 {
    120_000
}

fn default_completion_tokens() -> u32 {
    2000
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            openai_api_url: default_openai_url(),
            openai_api_key_env: default_openai_key_env(),
            anthropic_api_url: default_anthropic_url(),
            anthropic_api_key_env: default_anthropic_key_env(),
            anthropic_version: default_anthropic_version(),
            ollama_url: default_ollama_url(),
            timeout_ms: default_provider_timeout_ms(),
            max_completion_tokens: default_completion_tokens(),
        }
    }
}

impl ProvidersConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Secrets vault settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultConfig {
    /// Environment variable holding the hex-encoded 256-bit key
    #[serde(default = "default_vault_key_env")]
    pub key_env: String,
}

fn default_vault_key_env() -> String {
    "VAULT_ENCRYPTION_KEY".to_string()
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            key_env: default_vault_key_env(),
        }
    }
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.context.response_reserve, 2000);
        assert_eq!(config.chunking.chunk_size, 1000);
        assert_eq!(config.chunking.chunk_overlap, 200);
        assert_eq!(config.chunking.max_chunk_size, 2000);
        assert_eq!(config.retrieval.vector_weight, 0.7);
        assert_eq!(config.tools.approval_ttl_secs, 86_400);
    }

    #[test]
    fn test_from_toml_overrides_sections() {
        let raw = r#"
            [chunking]
            chunk_size = 500
            chunk_overlap = 50

            [context]
            response_reserve = 1000

            [context.model_limits]
            "my-model" = 64000

            [retrieval]
            keyword_scoring = "bm25"
        "#;

        let config = Config::from_toml_str(raw).unwrap();
        assert_eq!(config.chunking.chunk_size, 500);
        assert_eq!(config.chunking.chunk_overlap, 50);
        assert_eq!(config.chunking.max_chunk_size, 2000);
        assert_eq!(config.context.response_reserve, 1000);
        assert_eq!(config.context.model_limits.get("my-model"), Some(&64000));
        assert_eq!(config.retrieval.keyword_scoring, KeywordScoring::Bm25);
    }

    #[test]
    fn test_overlap_must_be_smaller_than_chunk() {
        let config = ChunkingConfig {
            chunk_size: 100,
            chunk_overlap: 100,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_weights_out_of_range_rejected() {
        let config = RetrievalConfig {
            vector_weight: 1.5,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_duration_conversions() {
        let config = EmbeddingConfig::default();
        assert_eq!(config.timeout(), Duration::from_millis(30_000));
        assert_eq!(config.retry_backoff(), Duration::from_millis(1000));
        assert_eq!(ToolsConfig::default().approval_ttl(), chrono::Duration::hours(24));
    }
}
