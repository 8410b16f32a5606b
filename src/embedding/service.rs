//! Batched, retrying embedding generation with zero-vector degradation

use super::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
use super::{is_zero_vector, EmbeddingError, EmbeddingProvider};
use crate::config::EmbeddingConfig;
use crate::metrics::Metrics;
use moka::future::Cache;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Vectors for a batch of texts plus how many of them are degraded
#[derive(Debug, Clone, Default)]
pub struct EmbeddingBatch {
    pub vectors: Vec<Vec<f32>>,
    /// Non-empty texts that received a zero vector because their batch failed
    pub degraded: usize,
}

pub struct EmbeddingService {
    provider: Arc<dyn EmbeddingProvider>,
    breaker: CircuitBreaker,
    query_cache: Cache<String, Arc<Vec<f32>>>,
    batch_size: usize,
    max_retries: usize,
    retry_backoff: Duration,
    metrics: Option<Arc<Metrics>>,
}

impl EmbeddingService {
    pub fn new(provider: Arc<dyn EmbeddingProvider>, config: &EmbeddingConfig) -> Self {
        let query_cache = Cache::builder()
            .max_capacity(config.query_cache_size)
            .time_to_live(config.query_cache_ttl())
            .build();

        info!(
            "EmbeddingService initialized: provider={}, dimension={}, batch_size={}",
            provider.name(),
            provider.dimension(),
            config.batch_size
        );

        Self {
            provider,
            breaker: CircuitBreaker::new(CircuitBreakerConfig::from(config)),
            query_cache,
            batch_size: config.batch_size.max(1),
            max_retries: config.max_retries.max(1),
            retry_backoff: config.retry_backoff(),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn dimension(&self) -> usize {
        self.provider.dimension()
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    fn zero_vector(&self) -> Vec<f32> {
        vec![0.0; self.provider.dimension()]
    }

    /// Embed texts, one vector per input in input order
    ///
    /// Never fails: empty texts and texts whose batch could not be embedded
    /// get zero vectors.
    pub async fn embed_texts(&self, texts: &[String]) -> EmbeddingBatch {
        let mut vectors: Vec<Vec<f32>> = vec![Vec::new(); texts.len()];
        let mut degraded = 0;

        let pending: Vec<usize> = texts
            .iter()
            .enumerate()
            .filter_map(|(i, t)| {
                if t.trim().is_empty() {
                    None
                } else {
                    Some(i)
                }
            })
            .collect();

        for batch in pending.chunks(self.batch_size) {
            let inputs: Vec<String> = batch.iter().map(|&i| texts[i].clone()).collect();
            match self.embed_batch(&inputs).await {
                Ok(batch_vectors) => {
                    for (&i, v) in batch.iter().zip(batch_vectors) {
                        vectors[i] = v;
                    }
                }
                Err(e) => {
                    error!(
                        "Embedding batch failed, using zero vectors: size={}, error={}",
                        batch.len(),
                        e
                    );
                    if let Some(metrics) = &self.metrics {
                        metrics.record_embedding_batch_failure();
                    }
                    degraded += batch.len();
                }
            }
        }

        for v in vectors.iter_mut().filter(|v| v.is_empty()) {
            *v = self.zero_vector();
        }

        debug!(
            "Embedded texts: total={}, requested={}, degraded={}",
            texts.len(),
            pending.len(),
            degraded
        );
        EmbeddingBatch { vectors, degraded }
    }

    /// Embed a search query, served from the query cache when possible
    pub async fn embed_query(&self, query: &str) -> Vec<f32> {
        let key = query.trim().to_string();
        if let Some(cached) = self.query_cache.get(&key).await {
            return cached.as_ref().clone();
        }

        let batch = self.embed_texts(std::slice::from_ref(&key)).await;
        let vector = batch.vectors.into_iter().next().unwrap_or_else(|| self.zero_vector());
        if !is_zero_vector(&vector) {
            self.query_cache.insert(key, Arc::new(vector.clone())).await;
        }
        vector
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let provider = self.provider.name().to_string();
        if self.breaker.is_open(&provider) {
            return Err(EmbeddingError::RequestFailed(format!(
                "circuit open for provider {}",
                provider
            )));
        }

        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = self.provider.embed(texts).await.and_then(|vectors| {
                if vectors.len() == texts.len() {
                    Ok(vectors)
                } else {
                    Err(EmbeddingError::InvalidResponse(format!(
                        "expected {} embeddings, got {}",
                        texts.len(),
                        vectors.len()
                    )))
                }
            });

            match result {
                Ok(vectors) => {
                    self.breaker.mark_success(&provider);
                    if let Some(metrics) = &self.metrics {
                        metrics.record_embedding_request(true);
                    }
                    return Ok(vectors);
                }
                Err(e) => {
                    self.breaker.mark_failure(&provider);
                    if let Some(metrics) = &self.metrics {
                        metrics.record_embedding_request(false);
                    }
                    if attempt >= self.max_retries || !e.is_retryable() {
                        return Err(e);
                    }
                    let backoff = self.backoff(attempt);
                    warn!(
                        "Embedding attempt {} failed: {}, retrying in {:?}",
                        attempt, e, backoff
                    );
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }

    /// Exponential backoff with up to 25% random jitter
    fn backoff(&self, attempt: usize) -> Duration {
        let base = self
            .retry_backoff
            .saturating_mul(2_u32.saturating_pow((attempt - 1) as u32));
        let jitter_ms = (base.as_millis() / 4) as u64;
        let jitter = rand::thread_rng().gen_range(0..=jitter_ms);
        base + Duration::from_millis(jitter)
    }
}
