//! Embedding generation and document indexing
//!
//! Providers turn text into vectors. [`EmbeddingService`] wraps a provider
//! with batching, retries and a circuit breaker, and degrades failed batches
//! to zero vectors instead of failing the caller.

pub mod circuit_breaker;
pub mod http;
pub mod indexer;
pub mod service;

pub use circuit_breaker::{BreakerState, BreakerStats, CircuitBreaker, CircuitBreakerConfig};
pub use http::HttpEmbeddingProvider;
pub use indexer::{DocumentIndexer, IndexReport};
pub use service::EmbeddingService;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("Embedding request failed: {0}")]
    RequestFailed(String),

    #[error("Embedding request timed out: {0}")]
    Timeout(String),

    #[error("Embedding provider returned status {status}: {body}")]
    Upstream { status: u16, body: String },

    #[error("Invalid embedding response: {0}")]
    InvalidResponse(String),

    #[error("Missing API key: environment variable {0} is not set")]
    MissingApiKey(String),
}

impl EmbeddingError {
    /// Rate limits and server errors are worth retrying, client errors are not
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RequestFailed(_) | Self::Timeout(_) => true,
            Self::Upstream { status, .. } => *status == 429 || *status >= 500,
            Self::InvalidResponse(_) | Self::MissingApiKey(_) => false,
        }
    }
}

/// Source of text embeddings
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Short identifier used for logs, metrics and the circuit breaker
    fn name(&self) -> &str;

    /// Vector length this provider produces
    fn dimension(&self) -> usize;

    /// One vector per input text, in input order
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;
}

/// Cosine similarity; `None` when either vector carries no signal
///
/// Zero vectors are what degraded embeddings look like, so they are skipped
/// rather than scored as zero.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Option<f32> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return None;
    }
    Some(dot / denom)
}

pub fn is_zero_vector(v: &[f32]) -> bool {
    v.iter().all(|x| *x == 0.0)
}
