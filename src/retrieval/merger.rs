//! Weighted merge of vector and keyword result sets

use super::models::{ResultSource, SearchResult};
use crate::config::RetrievalConfig;
use crate::metrics::Metrics;
use indexmap::IndexMap;
use std::cmp::Ordering;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// Blends two ranked lists into one
///
/// A chunk found by both searches scores `vw * vector + kw * keyword`. A chunk
/// found by only one search keeps that search's weighted score, so single
/// source keyword hits are capped at `kw * raw`.
pub struct RetrievalMerger {
    vector_weight: f32,
    keyword_weight: f32,
    metrics: Option<Arc<Metrics>>,
}

struct Candidate {
    result: SearchResult,
    vector_score: Option<f32>,
    keyword_score: Option<f32>,
}

impl RetrievalMerger {
    pub fn new(config: &RetrievalConfig) -> Self {
        Self::with_weights(config.vector_weight, config.keyword_weight)
    }

    pub fn with_weights(vector_weight: f32, keyword_weight: f32) -> Self {
        Self {
            vector_weight,
            keyword_weight,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Merge, sort descending by blended score and keep `top_k`
    ///
    /// Equal scores keep insertion order, with vector results inserted first.
    pub fn merge(
        &self,
        vector_results: Vec<SearchResult>,
        keyword_results: Vec<SearchResult>,
        top_k: usize,
    ) -> Vec<SearchResult> {
        let vector_count = vector_results.len();
        let keyword_count = keyword_results.len();
        let mut candidates: IndexMap<Uuid, Candidate> = IndexMap::new();

        for result in vector_results {
            let score = result.relevance_score;
            candidates.entry(result.chunk_id).or_insert(Candidate {
                result,
                vector_score: Some(score),
                keyword_score: None,
            });
        }

        for result in keyword_results {
            let score = result.relevance_score;
            candidates
                .entry(result.chunk_id)
                .and_modify(|c| {
                    if c.keyword_score.is_none() {
                        c.keyword_score = Some(score);
                    }
                })
                .or_insert(Candidate {
                    result,
                    vector_score: None,
                    keyword_score: Some(score),
                });
        }

        let mut merged: Vec<SearchResult> = candidates
            .into_values()
            .map(|candidate| self.blend(candidate))
            .collect();

        merged.sort_by(|a, b| {
            b.relevance_score
                .partial_cmp(&a.relevance_score)
                .unwrap_or(Ordering::Equal)
        });
        merged.truncate(top_k);

        debug!(
            "Merged results: vector={}, keyword={}, returned={}",
            vector_count,
            keyword_count,
            merged.len()
        );
        if let Some(metrics) = &self.metrics {
            metrics.record_merge(merged.len());
        }
        merged
    }

    fn blend(&self, candidate: Candidate) -> SearchResult {
        let Candidate {
            mut result,
            vector_score,
            keyword_score,
        } = candidate;

        let (score, source) = match (vector_score, keyword_score) {
            (Some(v), Some(k)) => (
                self.vector_weight * v + self.keyword_weight * k,
                ResultSource::Hybrid,
            ),
            (Some(v), None) => (self.vector_weight * v, ResultSource::Vector),
            (None, Some(k)) => (self.keyword_weight * k, ResultSource::Keyword),
            (None, None) => (0.0, result.source),
        };
        result.relevance_score = score;
        result.source = source;
        result
    }
}

impl Default for RetrievalMerger {
    fn default() -> Self {
        Self::new(&RetrievalConfig::default())
    }
}
