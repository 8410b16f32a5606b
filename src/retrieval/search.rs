//! Vector, keyword and hybrid search over stored chunks

use super::merger::RetrievalMerger;
use super::models::{KeywordScoring, RagContext, ResultSource, SearchMode, SearchResult};
use crate::chunking::DocumentChunk;
use crate::config::RetrievalConfig;
use crate::embedding::{cosine_similarity, EmbeddingService};
use crate::error::Result;
use crate::metrics::Metrics;
use crate::storage::{ChunkFilter, ChunkStore};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

const BM25_K1: f32 = 1.2;
const BM25_B: f32 = 0.75;
/// Candidate pool per requested result when ranking keyword hits with BM25
const BM25_CANDIDATE_FACTOR: usize = 5;

pub struct HybridSearcher {
    store: Arc<dyn ChunkStore>,
    embeddings: Arc<EmbeddingService>,
    merger: RetrievalMerger,
    scoring: KeywordScoring,
    placeholder_score: f32,
    default_top_k: usize,
    metrics: Option<Arc<Metrics>>,
}

impl HybridSearcher {
    pub fn new(
        store: Arc<dyn ChunkStore>,
        embeddings: Arc<EmbeddingService>,
        config: &RetrievalConfig,
    ) -> Self {
        Self {
            store,
            embeddings,
            merger: RetrievalMerger::new(config),
            scoring: config.keyword_scoring,
            placeholder_score: config.placeholder_score,
            default_top_k: config.default_top_k,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.merger = self.merger.with_metrics(metrics.clone());
        self.metrics = Some(metrics);
        self
    }

    pub fn default_top_k(&self) -> usize {
        self.default_top_k
    }

    /// Chunks ranked by cosine similarity to `query_embedding`
    ///
    /// Chunks without an embedding, or with a zero vector, are skipped.
    pub async fn vector_search(
        &self,
        query_embedding: &[f32],
        top_k: usize,
        filter: &ChunkFilter,
        min_score: Option<f32>,
    ) -> Result<Vec<SearchResult>> {
        let chunks = self.store.scan_chunks(filter).await?;
        let mut results: Vec<SearchResult> = chunks
            .iter()
            .filter_map(|chunk| {
                let embedding = chunk.embedding.as_deref()?;
                let score = cosine_similarity(query_embedding, embedding)?.clamp(0.0, 1.0);
                if min_score.map_or(false, |min| score < min) {
                    return None;
                }
                Some(SearchResult::from_chunk(chunk, score, ResultSource::Vector))
            })
            .collect();

        sort_by_score(&mut results);
        results.truncate(top_k);
        Ok(results)
    }

    /// Chunks containing `query` (case-insensitive)
    pub async fn keyword_search(
        &self,
        query: &str,
        top_k: usize,
        filter: &ChunkFilter,
    ) -> Result<Vec<SearchResult>> {
        let query = query.trim();
        if query.is_empty() {
            return Ok(Vec::new());
        }

        match self.scoring {
            KeywordScoring::Placeholder => {
                let chunks = self.store.find_chunks_containing(filter, query, top_k).await?;
                Ok(chunks
                    .iter()
                    .map(|c| {
                        SearchResult::from_chunk(c, self.placeholder_score, ResultSource::Keyword)
                    })
                    .collect())
            }
            KeywordScoring::Bm25 => {
                let pool = top_k.saturating_mul(BM25_CANDIDATE_FACTOR);
                let chunks = self.store.find_chunks_containing(filter, query, pool).await?;
                let scores = bm25_scores(query, &chunks);
                let max = scores.iter().cloned().fold(0.0f32, f32::max);

                let mut results: Vec<SearchResult> = chunks
                    .iter()
                    .zip(scores)
                    .map(|(chunk, score)| {
                        let normalized = if max > 0.0 {
                            score / max
                        } else {
                            self.placeholder_score
                        };
                        SearchResult::from_chunk(chunk, normalized, ResultSource::Keyword)
                    })
                    .collect();
                sort_by_score(&mut results);
                results.truncate(top_k);
                Ok(results)
            }
        }
    }

    /// Search in the requested mode
    pub async fn search(
        &self,
        query: &str,
        mode: SearchMode,
        top_k: usize,
        filter: &ChunkFilter,
    ) -> Result<Vec<SearchResult>> {
        let results = match &self.metrics {
            Some(metrics) => crate::time_operation!(
                metrics.retrieval_duration,
                mode.as_str(),
                self.run_search(query, mode, top_k, filter).await
            ),
            None => self.run_search(query, mode, top_k, filter).await,
        }?;

        info!(
            "Search completed: mode={}, top_k={}, results={}",
            mode.as_str(),
            top_k,
            results.len()
        );
        Ok(results)
    }

    async fn run_search(
        &self,
        query: &str,
        mode: SearchMode,
        top_k: usize,
        filter: &ChunkFilter,
    ) -> Result<Vec<SearchResult>> {
        match mode {
            SearchMode::Vector => {
                let embedding = self.embeddings.embed_query(query).await;
                self.vector_search(&embedding, top_k, filter, None).await
            }
            SearchMode::Keyword => self.keyword_search(query, top_k, filter).await,
            SearchMode::Hybrid => {
                let embedding = self.embeddings.embed_query(query).await;
                let vector = self.vector_search(&embedding, top_k, filter, None).await?;
                let keyword = self.keyword_search(query, top_k, filter).await?;
                debug!(
                    "Hybrid candidates: vector={}, keyword={}",
                    vector.len(),
                    keyword.len()
                );
                Ok(self.merger.merge(vector, keyword, top_k))
            }
        }
    }

    /// Top hybrid results packaged for prompt construction
    pub async fn rag_context(
        &self,
        query: &str,
        top_k: usize,
        filter: &ChunkFilter,
    ) -> Result<RagContext> {
        let results = self.search(query, SearchMode::Hybrid, top_k, filter).await?;
        Ok(RagContext::from_results(results))
    }
}

fn sort_by_score(results: &mut [SearchResult]) {
    results.sort_by(|a, b| {
        b.relevance_score
            .partial_cmp(&a.relevance_score)
            .unwrap_or(Ordering::Equal)
    });
}

fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// Okapi BM25 of `query` against each chunk, with the chunks as the corpus
fn bm25_scores(query: &str, chunks: &[DocumentChunk]) -> Vec<f32> {
    if chunks.is_empty() {
        return Vec::new();
    }

    let docs: Vec<Vec<String>> = chunks.iter().map(|c| tokenize(&c.content)).collect();
    let n = docs.len() as f32;
    let avgdl = (docs.iter().map(|d| d.len()).sum::<usize>() as f32 / n).max(1.0);

    let mut terms = tokenize(query);
    terms.sort();
    terms.dedup();

    let idf: HashMap<&str, f32> = terms
        .iter()
        .map(|term| {
            let df = docs.iter().filter(|d| d.contains(term)).count() as f32;
            (term.as_str(), ((n - df + 0.5) / (df + 0.5) + 1.0).ln())
        })
        .collect();

    docs.iter()
        .map(|doc| {
            let dl = doc.len() as f32;
            terms
                .iter()
                .map(|term| {
                    let tf = doc.iter().filter(|t| *t == term).count() as f32;
                    if tf == 0.0 {
                        return 0.0;
                    }
                    let norm = tf + BM25_K1 * (1.0 - BM25_B + BM25_B * dl / avgdl);
                    idf[term.as_str()] * tf * (BM25_K1 + 1.0) / norm
                })
                .sum()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunking::{Chunk, ChunkType};
    use crate::config::EmbeddingConfig;
    use crate::embedding::{EmbeddingError, EmbeddingProvider};
    use crate::storage::InMemoryStore;
    use async_trait::async_trait;
    use serde_json::Map;
    use uuid::Uuid;

    /// Maps "rust" to x, "python" to y, anything else to zero
    struct AxisProvider;

    #[async_trait]
    impl EmbeddingProvider for AxisProvider {
        fn name(&self) -> &str {
            "axis"
        }

        fn dimension(&self) -> usize {
            2
        }

        async fn embed(
            &self,
            texts: &[String],
        ) -> std::result::Result<Vec<Vec<f32>>, EmbeddingError> {
            Ok(texts
                .iter()
                .map(|t| {
                    let t = t.to_lowercase();
                    if t.contains("rust") {
                        vec![1.0, 0.0]
                    } else if t.contains("python") {
                        vec![0.0, 1.0]
                    } else {
                        vec![0.0, 0.0]
                    }
                })
                .collect())
        }
    }

    fn chunk(
        document_id: Uuid,
        owner: &str,
        index: usize,
        content: &str,
        embedding: Vec<f32>,
    ) -> DocumentChunk {
        DocumentChunk::from_chunk(
            document_id,
            owner,
            Chunk {
                chunk_index: index,
                chunk_type: ChunkType::Text,
                content: content.to_string(),
                token_count: content.len() / 4,
                char_count: content.len(),
                keywords: vec![],
                metadata: Map::new(),
            },
            Some(embedding),
        )
    }

    async fn searcher(scoring: KeywordScoring) -> (HybridSearcher, Uuid) {
        let store = Arc::new(InMemoryStore::new());
        let doc = Uuid::new_v4();
        store
            .replace_document_chunks(
                doc,
                vec![
                    chunk(doc, "tenant-a", 0, "Rust ownership and borrowing", vec![1.0, 0.0]),
                    chunk(doc, "tenant-a", 1, "Python has a garbage collector", vec![0.0, 1.0]),
                    chunk(doc, "tenant-a", 2, "Rust rust rust everywhere", vec![0.7, 0.7]),
                    chunk(doc, "tenant-a", 3, "Degraded chunk about rust", vec![0.0, 0.0]),
                ],
            )
            .await
            .unwrap();
        let other = Uuid::new_v4();
        store
            .replace_document_chunks(
                other,
                vec![chunk(other, "tenant-b", 0, "Rust secrets of tenant b", vec![1.0, 0.0])],
            )
            .await
            .unwrap();

        let embeddings = EmbeddingService::new(
            Arc::new(AxisProvider),
            &EmbeddingConfig {
                dimension: 2,
                ..Default::default()
            },
        );
        let config = RetrievalConfig {
            keyword_scoring: scoring,
            ..Default::default()
        };
        (HybridSearcher::new(store, Arc::new(embeddings), &config), doc)
    }

    #[tokio::test]
    async fn test_vector_search_skips_zero_vectors_and_other_tenants() {
        let (searcher, _) = searcher(KeywordScoring::Placeholder).await;
        let results = searcher
            .vector_search(&[1.0, 0.0], 10, &ChunkFilter::for_user("tenant-a"), None)
            .await
            .unwrap();

        let indices: Vec<usize> = results.iter().map(|r| r.chunk_index).collect();
        assert_eq!(indices, vec![0, 2, 1]);
        assert!((results[0].relevance_score - 1.0).abs() < 1e-6);
        assert_eq!(results[2].relevance_score, 0.0);
    }

    #[tokio::test]
    async fn test_vector_search_min_score() {
        let (searcher, _) = searcher(KeywordScoring::Placeholder).await;
        let results = searcher
            .vector_search(&[1.0, 0.0], 10, &ChunkFilter::for_user("tenant-a"), Some(0.5))
            .await
            .unwrap();
        assert_eq!(results.len(), 2);
    }

    #[tokio::test]
    async fn test_keyword_placeholder_scores() {
        let (searcher, _) = searcher(KeywordScoring::Placeholder).await;
        let results = searcher
            .keyword_search("RUST", 10, &ChunkFilter::for_user("tenant-a"))
            .await
            .unwrap();
        assert_eq!(results.len(), 3);
        assert!(results.iter().all(|r| r.relevance_score == 0.5));
        assert!(results.iter().all(|r| r.source == ResultSource::Keyword));
    }

    #[tokio::test]
    async fn test_keyword_bm25_ranks_by_term_frequency() {
        let (searcher, _) = searcher(KeywordScoring::Bm25).await;
        let results = searcher
            .keyword_search("rust", 10, &ChunkFilter::for_user("tenant-a"))
            .await
            .unwrap();
        assert_eq!(results[0].chunk_index, 2);
        assert!((results[0].relevance_score - 1.0).abs() < 1e-6);
        assert!(results.iter().all(|r| (0.0..=1.0).contains(&r.relevance_score)));
    }

    #[tokio::test]
    async fn test_empty_keyword_query() {
        let (searcher, _) = searcher(KeywordScoring::Placeholder).await;
        let results = searcher
            .keyword_search("  ", 10, &ChunkFilter::default())
            .await
            .unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_hybrid_search_and_rag_context() {
        let (searcher, doc) = searcher(KeywordScoring::Placeholder).await;
        let searcher = searcher.with_metrics(Arc::new(Metrics::new().unwrap()));
        let filter = ChunkFilter::for_user("tenant-a");

        let results = searcher.search("rust", SearchMode::Hybrid, 2, &filter).await.unwrap();
        assert_eq!(results.len(), 2);
        // vector 1.0 + keyword 0.5
        assert_eq!(results[0].chunk_index, 0);
        assert!((results[0].relevance_score - 0.85).abs() < 1e-5);
        assert_eq!(results[0].source, ResultSource::Hybrid);

        let context = searcher.rag_context("rust", 3, &filter).await.unwrap();
        assert_eq!(context.chunks.len(), 3);
        assert_eq!(context.sources, vec![doc]);
        assert_eq!(
            context.total_tokens,
            context.chunks.iter().map(|c| c.token_count).sum::<usize>()
        );
    }
}
