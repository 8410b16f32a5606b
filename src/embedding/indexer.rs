//! Chunk, embed and store a document

use super::service::EmbeddingService;
use crate::chunking::{ChunkingEngine, DocumentChunk, DocumentInput};
use crate::error::Result;
use crate::storage::ChunkStore;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Outcome of indexing one document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexReport {
    pub document_id: Uuid,
    pub chunk_count: usize,
    pub total_tokens: usize,
    /// Chunks stored with a zero vector
    pub degraded_embeddings: usize,
    /// Whether chunking fell back to a single truncated chunk
    pub chunking_fallback: bool,
}

pub struct DocumentIndexer {
    chunker: Arc<ChunkingEngine>,
    embeddings: Arc<EmbeddingService>,
    store: Arc<dyn ChunkStore>,
}

impl DocumentIndexer {
    pub fn new(
        chunker: Arc<ChunkingEngine>,
        embeddings: Arc<EmbeddingService>,
        store: Arc<dyn ChunkStore>,
    ) -> Self {
        Self {
            chunker,
            embeddings,
            store,
        }
    }

    /// Replace the stored chunk set of `document_id` with a fresh one
    pub async fn index_document(
        &self,
        document_id: Uuid,
        owner_id: &str,
        input: &DocumentInput,
    ) -> Result<IndexReport> {
        let chunks = self.chunker.chunk_document(input);
        let chunking_fallback = chunks.iter().any(|c| c.is_fallback());

        let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
        let batch = self.embeddings.embed_texts(&texts).await;
        if batch.degraded > 0 {
            warn!(
                "Document indexed with degraded embeddings: document_id={}, degraded={}",
                document_id, batch.degraded
            );
        }

        let total_tokens = chunks.iter().map(|c| c.token_count).sum();
        let records: Vec<DocumentChunk> = chunks
            .into_iter()
            .zip(batch.vectors)
            .map(|(chunk, vector)| {
                DocumentChunk::from_chunk(document_id, owner_id, chunk, Some(vector))
                    .with_access(input.is_public, input.tags.clone())
            })
            .collect();
        let chunk_count = records.len();

        self.store.replace_document_chunks(document_id, records).await?;

        info!(
            "Indexed document: document_id={}, chunks={}, tokens={}, public={}",
            document_id, chunk_count, total_tokens, input.is_public
        );

        Ok(IndexReport {
            document_id,
            chunk_count,
            total_tokens,
            degraded_embeddings: batch.degraded,
            chunking_fallback,
        })
    }

    /// Index several documents concurrently; results follow input order
    pub async fn index_documents(
        &self,
        documents: &[(Uuid, String, DocumentInput)],
    ) -> Vec<Result<IndexReport>> {
        join_all(documents.iter().map(|(document_id, owner_id, input)| {
            self.index_document(*document_id, owner_id, input)
        }))
        .await
    }

    /// Remove every chunk of a document
    pub async fn remove_document(&self, document_id: Uuid) -> Result<usize> {
        let removed = self.store.delete_document_chunks(document_id).await?;
        info!("Removed document chunks: document_id={}, removed={}", document_id, removed);
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ChunkingConfig, EmbeddingConfig};
    use crate::context::HeuristicEstimator;
    use crate::embedding::{EmbeddingError, EmbeddingProvider};
    use crate::storage::InMemoryStore;
    use async_trait::async_trait;

    struct UnitProvider;

    #[async_trait]
    impl EmbeddingProvider for UnitProvider {
        fn name(&self) -> &str {
            "unit"
        }

        fn dimension(&self) -> usize {
            2
        }

        async fn embed(
            &self,
            texts: &[String],
        ) -> std::result::Result<Vec<Vec<f32>>, EmbeddingError> {
            Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
        }
    }

    fn indexer(store: Arc<InMemoryStore>) -> DocumentIndexer {
        let chunker = ChunkingEngine::new(
            ChunkingConfig {
                chunk_size: 50,
                chunk_overlap: 10,
                max_chunk_size: 100,
                max_keywords: 5,
            },
            Arc::new(HeuristicEstimator::default()),
        );
        let embeddings = EmbeddingService::new(
            Arc::new(UnitProvider),
            &EmbeddingConfig {
                dimension: 2,
                ..Default::default()
            },
        );
        DocumentIndexer::new(Arc::new(chunker), Arc::new(embeddings), store)
    }

    #[tokio::test]
    async fn test_index_and_reindex_replaces_chunks() {
        let store = Arc::new(InMemoryStore::new());
        let indexer = indexer(store.clone());
        let document_id = Uuid::new_v4();

        let text = (0..6)
            .map(|i| format!("Paragraph {} covers borrowing rules.", i))
            .collect::<Vec<_>>()
            .join("\n\n");
        let report = indexer
            .index_document(document_id, "owner-1", &DocumentInput::from_text(text))
            .await
            .unwrap();
        assert!(report.chunk_count > 1);
        assert_eq!(report.degraded_embeddings, 0);
        assert!(!report.chunking_fallback);

        let stored = store.document_chunks(document_id).await.unwrap();
        assert_eq!(stored.len(), report.chunk_count);
        assert!(stored.iter().all(|c| c.embedding.as_deref() == Some(&[1.0, 0.0][..])));

        let report = indexer
            .index_document(document_id, "owner-1", &DocumentInput::from_text("Short now."))
            .await
            .unwrap();
        assert_eq!(report.chunk_count, 1);
        assert_eq!(store.document_chunks(document_id).await.unwrap().len(), 1);

        assert_eq!(indexer.remove_document(document_id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_chunks_inherit_document_access() {
        let store = Arc::new(InMemoryStore::new());
        let indexer = indexer(store.clone());
        let document_id = Uuid::new_v4();

        let input = DocumentInput::from_text("Shared onboarding guide.")
            .public()
            .with_tags(["onboarding", "hr"]);
        indexer
            .index_document(document_id, "owner-1", &input)
            .await
            .unwrap();

        let stored = store.document_chunks(document_id).await.unwrap();
        assert!(stored.iter().all(|c| c.is_public));
        assert!(stored
            .iter()
            .all(|c| c.tags == vec!["onboarding".to_string(), "hr".to_string()]));
    }

    #[tokio::test]
    async fn test_index_many_documents() {
        let store = Arc::new(InMemoryStore::new());
        let indexer = indexer(store.clone());
        let documents: Vec<_> = (0..3)
            .map(|i| {
                (
                    Uuid::new_v4(),
                    "owner-1".to_string(),
                    DocumentInput::from_text(format!("Document number {}", i)),
                )
            })
            .collect();

        let reports = indexer.index_documents(&documents).await;
        assert_eq!(reports.len(), 3);
        for ((document_id, _, _), report) in documents.iter().zip(reports) {
            assert_eq!(report.unwrap().document_id, *document_id);
        }
    }
}
