//! Search result types

use crate::chunking::DocumentChunk;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::str::FromStr;
use uuid::Uuid;

/// Which search produced a result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultSource {
    Vector,
    Keyword,
    Hybrid,
}

/// Search strategy requested by the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    Vector,
    Keyword,
    #[default]
    Hybrid,
}

impl SearchMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Vector => "vector",
            Self::Keyword => "keyword",
            Self::Hybrid => "hybrid",
        }
    }
}

impl FromStr for SearchMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "vector" => Ok(Self::Vector),
            "keyword" => Ok(Self::Keyword),
            "hybrid" => Ok(Self::Hybrid),
            other => Err(format!("unknown search mode: {}", other)),
        }
    }
}

/// How keyword hits are scored
///
/// `Placeholder` gives every substring hit the same configured score, so
/// keyword results carry no ranking signal of their own. `Bm25` scores hits
/// against the candidate set and normalizes to `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeywordScoring {
    #[default]
    Placeholder,
    Bm25,
}

/// One ranked chunk
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub chunk_id: Uuid,
    pub document_id: Uuid,
    pub chunk_index: usize,
    pub content: String,
    pub token_count: usize,
    pub relevance_score: f32,
    pub source: ResultSource,
    pub metadata: Map<String, Value>,
}

impl SearchResult {
    pub fn from_chunk(chunk: &DocumentChunk, relevance_score: f32, source: ResultSource) -> Self {
        Self {
            chunk_id: chunk.id,
            document_id: chunk.document_id,
            chunk_index: chunk.chunk_index,
            content: chunk.content.clone(),
            token_count: chunk.token_count,
            relevance_score,
            source,
            metadata: chunk.metadata.clone(),
        }
    }
}

/// Retrieved chunks ready to be placed in a prompt
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RagContext {
    pub chunks: Vec<SearchResult>,
    pub total_tokens: usize,
    /// Distinct source documents, in first-appearance order
    pub sources: Vec<Uuid>,
}

impl RagContext {
    pub fn from_results(chunks: Vec<SearchResult>) -> Self {
        let total_tokens = chunks.iter().map(|c| c.token_count).sum();
        let mut sources: Vec<Uuid> = Vec::new();
        for chunk in &chunks {
            if !sources.contains(&chunk.document_id) {
                sources.push(chunk.document_id);
            }
        }
        Self {
            chunks,
            total_tokens,
            sources,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Chunk contents joined for a prompt, separated by blank lines
    pub fn render(&self) -> String {
        self.chunks
            .iter()
            .map(|c| c.content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}
