//! Chunking inputs and outputs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Kind of content a chunk carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkType {
    Text,
    Table,
    Image,
}

impl ChunkType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Table => "table",
            Self::Image => "image",
        }
    }
}

/// Structural hints produced by the document processor
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DocumentStructure {
    #[serde(default)]
    pub pages: Vec<PageInfo>,
    #[serde(default)]
    pub sections: Vec<SectionInfo>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PageInfo {
    pub number: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SectionInfo {
    pub title: String,
    #[serde(default)]
    pub level: u8,
}

/// Table extracted from a document
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TableData {
    pub page_number: Option<usize>,
    pub table_index: Option<usize>,
    #[serde(default)]
    pub headers: Vec<String>,
    /// Markdown rendering of the table body
    #[serde(default)]
    pub markdown: String,
    #[serde(default)]
    pub row_count: usize,
    #[serde(default)]
    pub col_count: usize,
}

/// Image or figure extracted from a document
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImageData {
    pub page_number: Option<usize>,
    pub image_index: Option<usize>,
    /// e.g. "image", "chart", "diagram"
    pub image_type: Option<String>,
    pub caption: Option<String>,
    pub alt_text: Option<String>,
}

/// Everything the chunker can consume for one document
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DocumentInput {
    pub text: String,
    #[serde(default)]
    pub structure: Option<DocumentStructure>,
    #[serde(default)]
    pub tables: Vec<TableData>,
    #[serde(default)]
    pub images: Vec<ImageData>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    /// Visible to every user, not just the owner
    #[serde(default)]
    pub is_public: bool,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl DocumentInput {
    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    pub fn public(mut self) -> Self {
        self.is_public = true;
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }
}

/// A chunk as produced by the chunking engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub chunk_index: usize,
    pub chunk_type: ChunkType,
    pub content: String,
    pub token_count: usize,
    pub char_count: usize,
    pub keywords: Vec<String>,
    pub metadata: Map<String, Value>,
}

impl Chunk {
    /// Whether this is the degraded single chunk emitted after a failure
    pub fn is_fallback(&self) -> bool {
        self.metadata.contains_key("error")
    }
}

/// Persisted, embeddable chunk of a document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentChunk {
    pub id: Uuid,
    pub document_id: Uuid,
    /// Tenant that owns the source document
    pub owner_id: String,
    /// Copied from the source document
    #[serde(default)]
    pub is_public: bool,
    #[serde(default)]
    pub tags: Vec<String>,
    pub chunk_index: usize,
    pub chunk_type: ChunkType,
    pub content: String,
    pub token_count: usize,
    pub char_count: usize,
    pub keywords: Vec<String>,
    pub metadata: Map<String, Value>,
    pub embedding: Option<Vec<f32>>,
    pub created_at: DateTime<Utc>,
}

impl DocumentChunk {
    pub fn from_chunk(
        document_id: Uuid,
        owner_id: impl Into<String>,
        chunk: Chunk,
        embedding: Option<Vec<f32>>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            document_id,
            owner_id: owner_id.into(),
            is_public: false,
            tags: Vec::new(),
            chunk_index: chunk.chunk_index,
            chunk_type: chunk.chunk_type,
            content: chunk.content,
            token_count: chunk.token_count,
            char_count: chunk.char_count,
            keywords: chunk.keywords,
            metadata: chunk.metadata,
            embedding,
            created_at: Utc::now(),
        }
    }

    /// Carry the document's visibility and tags onto the chunk
    pub fn with_access(mut self, is_public: bool, tags: Vec<String>) -> Self {
        self.is_public = is_public;
        self.tags = tags;
        self
    }
}
