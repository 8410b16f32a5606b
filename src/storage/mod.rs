//! Persistence interface for the core services
//!
//! The core only needs create/read/update on a handful of records plus two
//! uniqueness constraints: `(tool_id, input_hash)` for cached tool results and
//! `(document_id, chunk_index)` for document chunks. Backends surface a
//! violation as [`StorageError::UniqueViolation`] so callers can re-read.

pub mod memory;

pub use memory::InMemoryStore;

use crate::chunking::DocumentChunk;
use crate::context::{Conversation, Message};
use crate::tools::{
    ApprovalStatus, ExecutionStatus, ToolApproval, ToolCacheEntry, ToolDefinition, ToolExecution,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

/// Errors raised by persistence backends
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Unique constraint violated: {0}")]
    UniqueViolation(String),

    #[error("Record not found: {0}")]
    Missing(String),

    #[error("Backend failure: {0}")]
    Backend(String),
}

pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Tool definitions, executions, approvals and the result cache
#[async_trait]
pub trait ToolStore: Send + Sync {
    async fn insert_tool(&self, tool: ToolDefinition) -> StorageResult<()>;

    async fn get_tool(&self, id: Uuid) -> StorageResult<Option<ToolDefinition>>;

    async fn list_tools(&self) -> StorageResult<Vec<ToolDefinition>>;

    /// Apply one finished run to the tool's counters and return the new state
    async fn record_tool_outcome(
        &self,
        id: Uuid,
        success: bool,
        elapsed_ms: u64,
    ) -> StorageResult<ToolDefinition>;

    async fn insert_execution(&self, execution: &ToolExecution) -> StorageResult<()>;

    /// Overwrite the stored execution only while its status is still `expected`.
    ///
    /// Returns `false`, leaving the record untouched, when another writer
    /// moved it first.
    async fn update_execution_if(
        &self,
        execution: &ToolExecution,
        expected: ExecutionStatus,
    ) -> StorageResult<bool>;

    async fn get_execution(&self, id: Uuid) -> StorageResult<Option<ToolExecution>>;

    async fn executions_with_status(
        &self,
        status: ExecutionStatus,
    ) -> StorageResult<Vec<ToolExecution>>;

    async fn insert_approval(&self, approval: &ToolApproval) -> StorageResult<()>;

    /// Overwrite the stored approval only while its status is still `expected`
    async fn update_approval_if(
        &self,
        approval: &ToolApproval,
        expected: ApprovalStatus,
    ) -> StorageResult<bool>;

    async fn get_approval(&self, id: Uuid) -> StorageResult<Option<ToolApproval>>;

    async fn pending_approvals(&self) -> StorageResult<Vec<ToolApproval>>;

    async fn get_cache_entry(&self, cache_key: &str) -> StorageResult<Option<ToolCacheEntry>>;

    /// Fails with `UniqueViolation` when a live entry already holds the key
    async fn insert_cache_entry(&self, entry: ToolCacheEntry) -> StorageResult<()>;

    /// Bump hit metadata; the cached payload never changes
    async fn record_cache_hit(
        &self,
        cache_key: &str,
        at: DateTime<Utc>,
    ) -> StorageResult<Option<ToolCacheEntry>>;
}

/// Restricts chunk reads to what a user may see, optionally narrowed to a
/// set of documents or tags.
///
/// A user sees public chunks and chunks of documents they own. Tag filtering
/// keeps chunks sharing at least one tag with the filter; an empty tag list
/// does not filter.
#[derive(Debug, Clone, Default)]
pub struct ChunkFilter {
    pub user_id: Option<String>,
    pub document_ids: Option<Vec<Uuid>>,
    pub tags: Option<Vec<String>>,
}

impl ChunkFilter {
    pub fn for_user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            ..Default::default()
        }
    }

    pub fn with_documents(mut self, document_ids: Vec<Uuid>) -> Self {
        self.document_ids = Some(document_ids);
        self
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = Some(tags);
        self
    }

    pub fn matches(&self, chunk: &DocumentChunk) -> bool {
        let visible = self
            .user_id
            .as_ref()
            .map_or(true, |user| chunk.is_public || &chunk.owner_id == user);
        let doc_ok = self
            .document_ids
            .as_ref()
            .map_or(true, |ids| ids.contains(&chunk.document_id));
        let tags_ok = match &self.tags {
            Some(tags) if !tags.is_empty() => chunk.tags.iter().any(|t| tags.contains(t)),
            _ => true,
        };
        visible && doc_ok && tags_ok
    }
}

/// Document chunks
#[async_trait]
pub trait ChunkStore: Send + Sync {
    /// Delete every chunk of the document and insert `chunks` in its place
    async fn replace_document_chunks(
        &self,
        document_id: Uuid,
        chunks: Vec<DocumentChunk>,
    ) -> StorageResult<()>;

    async fn insert_chunk(&self, chunk: DocumentChunk) -> StorageResult<()>;

    async fn document_chunks(&self, document_id: Uuid) -> StorageResult<Vec<DocumentChunk>>;

    async fn delete_document_chunks(&self, document_id: Uuid) -> StorageResult<usize>;

    /// All chunks visible through `filter`, in document then index order
    async fn scan_chunks(&self, filter: &ChunkFilter) -> StorageResult<Vec<DocumentChunk>>;

    /// Case-insensitive substring match on chunk content
    async fn find_chunks_containing(
        &self,
        filter: &ChunkFilter,
        needle: &str,
        limit: usize,
    ) -> StorageResult<Vec<DocumentChunk>>;
}

/// Conversations and their messages
#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn insert_conversation(&self, conversation: &Conversation) -> StorageResult<()>;

    async fn update_conversation(&self, conversation: &Conversation) -> StorageResult<()>;

    async fn get_conversation(&self, id: Uuid) -> StorageResult<Option<Conversation>>;

    async fn append_message(&self, message: &Message) -> StorageResult<()>;

    /// Messages in creation order
    async fn messages(&self, conversation_id: Uuid) -> StorageResult<Vec<Message>>;
}
