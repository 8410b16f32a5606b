//! In-memory backend, useful for tests and single-process deployments

use super::{ChunkFilter, ChunkStore, MessageStore, StorageError, StorageResult, ToolStore};
use crate::chunking::DocumentChunk;
use crate::context::{Conversation, Message};
use crate::tools::{
    ApprovalStatus, ExecutionStatus, ToolApproval, ToolCacheEntry, ToolDefinition, ToolExecution,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::HashSet;
use tracing::debug;
use uuid::Uuid;

/// Store backed by concurrent hash maps
///
/// Uniqueness constraints are enforced through the map entry API so that two
/// concurrent inserts of the same key cannot both succeed.
#[derive(Default)]
pub struct InMemoryStore {
    tools: DashMap<Uuid, ToolDefinition>,
    tool_names: DashMap<String, Uuid>,
    executions: DashMap<Uuid, ToolExecution>,
    approvals: DashMap<Uuid, ToolApproval>,
    cache: DashMap<String, ToolCacheEntry>,
    chunks: DashMap<Uuid, Vec<DocumentChunk>>,
    conversations: DashMap<Uuid, Conversation>,
    messages: DashMap<Uuid, Vec<Message>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cache_entry_count(&self) -> usize {
        self.cache.len()
    }
}

#[async_trait]
impl ToolStore for InMemoryStore {
    async fn insert_tool(&self, tool: ToolDefinition) -> StorageResult<()> {
        match self.tool_names.entry(tool.name.clone()) {
            Entry::Occupied(_) => Err(StorageError::UniqueViolation(format!(
                "tool name '{}'",
                tool.name
            ))),
            Entry::Vacant(slot) => {
                slot.insert(tool.id);
                self.tools.insert(tool.id, tool);
                Ok(())
            }
        }
    }

    async fn get_tool(&self, id: Uuid) -> StorageResult<Option<ToolDefinition>> {
        Ok(self.tools.get(&id).map(|t| t.clone()))
    }

    async fn list_tools(&self) -> StorageResult<Vec<ToolDefinition>> {
        let mut tools: Vec<_> = self.tools.iter().map(|t| t.clone()).collect();
        tools.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(tools)
    }

    async fn record_tool_outcome(
        &self,
        id: Uuid,
        success: bool,
        elapsed_ms: u64,
    ) -> StorageResult<ToolDefinition> {
        let mut tool = self
            .tools
            .get_mut(&id)
            .ok_or_else(|| StorageError::Missing(format!("tool {}", id)))?;
        tool.record_outcome(success, elapsed_ms);
        Ok(tool.clone())
    }

    async fn insert_execution(&self, execution: &ToolExecution) -> StorageResult<()> {
        match self.executions.entry(execution.id) {
            Entry::Occupied(_) => Err(StorageError::UniqueViolation(format!(
                "execution {}",
                execution.id
            ))),
            Entry::Vacant(slot) => {
                slot.insert(execution.clone());
                Ok(())
            }
        }
    }

    async fn update_execution_if(
        &self,
        execution: &ToolExecution,
        expected: ExecutionStatus,
    ) -> StorageResult<bool> {
        let mut stored = self
            .executions
            .get_mut(&execution.id)
            .ok_or_else(|| StorageError::Missing(format!("execution {}", execution.id)))?;
        if stored.status != expected {
            return Ok(false);
        }
        *stored = execution.clone();
        Ok(true)
    }

    async fn get_execution(&self, id: Uuid) -> StorageResult<Option<ToolExecution>> {
        Ok(self.executions.get(&id).map(|e| e.clone()))
    }

    async fn executions_with_status(
        &self,
        status: ExecutionStatus,
    ) -> StorageResult<Vec<ToolExecution>> {
        let mut found: Vec<_> = self
            .executions
            .iter()
            .filter(|e| e.status == status)
            .map(|e| e.clone())
            .collect();
        found.sort_by_key(|e| e.created_at);
        Ok(found)
    }

    async fn insert_approval(&self, approval: &ToolApproval) -> StorageResult<()> {
        match self.approvals.entry(approval.id) {
            Entry::Occupied(_) => Err(StorageError::UniqueViolation(format!(
                "approval {}",
                approval.id
            ))),
            Entry::Vacant(slot) => {
                slot.insert(approval.clone());
                Ok(())
            }
        }
    }

    async fn update_approval_if(
        &self,
        approval: &ToolApproval,
        expected: ApprovalStatus,
    ) -> StorageResult<bool> {
        let mut stored = self
            .approvals
            .get_mut(&approval.id)
            .ok_or_else(|| StorageError::Missing(format!("approval {}", approval.id)))?;
        if stored.status != expected {
            return Ok(false);
        }
        *stored = approval.clone();
        Ok(true)
    }

    async fn get_approval(&self, id: Uuid) -> StorageResult<Option<ToolApproval>> {
        Ok(self.approvals.get(&id).map(|a| a.clone()))
    }

    async fn pending_approvals(&self) -> StorageResult<Vec<ToolApproval>> {
        let mut pending: Vec<_> = self
            .approvals
            .iter()
            .filter(|a| a.status == ApprovalStatus::Pending)
            .map(|a| a.clone())
            .collect();
        pending.sort_by_key(|a| a.created_at);
        Ok(pending)
    }

    async fn get_cache_entry(&self, cache_key: &str) -> StorageResult<Option<ToolCacheEntry>> {
        Ok(self.cache.get(cache_key).map(|c| c.clone()))
    }

    async fn insert_cache_entry(&self, entry: ToolCacheEntry) -> StorageResult<()> {
        match self.cache.entry(entry.cache_key.clone()) {
            Entry::Occupied(mut existing) => {
                if existing.get().is_live(Utc::now()) {
                    return Err(StorageError::UniqueViolation(format!(
                        "cache key {}",
                        entry.cache_key
                    )));
                }
                debug!("Replacing expired cache entry: key={}", entry.cache_key);
                existing.insert(entry);
                Ok(())
            }
            Entry::Vacant(slot) => {
                slot.insert(entry);
                Ok(())
            }
        }
    }

    async fn record_cache_hit(
        &self,
        cache_key: &str,
        at: DateTime<Utc>,
    ) -> StorageResult<Option<ToolCacheEntry>> {
        Ok(self.cache.get_mut(cache_key).map(|mut entry| {
            entry.hit_count += 1;
            entry.last_hit_at = Some(at);
            entry.clone()
        }))
    }
}

#[async_trait]
impl ChunkStore for InMemoryStore {
    async fn replace_document_chunks(
        &self,
        document_id: Uuid,
        chunks: Vec<DocumentChunk>,
    ) -> StorageResult<()> {
        let mut seen = HashSet::new();
        for chunk in &chunks {
            if chunk.document_id != document_id {
                return Err(StorageError::Backend(format!(
                    "chunk {} belongs to document {}, not {}",
                    chunk.id, chunk.document_id, document_id
                )));
            }
            if !seen.insert(chunk.chunk_index) {
                return Err(StorageError::UniqueViolation(format!(
                    "document {} chunk_index {}",
                    document_id, chunk.chunk_index
                )));
            }
        }

        let mut ordered = chunks;
        ordered.sort_by_key(|c| c.chunk_index);
        self.chunks.insert(document_id, ordered);
        Ok(())
    }

    async fn insert_chunk(&self, chunk: DocumentChunk) -> StorageResult<()> {
        let mut chunks = self.chunks.entry(chunk.document_id).or_default();
        if chunks.iter().any(|c| c.chunk_index == chunk.chunk_index) {
            return Err(StorageError::UniqueViolation(format!(
                "document {} chunk_index {}",
                chunk.document_id, chunk.chunk_index
            )));
        }
        let position = chunks
            .iter()
            .position(|c| c.chunk_index > chunk.chunk_index)
            .unwrap_or(chunks.len());
        chunks.insert(position, chunk);
        Ok(())
    }

    async fn document_chunks(&self, document_id: Uuid) -> StorageResult<Vec<DocumentChunk>> {
        Ok(self
            .chunks
            .get(&document_id)
            .map(|c| c.clone())
            .unwrap_or_default())
    }

    async fn delete_document_chunks(&self, document_id: Uuid) -> StorageResult<usize> {
        Ok(self
            .chunks
            .remove(&document_id)
            .map(|(_, removed)| removed.len())
            .unwrap_or(0))
    }

    async fn scan_chunks(&self, filter: &ChunkFilter) -> StorageResult<Vec<DocumentChunk>> {
        let mut found: Vec<DocumentChunk> = self
            .chunks
            .iter()
            .flat_map(|doc| {
                doc.value()
                    .iter()
                    .filter(|c| filter.matches(c))
                    .cloned()
                    .collect::<Vec<_>>()
            })
            .collect();
        found.sort_by(|a, b| {
            a.document_id
                .cmp(&b.document_id)
                .then(a.chunk_index.cmp(&b.chunk_index))
        });
        Ok(found)
    }

    async fn find_chunks_containing(
        &self,
        filter: &ChunkFilter,
        needle: &str,
        limit: usize,
    ) -> StorageResult<Vec<DocumentChunk>> {
        let needle = needle.to_lowercase();
        let mut found = self.scan_chunks(filter).await?;
        found.retain(|c| c.content.to_lowercase().contains(&needle));
        found.truncate(limit);
        Ok(found)
    }
}

#[async_trait]
impl MessageStore for InMemoryStore {
    async fn insert_conversation(&self, conversation: &Conversation) -> StorageResult<()> {
        match self.conversations.entry(conversation.id) {
            Entry::Occupied(_) => Err(StorageError::UniqueViolation(format!(
                "conversation {}",
                conversation.id
            ))),
            Entry::Vacant(slot) => {
                slot.insert(conversation.clone());
                Ok(())
            }
        }
    }

    async fn update_conversation(&self, conversation: &Conversation) -> StorageResult<()> {
        let mut stored = self
            .conversations
            .get_mut(&conversation.id)
            .ok_or_else(|| StorageError::Missing(format!("conversation {}", conversation.id)))?;
        *stored = conversation.clone();
        Ok(())
    }

    async fn get_conversation(&self, id: Uuid) -> StorageResult<Option<Conversation>> {
        Ok(self.conversations.get(&id).map(|c| c.clone()))
    }

    async fn append_message(&self, message: &Message) -> StorageResult<()> {
        if !self.conversations.contains_key(&message.conversation_id) {
            return Err(StorageError::Missing(format!(
                "conversation {}",
                message.conversation_id
            )));
        }
        self.messages
            .entry(message.conversation_id)
            .or_default()
            .push(message.clone());
        Ok(())
    }

    async fn messages(&self, conversation_id: Uuid) -> StorageResult<Vec<Message>> {
        Ok(self
            .messages
            .get(&conversation_id)
            .map(|m| m.clone())
            .unwrap_or_default())
    }
}
