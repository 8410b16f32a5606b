//! Conversation core for a multi-tenant chat backend
//!
//! - [`context`]: fits conversation history into a model's token budget
//! - [`chunking`]: splits documents into retrievable chunks
//! - [`tools`]: approval-gated, cached tool execution state machine
//! - [`retrieval`]: vector, keyword and hybrid search with weighted merging
//!
//! Supporting modules cover embeddings, LLM providers, persistence, secrets,
//! auditing, metrics and configuration. [`services::CoreServices`] wires them
//! together.

pub mod audit;
pub mod chat;
pub mod chunking;
pub mod config;
pub mod context;
pub mod embedding;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod providers;
pub mod retrieval;
pub mod services;
pub mod storage;
pub mod tools;
pub mod vault;

pub use error::{CoreError, Result};

/// Commonly used types
pub mod prelude {
    pub use crate::audit::{AuditEvent, AuditSink, ChannelAuditSink, TracingAuditSink};
    pub use crate::chat::{ChatService, ChatTurn};
    pub use crate::chunking::{Chunk, ChunkType, ChunkingEngine, DocumentInput};
    pub use crate::config::Config;
    pub use crate::context::{
        ChatMessage, ContextWindowManager, HeuristicEstimator, Message, Role, TokenBudget,
        TokenEstimator, TruncationStrategy,
    };
    pub use crate::embedding::{DocumentIndexer, EmbeddingProvider, EmbeddingService};
    pub use crate::error::{CoreError, Result};
    pub use crate::metrics::Metrics;
    pub use crate::providers::{ChatProvider, ProviderRegistry};
    pub use crate::retrieval::{HybridSearcher, RetrievalMerger, SearchMode, SearchResult};
    pub use crate::services::{Collaborators, CoreServices, Stores};
    pub use crate::storage::{ChunkFilter, ChunkStore, InMemoryStore, MessageStore, ToolStore};
    pub use crate::tools::{
        ApprovalDecision, ExecutionStatus, HandlerRunner, ToolDefinition, ToolExecution,
        ToolExecutionStateMachine, ToolHandler, ToolRunner,
    };
    pub use crate::vault::{SecretVault, StoredSecret};
}
