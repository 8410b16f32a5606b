//! Composition root
//!
//! Builds every core component from one [`Config`] with explicitly injected
//! collaborators. Nothing in the core reaches for global state; a process
//! keeps one `CoreServices` and hands out the `Arc`s it needs.

use crate::audit::AuditSink;
use crate::chat::ChatService;
use crate::chunking::ChunkingEngine;
use crate::config::Config;
use crate::context::{ContextWindowManager, TokenEstimator};
use crate::embedding::{DocumentIndexer, EmbeddingProvider, EmbeddingService};
use crate::error::{CoreError, Result};
use crate::metrics::Metrics;
use crate::providers::ProviderRegistry;
use crate::retrieval::{HybridSearcher, RetrievalMerger};
use crate::storage::{ChunkStore, InMemoryStore, MessageStore, ToolStore};
use crate::tools::{spawn_workers, ExecutionQueue, ToolExecutionStateMachine, ToolRunner};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

/// Persistence backends, one per record family
#[derive(Clone)]
pub struct Stores {
    pub tools: Arc<dyn ToolStore>,
    pub chunks: Arc<dyn ChunkStore>,
    pub messages: Arc<dyn MessageStore>,
}

impl Stores {
    /// All three families in one shared in-memory store
    pub fn in_memory() -> Self {
        let store = Arc::new(InMemoryStore::new());
        Self {
            tools: store.clone(),
            chunks: store.clone(),
            messages: store,
        }
    }
}

/// External collaborators the core cannot build itself
pub struct Collaborators {
    pub runner: Arc<dyn ToolRunner>,
    pub embedder: Arc<dyn EmbeddingProvider>,
    pub providers: ProviderRegistry,
    pub audit: Arc<dyn AuditSink>,
}

pub struct CoreServices {
    pub config: Config,
    pub stores: Stores,
    pub metrics: Arc<Metrics>,
    pub estimator: Arc<dyn TokenEstimator>,
    pub context: Arc<ContextWindowManager>,
    pub chunker: Arc<ChunkingEngine>,
    pub merger: Arc<RetrievalMerger>,
    pub embeddings: Arc<EmbeddingService>,
    pub indexer: Arc<DocumentIndexer>,
    pub searcher: Arc<HybridSearcher>,
    pub tools: Arc<ToolExecutionStateMachine>,
    pub chat: Arc<ChatService>,
    pub audit: Arc<dyn AuditSink>,
}

impl CoreServices {
    pub fn build(config: Config, stores: Stores, collaborators: Collaborators) -> Result<Self> {
        config.validate()?;

        let metrics = Arc::new(
            Metrics::new().map_err(|e| CoreError::Configuration(format!("metrics: {}", e)))?,
        );
        let estimator = config.context.tokenizer.build()?;
        let audit = collaborators.audit;

        let context = Arc::new(
            ContextWindowManager::new(&config.context, estimator.clone())
                .with_metrics(metrics.clone()),
        );
        let chunker = Arc::new(
            ChunkingEngine::new(config.chunking.clone(), estimator.clone())
                .with_metrics(metrics.clone()),
        );
        let merger =
            Arc::new(RetrievalMerger::new(&config.retrieval).with_metrics(metrics.clone()));

        let embeddings = Arc::new(
            EmbeddingService::new(collaborators.embedder, &config.embedding)
                .with_metrics(metrics.clone()),
        );
        let indexer = Arc::new(DocumentIndexer::new(
            chunker.clone(),
            embeddings.clone(),
            stores.chunks.clone(),
        ));
        let searcher = Arc::new(
            HybridSearcher::new(stores.chunks.clone(), embeddings.clone(), &config.retrieval)
                .with_metrics(metrics.clone()),
        );

        let queue = Arc::new(ExecutionQueue::new(config.tools.max_delivery_attempts));
        let tools = Arc::new(ToolExecutionStateMachine::new(
            stores.tools.clone(),
            collaborators.runner,
            queue,
            metrics.clone(),
            audit.clone(),
            config.tools.clone(),
        ));

        let chat = Arc::new(
            ChatService::new(
                stores.messages.clone(),
                context.clone(),
                Arc::new(collaborators.providers),
                audit.clone(),
            )
            .with_max_history(config.context.max_history)
            .with_max_completion_tokens(config.providers.max_completion_tokens)
            .with_metrics(metrics.clone()),
        );

        info!(
            "Core services built: tokenizer={:?}, keyword_scoring={:?}, workers={}",
            config.context.tokenizer, config.retrieval.keyword_scoring, config.tools.worker_count
        );

        Ok(Self {
            config,
            stores,
            metrics,
            estimator,
            context,
            chunker,
            merger,
            embeddings,
            indexer,
            searcher,
            tools,
            chat,
            audit,
        })
    }

    /// Re-enqueue interrupted executions, then start the configured workers
    pub async fn start_workers(
        &self,
        shutdown: watch::Receiver<bool>,
    ) -> Result<Vec<JoinHandle<()>>> {
        self.tools.queue().recover(self.stores.tools.as_ref()).await?;
        Ok(spawn_workers(
            self.tools.clone(),
            self.config.tools.worker_count,
            shutdown,
        ))
    }
}
