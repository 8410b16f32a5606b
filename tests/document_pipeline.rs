//! Index, retrieve and answer through a fully wired `CoreServices`

use async_trait::async_trait;
use conversation_core::audit::TracingAuditSink;
use conversation_core::chunking::DocumentInput;
use conversation_core::config::Config;
use conversation_core::context::Role;
use conversation_core::embedding::{EmbeddingError, EmbeddingProvider};
use conversation_core::providers::{
    ChatProvider, Completion, CompletionRequest, ProviderError, ProviderRegistry,
};
use conversation_core::retrieval::{KeywordScoring, ResultSource, SearchMode};
use conversation_core::services::{Collaborators, CoreServices, Stores};
use conversation_core::storage::ChunkFilter;
use conversation_core::tools::HandlerRunner;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

const VOCABULARY: [&str; 4] = ["rust", "ownership", "python", "garbage"];

/// Counts vocabulary words; enough signal for cosine ranking
struct VocabularyEmbedder;

#[async_trait]
impl EmbeddingProvider for VocabularyEmbedder {
    fn name(&self) -> &str {
        "vocabulary"
    }

    fn dimension(&self) -> usize {
        VOCABULARY.len()
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        Ok(texts
            .iter()
            .map(|text| {
                let text = text.to_lowercase();
                VOCABULARY
                    .iter()
                    .map(|word| text.matches(word).count() as f32)
                    .collect()
            })
            .collect())
    }
}

/// Answers with a fixed prefix and remembers what it was sent
#[derive(Default)]
struct LocalModel {
    seen: Mutex<Vec<CompletionRequest>>,
}

#[async_trait]
impl ChatProvider for LocalModel {
    fn name(&self) -> &str {
        "local"
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, ProviderError> {
        self.seen.lock().unwrap().push(request.clone());
        Ok(Completion {
            content: "Ownership prevents data races.".to_string(),
            model: request.model.clone(),
            prompt_tokens: None,
            completion_tokens: Some(6),
            finish_reason: Some("stop".to_string()),
        })
    }
}

fn services(config: Config, model: Arc<LocalModel>) -> CoreServices {
    let mut providers = ProviderRegistry::new();
    let provider: Arc<dyn ChatProvider> = model;
    providers.register("local-*", provider, None).unwrap();

    CoreServices::build(
        config,
        Stores::in_memory(),
        Collaborators {
            runner: Arc::new(HandlerRunner::new()),
            embedder: Arc::new(VocabularyEmbedder),
            providers,
            audit: Arc::new(TracingAuditSink),
        },
    )
    .unwrap()
}

fn test_config() -> Config {
    let mut config = Config::default();
    config.embedding.dimension = VOCABULARY.len();
    config
}

#[tokio::test]
async fn test_index_search_and_chat() {
    let model = Arc::new(LocalModel::default());
    let core = services(test_config(), model.clone());

    let rust_doc = Uuid::new_v4();
    let python_doc = Uuid::new_v4();
    let reports = core
        .indexer
        .index_documents(&[
            (
                rust_doc,
                "acme".to_string(),
                DocumentInput::from_text(
                    "Rust ownership rules keep memory safe without a garbage collector.",
                ),
            ),
            (
                python_doc,
                "acme".to_string(),
                DocumentInput::from_text("Python relies on a garbage collector for memory."),
            ),
        ])
        .await;
    for report in reports {
        let report = report.unwrap();
        assert_eq!(report.chunk_count, 1);
        assert_eq!(report.degraded_embeddings, 0);
    }

    let filter = ChunkFilter::for_user("acme");
    let results = core
        .searcher
        .search("ownership", SearchMode::Hybrid, 5, &filter)
        .await
        .unwrap();
    assert_eq!(results[0].document_id, rust_doc);
    assert_eq!(results[0].source, ResultSource::Hybrid);
    assert!(results.windows(2).all(|w| w[0].relevance_score >= w[1].relevance_score));

    let other_tenant = core
        .searcher
        .search("ownership", SearchMode::Hybrid, 5, &ChunkFilter::for_user("globex"))
        .await
        .unwrap();
    assert!(other_tenant.is_empty());

    let rag = core.searcher.rag_context("ownership", 1, &filter).await.unwrap();
    assert_eq!(rag.sources, vec![rust_doc]);

    let conversation = core.chat.start_conversation("alice", "local-small").await.unwrap();
    let question = format!("Using this context:\n{}\n\nWhy does Rust need no GC?", rag.render());
    let turn = core
        .chat
        .send_message(conversation.id, "alice", &question)
        .await
        .unwrap();
    assert_eq!(turn.assistant_message.content, "Ownership prevents data races.");
    assert_eq!(turn.assistant_message.token_count, 6);
    assert!(turn.context.fits);

    let sent = model.seen.lock().unwrap().clone();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].model, "local-small");
    assert_eq!(sent[0].messages[0].role, Role::System);
    assert!(sent[0].messages[1].content.contains("Rust ownership rules"));
}

#[tokio::test]
async fn test_reindex_replaces_search_results() {
    let core = services(test_config(), Arc::new(LocalModel::default()));
    let document_id = Uuid::new_v4();
    let filter = ChunkFilter::for_user("acme");

    core.indexer
        .index_document(
            document_id,
            "acme",
            &DocumentInput::from_text("Python garbage collection."),
        )
        .await
        .unwrap();
    let before = core
        .searcher
        .search("python", SearchMode::Keyword, 5, &filter)
        .await
        .unwrap();
    assert_eq!(before.len(), 1);

    core.indexer
        .index_document(document_id, "acme", &DocumentInput::from_text("Rust ownership."))
        .await
        .unwrap();
    let after = core
        .searcher
        .search("python", SearchMode::Keyword, 5, &filter)
        .await
        .unwrap();
    assert!(after.is_empty());
}

#[tokio::test]
async fn test_public_and_tagged_documents() {
    let core = services(test_config(), Arc::new(LocalModel::default()));
    let handbook = Uuid::new_v4();
    let payroll = Uuid::new_v4();

    core.indexer
        .index_document(
            handbook,
            "acme",
            &DocumentInput::from_text("Rust ownership handbook.")
                .public()
                .with_tags(["handbook"]),
        )
        .await
        .unwrap();
    core.indexer
        .index_document(
            payroll,
            "acme",
            &DocumentInput::from_text("Rust payroll ownership notes.").with_tags(["finance"]),
        )
        .await
        .unwrap();

    // another tenant only sees the public handbook
    let results = core
        .searcher
        .search("ownership", SearchMode::Hybrid, 5, &ChunkFilter::for_user("globex"))
        .await
        .unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].document_id, handbook);

    // the owner sees both, narrowed by tag
    let owner = ChunkFilter::for_user("acme");
    let all = core
        .searcher
        .search("ownership", SearchMode::Keyword, 5, &owner)
        .await
        .unwrap();
    assert_eq!(all.len(), 2);

    let finance = core
        .searcher
        .search(
            "ownership",
            SearchMode::Keyword,
            5,
            &owner.with_tags(vec!["finance".to_string()]),
        )
        .await
        .unwrap();
    assert_eq!(finance.len(), 1);
    assert_eq!(finance[0].document_id, payroll);
}

#[test]
fn test_services_from_toml_with_bm25() {
    let mut config = Config::from_toml_str(
        r#"
        [retrieval]
        keyword_scoring = "bm25"
        default_top_k = 3

        [chunking]
        chunk_size = 200
        chunk_overlap = 20
        max_chunk_size = 400

        [embedding]
        dimension = 4
        "#,
    )
    .unwrap();
    assert_eq!(config.retrieval.keyword_scoring, KeywordScoring::Bm25);
    config.tools.worker_count = 1;

    let core = services(config, Arc::new(LocalModel::default()));
    let filter = ChunkFilter::for_user("acme");

    let results = tokio_test::block_on(async {
        for text in [
            "rust rust rust ownership",
            "rust appears once here",
            "nothing relevant at all",
        ] {
            core.indexer
                .index_document(Uuid::new_v4(), "acme", &DocumentInput::from_text(text))
                .await
                .unwrap();
        }
        core.searcher
            .search("rust", SearchMode::Keyword, 3, &filter)
            .await
            .unwrap()
    });

    assert_eq!(results.len(), 2);
    assert_eq!(results[0].content, "rust rust rust ownership");
    assert_eq!(results[0].relevance_score, 1.0);
    assert!(results[1].relevance_score < 1.0);
}
