//! Hot-path benchmarks
//!
//! Chunking of large documents, hybrid result merging and context
//! truncation of long histories.

use conversation_core::chunking::{ChunkingEngine, DocumentInput};
use conversation_core::config::{ChunkingConfig, ContextConfig};
use conversation_core::context::{
    ChatMessage, ContextWindowManager, HeuristicEstimator, TokenBudget, TruncationStrategy,
};
use conversation_core::retrieval::{ResultSource, RetrievalMerger, SearchResult};
use conversation_core::tools::canonical_json;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use serde_json::{json, Map};
use std::sync::Arc;
use uuid::Uuid;

fn document(paragraphs: usize) -> String {
    (0..paragraphs)
        .map(|i| {
            format!(
                "Paragraph {} explains how the borrow checker tracks lifetimes. \
                 Each reference must outlive its uses! Does it always hold? Mostly.",
                i
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn bench_chunking(c: &mut Criterion) {
    let engine = ChunkingEngine::new(
        ChunkingConfig::default(),
        Arc::new(HeuristicEstimator::default()),
    );
    let mut group = c.benchmark_group("chunking");

    for paragraphs in [10, 100, 1000] {
        let input = DocumentInput::from_text(document(paragraphs));
        group.throughput(Throughput::Bytes(input.text.len() as u64));
        group.bench_with_input(BenchmarkId::new("paragraphs", paragraphs), &input, |b, input| {
            b.iter(|| black_box(engine.chunk_document(input)));
        });
    }

    group.finish();
}

fn results(count: usize, source: ResultSource, shared_every: usize) -> Vec<SearchResult> {
    (0..count)
        .map(|i| SearchResult {
            chunk_id: if i % shared_every == 0 {
                Uuid::from_u128(i as u128)
            } else {
                Uuid::new_v4()
            },
            document_id: Uuid::from_u128(1),
            chunk_index: i,
            content: format!("chunk {}", i),
            token_count: 50,
            relevance_score: 1.0 - i as f32 / count as f32,
            source,
            metadata: Map::new(),
        })
        .collect()
}

fn bench_merge(c: &mut Criterion) {
    let merger = RetrievalMerger::default();
    let mut group = c.benchmark_group("merge");

    for count in [10, 100, 1000] {
        let vector = results(count, ResultSource::Vector, 2);
        let keyword = results(count, ResultSource::Keyword, 3);
        group.bench_with_input(BenchmarkId::new("results", count), &count, |b, _| {
            b.iter(|| black_box(merger.merge(vector.clone(), keyword.clone(), 10)));
        });
    }

    group.finish();
}

fn bench_truncation(c: &mut Criterion) {
    let manager = ContextWindowManager::new(
        &ContextConfig::default(),
        Arc::new(HeuristicEstimator::default()),
    );
    let budget = TokenBudget::new("bench-model", 8192, 2000);

    let mut history = vec![ChatMessage::system("You are terse.")];
    history.extend((0..500).map(|i| {
        if i % 2 == 0 {
            ChatMessage::user(format!("Question {} about iterators and closures", i))
        } else {
            ChatMessage::assistant("Closures capture their environment by reference. ".repeat(8))
        }
    }));

    let mut group = c.benchmark_group("truncation");
    for strategy in [TruncationStrategy::Sliding, TruncationStrategy::Smart] {
        group.bench_function(strategy.as_str(), |b| {
            b.iter(|| black_box(manager.truncate(&history, &budget, strategy)));
        });
    }
    group.finish();
}

fn bench_cache_key(c: &mut Criterion) {
    let input = json!({
        "query": "SELECT * FROM orders",
        "limit": 100,
        "filters": { "status": ["open", "pending"], "region": "eu", "since": "2024-01-01" },
    });
    c.bench_function("canonical_json", |b| b.iter(|| black_box(canonical_json(&input))));
}

criterion_group!(benches, bench_chunking, bench_merge, bench_truncation, bench_cache_key);
criterion_main!(benches);
