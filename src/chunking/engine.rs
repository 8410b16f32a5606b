//! Paragraph-boundary document chunker
//!
//! Body text is split on blank lines and paragraphs are packed greedily up to
//! `chunk_size` characters. A closed chunk seeds the next one with its last
//! `chunk_overlap` characters. Paragraphs longer than `max_chunk_size` are
//! split at sentence boundaries instead. Tables and captioned images become
//! separate chunks appended after the text chunks.
//!
//! Chunking never aborts ingestion: on error the whole document degrades to a
//! single chunk holding the first `max_chunk_size` characters, tagged with an
//! `error` metadata key.

use super::keywords::extract_keywords;
use super::models::*;
use crate::config::ChunkingConfig;
use crate::context::TokenEstimator;
use crate::metrics::Metrics;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info};

const FALLBACK_MARKER: &str = "Chunking failed, using fallback";

#[derive(Debug, Error)]
pub enum ChunkingError {
    #[error("Invalid chunking configuration: {0}")]
    InvalidConfig(String),

    #[error("Malformed table {index}: {reason}")]
    MalformedTable { index: usize, reason: String },
}

pub struct ChunkingEngine {
    config: ChunkingConfig,
    estimator: Arc<dyn TokenEstimator>,
    metrics: Option<Arc<Metrics>>,
}

impl ChunkingEngine {
    pub fn new(config: ChunkingConfig, estimator: Arc<dyn TokenEstimator>) -> Self {
        debug!(
            "ChunkingEngine initialized: size={}, overlap={}, max={}",
            config.chunk_size, config.chunk_overlap, config.max_chunk_size
        );
        Self {
            config,
            estimator,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn config(&self) -> &ChunkingConfig {
        &self.config
    }

    /// Chunk a document; always returns a usable (possibly degraded) result
    pub fn chunk_document(&self, input: &DocumentInput) -> Vec<Chunk> {
        match self.try_chunk_document(input) {
            Ok(chunks) => {
                if let Some(metrics) = &self.metrics {
                    for chunk_type in [ChunkType::Text, ChunkType::Table, ChunkType::Image] {
                        let count = chunks.iter().filter(|c| c.chunk_type == chunk_type).count();
                        metrics.record_chunks(chunk_type.as_str(), count);
                    }
                }
                chunks
            }
            Err(e) => {
                error!("Error chunking document, using fallback: {}", e);
                if let Some(metrics) = &self.metrics {
                    metrics.record_chunking_fallback();
                }
                vec![self.fallback_chunk(&input.text, &e)]
            }
        }
    }

    /// Chunk a document, surfacing errors instead of degrading
    pub fn try_chunk_document(&self, input: &DocumentInput) -> Result<Vec<Chunk>, ChunkingError> {
        self.config
            .validate()
            .map_err(|e| ChunkingError::InvalidConfig(e.to_string()))?;

        let texts = self.split_text(&input.text);
        let text_count = texts.len();
        let mut chunks = Vec::with_capacity(text_count + input.tables.len() + input.images.len());

        for (i, content) in texts.into_iter().enumerate() {
            let position = i as f64 / text_count as f64;
            let mut metadata = Map::new();
            metadata.insert("position_in_document".into(), json!(position));
            if let Some(structure) = &input.structure {
                structural_metadata(position, structure, &mut metadata);
            }
            if !input.metadata.is_empty() {
                metadata.insert(
                    "document_metadata".into(),
                    Value::Object(input.metadata.clone()),
                );
            }
            chunks.push(self.make_chunk(chunks.len(), ChunkType::Text, content, metadata));
        }

        for (i, table) in input.tables.iter().enumerate() {
            if table.headers.is_empty() && table.markdown.trim().is_empty() {
                return Err(ChunkingError::MalformedTable {
                    index: i,
                    reason: "no headers and no body".to_string(),
                });
            }
            let mut metadata = Map::new();
            metadata.insert("page_number".into(), json!(table.page_number));
            metadata.insert("table_index".into(), json!(table.table_index.unwrap_or(i)));
            metadata.insert("row_count".into(), json!(table.row_count));
            metadata.insert("col_count".into(), json!(table.col_count));
            chunks.push(self.make_chunk(
                chunks.len(),
                ChunkType::Table,
                format_table(table),
                metadata,
            ));
        }

        let mut image_count = 0;
        for (i, image) in input.images.iter().enumerate() {
            if !has_text(&image.caption) && !has_text(&image.alt_text) {
                continue;
            }
            let mut metadata = Map::new();
            metadata.insert("page_number".into(), json!(image.page_number));
            metadata.insert("image_index".into(), json!(image.image_index.unwrap_or(i)));
            metadata.insert("image_type".into(), json!(image.image_type));
            chunks.push(self.make_chunk(
                chunks.len(),
                ChunkType::Image,
                format_image(image),
                metadata,
            ));
            image_count += 1;
        }

        info!(
            "Created {} chunks: text={}, tables={}, images={}",
            chunks.len(),
            text_count,
            input.tables.len(),
            image_count
        );
        Ok(chunks)
    }

    fn make_chunk(
        &self,
        chunk_index: usize,
        chunk_type: ChunkType,
        content: String,
        mut metadata: Map<String, Value>,
    ) -> Chunk {
        let char_count = content.chars().count();
        let token_count = self.estimator.estimate(&content);
        metadata.insert("chunk_type".into(), json!(chunk_type));
        metadata.insert("chunk_index".into(), json!(chunk_index));
        metadata.insert("char_count".into(), json!(char_count));
        metadata.insert("token_count".into(), json!(token_count));

        Chunk {
            chunk_index,
            chunk_type,
            keywords: extract_keywords(&content, self.config.max_keywords),
            content,
            token_count,
            char_count,
            metadata,
        }
    }

    fn fallback_chunk(&self, text: &str, cause: &ChunkingError) -> Chunk {
        let content: String = text.chars().take(self.config.max_chunk_size).collect();
        let char_count = content.chars().count();
        let token_count = self.estimator.estimate(&content);

        let mut metadata = Map::new();
        metadata.insert("chunk_type".into(), json!(ChunkType::Text));
        metadata.insert("chunk_index".into(), json!(0));
        metadata.insert("char_count".into(), json!(char_count));
        metadata.insert("token_count".into(), json!(token_count));
        metadata.insert("error".into(), json!(FALLBACK_MARKER));
        metadata.insert("error_detail".into(), json!(cause.to_string()));

        Chunk {
            chunk_index: 0,
            chunk_type: ChunkType::Text,
            content,
            token_count,
            char_count,
            keywords: Vec::new(),
            metadata,
        }
    }

    /// Split body text into chunk contents
    pub fn split_text(&self, text: &str) -> Vec<String> {
        let chunk_size = self.config.chunk_size;
        let overlap = self.config.chunk_overlap;

        let mut chunks = Vec::new();
        let mut current: Vec<String> = Vec::new();
        let mut current_size = 0;

        for para in text.split("\n\n") {
            let para = para.trim();
            if para.is_empty() {
                continue;
            }
            let para_size = char_len(para);

            if para_size > self.config.max_chunk_size {
                if !current.is_empty() {
                    chunks.push(current.join("\n\n"));
                    current.clear();
                }
                let mut pieces = self.split_large_paragraph(para);
                if let Some(last) = pieces.pop() {
                    chunks.extend(pieces);
                    current_size = char_len(&last);
                    current.push(last);
                } else {
                    current_size = 0;
                }
                continue;
            }

            if current_size + para_size <= chunk_size {
                current.push(para.to_string());
                current_size += para_size + 2;
            } else if current.is_empty() {
                current.push(para.to_string());
                current_size = para_size;
            } else {
                let closed = current.join("\n\n");
                current.clear();
                // The seeded overlap must leave room for the paragraph itself
                let room = self.config.max_chunk_size.saturating_sub(para_size + 2);
                let overlap = overlap.min(room);
                if overlap > 0 {
                    let tail = tail_chars(&closed, overlap).to_string();
                    current_size = char_len(&tail) + para_size + 2;
                    current.push(tail);
                } else {
                    current_size = para_size;
                }
                current.push(para.to_string());
                chunks.push(closed);
            }
        }

        if !current.is_empty() {
            chunks.push(current.join("\n\n"));
        }
        chunks
    }

    /// Greedy sentence packing for one oversized paragraph, no overlap
    fn split_large_paragraph(&self, para: &str) -> Vec<String> {
        let chunk_size = self.config.chunk_size;
        let mut chunks = Vec::new();
        let mut current: Vec<&str> = Vec::new();
        let mut current_size = 0;

        let sentences = split_sentences(para);
        let pieces = sentences
            .iter()
            .flat_map(|s| hard_split(s, self.config.max_chunk_size));

        for sentence in pieces {
            let size = char_len(sentence);
            if current_size + size <= chunk_size {
                current.push(sentence);
                current_size += size + 1;
            } else {
                if !current.is_empty() {
                    chunks.push(current.join(" "));
                }
                current = vec![sentence];
                current_size = size;
            }
        }

        if !current.is_empty() {
            chunks.push(current.join(" "));
        }
        chunks
    }
}

fn has_text(value: &Option<String>) -> bool {
    value.as_deref().map_or(false, |v| !v.trim().is_empty())
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Last `n` characters of `s` (all of `s` if shorter)
fn tail_chars(s: &str, n: usize) -> &str {
    let len = char_len(s);
    if len <= n {
        return s;
    }
    match s.char_indices().nth(len - n) {
        Some((idx, _)) => &s[idx..],
        None => s,
    }
}

/// Split after `. `, `! ` and `? `, dropping the separating space
fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();

    while let Some((idx, c)) = chars.next() {
        if matches!(c, '.' | '!' | '?') {
            if let Some(&(space_idx, ' ')) = chars.peek() {
                let sentence = text[start..=idx].trim();
                if !sentence.is_empty() {
                    sentences.push(sentence);
                }
                start = space_idx + 1;
                chars.next();
            }
        }
    }

    let rest = text[start..].trim();
    if !rest.is_empty() {
        sentences.push(rest);
    }
    sentences
}

/// Break text longer than `max_chars` at the last whitespace inside each window
fn hard_split(text: &str, max_chars: usize) -> Vec<&str> {
    let mut pieces = Vec::new();
    let mut remaining = text;
    let max_chars = max_chars.max(1);

    while !remaining.is_empty() {
        let Some((limit, _)) = remaining.char_indices().nth(max_chars) else {
            let piece = remaining.trim();
            if !piece.is_empty() {
                pieces.push(piece);
            }
            break;
        };

        let window = &remaining[..limit];
        let split_at = window
            .rfind('\n')
            .or_else(|| window.rfind(' '))
            .map(|pos| pos + 1)
            .unwrap_or(limit);

        let piece = remaining[..split_at].trim();
        if !piece.is_empty() {
            pieces.push(piece);
        }
        remaining = &remaining[split_at..];
    }
    pieces
}

fn structural_metadata(
    position: f64,
    structure: &DocumentStructure,
    metadata: &mut Map<String, Value>,
) {
    let total_pages = structure.pages.len();
    if total_pages > 0 {
        let estimated = (position * total_pages as f64).floor() as usize + 1;
        metadata.insert("estimated_page".into(), json!(estimated.min(total_pages)));
    }
    if !structure.sections.is_empty() {
        metadata.insert("has_sections".into(), json!(true));
        metadata.insert("section_count".into(), json!(structure.sections.len()));
    }
}

fn page_label(page: Option<usize>) -> String {
    page.map_or_else(|| "?".to_string(), |p| p.to_string())
}

fn format_table(table: &TableData) -> String {
    let mut parts = vec![
        format!("[TABLE on page {}]", page_label(table.page_number)),
        String::new(),
    ];

    if !table.headers.is_empty() {
        parts.push(format!("Headers: {}", table.headers.join(" | ")));
        parts.push(String::new());
    }
    if !table.markdown.is_empty() {
        parts.push(table.markdown.clone());
    }
    if table.row_count > 0 {
        parts.push(String::new());
        parts.push(format!(
            "Table contains {} rows and {} columns",
            table.row_count, table.col_count
        ));
    }
    parts.join("\n")
}

fn format_image(image: &ImageData) -> String {
    let kind = image.image_type.as_deref().unwrap_or("image").to_uppercase();
    let mut parts = vec![
        format!("[{} on page {}]", kind, page_label(image.page_number)),
        String::new(),
    ];

    if let Some(caption) = image.caption.as_deref().filter(|c| !c.trim().is_empty()) {
        parts.push(format!("Caption: {}", caption));
    }
    if let Some(alt) = image.alt_text.as_deref().filter(|a| !a.trim().is_empty()) {
        if image.caption.as_deref() != Some(alt) {
            parts.push(format!("Description: {}", alt));
        }
    }
    parts.join("\n")
}
