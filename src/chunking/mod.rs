//! Document chunking for retrieval
//!
//! Turns extracted document content (body text, tables, captioned images)
//! into an ordered list of chunks sized for embedding.

pub mod engine;
pub mod keywords;
pub mod models;

pub use engine::{ChunkingEngine, ChunkingError};
pub use keywords::extract_keywords;
pub use models::{
    Chunk, ChunkType, DocumentChunk, DocumentInput, DocumentStructure, ImageData, PageInfo,
    SectionInfo, TableData,
};
