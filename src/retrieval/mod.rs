//! Hybrid retrieval over indexed document chunks

pub mod merger;
pub mod models;
pub mod search;

pub use merger::RetrievalMerger;
pub use models::{KeywordScoring, RagContext, ResultSource, SearchMode, SearchResult};
pub use search::HybridSearcher;
