//! Conversation context management with token budget enforcement
//!
//! Decides which part of a conversation history is sent to a model so the
//! request fits the model's context window with room left for the reply.

pub mod budget;
pub mod models;
pub mod token_estimator;
pub mod window_manager;

pub use budget::{ModelLimits, TokenBudget, MODEL_LIMITS};
pub use models::{
    ChatMessage, ContextStats, ContextWindowSnapshot, Conversation, Message, Role,
    TruncationStrategy,
};
pub use token_estimator::{HeuristicEstimator, TiktokenEstimator, TokenEstimator, Tokenizer};
pub use window_manager::{ContextWindowManager, PreparedContext, Truncation};
