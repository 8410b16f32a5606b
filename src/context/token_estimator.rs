//! Token estimation
//!
//! The default estimator is deliberately crude: characters divided by four,
//! rounded down. Exact tokenization happens at the provider during generation;
//! here the count only needs to be monotonic in text length and cheap enough
//! to run on every message.

use crate::error::{CoreError, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tiktoken_rs::{cl100k_base, CoreBPE};

/// Which estimator the services are built with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tokenizer {
    /// Four characters per token
    #[default]
    Heuristic,
    /// cl100k_base BPE
    Tiktoken,
}

impl Tokenizer {
    pub fn build(&self) -> Result<Arc<dyn TokenEstimator>> {
        Ok(match self {
            Self::Heuristic => Arc::new(HeuristicEstimator::default()),
            Self::Tiktoken => Arc::new(TiktokenEstimator::new()?),
        })
    }
}

/// Token estimator trait for different tokenization strategies
pub trait TokenEstimator: Send + Sync {
    /// Estimate the number of tokens in the given text
    fn estimate(&self, text: &str) -> usize;

    /// Estimate tokens for multiple texts
    fn estimate_batch(&self, texts: &[&str]) -> Vec<usize> {
        texts.iter().map(|t| self.estimate(t)).collect()
    }
}

/// Character-ratio estimator (`chars / chars_per_token`, floored)
#[derive(Debug, Clone, Copy)]
pub struct HeuristicEstimator {
    chars_per_token: usize,
}

impl HeuristicEstimator {
    pub fn new(chars_per_token: usize) -> Self {
        Self {
            chars_per_token: chars_per_token.max(1),
        }
    }
}

impl Default for HeuristicEstimator {
    fn default() -> Self {
        Self::new(4)
    }
}

impl TokenEstimator for HeuristicEstimator {
    fn estimate(&self, text: &str) -> usize {
        text.chars().count() / self.chars_per_token
    }
}

/// Tiktoken-based token estimator using cl100k_base (GPT-4, GPT-3.5-turbo)
pub struct TiktokenEstimator {
    bpe: Arc<CoreBPE>,
}

impl TiktokenEstimator {
    /// Create a new tiktoken estimator with cl100k_base encoding
    pub fn new() -> Result<Self> {
        let bpe = cl100k_base()
            .map_err(|e| CoreError::Configuration(format!("Failed to load tokenizer: {}", e)))?;
        Ok(Self { bpe: Arc::new(bpe) })
    }
}

impl TokenEstimator for TiktokenEstimator {
    fn estimate(&self, text: &str) -> usize {
        self.bpe.encode_with_special_tokens(text).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heuristic_floors() {
        let estimator = HeuristicEstimator::default();
        assert_eq!(estimator.estimate(""), 0);
        assert_eq!(estimator.estimate("abc"), 0);
        assert_eq!(estimator.estimate("abcd"), 1);
        assert_eq!(estimator.estimate("abcdefghi"), 2);
    }

    #[test]
    fn test_heuristic_counts_chars_not_bytes() {
        let estimator = HeuristicEstimator::default();
        // 5 chars, 10 bytes
        assert_eq!(estimator.estimate("ééééé"), 1);
        assert_eq!(estimator.estimate("日本語です"), 1);
    }

    #[test]
    fn test_heuristic_is_monotonic() {
        let estimator = HeuristicEstimator::default();
        let mut last = 0;
        let mut text = String::new();
        for _ in 0..50 {
            text.push('x');
            let tokens = estimator.estimate(&text);
            assert!(tokens >= last);
            last = tokens;
        }
    }

    #[test]
    fn test_tiktoken_estimator() {
        let estimator = TiktokenEstimator::new().unwrap();
        let tokens = estimator.estimate("Hello, world! This is a test.");
        assert!(tokens > 0);
        assert!(tokens < 20);
    }

    #[test]
    fn test_tokenizer_selection() {
        let heuristic = Tokenizer::default().build().unwrap();
        assert_eq!(heuristic.estimate("abcdefgh"), 2);
        assert!(Tokenizer::Tiktoken.build().is_ok());
    }

    #[test]
    fn test_batch_estimation() {
        let estimator = HeuristicEstimator::new(1);
        assert_eq!(estimator.estimate_batch(&["a", "bb", "ccc"]), vec![1, 2, 3]);
    }
}
