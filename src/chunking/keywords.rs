//! Frequency-based keyword extraction for keyword search

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use std::collections::HashSet;

static STOP_WORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "the", "a", "an", "and", "or", "but", "in", "on", "at", "to", "for", "of", "with", "by",
        "from", "is", "are", "was", "were", "be", "been", "this", "that", "these", "those", "it",
        "its", "can", "will", "would",
    ]
    .into_iter()
    .collect()
});

const PUNCTUATION: &[char] = &[
    '.', ',', ';', ':', '!', '?', '"', '\'', '(', ')', '[', ']', '{', '}',
];

const MIN_KEYWORD_CHARS: usize = 4;

/// Most frequent words of at least four characters, stop words excluded.
///
/// Words are lowercased and stripped of surrounding punctuation. Ties keep the
/// order of first occurrence.
pub fn extract_keywords(text: &str, max_keywords: usize) -> Vec<String> {
    let lowered = text.to_lowercase();
    let mut counts: IndexMap<&str, usize> = IndexMap::new();

    for word in lowered.split_whitespace() {
        let word = word.trim_matches(PUNCTUATION);
        if word.chars().count() < MIN_KEYWORD_CHARS || STOP_WORDS.contains(word) {
            continue;
        }
        *counts.entry(word).or_insert(0) += 1;
    }

    let mut ranked: Vec<(&str, usize)> = counts.into_iter().collect();
    // stable: equal counts stay in first-seen order
    ranked.sort_by(|a, b| b.1.cmp(&a.1));
    ranked
        .into_iter()
        .take(max_keywords)
        .map(|(word, _)| word.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frequency_order_with_first_seen_ties() {
        let text = "Tokio runtime drives futures. The runtime polls futures; runtime again.";
        let keywords = extract_keywords(text, 10);
        assert_eq!(keywords, vec!["runtime", "futures", "tokio", "drives", "polls", "again"]);
    }

    #[test]
    fn test_stop_words_and_short_words_dropped() {
        let keywords = extract_keywords("this that with from were been cat dog", 10);
        assert!(keywords.is_empty());
    }

    #[test]
    fn test_punctuation_stripped_before_length_check() {
        let keywords = extract_keywords("(abc) \"word\" [rust]!", 10);
        assert_eq!(keywords, vec!["word", "rust"]);
    }

    #[test]
    fn test_limit() {
        let text = "alpha bravo charlie delta echoes foxtrot";
        assert_eq!(extract_keywords(text, 2), vec!["alpha", "bravo"]);
        assert!(extract_keywords(text, 0).is_empty());
    }
}
