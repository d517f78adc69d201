//! Shared text normalization helpers used by the repetition detector, the
//! distiller's clustering, and the gate's overlap checks.

use std::collections::HashSet;

/// Common English stop words dropped before keyword comparison.
pub(crate) const STOP_WORDS: &[&str] = &[
    "a", "about", "after", "again", "all", "an", "and", "any", "are", "as", "at", "be", "been",
    "before", "being", "but", "by", "can", "could", "did", "do", "does", "doing", "down", "for",
    "from", "had", "has", "have", "he", "her", "here", "him", "his", "how", "i", "if", "in",
    "into", "is", "it", "its", "just", "me", "more", "my", "no", "not", "now", "of", "off", "on",
    "only", "or", "our", "out", "over", "she", "should", "so", "some", "than", "that", "the",
    "their", "them", "then", "there", "these", "they", "this", "to", "up", "was", "we", "were",
    "what", "when", "where", "which", "who", "why", "will", "with", "would", "you", "your",
];

/// Lowercase, strip punctuation, drop stop words and single characters.
pub(crate) fn keyword_set(text: &str) -> HashSet<String> {
    let lowered = text.to_lowercase();
    lowered
        .split(|character: char| !character.is_alphanumeric())
        .filter(|word| word.len() > 1 && !STOP_WORDS.contains(word))
        .map(String::from)
        .collect()
}

/// Stop-word-filtered keywords in original order, deduplicated.
pub(crate) fn keywords_ordered(text: &str) -> Vec<String> {
    let lowered = text.to_lowercase();
    let mut seen: HashSet<String> = HashSet::new();
    lowered
        .split(|character: char| !character.is_alphanumeric())
        .filter(|word| word.len() > 1 && !STOP_WORDS.contains(word))
        .filter(|word| seen.insert((*word).to_owned()))
        .map(String::from)
        .collect()
}

/// Jaccard similarity between two keyword sets.
pub(crate) fn jaccard(left: &HashSet<String>, right: &HashSet<String>) -> f64 {
    let union = left.union(right).count();
    if union == 0 {
        return 0.0;
    }
    let intersection = left.intersection(right).count();
    intersection as f64 / union as f64
}

/// Jaccard similarity between two texts after stop-word removal.
pub(crate) fn word_overlap(text_a: &str, text_b: &str) -> f64 {
    jaccard(&keyword_set(text_a), &keyword_set(text_b))
}

/// Truncate to at most `max` bytes on a char boundary.
pub(crate) fn truncate(value: &str, max: usize) -> &str {
    if value.len() <= max {
        return value;
    }
    let mut end = max;
    while end > 0 && !value.is_char_boundary(end) {
        end -= 1;
    }
    &value[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keyword_set_drops_stop_words_and_punctuation() {
        let keywords = keyword_set("Please, fix the login bug in the auth module!");
        assert!(keywords.contains("fix"));
        assert!(keywords.contains("login"));
        assert!(keywords.contains("auth"));
        assert!(!keywords.contains("the"));
        assert!(!keywords.contains("in"));
    }

    #[test]
    fn test_jaccard_identical_and_disjoint() {
        let first = keyword_set("fix the login bug");
        let second = keyword_set("fix the login bug");
        let third = keyword_set("deploy staging cluster");
        assert!((jaccard(&first, &second) - 1.0).abs() < f64::EPSILON);
        assert_eq!(jaccard(&first, &third), 0.0);
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        let text = "héllo wörld";
        let cut = truncate(text, 3);
        assert!(text.starts_with(cut));
        assert!(cut.len() <= 3);
    }
}
