//! Keyword-set similarity used for refinement convergence and axiom matching.

use std::collections::BTreeSet;

const STOP_WORDS: &[&str] = &[
    "the", "and", "for", "that", "this", "with", "are", "was", "were", "from", "have", "has",
    "but", "its", "their", "they", "them", "than", "then", "into", "onto", "over", "under",
    "about", "there", "which", "while", "will", "would", "should", "could", "can", "may",
    "must", "our", "your", "you", "all", "any", "each", "more", "most", "some", "such", "also",
    "only", "other", "been", "being", "what", "when", "where", "who", "how", "why",
];

const NEGATION_MARKERS: &[&str] = &[
    "not", "never", "no", "cannot", "can't", "without", "avoid", "don't", "shouldn't", "won't",
];

/// Lowercased alphanumeric tokens of at least three characters, minus stop words.
pub fn keywords(text: &str) -> BTreeSet<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() >= 3 && !STOP_WORDS.contains(w))
        .map(str::to_string)
        .collect()
}

/// Jaccard index of two keyword sets. Two empty sets are identical.
pub fn jaccard(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }

    let intersection = a.intersection(b).count();
    let union = a.union(b).count();

    if union == 0 {
        return 0.0;
    }

    intersection as f64 / union as f64
}

pub fn text_similarity(a: &str, b: &str) -> f64 {
    jaccard(&keywords(a), &keywords(b))
}

/// Whether a statement asserts a negation ("never cache", "avoid locks").
pub fn is_negated(text: &str) -> bool {
    text.to_lowercase()
        .split(|c: char| !(c.is_alphanumeric() || c == '\''))
        .any(|w| NEGATION_MARKERS.contains(&w))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keywords_drop_short_and_stop_words() {
        let words = keywords("The cache is a shared resource, and THE cache must expire");
        assert!(words.contains("cache"));
        assert!(words.contains("shared"));
        assert!(words.contains("expire"));
        assert!(!words.contains("the"));
        assert!(!words.contains("is"));
        assert!(!words.contains("must"));
    }

    #[test]
    fn test_jaccard_identical_and_disjoint() {
        assert_eq!(text_similarity("durable queue design", "design durable queue"), 1.0);
        assert_eq!(text_similarity("durable queue", "sharded ledger"), 0.0);
        assert_eq!(text_similarity("", ""), 1.0);
    }

    #[test]
    fn test_jaccard_partial_overlap() {
        // {users, value, privacy} vs {users, value, speed}: 2 shared of 4
        let score = text_similarity("users value privacy", "users value speed");
        assert!((score - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_negation_detection() {
        assert!(is_negated("Teams should never share credentials"));
        assert!(is_negated("Avoid global locks"));
        assert!(is_negated("You can't scale this"));
        assert!(!is_negated("Teams share credentials through a vault"));
    }
}
