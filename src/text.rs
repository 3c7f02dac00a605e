//! Shared tokenization and similarity helpers used by the retrieval index,
//! the adaptive learning store and the query builder. Keeping one
//! implementation means "similarity" means the same thing everywhere a
//! threshold from [`crate::config`] is compared against it.

use std::collections::HashSet;

/// Splits an identifier on `_`, `-`, whitespace and camelCase boundaries,
/// lowercases the pieces, and drops anything shorter than 3 characters.
pub fn split_identifier_words(identifier: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut prev_lower = false;

    for ch in identifier.chars() {
        if ch == '_' || ch == '-' || ch.is_whitespace() {
            if !current.is_empty() {
                words.push(std::mem::take(&mut current));
            }
            prev_lower = false;
            continue;
        }
        if ch.is_uppercase() && prev_lower {
            if !current.is_empty() {
                words.push(std::mem::take(&mut current));
            }
        }
        current.push(ch.to_ascii_lowercase());
        prev_lower = ch.is_lowercase();
    }
    if !current.is_empty() {
        words.push(current);
    }

    words.retain(|w| w.len() > 2);
    words
}

/// Lowercased whitespace tokens, used for free-text (rather than
/// identifier) similarity comparisons.
pub fn tokenize_text(text: &str) -> HashSet<String> {
    text.split_whitespace()
        .map(|t| t.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase())
        .filter(|t| !t.is_empty())
        .collect()
}

/// Jaccard similarity between two token sets: `|A ∩ B| / |A ∪ B|`, in
/// `[0.0, 1.0]`. Two empty sets are defined as dissimilar (`0.0`), not
/// trivially similar, so an empty query never "matches" everything.
pub fn jaccard_similarity(a: &HashSet<String>, b: &HashSet<String>) -> f32 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.union(b).count();
    if union == 0 {
        0.0
    } else {
        intersection as f32 / union as f32
    }
}

/// Jaccard similarity over whitespace-tokenized free text.
pub fn text_similarity(a: &str, b: &str) -> f32 {
    jaccard_similarity(&tokenize_text(a), &tokenize_text(b))
}

/// Converts a Jaccard similarity into the "distance" vocabulary used by the
/// retrieval index (`distance = 1 - similarity`), so a perfect match has
/// distance `0.0` and complete disjointness has distance `1.0`.
pub fn similarity_to_distance(similarity: f32) -> f32 {
    1.0 - similarity.clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_snake_and_camel_case() {
        assert_eq!(split_identifier_words("customer_order_id"), vec!["customer", "order"]);
        assert_eq!(split_identifier_words("createdAt"), vec!["created".to_string()]);
    }

    #[test]
    fn drops_short_fragments() {
        assert_eq!(split_identifier_words("id"), Vec::<String>::new());
    }

    #[test]
    fn jaccard_similarity_of_identical_sets_is_one() {
        let a: HashSet<String> = ["musteri", "siparis"].iter().map(|s| s.to_string()).collect();
        assert_eq!(jaccard_similarity(&a, &a.clone()), 1.0);
    }

    #[test]
    fn jaccard_similarity_of_disjoint_sets_is_zero() {
        let a: HashSet<String> = ["musteri"].iter().map(|s| s.to_string()).collect();
        let b: HashSet<String> = ["urun"].iter().map(|s| s.to_string()).collect();
        assert_eq!(jaccard_similarity(&a, &b), 0.0);
    }

    #[test]
    fn empty_query_never_trivially_matches() {
        let a: HashSet<String> = HashSet::new();
        let b: HashSet<String> = ["musteri"].iter().map(|s| s.to_string()).collect();
        assert_eq!(jaccard_similarity(&a, &b), 0.0);
    }
}
