//! Keyword similarity
//!
//! Cheap lexical scoring used by the in-memory stores and by the feedback
//! loop when matching context keys against recommendation patterns.

use std::collections::HashSet;

/// Extract keywords from text
pub fn extract_keywords(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric() && c != '-')
        .filter(|word| word.len() > 3)
        .filter(|word| !is_stopword(word))
        .map(|s| s.to_string())
        .collect()
}

/// Check if word is a stopword
fn is_stopword(word: &str) -> bool {
    matches!(
        word,
        "this" | "that" | "these" | "those" | "with" | "from" | "have" | "been" | "were"
            | "what" | "when" | "where" | "which" | "into" | "about" | "please"
    )
}

/// Jaccard similarity of the keyword sets of two texts
pub fn keyword_similarity(a: &str, b: &str) -> f64 {
    let set1 = extract_keywords(a);
    let set2 = extract_keywords(b);

    if set1.is_empty() && set2.is_empty() {
        return 0.0;
    }

    let intersection = set1.intersection(&set2).count();
    let union = set1.union(&set2).count();

    if union == 0 {
        0.0
    } else {
        intersection as f64 / union as f64
    }
}

/// Share of the query's keywords found in `document`.
///
/// Asymmetric on purpose: a long document should not be penalised for
/// covering more than the query asks about.
pub fn query_coverage(query: &str, document: &str) -> f64 {
    let query_words = extract_keywords(query);
    if query_words.is_empty() {
        return 0.0;
    }
    let doc_words = extract_keywords(document);
    let hits = query_words.intersection(&doc_words).count();
    hits as f64 / query_words.len() as f64
}

/// Case-insensitive containment in either direction
pub fn loosely_matches(a: &str, b: &str) -> bool {
    let a = a.trim().to_lowercase();
    let b = b.trim().to_lowercase();
    if a.is_empty() || b.is_empty() {
        return false;
    }
    a.contains(&b) || b.contains(&a)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_keywords_drops_short_and_stopwords() {
        let words = extract_keywords("Update the price for SKU ABC-123 with this value");
        assert!(words.contains("update"));
        assert!(words.contains("price"));
        assert!(words.contains("abc-123"));
        assert!(!words.contains("the"));
        assert!(!words.contains("with"));
        assert!(!words.contains("this"));
    }

    #[test]
    fn test_keyword_similarity_orders() {
        let close = keyword_similarity("vendor pricing rules", "pricing rules for vendor");
        let far = keyword_similarity("vendor pricing rules", "gmail search results");
        assert!(close > far);
        assert_eq!(far, 0.0);
    }

    #[test]
    fn test_query_coverage() {
        let score = query_coverage("eureka grinder price", "Eureka grinders: price floor is MAP");
        // "eureka" and "price" hit, "grinder" != "grinders"
        assert!((score - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_loosely_matches() {
        assert!(loosely_matches("Vendor Rules", "vendor rules for Eureka"));
        assert!(loosely_matches("pricing history for grinders", "Pricing"));
        assert!(!loosely_matches("", "anything"));
        assert!(!loosely_matches("gmail", "inventory"));
    }
}
