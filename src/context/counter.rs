//! Token estimation for budget accounting
//!
//! Budgets in this crate are enforced against a character heuristic, not a
//! real tokenizer: 1 token ≈ 4 characters, rounded up. Fetched context is
//! costed on its JSON serialization so metadata counts against the budget
//! the same way it will when the bundle is rendered for the agent.
//!
//! # Complexity
//! O(n) where n = text length

use serde::Serialize;

/// Characters per token used by every estimate
pub const CHARS_PER_TOKEN: usize = 4;

/// Token counter with heuristic-based estimation
#[derive(Debug, Clone, Copy, Default)]
pub struct TokenCounter;

impl TokenCounter {
    /// Create new token counter
    pub fn new() -> Self {
        Self
    }

    /// Estimate token count for text
    ///
    /// ```text
    /// estimate(text) = ⌈chars(text) / 4⌉
    /// ```
    ///
    /// # Examples
    ///
    /// ```
    /// # use espresso_context::context::counter::TokenCounter;
    /// let counter = TokenCounter::new();
    /// assert_eq!(counter.estimate(&"a".repeat(100)), 25);
    /// ```
    pub fn estimate(&self, text: &str) -> usize {
        let char_count = text.chars().count();
        (char_count + CHARS_PER_TOKEN - 1) / CHARS_PER_TOKEN
    }

    /// Estimate tokens for any serializable value via its JSON form.
    ///
    /// Values that fail to serialize cost nothing; they cannot be rendered
    /// into the prompt either.
    pub fn estimate_serialized<T: Serialize + ?Sized>(&self, value: &T) -> usize {
        serde_json::to_string(value)
            .map(|json| self.estimate(&json))
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_basic_estimation() {
        let counter = TokenCounter::new();
        assert_eq!(counter.estimate(&"a".repeat(100)), 25);
    }

    #[test]
    fn test_empty_string() {
        assert_eq!(TokenCounter::new().estimate(""), 0);
    }

    #[test]
    fn test_single_character_rounds_up() {
        assert_eq!(TokenCounter::new().estimate("a"), 1);
    }

    #[test]
    fn test_unicode_counts_chars() {
        // 3 chars, 9 bytes
        assert_eq!(TokenCounter::new().estimate("日本語"), 1);
    }

    #[test]
    fn test_serialized_estimate() {
        let counter = TokenCounter::new();
        let value = json!([{ "content": "a".repeat(30) }]);
        let json = serde_json::to_string(&value).unwrap();
        assert_eq!(counter.estimate_serialized(&value), counter.estimate(&json));
        assert!(counter.estimate_serialized(&value) > counter.estimate(&"a".repeat(30)));
    }

    #[test]
    fn test_linear_scaling() {
        let counter = TokenCounter::new();
        let base = counter.estimate(&"test ".repeat(10));
        let double = counter.estimate(&"test ".repeat(20));
        let ratio = double as f64 / base as f64;
        assert!((1.9..=2.1).contains(&ratio), "Expected ~2x ratio, got {}", ratio);
    }
}
