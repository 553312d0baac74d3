//! Suggestion types shared by the analyzer, fetcher and filter

use serde::{Deserialize, Serialize};

/// Three-level priority deciding what survives budget truncation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Critical,
    Helpful,
    Optional,
}

impl Priority {
    /// Lenient parse; anything unrecognised is `Helpful`
    pub fn parse(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "critical" | "high" | "required" => Priority::Critical,
            "optional" | "low" => Priority::Optional,
            _ => Priority::Helpful,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Critical => "critical",
            Priority::Helpful => "helpful",
            Priority::Optional => "optional",
        }
    }

    pub fn is_critical(&self) -> bool {
        *self == Priority::Critical
    }
}

/// Where a suggestion is resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextSource {
    Memory,
    Rules,
    Products,
    History,
    External,
}

impl ContextSource {
    pub const ALL: [ContextSource; 5] = [
        ContextSource::Memory,
        ContextSource::Rules,
        ContextSource::Products,
        ContextSource::History,
        ContextSource::External,
    ];

    /// Parse a model-produced source name; unknown names yield `None`
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "memory" | "memories" => Some(ContextSource::Memory),
            "rules" | "rule" | "prompt_fragments" | "fragments" => Some(ContextSource::Rules),
            "products" | "product" | "catalog" => Some(ContextSource::Products),
            "history" | "conversation" => Some(ContextSource::History),
            "external" | "web" => Some(ContextSource::External),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ContextSource::Memory => "memory",
            ContextSource::Rules => "rules",
            ContextSource::Products => "products",
            ContextSource::History => "history",
            ContextSource::External => "external",
        }
    }
}

/// A request for context, not yet fetched
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextSuggestion {
    /// Human-readable description; also the key of the fetched item
    pub description: String,
    pub priority: Priority,
    pub search_query: String,
    pub source: ContextSource,
}

impl ContextSuggestion {
    pub fn new(
        description: impl Into<String>,
        priority: Priority,
        search_query: impl Into<String>,
        source: ContextSource,
    ) -> Self {
        Self {
            description: description.into(),
            priority,
            search_query: search_query.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_order() {
        let mut priorities = vec![Priority::Optional, Priority::Critical, Priority::Helpful];
        priorities.sort();
        assert_eq!(priorities, vec![Priority::Critical, Priority::Helpful, Priority::Optional]);
    }

    #[test]
    fn test_priority_parse() {
        assert_eq!(Priority::parse("CRITICAL"), Priority::Critical);
        assert_eq!(Priority::parse("optional"), Priority::Optional);
        assert_eq!(Priority::parse("nice to have"), Priority::Helpful);
    }

    #[test]
    fn test_source_parse() {
        assert_eq!(ContextSource::parse("Memory"), Some(ContextSource::Memory));
        assert_eq!(ContextSource::parse("prompt_fragments"), Some(ContextSource::Rules));
        assert_eq!(ContextSource::parse("crm"), None);
    }
}
