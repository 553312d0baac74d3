//! Fetched context types

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::needs::types::{ContextSource, Priority};
use crate::store::SearchHit;

/// Results for one suggestion, keyed by its description in a [`ContextMap`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchedContextItem {
    pub priority: Priority,
    pub source: ContextSource,
    pub results: Vec<SearchHit>,
    /// Estimated cost of `results` when rendered
    pub token_count: usize,
}

impl FetchedContextItem {
    pub fn is_critical(&self) -> bool {
        self.priority.is_critical()
    }
}

/// Fetched items in suggestion order
pub type ContextMap = IndexMap<String, FetchedContextItem>;

/// Output of one fetch pass
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FetchResult {
    pub context: ContextMap,
    pub total_tokens: usize,
}

/// Sum of item costs in `map`
pub fn total_tokens(map: &ContextMap) -> usize {
    map.values().map(|item| item.token_count).sum()
}
