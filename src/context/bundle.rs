//! The assembled context bundle
//!
//! The only artifact handed to the downstream agent. Whatever strategy built
//! it, the four compatibility views are always present (possibly empty), and
//! `token_count` covers fetched context plus conversation history.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::assembler::business::{BulkOperation, BusinessLogic};
use crate::context::counter::TokenCounter;
use crate::context::summarizer::ConversationSummary;
use crate::feedback::types::FeedbackInsights;
use crate::fetch::types::{total_tokens, ContextMap};
use crate::intent::ExtractedIntent;
use crate::needs::types::{ContextSource, ContextSuggestion, Priority};
use crate::store::SearchHit;
use crate::types::{ConversationMessage, Task};

/// Which builder produced a bundle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BundleStrategy {
    Adaptive,
    TieredCore,
    TieredFull,
    Fallback,
}

/// Result of [`ContextBundle::enforce_budget`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BudgetReport {
    pub before_tokens: usize,
    pub after_tokens: usize,
    pub dropped_keys: Vec<String>,
    pub dropped_messages: usize,
    pub dropped_summary: bool,
}

impl BudgetReport {
    pub fn dropped_anything(&self) -> bool {
        !self.dropped_keys.is_empty() || self.dropped_messages > 0 || self.dropped_summary
    }
}

/// Context handed to the conversational agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextBundle {
    pub task: Task,
    pub extracted_data: Option<ExtractedIntent>,
    pub context_analysis: Vec<ContextSuggestion>,
    pub fetched_context: ContextMap,
    pub conversation_summary: Option<ConversationSummary>,
    pub recent_messages: Vec<ConversationMessage>,
    pub token_count: usize,
    pub truncated: bool,
    pub feedback_insights: Option<FeedbackInsights>,
    pub business_logic: Option<BusinessLogic>,
    pub bulk_operation: Option<BulkOperation>,

    pub relevant_memories: Vec<SearchHit>,
    pub relevant_rules: Vec<SearchHit>,
    pub conversation_history: Vec<ConversationMessage>,
    pub prompt_fragments: Vec<SearchHit>,

    pub strategy: BundleStrategy,
    pub fallback: bool,
    pub error: Option<String>,
}

impl ContextBundle {
    /// Empty bundle for `task`
    pub fn new(task: Task, strategy: BundleStrategy) -> Self {
        Self {
            task,
            extracted_data: None,
            context_analysis: Vec::new(),
            fetched_context: ContextMap::new(),
            conversation_summary: None,
            recent_messages: Vec::new(),
            token_count: 0,
            truncated: false,
            feedback_insights: None,
            business_logic: None,
            bulk_operation: None,
            relevant_memories: Vec::new(),
            relevant_rules: Vec::new(),
            conversation_history: Vec::new(),
            prompt_fragments: Vec::new(),
            strategy,
            fallback: false,
            error: None,
        }
    }

    /// Minimal bundle returned when assembly failed unexpectedly
    pub fn fallback(task: Task, error: impl Into<String>) -> Self {
        Self {
            fallback: true,
            error: Some(error.into()),
            ..Self::new(task, BundleStrategy::Fallback)
        }
    }

    /// Keys of every fetched item, in order
    pub fn context_keys(&self) -> Vec<String> {
        self.fetched_context.keys().cloned().collect()
    }

    pub fn history_tokens(&self) -> usize {
        let counter = TokenCounter::new();
        let summary = self
            .conversation_summary
            .as_ref()
            .map_or(0, |s| counter.estimate(&s.summary));
        summary
            + self
                .recent_messages
                .iter()
                .map(ConversationMessage::estimate_tokens)
                .sum::<usize>()
    }

    /// Recompute `token_count` from content
    pub fn recount(&mut self) {
        self.token_count = self.history_tokens() + total_tokens(&self.fetched_context);
    }

    /// Rebuild the compatibility views from fetched context and history
    pub fn refresh_views(&mut self) {
        let mut memories = HitCollector::default();
        let mut rules = HitCollector::default();
        let mut fragments = HitCollector::default();

        for item in self.fetched_context.values() {
            match item.source {
                ContextSource::Memory => memories.extend(&item.results),
                ContextSource::Rules => {
                    for hit in &item.results {
                        match hit.category() {
                            None | Some("rules") => rules.push(hit),
                            Some(_) => fragments.push(hit),
                        }
                    }
                }
                _ => {}
            }
        }

        self.relevant_memories = memories.hits;
        self.relevant_rules = rules.hits;
        self.prompt_fragments = fragments.hits;
        self.conversation_history = self.recent_messages.clone();
    }

    /// Add items whose keys are not already present; returns the added keys
    pub fn merge_context(&mut self, extra: ContextMap) -> Vec<String> {
        let mut added = Vec::new();
        for (key, item) in extra {
            if !self.fetched_context.contains_key(&key) {
                added.push(key.clone());
                self.fetched_context.insert(key, item);
            }
        }
        self.recount();
        self.refresh_views();
        added
    }

    /// Bring the bundle within `max_tokens`.
    ///
    /// ```text
    /// 1. keep every critical item
    /// 2. history = summary + recent; if history > max - critical, drop
    ///    oldest recent messages, then the summary, until it fits
    /// 3. admit helpful, then optional items, in map order, while they fit
    /// ```
    ///
    /// Critical items are never dropped, so the result may still exceed
    /// `max_tokens`; `truncated` is set whenever anything was dropped or the
    /// bundle is over budget.
    pub fn enforce_budget(&mut self, max_tokens: usize) -> BudgetReport {
        self.recount();
        let mut report = BudgetReport {
            before_tokens: self.token_count,
            ..BudgetReport::default()
        };

        if self.token_count <= max_tokens {
            report.after_tokens = self.token_count;
            return report;
        }

        let critical_tokens: usize = self
            .fetched_context
            .values()
            .filter(|item| item.is_critical())
            .map(|item| item.token_count)
            .sum();
        let history_budget = max_tokens.saturating_sub(critical_tokens);

        while self.history_tokens() > history_budget && !self.recent_messages.is_empty() {
            self.recent_messages.remove(0);
            report.dropped_messages += 1;
        }
        if self.history_tokens() > history_budget && self.conversation_summary.is_some() {
            self.conversation_summary = None;
            report.dropped_summary = true;
        }

        let mut used = self.history_tokens() + critical_tokens;

        let mut keep: HashSet<String> = self
            .fetched_context
            .iter()
            .filter(|(_, item)| item.is_critical())
            .map(|(key, _)| key.clone())
            .collect();

        for tier in [Priority::Helpful, Priority::Optional] {
            for (key, item) in self.fetched_context.iter().filter(|(_, i)| i.priority == tier) {
                if used + item.token_count <= max_tokens {
                    used += item.token_count;
                    keep.insert(key.clone());
                }
            }
        }

        report.dropped_keys = self
            .fetched_context
            .keys()
            .filter(|key| !keep.contains(*key))
            .cloned()
            .collect();
        self.fetched_context.retain(|key, _| keep.contains(key));

        self.recount();
        self.refresh_views();
        self.truncated = self.truncated || report.dropped_anything() || self.token_count > max_tokens;
        report.after_tokens = self.token_count;
        report
    }
}

#[derive(Default)]
struct HitCollector {
    seen: HashSet<String>,
    hits: Vec<SearchHit>,
}

impl HitCollector {
    fn push(&mut self, hit: &SearchHit) {
        if self.seen.insert(hit.content.clone()) {
            self.hits.push(hit.clone());
        }
    }

    fn extend(&mut self, hits: &[SearchHit]) {
        for hit in hits {
            self.push(hit);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::types::FetchedContextItem;
    use serde_json::json;

    fn item(priority: Priority, source: ContextSource, tokens: usize) -> FetchedContextItem {
        FetchedContextItem {
            priority,
            source,
            results: vec![SearchHit::new(format!("{:?} {}", priority, tokens), 1.0)],
            token_count: tokens,
        }
    }

    fn bundle() -> ContextBundle {
        let mut bundle = ContextBundle::new(Task::new("reprice grinders", "u"), BundleStrategy::Adaptive);
        bundle.fetched_context.insert("critical".into(), item(Priority::Critical, ContextSource::Memory, 400));
        bundle.fetched_context.insert("optional".into(), item(Priority::Optional, ContextSource::Rules, 100));
        bundle.fetched_context.insert("helpful big".into(), item(Priority::Helpful, ContextSource::Rules, 500));
        bundle.fetched_context.insert("helpful small".into(), item(Priority::Helpful, ContextSource::Memory, 50));
        bundle
    }

    #[test]
    fn test_within_budget_untouched() {
        let mut b = bundle();
        let report = b.enforce_budget(10_000);
        assert_eq!(b.fetched_context.len(), 4);
        assert!(!b.truncated);
        assert_eq!(report.after_tokens, 1_050);
    }

    #[test]
    fn test_truncation_keeps_critical_and_fills_greedily() {
        let mut b = bundle();
        let report = b.enforce_budget(600);

        let keys = b.context_keys();
        assert_eq!(keys, vec!["critical", "optional", "helpful small"]);
        assert_eq!(report.dropped_keys, vec!["helpful big".to_string()]);
        assert!(b.truncated);
        assert_eq!(b.token_count, 550);
    }

    #[test]
    fn test_critical_overage_is_flagged() {
        let mut b = bundle();
        b.enforce_budget(100);
        assert_eq!(b.context_keys(), vec!["critical"]);
        assert_eq!(b.token_count, 400);
        assert!(b.truncated);
    }

    #[test]
    fn test_history_trimmed_oldest_first() {
        let mut b = ContextBundle::new(Task::new("t", "u"), BundleStrategy::Adaptive);
        b.recent_messages = vec![
            ConversationMessage::user("a".repeat(400)),
            ConversationMessage::assistant("b".repeat(400)),
        ];
        let report = b.enforce_budget(150);
        assert_eq!(report.dropped_messages, 1);
        assert!(b.recent_messages[0].content.starts_with('b'));
        assert_eq!(b.conversation_history.len(), 1);
        assert!(b.truncated);
    }

    #[test]
    fn test_history_yields_to_critical_items() {
        let mut b = ContextBundle::new(Task::new("t", "u"), BundleStrategy::Adaptive);
        b.fetched_context.insert("critical".into(), item(Priority::Critical, ContextSource::Memory, 120));
        b.recent_messages = vec![
            ConversationMessage::user("a".repeat(200)),
            ConversationMessage::assistant("b".repeat(200)),
        ];
        let report = b.enforce_budget(100);

        assert!(b.recent_messages.is_empty());
        assert_eq!(report.dropped_messages, 2);
        assert_eq!(b.history_tokens(), 0);
        assert_eq!(b.token_count, 120);
        assert!(b.truncated);
    }

    #[test]
    fn test_history_trimmed_only_to_fit_beside_critical() {
        let mut b = ContextBundle::new(Task::new("t", "u"), BundleStrategy::Adaptive);
        b.fetched_context.insert("critical".into(), item(Priority::Critical, ContextSource::Memory, 50));
        b.recent_messages = vec![
            ConversationMessage::user("a".repeat(200)),
            ConversationMessage::assistant("b".repeat(200)),
        ];
        let history = b.history_tokens();
        b.enforce_budget(50 + history - 1);

        assert_eq!(b.recent_messages.len(), 1);
        assert!(b.recent_messages[0].content.starts_with('b'));
        assert!(b.token_count <= 50 + history - 1);
    }

    #[test]
    fn test_views_split_rules_and_fragments() {
        let mut b = ContextBundle::new(Task::new("t", "u"), BundleStrategy::Adaptive);
        let rules = FetchedContextItem {
            priority: Priority::Critical,
            source: ContextSource::Rules,
            results: vec![
                SearchHit::new("never below MAP", 0.9).with_metadata(json!({ "category": "rules" })),
                SearchHit::new("use bulk tool", 0.8).with_metadata(json!({ "category": "tools" })),
                SearchHit::new("untagged", 0.5),
            ],
            token_count: 30,
        };
        let memories = FetchedContextItem {
            priority: Priority::Helpful,
            source: ContextSource::Memory,
            results: vec![SearchHit::new("likes Eureka", 0.7)],
            token_count: 10,
        };
        b.fetched_context.insert("rules".into(), rules);
        b.fetched_context.insert("memories".into(), memories.clone());
        b.fetched_context.insert("memories again".into(), memories);
        b.refresh_views();

        assert_eq!(b.relevant_rules.len(), 2);
        assert_eq!(b.prompt_fragments.len(), 1);
        assert_eq!(b.relevant_memories.len(), 1);
    }

    #[test]
    fn test_fallback_shape() {
        let b = ContextBundle::fallback(Task::new("t", "u"), "boom");
        assert!(b.fallback);
        assert_eq!(b.error.as_deref(), Some("boom"));
        assert!(b.relevant_memories.is_empty() && b.relevant_rules.is_empty());
        assert!(b.conversation_history.is_empty() && b.prompt_fragments.is_empty());

        let json = serde_json::to_value(&b).unwrap();
        assert!(json["relevant_memories"].is_array());
        assert!(json["prompt_fragments"].is_array());
    }
}
