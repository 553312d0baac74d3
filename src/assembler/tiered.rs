//! Inference-free tiered builder
//!
//! A keyword classifier picks between a cheap core bundle and a full one.
//! Nothing here calls a model except the history summarizer of the full
//! tier, which degrades to placeholders on its own.

use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};
use std::time::Instant;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::assembler::business::BusinessLogic;
use crate::assembler::types::AssemblyOptions;
use crate::config::TieredConfig;
use crate::context::bundle::{BundleStrategy, ContextBundle};
use crate::context::counter::TokenCounter;
use crate::context::summarizer::ConversationSummarizer;
use crate::fetch::types::FetchedContextItem;
use crate::needs::types::{ContextSource, Priority};
use crate::store::{FragmentStore, MemoryStore, SearchHit};
use crate::telemetry::{PipelineEvent, TelemetryCollector};
use crate::types::ConversationMessage;

const BULK_PATTERN: &str = r"(?i)\b(bulk|batch|mass[- ]update|all (?:products|items|variants|skus)|every (?:product|item|variant|sku)|entire (?:catalog|collection|store))\b";
const COUNT_PATTERN: &str = r"(?:^|\s)(\d{3,})\s+[a-zA-Z]";
const JSON_PATTERN: &str = r#"[\[{]\s*"[^"\n]+"\s*:"#;
const SKU_PATTERN: &str = r"\b[A-Z]{2,}-?\d{2,}[A-Z0-9-]*\b";

const LONG_MESSAGE_CHARS: usize = 5_000;
const BULK_COUNT: usize = 100;
const SKU_THRESHOLD: usize = 5;
const CSV_MIN_ROWS: usize = 3;

pub const MEMORIES_KEY: &str = "Relevant memories";
pub const CRITICAL_RULES_KEY: &str = "Critical business rules";
pub const RULES_KEY: &str = "Business rules";

/// Why a task needs the full tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FullContextSignal {
    BulkKeyword,
    LargeCount,
    StructuredData,
    LongMessage,
    ManySkus,
}

struct Patterns {
    bulk: Regex,
    count: Regex,
    json: Regex,
    sku: Regex,
}

fn patterns() -> Option<&'static Patterns> {
    static PATTERNS: OnceLock<Option<Patterns>> = OnceLock::new();
    PATTERNS
        .get_or_init(|| {
            Some(Patterns {
                bulk: Regex::new(BULK_PATTERN).ok()?,
                count: Regex::new(COUNT_PATTERN).ok()?,
                json: Regex::new(JSON_PATTERN).ok()?,
                sku: Regex::new(SKU_PATTERN).ok()?,
            })
        })
        .as_ref()
}

fn looks_like_csv(text: &str) -> bool {
    text.lines()
        .filter(|line| line.matches(',').count() >= 2)
        .count()
        >= CSV_MIN_ROWS
}

/// Every full-context signal found in the task and its messages
pub fn full_context_signals(task: &str, messages: &[ConversationMessage]) -> Vec<FullContextSignal> {
    let Some(p) = patterns() else {
        return Vec::new();
    };

    let texts: Vec<&str> = std::iter::once(task)
        .chain(messages.iter().map(|m| m.content.as_str()))
        .collect();
    let mut signals = Vec::new();

    if texts.iter().any(|t| p.bulk.is_match(t)) {
        signals.push(FullContextSignal::BulkKeyword);
    }

    let large_count = texts.iter().any(|t| {
        p.count
            .captures_iter(t)
            .filter_map(|c| c.get(1)?.as_str().parse::<usize>().ok())
            .any(|n| n >= BULK_COUNT)
    });
    if large_count {
        signals.push(FullContextSignal::LargeCount);
    }

    if texts.iter().any(|t| p.json.is_match(t) || looks_like_csv(t)) {
        signals.push(FullContextSignal::StructuredData);
    }

    if texts.iter().any(|t| t.chars().count() > LONG_MESSAGE_CHARS) {
        signals.push(FullContextSignal::LongMessage);
    }

    let mut skus: Vec<&str> = texts
        .iter()
        .flat_map(|t| p.sku.find_iter(t).map(|m| m.as_str()))
        .collect();
    skus.sort_unstable();
    skus.dedup();
    if skus.len() > SKU_THRESHOLD {
        signals.push(FullContextSignal::ManySkus);
    }

    signals
}

/// True when the task should get the full tier
pub fn requires_full_context(task: &str, messages: &[ConversationMessage]) -> bool {
    !full_context_signals(task, messages).is_empty()
}

/// Builds core or full bundles from the stores
#[derive(Clone)]
pub struct TieredAssembler {
    memory: Arc<dyn MemoryStore>,
    fragments: Arc<dyn FragmentStore>,
    summarizer: ConversationSummarizer,
    config: TieredConfig,
    telemetry: TelemetryCollector,
    counter: TokenCounter,
}

impl TieredAssembler {
    pub fn new(
        memory: Arc<dyn MemoryStore>,
        fragments: Arc<dyn FragmentStore>,
        summarizer: ConversationSummarizer,
        config: TieredConfig,
        telemetry: TelemetryCollector,
    ) -> Self {
        Self {
            memory,
            fragments,
            summarizer,
            config,
            telemetry,
            counter: TokenCounter::new(),
        }
    }

    /// Classify and build
    pub async fn build(&self, options: &AssemblyOptions) -> ContextBundle {
        let signals = full_context_signals(&options.task.text, &options.messages);
        let full = options.force_full_context || !signals.is_empty();
        tracing::info!(full, ?signals, forced = options.force_full_context, "tiered context selected");

        if full {
            self.build_full(options).await
        } else {
            self.build_core(options).await
        }
    }

    /// Last few turns, top memories and critical rules only
    pub async fn build_core(&self, options: &AssemblyOptions) -> ContextBundle {
        let started = Instant::now();
        let task = &options.task;
        let mut bundle = ContextBundle::new(task.clone(), BundleStrategy::TieredCore);
        bundle.business_logic = Some(BusinessLogic::detect(&task.text));

        let keep = options.messages.len().min(self.config.core_recent_turns);
        bundle.recent_messages = options.messages[options.messages.len() - keep..].to_vec();

        let memories = self.search_memories(&task.text, &task.user_id, self.config.core_memories).await;
        self.insert(&mut bundle, MEMORIES_KEY, Priority::Helpful, ContextSource::Memory, memories);

        let critical: Vec<SearchHit> = self
            .search_fragments(&task.text, self.config.full_rules)
            .await
            .into_iter()
            .filter(|hit| hit.priority() == Some("critical"))
            .filter(|hit| matches!(hit.category(), None | Some("rules")))
            .take(self.config.core_rules)
            .collect();
        self.insert(&mut bundle, CRITICAL_RULES_KEY, Priority::Critical, ContextSource::Rules, critical);

        self.finish(&mut bundle, options.max_tokens);
        self.telemetry.stage_completed("tiered_core", started);
        bundle
    }

    /// Compressed history, more memories, every rule and capped fragments
    pub async fn build_full(&self, options: &AssemblyOptions) -> ContextBundle {
        let started = Instant::now();
        let task = &options.task;
        let mut bundle = ContextBundle::new(task.clone(), BundleStrategy::TieredFull);
        bundle.business_logic = Some(BusinessLogic::detect(&task.text));

        let history = self
            .summarizer
            .build_compressed(&options.messages, self.config.full_recent_turns)
            .await;
        bundle.conversation_summary = history.final_summary;
        bundle.recent_messages = history.recent_messages;

        let memories = self.search_memories(&task.text, &task.user_id, self.config.full_memories).await;
        self.insert(&mut bundle, MEMORIES_KEY, Priority::Helpful, ContextSource::Memory, memories);

        let mut critical_rules = Vec::new();
        let mut rules = Vec::new();
        let mut by_category: BTreeMap<String, Vec<SearchHit>> = BTreeMap::new();

        for hit in self.search_fragments(&task.text, self.config.full_rules).await {
            let category = hit.category().map(str::to_string);
            let critical = hit.priority() == Some("critical");
            match category.as_deref() {
                None | Some("rules") if critical => critical_rules.push(hit),
                None | Some("rules") => rules.push(hit),
                Some(category) => {
                    let slot = by_category.entry(category.to_string()).or_default();
                    if slot.len() < self.config.fragments_per_category {
                        slot.push(hit);
                    }
                }
            }
        }

        self.insert(&mut bundle, CRITICAL_RULES_KEY, Priority::Critical, ContextSource::Rules, critical_rules);
        self.insert(&mut bundle, RULES_KEY, Priority::Helpful, ContextSource::Rules, rules);
        for (category, hits) in by_category {
            let key = format!("Prompt fragments: {}", category);
            self.insert(&mut bundle, &key, Priority::Optional, ContextSource::Rules, hits);
        }

        self.finish(&mut bundle, options.max_tokens);
        self.telemetry.stage_completed("tiered_full", started);
        bundle
    }

    fn insert(
        &self,
        bundle: &mut ContextBundle,
        key: &str,
        priority: Priority,
        source: ContextSource,
        results: Vec<SearchHit>,
    ) {
        if results.is_empty() {
            return;
        }
        let token_count = self.counter.estimate_serialized(&results);
        bundle.fetched_context.insert(
            key.to_string(),
            FetchedContextItem {
                priority,
                source,
                results,
                token_count,
            },
        );
    }

    fn finish(&self, bundle: &mut ContextBundle, max_tokens: usize) {
        let report = bundle.enforce_budget(max_tokens);
        if report.dropped_anything() {
            self.telemetry.record(PipelineEvent::BudgetTruncation {
                before_tokens: report.before_tokens,
                after_tokens: report.after_tokens,
                dropped_items: report.dropped_keys.len(),
                timestamp: Instant::now(),
            });
        }
        bundle.refresh_views();
    }

    async fn search_memories(&self, query: &str, user_id: &str, limit: usize) -> Vec<SearchHit> {
        match self.memory.search(query, user_id, limit).await {
            Ok(hits) => hits,
            Err(e) => {
                tracing::warn!(error = %e, "memory search failed in tiered builder");
                Vec::new()
            }
        }
    }

    async fn search_fragments(&self, query: &str, limit: usize) -> Vec<SearchHit> {
        match self.fragments.search_fragments(query, limit).await {
            Ok(hits) => hits,
            Err(e) => {
                tracing::warn!(error = %e, "fragment search failed in tiered builder");
                Vec::new()
            }
        }
    }
}
