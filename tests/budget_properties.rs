//! Property tests for budget enforcement, the filter's treatment of critical
//! items, summarization bounds, the fail-open filter and the analyzer's
//! recall floor

mod common;

use std::sync::Arc;

use quickcheck::TestResult;
use quickcheck_macros::quickcheck;
use serde_json::json;

use espresso_context::config::{FilterConfig, SummaryConfig};
use espresso_context::context::ConversationSummarizer;
use espresso_context::fetch::{ContextMap, FetchedContextItem};
use espresso_context::filter::{apply_decisions, RelevanceDecision, RelevanceFilter};
use espresso_context::llm::{InferenceStage, ScriptedInference};
use espresso_context::needs::{AnalysisHints, ContextNeedAnalyzer, ContextSource, Priority};
use espresso_context::store::SearchHit;
use espresso_context::telemetry::TelemetryCollector;
use espresso_context::{BundleStrategy, ContextBundle, ConversationMessage, Task};

fn priority(code: u8) -> Priority {
    match code % 3 {
        0 => Priority::Critical,
        1 => Priority::Helpful,
        _ => Priority::Optional,
    }
}

/// Bundle with one fetched item per `(priority, tokens)` pair and a history
/// of `messages` turns of `message_len` characters each
fn bundle(items: &[(u8, u16)], messages: u8, message_len: u8) -> ContextBundle {
    let mut bundle = ContextBundle::new(Task::new("reprice grinders", "u"), BundleStrategy::Adaptive);
    for (i, (code, tokens)) in items.iter().enumerate() {
        bundle.fetched_context.insert(
            format!("item {}", i),
            FetchedContextItem {
                priority: priority(*code),
                source: ContextSource::Memory,
                results: vec![SearchHit::new(format!("hit {}", i), 0.5)],
                token_count: *tokens as usize,
            },
        );
    }
    bundle.recent_messages = (0..messages)
        .map(|_| ConversationMessage::user("x".repeat(message_len as usize)))
        .collect();
    bundle
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("runtime")
}

#[quickcheck]
fn prop_budget_holds_or_only_critical_overflows(items: Vec<(u8, u16)>, messages: u8, message_len: u8, max: u16) -> bool {
    let max_tokens = max as usize;
    let mut bundle = bundle(&items, messages % 20, message_len);
    bundle.enforce_budget(max_tokens);

    let within = bundle.token_count <= max_tokens;
    let only_critical = bundle.fetched_context.values().all(|item| item.is_critical());
    within || (only_critical && bundle.truncated && bundle.history_tokens() == 0)
}

#[quickcheck]
fn prop_critical_items_never_dropped(items: Vec<(u8, u16)>, max: u16) -> bool {
    let mut bundle = bundle(&items, 0, 0);
    let critical_before: Vec<String> = bundle
        .fetched_context
        .iter()
        .filter(|(_, item)| item.is_critical())
        .map(|(key, _)| key.clone())
        .collect();

    let report = bundle.enforce_budget(max as usize);

    critical_before
        .iter()
        .all(|key| bundle.fetched_context.contains_key(key) && !report.dropped_keys.contains(key))
}

#[quickcheck]
fn prop_dropped_optional_would_not_fit(items: Vec<(u8, u16)>, max: u16) -> TestResult {
    let mut bundle = bundle(&items, 0, 0);
    let original = bundle.fetched_context.clone();
    let report = bundle.enforce_budget(max as usize);
    if report.dropped_keys.is_empty() {
        return TestResult::discard();
    }

    // Every dropped item would have pushed the kept set over budget
    let kept = bundle.token_count;
    let ok = report.dropped_keys.iter().all(|key| {
        original
            .get(key)
            .is_some_and(|item| !item.is_critical() && kept + item.token_count > max as usize)
    });
    TestResult::from_bool(ok)
}

#[quickcheck]
fn prop_relevant_critical_items_survive_filter_and_budget(
    items: Vec<(u8, u16, bool)>,
    filter_max: u16,
    max: u16,
) -> bool {
    let pairs: Vec<(u8, u16)> = items.iter().map(|(code, tokens, _)| (*code, *tokens)).collect();
    let context = bundle(&pairs, 0, 0).fetched_context;

    // Model order is unrelated to priority
    let decisions: Vec<RelevanceDecision> = items
        .iter()
        .enumerate()
        .rev()
        .map(|(i, (_, _, relevant))| RelevanceDecision {
            key: format!("item {}", i),
            relevant: *relevant,
            priority: None,
            reason: None,
        })
        .collect();

    let mut assembled = bundle(&[], 0, 0);
    assembled.fetched_context = apply_decisions(&context, &decisions, filter_max as usize);
    assembled.enforce_budget(max as usize);

    items.iter().enumerate().all(|(i, (code, _, relevant))| {
        let key = format!("item {}", i);
        !relevant || priority(*code) != Priority::Critical || assembled.fetched_context.contains_key(&key)
    })
}

#[quickcheck]
fn prop_summarization_bounds(total: u8, recent: u8, summary_len: u16) -> bool {
    let total = (total % 60) as usize;
    let recent = (recent % 12) as usize;
    let config = SummaryConfig::default();
    let max_summary = config.max_summary_length;

    let inference = ScriptedInference::new()
        .respond(InferenceStage::ChunkSummary, json!({ "summary": "s".repeat(summary_len as usize) }))
        .fail(InferenceStage::SummaryCombine, "combine model unavailable");
    let summarizer = ConversationSummarizer::new(Arc::new(inference), config, TelemetryCollector::new());
    let messages = common::conversation(total);

    let history = runtime().block_on(summarizer.build_compressed(&messages, recent));

    let summary_ok = history
        .final_summary
        .as_ref()
        .map_or(true, |s| s.summary.chars().count() <= max_summary);
    summary_ok
        && history.recent_messages.len() <= recent
        && history.summarized_count + history.recent_messages.len() == history.total_messages
        && history.total_messages == total
}

#[quickcheck]
fn prop_filter_fails_open(items: Vec<(u8, u16)>) -> bool {
    let inference = ScriptedInference::new().fail(InferenceStage::RelevanceFilter, "filter model down");
    let filter = RelevanceFilter::new(Arc::new(inference), FilterConfig::default(), TelemetryCollector::new());
    let context: ContextMap = bundle(&items, 0, 0).fetched_context;

    let filtered = runtime().block_on(filter.filter("find unmatched grinder SKUs", &context, 10));
    filtered == context
}

#[quickcheck]
fn prop_analysis_always_includes_direct_searches(task: String) -> TestResult {
    if task.trim().is_empty() {
        return TestResult::discard();
    }
    let inference = ScriptedInference::new().respond(
        InferenceStage::NeedAnalysis,
        json!({ "suggestions": [
            { "description": "Vendor terms", "priority": "helpful", "searchQuery": "vendor terms", "source": "rules" }
        ]}),
    );
    let analyzer = ContextNeedAnalyzer::new(Arc::new(inference));

    let suggestions = match runtime().block_on(analyzer.analyze(&task, None, &AnalysisHints::default())) {
        Ok(suggestions) => suggestions,
        Err(_) => return TestResult::failed(),
    };

    let has = |source: ContextSource| {
        suggestions
            .iter()
            .any(|s| s.source == source && s.priority == Priority::Critical && s.search_query == task)
    };
    let sorted = suggestions.windows(2).all(|w| w[0].priority <= w[1].priority);
    TestResult::from_bool(has(ContextSource::Memory) && has(ContextSource::Rules) && sorted)
}
