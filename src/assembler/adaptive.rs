//! Adaptive builder: extract → analyze → fetch → filter → summarize
//!
//! Stages run strictly in sequence since each consumes the previous one's
//! output. Every stage degrades on its own; this builder never fails.

use std::time::Instant;

use crate::assembler::business::{BulkOperation, BusinessLogic};
use crate::assembler::types::AssemblyOptions;
use crate::context::bundle::{BundleStrategy, ContextBundle};
use crate::context::summarizer::ConversationSummarizer;
use crate::feedback::ContextFeedbackLoop;
use crate::fetch::ContextFetcher;
use crate::filter::RelevanceFilter;
use crate::intent::{ExtractedIntent, IntentExtractor};
use crate::needs::{AnalysisHints, ContextNeedAnalyzer, ContextSuggestion};
use crate::telemetry::{PipelineEvent, TelemetryCollector};
use crate::types::messages::transcript;

/// Turns of history handed to the extractor as prior context
const PRIOR_CONTEXT_TURNS: usize = 2;

/// The default context builder
#[derive(Clone)]
pub struct AdaptiveAssembler {
    extractor: IntentExtractor,
    analyzer: ContextNeedAnalyzer,
    fetcher: ContextFetcher,
    filter: RelevanceFilter,
    summarizer: ConversationSummarizer,
    feedback: ContextFeedbackLoop,
    telemetry: TelemetryCollector,
}

impl AdaptiveAssembler {
    pub fn new(
        extractor: IntentExtractor,
        analyzer: ContextNeedAnalyzer,
        fetcher: ContextFetcher,
        filter: RelevanceFilter,
        summarizer: ConversationSummarizer,
        feedback: ContextFeedbackLoop,
        telemetry: TelemetryCollector,
    ) -> Self {
        Self {
            extractor,
            analyzer,
            fetcher,
            filter,
            summarizer,
            feedback,
            telemetry,
        }
    }

    pub async fn build(&self, options: &AssemblyOptions) -> ContextBundle {
        let started = Instant::now();
        let task = &options.task;

        let intent = self.extract(options).await;

        let insights = match self.feedback.get_recommendations(&task.text).await {
            Ok(insights) if insights.similar_tasks > 0 || !insights.is_empty() => Some(insights),
            Ok(_) => None,
            Err(e) => {
                tracing::warn!(error = %e, "feedback recommendations unavailable");
                None
            }
        };

        let hints = AnalysisHints {
            prior_recommendations: insights.clone(),
            recent_errors: options.recent_errors.clone(),
        };
        let suggestions = self.analyze(&task.text, intent.as_ref(), &hints).await;

        let fetched = self.fetcher.fetch(&suggestions, &task.user_id).await;
        let filtered = self
            .filter
            .filter(&task.text, &fetched.context, options.max_tokens)
            .await;

        let history = self
            .summarizer
            .build_compressed(&options.messages, options.max_recent_turns)
            .await;

        let business = BusinessLogic::detect(&task.text);
        let mut bundle = ContextBundle::new(task.clone(), BundleStrategy::Adaptive);
        bundle.bulk_operation = intent
            .as_ref()
            .filter(|i| i.is_bulk())
            .map(|i| BulkOperation::from_intent(i, &business));
        bundle.business_logic = Some(business);
        bundle.extracted_data = intent;
        bundle.context_analysis = suggestions;
        bundle.fetched_context = filtered;
        bundle.conversation_summary = history.final_summary;
        bundle.recent_messages = history.recent_messages;
        bundle.feedback_insights = insights;

        let report = bundle.enforce_budget(options.max_tokens);
        if report.dropped_anything() {
            tracing::info!(
                before = report.before_tokens,
                after = report.after_tokens,
                dropped = ?report.dropped_keys,
                "bundle truncated to budget"
            );
            self.telemetry.record(PipelineEvent::BudgetTruncation {
                before_tokens: report.before_tokens,
                after_tokens: report.after_tokens,
                dropped_items: report.dropped_keys.len(),
                timestamp: Instant::now(),
            });
        }
        bundle.refresh_views();

        tracing::info!(
            items = bundle.fetched_context.len(),
            tokens = bundle.token_count,
            truncated = bundle.truncated,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "adaptive context assembled"
        );
        self.telemetry.stage_completed("assemble", started);
        bundle
    }

    async fn extract(&self, options: &AssemblyOptions) -> Option<ExtractedIntent> {
        let started = Instant::now();
        let tail = options.messages.len().saturating_sub(PRIOR_CONTEXT_TURNS);
        let prior = transcript(&options.messages[tail..]);
        let prior = (!prior.is_empty()).then_some(prior);

        match self.extractor.extract(&options.task.text, prior.as_deref()).await {
            Ok(intent) => {
                tracing::debug!(action = %intent.action, scope = ?intent.scope, "intent extracted");
                self.telemetry.stage_completed("extract", started);
                Some(intent)
            }
            Err(e) => {
                tracing::warn!(error = %e, "intent extraction failed, continuing without intent");
                self.telemetry.stage_degraded("extract", e.to_string());
                None
            }
        }
    }

    async fn analyze(
        &self,
        task: &str,
        intent: Option<&ExtractedIntent>,
        hints: &AnalysisHints,
    ) -> Vec<ContextSuggestion> {
        let started = Instant::now();
        match self.analyzer.analyze(task, intent, hints).await {
            Ok(suggestions) => {
                self.telemetry.stage_completed("analyze", started);
                suggestions
            }
            Err(e) => {
                tracing::warn!(error = %e, "need analysis failed, continuing with no suggestions");
                self.telemetry.stage_degraded("analyze", e.to_string());
                Vec::new()
            }
        }
    }
}
