//! Engine facade
//!
//! Wires every stage from one set of collaborators and one config, and
//! exposes the entry points the agent runner calls.

use std::future::Future;
use std::sync::Arc;

use serde_json::json;

use crate::assembler::{AdaptiveAssembler, AssemblyOptions, Strategy, TieredAssembler};
use crate::background::BackgroundTasks;
use crate::config::EngineConfig;
use crate::context::bundle::ContextBundle;
use crate::context::summarizer::ConversationSummarizer;
use crate::enhancer::{AgentRunner, EnhancedRun, ProgressiveEnhancer};
use crate::errors::Result;
use crate::feedback::{ContextFeedbackLoop, HistoryCleanup, OperationOutcome, OperationStatus};
use crate::fetch::ContextFetcher;
use crate::filter::RelevanceFilter;
use crate::intent::IntentExtractor;
use crate::llm::{InferenceClient, OllamaInference};
use crate::needs::ContextNeedAnalyzer;
use crate::store::{FragmentStore, InMemoryUsageStats, LearningStore, MemoryStore, UsageStatsRepository};
use crate::telemetry::TelemetryCollector;
use crate::types::Task;

/// External services the engine consumes
#[derive(Clone)]
pub struct Collaborators {
    pub inference: Arc<dyn InferenceClient>,
    pub memory: Arc<dyn MemoryStore>,
    pub fragments: Arc<dyn FragmentStore>,
    pub learning: Arc<dyn LearningStore>,
    pub usage_stats: Arc<dyn UsageStatsRepository>,
}

impl Collaborators {
    /// Ollama inference with process-local usage stats
    pub fn with_ollama(
        config: &EngineConfig,
        memory: Arc<dyn MemoryStore>,
        fragments: Arc<dyn FragmentStore>,
        learning: Arc<dyn LearningStore>,
    ) -> Result<Self> {
        Ok(Self {
            inference: Arc::new(OllamaInference::new(&config.inference)?),
            memory,
            fragments,
            learning,
            usage_stats: Arc::new(InMemoryUsageStats::new(config.feedback.usage_stats_capacity)),
        })
    }
}

/// Context assembly and learning, ready to serve requests
#[derive(Clone)]
pub struct ContextEngine {
    config: EngineConfig,
    adaptive: AdaptiveAssembler,
    tiered: TieredAssembler,
    feedback: ContextFeedbackLoop,
    enhancer: ProgressiveEnhancer,
    telemetry: TelemetryCollector,
    background: BackgroundTasks,
}

impl ContextEngine {
    /// Build the engine; fails only on invalid config
    pub fn new(collaborators: Collaborators, config: EngineConfig) -> Result<Self> {
        config.validate()?;

        let telemetry = TelemetryCollector::new();
        let background = BackgroundTasks::new(telemetry.clone());
        let inference = collaborators.inference;

        let fetcher = ContextFetcher::new(
            Arc::clone(&collaborators.memory),
            Arc::clone(&collaborators.fragments),
            config.fetch.clone(),
            telemetry.clone(),
        );
        let summarizer = ConversationSummarizer::new(
            Arc::clone(&inference),
            config.summary.clone(),
            telemetry.clone(),
        );
        let feedback = ContextFeedbackLoop::new(
            Arc::clone(&inference),
            Arc::clone(&collaborators.learning),
            collaborators.usage_stats,
            config.feedback.clone(),
            background.clone(),
            telemetry.clone(),
        );

        let adaptive = AdaptiveAssembler::new(
            IntentExtractor::new(Arc::clone(&inference)),
            ContextNeedAnalyzer::new(Arc::clone(&inference)),
            fetcher.clone(),
            RelevanceFilter::new(Arc::clone(&inference), config.filter.clone(), telemetry.clone()),
            summarizer.clone(),
            feedback.clone(),
            telemetry.clone(),
        );
        let tiered = TieredAssembler::new(
            collaborators.memory,
            collaborators.fragments,
            summarizer,
            config.tiered.clone(),
            telemetry.clone(),
        );
        let enhancer = ProgressiveEnhancer::new(
            inference,
            fetcher,
            collaborators.learning,
            background.clone(),
            config.enhancer.clone(),
            telemetry.clone(),
        );

        tracing::info!(adaptive = config.assembly.adaptive_enabled, "context engine ready");
        Ok(Self {
            config,
            adaptive,
            tiered,
            feedback,
            enhancer,
            telemetry,
            background,
        })
    }

    /// Default options for `task` from config
    pub fn options(&self, task: Task) -> AssemblyOptions {
        AssemblyOptions::new(task, &self.config.assembly)
    }

    /// Run the adaptive pipeline
    pub async fn build_adaptive_context(&self, options: AssemblyOptions) -> ContextBundle {
        let assembler = self.adaptive.clone();
        let task = options.task.clone();
        guarded(task, async move { assembler.build(&options).await }).await
    }

    /// Run the tiered builder
    pub async fn build_tiered_context(&self, options: AssemblyOptions) -> ContextBundle {
        let assembler = self.tiered.clone();
        let task = options.task.clone();
        guarded(task, async move { assembler.build(&options).await }).await
    }

    /// Dispatch on `options.strategy`
    pub async fn build_context(&self, options: AssemblyOptions) -> ContextBundle {
        let adaptive = match options.strategy {
            Strategy::Adaptive => true,
            Strategy::Tiered => false,
            Strategy::Auto => self.config.assembly.adaptive_enabled,
        };
        if adaptive {
            self.build_adaptive_context(options).await
        } else {
            self.build_tiered_context(options).await
        }
    }

    /// Fetch `queries` and merge them into `bundle`
    pub async fn enhance_context(&self, bundle: ContextBundle, queries: &[String]) -> ContextBundle {
        self.enhancer.enhance_context(bundle, queries).await
    }

    /// Run the agent with up to `enhancer.max_attempts` attempts, refining
    /// the bundle between failures
    pub async fn run_with_enhancement(&self, runner: &dyn AgentRunner, bundle: ContextBundle) -> EnhancedRun {
        self.enhancer
            .run_with_enhancement(runner, bundle, self.config.enhancer.max_attempts)
            .await
    }

    /// Forget feedback state older than `feedback.usage_stats_ttl_hours`
    pub async fn clear_old_history(&self) -> Result<HistoryCleanup> {
        self.feedback.clear_old_history(self.config.usage_stats_ttl()).await
    }

    /// Record a finished run in one call, in the background
    pub fn learn_from_operation(&self, task: &str, bundle: &ContextBundle, outcome: OperationOutcome) {
        let feedback = self.feedback.clone();
        let task = task.to_string();
        let bundle = bundle.clone();

        self.background.spawn("learn_from_operation", async move {
            let id = feedback.start_operation(&task, &bundle).await;
            for tool in &outcome.tools_used {
                feedback.track_tool_usage(id, tool, serde_json::Value::Null, None).await;
            }
            if !outcome.used_context.is_empty() {
                feedback
                    .track_tool_usage(id, "context_reference", json!({ "keys": outcome.used_context }), None)
                    .await;
            }
            if let Some(error) = &outcome.error {
                feedback.track_error(id, error).await;
            }

            let status = if outcome.success {
                OperationStatus::Completed
            } else {
                OperationStatus::Failed(outcome.error.clone().unwrap_or_default())
            };
            feedback.complete_operation(id, status).await;
            Ok(())
        });
    }

    pub fn feedback(&self) -> &ContextFeedbackLoop {
        &self.feedback
    }

    pub fn enhancer(&self) -> &ProgressiveEnhancer {
        &self.enhancer
    }

    pub fn telemetry(&self) -> &TelemetryCollector {
        &self.telemetry
    }

    pub fn background(&self) -> &BackgroundTasks {
        &self.background
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
}

/// Run a builder on its own task so a panic yields a fallback bundle
async fn guarded<F>(task: Task, build: F) -> ContextBundle
where
    F: Future<Output = ContextBundle> + Send + 'static,
{
    match tokio::spawn(build).await {
        Ok(bundle) => bundle,
        Err(e) => {
            tracing::error!(error = %e, task = %task.text, "context assembly aborted, returning fallback bundle");
            ContextBundle::fallback(task, format!("context assembly aborted: {}", e))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ScriptedInference;
    use crate::store::{InMemoryFragmentStore, InMemoryLearningStore, InMemoryMemoryStore};

    fn collaborators(inference: ScriptedInference) -> Collaborators {
        Collaborators {
            inference: Arc::new(inference),
            memory: Arc::new(InMemoryMemoryStore::new()),
            fragments: Arc::new(InMemoryFragmentStore::new()),
            learning: Arc::new(InMemoryLearningStore::new()),
            usage_stats: Arc::new(InMemoryUsageStats::default()),
        }
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = EngineConfig::default();
        config.assembly.default_max_tokens = 0;
        assert!(ContextEngine::new(collaborators(ScriptedInference::new()), config).is_err());
    }

    #[tokio::test]
    async fn test_auto_uses_tiered_when_adaptive_disabled() {
        let mut config = EngineConfig::default();
        config.assembly.adaptive_enabled = false;
        let engine = ContextEngine::new(collaborators(ScriptedInference::new()), config).unwrap();

        let bundle = engine.build_context(engine.options(Task::new("show orders", "u"))).await;
        assert_eq!(bundle.strategy, crate::context::BundleStrategy::TieredCore);
    }

    #[tokio::test]
    async fn test_panicking_builder_falls_back() {
        let bundle = guarded(Task::new("t", "u"), async { panic!("stage bug") }).await;
        assert!(bundle.fallback);
        assert!(bundle.error.unwrap().contains("aborted"));
        assert!(bundle.relevant_rules.is_empty());
    }

    struct AlwaysFailing {
        calls: std::sync::atomic::AtomicU32,
    }

    #[async_trait::async_trait]
    impl AgentRunner for AlwaysFailing {
        async fn run(&self, _bundle: &ContextBundle) -> Result<crate::enhancer::AgentRunOutput> {
            self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok(crate::enhancer::AgentRunOutput::failed("no idea", "product not found"))
        }
    }

    #[tokio::test]
    async fn test_run_with_enhancement_uses_configured_attempts() {
        let mut config = EngineConfig::default();
        config.enhancer.max_attempts = 2;
        let engine = ContextEngine::new(collaborators(ScriptedInference::new()), config).unwrap();
        let runner = AlwaysFailing {
            calls: std::sync::atomic::AtomicU32::new(0),
        };

        let bundle = ContextBundle::new(
            Task::new("Find grinder SKU EUR-01", "u"),
            crate::context::BundleStrategy::Adaptive,
        );
        let run = engine.run_with_enhancement(&runner, bundle).await;

        assert!(!run.succeeded());
        assert_eq!(run.attempts, 2);
        assert_eq!(runner.calls.load(std::sync::atomic::Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_clear_old_history_uses_configured_ttl() {
        let usage = Arc::new(InMemoryUsageStats::default());
        let mut parts = collaborators(ScriptedInference::new());
        parts.usage_stats = usage.clone();

        let mut config = EngineConfig::default();
        config.feedback.usage_stats_ttl_hours = 1;
        let engine = ContextEngine::new(parts.clone(), config).unwrap();
        usage.record("vendor rules", crate::store::KeyOutcome::Useful).await.unwrap();

        assert_eq!(engine.clear_old_history().await.unwrap(), HistoryCleanup::default());
        assert!(usage.get("vendor rules").await.unwrap().is_some());

        let mut config = EngineConfig::default();
        config.feedback.usage_stats_ttl_hours = 0;
        let engine = ContextEngine::new(parts, config).unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;

        let cleanup = engine.clear_old_history().await.unwrap();
        assert_eq!(cleanup.usage_keys, 1);
        assert!(usage.get("vendor rules").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_everything_failing_still_yields_bundle() {
        let engine = ContextEngine::new(collaborators(ScriptedInference::new()), EngineConfig::default()).unwrap();
        let bundle = engine
            .build_adaptive_context(engine.options(Task::new("Update price for SKU ABC-123", "u")))
            .await;

        assert!(!bundle.fallback);
        assert!(bundle.extracted_data.is_none());
        assert!(bundle.context_analysis.is_empty());
        assert!(bundle.fetched_context.is_empty());
        assert!(engine.telemetry().get_stats().stages_degraded >= 2);
    }
}
