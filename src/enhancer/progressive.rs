//! Progressive context enhancement for stalled agent runs

use std::sync::Arc;
use std::time::Instant;

use indexmap::IndexMap;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::RwLock;

use crate::background::BackgroundTasks;
use crate::config::EnhancerConfig;
use crate::context::bundle::ContextBundle;
use crate::enhancer::types::{AgentRunner, EnhancedRun, EnhancementDecision};
use crate::errors::{ContextError, Result};
use crate::fetch::ContextFetcher;
use crate::llm::{invoke_json, InferenceClient, InferenceRequest, InferenceStage, ModelTier};
use crate::needs::types::{ContextSource, ContextSuggestion, Priority};
use crate::store::LearningStore;
use crate::telemetry::{PipelineEvent, TelemetryCollector};
use crate::types::Task;

const CLASSIFY_INSTRUCTIONS: &str = "You read the latest output of an e-commerce assistant and \
decide whether it is struggling for lack of information: uncertainty, confusion, asking for \
data it should already have, or errors about missing context. Respond with JSON only.";

const QUERY_INSTRUCTIONS: &str = "An e-commerce assistant is missing information for its task. \
Propose up to five short, concrete search queries against its memory and business-rule stores \
that would fill the gap. Do not repeat what it already has. Respond with JSON only.";

const LEARNED_PATTERN_LIMIT: usize = 5;
const MAX_QUERIES: usize = 5;

#[derive(Debug, Deserialize)]
struct RawClassification {
    #[serde(default, alias = "needsEnhancement")]
    needs_enhancement: bool,
    #[serde(default)]
    signals: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RawQueries {
    #[serde(default)]
    queries: Vec<String>,
}

/// Coarse class of an agent error, used to key learned patterns
pub fn classify_error_type(error: Option<&str>) -> String {
    let Some(error) = error else {
        return "uncertain_output".to_string();
    };
    let lower = error.to_lowercase();
    let kind = if lower.contains("context") {
        "missing_context"
    } else if lower.contains("timed out") || lower.contains("timeout") {
        "timeout"
    } else if lower.contains("not found") || lower.contains("no such") || lower.contains("unknown") {
        "not_found"
    } else if lower.contains("permission") || lower.contains("unauthorized") || lower.contains("forbidden") {
        "permission"
    } else if lower.contains("invalid") || lower.contains("validation") {
        "invalid_input"
    } else {
        "general"
    };
    kind.to_string()
}

#[derive(Debug, Clone, Copy)]
struct AttemptCount {
    count: u32,
    last_attempt: Instant,
}

/// Watches repeated attempts and refines the bundle between them
#[derive(Clone)]
pub struct ProgressiveEnhancer {
    client: Arc<dyn InferenceClient>,
    fetcher: ContextFetcher,
    learning: Arc<dyn LearningStore>,
    background: BackgroundTasks,
    config: EnhancerConfig,
    attempts: Arc<RwLock<IndexMap<String, AttemptCount>>>,
    telemetry: TelemetryCollector,
}

impl ProgressiveEnhancer {
    pub fn new(
        client: Arc<dyn InferenceClient>,
        fetcher: ContextFetcher,
        learning: Arc<dyn LearningStore>,
        background: BackgroundTasks,
        config: EnhancerConfig,
        telemetry: TelemetryCollector,
    ) -> Self {
        Self {
            client,
            fetcher,
            learning,
            background,
            config,
            attempts: Arc::new(RwLock::new(IndexMap::new())),
            telemetry,
        }
    }

    /// `conversation:task-prefix` key attempts are counted under
    pub fn attempt_key(&self, task: &Task) -> String {
        format!(
            "{}:{}",
            task.conversation_id.as_deref().unwrap_or("default"),
            task.prefix(self.config.task_prefix_chars)
        )
    }

    /// Count one more attempt at `task`; returns the new total.
    ///
    /// Idle counters are forgotten first, then the least recently touched
    /// ones beyond `max_tracked_tasks`.
    pub async fn record_attempt(&self, task: &Task) -> u32 {
        let key = self.attempt_key(task);
        let ttl = self.config.attempt_ttl();
        let mut attempts = self.attempts.write().await;

        attempts.retain(|_, entry| entry.last_attempt.elapsed() <= ttl);
        let count = attempts.shift_remove(&key).map_or(0, |entry| entry.count) + 1;
        attempts.insert(
            key,
            AttemptCount {
                count,
                last_attempt: Instant::now(),
            },
        );

        while attempts.len() > self.config.max_tracked_tasks.max(1) {
            if let Some((evicted, _)) = attempts.shift_remove_index(0) {
                tracing::debug!(key = %evicted, "evicting least recent attempt counter");
            }
        }
        count
    }

    pub async fn attempts(&self, task: &Task) -> u32 {
        let key = self.attempt_key(task);
        let ttl = self.config.attempt_ttl();
        self.attempts
            .read()
            .await
            .get(&key)
            .filter(|entry| entry.last_attempt.elapsed() <= ttl)
            .map_or(0, |entry| entry.count)
    }

    /// Number of tasks with a live attempt counter
    pub async fn tracked_tasks(&self) -> usize {
        self.attempts.read().await.len()
    }

    pub async fn reset_attempts(&self, task: &Task) {
        let key = self.attempt_key(task);
        self.attempts.write().await.shift_remove(&key);
    }

    /// Decide whether the run needs more context, and which queries to run.
    ///
    /// Triggers after `attempt_threshold` attempts or on an error mentioning
    /// "context". A stored pattern for the same error type skips the
    /// classifier.
    pub async fn should_enhance(
        &self,
        task: &Task,
        agent_output: &str,
        error: Option<&str>,
        bundle: &ContextBundle,
    ) -> EnhancementDecision {
        let attempts = self.attempts(task).await;
        let context_error = error.is_some_and(|e| e.to_lowercase().contains("context"));
        if attempts < self.config.attempt_threshold && !context_error {
            return EnhancementDecision::NotNeeded;
        }

        let error_type = classify_error_type(error);

        match self.check_learned_patterns(&error_type, &task.text).await {
            Ok(queries) if !queries.is_empty() => {
                tracing::info!(%error_type, queries = queries.len(), "reusing learned enhancement pattern");
                return EnhancementDecision::Enhance {
                    queries,
                    error_type,
                    from_learned_pattern: true,
                };
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(error = %e, "learned pattern lookup failed"),
        }

        let needed = match self.classify(task, agent_output, error).await {
            Ok(needed) => needed,
            Err(e) => {
                tracing::warn!(error = %e, "enhancement classifier failed");
                self.telemetry.stage_degraded("enhance", e.to_string());
                context_error
            }
        };
        if !needed {
            tracing::debug!(attempts, "enhancement not needed");
            return EnhancementDecision::NotNeeded;
        }

        let queries = match self.generate_queries(task, agent_output, error, bundle).await {
            Ok(queries) if !queries.is_empty() => queries,
            Ok(_) => vec![task.text.clone()],
            Err(e) => {
                tracing::warn!(error = %e, "enhancement query generation failed, using task text");
                vec![task.text.clone()]
            }
        };

        EnhancementDecision::Enhance {
            queries,
            error_type,
            from_learned_pattern: false,
        }
    }

    /// Queries from stored patterns with the same error type that added context
    pub async fn check_learned_patterns(&self, error_type: &str, task_text: &str) -> Result<Vec<String>> {
        let records = self
            .learning
            .search(task_text, &self.config.pattern_bucket, LEARNED_PATTERN_LIMIT)
            .await?;

        let queries = records
            .iter()
            .filter(|r| r.metadata.get("error_type").and_then(Value::as_str) == Some(error_type))
            .filter(|r| r.metadata.get("added_items").and_then(Value::as_u64).unwrap_or(0) > 0)
            .find_map(|r| {
                let queries: Vec<String> = r
                    .metadata
                    .get("queries")?
                    .as_array()?
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect();
                (!queries.is_empty()).then_some(queries)
            })
            .unwrap_or_default();
        Ok(queries)
    }

    async fn classify(&self, task: &Task, agent_output: &str, error: Option<&str>) -> Result<bool> {
        let input = format!(
            "Task:\n{}\n\nLatest output:\n{}\n\nError:\n{}",
            task.text,
            agent_output,
            error.unwrap_or("none")
        );
        let request = InferenceRequest::new(
            InferenceStage::EnhancementClassification,
            ModelTier::Fast,
            CLASSIFY_INSTRUCTIONS,
            input,
        )
        .with_schema(json!({
            "type": "object",
            "properties": {
                "needsEnhancement": { "type": "boolean" },
                "signals": { "type": "array", "items": { "type": "string" } }
            },
            "required": ["needsEnhancement"]
        }));

        let raw: RawClassification = invoke_json(self.client.as_ref(), request).await?;
        tracing::debug!(needed = raw.needs_enhancement, signals = ?raw.signals, "enhancement classified");
        Ok(raw.needs_enhancement)
    }

    async fn generate_queries(
        &self,
        task: &Task,
        agent_output: &str,
        error: Option<&str>,
        bundle: &ContextBundle,
    ) -> Result<Vec<String>> {
        let input = format!(
            "Task:\n{}\n\nLatest output:\n{}\n\nError:\n{}\n\nContext already provided:\n{}",
            task.text,
            agent_output,
            error.unwrap_or("none"),
            bundle.context_keys().join("\n")
        );
        let request = InferenceRequest::new(
            InferenceStage::EnhancementQueries,
            ModelTier::Standard,
            QUERY_INSTRUCTIONS,
            input,
        )
        .with_schema(json!({
            "type": "object",
            "properties": {
                "queries": { "type": "array", "items": { "type": "string" } }
            },
            "required": ["queries"]
        }));

        let raw: RawQueries = invoke_json(self.client.as_ref(), request).await?;
        let mut queries: Vec<String> = Vec::new();
        for query in raw.queries {
            let query = query.trim().to_string();
            if !query.is_empty() && !queries.contains(&query) {
                queries.push(query);
            }
        }
        queries.truncate(MAX_QUERIES);
        Ok(queries)
    }

    /// Fetch `queries` against memory and rules and merge new items in.
    ///
    /// Additive only: existing items are untouched and the pipeline is not
    /// re-run.
    pub async fn enhance_context(&self, mut bundle: ContextBundle, queries: &[String]) -> ContextBundle {
        let suggestions: Vec<ContextSuggestion> = queries
            .iter()
            .flat_map(|q| {
                [
                    ContextSuggestion::new(
                        format!("Enhancement memory: {}", q),
                        Priority::Helpful,
                        q.clone(),
                        ContextSource::Memory,
                    ),
                    ContextSuggestion::new(
                        format!("Enhancement rules: {}", q),
                        Priority::Helpful,
                        q.clone(),
                        ContextSource::Rules,
                    ),
                ]
            })
            .collect();

        let fetched = self.fetcher.fetch(&suggestions, &bundle.task.user_id).await;
        let added = bundle.merge_context(fetched.context);
        bundle.context_analysis.extend(suggestions);
        tracing::info!(
            queries = queries.len(),
            added = added.len(),
            tokens = bundle.token_count,
            "context enhanced"
        );
        bundle
    }

    /// Store what an enhancement attempt did, in the background
    pub fn persist_pattern(&self, task: &Task, error_type: &str, queries: &[String], added_items: usize) {
        let summary = format!(
            "Enhancement for {}: {} -> {}",
            error_type,
            task.prefix(self.config.task_prefix_chars),
            queries.join("; ")
        );
        let metadata = json!({
            "error_type": error_type,
            "queries": queries,
            "task_prefix": task.prefix(self.config.task_prefix_chars),
            "added_items": added_items,
        });
        let learning = Arc::clone(&self.learning);
        let bucket = self.config.pattern_bucket.clone();
        self.background.spawn("persist_enhancement_pattern", async move {
            learning.add(&summary, &bucket, metadata).await?;
            Ok(())
        });
    }

    /// Run the agent, refining the bundle between failed attempts.
    ///
    /// Each run is bounded by the configured agent timeout. Never fails; the
    /// last output (if any) is returned alongside the final bundle.
    pub async fn run_with_enhancement(
        &self,
        runner: &dyn AgentRunner,
        bundle: ContextBundle,
        max_attempts: u32,
    ) -> EnhancedRun {
        let task = bundle.task.clone();
        let timeout = self.config.agent_timeout();
        let mut run = EnhancedRun {
            output: None,
            bundle,
            attempts: 0,
            enhancements: 0,
            timed_out: false,
        };

        for attempt in 1..=max_attempts.max(1) {
            self.record_attempt(&task).await;
            run.attempts = attempt;

            let (output, error) = match tokio::time::timeout(timeout, runner.run(&run.bundle)).await {
                Ok(Ok(output)) if output.success => {
                    self.reset_attempts(&task).await;
                    run.output = Some(output);
                    return run;
                }
                Ok(Ok(output)) => {
                    let error = output.error.clone();
                    let text = output.output.clone();
                    run.output = Some(output);
                    (text, error)
                }
                Ok(Err(e)) => (String::new(), Some(e.to_string())),
                Err(_) => {
                    run.timed_out = true;
                    let err = ContextError::Timeout {
                        duration_ms: timeout.as_millis() as u64,
                    };
                    tracing::warn!(attempt, error = %err, "agent run timed out");
                    (String::new(), Some(err.to_string()))
                }
            };

            if attempt == max_attempts.max(1) {
                break;
            }

            let decision = self
                .should_enhance(&task, &output, error.as_deref(), &run.bundle)
                .await;
            if let EnhancementDecision::Enhance {
                queries,
                error_type,
                from_learned_pattern,
            } = decision
            {
                let before = run.bundle.fetched_context.len();
                run.bundle = self.enhance_context(run.bundle.clone(), &queries).await;
                let added = run.bundle.fetched_context.len() - before;

                self.persist_pattern(&task, &error_type, &queries, added);
                self.telemetry.record(PipelineEvent::EnhancementTriggered {
                    queries: queries.len(),
                    from_learned_pattern,
                    timestamp: Instant::now(),
                });
                run.enhancements += 1;
            }
        }

        tracing::warn!(attempts = run.attempts, enhancements = run.enhancements, "agent did not succeed");
        run
    }
}
