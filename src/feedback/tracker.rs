//! Operation tracking and post-hoc context analysis

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use indexmap::IndexMap;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::RwLock;

use crate::background::BackgroundTasks;
use crate::config::FeedbackConfig;
use crate::context::bundle::ContextBundle;
use crate::errors::Result;
use crate::feedback::pruning::{self, PruneTrigger};
use crate::feedback::types::{
    FeedbackInsights, InitialContextSummary, OperationAnalysis, OperationId, OperationRecord,
    OperationStatus, PruneAction, PruningRecommendation, ToolUsage,
};
use crate::llm::{invoke_json, InferenceClient, InferenceRequest, InferenceStage, ModelTier};
use crate::store::{age_cutoff, KeyOutcome, LearningStore, UsageStatsRepository};
use crate::telemetry::{PipelineEvent, TelemetryCollector};

const INSTRUCTIONS: &str = "You review how an e-commerce assistant used the background \
information it was given. From the tool calls and errors, decide which context keys were \
actually useful, which were fetched but unused, and what information was missing. Score \
efficiency from 0 to 1 as the share of provided context that was used. Use context keys \
exactly as given. Respond with JSON only.";

#[derive(Debug, Deserialize)]
struct RawAnalysis {
    #[serde(default, alias = "usefulContext")]
    useful_context: Vec<String>,
    #[serde(default, alias = "unusedContext")]
    unused_context: Vec<String>,
    #[serde(default, alias = "missingContext")]
    missing_context: Vec<String>,
    #[serde(default)]
    efficiency: f64,
    #[serde(default)]
    recommendations: Vec<String>,
}

/// What [`ContextFeedbackLoop::clear_old_history`] removed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HistoryCleanup {
    pub operations: usize,
    pub usage_keys: usize,
}

/// Learns which context keys are worth fetching
#[derive(Clone)]
pub struct ContextFeedbackLoop {
    client: Arc<dyn InferenceClient>,
    learning: Arc<dyn LearningStore>,
    usage: Arc<dyn UsageStatsRepository>,
    operations: Arc<RwLock<IndexMap<OperationId, OperationRecord>>>,
    latest_pruning: Arc<RwLock<Vec<PruningRecommendation>>>,
    completed: Arc<AtomicU64>,
    trigger: PruneTrigger,
    config: FeedbackConfig,
    background: BackgroundTasks,
    telemetry: TelemetryCollector,
}

impl ContextFeedbackLoop {
    pub fn new(
        client: Arc<dyn InferenceClient>,
        learning: Arc<dyn LearningStore>,
        usage: Arc<dyn UsageStatsRepository>,
        config: FeedbackConfig,
        background: BackgroundTasks,
        telemetry: TelemetryCollector,
    ) -> Self {
        Self {
            client,
            learning,
            usage,
            operations: Arc::new(RwLock::new(IndexMap::new())),
            latest_pruning: Arc::new(RwLock::new(Vec::new())),
            completed: Arc::new(AtomicU64::new(0)),
            trigger: PruneTrigger::from_config(&config),
            config,
            background,
            telemetry,
        }
    }

    /// Override the pruning trigger
    pub fn with_trigger(mut self, trigger: PruneTrigger) -> Self {
        self.trigger = trigger;
        self
    }

    pub fn trigger(&self) -> PruneTrigger {
        self.trigger
    }

    pub fn usage_stats(&self) -> Arc<dyn UsageStatsRepository> {
        Arc::clone(&self.usage)
    }

    /// Begin tracking a run that uses `bundle`
    pub async fn start_operation(&self, task: &str, bundle: &ContextBundle) -> OperationId {
        let id = uuid::Uuid::new_v4();
        let context_keys = bundle.context_keys();
        let record = OperationRecord {
            id,
            task: task.to_string(),
            start_time: Utc::now(),
            initial_context_summary: InitialContextSummary {
                context_keys: context_keys.clone(),
                token_count: bundle.token_count,
                truncated: bundle.truncated,
                had_conversation_summary: bundle.conversation_summary.is_some(),
            },
            context_keys,
            tool_usage: Vec::new(),
            errors: Vec::new(),
            status: OperationStatus::InProgress,
        };

        let mut operations = self.operations.write().await;
        operations.insert(id, record);
        while operations.len() > self.config.max_tracked_operations.max(1) {
            if let Some((evicted, _)) = operations.shift_remove_index(0) {
                tracing::debug!(operation = %evicted, "evicting oldest tracked operation");
            }
        }

        tracing::debug!(operation = %id, "operation started");
        id
    }

    /// Append a tool call; returns false for an unknown operation
    pub async fn track_tool_usage(
        &self,
        id: OperationId,
        tool: &str,
        args: Value,
        result_summary: Option<String>,
    ) -> bool {
        let mut operations = self.operations.write().await;
        match operations.get_mut(&id) {
            Some(record) => {
                record.tool_usage.push(ToolUsage {
                    tool: tool.to_string(),
                    args,
                    result_summary,
                    timestamp: Utc::now(),
                });
                true
            }
            None => {
                tracing::debug!(operation = %id, tool, "tool usage for unknown operation ignored");
                false
            }
        }
    }

    /// Append an error; returns false for an unknown operation
    pub async fn track_error(&self, id: OperationId, error: &str) -> bool {
        let mut operations = self.operations.write().await;
        match operations.get_mut(&id) {
            Some(record) => {
                record.errors.push(error.to_string());
                true
            }
            None => {
                tracing::debug!(operation = %id, "error for unknown operation ignored");
                false
            }
        }
    }

    /// Snapshot of a tracked operation
    pub async fn operation(&self, id: OperationId) -> Option<OperationRecord> {
        self.operations.read().await.get(&id).cloned()
    }

    pub async fn active_operations(&self) -> usize {
        self.operations.read().await.len()
    }

    /// Finish an operation and learn from it.
    ///
    /// Returns `None` for an unknown or already completed id.
    pub async fn complete_operation(&self, id: OperationId, status: OperationStatus) -> Option<OperationAnalysis> {
        let mut record = self.operations.write().await.shift_remove(&id)?;
        record.status = status;

        let analysis = match self.analyze(&record).await {
            Ok(analysis) => analysis,
            Err(e) => {
                tracing::warn!(operation = %id, error = %e, "operation analysis failed, using heuristic");
                self.telemetry.stage_degraded("feedback", e.to_string());
                heuristic_analysis(&record)
            }
        };

        for key in &analysis.useful_context {
            if let Err(e) = self.usage.record(key, KeyOutcome::Useful).await {
                tracing::warn!(%key, error = %e, "failed to record usage");
            }
        }
        for key in &analysis.unused_context {
            if let Err(e) = self.usage.record(key, KeyOutcome::Unused).await {
                tracing::warn!(%key, error = %e, "failed to record usage");
            }
        }

        self.telemetry.record(PipelineEvent::FeedbackRecorded {
            efficiency: analysis.efficiency,
            timestamp: Instant::now(),
        });
        tracing::info!(
            operation = %id,
            efficiency = analysis.efficiency,
            useful = analysis.useful_context.len(),
            unused = analysis.unused_context.len(),
            missing = analysis.missing_context.len(),
            heuristic = analysis.heuristic,
            "operation analyzed"
        );

        self.persist(&record, &analysis);

        let completed = self.completed.fetch_add(1, Ordering::SeqCst) + 1;
        if self.trigger.fires(completed) {
            if let Err(e) = self.evaluate_pruning().await {
                tracing::warn!(error = %e, "pruning evaluation failed");
            }
        }

        Some(analysis)
    }

    async fn analyze(&self, record: &OperationRecord) -> Result<OperationAnalysis> {
        let tools: Vec<Value> = record
            .tool_usage
            .iter()
            .map(|t| json!({ "tool": t.tool, "args": t.args, "result": t.result_summary }))
            .collect();
        let input = json!({
            "task": record.task,
            "contextKeys": record.context_keys,
            "tokenCount": record.initial_context_summary.token_count,
            "toolUsage": tools,
            "errors": record.errors,
            "status": record.status,
        });

        let request = InferenceRequest::new(
            InferenceStage::OperationAnalysis,
            ModelTier::Fast,
            INSTRUCTIONS,
            serde_json::to_string_pretty(&input)?,
        )
        .with_schema(Self::schema());

        let raw: RawAnalysis = invoke_json(self.client.as_ref(), request).await?;
        let efficiency = if raw.efficiency.is_finite() {
            raw.efficiency.clamp(0.0, 1.0)
        } else {
            0.0
        };

        Ok(OperationAnalysis {
            useful_context: dedup(raw.useful_context),
            unused_context: dedup(raw.unused_context),
            missing_context: dedup(raw.missing_context),
            efficiency,
            recommendations: raw.recommendations,
            heuristic: false,
        })
    }

    fn persist(&self, record: &OperationRecord, analysis: &OperationAnalysis) {
        let summary = format!(
            "Task: {}\nUseful context: {}\nUnused context: {}\nMissing context: {}\nEfficiency: {:.2}",
            record.task,
            analysis.useful_context.join(", "),
            analysis.unused_context.join(", "),
            analysis.missing_context.join(", "),
            analysis.efficiency,
        );
        let metadata = json!({
            "operation_id": record.id,
            "task": record.task,
            "status": record.status,
            "useful_context": analysis.useful_context,
            "unused_context": analysis.unused_context,
            "missing_context": analysis.missing_context,
            "efficiency": analysis.efficiency,
            "recommendations": analysis.recommendations,
            "tool_count": record.tool_usage.len(),
            "error_count": record.errors.len(),
        });

        let learning = Arc::clone(&self.learning);
        let bucket = self.config.learning_bucket.clone();
        self.background.spawn("persist_operation_analysis", async move {
            learning.add(&summary, &bucket, metadata).await?;
            Ok(())
        });
    }

    /// Evaluate usage tallies and keep the result for recommendations
    pub async fn evaluate_pruning(&self) -> Result<Vec<PruningRecommendation>> {
        let snapshot = self.usage.snapshot().await?;
        let recommendations = pruning::evaluate(&snapshot, self.config.prune_min_observations);

        for rec in &recommendations {
            tracing::info!(
                key = %rec.key,
                action = ?rec.action,
                useful = rec.useful,
                unused = rec.unused,
                "pruning recommendation"
            );
        }

        *self.latest_pruning.write().await = recommendations.clone();
        Ok(recommendations)
    }

    /// Latest pruning output
    pub async fn pruning_recommendations(&self) -> Vec<PruningRecommendation> {
        self.latest_pruning.read().await.clone()
    }

    /// Aggregate what similar past tasks learned
    pub async fn get_recommendations(&self, task: &str) -> Result<FeedbackInsights> {
        let records = self
            .learning
            .search(task, &self.config.learning_bucket, self.config.similar_task_limit)
            .await?;

        let mut useful: IndexMap<String, usize> = IndexMap::new();
        let mut unused: HashMap<String, usize> = HashMap::new();
        let mut missing: Vec<String> = Vec::new();
        let mut efficiencies: Vec<f64> = Vec::new();

        for record in &records {
            for key in string_list(&record.metadata, "useful_context") {
                *useful.entry(key).or_default() += 1;
            }
            for key in string_list(&record.metadata, "unused_context") {
                *unused.entry(key).or_default() += 1;
            }
            for key in string_list(&record.metadata, "missing_context") {
                if !missing.contains(&key) {
                    missing.push(key);
                }
            }
            if let Some(efficiency) = record.metadata.get("efficiency").and_then(Value::as_f64) {
                efficiencies.push(efficiency);
            }
        }

        useful.sort_by(|_, a, _, b| b.cmp(a));
        let mut prioritize: Vec<String> = useful.keys().cloned().collect();

        let mut avoid: Vec<String> = unused
            .iter()
            .filter(|(key, count)| **count > useful.get(*key).copied().unwrap_or(0))
            .map(|(key, _)| key.clone())
            .collect();
        avoid.sort();
        prioritize.retain(|key| !avoid.contains(key));

        for rec in self.latest_pruning.read().await.iter() {
            match rec.action {
                PruneAction::Prioritize => {
                    avoid.retain(|key| key != &rec.key);
                    if !prioritize.contains(&rec.key) {
                        prioritize.push(rec.key.clone());
                    }
                }
                PruneAction::Remove => {
                    if !prioritize.contains(&rec.key) && !avoid.contains(&rec.key) {
                        avoid.push(rec.key.clone());
                    }
                }
            }
        }

        let average_efficiency = if efficiencies.is_empty() {
            None
        } else {
            Some(efficiencies.iter().sum::<f64>() / efficiencies.len() as f64)
        };

        Ok(FeedbackInsights {
            similar_tasks: records.len(),
            prioritize,
            avoid,
            missing_context: missing,
            average_efficiency,
        })
    }

    /// Drop in-flight operations and usage tallies older than `max_age`.
    ///
    /// A `max_age` beyond the representable time range clears nothing.
    pub async fn clear_old_history(&self, max_age: Duration) -> Result<HistoryCleanup> {
        let operations = match age_cutoff(max_age) {
            Some(cutoff) => {
                let mut ops = self.operations.write().await;
                let before = ops.len();
                ops.retain(|_, record| record.start_time >= cutoff);
                before - ops.len()
            }
            None => 0,
        };
        let usage_keys = self.usage.evict_older_than(max_age).await?;

        tracing::info!(operations, usage_keys, "old feedback history cleared");
        Ok(HistoryCleanup {
            operations,
            usage_keys,
        })
    }

    fn schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "usefulContext": { "type": "array", "items": { "type": "string" } },
                "unusedContext": { "type": "array", "items": { "type": "string" } },
                "missingContext": { "type": "array", "items": { "type": "string" } },
                "efficiency": { "type": "number", "minimum": 0, "maximum": 1 },
                "recommendations": { "type": "array", "items": { "type": "string" } }
            },
            "required": ["usefulContext", "unusedContext", "efficiency"]
        })
    }
}

/// Keyword fallback when the analysis call fails.
///
/// A key is useful when a tool call or error mentions it.
pub fn heuristic_analysis(record: &OperationRecord) -> OperationAnalysis {
    let haystack: Vec<String> = record
        .tool_usage
        .iter()
        .map(|t| {
            format!(
                "{} {} {}",
                t.tool,
                t.args,
                t.result_summary.as_deref().unwrap_or_default()
            )
            .to_lowercase()
        })
        .chain(record.errors.iter().map(|e| e.to_lowercase()))
        .collect();

    let (useful, unused): (Vec<String>, Vec<String>) = record
        .context_keys
        .iter()
        .cloned()
        .partition(|key| {
            let needle = key.to_lowercase();
            haystack.iter().any(|text| text.contains(&needle))
        });

    let efficiency = if record.context_keys.is_empty() {
        1.0
    } else {
        useful.len() as f64 / record.context_keys.len() as f64
    };

    let recommendations = if unused.is_empty() {
        Vec::new()
    } else {
        vec![format!("Consider deprioritizing: {}", unused.join(", "))]
    };

    OperationAnalysis {
        useful_context: useful,
        unused_context: unused,
        missing_context: Vec::new(),
        efficiency,
        recommendations,
        heuristic: true,
    }
}

fn dedup(items: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(items.len());
    for item in items {
        let item = item.trim().to_string();
        if !item.is_empty() && !out.contains(&item) {
            out.push(item);
        }
    }
    out
}

fn string_list(metadata: &Value, field: &str) -> Vec<String> {
    metadata
        .get(field)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}
