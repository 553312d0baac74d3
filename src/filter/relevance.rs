//! Second-pass relevance filter over fetched context

use std::sync::Arc;
use std::time::Instant;

use serde::Deserialize;
use serde_json::json;

use crate::config::FilterConfig;
use crate::errors::{ContextError, Result};
use crate::fetch::types::ContextMap;
use crate::llm::{invoke_json, InferenceClient, InferenceRequest, InferenceStage, ModelTier};
use crate::needs::types::Priority;
use crate::telemetry::TelemetryCollector;

const INSTRUCTIONS: &str = "You review background information gathered for an e-commerce \
assistant. For every item decide whether it is genuinely needed to complete THIS task, not \
merely keyword-related. Example: product documentation is irrelevant to a task about searching \
email even if both mention \"product\". You may raise or lower an item's priority \
(critical, helpful, optional). Return one decision per item, most useful first, using the item \
key exactly as given. Respond with JSON only.";

/// One judgement returned by the model
#[derive(Debug, Clone, Deserialize)]
pub struct RelevanceDecision {
    pub key: String,
    pub relevant: bool,
    #[serde(default)]
    pub priority: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawDecisions {
    #[serde(default, alias = "items", alias = "results")]
    decisions: Vec<RelevanceDecision>,
}

/// Drops fetched items that do not help the task
#[derive(Clone)]
pub struct RelevanceFilter {
    client: Arc<dyn InferenceClient>,
    config: FilterConfig,
    telemetry: TelemetryCollector,
}

impl RelevanceFilter {
    pub fn new(client: Arc<dyn InferenceClient>, config: FilterConfig, telemetry: TelemetryCollector) -> Self {
        Self {
            client,
            config,
            telemetry,
        }
    }

    /// Filter `context` for `task` within `max_tokens`.
    ///
    /// Items are admitted in the order the model ranks them; admission stops
    /// at the first relevant item that would overflow the budget. If the
    /// model call fails the input comes back unchanged.
    pub async fn filter(&self, task: &str, context: &ContextMap, max_tokens: usize) -> ContextMap {
        if context.is_empty() {
            return ContextMap::new();
        }

        let started = Instant::now();
        match self.judge(task, context).await {
            Ok(decisions) => {
                let filtered = apply_decisions(context, &decisions, max_tokens);
                tracing::debug!(
                    before = context.len(),
                    after = filtered.len(),
                    "relevance filter applied"
                );
                self.telemetry.stage_completed("filter", started);
                filtered
            }
            Err(e) => {
                tracing::warn!(error = %e, "relevance filter failed, passing context through");
                self.telemetry.stage_degraded("filter", e.to_string());
                context.clone()
            }
        }
    }

    /// Ask the model for per-item decisions
    pub async fn judge(&self, task: &str, context: &ContextMap) -> Result<Vec<RelevanceDecision>> {
        let request = InferenceRequest::new(
            InferenceStage::RelevanceFilter,
            ModelTier::Standard,
            INSTRUCTIONS,
            self.build_input(task, context),
        )
        .with_schema(Self::schema());

        let raw: RawDecisions = invoke_json(self.client.as_ref(), request)
            .await
            .map_err(|e| ContextError::FilterFailed(e.to_string()))?;
        Ok(raw.decisions)
    }

    fn build_input(&self, task: &str, context: &ContextMap) -> String {
        let items: Vec<serde_json::Value> = context
            .iter()
            .map(|(key, item)| {
                let samples: Vec<String> = item
                    .results
                    .iter()
                    .take(self.config.samples_per_item)
                    .map(|hit| snippet(&hit.content, self.config.snippet_chars))
                    .collect();
                json!({
                    "key": key,
                    "source": item.source.as_str(),
                    "priority": item.priority.as_str(),
                    "samples": samples,
                })
            })
            .collect();

        format!(
            "Task:\n{}\n\nItems:\n{}",
            task,
            serde_json::to_string_pretty(&items).unwrap_or_default()
        )
    }

    fn schema() -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "decisions": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "key": { "type": "string" },
                            "relevant": { "type": "boolean" },
                            "priority": { "type": "string", "enum": ["critical", "helpful", "optional"] },
                            "reason": { "type": "string" }
                        },
                        "required": ["key", "relevant"]
                    }
                }
            },
            "required": ["decisions"]
        })
    }
}

/// Greedy admission of relevant items in decision order.
///
/// Items whose final priority is critical are always admitted. The first
/// non-critical item that would overflow `max_tokens` closes admission for
/// every later non-critical item.
pub fn apply_decisions(context: &ContextMap, decisions: &[RelevanceDecision], max_tokens: usize) -> ContextMap {
    let mut filtered = ContextMap::new();
    let mut used = 0usize;
    let mut capped = false;

    for decision in decisions {
        if !decision.relevant {
            tracing::debug!(key = %decision.key, reason = ?decision.reason, "dropped as irrelevant");
            continue;
        }
        let Some(item) = context.get(&decision.key) else {
            tracing::debug!(key = %decision.key, "decision for unknown key ignored");
            continue;
        };
        if filtered.contains_key(&decision.key) {
            continue;
        }

        let mut item = item.clone();
        if let Some(priority) = &decision.priority {
            item.priority = Priority::parse(priority);
        }

        if !item.is_critical() {
            if capped {
                continue;
            }
            if used + item.token_count > max_tokens {
                tracing::debug!(key = %decision.key, used, max_tokens, "budget reached in relevance filter");
                capped = true;
                continue;
            }
        }

        used += item.token_count;
        filtered.insert(decision.key.clone(), item);
    }

    filtered
}

fn snippet(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let cut: String = text.chars().take(max_chars).collect();
        format!("{}...", cut)
    }
}
