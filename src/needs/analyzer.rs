//! Standard-tier context need analyzer

use std::sync::Arc;

use serde::Deserialize;
use serde_json::json;

use crate::errors::{ContextError, Result};
use crate::feedback::types::FeedbackInsights;
use crate::intent::ExtractedIntent;
use crate::llm::{invoke_json, InferenceClient, InferenceRequest, InferenceStage, ModelTier};
use crate::needs::types::{ContextSource, ContextSuggestion, Priority};
use crate::store::similarity::loosely_matches;

/// Key of the injected memory suggestion
pub const DIRECT_MEMORY_KEY: &str = "Direct memory search for task";

/// Key of the injected rules suggestion
pub const DIRECT_RULES_KEY: &str = "Direct rules search for task";

const INSTRUCTIONS: &str = "You decide what background information an e-commerce assistant needs \
before acting on a task. Propose a prioritized list of searches. For each give a short \
description, a priority (critical, helpful, optional), a concrete search query, and a source: \
`memory` (facts remembered about this user and store), `rules` (business rules, tool notes, \
workflows), `products`, `history` or `external`. Only mark something critical if the task \
cannot be done correctly without it. Respond with JSON only.";

/// Inputs that bias the analysis
#[derive(Debug, Clone, Default)]
pub struct AnalysisHints {
    pub prior_recommendations: Option<FeedbackInsights>,
    pub recent_errors: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RawAnalysis {
    #[serde(default)]
    suggestions: Vec<RawSuggestion>,
    #[serde(default)]
    reasoning: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawSuggestion {
    description: String,
    #[serde(default)]
    priority: String,
    #[serde(default, alias = "searchQuery")]
    search_query: String,
    #[serde(default)]
    source: String,
}

/// Proposes context queries for a task
#[derive(Clone)]
pub struct ContextNeedAnalyzer {
    client: Arc<dyn InferenceClient>,
}

impl ContextNeedAnalyzer {
    pub fn new(client: Arc<dyn InferenceClient>) -> Self {
        Self { client }
    }

    /// Propose an ordered suggestion list for `task`.
    ///
    /// The list always contains critical memory and rules searches for the
    /// raw task text, and is sorted critical first. Fails with
    /// [`ContextError::AnalysisFailed`] when the model cannot be used.
    pub async fn analyze(
        &self,
        task: &str,
        intent: Option<&ExtractedIntent>,
        hints: &AnalysisHints,
    ) -> Result<Vec<ContextSuggestion>> {
        let request = InferenceRequest::new(
            InferenceStage::NeedAnalysis,
            ModelTier::Standard,
            INSTRUCTIONS,
            Self::build_input(task, intent, hints),
        )
        .with_schema(Self::schema());

        let raw: RawAnalysis = invoke_json(self.client.as_ref(), request)
            .await
            .map_err(|e| ContextError::AnalysisFailed(e.to_string()))?;

        if let Some(reasoning) = &raw.reasoning {
            tracing::debug!(%reasoning, "need analysis reasoning");
        }

        let mut suggestions: Vec<ContextSuggestion> = raw
            .suggestions
            .into_iter()
            .filter_map(|s| {
                let Some(source) = ContextSource::parse(&s.source) else {
                    tracing::warn!(
                        source = %s.source,
                        description = %s.description,
                        "dropping suggestion with unknown source"
                    );
                    return None;
                };
                let search_query = if s.search_query.trim().is_empty() {
                    s.description.clone()
                } else {
                    s.search_query
                };
                Some(ContextSuggestion::new(
                    s.description.trim(),
                    Priority::parse(&s.priority),
                    search_query,
                    source,
                ))
            })
            .filter(|s| !s.description.is_empty())
            .collect();

        if let Some(insights) = &hints.prior_recommendations {
            apply_recommendations(&mut suggestions, insights);
        }
        inject_direct_suggestions(&mut suggestions, task);
        suggestions.sort_by_key(|s| s.priority);

        tracing::debug!(count = suggestions.len(), "context needs analyzed");
        Ok(suggestions)
    }

    fn build_input(task: &str, intent: Option<&ExtractedIntent>, hints: &AnalysisHints) -> String {
        let mut input = format!("Task:\n{}\n", task);

        if let Some(intent) = intent {
            if let Ok(intent_json) = serde_json::to_string(intent) {
                input.push_str(&format!("\nExtracted intent:\n{}\n", intent_json));
            }
        }

        if let Some(insights) = &hints.prior_recommendations {
            if !insights.prioritize.is_empty() {
                input.push_str(&format!(
                    "\nContext that helped on similar tasks: {}\n",
                    insights.prioritize.join("; ")
                ));
            }
            if !insights.avoid.is_empty() {
                input.push_str(&format!(
                    "\nContext that went unused on similar tasks: {}\n",
                    insights.avoid.join("; ")
                ));
            }
            if !insights.missing_context.is_empty() {
                input.push_str(&format!(
                    "\nContext that was missing on similar tasks: {}\n",
                    insights.missing_context.join("; ")
                ));
            }
        }

        if !hints.recent_errors.is_empty() {
            input.push_str(&format!("\nRecent errors:\n- {}\n", hints.recent_errors.join("\n- ")));
        }

        input
    }

    fn schema() -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "suggestions": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "description": { "type": "string" },
                            "priority": { "type": "string", "enum": ["critical", "helpful", "optional"] },
                            "searchQuery": { "type": "string" },
                            "source": { "type": "string", "enum": ["memory", "rules", "products", "history", "external"] }
                        },
                        "required": ["description", "priority", "searchQuery", "source"]
                    }
                },
                "reasoning": { "type": "string" }
            },
            "required": ["suggestions"]
        })
    }
}

/// Re-prioritize suggestions from learned usage.
///
/// A description matching a "prioritize" pattern becomes critical; one
/// matching only an "avoid" pattern becomes optional.
pub fn apply_recommendations(suggestions: &mut [ContextSuggestion], insights: &FeedbackInsights) {
    for suggestion in suggestions.iter_mut() {
        let preferred = insights
            .prioritize
            .iter()
            .any(|pattern| loosely_matches(&suggestion.description, pattern));
        let avoided = insights
            .avoid
            .iter()
            .any(|pattern| loosely_matches(&suggestion.description, pattern));

        if preferred {
            suggestion.priority = Priority::Critical;
        } else if avoided {
            suggestion.priority = Priority::Optional;
        }
    }
}

/// Guarantee critical memory and rules searches on the raw task text
pub fn inject_direct_suggestions(suggestions: &mut Vec<ContextSuggestion>, task: &str) {
    let direct = [
        (ContextSource::Memory, DIRECT_MEMORY_KEY),
        (ContextSource::Rules, DIRECT_RULES_KEY),
    ];

    for (index, (source, key)) in direct.into_iter().enumerate() {
        let present = suggestions.iter().any(|s| {
            s.source == source && s.priority.is_critical() && s.search_query.trim() == task.trim()
        });
        if !present {
            let at = index.min(suggestions.len());
            suggestions.insert(at, ContextSuggestion::new(key, Priority::Critical, task, source));
        }
    }
}
