//! Cheap-tier intent extractor

use std::sync::Arc;

use serde::Deserialize;
use serde_json::json;

use crate::errors::{ContextError, Result};
use crate::intent::types::{EntityRef, ExtractedIntent, IntentFlags, Scope};
use crate::llm::{invoke_json, InferenceClient, InferenceRequest, InferenceStage, ModelTier};

const INSTRUCTIONS: &str = "You extract structured intent from an e-commerce operator's request. \
Be inclusive: list every product, SKU, collection, vendor, customer, order or date the request \
mentions, even when unsure. Identify the primary action as a short snake_case verb phrase \
(for example update_price, search_email, list_products). Scope is `single` for one item, `bulk` \
for many items or whole collections, `query` for read-only questions. Respond with JSON only.";

/// Raw model answer; tolerant of camelCase keys and missing fields
#[derive(Debug, Deserialize)]
struct RawIntent {
    #[serde(default)]
    entities: Vec<RawEntity>,
    #[serde(default)]
    action: String,
    #[serde(default)]
    scope: String,
    #[serde(default, alias = "flags")]
    metadata: RawFlags,
}

#[derive(Debug, Deserialize)]
struct RawEntity {
    #[serde(alias = "type", alias = "entityType")]
    entity_type: String,
    #[serde(default, alias = "value", alias = "id")]
    identifier: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawFlags {
    #[serde(default, alias = "has_pricing")]
    has_pricing: bool,
    #[serde(default, alias = "has_inventory")]
    has_inventory: bool,
    #[serde(default, alias = "has_timeframe")]
    has_timeframe: bool,
    #[serde(default)]
    urgent: bool,
}

/// Turns a task string into an [`ExtractedIntent`]
#[derive(Clone)]
pub struct IntentExtractor {
    client: Arc<dyn InferenceClient>,
}

impl IntentExtractor {
    pub fn new(client: Arc<dyn InferenceClient>) -> Self {
        Self { client }
    }

    /// Extract intent from `task`, optionally seeded with prior context.
    ///
    /// Any inference or decoding failure is reported as
    /// [`ContextError::ExtractionFailed`] carrying the original task.
    pub async fn extract(&self, task: &str, prior_context: Option<&str>) -> Result<ExtractedIntent> {
        let input = match prior_context {
            Some(prior) if !prior.trim().is_empty() => {
                format!("Prior context:\n{}\n\nTask:\n{}", prior, task)
            }
            _ => format!("Task:\n{}", task),
        };

        let request = InferenceRequest::new(
            InferenceStage::IntentExtraction,
            ModelTier::Fast,
            INSTRUCTIONS,
            input,
        )
        .with_schema(Self::schema());

        let raw: RawIntent = invoke_json(self.client.as_ref(), request)
            .await
            .map_err(|e| ContextError::ExtractionFailed {
                task: task.to_string(),
                reason: e.to_string(),
            })?;

        if raw.action.trim().is_empty() {
            return Err(ContextError::ExtractionFailed {
                task: task.to_string(),
                reason: "model returned no action".to_string(),
            });
        }

        Ok(ExtractedIntent {
            entities: raw
                .entities
                .into_iter()
                .filter(|e| !e.entity_type.trim().is_empty())
                .map(|e| EntityRef {
                    entity_type: e.entity_type.trim().to_lowercase(),
                    identifier: e.identifier.filter(|id| !id.trim().is_empty()),
                })
                .collect(),
            action: raw.action.trim().to_string(),
            scope: Scope::parse(&raw.scope),
            flags: IntentFlags {
                has_pricing: raw.metadata.has_pricing,
                has_inventory: raw.metadata.has_inventory,
                has_timeframe: raw.metadata.has_timeframe,
                urgent: raw.metadata.urgent,
            },
            raw_task: task.to_string(),
        })
    }

    fn schema() -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "entities": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "type": { "type": "string" },
                            "identifier": { "type": ["string", "null"] }
                        },
                        "required": ["type"]
                    }
                },
                "action": { "type": "string" },
                "scope": { "type": "string", "enum": ["single", "bulk", "query"] },
                "metadata": {
                    "type": "object",
                    "properties": {
                        "hasPricing": { "type": "boolean" },
                        "hasInventory": { "type": "boolean" },
                        "hasTimeframe": { "type": "boolean" },
                        "urgent": { "type": "boolean" }
                    }
                }
            },
            "required": ["entities", "action", "scope"]
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ScriptedInference;
    use std::collections::HashMap;

    fn extractor(client: ScriptedInference) -> IntentExtractor {
        IntentExtractor::new(Arc::new(client))
    }

    #[tokio::test]
    async fn test_extracts_single_price_update() {
        let client = ScriptedInference::new().respond(
            InferenceStage::IntentExtraction,
            json!({
                "entities": [{ "type": "Product", "identifier": "ABC-123" }],
                "action": "update_price",
                "scope": "single",
                "metadata": { "hasPricing": true }
            }),
        );

        let intent = extractor(client)
            .extract("Update price for SKU ABC-123 to $49.99", None)
            .await
            .unwrap();

        assert_eq!(intent.scope, Scope::Single);
        assert!(intent.action.contains("price"));
        assert_eq!(intent.entities[0].entity_type, "product");
        assert_eq!(intent.identifiers(), vec!["ABC-123".to_string()]);
        assert!(intent.flags.has_pricing);
        assert!(!intent.flags.urgent);
    }

    #[tokio::test]
    async fn test_inference_error_preserves_task() {
        let client = ScriptedInference::new().fail(InferenceStage::IntentExtraction, "timeout");
        let err = extractor(client).extract("Find unmatched SKUs", None).await.unwrap_err();

        match err {
            ContextError::ExtractionFailed { task, .. } => assert_eq!(task, "Find unmatched SKUs"),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_missing_action_is_failure() {
        let client = ScriptedInference::new()
            .respond(InferenceStage::IntentExtraction, json!({ "entities": [], "scope": "bulk" }));
        let result = extractor(client).extract("do the thing", None).await;
        assert!(matches!(result, Err(ContextError::ExtractionFailed { .. })));
    }

    #[tokio::test]
    async fn test_prior_context_is_forwarded() {
        let client = ScriptedInference::new().respond(
            InferenceStage::IntentExtraction,
            json!({ "entities": [], "action": "list_products", "scope": "query" }),
        );
        let ex = extractor(client.clone());
        ex.extract("and the grinders?", Some("We were talking about Eureka")).await.unwrap();

        let calls = client.calls();
        assert_eq!(calls[0].tier, ModelTier::Fast);
        assert!(calls[0].input.contains("Eureka"));
        assert!(calls[0].output_schema.is_some());
    }

    #[tokio::test]
    async fn test_repeated_extraction_agrees_by_majority() {
        let task = "Re-price all 500 grinders in the Eureka collection";
        let replies = [
            json!({ "entities": [{ "type": "collection", "identifier": "Eureka" }], "action": "update_price", "scope": "bulk" }),
            json!({ "entities": [], "action": "Update_Price", "scope": "Bulk" }),
            json!({ "entities": [], "action": " update_price ", "scope": "batch" }),
            json!({ "entities": [], "action": "update_price", "scope": "single" }),
            json!({ "entities": [], "action": "update_price", "scope": "bulk" }),
        ];
        let client = replies
            .into_iter()
            .fold(ScriptedInference::new(), |client, reply| {
                client.enqueue(InferenceStage::IntentExtraction, reply)
            });
        let ex = extractor(client);

        let mut votes: HashMap<(Scope, String), usize> = HashMap::new();
        for _ in 0..5 {
            let intent = ex.extract(task, None).await.unwrap();
            *votes.entry((intent.scope, intent.action.to_lowercase())).or_default() += 1;
        }

        let (winner, count) = votes.into_iter().max_by_key(|(_, n)| *n).unwrap();
        assert_eq!(winner, (Scope::Bulk, "update_price".to_string()));
        assert!(count >= 4);
    }
}
