//! Inference primitive
//!
//! Every pipeline stage talks to a model through [`InferenceClient`]. The
//! engine never assumes a provider; it only asks for a tier, hands over
//! instructions plus input, and optionally a JSON schema for the answer.

pub mod ollama;
pub mod scripted;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::{ContextError, Result};

pub use ollama::OllamaInference;
pub use scripted::ScriptedInference;

/// Cost/latency tier of the model used for a call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelTier {
    /// Cheapest tier: intent extraction and learning classification
    Fast,
    /// Analysis, relevance filtering and summarization
    Standard,
}

/// Pipeline stage issuing an inference call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InferenceStage {
    IntentExtraction,
    NeedAnalysis,
    RelevanceFilter,
    ChunkSummary,
    SummaryCombine,
    OperationAnalysis,
    EnhancementClassification,
    EnhancementQueries,
}

impl InferenceStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            InferenceStage::IntentExtraction => "intent_extraction",
            InferenceStage::NeedAnalysis => "need_analysis",
            InferenceStage::RelevanceFilter => "relevance_filter",
            InferenceStage::ChunkSummary => "chunk_summary",
            InferenceStage::SummaryCombine => "summary_combine",
            InferenceStage::OperationAnalysis => "operation_analysis",
            InferenceStage::EnhancementClassification => "enhancement_classification",
            InferenceStage::EnhancementQueries => "enhancement_queries",
        }
    }
}

/// One inference call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceRequest {
    pub stage: InferenceStage,
    pub tier: ModelTier,
    /// System-level instructions
    pub instructions: String,
    /// User-level input
    pub input: String,
    /// JSON schema the answer should follow, if structured output is wanted
    pub output_schema: Option<Value>,
    pub max_turns: u32,
}

impl InferenceRequest {
    pub fn new(
        stage: InferenceStage,
        tier: ModelTier,
        instructions: impl Into<String>,
        input: impl Into<String>,
    ) -> Self {
        Self {
            stage,
            tier,
            instructions: instructions.into(),
            input: input.into(),
            output_schema: None,
            max_turns: 1,
        }
    }

    pub fn with_schema(mut self, schema: Value) -> Self {
        self.output_schema = Some(schema);
        self
    }
}

/// What a backend returned
#[derive(Debug, Clone, PartialEq)]
pub enum InferenceOutput {
    Structured(Value),
    Text(String),
}

/// Inference backend
#[async_trait]
pub trait InferenceClient: Send + Sync {
    async fn invoke(&self, request: InferenceRequest) -> Result<InferenceOutput>;
}

/// Invoke and decode the answer as `T`.
///
/// Text answers are searched for a JSON object, so models that wrap their
/// answer in prose or a fenced block still decode.
pub async fn invoke_json<T: DeserializeOwned>(
    client: &dyn InferenceClient,
    request: InferenceRequest,
) -> Result<T> {
    let stage = request.stage;
    let value = match client.invoke(request).await? {
        InferenceOutput::Structured(value) => value,
        InferenceOutput::Text(text) => extract_json(&text).ok_or_else(|| {
            ContextError::InvalidModelOutput(format!(
                "{}: no JSON object in response",
                stage.as_str()
            ))
        })?,
    };

    serde_json::from_value(value).map_err(|e| {
        ContextError::InvalidModelOutput(format!("{}: {}", stage.as_str(), e))
    })
}

/// Pull the first JSON object out of free text
pub fn extract_json(text: &str) -> Option<Value> {
    let trimmed = text.trim();
    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        if value.is_object() || value.is_array() {
            return Some(value);
        }
    }

    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&trimmed[start..=end]).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_extract_plain_json() {
        let value = extract_json(r#"{"scope": "bulk"}"#).unwrap();
        assert_eq!(value["scope"], "bulk");
    }

    #[test]
    fn test_extract_fenced_json() {
        let text = "Here you go:\n```json\n{\"action\": \"update_price\"}\n```";
        let value = extract_json(text).unwrap();
        assert_eq!(value["action"], "update_price");
    }

    #[test]
    fn test_extract_no_json() {
        assert!(extract_json("I could not decide.").is_none());
        assert!(extract_json("} backwards {").is_none());
    }

    #[derive(Debug, Deserialize)]
    struct Answer {
        ok: bool,
    }

    #[tokio::test]
    async fn test_invoke_json_from_text() {
        let client = ScriptedInference::new()
            .respond_text(InferenceStage::NeedAnalysis, "sure: {\"ok\": true}");
        let request = InferenceRequest::new(
            InferenceStage::NeedAnalysis,
            ModelTier::Standard,
            "instructions",
            "input",
        );
        let answer: Answer = invoke_json(&client, request).await.unwrap();
        assert!(answer.ok);
    }

    #[tokio::test]
    async fn test_invoke_json_shape_mismatch() {
        let client = ScriptedInference::new()
            .respond(InferenceStage::NeedAnalysis, json!({ "unexpected": 1 }));
        let request = InferenceRequest::new(
            InferenceStage::NeedAnalysis,
            ModelTier::Standard,
            "instructions",
            "input",
        );
        let result: Result<Answer> = invoke_json(&client, request).await;
        assert!(matches!(result, Err(ContextError::InvalidModelOutput(_))));
    }
}
