//! Ollama chat backend
//!
//! Non-streaming `POST /api/chat` with JSON-mode output. The fast and
//! standard tiers map to two configured model names.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::InferenceConfig;
use crate::errors::{ContextError, Result};
use crate::llm::{extract_json, InferenceClient, InferenceOutput, InferenceRequest, ModelTier};

/// Inference client backed by an Ollama server
#[derive(Debug, Clone)]
pub struct OllamaInference {
    client: Client,
    base_url: String,
    fast_model: String,
    standard_model: String,
}

impl OllamaInference {
    /// Create client from configuration
    pub fn new(config: &InferenceConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(ContextError::Http)?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            fast_model: config.fast_model.clone(),
            standard_model: config.standard_model.clone(),
        })
    }

    /// Model name serving `tier`
    pub fn model_for(&self, tier: ModelTier) -> &str {
        match tier {
            ModelTier::Fast => &self.fast_model,
            ModelTier::Standard => &self.standard_model,
        }
    }

    /// Get base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn build_request(&self, request: &InferenceRequest) -> ChatRequest {
        let format = request
            .output_schema
            .clone()
            .unwrap_or_else(|| Value::String("json".to_string()));

        ChatRequest {
            model: self.model_for(request.tier).to_string(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: request.instructions.clone(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: request.input.clone(),
                },
            ],
            stream: false,
            format: Some(format),
        }
    }
}

#[async_trait]
impl InferenceClient for OllamaInference {
    async fn invoke(&self, request: InferenceRequest) -> Result<InferenceOutput> {
        let url = format!("{}/api/chat", self.base_url);
        let body = self.build_request(&request);

        tracing::debug!(
            stage = request.stage.as_str(),
            model = %body.model,
            "sending inference request"
        );

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| ContextError::Inference(format!("Failed to send request: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ContextError::Inference(format!(
                "HTTP {}: {}",
                status, error_text
            )));
        }

        let chat: ChatResponse = response
            .json()
            .await
            .map_err(|e| ContextError::Inference(format!("Failed to parse response: {}", e)))?;

        let content = chat.message.content;
        Ok(match extract_json(&content) {
            Some(value) => InferenceOutput::Structured(value),
            None => InferenceOutput::Text(content),
        })
    }
}

#[derive(Debug, Clone, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: ChatMessage,
}
