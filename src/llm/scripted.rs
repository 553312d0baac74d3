//! Deterministic inference backend
//!
//! Replies are scripted per [`InferenceStage`]. Used by the crate's own
//! tests and by callers who want to exercise the pipeline without a model.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;

use crate::errors::{ContextError, Result};
use crate::llm::{InferenceClient, InferenceOutput, InferenceRequest, InferenceStage};

type Responder = Arc<dyn Fn(&InferenceRequest) -> Result<InferenceOutput> + Send + Sync>;

#[derive(Default)]
struct Script {
    /// Consumed first, one per call
    queued: VecDeque<Responder>,
    /// Used once the queue is empty
    fallback: Option<Responder>,
}

/// Inference client answering from a per-stage script
#[derive(Clone, Default)]
pub struct ScriptedInference {
    scripts: Arc<Mutex<HashMap<InferenceStage, Script>>>,
    calls: Arc<Mutex<Vec<InferenceRequest>>>,
}

impl ScriptedInference {
    pub fn new() -> Self {
        Self::default()
    }

    /// Always answer `stage` with a structured value
    pub fn respond(self, stage: InferenceStage, value: Value) -> Self {
        self.respond_with(stage, move |_| Ok(InferenceOutput::Structured(value.clone())))
    }

    /// Always answer `stage` with raw text
    pub fn respond_text(self, stage: InferenceStage, text: impl Into<String>) -> Self {
        let text = text.into();
        self.respond_with(stage, move |_| Ok(InferenceOutput::Text(text.clone())))
    }

    /// Always fail calls for `stage`
    pub fn fail(self, stage: InferenceStage, message: impl Into<String>) -> Self {
        let message = message.into();
        self.respond_with(stage, move |_| Err(ContextError::Inference(message.clone())))
    }

    /// Answer `stage` by computing a reply from the request
    pub fn respond_with<F>(self, stage: InferenceStage, responder: F) -> Self
    where
        F: Fn(&InferenceRequest) -> Result<InferenceOutput> + Send + Sync + 'static,
    {
        self.with_script(stage, |script| script.fallback = Some(Arc::new(responder)));
        self
    }

    /// Queue a one-shot structured reply, consumed before the standing reply
    pub fn enqueue(self, stage: InferenceStage, value: Value) -> Self {
        self.with_script(stage, |script| {
            script
                .queued
                .push_back(Arc::new(move |_: &InferenceRequest| {
                    Ok(InferenceOutput::Structured(value.clone()))
                }))
        });
        self
    }

    /// Every request received so far
    pub fn calls(&self) -> Vec<InferenceRequest> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Number of requests received for `stage`
    pub fn call_count(&self, stage: InferenceStage) -> usize {
        self.calls().iter().filter(|r| r.stage == stage).count()
    }

    fn with_script(&self, stage: InferenceStage, edit: impl FnOnce(&mut Script)) {
        if let Ok(mut scripts) = self.scripts.lock() {
            edit(scripts.entry(stage).or_default());
        }
    }

    fn next_responder(&self, stage: InferenceStage) -> Option<Responder> {
        let mut scripts = self.scripts.lock().ok()?;
        let script = scripts.get_mut(&stage)?;
        script.queued.pop_front().or_else(|| script.fallback.clone())
    }
}

#[async_trait]
impl InferenceClient for ScriptedInference {
    async fn invoke(&self, request: InferenceRequest) -> Result<InferenceOutput> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(request.clone());
        }

        match self.next_responder(request.stage) {
            Some(responder) => responder(&request),
            None => Err(ContextError::Inference(format!(
                "no scripted reply for {}",
                request.stage.as_str()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ModelTier;
    use serde_json::json;

    fn request(stage: InferenceStage) -> InferenceRequest {
        InferenceRequest::new(stage, ModelTier::Fast, "i", "x")
    }

    #[tokio::test]
    async fn test_queued_before_fallback() {
        let client = ScriptedInference::new()
            .respond(InferenceStage::ChunkSummary, json!({ "n": 0 }))
            .enqueue(InferenceStage::ChunkSummary, json!({ "n": 1 }));

        let first = client.invoke(request(InferenceStage::ChunkSummary)).await.unwrap();
        let second = client.invoke(request(InferenceStage::ChunkSummary)).await.unwrap();

        assert_eq!(first, InferenceOutput::Structured(json!({ "n": 1 })));
        assert_eq!(second, InferenceOutput::Structured(json!({ "n": 0 })));
    }

    #[tokio::test]
    async fn test_unscripted_stage_errors() {
        let client = ScriptedInference::new();
        let result = client.invoke(request(InferenceStage::RelevanceFilter)).await;
        assert!(matches!(result, Err(ContextError::Inference(_))));
        assert_eq!(client.call_count(InferenceStage::RelevanceFilter), 1);
    }

    #[tokio::test]
    async fn test_fail() {
        let client = ScriptedInference::new().fail(InferenceStage::NeedAnalysis, "down");
        assert!(client.invoke(request(InferenceStage::NeedAnalysis)).await.is_err());
    }
}
