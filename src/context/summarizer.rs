//! Recursive conversation summarization
//!
//! Compresses long histories while keeping the most recent turns verbatim:
//!
//! ```text
//! Input:  M = [m₁, ..., mₙ], R = max_recent_turns
//! Split:  old = M[..n-R], recent = M[n-R..]
//! Chunk:  old → [c₁, ..., cₖ], |cᵢ| ≤ 8, k = ⌈|old| / 8⌉
//! Fold:   sᵢ = summarize(cᵢ, sᵢ₋₁)          (chronological)
//! Final:  k = 1 → s₁ ; k > 1 → combine(s₁..sₖ)
//!
//! Guarantees:
//!   |final.summary| ≤ max_summary_length (chars)
//!   |recent| ≤ R
//!   summarized_count + |recent| = n
//! ```
//!
//! Each chunk is seeded with the previous chunk's summary, not its raw
//! messages, so prompt size stays linear in the chunk size. Summarization
//! is an optimization: model failures degrade to placeholder text.

use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::config::SummaryConfig;
use crate::errors::{ContextError, Result};
use crate::llm::{invoke_json, InferenceClient, InferenceRequest, InferenceStage, ModelTier};
use crate::telemetry::{PipelineEvent, TelemetryCollector};
use crate::types::messages::{transcript, ConversationMessage};

const CHUNK_INSTRUCTIONS: &str = "Summarize this slice of a conversation between an e-commerce \
operator and their assistant. Keep product names, SKUs, prices, decisions and anything still \
unresolved. If a summary of the preceding conversation is given, continue from it rather than \
repeating it. Respond with JSON: summary, keyPoints, pendingItems.";

const COMBINE_INSTRUCTIONS: &str = "Merge these consecutive conversation summaries into one. \
Preserve the chronological flow and drop anything repeated. Respond with JSON: summary, \
keyPoints, pendingItems.";

/// Summary of one chunk or of a whole history
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub summary: String,
    #[serde(default, alias = "keyPoints")]
    pub key_points: Vec<String>,
    #[serde(default, alias = "pendingItems")]
    pub pending_items: Vec<String>,
}

/// Output of [`ConversationSummarizer::build_compressed`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompressedHistory {
    /// Per-chunk summaries, oldest first
    pub summaries: Vec<ConversationSummary>,
    pub final_summary: Option<ConversationSummary>,
    pub recent_messages: Vec<ConversationMessage>,
    pub total_messages: usize,
    pub summarized_count: usize,
}

/// Placeholder used when a chunk cannot be summarized
pub fn placeholder_summary(message_count: usize) -> ConversationSummary {
    ConversationSummary {
        summary: format!("Conversation chunk containing {} messages", message_count),
        key_points: Vec::new(),
        pending_items: Vec::new(),
    }
}

/// Truncate to `max_chars` characters without splitting a char
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => text[..byte_idx].to_string(),
        None => text.to_string(),
    }
}

/// Chunked history summarizer
#[derive(Clone)]
pub struct ConversationSummarizer {
    client: Arc<dyn InferenceClient>,
    config: SummaryConfig,
    telemetry: TelemetryCollector,
}

impl ConversationSummarizer {
    pub fn new(client: Arc<dyn InferenceClient>, config: SummaryConfig, telemetry: TelemetryCollector) -> Self {
        Self {
            client,
            config,
            telemetry,
        }
    }

    /// Summarize one chunk, seeded with the previous chunk's summary.
    ///
    /// Never fails; a model error yields [`placeholder_summary`].
    pub async fn summarize_chunk(
        &self,
        messages: &[ConversationMessage],
        previous: Option<&str>,
    ) -> ConversationSummary {
        let result = self.try_summarize_chunk(messages, previous).await;
        let fallback = result.is_err();
        self.telemetry.record(PipelineEvent::ChunkSummarized {
            messages: messages.len(),
            fallback,
            timestamp: Instant::now(),
        });

        match result {
            Ok(summary) => summary,
            Err(e) => {
                tracing::warn!(error = %e, messages = messages.len(), "chunk summary failed, using placeholder");
                placeholder_summary(messages.len())
            }
        }
    }

    async fn try_summarize_chunk(
        &self,
        messages: &[ConversationMessage],
        previous: Option<&str>,
    ) -> Result<ConversationSummary> {
        let mut input = String::new();
        if let Some(previous) = previous {
            input.push_str(&format!("Summary of the conversation so far:\n{}\n\n", previous));
        }
        input.push_str(&format!("Messages:\n{}", transcript(messages)));

        let request = InferenceRequest::new(
            InferenceStage::ChunkSummary,
            ModelTier::Standard,
            CHUNK_INSTRUCTIONS,
            input,
        )
        .with_schema(Self::schema());

        let mut summary: ConversationSummary = invoke_json(self.client.as_ref(), request)
            .await
            .map_err(|e| ContextError::SummarizationFailed(e.to_string()))?;
        summary.summary = truncate_chars(&summary.summary, self.config.max_summary_length);
        Ok(summary)
    }

    /// Fold several chunk summaries into one.
    ///
    /// A single summary is returned as is. On model failure the summaries
    /// are joined and truncated.
    pub async fn combine(&self, summaries: &[ConversationSummary]) -> ConversationSummary {
        match summaries {
            [] => ConversationSummary::default(),
            [only] => only.clone(),
            _ => match self.try_combine(summaries).await {
                Ok(combined) => combined,
                Err(e) => {
                    tracing::warn!(error = %e, count = summaries.len(), "summary combine failed, joining");
                    self.telemetry.stage_degraded("summarize", e.to_string());
                    self.join_summaries(summaries)
                }
            },
        }
    }

    async fn try_combine(&self, summaries: &[ConversationSummary]) -> Result<ConversationSummary> {
        let numbered: Vec<String> = summaries
            .iter()
            .enumerate()
            .map(|(i, s)| format!("Part {}:\n{}", i + 1, s.summary))
            .collect();

        let request = InferenceRequest::new(
            InferenceStage::SummaryCombine,
            ModelTier::Standard,
            COMBINE_INSTRUCTIONS,
            numbered.join("\n\n"),
        )
        .with_schema(Self::schema());

        let mut combined: ConversationSummary = invoke_json(self.client.as_ref(), request)
            .await
            .map_err(|e| ContextError::SummarizationFailed(e.to_string()))?;
        combined.summary = truncate_chars(&combined.summary, self.config.max_summary_length);
        Ok(combined)
    }

    fn join_summaries(&self, summaries: &[ConversationSummary]) -> ConversationSummary {
        let text = summaries
            .iter()
            .map(|s| s.summary.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");

        let mut key_points = Vec::new();
        let mut pending_items = Vec::new();
        for s in summaries {
            for point in &s.key_points {
                if !key_points.contains(point) {
                    key_points.push(point.clone());
                }
            }
            for item in &s.pending_items {
                if !pending_items.contains(item) {
                    pending_items.push(item.clone());
                }
            }
        }

        ConversationSummary {
            summary: truncate_chars(&text, self.config.max_summary_length),
            key_points,
            pending_items,
        }
    }

    /// Summarize everything but the last `max_recent_turns` messages
    pub async fn build_compressed(
        &self,
        messages: &[ConversationMessage],
        max_recent_turns: usize,
    ) -> CompressedHistory {
        let total_messages = messages.len();
        if total_messages <= max_recent_turns {
            return CompressedHistory {
                recent_messages: messages.to_vec(),
                total_messages,
                ..CompressedHistory::default()
            };
        }

        let started = Instant::now();
        let split = total_messages - max_recent_turns;
        let (old, recent) = messages.split_at(split);

        let mut summaries: Vec<ConversationSummary> = Vec::new();
        for chunk in old.chunks(self.config.chunk_size.max(1)) {
            let previous = summaries.last().map(|s| s.summary.clone());
            let summary = self.summarize_chunk(chunk, previous.as_deref()).await;
            summaries.push(summary);
        }

        let final_summary = self.combine(&summaries).await;
        tracing::debug!(
            total_messages,
            summarized = split,
            chunks = summaries.len(),
            "conversation compressed"
        );
        self.telemetry.stage_completed("summarize", started);

        CompressedHistory {
            summaries,
            final_summary: Some(final_summary),
            recent_messages: recent.to_vec(),
            total_messages,
            summarized_count: split,
        }
    }

    fn schema() -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "summary": { "type": "string" },
                "keyPoints": { "type": "array", "items": { "type": "string" } },
                "pendingItems": { "type": "array", "items": { "type": "string" } }
            },
            "required": ["summary"]
        })
    }
}
