//! Feedback loop data types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Identifier of one tracked agent run
pub type OperationId = uuid::Uuid;

/// Lifecycle of an operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status", content = "detail")]
pub enum OperationStatus {
    InProgress,
    Completed,
    Failed(String),
}

impl OperationStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, OperationStatus::InProgress)
    }
}

/// One tool call observed during the run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolUsage {
    pub tool: String,
    pub args: Value,
    /// Short description of what came back
    pub result_summary: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Baseline of the bundle an operation started with
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitialContextSummary {
    pub context_keys: Vec<String>,
    pub token_count: usize,
    pub truncated: bool,
    pub had_conversation_summary: bool,
}

/// A tracked agent run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationRecord {
    pub id: OperationId,
    pub task: String,
    pub start_time: DateTime<Utc>,
    pub initial_context_summary: InitialContextSummary,
    pub context_keys: Vec<String>,
    pub tool_usage: Vec<ToolUsage>,
    pub errors: Vec<String>,
    pub status: OperationStatus,
}

/// Post-hoc analysis of a finished operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationAnalysis {
    pub useful_context: Vec<String>,
    pub unused_context: Vec<String>,
    pub missing_context: Vec<String>,
    /// Share of fetched context that was used, in [0, 1]
    pub efficiency: f64,
    pub recommendations: Vec<String>,
    /// True when the model call failed and the keyword heuristic was used
    pub heuristic: bool,
}

/// What pruning suggests doing with a context key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PruneAction {
    Remove,
    Prioritize,
}

/// Output of a pruning evaluation for one key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PruningRecommendation {
    pub key: String,
    pub action: PruneAction,
    pub useful: u64,
    pub unused: u64,
}

/// What past runs say about context selection for a task.
///
/// Consumed by the need analyzer as prior recommendations and attached to
/// the bundle so the agent can see it too.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeedbackInsights {
    pub similar_tasks: usize,
    /// Context descriptions that have helped on similar tasks
    pub prioritize: Vec<String>,
    /// Context descriptions that were fetched but went unused
    pub avoid: Vec<String>,
    pub missing_context: Vec<String>,
    pub average_efficiency: Option<f64>,
}

impl FeedbackInsights {
    pub fn is_empty(&self) -> bool {
        self.prioritize.is_empty() && self.avoid.is_empty() && self.missing_context.is_empty()
    }
}

/// How a finished run went, as reported by the agent runner
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationOutcome {
    pub success: bool,
    /// Context keys the runner knows it relied on
    pub used_context: Vec<String>,
    pub tools_used: Vec<String>,
    pub error: Option<String>,
}

impl OperationOutcome {
    pub fn success() -> Self {
        Self {
            success: true,
            used_context: Vec::new(),
            tools_used: Vec::new(),
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            used_context: Vec::new(),
            tools_used: Vec::new(),
            error: Some(error.into()),
        }
    }
}
