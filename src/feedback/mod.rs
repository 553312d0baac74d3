//! Context feedback loop
//!
//! Callers wrap each agent run with `start_operation`, `track_tool_usage`,
//! `track_error` and `complete_operation`. Completion scores which context
//! keys were used, updates per-key usage tallies and persists a learning
//! record; `get_recommendations` reads those records back for the need
//! analyzer on the next task.
//!
//! Operation states: `in_progress → completed | failed`. Calls naming an
//! unknown operation are no-ops.

pub mod pruning;
pub mod tracker;
pub mod types;

pub use pruning::PruneTrigger;
pub use tracker::{heuristic_analysis, ContextFeedbackLoop, HistoryCleanup};
pub use types::{
    FeedbackInsights, OperationAnalysis, OperationId, OperationOutcome, OperationRecord,
    OperationStatus, PruneAction, PruningRecommendation, ToolUsage,
};
