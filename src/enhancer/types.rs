//! Progressive enhancement types

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::context::bundle::ContextBundle;
use crate::errors::Result;

/// Whether a stalled run should get more context
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum EnhancementDecision {
    NotNeeded,
    Enhance {
        queries: Vec<String>,
        error_type: String,
        /// Queries came from a stored pattern; classification was skipped
        from_learned_pattern: bool,
    },
}

impl EnhancementDecision {
    pub fn is_needed(&self) -> bool {
        matches!(self, EnhancementDecision::Enhance { .. })
    }
}

/// What one agent run produced
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRunOutput {
    pub output: String,
    pub success: bool,
    pub error: Option<String>,
}

impl AgentRunOutput {
    pub fn succeeded(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            success: true,
            error: None,
        }
    }

    pub fn failed(output: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            success: false,
            error: Some(error.into()),
        }
    }
}

/// Runs the downstream agent against a bundle
#[async_trait]
pub trait AgentRunner: Send + Sync {
    async fn run(&self, bundle: &ContextBundle) -> Result<AgentRunOutput>;
}

/// Outcome of [`ProgressiveEnhancer::run_with_enhancement`](crate::enhancer::ProgressiveEnhancer::run_with_enhancement)
#[derive(Debug, Clone)]
pub struct EnhancedRun {
    /// Last output the agent produced, if any run finished
    pub output: Option<AgentRunOutput>,
    /// Bundle used by the last attempt
    pub bundle: ContextBundle,
    pub attempts: u32,
    pub enhancements: u32,
    pub timed_out: bool,
}

impl EnhancedRun {
    pub fn succeeded(&self) -> bool {
        self.output.as_ref().is_some_and(|o| o.success)
    }
}
