//! Progressive enhancement
//!
//! When an agent run stalls, fetch targeted extra context and merge it
//! into the existing bundle instead of re-running the whole pipeline.
//! Every attempt is stored as a pattern (error type → queries) so a
//! recurring error can skip classification next time.

pub mod progressive;
pub mod types;

pub use progressive::{classify_error_type, ProgressiveEnhancer};
pub use types::{AgentRunOutput, AgentRunner, EnhancedRun, EnhancementDecision};
