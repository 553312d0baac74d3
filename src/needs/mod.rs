//! Context need analysis
//!
//! Given a task and its extracted intent, a standard-tier model proposes
//! what auxiliary context to fetch. The analyzer then applies what the
//! feedback loop has learned and guarantees a broad recall floor.

pub mod analyzer;
pub mod types;

pub use analyzer::{AnalysisHints, ContextNeedAnalyzer};
pub use types::{ContextSource, ContextSuggestion, Priority};
