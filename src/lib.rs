//! espresso-context - adaptive context assembly for EspressoBot
//!
//! Builds the per-request context bundle a catalog-management agent works
//! from, and learns from each run which context was worth fetching.
//!
//! # Architecture
//!
//! - **Assembly**: intent extraction → need analysis → fetch → relevance
//!   filter → conversation compression → budget enforcement
//! - **Tiered fallback**: heuristic core/full builders with no model calls
//! - **Feedback**: per-operation usage tracking, pruning, recommendations
//! - **Enhancement**: targeted re-fetch when an agent run stalls

pub mod assembler;
pub mod background;
pub mod config;
pub mod context;
pub mod engine;
pub mod enhancer;
pub mod errors;
pub mod feedback;
pub mod fetch;
pub mod filter;
pub mod intent;
pub mod llm;
pub mod needs;
pub mod store;
pub mod telemetry;
pub mod types;

// Re-export commonly used types
pub use assembler::{AssemblyOptions, Strategy};
pub use config::EngineConfig;
pub use context::{BundleStrategy, ContextBundle};
pub use engine::{Collaborators, ContextEngine};
pub use errors::{ContextError, Result};
pub use feedback::{OperationOutcome, OperationStatus};
pub use types::{ConversationMessage, Role, Task};
