//! Context assembly
//!
//! Two builders produce the same [`ContextBundle`](crate::context::ContextBundle)
//! shape:
//! - [`AdaptiveAssembler`]: the model-driven pipeline (default)
//! - [`TieredAssembler`]: a deterministic core/full fallback

pub mod adaptive;
pub mod business;
pub mod tiered;
pub mod types;

pub use adaptive::AdaptiveAssembler;
pub use business::{BulkOperation, BusinessLogic, BusinessPattern};
pub use tiered::{full_context_signals, requires_full_context, FullContextSignal, TieredAssembler};
pub use types::{AssemblyOptions, Strategy};
