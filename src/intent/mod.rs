//! Intent extraction
//!
//! One cheap-tier call that turns a free-text task into entities, a primary
//! action, a scope and a few boolean flags. The extractor is told to
//! over-include: a spurious entity costs one extra search, a missed one
//! costs the agent the context it needed.

pub mod extractor;
pub mod types;

pub use extractor::IntentExtractor;
pub use types::{EntityRef, ExtractedIntent, IntentFlags, Scope};
