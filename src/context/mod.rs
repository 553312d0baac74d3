//! Context management module
//!
//! Token estimation, conversation summarization and the bundle handed to
//! the agent, including its budget enforcement.

pub mod bundle;
pub mod counter;
pub mod summarizer;

// Re-export commonly used types
pub use bundle::{BudgetReport, BundleStrategy, ContextBundle};
pub use counter::{TokenCounter, CHARS_PER_TOKEN};
pub use summarizer::{CompressedHistory, ConversationSummarizer, ConversationSummary};
