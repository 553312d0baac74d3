//! Type definitions module
//!
//! Inputs shared by every pipeline stage: the operator task and the
//! conversation history it arrives with.

pub mod messages;
pub mod task;

// Re-export commonly used types
pub use messages::{ConversationMessage, Role};
pub use task::Task;
