//! Operator task handed to one assembly cycle

use serde::{Deserialize, Serialize};

/// Free-text operator request plus the identifiers it arrived with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    /// Raw natural-language request
    pub text: String,
    /// Conversation the task belongs to, if any
    pub conversation_id: Option<String>,
    /// Scope key for user-owned memories
    pub user_id: String,
}

impl Task {
    /// Create a task for a user with no conversation attached
    pub fn new(text: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            conversation_id: None,
            user_id: user_id.into(),
        }
    }

    /// Attach a conversation id
    pub fn in_conversation(mut self, conversation_id: impl Into<String>) -> Self {
        self.conversation_id = Some(conversation_id.into());
        self
    }

    /// First `max_chars` characters of the task text
    pub fn prefix(&self, max_chars: usize) -> String {
        self.text.chars().take(max_chars).collect()
    }
}
