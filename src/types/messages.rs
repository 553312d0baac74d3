//! Conversation message types
//!
//! History as received from the conversation store. Messages are treated as
//! immutable inputs; the summarizer only ever reads them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::context::counter::TokenCounter;

/// Message author
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    System,
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
            Role::Tool => "tool",
        }
    }
}

/// One turn of conversation history
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConversationMessage {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl ConversationMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// Estimate tokens for this message
    pub fn estimate_tokens(&self) -> usize {
        TokenCounter::new().estimate(&self.content)
    }

    /// `role: content` line used when feeding history to the model
    pub fn transcript_line(&self) -> String {
        format!("{}: {}", self.role.as_str(), self.content)
    }
}

/// Render messages as a plain transcript
pub fn transcript(messages: &[ConversationMessage]) -> String {
    messages
        .iter()
        .map(ConversationMessage::transcript_line)
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_serialization() {
        let msg = ConversationMessage::user("hello");
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"role\":\"user\""));
        assert!(!json.contains("timestamp"));
    }

    #[test]
    fn test_transcript() {
        let messages = vec![
            ConversationMessage::user("reprice the grinders"),
            ConversationMessage::assistant("which collection?"),
        ];
        assert_eq!(
            transcript(&messages),
            "user: reprice the grinders\nassistant: which collection?"
        );
    }
}
