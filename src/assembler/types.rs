//! Assembly options

use serde::{Deserialize, Serialize};

use crate::config::AssemblyConfig;
use crate::types::{ConversationMessage, Task};

/// Which builder to run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    Adaptive,
    Tiered,
    /// Adaptive when enabled in config, tiered otherwise
    #[default]
    Auto,
}

/// Input to one assembly cycle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssemblyOptions {
    pub task: Task,
    pub messages: Vec<ConversationMessage>,
    pub max_tokens: usize,
    pub max_recent_turns: usize,
    pub strategy: Strategy,
    /// Errors from the current run, passed to need analysis
    pub recent_errors: Vec<String>,
    /// Tiered only: skip classification and build the full bundle
    pub force_full_context: bool,
}

impl AssemblyOptions {
    /// Options with the configured default budget and recent-turn window
    pub fn new(task: Task, config: &AssemblyConfig) -> Self {
        Self {
            task,
            messages: Vec::new(),
            max_tokens: config.default_max_tokens,
            max_recent_turns: config.default_max_recent_turns,
            strategy: Strategy::Auto,
            recent_errors: Vec::new(),
            force_full_context: false,
        }
    }

    pub fn with_messages(mut self, messages: Vec<ConversationMessage>) -> Self {
        self.messages = messages;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_max_recent_turns(mut self, turns: usize) -> Self {
        self.max_recent_turns = turns;
        self
    }

    pub fn with_strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_recent_errors(mut self, errors: Vec<String>) -> Self {
        self.recent_errors = errors;
        self
    }

    pub fn force_full(mut self) -> Self {
        self.force_full_context = true;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_config() {
        let options = AssemblyOptions::new(Task::new("t", "u"), &AssemblyConfig::default());
        assert_eq!(options.max_tokens, 30_000);
        assert_eq!(options.max_recent_turns, 8);
        assert_eq!(options.strategy, Strategy::Auto);
        assert!(!options.force_full_context);
    }
}
