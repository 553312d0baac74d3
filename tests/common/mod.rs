//! Shared fixtures for integration tests

#![allow(dead_code)]

use std::sync::Arc;

use async_trait::async_trait;

use espresso_context::errors::{ContextError, Result};
use espresso_context::llm::ScriptedInference;
use espresso_context::store::{
    FragmentStore, InMemoryFragmentStore, InMemoryLearningStore, InMemoryMemoryStore, InMemoryUsageStats,
    MemoryStore, SearchHit,
};
use espresso_context::{Collaborators, ContextEngine, ConversationMessage, EngineConfig};

/// Memory store whose every search fails
pub struct FailingMemoryStore;

#[async_trait]
impl MemoryStore for FailingMemoryStore {
    async fn search(&self, query: &str, _scope_key: &str, _limit: usize) -> Result<Vec<SearchHit>> {
        Err(ContextError::Store(format!("memory backend unreachable for {:?}", query)))
    }
}

/// Fragment store whose every search fails
pub struct FailingFragmentStore;

#[async_trait]
impl FragmentStore for FailingFragmentStore {
    async fn search_fragments(&self, _query: &str, _limit: usize) -> Result<Vec<SearchHit>> {
        Err(ContextError::Store("fragment index offline".to_string()))
    }
}

/// Engine plus handles on its in-memory stores
pub struct Harness {
    pub engine: ContextEngine,
    pub inference: ScriptedInference,
    pub memory: Arc<InMemoryMemoryStore>,
    pub fragments: Arc<InMemoryFragmentStore>,
    pub learning: Arc<InMemoryLearningStore>,
    pub usage: Arc<InMemoryUsageStats>,
}

pub fn harness(inference: ScriptedInference) -> Harness {
    harness_with_config(inference, EngineConfig::default())
}

pub fn harness_with_config(inference: ScriptedInference, config: EngineConfig) -> Harness {
    let memory = Arc::new(InMemoryMemoryStore::new());
    let fragments = Arc::new(InMemoryFragmentStore::new());
    let learning = Arc::new(InMemoryLearningStore::new());
    let usage = Arc::new(InMemoryUsageStats::default());

    let collaborators = Collaborators {
        inference: Arc::new(inference.clone()),
        memory: memory.clone(),
        fragments: fragments.clone(),
        learning: learning.clone(),
        usage_stats: usage.clone(),
    };
    let engine = ContextEngine::new(collaborators, config).expect("default config is valid");

    Harness {
        engine,
        inference,
        memory,
        fragments,
        learning,
        usage,
    }
}

/// Alternating user/assistant turns numbered from 1
pub fn conversation(n: usize) -> Vec<ConversationMessage> {
    (1..=n)
        .map(|i| {
            if i % 2 == 1 {
                ConversationMessage::user(format!("question {}", i))
            } else {
                ConversationMessage::assistant(format!("answer {}", i))
            }
        })
        .collect()
}
