//! Per-source resolvers

use std::sync::Arc;

use async_trait::async_trait;

use crate::errors::Result;
use crate::needs::types::ContextSuggestion;
use crate::store::{FragmentStore, MemoryStore, SearchHit};

/// Turns one suggestion into raw hits
#[async_trait]
pub trait SourceResolver: Send + Sync {
    async fn resolve(
        &self,
        suggestion: &ContextSuggestion,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<SearchHit>>;
}

/// Semantic search over the user's memories
pub struct MemoryResolver {
    store: Arc<dyn MemoryStore>,
}

impl MemoryResolver {
    pub fn new(store: Arc<dyn MemoryStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl SourceResolver for MemoryResolver {
    async fn resolve(
        &self,
        suggestion: &ContextSuggestion,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<SearchHit>> {
        self.store.search(&suggestion.search_query, user_id, limit).await
    }
}

/// Semantic search over the shared prompt-fragment library
pub struct RulesResolver {
    store: Arc<dyn FragmentStore>,
}

impl RulesResolver {
    pub fn new(store: Arc<dyn FragmentStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl SourceResolver for RulesResolver {
    async fn resolve(
        &self,
        suggestion: &ContextSuggestion,
        _user_id: &str,
        limit: usize,
    ) -> Result<Vec<SearchHit>> {
        self.store.search_fragments(&suggestion.search_query, limit).await
    }
}

/// Placeholder for sources with no backing store yet
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopResolver;

#[async_trait]
impl SourceResolver for NoopResolver {
    async fn resolve(
        &self,
        suggestion: &ContextSuggestion,
        _user_id: &str,
        _limit: usize,
    ) -> Result<Vec<SearchHit>> {
        tracing::debug!(
            source = suggestion.source.as_str(),
            key = %suggestion.description,
            "no resolver for source, skipping"
        );
        Ok(Vec::new())
    }
}
