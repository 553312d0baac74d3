//! In-memory store implementations
//!
//! Lexical scoring stands in for embeddings: a hit's score is the share of
//! query keywords it contains. Good enough for tests and small deployments.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::errors::Result;
use crate::store::similarity::query_coverage;
use crate::store::{FragmentStore, LearningRecord, LearningStore, MemoryStore, SearchHit};

#[derive(Debug, Clone)]
struct StoredEntry {
    content: String,
    metadata: Value,
}

fn rank(query: &str, entries: &[StoredEntry], limit: usize) -> Vec<SearchHit> {
    let mut hits: Vec<SearchHit> = entries
        .iter()
        .map(|entry| {
            SearchHit::new(entry.content.clone(), query_coverage(query, &entry.content))
                .with_metadata(entry.metadata.clone())
        })
        .filter(|hit| hit.score > 0.0)
        .collect();

    hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    hits.truncate(limit);
    hits
}

/// User-scoped memories
#[derive(Debug, Default)]
pub struct InMemoryMemoryStore {
    scopes: RwLock<HashMap<String, Vec<StoredEntry>>>,
}

impl InMemoryMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a memory for `scope_key`
    pub async fn insert(&self, scope_key: &str, content: impl Into<String>, metadata: Value) {
        let mut scopes = self.scopes.write().await;
        scopes.entry(scope_key.to_string()).or_default().push(StoredEntry {
            content: content.into(),
            metadata,
        });
    }

    /// Number of memories stored for `scope_key`
    pub async fn len(&self, scope_key: &str) -> usize {
        self.scopes.read().await.get(scope_key).map_or(0, Vec::len)
    }
}

#[async_trait]
impl MemoryStore for InMemoryMemoryStore {
    async fn search(&self, query: &str, scope_key: &str, limit: usize) -> Result<Vec<SearchHit>> {
        let scopes = self.scopes.read().await;
        Ok(scopes
            .get(scope_key)
            .map(|entries| rank(query, entries, limit))
            .unwrap_or_default())
    }
}

/// Global prompt-fragment library
#[derive(Debug, Default)]
pub struct InMemoryFragmentStore {
    fragments: RwLock<Vec<StoredEntry>>,
}

impl InMemoryFragmentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a fragment with `category`, `priority` and `tags` metadata
    pub async fn insert(&self, content: impl Into<String>, category: &str, priority: &str, tags: &[&str]) {
        let metadata = serde_json::json!({
            "category": category,
            "priority": priority,
            "tags": tags,
        });
        self.fragments.write().await.push(StoredEntry {
            content: content.into(),
            metadata,
        });
    }
}

#[async_trait]
impl FragmentStore for InMemoryFragmentStore {
    async fn search_fragments(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>> {
        let fragments = self.fragments.read().await;
        Ok(rank(query, &fragments, limit))
    }
}

/// Append-only learning records grouped by bucket
#[derive(Debug, Default)]
pub struct InMemoryLearningStore {
    buckets: RwLock<HashMap<String, Vec<LearningRecord>>>,
}

impl InMemoryLearningStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// All records in `bucket`, oldest first
    pub async fn records(&self, bucket: &str) -> Vec<LearningRecord> {
        self.buckets
            .read()
            .await
            .get(bucket)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl LearningStore for InMemoryLearningStore {
    async fn add(&self, summary: &str, bucket: &str, metadata: Value) -> Result<()> {
        let mut buckets = self.buckets.write().await;
        buckets.entry(bucket.to_string()).or_default().push(LearningRecord {
            summary: summary.to_string(),
            metadata,
            created_at: Utc::now(),
            score: 0.0,
        });
        Ok(())
    }

    async fn search(&self, query: &str, bucket: &str, limit: usize) -> Result<Vec<LearningRecord>> {
        let buckets = self.buckets.read().await;
        let Some(records) = buckets.get(bucket) else {
            return Ok(Vec::new());
        };

        let mut scored: Vec<LearningRecord> = records
            .iter()
            .map(|record| LearningRecord {
                score: query_coverage(query, &record.summary),
                ..record.clone()
            })
            .filter(|record| record.score > 0.0)
            .collect();

        // Most similar first, newest breaks ties
        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(b.created_at.cmp(&a.created_at))
        });
        scored.truncate(limit);
        Ok(scored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_memory_search_is_scoped() {
        let store = InMemoryMemoryStore::new();
        store.insert("alice", "Eureka grinders ship from the Toronto warehouse", json!({})).await;
        store.insert("bob", "Eureka grinders are out of stock", json!({})).await;

        let hits = store.search("eureka grinders", "alice", 5).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits[0].content.contains("Toronto"));
        assert_eq!(store.len("bob").await, 1);
    }

    #[tokio::test]
    async fn test_memory_search_ranks_and_limits() {
        let store = InMemoryMemoryStore::new();
        store.insert("u", "price update policy", json!({})).await;
        store.insert("u", "price update policy for eureka grinders", json!({})).await;
        store.insert("u", "unrelated shipping note", json!({})).await;

        let hits = store.search("eureka price update", "u", 1).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits[0].content.contains("eureka"));
    }

    #[tokio::test]
    async fn test_fragment_metadata_round_trip() {
        let store = InMemoryFragmentStore::new();
        store.insert("Bulk price changes need approval", "rules", "critical", &["pricing"]).await;

        let hits = store.search_fragments("bulk price changes", 5).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].category(), Some("rules"));
        assert_eq!(hits[0].priority(), Some("critical"));
    }

    #[tokio::test]
    async fn test_learning_store_buckets() {
        let store = InMemoryLearningStore::new();
        store.add("reprice eureka grinders used vendor rules", "context_learning", json!({ "efficiency": 0.8 })).await.unwrap();
        store.add("reprice eureka grinders", "enhancement_patterns", json!({})).await.unwrap();

        let found = store.search("reprice grinders", "context_learning", 5).await.unwrap();
        assert_eq!(found.len(), 1);
        assert!(found[0].score > 0.0);
        assert_eq!(store.records("enhancement_patterns").await.len(), 1);
        assert!(store.search("anything", "missing", 5).await.unwrap().is_empty());
    }
}
