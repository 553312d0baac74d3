//! Collaborator stores consumed by the engine
//!
//! The engine only reads memories and prompt fragments, and appends to the
//! learning store. Implementations live elsewhere; the in-memory versions
//! here back tests and single-process deployments.

pub mod memory;
pub mod similarity;
pub mod usage;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::Result;

pub use memory::{InMemoryFragmentStore, InMemoryLearningStore, InMemoryMemoryStore};
pub use usage::{age_cutoff, InMemoryUsageStats, KeyOutcome, KeyUsage, UsageStatsRepository};

/// One raw hit returned by a semantic search
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub content: String,
    pub score: f64,
    #[serde(default)]
    pub metadata: Value,
}

impl SearchHit {
    pub fn new(content: impl Into<String>, score: f64) -> Self {
        Self {
            content: content.into(),
            score,
            metadata: Value::Null,
        }
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }

    /// Fragment category (`rules`, `tools`, `workflows`, ...)
    pub fn category(&self) -> Option<&str> {
        self.metadata.get("category").and_then(Value::as_str)
    }

    /// Fragment priority as stored, e.g. `critical`
    pub fn priority(&self) -> Option<&str> {
        self.metadata.get("priority").and_then(Value::as_str)
    }

    pub fn tags(&self) -> Vec<&str> {
        self.metadata
            .get("tags")
            .and_then(Value::as_array)
            .map(|tags| tags.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default()
    }
}

/// A persisted learning note
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearningRecord {
    pub summary: String,
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
    /// Similarity to the query that found it; 0 when listed directly
    #[serde(default)]
    pub score: f64,
}

/// Long-term memories, scoped per user
#[async_trait]
pub trait MemoryStore: Send + Sync {
    async fn search(&self, query: &str, scope_key: &str, limit: usize) -> Result<Vec<SearchHit>>;
}

/// Shared prompt-fragment library (business rules, tool notes, workflows)
#[async_trait]
pub trait FragmentStore: Send + Sync {
    async fn search_fragments(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>>;
}

/// Append-only semantic store for learning records
#[async_trait]
pub trait LearningStore: Send + Sync {
    async fn add(&self, summary: &str, bucket: &str, metadata: Value) -> Result<()>;

    async fn search(&self, query: &str, bucket: &str, limit: usize) -> Result<Vec<LearningRecord>>;
}
