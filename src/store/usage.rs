//! Per-context-key usage statistics
//!
//! Running useful/unused tallies keyed by context description. Held behind
//! [`UsageStatsRepository`] so the tally can live in process memory or in a
//! persistent store without the feedback loop knowing which.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::errors::Result;

/// Whether a fetched key turned out to matter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyOutcome {
    Useful,
    Unused,
}

/// Tally for one context key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyUsage {
    pub useful: u64,
    pub unused: u64,
    pub last_updated: DateTime<Utc>,
}

impl KeyUsage {
    fn empty() -> Self {
        Self {
            useful: 0,
            unused: 0,
            last_updated: Utc::now(),
        }
    }

    pub fn observations(&self) -> u64 {
        self.useful + self.unused
    }

    /// Share of observations where the key was useful
    pub fn useful_ratio(&self) -> f64 {
        match self.observations() {
            0 => 0.0,
            n => self.useful as f64 / n as f64,
        }
    }

    pub fn unused_ratio(&self) -> f64 {
        match self.observations() {
            0 => 0.0,
            n => self.unused as f64 / n as f64,
        }
    }
}

/// Oldest timestamp that survives an eviction by `max_age`.
///
/// `None` when `max_age` reaches past the earliest representable time, in
/// which case nothing is old enough to evict.
pub fn age_cutoff(max_age: Duration) -> Option<DateTime<Utc>> {
    let age = chrono::Duration::from_std(max_age).ok()?;
    Utc::now().checked_sub_signed(age)
}

/// Storage for usage tallies
#[async_trait]
pub trait UsageStatsRepository: Send + Sync {
    /// Record one observation and return the updated tally
    async fn record(&self, key: &str, outcome: KeyOutcome) -> Result<KeyUsage>;

    async fn get(&self, key: &str) -> Result<Option<KeyUsage>>;

    /// Every tracked key
    async fn snapshot(&self) -> Result<Vec<(String, KeyUsage)>>;

    /// Drop keys not updated within `max_age`; returns how many were removed
    async fn evict_older_than(&self, max_age: Duration) -> Result<usize>;
}

/// Process-local tallies with a hard capacity.
///
/// When a new key would exceed the capacity the least recently updated key
/// is evicted.
#[derive(Debug)]
pub struct InMemoryUsageStats {
    capacity: usize,
    entries: RwLock<HashMap<String, KeyUsage>>,
}

impl InMemoryUsageStats {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

impl Default for InMemoryUsageStats {
    fn default() -> Self {
        Self::new(1_000)
    }
}

#[async_trait]
impl UsageStatsRepository for InMemoryUsageStats {
    async fn record(&self, key: &str, outcome: KeyOutcome) -> Result<KeyUsage> {
        let mut entries = self.entries.write().await;

        if !entries.contains_key(key) && entries.len() >= self.capacity {
            let oldest = entries
                .iter()
                .min_by_key(|(_, usage)| usage.last_updated)
                .map(|(k, _)| k.clone());
            if let Some(oldest) = oldest {
                tracing::debug!(key = %oldest, "evicting least recently updated usage key");
                entries.remove(&oldest);
            }
        }

        let usage = entries.entry(key.to_string()).or_insert_with(KeyUsage::empty);
        match outcome {
            KeyOutcome::Useful => usage.useful += 1,
            KeyOutcome::Unused => usage.unused += 1,
        }
        usage.last_updated = Utc::now();
        Ok(usage.clone())
    }

    async fn get(&self, key: &str) -> Result<Option<KeyUsage>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn snapshot(&self) -> Result<Vec<(String, KeyUsage)>> {
        let entries = self.entries.read().await;
        let mut all: Vec<(String, KeyUsage)> =
            entries.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(all)
    }

    async fn evict_older_than(&self, max_age: Duration) -> Result<usize> {
        let Some(cutoff) = age_cutoff(max_age) else {
            return Ok(0);
        };
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, usage| usage.last_updated >= cutoff);
        Ok(before - entries.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_record_increments() {
        let stats = InMemoryUsageStats::new(10);
        stats.record("vendor rules", KeyOutcome::Useful).await.unwrap();
        stats.record("vendor rules", KeyOutcome::Unused).await.unwrap();
        let usage = stats.record("vendor rules", KeyOutcome::Useful).await.unwrap();

        assert_eq!(usage.useful, 2);
        assert_eq!(usage.unused, 1);
        assert_eq!(usage.observations(), 3);
        assert!((usage.useful_ratio() - 2.0 / 3.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_capacity_evicts_least_recent() {
        let stats = InMemoryUsageStats::new(2);
        stats.record("a", KeyOutcome::Useful).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        stats.record("b", KeyOutcome::Useful).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        stats.record("c", KeyOutcome::Useful).await.unwrap();

        assert_eq!(stats.len().await, 2);
        assert!(stats.get("a").await.unwrap().is_none());
        assert!(stats.get("c").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_evict_older_than() {
        let stats = InMemoryUsageStats::new(10);
        stats.record("stale", KeyOutcome::Unused).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        stats.record("fresh", KeyOutcome::Useful).await.unwrap();

        let removed = stats.evict_older_than(Duration::from_millis(10)).await.unwrap();
        assert_eq!(removed, 1);
        let keys: Vec<String> = stats.snapshot().await.unwrap().into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["fresh".to_string()]);
    }

    #[tokio::test]
    async fn test_huge_max_age_evicts_nothing() {
        let stats = InMemoryUsageStats::new(10);
        stats.record("vendor rules", KeyOutcome::Useful).await.unwrap();

        assert_eq!(stats.evict_older_than(Duration::MAX).await.unwrap(), 0);
        let million_years = Duration::from_secs(1_000_000 * 365 * 86_400);
        assert_eq!(stats.evict_older_than(million_years).await.unwrap(), 0);
        assert_eq!(stats.len().await, 1);
    }

    #[test]
    fn test_age_cutoff_bounds() {
        assert!(age_cutoff(Duration::MAX).is_none());
        assert!(age_cutoff(Duration::from_secs(1_000_000 * 365 * 86_400)).is_none());
        let cutoff = age_cutoff(Duration::from_secs(3_600)).unwrap();
        assert!(cutoff < Utc::now());
    }

    #[test]
    fn test_ratios_with_no_observations() {
        let usage = KeyUsage::empty();
        assert_eq!(usage.useful_ratio(), 0.0);
        assert_eq!(usage.unused_ratio(), 0.0);
    }
}
