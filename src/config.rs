//! Configuration for the context engine
//!
//! TOML-based configuration with defaults and validation.
//! Location: ~/.espressobot/context.toml

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::errors::{ContextError, Result};

/// Complete configuration for the context engine
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct EngineConfig {
    pub inference: InferenceConfig,
    pub assembly: AssemblyConfig,
    pub fetch: FetchConfig,
    pub filter: FilterConfig,
    pub summary: SummaryConfig,
    pub feedback: FeedbackConfig,
    pub enhancer: EnhancerConfig,
    pub tiered: TieredConfig,
}

/// Inference backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InferenceConfig {
    pub base_url: String,
    /// Model used for the cheap tier (extraction, learning classification)
    pub fast_model: String,
    /// Model used for analysis, filtering and summarization
    pub standard_model: String,
    pub request_timeout_secs: u64,
}

/// Top-level assembly behaviour
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AssemblyConfig {
    pub default_max_tokens: usize,
    pub default_max_recent_turns: usize,
    /// When false, `Strategy::Auto` always takes the tiered path
    pub adaptive_enabled: bool,
}

/// Context fetcher limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Non-critical suggestions stop being fetched past this running total
    pub soft_ceiling_tokens: usize,
    pub results_per_query: usize,
}

/// Relevance filter sampling
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    pub samples_per_item: usize,
    pub snippet_chars: usize,
}

/// Conversation summarizer limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SummaryConfig {
    pub chunk_size: usize,
    pub max_summary_length: usize,
}

/// Feedback loop behaviour
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedbackConfig {
    /// Chance that a completed operation triggers a pruning evaluation
    pub prune_probability: f64,
    /// Run pruning every N completions instead of sampling (overrides probability)
    pub prune_every: Option<u32>,
    pub prune_min_observations: u64,
    pub usage_stats_capacity: usize,
    pub usage_stats_ttl_hours: u64,
    pub max_tracked_operations: usize,
    pub learning_bucket: String,
    pub similar_task_limit: usize,
}

/// Progressive enhancer behaviour
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EnhancerConfig {
    pub attempt_threshold: u32,
    pub agent_timeout_secs: u64,
    pub max_attempts: u32,
    pub task_prefix_chars: usize,
    pub pattern_bucket: String,
    /// Attempt counters kept at most; least recently touched go first
    pub max_tracked_tasks: usize,
    /// Attempt counters idle longer than this are forgotten
    pub attempt_ttl_secs: u64,
}

impl EnhancerConfig {
    /// Wall-clock limit for one agent run
    pub fn agent_timeout(&self) -> Duration {
        Duration::from_secs(self.agent_timeout_secs)
    }

    pub fn attempt_ttl(&self) -> Duration {
        Duration::from_secs(self.attempt_ttl_secs)
    }
}

/// Limits for the heuristic tiered builders
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TieredConfig {
    pub core_recent_turns: usize,
    pub core_memories: usize,
    pub core_rules: usize,
    pub full_recent_turns: usize,
    pub full_memories: usize,
    pub full_rules: usize,
    pub fragments_per_category: usize,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:11434".to_string(),
            fast_model: "qwen2.5:3b-instruct".to_string(),
            standard_model: "qwen2.5:7b-instruct".to_string(),
            request_timeout_secs: 60,
        }
    }
}

impl Default for AssemblyConfig {
    fn default() -> Self {
        Self {
            default_max_tokens: 30_000,
            default_max_recent_turns: 8,
            adaptive_enabled: true,
        }
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            soft_ceiling_tokens: 20_000,
            results_per_query: 5,
        }
    }
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            samples_per_item: 2,
            snippet_chars: 200,
        }
    }
}

impl Default for SummaryConfig {
    fn default() -> Self {
        Self {
            chunk_size: 8,
            max_summary_length: 2_000,
        }
    }
}

impl Default for FeedbackConfig {
    fn default() -> Self {
        Self {
            prune_probability: 0.1,
            prune_every: None,
            prune_min_observations: 10,
            usage_stats_capacity: 1_000,
            usage_stats_ttl_hours: 24 * 30,
            max_tracked_operations: 1_000,
            learning_bucket: "context_learning".to_string(),
            similar_task_limit: 5,
        }
    }
}

impl Default for EnhancerConfig {
    fn default() -> Self {
        Self {
            attempt_threshold: 2,
            agent_timeout_secs: 120,
            max_attempts: 3,
            task_prefix_chars: 50,
            pattern_bucket: "enhancement_patterns".to_string(),
            max_tracked_tasks: 1_000,
            attempt_ttl_secs: 3_600,
        }
    }
}

impl Default for TieredConfig {
    fn default() -> Self {
        Self {
            core_recent_turns: 3,
            core_memories: 5,
            core_rules: 10,
            full_recent_turns: 8,
            full_memories: 10,
            full_rules: 50,
            fragments_per_category: 3,
        }
    }
}

impl EngineConfig {
    /// Load configuration from file or use defaults
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        if let Some(config_path) = path {
            Self::load_from_file(&config_path)
        } else {
            Self::load_default()
        }
    }

    /// Load configuration from specific file
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ContextError::ConfigError(format!("Failed to read config: {}", e)))?;

        let config: EngineConfig = toml::from_str(&contents)
            .map_err(|e| ContextError::ConfigError(format!("Failed to parse config: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Load default configuration from standard location or use built-in defaults
    pub fn load_default() -> Result<Self> {
        if let Some(path) = Self::default_path() {
            if path.exists() {
                return Self::load_from_file(&path);
            }
        }

        Ok(EngineConfig::default())
    }

    /// Standard config location, if a home directory is known
    pub fn default_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".espressobot").join("context.toml"))
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.assembly.default_max_tokens == 0 {
            return Err(ContextError::ConfigError(
                "default_max_tokens must be greater than 0".to_string(),
            ));
        }

        if self.fetch.soft_ceiling_tokens == 0 {
            return Err(ContextError::ConfigError(
                "soft_ceiling_tokens must be greater than 0".to_string(),
            ));
        }

        if self.fetch.results_per_query == 0 {
            return Err(ContextError::ConfigError(
                "results_per_query must be greater than 0".to_string(),
            ));
        }

        if self.summary.chunk_size == 0 {
            return Err(ContextError::ConfigError(
                "chunk_size must be greater than 0".to_string(),
            ));
        }

        if self.summary.max_summary_length == 0 {
            return Err(ContextError::ConfigError(
                "max_summary_length must be greater than 0".to_string(),
            ));
        }

        if !(0.0..=1.0).contains(&self.feedback.prune_probability) {
            return Err(ContextError::ConfigError(
                "prune_probability must be between 0.0 and 1.0".to_string(),
            ));
        }

        if self.feedback.prune_every == Some(0) {
            return Err(ContextError::ConfigError(
                "prune_every must be greater than 0 when set".to_string(),
            ));
        }

        if self.feedback.usage_stats_capacity == 0 || self.feedback.max_tracked_operations == 0 {
            return Err(ContextError::ConfigError(
                "feedback capacities must be greater than 0".to_string(),
            ));
        }

        if self.enhancer.attempt_threshold == 0
            || self.enhancer.max_attempts == 0
            || self.enhancer.max_tracked_tasks == 0
        {
            return Err(ContextError::ConfigError(
                "enhancer attempt limits must be greater than 0".to_string(),
            ));
        }

        if self.enhancer.agent_timeout_secs == 0 {
            return Err(ContextError::ConfigError(
                "agent_timeout_secs must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| ContextError::ConfigError(format!("Failed to serialize config: {}", e)))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                ContextError::ConfigError(format!("Failed to create config dir: {}", e))
            })?;
        }

        std::fs::write(path, contents)
            .map_err(|e| ContextError::ConfigError(format!("Failed to write config: {}", e)))?;

        Ok(())
    }

    /// Age after which usage statistics are evicted
    pub fn usage_stats_ttl(&self) -> Duration {
        Duration::from_secs(self.feedback.usage_stats_ttl_hours.saturating_mul(3600))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.assembly.default_max_tokens, 30_000);
        assert_eq!(config.fetch.soft_ceiling_tokens, 20_000);
        assert_eq!(config.summary.chunk_size, 8);
        assert_eq!(config.enhancer.agent_timeout_secs, 120);
        assert!((config.feedback.prune_probability - 0.1).abs() < f64::EPSILON);
    }

    #[test]
    fn test_config_validation_success() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn test_config_validation_zero_tokens() {
        let mut config = EngineConfig::default();
        config.assembly.default_max_tokens = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_probability() {
        let mut config = EngineConfig::default();
        config.feedback.prune_probability = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_prune_every_zero() {
        let mut config = EngineConfig::default();
        config.feedback.prune_every = Some(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_tracked_tasks_zero() {
        let mut config = EngineConfig::default();
        config.enhancer.max_tracked_tasks = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_usage_stats_ttl_saturates() {
        let mut config = EngineConfig::default();
        assert_eq!(config.usage_stats_ttl(), Duration::from_secs(30 * 24 * 3600));
        config.feedback.usage_stats_ttl_hours = u64::MAX;
        assert_eq!(config.usage_stats_ttl(), Duration::from_secs(u64::MAX));
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: EngineConfig = toml::from_str(
            r#"
            [fetch]
            soft_ceiling_tokens = 5000
            "#,
        )
        .unwrap();
        assert_eq!(config.fetch.soft_ceiling_tokens, 5000);
        assert_eq!(config.fetch.results_per_query, 5);
        assert_eq!(config.summary.chunk_size, 8);
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("context.toml");

        let mut config = EngineConfig::default();
        config.tiered.core_memories = 7;
        config.save(&path).unwrap();

        let loaded = EngineConfig::load(Some(path)).unwrap();
        assert_eq!(loaded.tiered.core_memories, 7);
    }

    #[test]
    fn test_load_missing_file_errors() {
        let result = EngineConfig::load_from_file(Path::new("/nonexistent/context.toml"));
        assert!(matches!(result, Err(ContextError::ConfigError(_))));
    }
}
