//! Telemetry for the context pipeline
//!
//! Collects typed pipeline events and running counters, and installs the
//! `tracing` subscriber used for log output.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use tracing_subscriber::EnvFilter;

/// Events kept in memory; older ones are discarded, counters are not
const MAX_EVENTS: usize = 10_000;

/// Pipeline event types
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    StageCompleted {
        stage: &'static str,
        duration_ms: u64,
        timestamp: Instant,
    },
    StageDegraded {
        stage: &'static str,
        reason: String,
        timestamp: Instant,
    },
    FetchItemFailed {
        key: String,
        timestamp: Instant,
    },
    BudgetTruncation {
        before_tokens: usize,
        after_tokens: usize,
        dropped_items: usize,
        timestamp: Instant,
    },
    ChunkSummarized {
        messages: usize,
        fallback: bool,
        timestamp: Instant,
    },
    FeedbackRecorded {
        efficiency: f64,
        timestamp: Instant,
    },
    EnhancementTriggered {
        queries: usize,
        from_learned_pattern: bool,
        timestamp: Instant,
    },
    BackgroundTaskFailed {
        task: String,
        timestamp: Instant,
    },
}

/// Telemetry statistics
#[derive(Debug, Clone, Default)]
pub struct PipelineStats {
    pub stages_completed: usize,
    pub stages_degraded: usize,
    pub fetch_failures: usize,
    pub truncations: usize,
    pub chunks_summarized: usize,
    pub chunk_fallbacks: usize,
    pub feedback_records: usize,
    pub enhancements: usize,
    pub background_failures: usize,
}

/// Telemetry collector
#[derive(Clone)]
pub struct TelemetryCollector {
    events: Arc<Mutex<Vec<PipelineEvent>>>,
    stats: Arc<Mutex<PipelineStats>>,
    start_time: Instant,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // A panic while holding the lock leaves counters usable
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl TelemetryCollector {
    /// Create a new telemetry collector
    pub fn new() -> Self {
        Self {
            events: Arc::new(Mutex::new(Vec::new())),
            stats: Arc::new(Mutex::new(PipelineStats::default())),
            start_time: Instant::now(),
        }
    }

    /// Record an event
    pub fn record(&self, event: PipelineEvent) {
        {
            let mut stats = lock(&self.stats);
            match &event {
                PipelineEvent::StageCompleted { .. } => stats.stages_completed += 1,
                PipelineEvent::StageDegraded { .. } => stats.stages_degraded += 1,
                PipelineEvent::FetchItemFailed { .. } => stats.fetch_failures += 1,
                PipelineEvent::BudgetTruncation { .. } => stats.truncations += 1,
                PipelineEvent::ChunkSummarized { fallback, .. } => {
                    stats.chunks_summarized += 1;
                    if *fallback {
                        stats.chunk_fallbacks += 1;
                    }
                }
                PipelineEvent::FeedbackRecorded { .. } => stats.feedback_records += 1,
                PipelineEvent::EnhancementTriggered { .. } => stats.enhancements += 1,
                PipelineEvent::BackgroundTaskFailed { .. } => stats.background_failures += 1,
            }
        }

        let mut events = lock(&self.events);
        if events.len() >= MAX_EVENTS {
            let excess = events.len() + 1 - MAX_EVENTS;
            events.drain(..excess);
        }
        events.push(event);
    }

    /// Shorthand for a completed stage timed from `started`
    pub fn stage_completed(&self, stage: &'static str, started: Instant) {
        self.record(PipelineEvent::StageCompleted {
            stage,
            duration_ms: started.elapsed().as_millis() as u64,
            timestamp: Instant::now(),
        });
    }

    /// Shorthand for a stage that fell back to its degraded result
    pub fn stage_degraded(&self, stage: &'static str, reason: impl Into<String>) {
        self.record(PipelineEvent::StageDegraded {
            stage,
            reason: reason.into(),
            timestamp: Instant::now(),
        });
    }

    /// Get current statistics
    pub fn get_stats(&self) -> PipelineStats {
        lock(&self.stats).clone()
    }

    /// Get elapsed time since start
    pub fn elapsed(&self) -> std::time::Duration {
        self.start_time.elapsed()
    }

    /// Get event count
    pub fn event_count(&self) -> usize {
        lock(&self.events).len()
    }

    /// Get recent events (last n)
    pub fn recent_events(&self, n: usize) -> Vec<PipelineEvent> {
        let events = lock(&self.events);
        let start = events.len().saturating_sub(n);
        events[start..].to_vec()
    }

    /// Share of stage outcomes that had to degrade
    pub fn degraded_rate(&self) -> f64 {
        let stats = lock(&self.stats);
        let total = stats.stages_completed + stats.stages_degraded;
        if total == 0 {
            0.0
        } else {
            stats.stages_degraded as f64 / total as f64
        }
    }
}

impl Default for TelemetryCollector {
    fn default() -> Self {
        Self::new()
    }
}

/// Install a global `tracing` subscriber.
///
/// `filter` follows `EnvFilter` syntax; `RUST_LOG` wins when set. Calling
/// this twice is harmless.
pub fn init_logging(filter: &str) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .try_init();
}
