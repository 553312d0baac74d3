//! Suggestion fetcher
//!
//! Walks the analyzer's suggestions in order, resolving each against the
//! resolver registered for its source. A failing suggestion is skipped; it
//! never aborts its siblings.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use crate::config::FetchConfig;
use crate::context::counter::TokenCounter;
use crate::errors::ContextError;
use crate::fetch::resolvers::{MemoryResolver, NoopResolver, RulesResolver, SourceResolver};
use crate::fetch::types::{ContextMap, FetchResult, FetchedContextItem};
use crate::needs::types::{ContextSource, ContextSuggestion};
use crate::store::{FragmentStore, MemoryStore};
use crate::telemetry::{PipelineEvent, TelemetryCollector};

/// Executes context suggestions under a soft token ceiling
#[derive(Clone)]
pub struct ContextFetcher {
    resolvers: HashMap<ContextSource, Arc<dyn SourceResolver>>,
    config: FetchConfig,
    counter: TokenCounter,
    telemetry: TelemetryCollector,
}

impl ContextFetcher {
    /// Fetcher with memory and rules resolvers; every other source no-ops
    pub fn new(
        memory: Arc<dyn MemoryStore>,
        fragments: Arc<dyn FragmentStore>,
        config: FetchConfig,
        telemetry: TelemetryCollector,
    ) -> Self {
        let mut resolvers: HashMap<ContextSource, Arc<dyn SourceResolver>> = HashMap::new();
        for source in ContextSource::ALL {
            resolvers.insert(source, Arc::new(NoopResolver));
        }
        resolvers.insert(ContextSource::Memory, Arc::new(MemoryResolver::new(memory)));
        resolvers.insert(ContextSource::Rules, Arc::new(RulesResolver::new(fragments)));

        Self {
            resolvers,
            config,
            counter: TokenCounter::new(),
            telemetry,
        }
    }

    /// Replace the resolver for `source`
    pub fn register(&mut self, source: ContextSource, resolver: Arc<dyn SourceResolver>) {
        self.resolvers.insert(source, resolver);
    }

    pub fn with_resolver(mut self, source: ContextSource, resolver: Arc<dyn SourceResolver>) -> Self {
        self.register(source, resolver);
        self
    }

    /// Fetch every suggestion in order.
    ///
    /// Once the running total passes the soft ceiling only critical
    /// suggestions are still attempted. Never fails.
    pub async fn fetch(&self, suggestions: &[ContextSuggestion], user_id: &str) -> FetchResult {
        let started = Instant::now();
        let mut context = ContextMap::new();
        let mut total_tokens = 0usize;

        for suggestion in suggestions {
            let key = suggestion.description.clone();

            if context.contains_key(&key) {
                tracing::debug!(%key, "duplicate suggestion, keeping first");
                continue;
            }

            if total_tokens > self.config.soft_ceiling_tokens && !suggestion.priority.is_critical() {
                tracing::debug!(
                    %key,
                    total_tokens,
                    ceiling = self.config.soft_ceiling_tokens,
                    "soft ceiling reached, skipping non-critical suggestion"
                );
                continue;
            }

            let Some(resolver) = self.resolvers.get(&suggestion.source) else {
                tracing::warn!(%key, source = suggestion.source.as_str(), "no resolver registered");
                continue;
            };

            let results = match resolver
                .resolve(suggestion, user_id, self.config.results_per_query)
                .await
            {
                Ok(results) => results,
                Err(e) => {
                    let err = ContextError::FetchItemFailed {
                        key: key.clone(),
                        reason: e.to_string(),
                    };
                    tracing::warn!(error = %err, "skipping suggestion");
                    self.telemetry.record(PipelineEvent::FetchItemFailed {
                        key,
                        timestamp: Instant::now(),
                    });
                    continue;
                }
            };

            if results.is_empty() {
                continue;
            }

            let token_count = self.counter.estimate_serialized(&results);
            total_tokens += token_count;
            context.insert(
                key,
                FetchedContextItem {
                    priority: suggestion.priority,
                    source: suggestion.source,
                    results,
                    token_count,
                },
            );
        }

        tracing::debug!(items = context.len(), total_tokens, "context fetched");
        self.telemetry.stage_completed("fetch", started);
        FetchResult {
            context,
            total_tokens,
        }
    }
}
