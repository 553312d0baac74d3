//! Context fetching
//!
//! Each [`ContextSource`](crate::needs::ContextSource) maps to a registered
//! [`SourceResolver`]. Memory and rules are backed by the collaborator
//! stores; the remaining sources are registered as no-ops until something
//! real is plugged in.

pub mod fetcher;
pub mod resolvers;
pub mod types;

pub use fetcher::ContextFetcher;
pub use resolvers::{MemoryResolver, NoopResolver, RulesResolver, SourceResolver};
pub use types::{total_tokens, ContextMap, FetchResult, FetchedContextItem};
