//! Relevance filtering of fetched context
//!
//! A standard-tier pass that discards items which only matched on keywords.
//! Fails open: availability wins over precision.

pub mod relevance;

pub use relevance::{apply_decisions, RelevanceDecision, RelevanceFilter};
