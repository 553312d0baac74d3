//! Error types for the context engine
//!
//! Every pipeline stage has its own failure variant so callers can log the
//! stage that degraded. None of these escape the public assembly entry
//! points; they are recovered into degraded results at the stage boundary.

use thiserror::Error;

/// Main error type for the context engine
#[derive(Error, Debug)]
pub enum ContextError {
    /// Intent extraction produced nothing usable
    #[error("Intent extraction failed for task {task:?}: {reason}")]
    ExtractionFailed { task: String, reason: String },

    /// Context need analysis failed
    #[error("Context need analysis failed: {0}")]
    AnalysisFailed(String),

    /// Relevance filtering failed
    #[error("Relevance filter failed: {0}")]
    FilterFailed(String),

    /// Conversation summarization failed
    #[error("Summarization failed: {0}")]
    SummarizationFailed(String),

    /// A single suggestion could not be fetched
    #[error("Fetching context item {key:?} failed: {reason}")]
    FetchItemFailed { key: String, reason: String },

    /// The inference backend returned an error
    #[error("Inference error: {0}")]
    Inference(String),

    /// The inference backend answered, but not with the expected shape
    #[error("Invalid model output: {0}")]
    InvalidModelOutput(String),

    /// A collaborator store failed
    #[error("Store error: {0}")]
    Store(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Timeout errors
    #[error("Operation timed out after {duration_ms}ms")]
    Timeout { duration_ms: u64 },

    /// HTTP client errors
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic errors with context
    #[error("Context engine error: {0}")]
    Generic(String),
}

impl ContextError {
    /// Short stable label used in telemetry and log fields
    pub fn kind(&self) -> &'static str {
        match self {
            ContextError::ExtractionFailed { .. } => "extraction_failed",
            ContextError::AnalysisFailed(_) => "analysis_failed",
            ContextError::FilterFailed(_) => "filter_failed",
            ContextError::SummarizationFailed(_) => "summarization_failed",
            ContextError::FetchItemFailed { .. } => "fetch_item_failed",
            ContextError::Inference(_) => "inference",
            ContextError::InvalidModelOutput(_) => "invalid_model_output",
            ContextError::Store(_) => "store",
            ContextError::ConfigError(_) => "config",
            ContextError::Timeout { .. } => "timeout",
            ContextError::Http(_) => "http",
            ContextError::Serialization(_) => "serialization",
            ContextError::Io(_) => "io",
            ContextError::Generic(_) => "generic",
        }
    }
}

/// Result type alias for context engine operations
pub type Result<T> = std::result::Result<T, ContextError>;

/// Convert anyhow errors to ContextError
impl From<anyhow::Error> for ContextError {
    fn from(err: anyhow::Error) -> Self {
        ContextError::Generic(err.to_string())
    }
}
