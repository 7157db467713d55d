//! Error types for the security pipeline.

use thiserror::Error;

/// Result type alias for pipeline operations.
pub type Result<T> = std::result::Result<T, GatewayError>;

/// Errors surfaced by the pipeline.
///
/// User-input problems (oversized prompts) and remote-dependency failures are
/// recovered inside the pipeline and never appear here; this enum covers the
/// configuration and I/O failures that must reach the caller.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Requested policy id is not in the catalog. Fatal for the call: the
    /// deployment is misconfigured, not the input.
    #[error("policy not found: {0}")]
    PolicyNotFound(String),

    /// A configured blocked pattern failed to compile.
    #[error("invalid blocked pattern {pattern:?}: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    /// Deep analysis was requested but no analyzer is wired in.
    #[error("deep analysis requested but no guardian analyzer is configured")]
    AnalyzerUnavailable,

    /// Remote threat scorer returned an unusable response.
    #[error("threat scorer error: {0}")]
    Scorer(String),

    /// Completion model call failed or returned an unusable response.
    #[error("completion model error: {0}")]
    Model(String),

    /// Configuration could not be loaded or is inconsistent.
    #[error("configuration error: {0}")]
    Config(String),

    /// HTTP transport error from an external call.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON (de)serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Filesystem error (config files, audit logs).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
