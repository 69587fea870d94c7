//! Error types for the chat pipeline.
//!
//! Messages carry full diagnostics for logs. The HTTP layer maps each
//! variant to a fixed, generic user-facing text.

use thiserror::Error;

/// Failure while selecting chunks for a question.
#[derive(Debug, Error)]
pub enum RetrievalError {
    /// The embedding provider could not embed the question.
    #[error("Embedding error ({provider}): {message}")]
    Embedding { provider: String, message: String },

    /// A store query failed and no fallback was available.
    #[error("Storage error: {0}")]
    Storage(String),

    /// The configured policy needs a capability that is not enabled.
    #[error("Retrieval disabled: {0}")]
    Disabled(String),
}

impl RetrievalError {
    pub fn storage(err: anyhow::Error) -> Self {
        Self::Storage(format!("{err:#}"))
    }
}

/// Failure while asking the answer generator for prose.
#[derive(Debug, Error)]
pub enum GenerationError {
    /// Network failure or retries exhausted.
    #[error("Generation transport error: {0}")]
    Transport(String),

    /// The remote API answered with an error payload.
    #[error("Generation API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// The API answered without any text content.
    #[error("Generation returned no text")]
    EmptyResponse,

    /// Missing credentials or invalid generator settings.
    #[error("Generation configuration error: {0}")]
    Config(String),
}

/// Any failure of a full chat request.
#[derive(Debug, Error)]
pub enum ChatError {
    /// The request carried no usable question.
    #[error("Validation error: {0}")]
    Validation(String),

    #[error(transparent)]
    Retrieval(#[from] RetrievalError),

    #[error(transparent)]
    Generation(#[from] GenerationError),

    /// The pipeline exceeded the request deadline.
    #[error("Request timed out after {0} seconds")]
    Timeout(u64),
}
