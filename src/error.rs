//! Hugin error types

use std::time::Duration;

/// Hugin error types
#[derive(Debug, thiserror::Error)]
pub enum HuginError {
    // Provider/network errors
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("provider call timed out after {0:?}")]
    Timeout(Duration),

    // Data errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Upstream payload did not have the expected shape.
    #[error("malformed provider payload: {0}")]
    Parse(String),

    // Configuration errors
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("unknown provider: {0}")]
    UnknownProvider(String),

    /// The provider exists but the prober has not marked it available.
    #[error("provider '{0}' is not available")]
    ProviderUnavailable(String),

    #[error("model '{model}' not found on provider '{provider}'")]
    ModelNotFound { provider: String, model: String },

    /// Usage or settings persistence failed.
    #[error("storage error: {0}")]
    Storage(String),

    // Boundary errors: the only ones `Router::generate_response` returns
    /// No provider is currently eligible to serve the request.
    #[error("no completion provider is available")]
    NoCandidates,

    /// Every candidate was attempted and failed.
    #[error("all {attempts} provider attempts failed; last error: {last}")]
    AllProvidersFailed {
        attempts: usize,
        last: Box<HuginError>,
    },
}

impl HuginError {
    /// Whether a failed call is worth repeating against the same provider.
    ///
    /// Transport failures, timeouts, rate limits and server errors are
    /// transient. Client errors and malformed payloads are not.
    pub fn is_transient(&self) -> bool {
        match self {
            HuginError::Http(_) | HuginError::Timeout(_) => true,
            HuginError::Api { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }

    /// Whether this error is allowed to cross the router boundary.
    pub fn is_boundary(&self) -> bool {
        matches!(
            self,
            HuginError::NoCandidates | HuginError::AllProvidersFailed { .. }
        )
    }
}

impl From<reqwest::Error> for HuginError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            HuginError::Parse(err.to_string())
        } else {
            HuginError::Http(err.to_string())
        }
    }
}

/// Result type alias for Hugin operations
pub type Result<T> = std::result::Result<T, HuginError>;
