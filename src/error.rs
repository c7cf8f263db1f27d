use std::time::Duration;

use thiserror::Error;

/// Failure of a single call to the external generation model.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("request to generation service failed: {0}")]
    Transport(String),

    #[error("generation service returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("generation service returned no text")]
    EmptyResponse,

    #[error("could not parse generation service response: {0}")]
    Malformed(String),

    #[error("generation service did not answer within {0:?}")]
    Timeout(Duration),
}

#[derive(Debug, Error)]
pub enum DiagramError {
    /// No API credential could be resolved. Nothing was sent.
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error(transparent)]
    Generation(#[from] GenerationError),

    /// Rejected before any network call.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl DiagramError {
    /// Stable machine-readable tag used in API error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            DiagramError::Configuration(_) => "configuration",
            DiagramError::Generation(_) => "generation",
            DiagramError::InvalidRequest(_) => "invalid_request",
        }
    }
}
