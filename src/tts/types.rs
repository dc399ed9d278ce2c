// src/tts/types.rs
// Synthesis error definitions

use crate::audio::DecodeError;
use thiserror::Error;

/// Synthesis error types with retry classification
#[derive(Debug, Error)]
pub enum SynthesisError {
    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Request timeout")]
    TimeoutError,

    #[error("Rate limit exceeded")]
    RateLimitError,

    #[error("Engine temporarily unavailable: {0}")]
    EngineUnavailable(String),

    #[error("Text rejected by engine: {0}")]
    TextRejected(String),

    #[error("Invalid audio: {0}")]
    InvalidAudio(String),

    #[error("Engine error: {0}")]
    EngineError(String),
}

impl SynthesisError {
    /// Returns true if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SynthesisError::NetworkError(_)
                | SynthesisError::TimeoutError
                | SynthesisError::RateLimitError
                | SynthesisError::EngineUnavailable(_)
        )
    }
}

impl From<DecodeError> for SynthesisError {
    fn from(err: DecodeError) -> Self {
        SynthesisError::InvalidAudio(err.to_string())
    }
}
