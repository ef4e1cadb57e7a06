//! Completion provider trait.
//!
//! Defines the [`CompletionProvider`] contract the analysis and
//! conversation services depend on. Concrete providers (OpenAI-compatible
//! HTTP, disabled) live in the `repolens` app crate and are injected by
//! the composition root.

use async_trait::async_trait;
use thiserror::Error;

use crate::error::LensError;
use crate::models::ChatMessage;

/// Sampling options for a single completion request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompletionOptions {
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for CompletionOptions {
    fn default() -> Self {
        Self {
            temperature: 0.2,
            max_tokens: 2048,
        }
    }
}

/// Failure modes a provider must distinguish.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CompletionError {
    #[error("completion provider rate limited the request")]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("completion request timed out")]
    Timeout,

    #[error("completion provider unavailable: {0}")]
    Unavailable(String),
}

impl From<CompletionError> for LensError {
    fn from(err: CompletionError) -> Self {
        match err {
            CompletionError::RateLimited { retry_after_secs } => {
                LensError::RateLimited { retry_after_secs }
            }
            CompletionError::Timeout => {
                LensError::UpstreamUnavailable("completion request timed out".to_string())
            }
            CompletionError::Unavailable(reason) => LensError::UpstreamUnavailable(reason),
        }
    }
}

/// A text-completion backend.
///
/// Implementations must be `Send + Sync`; one instance is shared by all
/// services for the lifetime of the process.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Returns the model identifier (e.g. `"gpt-4o-mini"`).
    fn model_name(&self) -> &str;

    /// Complete a conversation and return the assistant's text.
    async fn complete(
        &self,
        messages: &[ChatMessage],
        options: CompletionOptions,
    ) -> Result<String, CompletionError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_mapping() {
        let err: LensError = CompletionError::RateLimited {
            retry_after_secs: Some(5),
        }
        .into();
        assert!(matches!(
            err,
            LensError::RateLimited {
                retry_after_secs: Some(5)
            }
        ));

        let err: LensError = CompletionError::Timeout.into();
        assert!(matches!(err, LensError::UpstreamUnavailable(_)));
    }
}
