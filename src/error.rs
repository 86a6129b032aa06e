// src/error.rs
//! Failure taxonomy of the pipeline. Provider and extraction failures are recovered
//! locally by the phase that hits them; auth and publication failures surface to the caller.

use std::time::Duration;

use uuid::Uuid;

pub type Result<T> = std::result::Result<T, PipelineError>;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// A search provider call failed or returned malformed data.
    #[error("provider {provider} failed: {message}")]
    Provider {
        provider: &'static str,
        message: String,
    },

    /// Provider answered 429.
    #[error("provider {provider} is rate limited")]
    RateLimited { provider: &'static str },

    /// The LLM answered, but not with the required JSON contract.
    #[error("extraction response rejected: {0}")]
    ExtractionParse(String),

    /// The LLM could not be reached (all models exhausted).
    #[error("llm request failed: {0}")]
    Llm(String),

    #[error("{what} timed out after {after:?}")]
    Timeout { what: String, after: Duration },

    #[error("unauthorized")]
    Auth,

    /// The staged → published flip failed; nothing of the batch became visible.
    #[error("publication failed: {0}")]
    Publication(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("entry not found: {0}")]
    NotFound(Uuid),

    #[error("configuration error: {0}")]
    Config(String),
}

impl PipelineError {
    pub fn provider(provider: &'static str, message: impl Into<String>) -> Self {
        PipelineError::Provider {
            provider,
            message: message.into(),
        }
    }

    /// True for failures that are isolated to one item/provider and must not abort a phase.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            PipelineError::Provider { .. }
                | PipelineError::RateLimited { .. }
                | PipelineError::ExtractionParse(_)
                | PipelineError::Llm(_)
                | PipelineError::Timeout { .. }
        )
    }
}

#[cfg(feature = "postgres")]
impl From<sqlx::Error> for PipelineError {
    fn from(e: sqlx::Error) -> Self {
        PipelineError::Store(e.to_string())
    }
}

/// Bound any external call by `after`; a timeout becomes a recoverable error.
pub async fn with_timeout<T, F>(what: impl Into<String>, after: Duration, fut: F) -> Result<T>
where
    F: std::future::Future<Output = Result<T>>,
{
    match tokio::time::timeout(after, fut).await {
        Ok(res) => res,
        Err(_) => Err(PipelineError::Timeout {
            what: what.into(),
            after,
        }),
    }
}
