//! Provider Adapter Traits
//!
//! Trait definitions for model providers. This abstraction lets the
//! invocation primitive call Ollama, hosted APIs or a scripted mock without
//! changing routing or orchestration logic.
//!
//! # Design Philosophy
//!
//! A provider does exactly one thing: send a prompt to a named model and
//! return the text plus token counts, or fail with a *classified* error.
//! Retry, timeout and fallback policy live in the invocation primitive, so
//! adapters never retry on their own.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::error::ErrorKind;

/// Per-call parameters forwarded to the provider
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ProviderParams {
    /// Temperature (provider default when `None`)
    pub temperature: Option<f32>,
    /// Maximum tokens in response (provider default when `None`)
    pub max_tokens: Option<u32>,
    /// System prompt (optional, prepended to the prompt)
    pub system: Option<String>,
}

impl ProviderParams {
    /// Set temperature
    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Set max tokens
    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Set system prompt
    #[must_use]
    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }
}

/// Successful provider response
#[derive(Clone, Debug, PartialEq)]
pub struct ProviderResponse {
    /// The response text
    pub text: String,
    /// Prompt tokens billed
    pub input_tokens: u32,
    /// Completion tokens billed
    pub output_tokens: u32,
    /// Provider-measured latency
    pub latency: Duration,
}

/// Classified provider failure
#[derive(Clone, Debug, PartialEq, Error)]
pub enum ProviderError {
    /// Connection failure, 5xx, or timeout
    #[error("transient provider error: {0}")]
    Transient(String),

    /// Throttled; `retry_after` is the provider's requested delay
    #[error("rate limited: {message}")]
    RateLimited {
        /// Provider message
        message: String,
        /// Provider-supplied delay, if any
        retry_after: Option<Duration>,
    },

    /// Refused on content grounds
    #[error("{0}")]
    ContentPolicy(String),

    /// Not retryable on this model
    #[error("permanent provider error: {0}")]
    Permanent(String),
}

impl ProviderError {
    /// Classification
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Transient(_) => ErrorKind::Transient,
            Self::RateLimited { .. } => ErrorKind::RateLimited,
            Self::ContentPolicy(_) => ErrorKind::ContentPolicy,
            Self::Permanent(_) => ErrorKind::Permanent,
        }
    }

    /// Provider message without the classification prefix
    #[must_use]
    pub fn message(&self) -> &str {
        match self {
            Self::Transient(m) | Self::ContentPolicy(m) | Self::Permanent(m) => m,
            Self::RateLimited { message, .. } => message,
        }
    }

    /// Provider-requested delay for rate limits
    #[must_use]
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

/// Provider adapter trait
///
/// Implement this trait to add support for a model provider. The registry's
/// `ModelDescriptor::provider` names the adapter that serves each model.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Get the provider name (e.g., "ollama", "mock")
    fn name(&self) -> &str;

    /// Send one prompt to one model
    async fn call(
        &self,
        model_id: &str,
        prompt: &str,
        params: &ProviderParams,
    ) -> Result<ProviderResponse, ProviderError>;

    /// Check if the provider is reachable
    async fn health_check(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        let limited = ProviderError::RateLimited {
            message: "slow down".to_string(),
            retry_after: Some(Duration::from_secs(2)),
        };
        assert_eq!(limited.kind(), ErrorKind::RateLimited);
        assert_eq!(limited.retry_after(), Some(Duration::from_secs(2)));
        assert_eq!(limited.message(), "slow down");

        let refusal = ProviderError::ContentPolicy("blocked by safety system".to_string());
        assert_eq!(refusal.kind(), ErrorKind::ContentPolicy);
        // Refusals display verbatim
        assert_eq!(refusal.to_string(), "blocked by safety system");
        assert_eq!(refusal.retry_after(), None);
    }

    #[test]
    fn test_params_builder() {
        let params = ProviderParams::default()
            .with_temperature(0.2)
            .with_max_tokens(64)
            .with_system("Be terse");
        assert_eq!(params.temperature, Some(0.2));
        assert_eq!(params.max_tokens, Some(64));
        assert_eq!(params.system.as_deref(), Some("Be terse"));
    }
}
