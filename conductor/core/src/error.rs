//! Error Types
//!
//! Failure taxonomy shared by the router, the invocation primitive and the
//! orchestrator. Provider-level failures are classified into an [`ErrorKind`];
//! only total exhaustion or an upfront constraint violation surfaces to the
//! caller as an [`OrchestrationError`].

use std::fmt;

use serde::Serialize;
use thiserror::Error;

/// Classification of a failed provider call
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Network hiccup, 5xx, or deadline expiry. Retried locally.
    Transient,
    /// Provider throttled the call. Retried, honoring the provider delay.
    RateLimited,
    /// Provider refused the content. Never retried, surfaced verbatim.
    ContentPolicy,
    /// Bad request, unknown model, auth failure. Never retried.
    Permanent,
}

impl ErrorKind {
    /// Whether the invocation primitive may retry this failure on the same model
    #[must_use]
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::Transient | Self::RateLimited)
    }

    /// Stable lowercase name, used in logs and metrics labels
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Transient => "transient",
            Self::RateLimited => "rate_limited",
            Self::ContentPolicy => "content_policy",
            Self::Permanent => "permanent",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified failure attributed to one model
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ModelFailure {
    /// Model that failed
    pub model_id: String,
    /// Failure classification
    pub kind: ErrorKind,
    /// Provider message (verbatim)
    pub message: String,
}

impl ModelFailure {
    /// Create a new failure record
    pub fn new(model_id: impl Into<String>, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            model_id: model_id.into(),
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for ModelFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}): {}", self.model_id, self.kind, self.message)
    }
}

fn summarize(failures: &[ModelFailure]) -> String {
    if failures.is_empty() {
        return "no models were attempted".to_string();
    }
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Errors surfaced by `ask` and `orchestrate`
#[derive(Debug, Error)]
pub enum OrchestrationError {
    /// No candidate fits the remaining budget. Raised before any provider call.
    #[error(
        "budget exceeded: ${ceiling:.6} available, cheapest candidate estimated at ${cheapest_estimate:.6}"
    )]
    BudgetExceeded {
        /// Budget remaining at selection time
        ceiling: f64,
        /// Lowest estimated cost among the candidates
        cheapest_estimate: f64,
    },

    /// Every model in the fallback chain was exhausted
    #[error("all models failed: {}", summarize(.failures))]
    AllModelsFailed {
        /// One entry per model that was tried
        failures: Vec<ModelFailure>,
    },

    /// A provider refused the prompt; the message is the provider's own
    #[error("content policy violation from {model_id}: {message}")]
    ContentPolicy {
        /// Model that refused
        model_id: String,
        /// Provider message, verbatim
        message: String,
    },

    /// A model override named a model that is not registered
    #[error("model not found: {0}")]
    ModelNotFound(String),

    /// The registry holds no model satisfying the request's constraints
    #[error("no candidate models: {reason}")]
    NoCandidates {
        /// Which constraint emptied the candidate set
        reason: String,
    },

    /// Malformed request or options
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl OrchestrationError {
    /// Build the error for an exhausted fallback chain. A chain that ended on
    /// a content policy refusal reports that refusal verbatim.
    #[must_use]
    pub fn from_failures(failures: Vec<ModelFailure>) -> Self {
        match failures.last() {
            Some(last) if last.kind == ErrorKind::ContentPolicy => Self::ContentPolicy {
                model_id: last.model_id.clone(),
                message: last.message.clone(),
            },
            _ => Self::AllModelsFailed { failures },
        }
    }
}

/// Result alias for orchestration calls
pub type Result<T> = std::result::Result<T, OrchestrationError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_kinds() {
        assert!(ErrorKind::Transient.is_retryable());
        assert!(ErrorKind::RateLimited.is_retryable());
        assert!(!ErrorKind::ContentPolicy.is_retryable());
        assert!(!ErrorKind::Permanent.is_retryable());
    }

    #[test]
    fn test_all_models_failed_message_lists_each_model() {
        let err = OrchestrationError::AllModelsFailed {
            failures: vec![
                ModelFailure::new("a", ErrorKind::Transient, "timed out"),
                ModelFailure::new("b", ErrorKind::Permanent, "unknown model"),
            ],
        };
        let text = err.to_string();
        assert!(text.contains("a (transient): timed out"));
        assert!(text.contains("b (permanent): unknown model"));
    }

    #[test]
    fn test_single_refusal_is_surfaced_verbatim() {
        let err = OrchestrationError::from_failures(vec![ModelFailure::new(
            "a",
            ErrorKind::ContentPolicy,
            "request blocked by safety filter",
        )]);
        match err {
            OrchestrationError::ContentPolicy { model_id, message } => {
                assert_eq!(model_id, "a");
                assert_eq!(message, "request blocked by safety filter");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
