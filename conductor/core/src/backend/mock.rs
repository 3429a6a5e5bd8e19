//! Scripted Mock Provider
//!
//! Provider adapter for tests, demos and offline runs. Each model gets a
//! scripted behaviour (respond, fail N times, fail always, hang, delay or an
//! arbitrary closure) and every call is captured for verification.
//!
//! # Usage
//!
//! ```ignore
//! use model_conductor::backend::{MockBehavior, MockProvider, ProviderError};
//!
//! let provider = MockProvider::new()
//!     .with_model("fast", MockBehavior::respond("pong"))
//!     .with_model("flaky", MockBehavior::fail_times(1, ProviderError::Transient("blip".into()), MockBehavior::Echo))
//!     .with_model("dead", MockBehavior::Hang);
//!
//! // After the run, verify which models were called
//! assert_eq!(provider.call_count("flaky"), 2);
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::traits::{ProviderAdapter, ProviderError, ProviderParams, ProviderResponse};
use crate::routing::cost::estimate_tokens;

/// Closure behaviour: sees the captured request, returns text or an error
pub type ScriptFn = Arc<dyn Fn(&MockRequest) -> Result<String, ProviderError> + Send + Sync>;

/// Scripted behaviour for one model
#[derive(Clone)]
pub enum MockBehavior {
    /// Always answer with this text
    Respond(String),
    /// Answer with "<model>: <prompt>"
    Echo,
    /// Fail the first `times` calls, then behave as `then`
    FailTimes {
        /// Calls that fail
        times: u32,
        /// Error returned while failing
        error: ProviderError,
        /// Behaviour afterwards
        then: Box<MockBehavior>,
    },
    /// Fail every call
    FailAlways(ProviderError),
    /// Never resolve; only a deadline ends the call
    Hang,
    /// Wait, then behave as `then`
    Delay {
        /// Simulated latency
        delay: Duration,
        /// Behaviour after the delay
        then: Box<MockBehavior>,
    },
    /// Compute the answer from the request
    Script(ScriptFn),
}

impl MockBehavior {
    /// Fixed answer
    pub fn respond(text: impl Into<String>) -> Self {
        Self::Respond(text.into())
    }

    /// Fail `times` calls first
    pub fn fail_times(times: u32, error: ProviderError, then: MockBehavior) -> Self {
        Self::FailTimes {
            times,
            error,
            then: Box::new(then),
        }
    }

    /// Delay before `then`
    pub fn delayed(delay: Duration, then: MockBehavior) -> Self {
        Self::Delay {
            delay,
            then: Box::new(then),
        }
    }

    /// Closure behaviour
    pub fn script<F>(f: F) -> Self
    where
        F: Fn(&MockRequest) -> Result<String, ProviderError> + Send + Sync + 'static,
    {
        Self::Script(Arc::new(f))
    }
}

impl std::fmt::Debug for MockBehavior {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Respond(text) => f.debug_tuple("Respond").field(text).finish(),
            Self::Echo => f.write_str("Echo"),
            Self::FailTimes { times, error, then } => f
                .debug_struct("FailTimes")
                .field("times", times)
                .field("error", error)
                .field("then", then)
                .finish(),
            Self::FailAlways(error) => f.debug_tuple("FailAlways").field(error).finish(),
            Self::Hang => f.write_str("Hang"),
            Self::Delay { delay, then } => f
                .debug_struct("Delay")
                .field("delay", delay)
                .field("then", then)
                .finish(),
            Self::Script(_) => f.write_str("Script(..)"),
        }
    }
}

/// Captured request for test verification
#[derive(Clone, Debug, PartialEq)]
pub struct MockRequest {
    /// Model that received the request
    pub model: String,
    /// The prompt sent to the model
    pub prompt: String,
    /// Temperature forwarded by the caller
    pub temperature: Option<f32>,
    /// 1-based call number for this model
    pub call_number: u32,
}

/// Mock provider supporting per-model scripts
#[derive(Debug)]
pub struct MockProvider {
    name: String,
    behaviors: Mutex<HashMap<String, MockBehavior>>,
    default_behavior: MockBehavior,
    request_history: Mutex<Vec<MockRequest>>,
    request_counts: Mutex<HashMap<String, u32>>,
}

impl MockProvider {
    /// Create a provider named "mock" that echoes for unknown models
    #[must_use]
    pub fn new() -> Self {
        Self::named("mock")
    }

    /// Create a provider with a custom adapter name
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            behaviors: Mutex::new(HashMap::new()),
            default_behavior: MockBehavior::Echo,
            request_history: Mutex::new(Vec::new()),
            request_counts: Mutex::new(HashMap::new()),
        }
    }

    /// Script a model
    #[must_use]
    pub fn with_model(self, model_id: impl Into<String>, behavior: MockBehavior) -> Self {
        self.behaviors.lock().insert(model_id.into(), behavior);
        self
    }

    /// Behaviour for models without a script
    #[must_use]
    pub fn with_default(mut self, behavior: MockBehavior) -> Self {
        self.default_behavior = behavior;
        self
    }

    /// Re-script a model at runtime
    pub fn set_behavior(&self, model_id: impl Into<String>, behavior: MockBehavior) {
        self.behaviors.lock().insert(model_id.into(), behavior);
    }

    /// Calls received by a model
    #[must_use]
    pub fn call_count(&self, model_id: &str) -> u32 {
        self.request_counts
            .lock()
            .get(model_id)
            .copied()
            .unwrap_or(0)
    }

    /// Calls received across all models
    #[must_use]
    pub fn total_calls(&self) -> usize {
        self.request_history.lock().len()
    }

    /// Every captured request, in arrival order
    #[must_use]
    pub fn history(&self) -> Vec<MockRequest> {
        self.request_history.lock().clone()
    }

    /// Prompts a model received, in arrival order
    #[must_use]
    pub fn prompts_for(&self, model_id: &str) -> Vec<String> {
        self.request_history
            .lock()
            .iter()
            .filter(|r| r.model == model_id)
            .map(|r| r.prompt.clone())
            .collect()
    }

    /// Forget history and counts
    pub fn clear_history(&self) {
        self.request_history.lock().clear();
        self.request_counts.lock().clear();
    }
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProviderAdapter for MockProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn call(
        &self,
        model_id: &str,
        prompt: &str,
        params: &ProviderParams,
    ) -> Result<ProviderResponse, ProviderError> {
        let start = tokio::time::Instant::now();
        let call_number = {
            let mut counts = self.request_counts.lock();
            let count = counts.entry(model_id.to_string()).or_insert(0);
            *count += 1;
            *count
        };
        let request = MockRequest {
            model: model_id.to_string(),
            prompt: prompt.to_string(),
            temperature: params.temperature,
            call_number,
        };
        self.request_history.lock().push(request.clone());

        let mut behavior = self
            .behaviors
            .lock()
            .get(model_id)
            .cloned()
            .unwrap_or_else(|| self.default_behavior.clone());

        let text = loop {
            match behavior {
                MockBehavior::Respond(text) => break text,
                MockBehavior::Echo => break format!("{model_id}: {prompt}"),
                MockBehavior::FailTimes { times, error, then } => {
                    if call_number <= times {
                        return Err(error);
                    }
                    behavior = *then;
                }
                MockBehavior::FailAlways(error) => return Err(error),
                MockBehavior::Hang => {
                    return futures::future::pending().await;
                }
                MockBehavior::Delay { delay, then } => {
                    // Simulated provider latency
                    tokio::time::sleep(delay).await;
                    behavior = *then;
                }
                MockBehavior::Script(script) => break script(&request)?,
            }
        };

        Ok(ProviderResponse {
            input_tokens: estimate_tokens(prompt),
            output_tokens: estimate_tokens(&text),
            text,
            latency: start.elapsed(),
        })
    }
}
