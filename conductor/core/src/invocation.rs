//! Invocation Primitive
//!
//! The single choke point for remote model calls. Every strategy reaches a
//! provider only through [`Invoker::invoke`] / [`Invoker::invoke_with_fallback`],
//! so concurrency, retry, deadline and metrics behaviour is uniform.
//!
//! # Attempt lifecycle
//!
//! ```text
//! Pending --ok--> Succeeded
//!    |
//!    +--Transient/RateLimited, retries left, deadline allows--> Retrying(n) --...
//!    |
//!    +--ContentPolicy/Permanent, or retries/deadline exhausted--> FailedPermanent
//! ```
//!
//! A model that reaches `FailedPermanent` is never retried again for the
//! same call; `invoke_with_fallback` moves on to the next model in the chain.
//! Every attempt takes a slot from the global limiter and is recorded in the
//! performance monitor.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::time::Instant;

use crate::backend::{ProviderAdapter, ProviderError, ProviderParams, ProviderResponse};
use crate::context::OrchestrationContext;
use crate::error::{ErrorKind, ModelFailure, OrchestrationError, Result};
use crate::routing::{Budget, FallbackChain, InvocationConstraints, ModelDescriptor, RetryConfig};

// ============================================================================
// Options and Results
// ============================================================================

/// Per-call options
#[derive(Clone, Debug, Default)]
pub struct InvocationOptions {
    /// Temperature forwarded to the provider
    pub temperature: Option<f32>,
    /// Maximum response tokens
    pub max_tokens: Option<u32>,
    /// System prompt
    pub system: Option<String>,
    /// Calling tool, for tool metrics
    pub tool: Option<String>,
    /// Per-call timeout; the invoker's configured timeout when `None`
    pub timeout: Option<Duration>,
    /// Expected response length for budget reservations
    pub expected_output_tokens: Option<u32>,
}

impl InvocationOptions {
    /// Set temperature
    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Set timeout
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set calling tool
    #[must_use]
    pub fn with_tool(mut self, tool: impl Into<String>) -> Self {
        self.tool = Some(tool.into());
        self
    }

    fn params(&self) -> ProviderParams {
        ProviderParams {
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            system: self.system.clone(),
        }
    }
}

/// Failure detail carried by an unsuccessful result
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct InvocationError {
    /// Classification
    pub kind: ErrorKind,
    /// Provider message, verbatim
    pub message: String,
}

/// Outcome of one `invoke` call (all of its attempts on one model)
#[derive(Clone, Debug, Serialize)]
pub struct InvocationResult {
    /// Model used
    pub model_id: String,
    /// Response text (empty on failure)
    pub text: String,
    /// Prompt tokens billed
    pub input_tokens: u32,
    /// Completion tokens billed
    pub output_tokens: u32,
    /// Wall-clock time across all attempts, including backoff
    pub latency_ms: u64,
    /// Actual cost (zero on failure)
    pub cost: f64,
    /// Whether the call succeeded
    pub success: bool,
    /// Classified error if it failed
    pub error: Option<InvocationError>,
    /// Provider attempts made
    pub attempts: u32,
}

impl InvocationResult {
    fn failed(model_id: &str, kind: ErrorKind, message: String, elapsed: Duration, attempts: u32) -> Self {
        Self {
            model_id: model_id.to_string(),
            text: String::new(),
            input_tokens: 0,
            output_tokens: 0,
            latency_ms: duration_ms(elapsed),
            cost: 0.0,
            success: false,
            error: Some(InvocationError { kind, message }),
            attempts,
        }
    }

    /// The failure as a model-attributed record
    #[must_use]
    pub fn failure(&self) -> Option<ModelFailure> {
        self.error
            .as_ref()
            .map(|e| ModelFailure::new(&self.model_id, e.kind, &e.message))
    }

    /// Error classification, if failed
    #[must_use]
    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error.as_ref().map(|e| e.kind)
    }
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

/// Per-attempt state machine
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum AttemptState {
    /// First attempt not yet resolved
    Pending,
    /// Retry number `n` in progress
    Retrying(u32),
    /// Terminal: the provider answered
    Succeeded,
    /// Terminal: no further attempts on this model
    FailedPermanent,
}

impl AttemptState {
    /// Whether no transition leaves this state
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::FailedPermanent)
    }

    fn succeed(self) -> Self {
        debug_assert!(!self.is_terminal());
        Self::Succeeded
    }

    fn fail(self) -> Self {
        debug_assert!(!self.is_terminal());
        Self::FailedPermanent
    }

    fn retry(self) -> Self {
        match self {
            Self::Pending => Self::Retrying(1),
            Self::Retrying(n) => Self::Retrying(n + 1),
            terminal => terminal,
        }
    }
}

/// Every attempt made while walking a fallback chain
#[derive(Clone, Debug, Default, Serialize)]
pub struct ChainOutcome {
    /// One result per model tried, in order
    pub results: Vec<InvocationResult>,
    /// Models skipped because their estimate no longer fit the budget
    pub budget_skips: Vec<(String, f64)>,
    /// Budget remaining when the last model was skipped
    pub remaining_at_skip: Option<f64>,
}

impl ChainOutcome {
    /// The successful result, if any model answered
    #[must_use]
    pub fn success(&self) -> Option<&InvocationResult> {
        self.results.last().filter(|r| r.success)
    }

    /// Failures in try order
    #[must_use]
    pub fn failures(&self) -> Vec<ModelFailure> {
        self.results.iter().filter_map(InvocationResult::failure).collect()
    }

    /// Collapse into the successful result or the error the caller sees
    ///
    /// # Errors
    ///
    /// `BudgetExceeded` when every model was skipped for budget, the verbatim
    /// refusal when the chain stopped on a content policy error, otherwise
    /// `AllModelsFailed`.
    pub fn into_result(self) -> Result<InvocationResult> {
        if let Some(success) = self.results.last().filter(|r| r.success) {
            return Ok(success.clone());
        }
        if self.results.is_empty() && !self.budget_skips.is_empty() {
            let cheapest = self
                .budget_skips
                .iter()
                .map(|(_, cost)| *cost)
                .fold(f64::INFINITY, f64::min);
            return Err(OrchestrationError::BudgetExceeded {
                ceiling: self.remaining_at_skip.unwrap_or_default(),
                cheapest_estimate: cheapest,
            });
        }
        Err(OrchestrationError::from_failures(self.failures()))
    }
}

// ============================================================================
// Invoker
// ============================================================================

/// Calls providers under the global concurrency limit with retry and deadline
pub struct Invoker {
    context: Arc<OrchestrationContext>,
    providers: HashMap<String, Arc<dyn ProviderAdapter>>,
    limiter: Arc<Semaphore>,
    retry: RetryConfig,
}

impl std::fmt::Debug for Invoker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Invoker")
            .field("providers", &self.providers.keys().collect::<Vec<_>>())
            .field("available_slots", &self.limiter.available_permits())
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl Invoker {
    /// Create an invoker allowing `max_in_flight` concurrent provider calls
    #[must_use]
    pub fn new(context: Arc<OrchestrationContext>, retry: RetryConfig, max_in_flight: usize) -> Self {
        Self {
            context,
            providers: HashMap::new(),
            limiter: Arc::new(Semaphore::new(max_in_flight.max(1))),
            retry,
        }
    }

    /// Register a provider adapter under its own name
    #[must_use]
    pub fn with_provider(mut self, provider: Arc<dyn ProviderAdapter>) -> Self {
        self.add_provider(provider);
        self
    }

    /// Register a provider adapter under its own name
    pub fn add_provider(&mut self, provider: Arc<dyn ProviderAdapter>) {
        let name = provider.name().to_string();
        tracing::info!(provider = %name, "Registered provider adapter");
        self.providers.insert(name, provider);
    }

    /// Get the shared context
    #[must_use]
    pub fn context(&self) -> &Arc<OrchestrationContext> {
        &self.context
    }

    /// Get the retry policy
    #[must_use]
    pub fn retry_config(&self) -> &RetryConfig {
        &self.retry
    }

    /// Free limiter slots
    #[must_use]
    pub fn available_slots(&self) -> usize {
        self.limiter.available_permits()
    }

    /// Deadline for a call starting now
    #[must_use]
    pub fn deadline_for(&self, options: &InvocationOptions) -> Instant {
        Instant::now() + options.timeout.unwrap_or_else(|| self.retry.call_timeout())
    }

    /// Call one model, retrying retryable failures until the retry ceiling
    /// or the deadline. Never raises: failures come back classified.
    pub async fn invoke(
        &self,
        model: &ModelDescriptor,
        prompt: &str,
        options: &InvocationOptions,
        deadline: Instant,
    ) -> InvocationResult {
        let start = Instant::now();

        if let Err(e) = self.context.registry().lookup(&model.id) {
            return InvocationResult::failed(&model.id, ErrorKind::Permanent, e.to_string(), start.elapsed(), 0);
        }
        let Some(provider) = self.providers.get(&model.provider) else {
            return InvocationResult::failed(
                &model.id,
                ErrorKind::Permanent,
                format!("no provider adapter named '{}'", model.provider),
                start.elapsed(),
                0,
            );
        };

        let params = options.params();
        let mut state = AttemptState::Pending;
        let mut attempts: u32 = 0;

        loop {
            attempts += 1;
            let outcome = self
                .attempt(provider.as_ref(), model, prompt, &params, options.tool.as_deref(), deadline)
                .await;

            let error = match outcome {
                Ok(response) => {
                    state = state.succeed();
                    let cost = self.context.optimizer().track_usage(
                        model,
                        response.input_tokens,
                        response.output_tokens,
                    );
                    tracing::debug!(model = %model.id, attempts, cost, ?state, "Invocation succeeded");
                    return InvocationResult {
                        model_id: model.id.clone(),
                        text: response.text,
                        input_tokens: response.input_tokens,
                        output_tokens: response.output_tokens,
                        latency_ms: duration_ms(start.elapsed()),
                        cost,
                        success: true,
                        error: None,
                        attempts,
                    };
                }
                Err(error) => error,
            };

            let retries_used = attempts - 1;
            if error.kind().is_retryable() && retries_used < self.retry.max_retries {
                let backoff = match &error {
                    ProviderError::RateLimited { retry_after, .. } => {
                        self.retry.backoff_for_rate_limit(retries_used, *retry_after)
                    }
                    _ => self.retry.backoff_for_attempt(retries_used),
                };

                if Instant::now() + backoff < deadline {
                    state = state.retry();
                    tracing::warn!(
                        model = %model.id,
                        attempt = attempts,
                        backoff_ms = duration_ms(backoff),
                        error = %error,
                        "Retrying after backoff"
                    );
                    tokio::time::sleep(backoff).await;
                    continue;
                }
            }

            state = state.fail();
            tracing::debug!(model = %model.id, attempts, ?state, error = %error, "Invocation failed");
            return InvocationResult::failed(
                &model.id,
                error.kind(),
                error.message().to_string(),
                start.elapsed(),
                attempts,
            );
        }
    }

    /// One provider attempt: limiter slot + call, both bounded by the deadline
    async fn attempt(
        &self,
        provider: &dyn ProviderAdapter,
        model: &ModelDescriptor,
        prompt: &str,
        params: &ProviderParams,
        tool: Option<&str>,
        deadline: Instant,
    ) -> std::result::Result<ProviderResponse, ProviderError> {
        let monitor = self.context.monitor();
        let handle = monitor.start_invocation(&model.id, tool);

        let call = async {
            let _permit = self
                .limiter
                .acquire()
                .await
                .map_err(|_| ProviderError::Permanent("concurrency limiter closed".to_string()))?;
            provider.call(&model.id, prompt, params).await
        };

        let outcome = match tokio::time::timeout_at(deadline, call).await {
            Ok(result) => result,
            Err(_) => Err(ProviderError::Transient(format!(
                "deadline exceeded after {}ms",
                duration_ms(handle.elapsed())
            ))),
        };

        monitor.end_invocation(handle, outcome.as_ref().err().map(ProviderError::kind));
        outcome
    }

    /// Walk a fallback chain until one model succeeds
    ///
    /// Each model gets its own deadline. With a budget, the model's estimated
    /// cost is reserved before the call and settled with the real cost after;
    /// models whose estimate no longer fits are skipped. A content policy
    /// refusal stops the chain.
    pub async fn invoke_with_fallback(
        &self,
        chain: &FallbackChain,
        prompt: &str,
        options: &InvocationOptions,
        budget: Option<&Budget>,
    ) -> ChainOutcome {
        let mut outcome = ChainOutcome::default();
        let constraints = InvocationConstraints {
            expected_output_tokens: options.expected_output_tokens,
            ..Default::default()
        };
        let models: Vec<_> = chain.models().collect();

        for (i, model) in models.iter().enumerate() {
            let reservation = match budget {
                Some(budget) => {
                    let estimate = self
                        .context
                        .optimizer()
                        .estimate_call_cost(model, prompt, &constraints);
                    if let Some(reservation) = budget.try_reserve(estimate) {
                        Some(reservation)
                    } else {
                        tracing::warn!(
                            model = %model.id,
                            estimate,
                            remaining = budget.remaining(),
                            "Skipping model over remaining budget"
                        );
                        outcome.budget_skips.push((model.id.clone(), estimate));
                        outcome.remaining_at_skip = Some(budget.remaining());
                        continue;
                    }
                }
                None => None,
            };

            let result = self
                .invoke(model, prompt, options, self.deadline_for(options))
                .await;

            if let Some(reservation) = reservation {
                reservation.settle(result.cost);
            }

            let success = result.success;
            let kind = result.error_kind();
            outcome.results.push(result);

            if success || kind == Some(ErrorKind::ContentPolicy) {
                break;
            }
            if let Some(next) = models.get(i + 1) {
                self.context.monitor().record_fallback(&model.id, &next.id);
            }
        }

        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{MockBehavior, MockProvider};
    use crate::routing::TaskClass;

    fn setup(provider: MockProvider, models: &[&str]) -> (Invoker, Arc<MockProvider>) {
        let context = Arc::new(OrchestrationContext::default());
        for id in models {
            context
                .registry()
                .register(ModelDescriptor::new(*id, "mock").with_costs(0.001, 0.002));
        }
        let provider = Arc::new(provider);
        let retry = RetryConfig {
            use_jitter: false,
            ..Default::default()
        };
        let invoker = Invoker::new(context, retry, 4).with_provider(provider.clone());
        (invoker, provider)
    }

    fn model(invoker: &Invoker, id: &str) -> Arc<ModelDescriptor> {
        invoker.context().registry().lookup(id).unwrap()
    }

    fn transient() -> ProviderError {
        ProviderError::Transient("connection reset".to_string())
    }

    #[tokio::test]
    async fn test_success_tracks_usage_and_metrics() {
        let (invoker, _) = setup(MockProvider::new(), &["a"]);
        let m = model(&invoker, "a");
        let options = InvocationOptions::default();

        let result = invoker.invoke(&m, "hello", &options, invoker.deadline_for(&options)).await;

        assert!(result.success);
        assert_eq!(result.text, "a: hello");
        assert_eq!(result.attempts, 1);
        assert!(result.cost > 0.0);
        assert_eq!(invoker.context().monitor().record_len("a"), 1);
        assert_eq!(invoker.context().ledger().totals().calls, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_is_retried_up_to_ceiling() {
        let (invoker, provider) = setup(
            MockProvider::new().with_model("a", MockBehavior::FailAlways(transient())),
            &["a"],
        );
        let m = model(&invoker, "a");
        let options = InvocationOptions::default();

        let result = invoker.invoke(&m, "x", &options, invoker.deadline_for(&options)).await;

        assert!(!result.success);
        assert_eq!(result.error_kind(), Some(ErrorKind::Transient));
        // 1 attempt + 2 retries
        assert_eq!(result.attempts, 3);
        assert_eq!(provider.call_count("a"), 3);
        // Every attempt is recorded
        assert_eq!(invoker.context().monitor().record_len("a"), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_after_transient() {
        let (invoker, _) = setup(
            MockProvider::new().with_model(
                "a",
                MockBehavior::fail_times(1, transient(), MockBehavior::respond("fine")),
            ),
            &["a"],
        );
        let m = model(&invoker, "a");
        let options = InvocationOptions::default();

        let result = invoker.invoke(&m, "x", &options, invoker.deadline_for(&options)).await;
        assert!(result.success);
        assert_eq!(result.attempts, 2);
        assert_eq!(result.text, "fine");
    }

    #[tokio::test]
    async fn test_permanent_and_policy_are_not_retried() {
        let (invoker, provider) = setup(
            MockProvider::new()
                .with_model("p", MockBehavior::FailAlways(ProviderError::Permanent("bad model".into())))
                .with_model("c", MockBehavior::FailAlways(ProviderError::ContentPolicy("refused".into()))),
            &["p", "c"],
        );
        let options = InvocationOptions::default();

        let p = invoker
            .invoke(&model(&invoker, "p"), "x", &options, invoker.deadline_for(&options))
            .await;
        let c = invoker
            .invoke(&model(&invoker, "c"), "x", &options, invoker.deadline_for(&options))
            .await;

        assert_eq!(p.attempts, 1);
        assert_eq!(c.attempts, 1);
        assert_eq!(c.error.unwrap().message, "refused");
        assert_eq!(provider.total_calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_honors_provider_delay() {
        let (invoker, _) = setup(
            MockProvider::new().with_model(
                "a",
                MockBehavior::fail_times(
                    1,
                    ProviderError::RateLimited {
                        message: "slow down".into(),
                        retry_after: Some(Duration::from_secs(3)),
                    },
                    MockBehavior::respond("ok"),
                ),
            ),
            &["a"],
        );
        let m = model(&invoker, "a");
        let options = InvocationOptions::default();

        let before = Instant::now();
        let result = invoker.invoke(&m, "x", &options, invoker.deadline_for(&options)).await;

        assert!(result.success);
        assert!(before.elapsed() >= Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_expiry_is_transient() {
        let (invoker, provider) = setup(
            MockProvider::new().with_model("dead", MockBehavior::Hang),
            &["dead"],
        );
        let m = model(&invoker, "dead");
        let options = InvocationOptions::default().with_timeout(Duration::from_secs(2));

        let result = invoker.invoke(&m, "x", &options, invoker.deadline_for(&options)).await;

        assert!(!result.success);
        assert_eq!(result.error_kind(), Some(ErrorKind::Transient));
        // The deadline is spent, so no retry against the same model
        assert_eq!(provider.call_count("dead"), 1);
        assert_eq!(invoker.available_slots(), 4);
    }

    #[tokio::test]
    async fn test_unregistered_model_is_rejected_without_call() {
        let (invoker, provider) = setup(MockProvider::new(), &[]);
        let ghost = ModelDescriptor::new("ghost", "mock");
        let options = InvocationOptions::default();

        let result = invoker.invoke(&ghost, "x", &options, invoker.deadline_for(&options)).await;
        assert!(!result.success);
        assert_eq!(result.error_kind(), Some(ErrorKind::Permanent));
        assert_eq!(provider.total_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fallback_advances_after_exhaustion() {
        let (invoker, provider) = setup(
            MockProvider::new().with_model("a", MockBehavior::FailAlways(transient())),
            &["a", "b"],
        );
        let chain = FallbackChain::new(model(&invoker, "a"), vec![model(&invoker, "b")], TaskClass::General);

        let outcome = invoker
            .invoke_with_fallback(&chain, "x", &InvocationOptions::default(), None)
            .await;

        assert_eq!(outcome.results.len(), 2);
        assert_eq!(outcome.success().unwrap().model_id, "b");
        assert_eq!(provider.call_count("a"), 3);
        assert_eq!(invoker.context().monitor().system_metrics().total_fallbacks, 1);
    }

    #[tokio::test]
    async fn test_content_policy_stops_chain() {
        let (invoker, provider) = setup(
            MockProvider::new().with_model(
                "a",
                MockBehavior::FailAlways(ProviderError::ContentPolicy("unsafe request".into())),
            ),
            &["a", "b"],
        );
        let chain = FallbackChain::new(model(&invoker, "a"), vec![model(&invoker, "b")], TaskClass::General);

        let outcome = invoker
            .invoke_with_fallback(&chain, "x", &InvocationOptions::default(), None)
            .await;

        assert_eq!(provider.call_count("b"), 0);
        match outcome.into_result() {
            Err(OrchestrationError::ContentPolicy { message, .. }) => {
                assert_eq!(message, "unsafe request");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_budget_skips_unaffordable_models() {
        let (invoker, provider) = setup(MockProvider::new(), &["a"]);
        let chain = FallbackChain::single(model(&invoker, "a"), TaskClass::General);
        let budget = Budget::new(0.000_000_1);

        let outcome = invoker
            .invoke_with_fallback(&chain, "x", &InvocationOptions::default(), Some(&budget))
            .await;

        assert_eq!(provider.total_calls(), 0);
        assert!(matches!(
            outcome.into_result(),
            Err(OrchestrationError::BudgetExceeded { .. })
        ));
    }

    #[test]
    fn test_attempt_state_transitions() {
        let state = AttemptState::Pending.retry();
        assert_eq!(state, AttemptState::Retrying(1));
        assert_eq!(state.retry(), AttemptState::Retrying(2));
        assert!(state.succeed().is_terminal());
        assert!(AttemptState::Pending.fail().is_terminal());
        // Terminal states don't move
        assert_eq!(AttemptState::Succeeded.retry(), AttemptState::Succeeded);
    }
}
