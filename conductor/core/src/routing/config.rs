//! Routing Configuration
//!
//! Configuration types for model routing: task classes, model descriptors,
//! per-request constraints, retry policy and scoring weights.

use std::time::Duration;

use serde::{Deserialize, Serialize};

// ============================================================================
// Task Classification
// ============================================================================

/// Classification of task types for routing decisions
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskClass {
    /// Quick response needed
    /// Examples: greetings, short factual answers
    QuickResponse,

    /// Deep thinking allowed (long total time OK)
    /// Examples: complex analysis, multi-step reasoning
    DeepThinking,

    /// Code generation tasks (moderate latency acceptable)
    /// Examples: writing code, refactoring, code review
    CodeGeneration,

    /// Mathematical/logical tasks (precision over speed)
    /// Examples: proofs, calculations
    Mathematical,

    /// Creative/generative tasks
    /// Examples: stories, brainstorming, ideation
    Creative,

    /// Tool use and function calling
    ToolUse,

    /// Embedding/retrieval tasks
    Embedding,

    /// Default/unclassified tasks
    #[default]
    General,
}

impl TaskClass {
    /// All task classes, in declaration order
    pub const ALL: [TaskClass; 8] = [
        Self::QuickResponse,
        Self::DeepThinking,
        Self::CodeGeneration,
        Self::Mathematical,
        Self::Creative,
        Self::ToolUse,
        Self::Embedding,
        Self::General,
    ];

    /// Get the default per-call latency budget for this task class
    #[must_use]
    pub fn default_timeout(&self) -> Duration {
        match self {
            Self::QuickResponse => Duration::from_secs(15),
            Self::DeepThinking => Duration::from_secs(120),
            Self::CodeGeneration => Duration::from_secs(60),
            Self::Mathematical => Duration::from_secs(90),
            Self::Creative => Duration::from_secs(60),
            Self::ToolUse => Duration::from_secs(30),
            Self::Embedding => Duration::from_secs(10),
            Self::General => Duration::from_secs(60),
        }
    }

    /// Capability tag a model must declare when the caller names this task class
    #[must_use]
    pub fn required_capability(&self) -> Option<&'static str> {
        match self {
            Self::ToolUse => Some("tools"),
            Self::Embedding => Some("embedding"),
            _ => None,
        }
    }

    /// Capability tag that marks a model as strong for this task class
    #[must_use]
    pub fn preferred_capability(&self) -> Option<&'static str> {
        match self {
            Self::QuickResponse => Some("fast"),
            Self::DeepThinking => Some("reasoning"),
            Self::CodeGeneration => Some("code"),
            Self::Mathematical => Some("math"),
            Self::Creative => Some("creative"),
            Self::ToolUse => Some("tools"),
            Self::Embedding => Some("embedding"),
            Self::General => None,
        }
    }

    /// Stable snake_case name
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::QuickResponse => "quick_response",
            Self::DeepThinking => "deep_thinking",
            Self::CodeGeneration => "code_generation",
            Self::Mathematical => "mathematical",
            Self::Creative => "creative",
            Self::ToolUse => "tool_use",
            Self::Embedding => "embedding",
            Self::General => "general",
        }
    }
}

impl std::fmt::Display for TaskClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TaskClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|class| class.as_str() == s.trim().to_ascii_lowercase())
            .ok_or_else(|| format!("unknown task class '{s}'"))
    }
}

// ============================================================================
// Model Descriptors
// ============================================================================

fn default_context_window() -> u32 {
    8192
}

fn default_baseline_latency_ms() -> u64 {
    1000
}

/// Registry entry describing one callable backend model
///
/// Descriptors are immutable once registered; the registry only adds,
/// replaces or removes whole descriptors.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    /// Model identifier (unique within the registry)
    pub id: String,

    /// Provider adapter that serves this model
    pub provider: String,

    /// Maximum context window (tokens)
    #[serde(default = "default_context_window")]
    pub context_window: u32,

    /// Cost per 1000 input tokens (USD)
    #[serde(default)]
    pub input_cost_per_1k: f64,

    /// Cost per 1000 output tokens (USD)
    #[serde(default)]
    pub output_cost_per_1k: f64,

    /// Capability tags ("code", "tools", "reasoning", ...)
    #[serde(default)]
    pub capabilities: Vec<String>,

    /// Declared latency estimate used before any history exists
    #[serde(default = "default_baseline_latency_ms")]
    pub baseline_latency_ms: u64,
}

impl ModelDescriptor {
    /// Create a new descriptor with free pricing and no capabilities
    pub fn new(id: impl Into<String>, provider: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            provider: provider.into(),
            context_window: default_context_window(),
            input_cost_per_1k: 0.0,
            output_cost_per_1k: 0.0,
            capabilities: Vec::new(),
            baseline_latency_ms: default_baseline_latency_ms(),
        }
    }

    /// Set per-1k token pricing
    #[must_use]
    pub fn with_costs(mut self, input_per_1k: f64, output_per_1k: f64) -> Self {
        self.input_cost_per_1k = input_per_1k;
        self.output_cost_per_1k = output_per_1k;
        self
    }

    /// Set capability tags
    #[must_use]
    pub fn with_capabilities<I, S>(mut self, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.capabilities = capabilities.into_iter().map(Into::into).collect();
        self
    }

    /// Set context window
    #[must_use]
    pub fn with_context_window(mut self, tokens: u32) -> Self {
        self.context_window = tokens;
        self
    }

    /// Set baseline latency estimate
    #[must_use]
    pub fn with_baseline_latency_ms(mut self, ms: u64) -> Self {
        self.baseline_latency_ms = ms;
        self
    }

    /// Estimated cost of a call with the given token counts
    #[must_use]
    pub fn estimate_cost(&self, input_tokens: u32, output_tokens: u32) -> f64 {
        f64::from(input_tokens) / 1000.0 * self.input_cost_per_1k
            + f64::from(output_tokens) / 1000.0 * self.output_cost_per_1k
    }

    /// Whether the model declares a capability tag
    #[must_use]
    pub fn has_capability(&self, tag: &str) -> bool {
        self.capabilities.iter().any(|c| c.eq_ignore_ascii_case(tag))
    }

    /// Whether the model declares every one of the given tags
    #[must_use]
    pub fn has_capabilities<S: AsRef<str>>(&self, tags: &[S]) -> bool {
        tags.iter().all(|t| self.has_capability(t.as_ref()))
    }

    /// Baseline latency as a `Duration`
    #[must_use]
    pub fn baseline_latency(&self) -> Duration {
        Duration::from_millis(self.baseline_latency_ms)
    }
}

// ============================================================================
// Request Constraints
// ============================================================================

/// Constraints attached to a single request
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct InvocationConstraints {
    /// Maximum spend for the whole request (USD)
    pub max_cost: Option<f64>,

    /// Maximum acceptable per-call latency
    pub max_latency_ms: Option<u64>,

    /// Capability tags every candidate must declare
    pub required_capabilities: Vec<String>,

    /// Sampling temperature forwarded to every call
    pub temperature: Option<f32>,

    /// Explicit model list; bypasses capability search when non-empty
    pub model_override: Vec<String>,

    /// Expected response length used for cost estimates
    pub expected_output_tokens: Option<u32>,
}

impl InvocationConstraints {
    /// Set the cost ceiling
    #[must_use]
    pub fn with_max_cost(mut self, max_cost: f64) -> Self {
        self.max_cost = Some(max_cost);
        self
    }

    /// Set the latency ceiling
    #[must_use]
    pub fn with_max_latency(mut self, max_latency: Duration) -> Self {
        self.max_latency_ms = Some(u64::try_from(max_latency.as_millis()).unwrap_or(u64::MAX));
        self
    }

    /// Add a required capability
    #[must_use]
    pub fn require(mut self, capability: impl Into<String>) -> Self {
        self.required_capabilities.push(capability.into());
        self
    }

    /// Set temperature (clamped to 0.0-2.0)
    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature.clamp(0.0, 2.0));
        self
    }

    /// Set explicit model list
    #[must_use]
    pub fn with_models<I, S>(mut self, models: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.model_override = models.into_iter().map(Into::into).collect();
        self
    }

    /// Latency ceiling as a `Duration`
    #[must_use]
    pub fn max_latency(&self) -> Option<Duration> {
        self.max_latency_ms.map(Duration::from_millis)
    }
}

/// A single model request as seen by the router
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct InvocationRequest {
    /// Prompt text
    pub prompt: String,

    /// Explicit task type; classified from the prompt when absent
    pub task_class: Option<TaskClass>,

    /// Request constraints
    pub constraints: InvocationConstraints,
}

impl InvocationRequest {
    /// Create a request with default constraints
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Default::default()
        }
    }

    /// Set the task type
    #[must_use]
    pub fn with_task_class(mut self, task_class: TaskClass) -> Self {
        self.task_class = Some(task_class);
        self
    }

    /// Set constraints
    #[must_use]
    pub fn with_constraints(mut self, constraints: InvocationConstraints) -> Self {
        self.constraints = constraints;
        self
    }

    /// The explicit task type, or one classified from the prompt
    #[must_use]
    pub fn task_class(&self) -> TaskClass {
        self.task_class.unwrap_or_else(|| {
            super::policy::classify_prompt(
                &self.prompt,
                self.constraints
                    .required_capabilities
                    .iter()
                    .any(|c| c == "tools"),
            )
        })
    }
}

// ============================================================================
// Retry Configuration
// ============================================================================

/// Retry configuration for failed provider calls
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retries after the first attempt
    pub max_retries: u32,

    /// Initial backoff delay
    pub initial_backoff_ms: u64,

    /// Maximum backoff delay
    pub max_backoff_ms: u64,

    /// Backoff multiplier
    pub backoff_multiplier: f32,

    /// Add jitter to backoff
    pub use_jitter: bool,

    /// Per-call timeout when the caller supplies no deadline
    pub call_timeout_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_backoff_ms: 200,
            max_backoff_ms: 5_000,
            backoff_multiplier: 2.0,
            use_jitter: true,
            call_timeout_ms: 60_000,
        }
    }
}

impl RetryConfig {
    /// Calculate backoff duration for attempt N (0-indexed)
    #[must_use]
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss,
        clippy::cast_possible_wrap
    )]
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.initial_backoff_ms as f64
            * f64::from(self.backoff_multiplier).powi(attempt as i32);
        let capped = base.min(self.max_backoff_ms as f64);

        let duration_ms = if self.use_jitter {
            // Add up to 25% jitter
            let jitter = rand::random::<f64>() * 0.25;
            (capped * (1.0 + jitter)) as u64
        } else {
            capped as u64
        };

        Duration::from_millis(duration_ms)
    }

    /// Backoff for a rate-limited attempt: the provider's delay wins when given
    #[must_use]
    pub fn backoff_for_rate_limit(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        retry_after.unwrap_or_else(|| self.backoff_for_attempt(attempt))
    }

    /// Per-call timeout as a `Duration`
    #[must_use]
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }
}

// ============================================================================
// Scoring Configuration
// ============================================================================

/// Weights of the cost optimizer's fixed weighted sum
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CostWeights {
    /// Weight of historical reliability (higher is better)
    pub reliability: f64,
    /// Weight of estimated cost (lower is better)
    pub cost: f64,
    /// Weight of estimated latency (lower is better)
    pub latency: f64,
    /// Output token count assumed when the request gives none
    pub default_output_tokens: u32,
}

impl Default for CostWeights {
    fn default() -> Self {
        Self {
            reliability: 0.4,
            cost: 0.35,
            latency: 0.25,
            default_output_tokens: 512,
        }
    }
}

/// Performance window and routing health thresholds
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PerformanceConfig {
    /// Ring buffer capacity per model (N)
    pub window_capacity: usize,
    /// Error rate above which a model is demoted in routing
    pub error_rate_threshold: f64,
    /// Samples required before the error rate is trusted
    pub min_samples: usize,
    /// Reliability assumed for a model with no history
    pub default_reliability: f64,
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            window_capacity: 100,
            error_rate_threshold: 0.5,
            min_samples: 5,
            default_reliability: 0.8,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_class_defaults() {
        assert!(TaskClass::QuickResponse.default_timeout() < TaskClass::DeepThinking.default_timeout());
        assert_eq!(TaskClass::ToolUse.required_capability(), Some("tools"));
        assert_eq!(TaskClass::Embedding.required_capability(), Some("embedding"));
        assert_eq!(TaskClass::General.required_capability(), None);
    }

    #[test]
    fn test_task_class_parse() {
        assert_eq!("code_generation".parse::<TaskClass>(), Ok(TaskClass::CodeGeneration));
        assert_eq!(" General ".parse::<TaskClass>(), Ok(TaskClass::General));
        assert!("poetry".parse::<TaskClass>().is_err());
    }

    #[test]
    fn test_retry_backoff() {
        let config = RetryConfig {
            initial_backoff_ms: 100,
            backoff_multiplier: 2.0,
            max_backoff_ms: 1000,
            use_jitter: false,
            ..Default::default()
        };

        assert_eq!(config.backoff_for_attempt(0), Duration::from_millis(100));
        assert_eq!(config.backoff_for_attempt(1), Duration::from_millis(200));
        assert_eq!(config.backoff_for_attempt(2), Duration::from_millis(400));
        assert_eq!(config.backoff_for_attempt(3), Duration::from_millis(800));
        assert_eq!(config.backoff_for_attempt(4), Duration::from_millis(1000)); // Capped
    }

    #[test]
    fn test_rate_limit_backoff_honors_provider_delay() {
        let config = RetryConfig {
            use_jitter: false,
            ..Default::default()
        };
        assert_eq!(
            config.backoff_for_rate_limit(0, Some(Duration::from_secs(3))),
            Duration::from_secs(3)
        );
        assert_eq!(
            config.backoff_for_rate_limit(1, None),
            config.backoff_for_attempt(1)
        );
    }

    #[test]
    fn test_descriptor_cost_and_capabilities() {
        let model = ModelDescriptor::new("gpt-large", "openai")
            .with_costs(0.01, 0.03)
            .with_capabilities(["code", "Tools"]);

        let cost = model.estimate_cost(1000, 500);
        assert!((cost - 0.025).abs() < 1e-9);
        assert!(model.has_capability("tools"));
        assert!(model.has_capabilities(&["code", "tools"]));
        assert!(!model.has_capabilities(&["code", "vision"]));
    }

    #[test]
    fn test_explicit_task_class_wins() {
        let request = InvocationRequest::new("hello there").with_task_class(TaskClass::Creative);
        assert_eq!(request.task_class(), TaskClass::Creative);
    }
}
