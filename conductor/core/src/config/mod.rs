//! TOML Configuration File Support
//!
//! Centralized configuration loading for the model conductor, from a TOML
//! file at `~/.config/model-conductor/conductor.toml`.
//!
//! # Configuration Priority
//!
//! Configuration values are loaded with the following priority (highest first):
//! 1. CLI arguments (via [`ConfigOverrides`])
//! 2. Environment variables
//! 3. TOML configuration file
//! 4. Default values
//!
//! # Example Configuration
//!
//! ```toml
//! [limits]
//! max_in_flight = 16
//!
//! [invocation]
//! max_retries = 2
//! call_timeout_ms = 60000
//!
//! [performance]
//! window_capacity = 100
//!
//! [cost]
//! reliability_weight = 0.4
//! cost_weight = 0.35
//! latency_weight = 0.25
//!
//! [orchestration]
//! max_rounds = 3
//! convergence_threshold = 0.75
//! voting = "reliability_weighted"
//!
//! [providers.ollama]
//! host = "localhost"
//! port = 11434
//!
//! [[models]]
//! id = "llama3.2"
//! provider = "ollama"
//! capabilities = ["fast", "general"]
//! ```

use std::collections::HashSet;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::orchestrator::{OrchestrationOptions, VotingMode};
use crate::routing::{CostWeights, ModelDescriptor, PerformanceConfig, RetryConfig};

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur when loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file at {path}: {source}")]
    ReadError {
        /// The path that was attempted
        path: PathBuf,
        /// The underlying IO error
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("Failed to parse TOML config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

// =============================================================================
// Configuration Source Tracking
// =============================================================================

/// Tracks where a configuration value came from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigSource {
    /// Value from command-line argument
    Cli,
    /// Value from environment variable
    Env,
    /// Value from TOML configuration file
    File,
    /// Default value
    Default,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cli => write!(f, "CLI"),
            Self::Env => write!(f, "environment"),
            Self::File => write!(f, "config file"),
            Self::Default => write!(f, "default"),
        }
    }
}

// =============================================================================
// TOML Configuration Structures
// =============================================================================

/// `[limits]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsToml {
    /// Global cap on in-flight provider calls
    pub max_in_flight: Option<usize>,
}

/// `[invocation]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct InvocationToml {
    /// Retries after the first attempt
    pub max_retries: Option<u32>,
    /// First backoff delay
    pub initial_backoff_ms: Option<u64>,
    /// Backoff cap
    pub max_backoff_ms: Option<u64>,
    /// Backoff growth factor
    pub backoff_multiplier: Option<f32>,
    /// Randomize backoff
    pub use_jitter: Option<bool>,
    /// Per-call deadline
    pub call_timeout_ms: Option<u64>,
}

/// `[performance]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PerformanceToml {
    /// Ring buffer capacity per model
    pub window_capacity: Option<usize>,
    /// Demotion threshold
    pub error_rate_threshold: Option<f64>,
    /// Samples before the error rate counts
    pub min_samples: Option<usize>,
    /// Reliability of an unseen model
    pub default_reliability: Option<f64>,
}

/// `[cost]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CostToml {
    /// Reliability weight
    pub reliability_weight: Option<f64>,
    /// Cost weight
    pub cost_weight: Option<f64>,
    /// Latency weight
    pub latency_weight: Option<f64>,
    /// Assumed response length
    pub default_output_tokens: Option<u32>,
}

/// `[orchestration]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestrationToml {
    /// Debate/consensus round limit
    pub max_rounds: Option<usize>,
    /// Fan-out width
    pub fan_out: Option<usize>,
    /// Mixture top-K
    pub mixture_top_k: Option<usize>,
    /// Hierarchical depth bound
    pub max_depth: Option<usize>,
    /// Subtasks per node
    pub max_subtasks: Option<usize>,
    /// Debate early-stop similarity
    pub convergence_threshold: Option<f64>,
    /// Consensus tally rule
    pub voting: Option<VotingMode>,
}

/// `[providers.ollama]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OllamaToml {
    /// Host
    pub host: Option<String>,
    /// Port
    pub port: Option<u16>,
}

/// `[providers]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvidersToml {
    /// Ollama adapter
    pub ollama: OllamaToml,
}

/// Top-level TOML configuration structure
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConductorToml {
    /// Concurrency limits
    pub limits: LimitsToml,
    /// Retry and timeout policy
    pub invocation: InvocationToml,
    /// Performance window
    pub performance: PerformanceToml,
    /// Scoring weights
    pub cost: CostToml,
    /// Strategy defaults
    pub orchestration: OrchestrationToml,
    /// Provider adapters
    pub providers: ProvidersToml,
    /// Model catalog
    pub models: Vec<ModelDescriptor>,
}

// =============================================================================
// Main Configuration Struct
// =============================================================================

/// Resolved configuration for the conductor
///
/// Consolidates defaults, file, environment and CLI values. Use
/// [`load_config`] to load with proper priority handling.
#[derive(Clone, Debug)]
pub struct ConductorSettings {
    /// Global cap on in-flight provider calls
    pub max_in_flight: usize,

    /// Retry and deadline policy
    pub retry: RetryConfig,

    /// Performance window and health thresholds
    pub performance: PerformanceConfig,

    /// Cost optimizer weights
    pub weights: CostWeights,

    /// Default options for `orchestrate`
    pub orchestration: OrchestrationOptions,

    /// Models registered at startup
    pub models: Vec<ModelDescriptor>,

    /// Ollama host
    pub ollama_host: String,

    /// Ollama port
    pub ollama_port: u16,

    /// Path to the config file that was loaded (if any)
    pub config_file_path: Option<PathBuf>,

    /// Source of configuration values
    source: ConfigSource,
}

impl Default for ConductorSettings {
    fn default() -> Self {
        Self {
            max_in_flight: 16,
            retry: RetryConfig::default(),
            performance: PerformanceConfig::default(),
            weights: CostWeights::default(),
            orchestration: OrchestrationOptions::default(),
            models: Vec::new(),
            ollama_host: "localhost".to_string(),
            ollama_port: 11434,
            config_file_path: None,
            source: ConfigSource::Default,
        }
    }
}

impl ConductorSettings {
    /// Create a new configuration with default values
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the primary source of this configuration
    #[must_use]
    pub fn source(&self) -> ConfigSource {
        self.source
    }

    /// Set the configuration source
    pub fn set_source(&mut self, source: ConfigSource) {
        self.source = source;
    }

    /// Check value ranges and model catalog consistency
    ///
    /// # Errors
    ///
    /// `ValidationError` naming the first offending value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::ValidationError(msg));

        if self.max_in_flight == 0 {
            return invalid("limits.max_in_flight must be at least 1".to_string());
        }
        if self.performance.window_capacity == 0 {
            return invalid("performance.window_capacity must be at least 1".to_string());
        }
        for (name, value) in [
            ("performance.error_rate_threshold", self.performance.error_rate_threshold),
            ("performance.default_reliability", self.performance.default_reliability),
            ("orchestration.convergence_threshold", self.orchestration.convergence_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return invalid(format!("{name} must be within [0, 1], got {value}"));
            }
        }

        let w = &self.weights;
        if [w.reliability, w.cost, w.latency].iter().any(|v| *v < 0.0) {
            return invalid("cost weights must not be negative".to_string());
        }
        if w.reliability + w.cost + w.latency <= 0.0 {
            return invalid("at least one cost weight must be positive".to_string());
        }

        let mut seen = HashSet::new();
        for model in &self.models {
            if model.id.trim().is_empty() {
                return invalid("model id must not be empty".to_string());
            }
            if !seen.insert(model.id.as_str()) {
                return invalid(format!("duplicate model id '{}'", model.id));
            }
            if model.input_cost_per_1k < 0.0 || model.output_cost_per_1k < 0.0 {
                return invalid(format!("model '{}' has a negative cost", model.id));
            }
        }

        self.orchestration
            .validate()
            .map_err(|e| ConfigError::ValidationError(e.to_string()))
    }
}

// =============================================================================
// Configuration Loading
// =============================================================================

/// Get the default configuration file path
///
/// Returns `$XDG_CONFIG_HOME/model-conductor/conductor.toml` or
/// `~/.config/model-conductor/conductor.toml` if `XDG_CONFIG_HOME` is not set.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("model-conductor").join("conductor.toml"))
}

/// Load configuration from all sources with proper priority
///
/// # Errors
///
/// Returns an error if the config file exists but cannot be parsed, or the
/// merged values fail validation. A missing config file is not an error.
pub fn load_config() -> Result<ConductorSettings, ConfigError> {
    load_config_from_path(default_config_path())
}

/// Load configuration from a specific path
///
/// # Errors
///
/// Returns an error if the specified config file cannot be read or parsed,
/// or the merged values fail validation.
pub fn load_config_from_path(path: Option<PathBuf>) -> Result<ConductorSettings, ConfigError> {
    let mut config = ConductorSettings::default();

    if let Some(ref config_path) = path {
        if config_path.exists() {
            let toml_content =
                std::fs::read_to_string(config_path).map_err(|e| ConfigError::ReadError {
                    path: config_path.clone(),
                    source: e,
                })?;

            let toml_config: ConductorToml = toml::from_str(&toml_content)?;
            apply_toml_config(&mut config, toml_config);
            config.config_file_path = Some(config_path.clone());
            config.source = ConfigSource::File;

            tracing::info!(
                path = %config_path.display(),
                models = config.models.len(),
                "Loaded configuration from file"
            );
        } else {
            tracing::debug!(
                path = %config_path.display(),
                "Config file not found, using defaults"
            );
        }
    }

    apply_env_config(&mut config);
    config.validate()?;

    Ok(config)
}

/// Apply TOML configuration values to the config struct
fn apply_toml_config(config: &mut ConductorSettings, toml: ConductorToml) {
    if let Some(n) = toml.limits.max_in_flight {
        config.max_in_flight = n;
    }

    let inv = &toml.invocation;
    if let Some(n) = inv.max_retries {
        config.retry.max_retries = n;
    }
    if let Some(ms) = inv.initial_backoff_ms {
        config.retry.initial_backoff_ms = ms;
    }
    if let Some(ms) = inv.max_backoff_ms {
        config.retry.max_backoff_ms = ms;
    }
    if let Some(m) = inv.backoff_multiplier {
        config.retry.backoff_multiplier = m;
    }
    if let Some(jitter) = inv.use_jitter {
        config.retry.use_jitter = jitter;
    }
    if let Some(ms) = inv.call_timeout_ms {
        config.retry.call_timeout_ms = ms;
    }

    let perf = &toml.performance;
    if let Some(n) = perf.window_capacity {
        config.performance.window_capacity = n;
    }
    if let Some(t) = perf.error_rate_threshold {
        config.performance.error_rate_threshold = t;
    }
    if let Some(n) = perf.min_samples {
        config.performance.min_samples = n;
    }
    if let Some(r) = perf.default_reliability {
        config.performance.default_reliability = r;
    }

    let cost = &toml.cost;
    if let Some(w) = cost.reliability_weight {
        config.weights.reliability = w;
    }
    if let Some(w) = cost.cost_weight {
        config.weights.cost = w;
    }
    if let Some(w) = cost.latency_weight {
        config.weights.latency = w;
    }
    if let Some(n) = cost.default_output_tokens {
        config.weights.default_output_tokens = n;
    }

    let orch = &toml.orchestration;
    let defaults = &mut config.orchestration;
    if let Some(n) = orch.max_rounds {
        defaults.max_rounds = n;
    }
    if let Some(n) = orch.fan_out {
        defaults.fan_out = n;
    }
    if let Some(n) = orch.mixture_top_k {
        defaults.top_k = n;
    }
    if let Some(n) = orch.max_depth {
        defaults.max_depth = n;
    }
    if let Some(n) = orch.max_subtasks {
        defaults.max_subtasks = n;
    }
    if let Some(t) = orch.convergence_threshold {
        defaults.convergence_threshold = t;
    }
    if let Some(mode) = orch.voting {
        defaults.voting = mode;
    }

    if let Some(host) = toml.providers.ollama.host {
        config.ollama_host = host;
    }
    if let Some(port) = toml.providers.ollama.port {
        config.ollama_port = port;
    }

    config.models = toml.models;
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

/// Apply environment variable overrides to the config
fn apply_env_config(config: &mut ConductorSettings) {
    if let Some(n) = env_parse::<usize>("CONDUCTOR_MAX_IN_FLIGHT") {
        config.max_in_flight = n;
        config.source = ConfigSource::Env;
    }
    if let Some(n) = env_parse::<u32>("CONDUCTOR_MAX_RETRIES") {
        config.retry.max_retries = n;
        config.source = ConfigSource::Env;
    }
    if let Some(ms) = env_parse::<u64>("CONDUCTOR_CALL_TIMEOUT_MS") {
        config.retry.call_timeout_ms = ms;
        config.source = ConfigSource::Env;
    }
    if let Some(n) = env_parse::<usize>("CONDUCTOR_WINDOW_CAPACITY") {
        config.performance.window_capacity = n;
        config.source = ConfigSource::Env;
    }
    if let Some(t) = env_parse::<f64>("CONDUCTOR_CONVERGENCE_THRESHOLD") {
        config.orchestration.convergence_threshold = t;
        config.source = ConfigSource::Env;
    }
    if let Ok(host) = std::env::var("OLLAMA_HOST") {
        config.ollama_host = host;
        config.source = ConfigSource::Env;
    }
    if let Some(port) = env_parse::<u16>("OLLAMA_PORT") {
        config.ollama_port = port;
        config.source = ConfigSource::Env;
    }
}

// =============================================================================
// CLI Override Support
// =============================================================================

/// Builder for applying CLI overrides to configuration
///
/// Use this after [`load_config`] to apply command-line argument overrides.
#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    /// Concurrency cap override
    pub max_in_flight: Option<usize>,

    /// Retry ceiling override
    pub max_retries: Option<u32>,

    /// Per-call timeout override (milliseconds)
    pub call_timeout_ms: Option<u64>,

    /// Ollama host override
    pub ollama_host: Option<String>,

    /// Ollama port override
    pub ollama_port: Option<u16>,
}

impl ConfigOverrides {
    /// Create a new empty set of overrides
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set concurrency cap override
    #[must_use]
    pub fn with_max_in_flight(mut self, n: usize) -> Self {
        self.max_in_flight = Some(n);
        self
    }

    /// Set retry ceiling override
    #[must_use]
    pub fn with_max_retries(mut self, n: u32) -> Self {
        self.max_retries = Some(n);
        self
    }

    /// Set per-call timeout override
    #[must_use]
    pub fn with_call_timeout_ms(mut self, ms: u64) -> Self {
        self.call_timeout_ms = Some(ms);
        self
    }

    /// Apply overrides to a configuration
    pub fn apply(&self, config: &mut ConductorSettings) {
        if self.max_in_flight.is_some()
            || self.max_retries.is_some()
            || self.call_timeout_ms.is_some()
            || self.ollama_host.is_some()
            || self.ollama_port.is_some()
        {
            config.source = ConfigSource::Cli;
        }

        if let Some(n) = self.max_in_flight {
            config.max_in_flight = n;
        }
        if let Some(n) = self.max_retries {
            config.retry.max_retries = n;
        }
        if let Some(ms) = self.call_timeout_ms {
            config.retry.call_timeout_ms = ms;
        }
        if let Some(ref host) = self.ollama_host {
            config.ollama_host = host.clone();
        }
        if let Some(port) = self.ollama_port {
            config.ollama_port = port;
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
