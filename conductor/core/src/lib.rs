//! Model Conductor - Multi-Model Orchestration and Routing
//!
//! This crate routes requests across a catalog of LLM backends and combines
//! several models' answers into one through named strategies. It assumes
//! providers are unreliable: every call carries a deadline, retries locally
//! with backoff, and falls back down an ordered chain of alternatives.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                          Conductor                               │
//! │        ask(prompt, model?)      orchestrate(prompt, strategy)    │
//! └───────────────┬──────────────────────────────┬───────────────────┘
//!                 │                              │
//!                 │                   ┌──────────┴──────────┐
//!                 │                   │    Orchestrator     │
//!                 │                   │ (7 strategy fns)    │
//!                 │                   └──────────┬──────────┘
//!                 │                              │
//! ┌───────────────┴──────────────────────────────┴───────────────────┐
//! │  ModelRouter ──> CostOptimizer ──> PerformanceMonitor / Ledger   │
//! │       │                                                          │
//! │       └──> RoutePlan { FallbackChain }                           │
//! └───────────────────────────────┬──────────────────────────────────┘
//!                                 │
//! ┌───────────────────────────────┴──────────────────────────────────┐
//! │  Invoker: limiter ─ deadline ─ retry/backoff ─ fallback          │
//! └───────────────────────────────┬──────────────────────────────────┘
//!                                 │
//!                  ProviderAdapter (Ollama, Mock, ...)
//! ```
//!
//! # Key Types
//!
//! - [`Conductor`]: Public entry points and metrics export
//! - [`Strategy`]: The seven multi-model algorithms
//! - [`OrchestrationRun`]: Everything a strategy did, successes and failures
//! - [`OrchestrationContext`]: Registry, performance history and usage ledger
//! - [`Invoker`]: The single path to a provider
//! - [`LazyToolRegistry`]: Tools whose implementations load on first use
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use model_conductor::{
//!     backend::OllamaProvider, load_config, Conductor, OrchestrationOptions, Strategy,
//! };
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let settings = load_config()?;
//!     let ollama = Arc::new(OllamaProvider::new(&settings.ollama_host, settings.ollama_port));
//!     let conductor = Conductor::from_settings(&settings, [ollama as _]);
//!
//!     let run = conductor
//!         .orchestrate("Explain recursion", Strategy::Parallel, None, OrchestrationOptions::default())
//!         .await?;
//!     println!("{}", run.final_text);
//!     Ok(())
//! }
//! ```
//!
//! # Module Overview
//!
//! - [`backend`]: Provider adapter trait, classified errors, Ollama and mock adapters
//! - [`conductor`]: Main Conductor struct
//! - [`config`]: TOML configuration loading
//! - [`context`]: Process-wide routing state
//! - [`error`]: Error taxonomy
//! - [`invocation`]: Retry, deadline, concurrency limit and fallback for one request
//! - [`orchestrator`]: Strategy table and run records
//! - [`routing`]: Registry, performance monitor, cost optimizer and router
//! - [`tools`]: Lazy tool registry

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod backend;
pub mod conductor;
pub mod config;
pub mod context;
pub mod error;
pub mod invocation;
pub mod orchestrator;
pub mod routing;
pub mod tools;

// Re-exports for convenience
pub use backend::{
    MockBehavior, MockProvider, OllamaProvider, ProviderAdapter, ProviderError, ProviderParams,
    ProviderResponse,
};
pub use conductor::Conductor;
pub use context::OrchestrationContext;
pub use error::{ErrorKind, ModelFailure, OrchestrationError, Result};
pub use invocation::{
    AttemptState, ChainOutcome, InvocationError, InvocationOptions, InvocationResult, Invoker,
};
pub use orchestrator::{
    OrchestrationOptions, OrchestrationRun, Orchestrator, RoundRecord, RunMetadata, Strategy,
    StrategyState, SubtaskNode, Vote, VotingMode, MAX_DEPTH_LIMIT, MAX_SUBTASKS_LIMIT,
};

// Routing exports
pub use routing::{
    Budget, CostOptimizer, CostWeights, FallbackChain, InvocationConstraints, ModelDescriptor,
    ModelRegistry, ModelRouter, PerformanceConfig, PerformanceMonitor, RetryConfig, RoutePlan,
    SystemMetrics, TaskClass, TaskSource, ToolMetrics, UsageLedger, UsageSnapshot,
};

// Tool exports
pub use tools::{LazyToolRegistry, ToolError, ToolHandler, ToolLoader, ToolMetadata};

// Config exports
pub use config::{
    default_config_path, load_config, load_config_from_path, ConductorSettings, ConductorToml,
    ConfigError, ConfigOverrides, ConfigSource,
};
