//! Conductor - The Orchestration Core
//!
//! The Conductor is the public face of the engine. It owns the shared
//! [`OrchestrationContext`], the [`Invoker`] and the [`Orchestrator`] built on
//! it, and the [`LazyToolRegistry`], and exposes:
//! - `ask`: one call down the routed fallback chain
//! - `orchestrate`: a named multi-model strategy
//! - system, tool and usage metrics
//!
//! # Design Philosophy
//!
//! The Conductor holds no per-request state. Every entry point takes `&self`,
//! so one instance can be shared behind an `Arc` by any number of callers.

use std::sync::Arc;

use crate::backend::ProviderAdapter;
use crate::config::ConductorSettings;
use crate::context::OrchestrationContext;
use crate::error::Result;
use crate::invocation::{InvocationResult, Invoker};
use crate::orchestrator::{OrchestrationOptions, OrchestrationRun, Orchestrator, Strategy};
use crate::routing::{ModelDescriptor, ModelRegistry, SystemMetrics, ToolMetrics, UsageSnapshot};
use crate::tools::{LazyToolRegistry, ToolError};

/// The Conductor - headless orchestration core
#[derive(Debug)]
pub struct Conductor {
    /// Shared routing state
    context: Arc<OrchestrationContext>,
    /// Strategy executor
    orchestrator: Orchestrator,
    /// Lazily loaded tools
    tools: Arc<LazyToolRegistry>,
    /// Options used when the caller passes none
    defaults: OrchestrationOptions,
}

impl Conductor {
    /// Create a Conductor over a prepared invoker
    #[must_use]
    pub fn new(invoker: Invoker) -> Self {
        let context = Arc::clone(invoker.context());
        Self {
            context,
            orchestrator: Orchestrator::new(Arc::new(invoker)),
            tools: Arc::new(LazyToolRegistry::new()),
            defaults: OrchestrationOptions::default(),
        }
    }

    /// Build a Conductor from resolved settings and the available adapters
    ///
    /// Models listed in the settings are registered; a model whose provider
    /// has no adapter stays registered and fails with `Permanent` when called.
    pub fn from_settings(
        settings: &ConductorSettings,
        providers: impl IntoIterator<Item = Arc<dyn ProviderAdapter>>,
    ) -> Self {
        let registry = Arc::new(ModelRegistry::with_models(settings.models.iter().cloned()));
        let context = Arc::new(OrchestrationContext::with_registry(
            registry,
            settings.performance.clone(),
            settings.weights.clone(),
        ));

        let mut invoker = Invoker::new(context, settings.retry.clone(), settings.max_in_flight);
        for provider in providers {
            invoker.add_provider(provider);
        }

        tracing::info!(
            models = settings.models.len(),
            max_in_flight = settings.max_in_flight,
            source = %settings.source(),
            "Conductor initialized"
        );

        Self::new(invoker).with_defaults(settings.orchestration.clone())
    }

    /// Set the options `orchestrate_default` uses
    #[must_use]
    pub fn with_defaults(mut self, defaults: OrchestrationOptions) -> Self {
        self.defaults = defaults;
        self
    }

    /// Get the default orchestration options
    #[must_use]
    pub fn defaults(&self) -> &OrchestrationOptions {
        &self.defaults
    }

    /// Add or replace a model at runtime
    pub fn register_model(&self, descriptor: ModelDescriptor) {
        self.context.registry().register(descriptor);
    }

    // ========================================================================
    // Entry points
    // ========================================================================

    /// Single request, optionally pinned to one model
    ///
    /// # Errors
    ///
    /// `ModelNotFound` for an unknown pinned model, `NoCandidates` when no
    /// model fits, or the chain's exhaustion error.
    pub async fn ask(&self, prompt: &str, model_id: Option<&str>) -> Result<InvocationResult> {
        self.orchestrator.ask(prompt, model_id).await
    }

    /// Run a multi-model strategy
    ///
    /// Partial failures are annotated in the returned run; an error means no
    /// usable result exists or the request could not be routed at all.
    ///
    /// # Errors
    ///
    /// See [`Orchestrator::run`].
    pub async fn orchestrate(
        &self,
        prompt: &str,
        strategy: Strategy,
        models_override: Option<&[String]>,
        options: OrchestrationOptions,
    ) -> Result<OrchestrationRun> {
        self.orchestrator
            .run(prompt, strategy, models_override, options)
            .await
    }

    /// Run a strategy with the configured default options
    ///
    /// # Errors
    ///
    /// See [`Orchestrator::run`].
    pub async fn orchestrate_default(
        &self,
        prompt: &str,
        strategy: Strategy,
        models_override: Option<&[String]>,
    ) -> Result<OrchestrationRun> {
        self.orchestrate(prompt, strategy, models_override, self.defaults.clone())
            .await
    }

    /// Load (on first use) and run a registered tool
    ///
    /// Executions of registered tools, including the first one's load, are
    /// counted in the tool metrics.
    ///
    /// # Errors
    ///
    /// Unknown tool, loader failure, or the tool's own failure.
    pub async fn execute_tool(
        &self,
        name: &str,
        args: serde_json::Value,
    ) -> std::result::Result<serde_json::Value, ToolError> {
        let started = tokio::time::Instant::now();
        let outcome = self.tools.execute(name, args).await;
        match &outcome {
            Err(ToolError::UnknownTool(_)) => {}
            Err(error) => {
                tracing::debug!(tool = name, %error, "Tool execution failed");
                self.context
                    .monitor()
                    .record_tool_call(name, started.elapsed(), false);
            }
            Ok(_) => self
                .context
                .monitor()
                .record_tool_call(name, started.elapsed(), true),
        }
        outcome
    }

    // ========================================================================
    // Metrics
    // ========================================================================

    /// Uptime and request counters
    #[must_use]
    pub fn system_metrics(&self) -> SystemMetrics {
        self.context.monitor().system_metrics()
    }

    /// Per-tool call counts, latency and error rate
    #[must_use]
    pub fn tool_metrics(&self) -> ToolMetrics {
        self.context.monitor().tool_metrics()
    }

    /// Accumulated token and cost totals
    #[must_use]
    pub fn usage(&self) -> UsageSnapshot {
        self.context.ledger().snapshot()
    }

    /// Metrics in Prometheus text exposition format
    #[must_use]
    pub fn prometheus(&self) -> String {
        self.context.monitor().to_prometheus()
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// Get the tool registry
    #[must_use]
    pub fn tools(&self) -> &Arc<LazyToolRegistry> {
        &self.tools
    }

    /// Get the shared context
    #[must_use]
    pub fn context(&self) -> &Arc<OrchestrationContext> {
        &self.context
    }

    /// Get the orchestrator
    #[must_use]
    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    /// Clear performance history and usage. Models and tools stay registered.
    pub fn reset(&self) {
        self.context.reset();
    }
}
