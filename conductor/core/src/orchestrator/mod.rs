//! Orchestrator
//!
//! Executes one of seven multi-model strategies over the router's candidates.
//! Strategies reach providers only through the [`Invoker`], so retry,
//! deadline, concurrency and metrics behaviour is the same for all of them.
//!
//! # Strategy table
//!
//! Each [`Strategy`] maps to a plain function `StrategyInput -> OrchestrationRun`
//! (see [`Strategy::handler`]); strategies share nothing but the helpers on
//! [`StrategyInput`] and can be tested one at a time.
//!
//! | Strategy | Calls |
//! |---|---|
//! | sequential | one stage per participant, each refining the last |
//! | parallel | fan-out, then one synthesis |
//! | debate | rounds of critique until convergence or `max_rounds`, then synthesis |
//! | consensus | fan-out, a vote round, reliability-weighted tally |
//! | specialist | single call down the fallback chain |
//! | hierarchical | decompose, solve subtasks, combine (depth-bounded) |
//! | mixture | fan-out, heuristic top-K, synthesis |

pub mod prompts;
mod run;
pub mod scoring;
mod strategies;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use futures::future::{join_all, BoxFuture};
use serde::{Deserialize, Serialize};

use crate::error::{OrchestrationError, Result};
use crate::invocation::{ChainOutcome, InvocationOptions, InvocationResult, Invoker};
use crate::routing::{
    classify_prompt, Budget, FallbackChain, InvocationConstraints, ModelDescriptor, RoutePlan,
    TaskClass, TaskSource,
};

pub use run::{OrchestrationRun, RoundRecord, RunMetadata, StrategyState, SubtaskNode, Vote};

// ============================================================================
// Strategy & Options
// ============================================================================

/// Named multi-model algorithm
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    /// Ordered refinement chain
    Sequential,
    /// Fan-out plus synthesis
    Parallel,
    /// Multi-round critique
    Debate,
    /// Fan-out plus weighted vote
    Consensus,
    /// Single best model
    Specialist,
    /// Decompose and delegate
    Hierarchical,
    /// Top-K of a fan-out
    Mixture,
}

/// Signature every strategy implements
pub type StrategyFn = fn(StrategyInput) -> BoxFuture<'static, Result<OrchestrationRun>>;

impl Strategy {
    /// All strategies
    pub const ALL: [Strategy; 7] = [
        Self::Sequential,
        Self::Parallel,
        Self::Debate,
        Self::Consensus,
        Self::Specialist,
        Self::Hierarchical,
        Self::Mixture,
    ];

    /// Stable lowercase identifier
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sequential => "sequential",
            Self::Parallel => "parallel",
            Self::Debate => "debate",
            Self::Consensus => "consensus",
            Self::Specialist => "specialist",
            Self::Hierarchical => "hierarchical",
            Self::Mixture => "mixture",
        }
    }

    /// The function implementing this strategy
    #[must_use]
    pub fn handler(self) -> StrategyFn {
        match self {
            Self::Sequential => strategies::sequential::run,
            Self::Parallel => strategies::parallel::run,
            Self::Debate => strategies::debate::run,
            Self::Consensus => strategies::consensus::run,
            Self::Specialist => strategies::specialist::run,
            Self::Hierarchical => strategies::hierarchical::run,
            Self::Mixture => strategies::mixture::run,
        }
    }

    /// Whether the strategy calls several participants
    #[must_use]
    pub fn fans_out(self) -> bool {
        !matches!(self, Self::Specialist | Self::Hierarchical)
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Strategy {
    type Err = OrchestrationError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|strategy| strategy.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| OrchestrationError::InvalidRequest(format!("unknown strategy '{s}'")))
    }
}

/// Deepest hierarchical tree a request may ask for
pub const MAX_DEPTH_LIMIT: usize = 4;

/// Most subtasks one hierarchical node may split into
pub const MAX_SUBTASKS_LIMIT: usize = 8;

/// How consensus ballots are counted
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VotingMode {
    /// Plurality of votes weighted by each voter's recent reliability
    #[default]
    ReliabilityWeighted,
    /// Strict majority of valid votes, otherwise synthesize
    Majority,
}

/// Caller-facing knobs for `orchestrate`
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestrationOptions {
    /// Upper bound on debate/consensus rounds
    pub max_rounds: usize,
    /// Temperature forwarded to every call
    pub temperature: Option<f32>,
    /// Attach routing and round trace to the run
    pub include_reasoning: bool,
    /// Maximum spend for the whole request
    pub budget_ceiling: Option<f64>,
    /// Route as a deep-thinking task
    pub use_deep_reasoning: bool,
    /// Explicit task type; classified from the prompt when absent
    pub task_class: Option<TaskClass>,
    /// Capability tags every model must declare
    pub required_capabilities: Vec<String>,
    /// Per-call latency ceiling for candidates
    pub max_latency_ms: Option<u64>,
    /// Per-call deadline; the task type's default when absent
    pub call_timeout_ms: Option<u64>,
    /// Calling tool, for tool metrics
    pub tool: Option<String>,
    /// Participants for fan-out strategies without an override
    pub fan_out: usize,
    /// Responses kept by mixture
    pub top_k: usize,
    /// Hierarchical recursion bound
    pub max_depth: usize,
    /// Subtasks per hierarchical node
    pub max_subtasks: usize,
    /// Debate early-stop similarity
    pub convergence_threshold: f64,
    /// Consensus tally rule
    pub voting: VotingMode,
}

impl Default for OrchestrationOptions {
    fn default() -> Self {
        Self {
            max_rounds: 3,
            temperature: None,
            include_reasoning: false,
            budget_ceiling: None,
            use_deep_reasoning: false,
            task_class: None,
            required_capabilities: Vec::new(),
            max_latency_ms: None,
            call_timeout_ms: None,
            tool: None,
            fan_out: 3,
            top_k: 2,
            max_depth: 2,
            max_subtasks: 4,
            convergence_threshold: 0.75,
            voting: VotingMode::default(),
        }
    }
}

impl OrchestrationOptions {
    /// Set temperature
    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Set the budget ceiling
    #[must_use]
    pub fn with_budget(mut self, ceiling: f64) -> Self {
        self.budget_ceiling = Some(ceiling);
        self
    }

    /// Set max rounds
    #[must_use]
    pub fn with_max_rounds(mut self, rounds: usize) -> Self {
        self.max_rounds = rounds;
        self
    }

    /// Set the per-call deadline
    #[must_use]
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout_ms = Some(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX));
        self
    }

    /// Request a reasoning trace
    #[must_use]
    pub fn with_reasoning(mut self) -> Self {
        self.include_reasoning = true;
        self
    }

    /// Task type for routing
    #[must_use]
    pub fn resolve_task_class(&self, prompt: &str) -> TaskClass {
        if let Some(task_class) = self.task_class {
            return task_class;
        }
        if self.use_deep_reasoning {
            return TaskClass::DeepThinking;
        }
        let requires_tools = self.required_capabilities.iter().any(|c| c == "tools");
        classify_prompt(prompt, requires_tools)
    }

    /// Whether the caller named the task type
    #[must_use]
    pub fn task_source(&self) -> TaskSource {
        if self.task_class.is_some() || self.use_deep_reasoning {
            TaskSource::Explicit
        } else {
            TaskSource::Inferred
        }
    }

    /// Reject nonsensical option values
    ///
    /// # Errors
    ///
    /// `InvalidRequest` naming the offending option.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: &str| Err(OrchestrationError::InvalidRequest(msg.to_string()));

        if self.max_rounds == 0 {
            return invalid("max_rounds must be at least 1");
        }
        if self.fan_out == 0 {
            return invalid("fan_out must be at least 1");
        }
        if self.top_k == 0 {
            return invalid("top_k must be at least 1");
        }
        if self.max_depth > MAX_DEPTH_LIMIT {
            return Err(OrchestrationError::InvalidRequest(format!(
                "max_depth must be at most {MAX_DEPTH_LIMIT}"
            )));
        }
        if self.max_subtasks > MAX_SUBTASKS_LIMIT {
            return Err(OrchestrationError::InvalidRequest(format!(
                "max_subtasks must be at most {MAX_SUBTASKS_LIMIT}"
            )));
        }
        if !(0.0..=1.0).contains(&self.convergence_threshold) {
            return invalid("convergence_threshold must be within [0, 1]");
        }
        if let Some(ceiling) = self.budget_ceiling {
            if !ceiling.is_finite() || ceiling < 0.0 {
                return invalid("budget_ceiling must be a non-negative amount");
            }
        }
        Ok(())
    }
}

// ============================================================================
// Strategy Input
// ============================================================================

/// Everything a strategy function receives
#[derive(Clone)]
pub struct StrategyInput {
    /// Invocation primitive
    pub invoker: Arc<Invoker>,
    /// Caller's prompt
    pub prompt: String,
    /// Router output for the request
    pub plan: RoutePlan,
    /// Models taking part, in dispatch order
    pub participants: Vec<Arc<ModelDescriptor>>,
    /// Options
    pub options: OrchestrationOptions,
    /// Constraints the plan was routed with
    pub constraints: InvocationConstraints,
    /// Per-request budget
    pub budget: Option<Budget>,
}

/// Where a call's successful result goes in the run
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Slot {
    /// Participant answer
    Response,
    /// Answer inside the current round
    Round,
    /// Synthesis, decomposition, vote and other helper calls
    Auxiliary,
}

impl StrategyInput {
    /// Options for every call of this run
    #[must_use]
    pub fn call_options(&self) -> InvocationOptions {
        InvocationOptions {
            temperature: self.options.temperature,
            max_tokens: None,
            system: None,
            tool: self.options.tool.clone(),
            timeout: Some(
                self.options
                    .call_timeout_ms
                    .map_or_else(|| self.plan.task_class.default_timeout(), Duration::from_millis),
            ),
            expected_output_tokens: self.constraints.expected_output_tokens,
        }
    }

    /// Plan models not taking part as participants, in plan order
    #[must_use]
    pub fn spares(&self) -> Vec<Arc<ModelDescriptor>> {
        self.plan
            .chain
            .models()
            .filter(|m| !self.participants.iter().any(|p| p.id == m.id))
            .cloned()
            .collect()
    }

    /// `model` first, then every other plan model as fallback
    #[must_use]
    pub fn chain_from(&self, model: &Arc<ModelDescriptor>) -> FallbackChain {
        let fallbacks = self
            .participants
            .iter()
            .chain(self.spares().iter())
            .filter(|m| m.id != model.id)
            .cloned()
            .collect();
        FallbackChain::new(Arc::clone(model), fallbacks, self.plan.task_class)
    }

    /// `model` first, then only the spares
    #[must_use]
    pub fn stage_chain(&self, model: &Arc<ModelDescriptor>) -> FallbackChain {
        let fallbacks = self.spares().into_iter().filter(|m| m.id != model.id).collect();
        FallbackChain::new(Arc::clone(model), fallbacks, self.plan.task_class)
    }

    /// Walk a chain under this run's options and budget
    pub async fn call_chain(&self, chain: &FallbackChain, prompt: &str) -> ChainOutcome {
        self.invoker
            .invoke_with_fallback(chain, prompt, &self.call_options(), self.budget.as_ref())
            .await
    }

    /// Call each model once with the same prompt, concurrently
    pub async fn fan_out(&self, models: &[Arc<ModelDescriptor>], prompt: &str) -> Vec<ChainOutcome> {
        let calls = models.iter().map(|model| {
            let chain = FallbackChain::single(Arc::clone(model), self.plan.task_class);
            async move { self.call_chain(&chain, prompt).await }
        });
        join_all(calls).await
    }

    /// Move a chain outcome into the run; returns the successful result's index
    pub(crate) fn record(run: &mut OrchestrationRun, outcome: ChainOutcome, slot: Slot) -> Option<usize> {
        run.budget_skips.extend(outcome.budget_skips);
        let mut success = None;
        for result in outcome.results {
            let ok = result.success;
            let index = match (slot, ok) {
                (Slot::Response, true) => run.push_response(result),
                (Slot::Round, _) => run.push_round(result),
                _ => run.push(result),
            };
            if ok {
                success = Some(index);
            }
        }
        success
    }

    /// Combine responses with one more call; falls back to the best single
    /// response when synthesis fails
    pub(crate) async fn synthesize(&self, run: &mut OrchestrationRun, responses: &[(String, String)]) -> String {
        if let [(_, only)] = responses {
            return only.clone();
        }

        run.transition(StrategyState::Synthesizing);
        let synthesizer = responses
            .first()
            .and_then(|(id, _)| self.participants.iter().find(|m| &m.id == id))
            .or_else(|| self.participants.first())
            .cloned()
            .unwrap_or_else(|| Arc::clone(self.plan.primary()));

        let chain = self.chain_from(&synthesizer);
        let prompt = prompts::synthesis(&self.prompt, responses);
        let outcome = self.call_chain(&chain, &prompt).await;

        match Self::record(run, outcome, Slot::Auxiliary) {
            Some(index) => {
                let note = format!(
                    "synthesized {} responses with {}",
                    responses.len(),
                    run.invocations[index].model_id
                );
                run.note(note);
                run.invocations[index].text.clone()
            }
            None => {
                let best = self.best_response(responses);
                run.note("synthesis failed; using the highest scoring response");
                best
            }
        }
    }

    /// Highest heuristic-scoring response text
    #[must_use]
    pub fn best_response(&self, responses: &[(String, String)]) -> String {
        let mut best: Option<(f64, &String)> = None;
        for (_, text) in responses {
            let score = scoring::response_score(&self.prompt, text);
            match best {
                Some((s, _)) if s >= score => {}
                _ => best = Some((score, text)),
            }
        }
        best.map(|(_, text)| text.clone()).unwrap_or_default()
    }

    /// Error for a run that produced nothing usable
    #[must_use]
    pub fn no_result_error(&self, run: &OrchestrationRun) -> OrchestrationError {
        if run.invocations.is_empty() && !run.budget_skips.is_empty() {
            let cheapest = run
                .budget_skips
                .iter()
                .map(|(_, cost)| *cost)
                .fold(f64::INFINITY, f64::min);
            return OrchestrationError::BudgetExceeded {
                ceiling: self.budget.as_ref().map_or(0.0, Budget::remaining),
                cheapest_estimate: cheapest,
            };
        }
        OrchestrationError::from_failures(run.failures.clone())
    }

    /// Successful results of the participants, for logs
    pub(crate) fn successes(results: &[ChainOutcome]) -> usize {
        results.iter().filter(|o| o.success().is_some()).count()
    }
}

impl fmt::Debug for StrategyInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StrategyInput")
            .field("participants", &self.participants.iter().map(|m| &m.id).collect::<Vec<_>>())
            .field("task_class", &self.plan.task_class)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Orchestrator
// ============================================================================

/// Routes a request and runs the chosen strategy
#[derive(Clone, Debug)]
pub struct Orchestrator {
    invoker: Arc<Invoker>,
}

impl Orchestrator {
    /// Create an orchestrator over an invoker
    #[must_use]
    pub fn new(invoker: Arc<Invoker>) -> Self {
        Self { invoker }
    }

    /// Get the invoker
    #[must_use]
    pub fn invoker(&self) -> &Arc<Invoker> {
        &self.invoker
    }

    /// Route `prompt` and execute `strategy`
    ///
    /// # Errors
    ///
    /// Fails only when constraints are unsatisfiable before any call
    /// (`InvalidRequest`, `ModelNotFound`, `NoCandidates`, `BudgetExceeded`)
    /// or when no usable result exists. Partial failures are annotated in
    /// the returned run.
    pub async fn run(
        &self,
        prompt: &str,
        strategy: Strategy,
        models_override: Option<&[String]>,
        options: OrchestrationOptions,
    ) -> Result<OrchestrationRun> {
        if prompt.trim().is_empty() {
            return Err(OrchestrationError::InvalidRequest("prompt is empty".to_string()));
        }
        options.validate()?;

        let context = Arc::clone(self.invoker.context());
        let _request = context.monitor().begin_request();
        let started = tokio::time::Instant::now();

        let task_class = options.resolve_task_class(prompt);
        let constraints = InvocationConstraints {
            max_cost: options.budget_ceiling,
            max_latency_ms: options.max_latency_ms,
            required_capabilities: options.required_capabilities.clone(),
            temperature: options.temperature,
            model_override: models_override.map(<[String]>::to_vec).unwrap_or_default(),
            expected_output_tokens: None,
        };
        let budget = options.budget_ceiling.map(Budget::new);

        let plan = context.router().route(
            task_class,
            options.task_source(),
            prompt,
            &constraints,
            budget.as_ref().map(Budget::remaining),
        )?;

        let participants = select_participants(strategy, &plan, &constraints.model_override, options.fan_out);
        tracing::debug!(
            strategy = %strategy,
            task = %task_class,
            participants = ?participants.iter().map(|m| m.id.as_str()).collect::<Vec<_>>(),
            "Dispatching strategy"
        );

        let include_reasoning = options.include_reasoning;
        let routing_reasoning = plan.reasoning.clone();
        let input = StrategyInput {
            invoker: Arc::clone(&self.invoker),
            prompt: prompt.to_string(),
            plan,
            participants,
            options,
            constraints,
            budget,
        };

        let mut run = (strategy.handler())(input).await?;

        let elapsed = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        run.finalize(elapsed);
        run.reasoning = if include_reasoning {
            Some(match run.reasoning.take() {
                Some(trace) => format!("{routing_reasoning}\n{trace}"),
                None => routing_reasoning,
            })
        } else {
            None
        };

        tracing::info!(
            strategy = %strategy,
            models = ?run.metadata.models_used,
            failures = run.failures.len(),
            cost = run.metadata.total_cost,
            duration_ms = run.metadata.total_duration_ms,
            "Orchestration complete"
        );
        Ok(run)
    }

    /// Single call down the routed fallback chain
    ///
    /// # Errors
    ///
    /// Routing errors, or the chain's exhaustion error.
    pub async fn ask(&self, prompt: &str, model_id: Option<&str>) -> Result<InvocationResult> {
        if prompt.trim().is_empty() {
            return Err(OrchestrationError::InvalidRequest("prompt is empty".to_string()));
        }
        let context = self.invoker.context();
        let _request = context.monitor().begin_request();

        let task_class = classify_prompt(prompt, false);
        let mut constraints = InvocationConstraints::default();
        if let Some(id) = model_id {
            constraints.model_override.push(id.to_string());
        }

        let plan = context
            .router()
            .route(task_class, TaskSource::Inferred, prompt, &constraints, None)?;
        let options = InvocationOptions {
            timeout: Some(task_class.default_timeout()),
            ..Default::default()
        };
        self.invoker
            .invoke_with_fallback(&plan.chain, prompt, &options, None)
            .await
            .into_result()
    }
}

/// Pick the models a strategy dispatches to
///
/// An explicit override keeps the caller's order and uses every listed model;
/// otherwise fan-out strategies take the top `fan_out` plan models.
fn select_participants(
    strategy: Strategy,
    plan: &RoutePlan,
    model_override: &[String],
    fan_out: usize,
) -> Vec<Arc<ModelDescriptor>> {
    let mut models: Vec<_> = plan.chain.models().cloned().collect();

    if !model_override.is_empty() {
        models.sort_by_key(|m| {
            model_override
                .iter()
                .position(|id| id == &m.id)
                .unwrap_or(usize::MAX)
        });
        if strategy.fans_out() {
            return models;
        }
    }

    let take = if strategy.fans_out() { fan_out } else { 1 };
    models.truncate(take.max(1));
    models
}
