//! Routing Policy
//!
//! Turns a task type and constraints into an ordered fallback chain.
//!
//! # Routing Decision Flow
//!
//! ```text
//! 1. Classify the prompt when no task type is given
//! 2. Candidates: explicit override list, or capability search in the registry.
//!    Only caller-supplied tags and an explicit task type gate candidates;
//!    a classified task type only orders them
//! 3. Drop candidates that cannot meet the latency ceiling
//! 4. Rank with the cost optimizer (reliability, cost, latency)
//! 5. Prefer models tagged for the task type; demote models with high
//!    recent error rates
//! 6. Drop candidates over the remaining budget (BudgetExceeded if none left)
//! 7. Primary + every remaining candidate as ordered fallbacks
//! ```

use std::sync::Arc;

use serde::Serialize;

use super::config::{InvocationConstraints, ModelDescriptor, TaskClass};
use super::cost::{CostOptimizer, ScoredModel};
use super::fallback::FallbackChain;
use super::metrics::PerformanceMonitor;
use super::registry::ModelRegistry;
use crate::error::{OrchestrationError, Result};

// ============================================================================
// Classification
// ============================================================================

fn has_word(words: &[&str], candidates: &[&str]) -> bool {
    words.iter().any(|w| candidates.contains(w))
}

/// Auto-classify a prompt by keyword heuristics
///
/// `Embedding` is never inferred; callers name it.
#[must_use]
pub fn classify_prompt(prompt: &str, requires_tools: bool) -> TaskClass {
    let prompt_lower = prompt.to_lowercase();
    let words: Vec<&str> = prompt_lower
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();
    let word_count = prompt.split_whitespace().count();

    if requires_tools {
        return TaskClass::ToolUse;
    }

    // Quick response patterns
    if word_count < 10 && has_word(&words, &["hi", "hello", "hey", "thanks"]) {
        return TaskClass::QuickResponse;
    }

    // Code patterns
    if prompt_lower.contains("```")
        || has_word(
            &words,
            &["code", "function", "implement", "bug", "fix", "refactor", "compile"],
        )
    {
        return TaskClass::CodeGeneration;
    }

    // Math patterns
    if has_word(
        &words,
        &["calculate", "solve", "prove", "equation", "math", "integral"],
    ) {
        return TaskClass::Mathematical;
    }

    // Deep thinking patterns
    if has_word(&words, &["analyze", "analyse"])
        || prompt_lower.contains("explain in detail")
        || prompt_lower.contains("compare and contrast")
        || prompt_lower.contains("step by step")
        || word_count > 100
    {
        return TaskClass::DeepThinking;
    }

    // Creative patterns
    if has_word(&words, &["story", "poem", "write", "creative", "imagine"]) {
        return TaskClass::Creative;
    }

    // Tool use patterns
    if prompt_lower.contains("look up") || has_word(&words, &["search", "fetch"]) {
        return TaskClass::ToolUse;
    }

    TaskClass::General
}

/// Where a request's task type came from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskSource {
    /// Named by the caller; its required capability gates candidates
    Explicit,
    /// Classified from the prompt; only orders candidates
    Inferred,
}

// ============================================================================
// Route Plan
// ============================================================================

/// The router's answer: a chain plus why it looks the way it does
#[derive(Clone, Debug, Serialize)]
pub struct RoutePlan {
    /// Task type the plan was built for
    pub task_class: TaskClass,

    /// Whether the task type was given or classified
    pub task_source: TaskSource,

    /// Primary and ordered fallbacks
    pub chain: FallbackChain,

    /// Human-readable explanation naming the task type and narrowing constraints
    pub reasoning: String,

    /// Estimated cost per chain member, in chain order
    pub estimated_costs: Vec<(String, f64)>,
}

impl RoutePlan {
    #[must_use]
    pub fn primary(&self) -> &Arc<ModelDescriptor> {
        &self.chain.primary
    }

    #[must_use]
    pub fn fallbacks(&self) -> &[Arc<ModelDescriptor>] {
        &self.chain.fallbacks
    }

    /// Estimated cost of one call to `model_id`, if it is in the plan
    #[must_use]
    pub fn estimated_cost(&self, model_id: &str) -> Option<f64> {
        self.estimated_costs
            .iter()
            .find(|(id, _)| id == model_id)
            .map(|(_, cost)| *cost)
    }
}

// ============================================================================
// Model Router
// ============================================================================

/// Combines registry, optimizer and monitor into routing decisions
#[derive(Debug, Clone)]
pub struct ModelRouter {
    registry: Arc<ModelRegistry>,
    optimizer: Arc<CostOptimizer>,
    monitor: Arc<PerformanceMonitor>,
}

impl ModelRouter {
    #[must_use]
    pub fn new(
        registry: Arc<ModelRegistry>,
        optimizer: Arc<CostOptimizer>,
        monitor: Arc<PerformanceMonitor>,
    ) -> Self {
        Self {
            registry,
            optimizer,
            monitor,
        }
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<ModelRegistry> {
        &self.registry
    }

    #[must_use]
    pub fn optimizer(&self) -> &Arc<CostOptimizer> {
        &self.optimizer
    }

    /// Build the fallback chain for a task
    ///
    /// # Errors
    ///
    /// - `ModelNotFound` when an override names an unregistered model
    /// - `NoCandidates` when capability or latency constraints leave nothing
    /// - `BudgetExceeded` when every candidate costs more than `remaining_budget`
    pub fn route(
        &self,
        task_class: TaskClass,
        task_source: TaskSource,
        prompt: &str,
        constraints: &InvocationConstraints,
        remaining_budget: Option<f64>,
    ) -> Result<RoutePlan> {
        let mut notes: Vec<String> = Vec::new();

        let mut effective = constraints.clone();
        if task_source == TaskSource::Explicit {
            if let Some(tag) = task_class.required_capability() {
                if !effective.required_capabilities.iter().any(|c| c == tag) {
                    effective.required_capabilities.push(tag.to_string());
                }
            }
        }
        if !effective.required_capabilities.is_empty() {
            notes.push(format!(
                "requires [{}]",
                effective.required_capabilities.join(", ")
            ));
        }

        let mut candidates = if constraints.model_override.is_empty() {
            if self.registry.is_empty() {
                return Err(OrchestrationError::NoCandidates {
                    reason: "the model registry is empty".to_string(),
                });
            }
            self.registry.by_capability(&effective.required_capabilities)
        } else {
            notes.push(format!(
                "restricted to [{}]",
                constraints.model_override.join(", ")
            ));
            let models = constraints
                .model_override
                .iter()
                .map(|id| self.registry.lookup(id))
                .collect::<Result<Vec<_>>>()?;
            models
                .into_iter()
                .filter(|m| m.has_capabilities(&effective.required_capabilities))
                .collect()
        };

        if candidates.is_empty() {
            return Err(OrchestrationError::NoCandidates {
                reason: format!("task {task_class}: no model {}", notes.join(", ")),
            });
        }

        if let Some(max_latency_ms) = constraints.max_latency_ms {
            let before = candidates.len();
            candidates.retain(|m| self.optimizer.estimated_latency_ms(m) <= max_latency_ms);
            if candidates.is_empty() {
                return Err(OrchestrationError::NoCandidates {
                    reason: format!("task {task_class}: no model within {max_latency_ms}ms"),
                });
            }
            if candidates.len() < before {
                notes.push(format!(
                    "latency <= {max_latency_ms}ms excluded {}",
                    before - candidates.len()
                ));
            }
        }

        let ranked = self.optimizer.rank(&candidates, prompt, &effective);
        let ordered = self.order_for_task(task_class, ranked, &mut notes);

        let (ordered, over) = self.optimizer.within_budget(ordered, remaining_budget)?;
        if let (Some(remaining), false) = (remaining_budget, over.is_empty()) {
            notes.push(format!(
                "budget ${remaining:.6} excluded {}",
                over.iter()
                    .map(|s| s.model.id.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            ));
        }

        let estimated_costs = ordered
            .iter()
            .map(|s| (s.model.id.clone(), s.estimated_cost))
            .collect();
        let primary_reason = ordered
            .first()
            .map(|s| {
                format!(
                    "{} (score {:.3}, est. ${:.6})",
                    s.model.id, s.score, s.estimated_cost
                )
            })
            .unwrap_or_default();
        let chain = FallbackChain::from_ordered(
            ordered.into_iter().map(|s| s.model).collect(),
            task_class,
        )
        .ok_or_else(|| OrchestrationError::NoCandidates {
            reason: format!("task {task_class}: empty chain"),
        })?;

        let mut reasoning = format!("task {task_class}: primary {primary_reason}");
        if !chain.fallbacks.is_empty() {
            reasoning.push_str(&format!(
                ", fallbacks [{}]",
                chain
                    .fallbacks
                    .iter()
                    .map(|m| m.id.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            ));
        }
        if !notes.is_empty() {
            reasoning.push_str("; ");
            reasoning.push_str(&notes.join("; "));
        }

        tracing::debug!(
            task = %task_class,
            primary = %chain.primary.id,
            depth = chain.depth(),
            "Routed request"
        );

        Ok(RoutePlan {
            task_class,
            task_source,
            chain,
            reasoning,
            estimated_costs,
        })
    }

    /// Stable three-tier order: preferred healthy, other healthy, degraded
    fn order_for_task(
        &self,
        task_class: TaskClass,
        ranked: Vec<ScoredModel>,
        notes: &mut Vec<String>,
    ) -> Vec<ScoredModel> {
        let preferred = task_class.preferred_capability();
        let mut tiers: [Vec<ScoredModel>; 3] = [Vec::new(), Vec::new(), Vec::new()];

        for scored in ranked {
            let tier = if self.monitor.is_degraded(&scored.model.id) {
                notes.push(format!(
                    "demoted {} (error rate {:.2})",
                    scored.model.id,
                    self.monitor.stats(&scored.model.id).error_rate
                ));
                2
            } else if preferred.is_some_and(|tag| scored.model.has_capability(tag)) {
                0
            } else {
                1
            };
            tiers[tier].push(scored);
        }

        tiers.into_iter().flatten().collect()
    }
}
