//! Cost Optimizer
//!
//! Scores candidate models, enforces per-request budgets and keeps the
//! process-wide usage ledger.
//!
//! # Scoring
//!
//! Capability match is a gate, not a weight. Surviving candidates get a
//! fixed weighted sum of:
//! - historical reliability from the performance monitor (higher is better)
//! - estimated call cost, min-max normalized across candidates (lower is better)
//! - estimated latency, min-max normalized across candidates (lower is better)
//!
//! Equal scores are ordered by lower cost, then lower latency, then id.
//!
//! # Budgets
//!
//! A [`Budget`] is shared by every call of one request. Selection reserves
//! the estimated cost under the budget's lock, so two concurrent selections
//! can never both pass a check that only one has room for. The reservation
//! is settled with the real cost once known, or released on drop.

use std::cmp::{Ordering, Reverse};
use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;

use super::config::{CostWeights, InvocationConstraints, ModelDescriptor};
use super::metrics::PerformanceMonitor;
use crate::error::{OrchestrationError, Result};

/// Rough token estimate for text: one token per four characters, at least one
#[must_use]
pub fn estimate_tokens(text: &str) -> u32 {
    let chars = text.chars().count();
    u32::try_from(chars.div_ceil(4).max(1)).unwrap_or(u32::MAX)
}

// ============================================================================
// Usage Ledger
// ============================================================================

/// Cumulative cost and token counts
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct UsageTotals {
    pub cost: f64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub calls: u64,
}

impl UsageTotals {
    fn add(&mut self, input_tokens: u32, output_tokens: u32, cost: f64) {
        self.cost += cost.max(0.0);
        self.input_tokens += u64::from(input_tokens);
        self.output_tokens += u64::from(output_tokens);
        self.calls += 1;
    }
}

/// Serializable copy of the ledger
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct UsageSnapshot {
    pub totals: UsageTotals,
    pub per_model: BTreeMap<String, UsageTotals>,
}

/// Process-wide usage ledger. Totals only grow until `clear`.
#[derive(Debug, Default)]
pub struct UsageLedger {
    inner: Mutex<UsageSnapshot>,
}

impl UsageLedger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one completed call
    pub fn track(&self, model_id: &str, input_tokens: u32, output_tokens: u32, cost: f64) {
        let mut inner = self.inner.lock();
        inner.totals.add(input_tokens, output_tokens, cost);
        inner
            .per_model
            .entry(model_id.to_string())
            .or_default()
            .add(input_tokens, output_tokens, cost);
    }

    #[must_use]
    pub fn totals(&self) -> UsageTotals {
        self.inner.lock().totals.clone()
    }

    #[must_use]
    pub fn model_usage(&self, model_id: &str) -> Option<UsageTotals> {
        self.inner.lock().per_model.get(model_id).cloned()
    }

    #[must_use]
    pub fn snapshot(&self) -> UsageSnapshot {
        self.inner.lock().clone()
    }

    /// The only operation that lowers the totals
    pub fn clear(&self) {
        *self.inner.lock() = UsageSnapshot::default();
    }
}

// ============================================================================
// Budget
// ============================================================================

#[derive(Debug)]
struct BudgetState {
    ceiling: f64,
    spent: f64,
    reserved: f64,
}

impl BudgetState {
    fn remaining(&self) -> f64 {
        (self.ceiling - self.spent - self.reserved).max(0.0)
    }
}

/// Spend ceiling for a single request, shared by all of its calls
#[derive(Clone, Debug)]
pub struct Budget {
    state: Arc<Mutex<BudgetState>>,
}

impl Budget {
    #[must_use]
    pub fn new(ceiling: f64) -> Self {
        Self {
            state: Arc::new(Mutex::new(BudgetState {
                ceiling: ceiling.max(0.0),
                spent: 0.0,
                reserved: 0.0,
            })),
        }
    }

    #[must_use]
    pub fn ceiling(&self) -> f64 {
        self.state.lock().ceiling
    }

    /// Ceiling minus settled spend minus outstanding reservations
    #[must_use]
    pub fn remaining(&self) -> f64 {
        self.state.lock().remaining()
    }

    #[must_use]
    pub fn spent(&self) -> f64 {
        self.state.lock().spent
    }

    /// Atomically check for room and reserve `amount`
    #[must_use]
    pub fn try_reserve(&self, amount: f64) -> Option<BudgetReservation> {
        let amount = amount.max(0.0);
        let mut state = self.state.lock();
        if amount > state.remaining() {
            return None;
        }
        state.reserved += amount;
        Some(BudgetReservation {
            state: Arc::clone(&self.state),
            amount,
            settled: false,
        })
    }
}

/// Held estimated cost; settle with the real cost or drop to release
#[derive(Debug)]
pub struct BudgetReservation {
    state: Arc<Mutex<BudgetState>>,
    amount: f64,
    settled: bool,
}

impl BudgetReservation {
    #[must_use]
    pub fn amount(&self) -> f64 {
        self.amount
    }

    /// Replace the reservation with the actual spend
    pub fn settle(mut self, actual_cost: f64) {
        let mut state = self.state.lock();
        state.reserved = (state.reserved - self.amount).max(0.0);
        state.spent += actual_cost.max(0.0);
        self.settled = true;
    }
}

impl Drop for BudgetReservation {
    fn drop(&mut self) {
        if !self.settled {
            let mut state = self.state.lock();
            state.reserved = (state.reserved - self.amount).max(0.0);
        }
    }
}

// ============================================================================
// Cost Optimizer
// ============================================================================

/// A candidate with its score and estimates
#[derive(Clone, Debug)]
pub struct ScoredModel {
    pub model: Arc<ModelDescriptor>,
    pub score: f64,
    pub estimated_cost: f64,
    pub estimated_latency_ms: u64,
    pub reliability: f64,
}

/// Outcome of `select_optimal_model`
#[derive(Clone, Debug)]
pub struct Selection {
    pub model: Arc<ModelDescriptor>,
    pub reason: String,
    pub score: f64,
    pub estimated_cost: f64,
}

/// Scores candidates and tracks spend
#[derive(Debug)]
pub struct CostOptimizer {
    weights: CostWeights,
    monitor: Arc<PerformanceMonitor>,
    ledger: Arc<UsageLedger>,
}

impl CostOptimizer {
    #[must_use]
    pub fn new(
        weights: CostWeights,
        monitor: Arc<PerformanceMonitor>,
        ledger: Arc<UsageLedger>,
    ) -> Self {
        Self {
            weights,
            monitor,
            ledger,
        }
    }

    #[must_use]
    pub fn weights(&self) -> &CostWeights {
        &self.weights
    }

    #[must_use]
    pub fn ledger(&self) -> &Arc<UsageLedger> {
        &self.ledger
    }

    /// Estimated cost of sending `prompt` to `model`
    #[must_use]
    pub fn estimate_call_cost(
        &self,
        model: &ModelDescriptor,
        prompt: &str,
        constraints: &InvocationConstraints,
    ) -> f64 {
        let output_tokens = constraints
            .expected_output_tokens
            .unwrap_or(self.weights.default_output_tokens);
        model.estimate_cost(estimate_tokens(prompt), output_tokens)
    }

    /// Observed p50 latency, or the declared baseline without history
    #[must_use]
    pub fn estimated_latency_ms(&self, model: &ModelDescriptor) -> u64 {
        self.monitor
            .stats(&model.id)
            .p50_ms
            .unwrap_or(model.baseline_latency_ms)
    }

    /// Score and order capability-matching candidates, best first
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn rank(
        &self,
        candidates: &[Arc<ModelDescriptor>],
        prompt: &str,
        constraints: &InvocationConstraints,
    ) -> Vec<ScoredModel> {
        let mut scored: Vec<ScoredModel> = candidates
            .iter()
            .filter(|m| m.has_capabilities(&constraints.required_capabilities))
            .map(|m| ScoredModel {
                model: Arc::clone(m),
                score: 0.0,
                estimated_cost: self.estimate_call_cost(m, prompt, constraints),
                estimated_latency_ms: self.estimated_latency_ms(m),
                reliability: self.monitor.reliability(&m.id),
            })
            .collect();

        if scored.is_empty() {
            return scored;
        }

        let (min_cost, max_cost) = min_max(scored.iter().map(|s| s.estimated_cost));
        let (min_lat, max_lat) = min_max(scored.iter().map(|s| s.estimated_latency_ms as f64));
        let total_weight =
            (self.weights.reliability + self.weights.cost + self.weights.latency).max(f64::EPSILON);

        for s in &mut scored {
            let cost_term = 1.0 - normalize(s.estimated_cost, min_cost, max_cost);
            let latency_term = 1.0 - normalize(s.estimated_latency_ms as f64, min_lat, max_lat);
            s.score = (self.weights.reliability * s.reliability
                + self.weights.cost * cost_term
                + self.weights.latency * latency_term)
                / total_weight;
        }

        scored.sort_by(ScoredModel::rank_cmp);
        scored
    }

    /// Pick the best candidate whose estimated cost fits `remaining_budget`
    ///
    /// # Errors
    ///
    /// `NoCandidates` when no candidate passes the capability gate;
    /// `BudgetExceeded` when every candidate costs more than the remaining
    /// budget. No default model is ever substituted.
    pub fn select_optimal_model(
        &self,
        candidates: &[Arc<ModelDescriptor>],
        prompt: &str,
        constraints: &InvocationConstraints,
        remaining_budget: Option<f64>,
    ) -> Result<Selection> {
        let ranked = self.rank(candidates, prompt, constraints);
        if ranked.is_empty() {
            return Err(OrchestrationError::NoCandidates {
                reason: format!(
                    "no model declares capabilities [{}]",
                    constraints.required_capabilities.join(", ")
                ),
            });
        }

        let (affordable, _) = self.within_budget(ranked, remaining_budget)?;
        let best = affordable
            .into_iter()
            .next()
            .ok_or_else(|| OrchestrationError::NoCandidates {
                reason: "no ranked candidate".to_string(),
            })?;
        let reason = format!(
            "score {:.3} (reliability {:.2}, est. ${:.6}, est. {}ms)",
            best.score, best.reliability, best.estimated_cost, best.estimated_latency_ms
        );
        Ok(Selection {
            model: best.model,
            reason,
            score: best.score,
            estimated_cost: best.estimated_cost,
        })
    }

    /// Split ordered candidates into `(affordable, over budget)`, keeping order
    ///
    /// # Errors
    ///
    /// `BudgetExceeded` when candidates exist but none fits; the rejection
    /// is counted by the monitor.
    pub fn within_budget(
        &self,
        ordered: Vec<ScoredModel>,
        remaining_budget: Option<f64>,
    ) -> Result<(Vec<ScoredModel>, Vec<ScoredModel>)> {
        let Some(remaining) = remaining_budget else {
            return Ok((ordered, Vec::new()));
        };
        let (affordable, over): (Vec<_>, Vec<_>) = ordered
            .into_iter()
            .partition(|s| s.estimated_cost <= remaining);
        if affordable.is_empty() && !over.is_empty() {
            let cheapest = over
                .iter()
                .map(|s| s.estimated_cost)
                .fold(f64::INFINITY, f64::min);
            self.monitor.record_budget_rejection();
            tracing::warn!(remaining, cheapest, "No candidate fits the remaining budget");
            return Err(OrchestrationError::BudgetExceeded {
                ceiling: remaining,
                cheapest_estimate: cheapest,
            });
        }
        Ok((affordable, over))
    }

    /// Record real usage in the ledger; returns the cost
    pub fn track_usage(&self, model: &ModelDescriptor, input_tokens: u32, output_tokens: u32) -> f64 {
        let cost = model.estimate_cost(input_tokens, output_tokens);
        self.ledger.track(&model.id, input_tokens, output_tokens, cost);
        cost
    }
}

fn min_max(values: impl Iterator<Item = f64>) -> (f64, f64) {
    values.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
        (lo.min(v), hi.max(v))
    })
}

fn normalize(value: f64, min: f64, max: f64) -> f64 {
    if (max - min).abs() < f64::EPSILON {
        0.0
    } else {
        (value - min) / (max - min)
    }
}

/// Scores compared at 1e-9 resolution so float noise falls to the tie-breakers
#[allow(clippy::cast_possible_truncation)]
fn score_key(score: f64) -> i64 {
    (score * 1e9).round() as i64
}

impl ScoredModel {
    /// Compare by rank order (best first)
    #[must_use]
    pub fn rank_cmp(&self, other: &Self) -> Ordering {
        Reverse(score_key(self.score))
            .cmp(&Reverse(score_key(other.score)))
            .then_with(|| self.estimated_cost.total_cmp(&other.estimated_cost))
            .then_with(|| self.estimated_latency_ms.cmp(&other.estimated_latency_ms))
            .then_with(|| self.model.id.cmp(&other.model.id))
    }
}
