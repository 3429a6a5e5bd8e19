//! Orchestration Run
//!
//! The structured result of one `orchestrate` call. Multi-round strategies
//! store rounds as an index-addressed arena; hierarchical decomposition is a
//! flat list of nodes with parent indices.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::Strategy;
use crate::error::ModelFailure;
use crate::invocation::InvocationResult;

// ============================================================================
// Strategy State Machine
// ============================================================================

/// Progress of a multi-round strategy
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyState {
    /// Nothing dispatched yet
    Init,
    /// Calls for round `n` are in flight
    RoundInProgress(usize),
    /// Every participant of round `n` has settled
    RoundComplete(usize),
    /// Final combining call in flight
    Synthesizing,
    /// Terminal: final text available
    Done,
    /// Terminal: no usable result
    Failed,
}

impl StrategyState {
    /// Whether no transition leaves this state
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    /// Whether `self -> next` is a legal transition
    #[must_use]
    pub fn can_transition(self, next: Self) -> bool {
        use StrategyState::{Done, Failed, Init, RoundComplete, RoundInProgress, Synthesizing};

        match (self, next) {
            (Done | Failed, _) => false,
            (_, Failed) => true,
            (Init, RoundInProgress(1) | Synthesizing | Done) => true,
            (RoundInProgress(a), RoundComplete(b)) => a == b,
            (RoundComplete(a), RoundInProgress(b)) => b == a + 1,
            (RoundComplete(_), Synthesizing | Done) => true,
            (Synthesizing, Done) => true,
            _ => false,
        }
    }
}

// ============================================================================
// Run Records
// ============================================================================

/// One synchronized round of a multi-round strategy
#[derive(Clone, Debug, Serialize)]
pub struct RoundRecord {
    /// 1-based round number
    pub round: usize,
    /// Indices into `OrchestrationRun::invocations`
    pub invocations: Vec<usize>,
    /// Mean pairwise similarity of the round's successful responses
    pub convergence: Option<f64>,
}

/// One node of a hierarchical decomposition
#[derive(Clone, Debug, Serialize)]
pub struct SubtaskNode {
    /// Position in the flat tree
    pub index: usize,
    /// Parent node; `None` for the root
    pub parent: Option<usize>,
    /// Root is depth 0
    pub depth: usize,
    /// Task text for this node
    pub prompt: String,
    /// Model that produced the output
    pub model_id: Option<String>,
    /// Solved or combined output
    pub output: Option<String>,
    /// Failure, if the node produced nothing
    pub error: Option<String>,
}

/// A consensus ballot
#[derive(Clone, Debug, Serialize)]
pub struct Vote {
    /// Voting model
    pub voter: String,
    /// 0-based candidate index chosen
    pub choice: usize,
    /// Voter's reliability at tally time
    pub weight: f64,
}

/// Summary figures for a run
#[derive(Clone, Debug, Serialize)]
pub struct RunMetadata {
    /// Distinct models with at least one successful response, in first-use order
    pub models_used: Vec<String>,
    /// Wall-clock duration of the whole run
    pub total_duration_ms: u64,
    /// Rounds executed (multi-round strategies)
    pub round_count: usize,
    /// Sum of invocation costs
    pub total_cost: f64,
    /// When the run started
    pub started_at: DateTime<Utc>,
}

/// Result of one `orchestrate` call
#[derive(Clone, Debug, Serialize)]
pub struct OrchestrationRun {
    /// Unique run id
    pub run_id: Uuid,
    /// Strategy executed
    pub strategy: Strategy,
    /// Final state
    pub state: StrategyState,
    /// Every invocation, failed attempts included, in completion order
    pub invocations: Vec<InvocationResult>,
    /// Indices into `invocations` of the participant answers
    pub responses: Vec<usize>,
    /// Multi-round arena
    pub rounds: Vec<RoundRecord>,
    /// Hierarchical decomposition tree
    pub subtasks: Vec<SubtaskNode>,
    /// Consensus ballots
    pub votes: Vec<Vote>,
    /// Models that produced no usable answer
    pub failures: Vec<ModelFailure>,
    /// Models skipped before calling because their estimate exceeded the remaining budget
    pub budget_skips: Vec<(String, f64)>,
    /// Aggregated answer
    pub final_text: String,
    /// Routing and round trace when requested
    pub reasoning: Option<String>,
    /// Error that cut a sequential chain short
    pub partial_error: Option<String>,
    /// Summary figures
    pub metadata: RunMetadata,
}

impl OrchestrationRun {
    /// Start an empty run
    #[must_use]
    pub fn new(strategy: Strategy) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            strategy,
            state: StrategyState::Init,
            invocations: Vec::new(),
            responses: Vec::new(),
            rounds: Vec::new(),
            subtasks: Vec::new(),
            votes: Vec::new(),
            failures: Vec::new(),
            budget_skips: Vec::new(),
            final_text: String::new(),
            reasoning: None,
            partial_error: None,
            metadata: RunMetadata {
                models_used: Vec::new(),
                total_duration_ms: 0,
                round_count: 0,
                total_cost: 0.0,
                started_at: Utc::now(),
            },
        }
    }

    /// Move to `next`, ignoring illegal transitions
    pub fn transition(&mut self, next: StrategyState) {
        if self.state.can_transition(next) {
            tracing::debug!(run = %self.run_id, from = ?self.state, to = ?next, "Strategy state");
            self.state = next;
        } else {
            tracing::debug!(run = %self.run_id, from = ?self.state, to = ?next, "Ignored illegal transition");
        }
    }

    /// Record an invocation; failures are also noted in `failures`
    pub fn push(&mut self, result: InvocationResult) -> usize {
        if let Some(failure) = result.failure() {
            self.failures.push(failure);
        }
        self.invocations.push(result);
        self.invocations.len() - 1
    }

    /// Record a participant answer and mark it as a response
    pub fn push_response(&mut self, result: InvocationResult) -> usize {
        let success = result.success;
        let index = self.push(result);
        if success {
            self.responses.push(index);
        }
        index
    }

    /// Successful participant answers, in response order
    pub fn response_results(&self) -> impl Iterator<Item = &InvocationResult> {
        self.responses.iter().filter_map(|&i| self.invocations.get(i))
    }

    /// `(model, text)` pairs of the participant answers
    #[must_use]
    pub fn response_pairs(&self) -> Vec<(String, String)> {
        self.response_results()
            .map(|r| (r.model_id.clone(), r.text.clone()))
            .collect()
    }

    /// Open a new round and return its number
    pub fn begin_round(&mut self) -> usize {
        let round = self.rounds.len() + 1;
        self.transition(StrategyState::RoundInProgress(round));
        self.rounds.push(RoundRecord {
            round,
            invocations: Vec::new(),
            convergence: None,
        });
        round
    }

    /// Attach an invocation to the current round
    pub fn push_round(&mut self, result: InvocationResult) -> usize {
        let index = self.push(result);
        if let Some(round) = self.rounds.last_mut() {
            round.invocations.push(index);
        }
        index
    }

    /// Successful answers of round `round` (1-based)
    #[must_use]
    pub fn round_pairs(&self, round: usize) -> Vec<(String, String)> {
        self.rounds
            .get(round.wrapping_sub(1))
            .map(|r| {
                r.invocations
                    .iter()
                    .filter_map(|&i| self.invocations.get(i))
                    .filter(|r| r.success)
                    .map(|r| (r.model_id.clone(), r.text.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Close the current round
    pub fn complete_round(&mut self, convergence: Option<f64>) {
        if let Some(round) = self.rounds.last_mut() {
            round.convergence = convergence;
            let n = round.round;
            self.transition(StrategyState::RoundComplete(n));
        }
    }

    /// Append a line to the reasoning trace
    pub fn note(&mut self, line: impl Into<String>) {
        let line = line.into();
        match &mut self.reasoning {
            Some(trace) => {
                trace.push('\n');
                trace.push_str(&line);
            }
            None => self.reasoning = Some(line),
        }
    }

    /// Set the answer and enter `Done`
    pub fn succeed(&mut self, text: impl Into<String>) {
        self.final_text = text.into();
        self.transition(StrategyState::Done);
    }

    /// Fill in metadata once the strategy has returned
    pub fn finalize(&mut self, duration_ms: u64) {
        let mut seen = BTreeSet::new();
        let mut models_used = Vec::new();
        for result in self.invocations.iter().filter(|r| r.success) {
            if seen.insert(result.model_id.clone()) {
                models_used.push(result.model_id.clone());
            }
        }

        self.metadata.models_used = models_used;
        self.metadata.total_duration_ms = duration_ms;
        self.metadata.round_count = self.rounds.len();
        self.metadata.total_cost = self.invocations.iter().map(|r| r.cost).sum();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn ok(model: &str, text: &str) -> InvocationResult {
        InvocationResult {
            model_id: model.to_string(),
            text: text.to_string(),
            input_tokens: 1,
            output_tokens: 1,
            latency_ms: 5,
            cost: 0.5,
            success: true,
            error: None,
            attempts: 1,
        }
    }

    fn failed(model: &str) -> InvocationResult {
        InvocationResult {
            success: false,
            text: String::new(),
            cost: 0.0,
            error: Some(crate::invocation::InvocationError {
                kind: ErrorKind::Transient,
                message: "timeout".into(),
            }),
            ..ok(model, "")
        }
    }

    #[test]
    fn test_terminal_states_are_final() {
        assert!(!StrategyState::Done.can_transition(StrategyState::Failed));
        assert!(!StrategyState::Failed.can_transition(StrategyState::Init));
        assert!(StrategyState::Init.can_transition(StrategyState::RoundInProgress(1)));
        assert!(!StrategyState::Init.can_transition(StrategyState::RoundInProgress(2)));
        assert!(StrategyState::RoundComplete(1).can_transition(StrategyState::RoundInProgress(2)));
        assert!(StrategyState::RoundComplete(2).can_transition(StrategyState::Synthesizing));
        assert!(StrategyState::Synthesizing.can_transition(StrategyState::Done));
    }

    #[test]
    fn test_illegal_transition_is_ignored() {
        let mut run = OrchestrationRun::new(Strategy::Debate);
        run.transition(StrategyState::Failed);
        run.transition(StrategyState::Done);
        assert_eq!(run.state, StrategyState::Failed);
    }

    #[test]
    fn test_rounds_arena() {
        let mut run = OrchestrationRun::new(Strategy::Debate);
        assert_eq!(run.begin_round(), 1);
        run.push_round(ok("a", "x"));
        run.push_round(failed("b"));
        run.complete_round(Some(1.0));
        assert_eq!(run.begin_round(), 2);
        run.push_round(ok("a", "y"));

        assert_eq!(run.round_pairs(1), vec![("a".to_string(), "x".to_string())]);
        assert_eq!(run.round_pairs(2).len(), 1);
        assert!(run.round_pairs(3).is_empty());
        assert_eq!(run.failures.len(), 1);
        assert_eq!(run.state, StrategyState::RoundInProgress(2));
    }

    #[test]
    fn test_finalize_collects_models_in_order() {
        let mut run = OrchestrationRun::new(Strategy::Parallel);
        run.push_response(ok("b", "1"));
        run.push_response(failed("c"));
        run.push_response(ok("a", "2"));
        run.push(ok("b", "synthesis"));
        run.finalize(42);

        assert_eq!(run.responses.len(), 2);
        assert_eq!(run.metadata.models_used, vec!["b", "a"]);
        assert!((run.metadata.total_cost - 1.5).abs() < 1e-9);
        assert_eq!(run.metadata.total_duration_ms, 42);
    }
}
