//! Consensus: an answer round, then a vote round in which every participant
//! picks the best candidate. Votes are tallied per [`VotingMode`]; without a
//! winner the candidates are synthesized instead.

use futures::future::BoxFuture;

use crate::error::Result;
use crate::orchestrator::{
    prompts, scoring, OrchestrationRun, Slot, Strategy, StrategyInput, StrategyState, Vote, VotingMode,
};

pub fn run(input: StrategyInput) -> BoxFuture<'static, Result<OrchestrationRun>> {
    Box::pin(execute(input))
}

async fn execute(input: StrategyInput) -> Result<OrchestrationRun> {
    let mut run = OrchestrationRun::new(Strategy::Consensus);

    let round = run.begin_round();
    let outcomes = input.fan_out(&input.participants, &input.prompt).await;
    for outcome in outcomes {
        StrategyInput::record(&mut run, outcome, Slot::Round);
    }
    run.responses = successful_indices(&run, round);
    run.complete_round(None);

    let candidates = run.round_pairs(round);
    match candidates.len() {
        0 => {
            run.transition(StrategyState::Failed);
            return Err(input.no_result_error(&run));
        }
        1 => {
            run.note("one candidate answer; no vote needed");
            let text = candidates[0].1.clone();
            run.succeed(text);
            return Ok(run);
        }
        _ => {}
    }

    if input.options.max_rounds < 2 {
        run.note("max_rounds leaves no room for a vote; synthesizing");
        let text = input.synthesize(&mut run, &candidates).await;
        run.succeed(text);
        return Ok(run);
    }

    let vote_round = run.begin_round();
    let ballot = prompts::vote(&input.prompt, &candidates);
    let outcomes = input.fan_out(&input.participants, &ballot).await;
    for outcome in outcomes {
        StrategyInput::record(&mut run, outcome, Slot::Round);
    }

    let monitor = input.invoker.context().monitor();
    let ballots: Vec<Vote> = successful_indices(&run, vote_round)
        .into_iter()
        .filter_map(|i| run.invocations.get(i))
        .filter_map(|result| {
            let choice = scoring::parse_vote(&result.text, candidates.len())?;
            let weight = match input.options.voting {
                VotingMode::ReliabilityWeighted => monitor.reliability(&result.model_id),
                VotingMode::Majority => 1.0,
            };
            Some(Vote {
                voter: result.model_id.clone(),
                choice,
                weight,
            })
        })
        .collect();
    run.votes = ballots;
    run.complete_round(None);

    match tally(&run.votes, candidates.len(), input.options.voting) {
        Some(winner) => {
            tracing::debug!(winner, votes = run.votes.len(), "Consensus reached");
            run.note(format!(
                "{} valid votes; candidate {} from {} wins",
                run.votes.len(),
                winner + 1,
                candidates[winner].0
            ));
            let text = candidates[winner].1.clone();
            run.succeed(text);
        }
        None => {
            run.note(format!("no consensus from {} valid votes; synthesizing", run.votes.len()));
            let text = input.synthesize(&mut run, &candidates).await;
            run.succeed(text);
        }
    }
    Ok(run)
}

fn successful_indices(run: &OrchestrationRun, round: usize) -> Vec<usize> {
    run.rounds
        .get(round.wrapping_sub(1))
        .map(|r| {
            r.invocations
                .iter()
                .copied()
                .filter(|&i| run.invocations.get(i).is_some_and(|inv| inv.success))
                .collect()
        })
        .unwrap_or_default()
}

/// Winning candidate index, if the votes decide one
///
/// Weighted mode takes the heaviest candidate, ties going to the earlier
/// one. Majority mode needs more than half of the valid votes.
#[allow(clippy::cast_precision_loss)]
pub fn tally(votes: &[Vote], candidates: usize, mode: VotingMode) -> Option<usize> {
    if votes.is_empty() || candidates == 0 {
        return None;
    }

    let mut totals = vec![0.0_f64; candidates];
    for vote in votes {
        if let Some(total) = totals.get_mut(vote.choice) {
            *total += vote.weight;
        }
    }

    let mut winner: Option<(usize, f64)> = None;
    for (index, &total) in totals.iter().enumerate() {
        match winner {
            Some((_, best)) if best >= total => {}
            _ => winner = Some((index, total)),
        }
    }
    let (index, total) = winner?;
    if total <= 0.0 {
        return None;
    }

    match mode {
        VotingMode::ReliabilityWeighted => Some(index),
        VotingMode::Majority => (total > votes.len() as f64 / 2.0).then_some(index),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::backend::{MockBehavior, MockProvider};
    use crate::orchestrator::strategies::test_support;
    use crate::orchestrator::OrchestrationOptions;

    fn vote(voter: &str, choice: usize, weight: f64) -> Vote {
        Vote {
            voter: voter.to_string(),
            choice,
            weight,
        }
    }

    #[test]
    fn test_weighted_tally() {
        let votes = [vote("a", 0, 0.2), vote("b", 1, 0.9), vote("c", 0, 0.3)];
        assert_eq!(tally(&votes, 3, VotingMode::ReliabilityWeighted), Some(1));

        // Tie goes to the earlier candidate
        let votes = [vote("a", 1, 0.5), vote("b", 0, 0.5)];
        assert_eq!(tally(&votes, 2, VotingMode::ReliabilityWeighted), Some(0));
    }

    #[test]
    fn test_majority_tally() {
        let votes = [vote("a", 0, 1.0), vote("b", 1, 1.0), vote("c", 2, 1.0)];
        assert_eq!(tally(&votes, 3, VotingMode::Majority), None);

        let votes = [vote("a", 2, 1.0), vote("b", 2, 1.0), vote("c", 0, 1.0)];
        assert_eq!(tally(&votes, 3, VotingMode::Majority), Some(2));
        assert_eq!(tally(&[], 3, VotingMode::Majority), None);
    }

    #[tokio::test]
    async fn test_vote_picks_candidate() {
        let script = MockBehavior::script(|req| {
            if req.prompt.contains("VOTE:") {
                Ok("Candidate two is clearest.\nVOTE: 2".to_string())
            } else {
                Ok(format!("answer from {}", req.model))
            }
        });
        let provider = Arc::new(MockProvider::new().with_default(script));
        let invoker = test_support::invoker(Arc::clone(&provider), &["a", "b", "c"]);
        let input = test_support::input(&invoker, "question", &["a", "b", "c"], OrchestrationOptions::default());

        let run = run(input).await.unwrap();

        assert_eq!(run.rounds.len(), 2);
        assert_eq!(run.responses.len(), 3);
        assert_eq!(run.votes.len(), 3);
        assert_eq!(run.final_text, "answer from b");
    }

    #[tokio::test]
    async fn test_no_valid_votes_synthesizes() {
        let provider = Arc::new(MockProvider::new());
        let invoker = test_support::invoker(Arc::clone(&provider), &["a", "b"]);
        let input = test_support::input(&invoker, "question", &["a", "b"], OrchestrationOptions::default());

        let run = run(input).await.unwrap();

        assert!(run.votes.is_empty());
        assert!(run.final_text.contains("Combined answer"));
    }
}
