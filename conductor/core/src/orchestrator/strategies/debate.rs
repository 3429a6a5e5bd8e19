//! Multi-round debate
//!
//! Round 1 is a parallel fan-out. From round 2 every participant sees all of
//! the previous round's answers and refines its own. Rounds stop at
//! `max_rounds` or once the round's answers converge (mean pairwise word-set
//! similarity at or above `convergence_threshold`). A synthesis over the last
//! round's answers produces the conclusion.
//!
//! Each round is a barrier: round N+1's prompt is built only after every
//! participant has settled round N.

use futures::future::BoxFuture;

use crate::error::Result;
use crate::orchestrator::{prompts, scoring, OrchestrationRun, Slot, Strategy, StrategyInput, StrategyState};

pub fn run(input: StrategyInput) -> BoxFuture<'static, Result<OrchestrationRun>> {
    Box::pin(execute(input))
}

async fn execute(input: StrategyInput) -> Result<OrchestrationRun> {
    let mut run = OrchestrationRun::new(Strategy::Debate);
    let max_rounds = input.options.max_rounds.max(1);
    let threshold = input.options.convergence_threshold;
    let mut last_answers: Vec<(String, String)> = Vec::new();

    while run.rounds.len() < max_rounds {
        let round = run.begin_round();
        let prompt = if round == 1 {
            input.prompt.clone()
        } else {
            prompts::debate_round(&input.prompt, round, &last_answers)
        };

        let outcomes = input.fan_out(&input.participants, &prompt).await;
        for outcome in outcomes {
            StrategyInput::record(&mut run, outcome, Slot::Round);
        }

        let answers = run.round_pairs(round);
        if answers.is_empty() {
            // Nobody answered this round; debate ends on the last good one
            run.complete_round(None);
            run.note(format!("round {round}: no participant answered"));
            break;
        }

        let texts: Vec<&str> = answers.iter().map(|(_, t)| t.as_str()).collect();
        let similarity = scoring::convergence(&texts);
        run.complete_round(Some(similarity));
        tracing::debug!(round, answers = answers.len(), similarity, "Debate round complete");
        run.note(format!(
            "round {round}: {} answers, convergence {similarity:.2}",
            answers.len()
        ));

        last_answers = answers;
        if round >= 2 && similarity >= threshold {
            run.note(format!("converged at round {round}"));
            break;
        }
    }

    if last_answers.is_empty() {
        run.transition(StrategyState::Failed);
        return Err(input.no_result_error(&run));
    }

    // The final round's answers are the debate's responses
    let final_round = run.rounds.iter().rev().find(|r| {
        r.invocations
            .iter()
            .any(|&i| run.invocations.get(i).is_some_and(|inv| inv.success))
    });
    let response_indices: Vec<usize> = final_round
        .map(|r| {
            r.invocations
                .iter()
                .copied()
                .filter(|&i| run.invocations.get(i).is_some_and(|inv| inv.success))
                .collect()
        })
        .unwrap_or_default();
    run.responses = response_indices;

    let text = input.synthesize(&mut run, &last_answers).await;
    run.succeed(text);
    Ok(run)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::backend::{MockBehavior, MockProvider};
    use crate::orchestrator::strategies::test_support;
    use crate::orchestrator::OrchestrationOptions;

    #[tokio::test]
    async fn test_rounds_bounded_by_max() {
        // Answers that never converge
        let provider = Arc::new(
            MockProvider::new()
                .with_model("a", MockBehavior::script(|r| Ok(format!("apples {}", r.call_number))))
                .with_model("b", MockBehavior::script(|r| Ok(format!("trains {}", r.call_number)))),
        );
        let invoker = test_support::invoker(Arc::clone(&provider), &["a", "b"]);
        let options = OrchestrationOptions::default().with_max_rounds(3);
        let input = test_support::input(&invoker, "topic", &["a", "b"], options);

        let run = run(input).await.unwrap();

        assert_eq!(run.rounds.len(), 3);
        assert_eq!(run.responses.len(), 2);
        assert_eq!(run.state, StrategyState::Done);
    }

    #[tokio::test]
    async fn test_later_rounds_see_prior_answers() {
        let provider = Arc::new(
            MockProvider::new()
                .with_model("a", MockBehavior::respond("position alpha"))
                .with_model("b", MockBehavior::respond("position beta")),
        );
        let invoker = test_support::invoker(Arc::clone(&provider), &["a", "b"]);
        let options = OrchestrationOptions {
            max_rounds: 2,
            convergence_threshold: 1.0,
            ..Default::default()
        };
        let input = test_support::input(&invoker, "topic", &["a", "b"], options);

        run(input).await.unwrap();

        let second = &provider.prompts_for("a")[1];
        assert!(second.contains("position alpha"));
        assert!(second.contains("position beta"));
    }

    #[tokio::test]
    async fn test_converges_early() {
        let provider = Arc::new(MockProvider::new().with_default(MockBehavior::respond("functions calling themselves")));
        let invoker = test_support::invoker(Arc::clone(&provider), &["a", "b"]);
        let options = OrchestrationOptions::default().with_max_rounds(5);
        let input = test_support::input(&invoker, "recursion", &["a", "b"], options);

        let run = run(input).await.unwrap();

        // Identical answers converge at the first checked round
        assert_eq!(run.rounds.len(), 2);
        assert!(run.rounds[1].convergence.unwrap() >= 0.75);
    }
}
