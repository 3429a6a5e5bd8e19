//! Mixture of experts: fan out like parallel, score each answer with
//! [`scoring::response_score`], and synthesize only the top K.

use std::cmp::Ordering;

use futures::future::BoxFuture;

use crate::error::Result;
use crate::orchestrator::{scoring, OrchestrationRun, Slot, Strategy, StrategyInput, StrategyState};

pub fn run(input: StrategyInput) -> BoxFuture<'static, Result<OrchestrationRun>> {
    Box::pin(execute(input))
}

async fn execute(input: StrategyInput) -> Result<OrchestrationRun> {
    let mut run = OrchestrationRun::new(Strategy::Mixture);

    let outcomes = input.fan_out(&input.participants, &input.prompt).await;
    for outcome in outcomes {
        StrategyInput::record(&mut run, outcome, Slot::Response);
    }

    let responses = run.response_pairs();
    if responses.is_empty() {
        run.transition(StrategyState::Failed);
        return Err(input.no_result_error(&run));
    }

    let top = top_k(&input.prompt, responses, input.options.top_k);
    run.note(format!(
        "top {}: {}",
        top.len(),
        top.iter()
            .map(|(score, (model, _))| format!("{model} ({score:.2})"))
            .collect::<Vec<_>>()
            .join(", ")
    ));

    let selected: Vec<(String, String)> = top.into_iter().map(|(_, pair)| pair).collect();
    let text = input.synthesize(&mut run, &selected).await;
    run.succeed(text);
    Ok(run)
}

/// Best `k` responses by heuristic score; ties keep response order
fn top_k(prompt: &str, responses: Vec<(String, String)>, k: usize) -> Vec<(f64, (String, String))> {
    let mut scored: Vec<(f64, (String, String))> = responses
        .into_iter()
        .map(|pair| (scoring::response_score(prompt, &pair.1), pair))
        .collect();
    scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(Ordering::Equal));
    scored.truncate(k.max(1));
    scored
}
