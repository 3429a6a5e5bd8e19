//! Parallel fan-out: the same prompt to every participant, then one
//! synthesis call over the successes.

use futures::future::BoxFuture;

use crate::error::Result;
use crate::orchestrator::{OrchestrationRun, Slot, Strategy, StrategyInput, StrategyState};

pub fn run(input: StrategyInput) -> BoxFuture<'static, Result<OrchestrationRun>> {
    Box::pin(execute(input))
}

async fn execute(input: StrategyInput) -> Result<OrchestrationRun> {
    let mut run = OrchestrationRun::new(Strategy::Parallel);

    let outcomes = input.fan_out(&input.participants, &input.prompt).await;
    tracing::debug!(
        participants = input.participants.len(),
        succeeded = StrategyInput::successes(&outcomes),
        "Parallel fan-out settled"
    );
    for outcome in outcomes {
        StrategyInput::record(&mut run, outcome, Slot::Response);
    }

    let responses = run.response_pairs();
    if responses.is_empty() {
        run.transition(StrategyState::Failed);
        return Err(input.no_result_error(&run));
    }
    if !run.failures.is_empty() {
        run.note(format!(
            "{} of {} participants failed",
            run.failures.len(),
            input.participants.len()
        ));
    }

    let text = input.synthesize(&mut run, &responses).await;
    run.succeed(text);
    Ok(run)
}
