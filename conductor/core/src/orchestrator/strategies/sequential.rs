//! Sequential refinement: each participant is one stage, fed the original
//! prompt plus the previous stage's output. The first stage whose fallback
//! chain is exhausted ends the run.

use futures::future::BoxFuture;

use crate::error::Result;
use crate::orchestrator::{prompts, OrchestrationRun, Slot, Strategy, StrategyInput, StrategyState};

pub fn run(input: StrategyInput) -> BoxFuture<'static, Result<OrchestrationRun>> {
    Box::pin(execute(input))
}

async fn execute(input: StrategyInput) -> Result<OrchestrationRun> {
    let mut run = OrchestrationRun::new(Strategy::Sequential);
    let mut previous: Option<String> = None;

    for (stage, model) in input.participants.iter().enumerate() {
        let stage_prompt = match &previous {
            Some(output) => prompts::sequential_stage(&input.prompt, output),
            None => input.prompt.clone(),
        };

        let chain = input.stage_chain(model);
        let outcome = input.call_chain(&chain, &stage_prompt).await;

        let Some(index) = StrategyInput::record(&mut run, outcome, Slot::Response) else {
            let reason = format!("stage {} ({}) failed; later stages skipped", stage + 1, model.id);
            tracing::debug!(stage = stage + 1, model = %model.id, "Sequential chain aborted");
            run.note(reason.clone());

            if run.responses.is_empty() {
                run.transition(StrategyState::Failed);
                return Err(input.no_result_error(&run));
            }
            run.partial_error = Some(reason);
            break;
        };

        let note = format!("stage {}: {}", stage + 1, run.invocations[index].model_id);
        previous = Some(run.invocations[index].text.clone());
        run.note(note);
    }

    match previous {
        Some(text) => {
            run.succeed(text);
            Ok(run)
        }
        None => {
            run.transition(StrategyState::Failed);
            Err(input.no_result_error(&run))
        }
    }
}
