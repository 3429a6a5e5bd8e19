//! Specialist: no fan-out, the router's best match serves the request,
//! falling back down the routed chain.

use futures::future::BoxFuture;

use crate::error::Result;
use crate::orchestrator::{OrchestrationRun, Slot, Strategy, StrategyInput, StrategyState};

pub fn run(input: StrategyInput) -> BoxFuture<'static, Result<OrchestrationRun>> {
    Box::pin(execute(input))
}

async fn execute(input: StrategyInput) -> Result<OrchestrationRun> {
    let mut run = OrchestrationRun::new(Strategy::Specialist);
    run.note(format!("specialist: {}", input.plan.primary().id));

    let outcome = input.call_chain(&input.plan.chain, &input.prompt).await;
    match StrategyInput::record(&mut run, outcome, Slot::Response) {
        Some(index) => {
            let text = run.invocations[index].text.clone();
            run.succeed(text);
            Ok(run)
        }
        None => {
            run.transition(StrategyState::Failed);
            Err(input.no_result_error(&run))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::backend::{MockBehavior, MockProvider, ProviderError};
    use crate::orchestrator::strategies::test_support;
    use crate::orchestrator::OrchestrationOptions;

    #[tokio::test]
    async fn test_falls_back_down_chain() {
        let provider = Arc::new(
            MockProvider::new()
                .with_model("a", MockBehavior::FailAlways(ProviderError::Transient("reset".into()))),
        );
        let invoker = test_support::invoker(Arc::clone(&provider), &["a", "b"]);
        let input = test_support::input(&invoker, "q", &["a", "b"], OrchestrationOptions::default());
        let primary = input.plan.primary().id.clone();

        let run = run(input).await.unwrap();

        assert_eq!(run.responses.len(), 1);
        if primary == "a" {
            assert_eq!(run.failures.len(), 1);
            assert_eq!(run.final_text, "b: q");
        }
        assert_eq!(provider.total_calls(), run.invocations.len());
    }

    #[tokio::test]
    async fn test_content_policy_is_raised() {
        let provider = Arc::new(
            MockProvider::new()
                .with_default(MockBehavior::FailAlways(ProviderError::ContentPolicy("refused".into()))),
        );
        let invoker = test_support::invoker(Arc::clone(&provider), &["a", "b"]);
        let input = test_support::input(&invoker, "q", &["a", "b"], OrchestrationOptions::default());

        let err = run(input).await.unwrap_err();
        assert!(err.to_string().contains("refused"));
        assert_eq!(provider.total_calls(), 1);
    }
}
