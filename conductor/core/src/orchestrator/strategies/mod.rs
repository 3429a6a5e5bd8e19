//! Strategy implementations, one module per [`Strategy`](super::Strategy)

pub mod consensus;
pub mod debate;
pub mod hierarchical;
pub mod mixture;
pub mod parallel;
pub mod sequential;
pub mod specialist;

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;

    use crate::backend::MockProvider;
    use crate::context::OrchestrationContext;
    use crate::invocation::Invoker;
    use crate::orchestrator::{OrchestrationOptions, StrategyInput};
    use crate::routing::{
        InvocationConstraints, ModelDescriptor, RetryConfig, TaskClass, TaskSource,
    };

    /// Invoker over `provider` with equally priced models `ids`
    pub fn invoker(provider: Arc<MockProvider>, ids: &[&str]) -> Arc<Invoker> {
        let context = Arc::new(OrchestrationContext::default());
        for id in ids {
            context
                .registry()
                .register(ModelDescriptor::new(*id, "mock").with_costs(0.001, 0.001));
        }
        let retry = RetryConfig {
            max_retries: 0,
            use_jitter: false,
            ..Default::default()
        };
        Arc::new(Invoker::new(context, retry, 8).with_provider(provider))
    }

    /// Strategy input routing `prompt` to exactly `ids`, in that order
    pub fn input(
        invoker: &Arc<Invoker>,
        prompt: &str,
        ids: &[&str],
        options: OrchestrationOptions,
    ) -> StrategyInput {
        let constraints = InvocationConstraints::default()
            .with_models(ids.iter().map(|s| (*s).to_string()));
        let plan = invoker
            .context()
            .router()
            .route(TaskClass::General, TaskSource::Explicit, prompt, &constraints, None)
            .unwrap();
        let participants = ids
            .iter()
            .map(|id| invoker.context().registry().lookup(id).unwrap())
            .collect();
        StrategyInput {
            invoker: Arc::clone(invoker),
            prompt: prompt.to_string(),
            plan,
            participants,
            options,
            constraints,
            budget: None,
        }
    }
}
