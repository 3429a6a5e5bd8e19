//! Hierarchical decomposition
//!
//! The lead model splits the prompt into subtasks, breadth first, down to
//! `max_depth`. Leaves are routed independently and solved concurrently.
//! Internal nodes are then combined bottom-up by the lead model.
//!
//! The tree is a flat `Vec<SubtaskNode>` with parent indices. Children are
//! always appended after their parent, so walking the list backwards visits
//! every child before its parent.

use std::sync::Arc;

use futures::future::{join_all, BoxFuture};

use crate::error::Result;
use crate::invocation::ChainOutcome;
use crate::orchestrator::{prompts, OrchestrationRun, Slot, Strategy, StrategyInput, StrategyState, SubtaskNode};
use crate::routing::{classify_prompt, FallbackChain, TaskSource};

pub fn run(input: StrategyInput) -> BoxFuture<'static, Result<OrchestrationRun>> {
    Box::pin(execute(input))
}

async fn execute(input: StrategyInput) -> Result<OrchestrationRun> {
    let mut run = OrchestrationRun::new(Strategy::Hierarchical);
    let lead = input
        .participants
        .first()
        .cloned()
        .unwrap_or_else(|| Arc::clone(input.plan.primary()));
    let lead_chain = input.chain_from(&lead);
    let max_depth = input.options.max_depth;
    let max_subtasks = input.options.max_subtasks.max(2);

    run.subtasks.push(SubtaskNode {
        index: 0,
        parent: None,
        depth: 0,
        prompt: input.prompt.clone(),
        model_id: None,
        output: None,
        error: None,
    });

    // Decompose, breadth first
    let mut cursor = 0;
    while cursor < run.subtasks.len() {
        let (depth, task) = (run.subtasks[cursor].depth, run.subtasks[cursor].prompt.clone());
        if depth < max_depth {
            let outcome = input
                .call_chain(&lead_chain, &prompts::decompose(&task, max_subtasks))
                .await;
            let reply = StrategyInput::record(&mut run, outcome, Slot::Auxiliary)
                .map(|i| run.invocations[i].text.clone());

            let children = reply
                .map(|r| prompts::parse_subtasks(&r, max_subtasks))
                .unwrap_or_default();
            tracing::debug!(node = cursor, depth, subtasks = children.len(), "Decomposed task");

            for prompt in children {
                let index = run.subtasks.len();
                run.subtasks.push(SubtaskNode {
                    index,
                    parent: Some(cursor),
                    depth: depth + 1,
                    prompt,
                    model_id: None,
                    output: None,
                    error: None,
                });
            }
        }
        cursor += 1;
    }

    // Solve leaves concurrently, each on its own routed chain
    let leaves: Vec<usize> = (0..run.subtasks.len())
        .filter(|&i| !run.subtasks.iter().any(|n| n.parent == Some(i)))
        .collect();
    run.note(format!(
        "decomposed into {} nodes, {} leaves",
        run.subtasks.len(),
        leaves.len()
    ));

    let solves = leaves.iter().map(|&i| {
        let task = run.subtasks[i].prompt.clone();
        let chain = leaf_chain(&input, &task).unwrap_or_else(|| lead_chain.clone());
        let input = &input;
        async move {
            let outcome = input.call_chain(&chain, &task).await;
            (i, outcome)
        }
    });
    let solved: Vec<(usize, ChainOutcome)> = join_all(solves).await;

    for (node, outcome) in solved {
        match StrategyInput::record(&mut run, outcome, Slot::Response) {
            Some(index) => {
                let result = &run.invocations[index];
                let (model, text) = (result.model_id.clone(), result.text.clone());
                run.subtasks[node].model_id = Some(model);
                run.subtasks[node].output = Some(text);
            }
            None => run.subtasks[node].error = Some("no model solved this subtask".to_string()),
        }
    }

    // Combine bottom-up
    for node in (0..run.subtasks.len()).rev() {
        if leaves.contains(&node) {
            continue;
        }
        let results: Vec<(String, String)> = run
            .subtasks
            .iter()
            .filter(|n| n.parent == Some(node))
            .filter_map(|n| n.output.clone().map(|o| (n.prompt.clone(), o)))
            .collect();
        if results.is_empty() {
            run.subtasks[node].error = Some("every subtask failed".to_string());
            continue;
        }

        let task = run.subtasks[node].prompt.clone();
        let outcome = input
            .call_chain(&lead_chain, &prompts::combine(&task, &results))
            .await;
        match StrategyInput::record(&mut run, outcome, Slot::Auxiliary) {
            Some(index) => {
                let result = &run.invocations[index];
                let (model, text) = (result.model_id.clone(), result.text.clone());
                run.subtasks[node].model_id = Some(model);
                run.subtasks[node].output = Some(text);
            }
            None => {
                // Lead unavailable: join the parts as they are
                let joined = results
                    .iter()
                    .map(|(_, o)| o.trim())
                    .collect::<Vec<_>>()
                    .join("\n\n");
                run.subtasks[node].output = Some(joined);
                run.note(format!("combine failed at node {node}; joined subtask outputs"));
            }
        }
    }

    match run.subtasks[0].output.clone() {
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

/// Route a subtask on its own; `None` keeps it on the lead chain
fn leaf_chain(input: &StrategyInput, task: &str) -> Option<FallbackChain> {
    let router = input.invoker.context().router();
    let task_class = classify_prompt(task, false);
    let remaining = input.budget.as_ref().map(crate::routing::Budget::remaining);
    router
        .route(task_class, TaskSource::Inferred, task, &input.constraints, remaining)
        .ok()
        .map(|plan| plan.chain)
}
