//! Prompt Templates
//!
//! Every prompt the orchestrator builds on top of the caller's prompt.

use std::fmt::Write;

fn numbered(responses: &[(String, String)]) -> String {
    let mut out = String::new();
    for (i, (model, text)) in responses.iter().enumerate() {
        let _ = write!(out, "\n\n[Response {} from {}]\n{}", i + 1, model, text.trim());
    }
    out
}

/// Input for sequential stage k+1: the original prompt plus stage k's output
pub fn sequential_stage(original: &str, previous: &str) -> String {
    format!(
        "{original}\n\nA previous stage produced the answer below. \
         Improve it: fix mistakes, fill gaps, keep what is correct.\n\n\
         [Previous stage]\n{}",
        previous.trim()
    )
}

/// Combine several answers to the same prompt into one
pub fn synthesis(original: &str, responses: &[(String, String)]) -> String {
    format!(
        "Several models answered the question below. Write one answer that \
         combines their strongest points and resolves any disagreement.\n\n\
         [Question]\n{original}{}\n\n[Combined answer]",
        numbered(responses)
    )
}

/// Debate round 2+: critique the other participants and refine
pub fn debate_round(original: &str, round: usize, previous: &[(String, String)]) -> String {
    format!(
        "Round {round} of debate on:\n{original}\n\n\
         Here are the positions from the previous round:{}\n\n\
         Consider the arguments presented and provide your refined position. \
         Acknowledge strong points and challenge weak ones.",
        numbered(previous)
    )
}

/// Consensus vote over numbered candidate answers
pub fn vote(original: &str, candidates: &[(String, String)]) -> String {
    format!(
        "Question:\n{original}\n\nCandidate answers:{}\n\n\
         Pick the candidate that best answers the question. Explain briefly, \
         then finish with a line of the form `VOTE: <number>`.",
        numbered(candidates)
    )
}

/// Ask a lead model to split a task into independent subtasks
pub fn decompose(task: &str, max_subtasks: usize) -> String {
    format!(
        "Split the task below into at most {max_subtasks} independent subtasks \
         that can be solved separately. Reply with one subtask per line, each \
         starting with `- `. If the task is already atomic, reply with `ATOMIC`.\n\n\
         [Task]\n{task}"
    )
}

/// Ask the lead model to merge subtask results
pub fn combine(task: &str, results: &[(String, String)]) -> String {
    let mut parts = String::new();
    for (i, (subtask, output)) in results.iter().enumerate() {
        let _ = write!(parts, "\n\n[Subtask {}] {}\n{}", i + 1, subtask, output.trim());
    }
    format!(
        "Combine the subtask results below into one complete answer to the \
         original task.\n\n[Task]\n{task}{parts}\n\n[Answer]"
    )
}

/// Parse a decomposition reply into subtasks
///
/// Accepts `- `, `* ` and `1. ` list items. `ATOMIC` or a single item means
/// the task should not be split.
pub fn parse_subtasks(reply: &str, max_subtasks: usize) -> Vec<String> {
    if reply.trim().eq_ignore_ascii_case("atomic") {
        return Vec::new();
    }

    let items: Vec<String> = reply
        .lines()
        .filter_map(|line| {
            let line = line.trim();
            let item = line
                .strip_prefix("- ")
                .or_else(|| line.strip_prefix("* "))
                .or_else(|| {
                    let (num, rest) = line.split_once(". ")?;
                    num.chars().all(|c| c.is_ascii_digit()).then_some(rest)
                })?;
            let item = item.trim();
            (!item.is_empty()).then(|| item.to_string())
        })
        .take(max_subtasks)
        .collect();

    if items.len() < 2 {
        Vec::new()
    } else {
        items
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequential_stage_keeps_original() {
        let prompt = sequential_stage("Explain recursion", "It calls itself.");
        assert!(prompt.starts_with("Explain recursion"));
        assert!(prompt.ends_with("It calls itself."));
    }

    #[test]
    fn test_synthesis_numbers_responses() {
        let prompt = synthesis(
            "Q",
            &[("a".into(), "one".into()), ("b".into(), "two".into())],
        );
        assert!(prompt.contains("[Response 1 from a]\none"));
        assert!(prompt.contains("[Response 2 from b]\ntwo"));
    }

    #[test]
    fn test_parse_subtasks() {
        let reply = "Here is the plan:\n- research sorting\n- write the code\n3. test it\n";
        assert_eq!(
            parse_subtasks(reply, 4),
            vec!["research sorting", "write the code", "test it"]
        );
        assert_eq!(parse_subtasks(reply, 2).len(), 2);
        assert!(parse_subtasks("ATOMIC", 4).is_empty());
        // A single item is not a decomposition
        assert!(parse_subtasks("- just this", 4).is_empty());
        assert!(parse_subtasks("no list at all", 4).is_empty());
    }
}
