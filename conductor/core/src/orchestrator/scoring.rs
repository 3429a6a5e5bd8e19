//! Response Scoring
//!
//! Cheap text heuristics used by the multi-model strategies: word-set
//! similarity for debate convergence, a quality score for mixture top-K
//! selection, and vote parsing for consensus.

use std::collections::HashSet;

/// Lowercased word set, ignoring words of two characters or less
fn word_set(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split_whitespace()
        .filter(|w| w.len() > 2)
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_string())
        .filter(|w| !w.is_empty())
        .collect()
}

/// Jaccard similarity of the two texts' word sets
///
/// Returns `1.0` when both are empty and `0.0` when only one is.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn jaccard_similarity(a: &str, b: &str) -> f64 {
    let words_a = word_set(a);
    let words_b = word_set(b);

    if words_a.is_empty() && words_b.is_empty() {
        return 1.0;
    }
    if words_a.is_empty() || words_b.is_empty() {
        return 0.0;
    }

    let intersection = words_a.intersection(&words_b).count();
    let union = words_a.union(&words_b).count();
    intersection as f64 / union as f64
}

/// Mean pairwise similarity of a round's responses
///
/// Fewer than two responses cannot disagree, so they score `1.0`.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn convergence(responses: &[&str]) -> f64 {
    if responses.len() < 2 {
        return 1.0;
    }

    let mut total = 0.0;
    let mut pairs = 0usize;
    for (i, a) in responses.iter().enumerate() {
        for b in &responses[i + 1..] {
            total += jaccard_similarity(a, b);
            pairs += 1;
        }
    }
    total / pairs as f64
}

const HEDGES: [&str; 6] = [
    "i'm not sure",
    "i am not sure",
    "i don't know",
    "i cannot",
    "i can't",
    "as an ai",
];

/// Heuristic quality score in `[0, 1]`
///
/// Combines coverage of the prompt's terms, a length signal that saturates
/// around 200 words, and a penalty for hedging or refusal phrases.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn response_score(prompt: &str, response: &str) -> f64 {
    let trimmed = response.trim();
    if trimmed.is_empty() {
        return 0.0;
    }

    let prompt_words = word_set(prompt);
    let response_words = word_set(trimmed);
    let coverage = if prompt_words.is_empty() {
        1.0
    } else {
        prompt_words.intersection(&response_words).count() as f64 / prompt_words.len() as f64
    };

    let word_count = trimmed.split_whitespace().count() as f64;
    let length = (word_count / 200.0).min(1.0);

    let lower = trimmed.to_lowercase();
    let confidence = if HEDGES.iter().any(|h| lower.contains(h)) {
        0.3
    } else {
        1.0
    };

    (0.45 * coverage + 0.35 * length + 0.2 * confidence).clamp(0.0, 1.0)
}

/// Parse a `VOTE: <n>` line (1-based) into a 0-based candidate index
///
/// The last vote line wins; out-of-range votes are rejected.
#[must_use]
pub fn parse_vote(text: &str, candidates: usize) -> Option<usize> {
    text.lines().rev().find_map(|line| {
        let line = line.trim().trim_start_matches(['*', '#', '-', ' ']);
        let upper = line.to_uppercase();
        let rest = upper.strip_prefix("VOTE")?;
        let rest = rest.trim_start_matches([':', ' ', '#', '*']);
        let digits: String = rest.chars().take_while(char::is_ascii_digit).collect();
        let choice: usize = digits.parse().ok()?;
        (1..=candidates).contains(&choice).then(|| choice - 1)
    })
}
