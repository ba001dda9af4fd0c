use std::collections::{BTreeSet, HashMap};

use super::Candidate;

const CONFIDENCE_WEIGHT: f64 = 100.0;
const PRIORITY_WEIGHT: f64 = 4.0;
const FREQUENCY_WEIGHT: f64 = 6.0;

/// Passes that ran on the unmodified capture.
const UNMODIFIED_PASSES: &[&str] = &["original", "resized"];

/// Untouched-image passes keep character shapes best, so they rank higher.
pub fn config_priority(config: &str) -> u32 {
    match config {
        "original" => 3,
        "resized" => 2,
        _ => 1,
    }
}

/// True when `candidate` is good enough to skip every remaining pass.
pub fn short_circuits(candidate: &Candidate, high_confidence: f64) -> bool {
    UNMODIFIED_PASSES.contains(&candidate.config.as_str()) && candidate.confidence >= high_confidence
}

fn distinct_words(text: &str) -> BTreeSet<String> {
    text.split_whitespace()
        .map(|word| word.to_lowercase())
        .collect()
}

/// Lower-cased word to the number of candidates containing it.
pub fn word_frequencies(candidates: &[Candidate]) -> HashMap<String, usize> {
    let mut freqs = HashMap::new();
    for candidate in candidates {
        for word in distinct_words(&candidate.text) {
            *freqs.entry(word).or_insert(0) += 1;
        }
    }
    freqs
}

pub fn score(candidate: &Candidate, freqs: &HashMap<String, usize>) -> f64 {
    let words = distinct_words(&candidate.text);
    let avg_frequency = if words.is_empty() {
        0.0
    } else {
        words
            .iter()
            .map(|word| freqs.get(word).copied().unwrap_or(1) as f64)
            .sum::<f64>()
            / words.len() as f64
    };
    candidate.confidence * CONFIDENCE_WEIGHT
        + candidate.length as f64
        + config_priority(&candidate.config) as f64 * PRIORITY_WEIGHT
        + avg_frequency * FREQUENCY_WEIGHT
}

/// Picks the best-scoring candidate at or above `min_confidence`.
///
/// `None` is the "no text detected" result; a low-confidence transcript is never
/// returned as a fallback. Equal scores keep pass order.
pub fn select_best(candidates: &[Candidate], min_confidence: f64) -> Option<(Candidate, f64)> {
    let eligible = candidates
        .iter()
        .filter(|candidate| candidate.confidence >= min_confidence)
        .cloned()
        .collect::<Vec<_>>();
    if eligible.is_empty() {
        return None;
    }
    let freqs = word_frequencies(&eligible);
    let mut scored = eligible
        .into_iter()
        .map(|candidate| {
            let value = score(&candidate, &freqs);
            (candidate, value)
        })
        .collect::<Vec<_>>();
    scored.sort_by(|a, b| b.1.total_cmp(&a.1));
    scored.into_iter().next()
}
