//! Score normalization, fusion, and the keyword relevance heuristic.
//!
//! All functions here are pure. They are the building blocks of
//! [`fuse_channels`](crate::retriever::fuse_channels).

use std::collections::HashSet;

/// Flat bonus added when the whole query appears verbatim in the document.
pub const PHRASE_BONUS: f64 = 0.1;

/// Weight applied to a document's popularity in the keyword heuristic.
pub const POPULARITY_WEIGHT: f64 = 0.1;

/// Default fusion weight (semantic-leaning).
pub const DEFAULT_ALPHA: f64 = 0.7;

/// Min-max normalize raw scores to `[0.0, 1.0]`, preserving length and order.
///
/// Each list is rescaled against its own minimum and maximum. If every
/// score is equal the result is all `0.0`: tied scores carry no
/// discriminating signal.
pub fn min_max_normalize(scores: &[f64]) -> Vec<f64> {
    if scores.is_empty() {
        return Vec::new();
    }

    let s_min = scores.iter().copied().fold(f64::INFINITY, f64::min);
    let s_max = scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);

    if s_max <= s_min {
        return vec![0.0; scores.len()];
    }

    scores
        .iter()
        .map(|s| (s - s_min) / (s_max - s_min))
        .collect()
}

/// Weighted combination of two normalized scores.
///
/// `alpha * semantic + (1 - alpha) * keyword`. A document found by one
/// channel only is passed `0.0` for the other and is simply penalized.
pub fn fuse_scores(semantic: f64, keyword: f64, alpha: f64) -> f64 {
    alpha * semantic + (1.0 - alpha) * keyword
}

/// Heuristic keyword relevance of `doc_text` for `query`, in `[0, 1]`.
///
/// The index's native full-text rank is not trusted, so relevance is
/// approximated as term coverage (distinct lower-cased query terms found
/// as substrings), plus [`PHRASE_BONUS`] for a verbatim phrase match, plus
/// [`POPULARITY_WEIGHT`] × popularity, clamped to `1.0`.
pub fn keyword_score(query: &str, doc_text: &str, popularity: f64) -> f64 {
    let query_lower = query.to_lowercase();
    let text_lower = doc_text.to_lowercase();

    let terms: HashSet<&str> = query_lower.split_whitespace().collect();
    let matched = terms.iter().filter(|t| text_lower.contains(*t)).count();
    let coverage = matched as f64 / terms.len().max(1) as f64;

    let phrase = if text_lower.contains(&query_lower) {
        PHRASE_BONUS
    } else {
        0.0
    };

    (coverage + phrase + POPULARITY_WEIGHT * popularity).min(1.0)
}
