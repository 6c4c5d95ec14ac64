//! Result selection.
//!
//! Given the execution log, pick one winning result by the configured
//! strategy. Candidates that passed quality evaluation are preferred;
//! when none passed, the selector falls back to the highest-scoring
//! candidate overall and marks the selection best-effort. With zero
//! usable results there is nothing to select.

use tracing::{debug, warn};

use super::config::SelectionStrategy;
use crate::models::{EngineAttempt, EngineResult};

/// Outcome of selection.
#[derive(Debug, Clone)]
pub struct Selection {
    /// Index into the attempt log of the winning result.
    pub index: usize,
    /// True when no candidate passed quality evaluation.
    pub best_effort: bool,
    /// Combined confidence under the weighted-average strategy; the
    /// reported confidence of the selection when present.
    pub combined_confidence: Option<f64>,
}

impl Selection {
    /// Confidence to report for this selection.
    pub fn confidence(&self, attempts: &[EngineAttempt]) -> f64 {
        self.combined_confidence
            .unwrap_or_else(|| attempts[self.index].result.confidence)
    }
}

/// Pick the winning result from the attempt log.
pub fn select(attempts: &[EngineAttempt], strategy: SelectionStrategy) -> Option<Selection> {
    let passing: Vec<usize> = attempts
        .iter()
        .enumerate()
        .filter(|(_, a)| a.result.success && a.verdict.passed)
        .map(|(i, _)| i)
        .collect();

    if passing.is_empty() {
        return best_effort(attempts);
    }

    let selection = match strategy {
        SelectionStrategy::HighestConfidence => highest_confidence(attempts, &passing),
        SelectionStrategy::FirstSuccess => Selection {
            // `passing` is in log order; the log is in invocation-slot order.
            index: passing[0],
            best_effort: false,
            combined_confidence: None,
        },
        SelectionStrategy::Consensus => consensus(attempts, &passing),
        SelectionStrategy::WeightedAverage => weighted_average(attempts, &passing),
    };

    debug!(
        strategy = strategy.as_str(),
        winner = %attempts[selection.index].result.engine,
        "result selected"
    );
    Some(selection)
}

/// Max confidence among passing candidates; ties broken by earlier slot.
fn highest_confidence(attempts: &[EngineAttempt], passing: &[usize]) -> Selection {
    let mut winner = passing[0];
    for &i in &passing[1..] {
        if attempts[i].result.confidence > attempts[winner].result.confidence {
            winner = i;
        }
    }
    Selection {
        index: winner,
        best_effort: false,
        combined_confidence: None,
    }
}

/// The passing candidate whose text agrees most with the other passing
/// candidates (aggregate pairwise similarity); ties broken by earlier
/// slot. With a single passing candidate, that candidate wins.
fn consensus(attempts: &[EngineAttempt], passing: &[usize]) -> Selection {
    if passing.len() == 1 {
        return Selection {
            index: passing[0],
            best_effort: false,
            combined_confidence: None,
        };
    }

    let normalized: Vec<String> = passing
        .iter()
        .map(|&i| normalize_text(&attempts[i].result.extracted_text))
        .collect();

    let mut winner = 0;
    let mut best_agreement = f64::MIN;
    for (a, text_a) in normalized.iter().enumerate() {
        let agreement: f64 = normalized
            .iter()
            .enumerate()
            .filter(|(b, _)| *b != a)
            .map(|(_, text_b)| strsim::normalized_levenshtein(text_a, text_b))
            .sum();
        if agreement > best_agreement {
            best_agreement = agreement;
            winner = a;
        }
    }

    Selection {
        index: passing[winner],
        best_effort: false,
        combined_confidence: None,
    }
}

/// One representative winner carrying the confidence-weighted combined
/// confidence of all passing candidates. The representative is the
/// highest-confidence passing result, so the selected reference stays in
/// the log.
fn weighted_average(attempts: &[EngineAttempt], passing: &[usize]) -> Selection {
    let representative = highest_confidence(attempts, passing);

    let total: f64 = passing.iter().map(|&i| attempts[i].result.confidence).sum();
    let combined = if total <= 0.0 {
        0.0
    } else {
        passing
            .iter()
            .map(|&i| {
                let c = attempts[i].result.confidence;
                c * c
            })
            .sum::<f64>()
            / total
    };

    Selection {
        combined_confidence: Some(combined),
        ..representative
    }
}

/// No candidate passed: fall back to the highest quality score among
/// results that exist at all.
fn best_effort(attempts: &[EngineAttempt]) -> Option<Selection> {
    let mut winner: Option<usize> = None;
    for (i, attempt) in attempts.iter().enumerate() {
        if !attempt.result.success {
            continue;
        }
        match winner {
            Some(w) if attempts[w].verdict.score >= attempt.verdict.score => {}
            _ => winner = Some(i),
        }
    }

    winner.map(|index| {
        warn!(
            engine = %attempts[index].result.engine,
            score = attempts[index].verdict.score,
            "no result passed quality evaluation, selecting best effort"
        );
        Selection {
            index,
            best_effort: true,
            combined_confidence: None,
        }
    })
}

/// Collapse whitespace and case so similarity compares content, not
/// layout.
fn normalize_text(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// The winning `EngineResult` for the outcome surface, with the combined
/// confidence substituted under weighted averaging.
pub fn selected_result(attempts: &[EngineAttempt], selection: &Selection) -> EngineResult {
    let mut result = attempts[selection.index].result.clone();
    if let Some(combined) = selection.combined_confidence {
        result.confidence = combined;
    }
    result
}
