//! Quality evaluation of engine results.
//!
//! A result passes only when every threshold check holds (AND semantics);
//! a single failing check fails the whole verdict. The numeric score is a
//! weighted combination of confidence, word recognition rate, and
//! expected-field coverage, used to rank candidates during selection.

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::config::{QualityThresholds, QualityWeights};
use super::WorkflowError;
use crate::models::EngineResult;

/// Outcome of each individual threshold check.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QualityChecks {
    pub confidence: bool,
    pub word_recognition: bool,
    /// None when no expected fields are configured (check skipped).
    pub field_coverage: Option<bool>,
    pub processing_time: bool,
    pub page_count: bool,
    /// Fraction of expected-field patterns found in the text.
    pub field_detection_rate: f64,
}

/// Pass/fail outcome plus a comparable quality score for one result.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub passed: bool,
    pub score: f64,
    pub checks: QualityChecks,
}

impl Verdict {
    /// Verdict for an invocation that produced no usable result.
    pub fn failed() -> Self {
        Self {
            passed: false,
            score: 0.0,
            checks: QualityChecks {
                confidence: false,
                word_recognition: false,
                field_coverage: None,
                processing_time: false,
                page_count: false,
                field_detection_rate: 0.0,
            },
        }
    }
}

/// Evaluator with the workflow's expected-field patterns compiled once.
pub struct QualityEvaluator {
    weights: QualityWeights,
    expected_fields: Vec<Regex>,
}

impl QualityEvaluator {
    /// Build an evaluator from score weights and expected-field patterns.
    pub fn new(weights: QualityWeights, expected_fields: &[String]) -> Result<Self, WorkflowError> {
        let compiled = expected_fields
            .iter()
            .map(|p| {
                Regex::new(p).map_err(|e| {
                    WorkflowError::InvalidConfig(format!(
                        "invalid expected-field pattern {:?}: {}",
                        p, e
                    ))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            weights,
            expected_fields: compiled,
        })
    }

    /// Evaluate one result against thresholds.
    ///
    /// Failed results (no usable output) never pass and score zero.
    pub fn evaluate(&self, result: &EngineResult, thresholds: &QualityThresholds) -> Verdict {
        if !result.success {
            return Verdict::failed();
        }

        let field_detection_rate = self.field_detection_rate(&result.extracted_text);
        let field_applicable = !self.expected_fields.is_empty();

        let checks = QualityChecks {
            confidence: result.confidence >= thresholds.min_confidence,
            word_recognition: result.word_recognition_rate
                >= thresholds.min_word_recognition_rate,
            field_coverage: field_applicable
                .then(|| field_detection_rate >= thresholds.min_field_detection_rate),
            processing_time: result.processing_time_seconds <= thresholds.max_processing_seconds,
            page_count: result.page_count >= thresholds.min_pages,
            field_detection_rate,
        };

        let passed = checks.confidence
            && checks.word_recognition
            && checks.field_coverage.unwrap_or(true)
            && checks.processing_time
            && checks.page_count;

        let score = self.score(result, field_applicable.then_some(field_detection_rate));

        debug!(
            engine = %result.engine,
            passed,
            score,
            confidence = result.confidence,
            word_rate = result.word_recognition_rate,
            field_rate = field_detection_rate,
            "quality evaluation complete"
        );

        Verdict {
            passed,
            score,
            checks,
        }
    }

    /// Fraction of expected-field patterns that match the text. 1.0 when
    /// no patterns are configured.
    fn field_detection_rate(&self, text: &str) -> f64 {
        if self.expected_fields.is_empty() {
            return 1.0;
        }
        let found = self
            .expected_fields
            .iter()
            .filter(|p| p.is_match(text))
            .count();
        found as f64 / self.expected_fields.len() as f64
    }

    /// Weighted score over the applicable dimensions. When field coverage
    /// does not apply, the score renormalizes over the remaining weights.
    fn score(&self, result: &EngineResult, field_rate: Option<f64>) -> f64 {
        let mut numerator =
            self.weights.confidence * result.confidence
                + self.weights.word_rate * result.word_recognition_rate;
        let mut denominator = self.weights.confidence + self.weights.word_rate;

        if let Some(rate) = field_rate {
            numerator += self.weights.field_coverage * rate;
            denominator += self.weights.field_coverage;
        }

        if denominator <= 0.0 {
            0.0
        } else {
            numerator / denominator
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ocr::EngineKind;
    use proptest::prelude::*;

    fn result(confidence: f64, word_rate: f64, pages: u32, seconds: f64) -> EngineResult {
        EngineResult::success(
            EngineKind::Tesseract,
            "Tesseract OCR",
            "Invoice Number: 42\nTotal Due: $10".to_string(),
            confidence,
            word_rate,
            pages,
            seconds,
        )
    }

    fn evaluator(fields: &[&str]) -> QualityEvaluator {
        let patterns: Vec<String> = fields.iter().map(|s| s.to_string()).collect();
        QualityEvaluator::new(QualityWeights::default(), &patterns).unwrap()
    }

    #[test]
    fn test_passes_when_all_checks_hold() {
        let verdict = evaluator(&[]).evaluate(
            &result(0.92, 0.9, 1, 12.0),
            &QualityThresholds::default(),
        );
        assert!(verdict.passed);
        assert!(verdict.score > 0.9);
    }

    #[test]
    fn test_single_failing_check_fails_verdict() {
        let thresholds = QualityThresholds {
            min_confidence: 0.95,
            ..Default::default()
        };
        let verdict = evaluator(&[]).evaluate(&result(0.92, 0.9, 1, 12.0), &thresholds);
        assert!(!verdict.passed);
        assert!(!verdict.checks.confidence);
        assert!(verdict.checks.word_recognition);
    }

    #[test]
    fn test_field_check_skipped_without_patterns() {
        let verdict = evaluator(&[]).evaluate(
            &result(0.9, 0.9, 1, 1.0),
            &QualityThresholds {
                min_field_detection_rate: 1.0,
                ..Default::default()
            },
        );
        assert!(verdict.passed);
        assert_eq!(verdict.checks.field_coverage, None);
    }

    #[test]
    fn test_field_coverage_counts_matches() {
        let evaluator = evaluator(&["Invoice Number", "Total Due", "Purchase Order"]);
        let verdict = evaluator.evaluate(
            &result(0.9, 0.9, 1, 1.0),
            &QualityThresholds {
                min_field_detection_rate: 0.5,
                ..Default::default()
            },
        );
        // 2 of 3 patterns present.
        assert!((verdict.checks.field_detection_rate - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(verdict.checks.field_coverage, Some(true));
        assert!(verdict.passed);
    }

    #[test]
    fn test_failed_result_scores_zero() {
        let failure = EngineResult::failure(
            EngineKind::Azure,
            "Azure",
            &crate::ocr::EngineError::Network("down".to_string()),
            1.0,
        );
        let verdict = evaluator(&[]).evaluate(&failure, &QualityThresholds::default());
        assert!(!verdict.passed);
        assert_eq!(verdict.score, 0.0);
    }

    proptest! {
        /// passed == AND of every individual check, over randomized
        /// threshold/result combinations.
        #[test]
        fn prop_passed_iff_all_checks_hold(
            confidence in 0.0f64..1.0,
            word_rate in 0.0f64..1.0,
            pages in 0u32..4,
            seconds in 0.0f64..600.0,
            min_confidence in 0.0f64..1.0,
            min_word_rate in 0.0f64..1.0,
            max_seconds in 1.0f64..600.0,
            min_pages in 1u32..3,
        ) {
            let thresholds = QualityThresholds {
                min_confidence,
                min_word_recognition_rate: min_word_rate,
                min_field_detection_rate: 0.0,
                max_processing_seconds: max_seconds,
                min_pages,
            };
            let result = result(confidence, word_rate, pages, seconds);
            let verdict = evaluator(&[]).evaluate(&result, &thresholds);

            let expected = result.confidence >= min_confidence
                && result.word_recognition_rate >= min_word_rate
                && seconds <= max_seconds
                && pages >= min_pages;
            prop_assert_eq!(verdict.passed, expected);
        }
    }
}
