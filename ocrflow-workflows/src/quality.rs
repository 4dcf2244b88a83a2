//! ABOUTME: Quality evaluation of canonical OCR results against configured thresholds
//! ABOUTME: Per-criterion checks plus a scalar quality score for logging

use serde::{Deserialize, Serialize};
use tracing::debug;

use ocrflow_config::QualityThresholds;
use ocrflow_core::OcrResult;

/// Outcome of evaluating one OCR result against thresholds. The result
/// passes iff every individual check passes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityEvaluation {
    pub confidence_check: bool,
    pub word_count_check: bool,
    pub page_count_check: bool,
    pub processing_time_check: bool,
    pub word_recognition_rate: f64,
    pub word_recognition_check: bool,
    /// All checks passed.
    pub passed: bool,
    /// Fraction of passing checks, for logging and diagnostics.
    pub quality_score: f64,
}

/// Evaluate `result` against `thresholds`.
///
/// The word recognition rate divides by an assumed floor of 100 expected
/// words, so an empty result scores low and the ratio is defined for any
/// word count.
#[must_use]
pub fn evaluate(result: &OcrResult, thresholds: &QualityThresholds) -> QualityEvaluation {
    let confidence_check = result.confidence >= thresholds.min_confidence;
    let word_count_check = result.word_count > 0;
    let page_count_check = result.page_count >= thresholds.min_pages_processed;
    let processing_time_check = result.processing_time <= thresholds.max_processing_time();

    let expected_words = (result.word_count as f64).max(100.0);
    let word_recognition_rate = (result.word_count as f64 / expected_words).min(1.0);
    let word_recognition_check = word_recognition_rate >= thresholds.min_word_recognition_rate;

    let checks = [
        confidence_check,
        word_count_check,
        page_count_check,
        processing_time_check,
        word_recognition_check,
    ];
    let passing = checks.iter().filter(|&&check| check).count();
    let quality_score = passing as f64 / checks.len() as f64;
    let passed = passing == checks.len();

    debug!(
        engine = %result.engine_kind,
        passed,
        quality_score,
        confidence = result.confidence,
        word_count = result.word_count,
        "quality evaluation"
    );

    QualityEvaluation {
        confidence_check,
        word_count_check,
        page_count_check,
        processing_time_check,
        word_recognition_rate,
        word_recognition_check,
        passed,
        quality_score,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ocrflow_core::EngineKind;
    use std::time::Duration;

    fn result(confidence: f64, words: usize, pages: u64, secs: u64) -> OcrResult {
        let text = vec!["word"; words].join(" ");
        OcrResult::new(
            EngineKind::Azure,
            "Azure Document Intelligence",
            text,
            confidence,
            pages,
            Duration::from_secs(secs),
        )
    }

    #[test]
    fn test_good_result_passes_all_checks() {
        let evaluation = evaluate(&result(0.92, 450, 3, 15), &QualityThresholds::default());
        assert!(evaluation.passed);
        assert_eq!(evaluation.quality_score, 1.0);
        assert_eq!(evaluation.word_recognition_rate, 1.0);
    }

    #[test]
    fn test_low_confidence_fails_only_that_check() {
        let evaluation = evaluate(&result(0.55, 120, 1, 10), &QualityThresholds::default());
        assert!(!evaluation.passed);
        assert!(!evaluation.confidence_check);
        assert!(evaluation.word_count_check);
        assert!(evaluation.quality_score < 1.0);
        assert!((evaluation.quality_score - 0.8).abs() < 1e-9);
    }

    #[test]
    fn test_empty_result_fails_word_checks() {
        let evaluation = evaluate(&result(0.9, 0, 1, 1), &QualityThresholds::default());
        assert!(!evaluation.passed);
        assert!(!evaluation.word_count_check);
        assert_eq!(evaluation.word_recognition_rate, 0.0);
        assert!(!evaluation.word_recognition_check);
    }

    #[test]
    fn test_few_words_lower_recognition_rate() {
        // 40 words against the floor of 100 expected.
        let evaluation = evaluate(&result(0.9, 40, 1, 1), &QualityThresholds::default());
        assert!((evaluation.word_recognition_rate - 0.4).abs() < 1e-9);
        assert!(!evaluation.word_recognition_check);
    }

    #[test]
    fn test_processing_time_ceiling() {
        let thresholds = QualityThresholds {
            max_processing_time_seconds: 10,
            ..QualityThresholds::default()
        };
        assert!(evaluate(&result(0.9, 200, 1, 10), &thresholds).processing_time_check);
        assert!(!evaluate(&result(0.9, 200, 1, 11), &thresholds).processing_time_check);
    }

    #[test]
    fn test_quality_monotonicity() {
        // Raising any single threshold can only keep or remove a pass.
        let base = QualityThresholds::default();
        let sample = result(0.75, 450, 2, 20);
        let before = evaluate(&sample, &base);
        assert!(before.passed);

        let raised = [
            QualityThresholds {
                min_confidence: 0.8,
                ..base.clone()
            },
            QualityThresholds {
                min_word_recognition_rate: 1.0,
                ..base.clone()
            },
            QualityThresholds {
                min_pages_processed: 3,
                ..base.clone()
            },
            QualityThresholds {
                max_processing_time_seconds: 10,
                ..base.clone()
            },
        ];
        for thresholds in raised {
            let after = evaluate(&sample, &thresholds);
            assert!(after.quality_score <= before.quality_score);
        }
    }
}
