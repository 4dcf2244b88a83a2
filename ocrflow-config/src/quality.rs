//! ABOUTME: Quality thresholds an OCR result must meet to pass evaluation
//! ABOUTME: Defaults mirror the production workflow presets

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Quality thresholds for OCR result evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityThresholds {
    /// Minimum average confidence score, in [0,1].
    pub min_confidence: f64,
    /// Minimum word recognition rate, in [0,1].
    pub min_word_recognition_rate: f64,
    /// Minimum ratio of expected fields detected, in [0,1].
    pub min_expected_fields_detected: f64,
    /// Maximum allowed processing time, in seconds.
    pub max_processing_time_seconds: u64,
    /// Minimum number of pages that must be processed.
    pub min_pages_processed: u64,
}

impl Default for QualityThresholds {
    fn default() -> Self {
        Self {
            min_confidence: 0.7,
            min_word_recognition_rate: 0.8,
            min_expected_fields_detected: 0.6,
            max_processing_time_seconds: 300,
            min_pages_processed: 1,
        }
    }
}

impl QualityThresholds {
    /// The processing-time ceiling as a `Duration`.
    #[must_use]
    pub fn max_processing_time(&self) -> Duration {
        Duration::from_secs(self.max_processing_time_seconds)
    }

    /// Reject out-of-range ratio fields.
    pub fn validate(&self) -> ocrflow_core::Result<()> {
        for (name, value) in [
            ("min_confidence", self.min_confidence),
            ("min_word_recognition_rate", self.min_word_recognition_rate),
            (
                "min_expected_fields_detected",
                self.min_expected_fields_detected,
            ),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ocrflow_core::OcrFlowError::validation(
                    format!("{name} must be within [0,1], got {value}"),
                    name,
                ));
            }
        }
        if self.min_pages_processed < 1 {
            return Err(ocrflow_core::OcrFlowError::validation(
                "min_pages_processed must be at least 1",
                "min_pages_processed",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let thresholds = QualityThresholds::default();
        assert_eq!(thresholds.min_confidence, 0.7);
        assert_eq!(thresholds.min_word_recognition_rate, 0.8);
        assert_eq!(thresholds.min_pages_processed, 1);
        assert_eq!(thresholds.max_processing_time(), Duration::from_secs(300));
    }

    #[test]
    fn test_validate_rejects_out_of_range() {
        let mut thresholds = QualityThresholds::default();
        thresholds.min_confidence = 1.2;
        assert!(thresholds.validate().is_err());

        let mut thresholds = QualityThresholds::default();
        thresholds.min_pages_processed = 0;
        assert!(thresholds.validate().is_err());
    }
}
