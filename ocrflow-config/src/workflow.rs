//! ABOUTME: Complete workflow configuration: engine chain, behavior flags, and breaker settings
//! ABOUTME: Validation enforces the duplicate-engine and parallelism invariants

use serde::{Deserialize, Serialize};
use std::time::Duration;

use ocrflow_core::{EngineKind, OcrFlowError, Result};

use crate::engine::EngineConfig;
use crate::quality::QualityThresholds;
use crate::retry::RetryPolicy;

/// Strategy for selecting the best result.
///
/// Only `HighestConfidence` is implemented; the other values are accepted
/// for config compatibility and currently reduce to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SelectionStrategy {
    #[default]
    HighestConfidence,
    Consensus,
    WeightedAverage,
    FirstSuccess,
}

/// Circuit breaker settings, per workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerSettings {
    pub enabled: bool,
    /// Consecutive failures before the breaker opens.
    pub failure_threshold: u32,
    /// Seconds to wait before probing a tripped engine again.
    pub recovery_timeout_seconds: u64,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            failure_threshold: 5,
            recovery_timeout_seconds: 300,
        }
    }
}

impl BreakerSettings {
    #[must_use]
    pub fn recovery_timeout(&self) -> Duration {
        Duration::from_secs(self.recovery_timeout_seconds)
    }
}

/// Complete OCR workflow configuration. Immutable inside an execution; a
/// per-request override is merged into the named preset once at entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowConfig {
    /// Unique identifier for this workflow configuration.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    #[serde(default = "default_version")]
    pub version: String,

    /// Primary OCR engine.
    pub primary: EngineConfig,
    /// Ordered fallback engines (may be empty).
    #[serde(default)]
    pub fallbacks: Vec<EngineConfig>,

    /// Stop processing when quality thresholds are met.
    #[serde(default = "default_true")]
    pub stop_on_success: bool,
    /// Run fallback engines in parallel instead of sequence.
    #[serde(default)]
    pub parallel_fallbacks: bool,
    /// Maximum number of engines running concurrently.
    #[serde(default = "default_max_parallel")]
    pub max_parallel_engines: u32,
    /// Total timeout for the entire workflow, in seconds.
    #[serde(default = "default_total_timeout")]
    pub total_timeout_seconds: u64,
    #[serde(default)]
    pub result_selection_strategy: SelectionStrategy,

    #[serde(default)]
    pub global_quality_thresholds: QualityThresholds,
    #[serde(default)]
    pub global_retry_policy: RetryPolicy,
    #[serde(default)]
    pub circuit_breaker: BreakerSettings,
}

fn default_version() -> String {
    "1.0".to_string()
}

fn default_true() -> bool {
    true
}

fn default_max_parallel() -> u32 {
    3
}

fn default_total_timeout() -> u64 {
    1800
}

impl WorkflowConfig {
    /// Build a config with defaults for everything but the engine chain.
    pub fn new(id: impl Into<String>, name: impl Into<String>, primary: EngineConfig) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            version: default_version(),
            primary,
            fallbacks: Vec::new(),
            stop_on_success: true,
            parallel_fallbacks: false,
            max_parallel_engines: default_max_parallel(),
            total_timeout_seconds: default_total_timeout(),
            result_selection_strategy: SelectionStrategy::default(),
            global_quality_thresholds: QualityThresholds::default(),
            global_retry_policy: RetryPolicy::default(),
            circuit_breaker: BreakerSettings::default(),
        }
    }

    #[must_use]
    pub fn with_fallbacks(mut self, fallbacks: Vec<EngineConfig>) -> Self {
        // Keep the parallelism bound consistent with the chain length.
        self.max_parallel_engines = self
            .max_parallel_engines
            .min(1 + fallbacks.len() as u32)
            .max(1);
        self.fallbacks = fallbacks;
        self
    }

    /// The total workflow timeout as a `Duration`.
    #[must_use]
    pub fn total_timeout(&self) -> Duration {
        Duration::from_secs(self.total_timeout_seconds)
    }

    /// Effective quality thresholds for an engine: its override or the
    /// workflow-global thresholds.
    #[must_use]
    pub fn effective_thresholds(&self, engine: &EngineConfig) -> QualityThresholds {
        engine
            .quality_thresholds
            .clone()
            .unwrap_or_else(|| self.global_quality_thresholds.clone())
    }

    /// Effective retry policy for an engine.
    #[must_use]
    pub fn effective_retry_policy(&self, engine: &EngineConfig) -> RetryPolicy {
        engine
            .retry_policy
            .clone()
            .unwrap_or_else(|| self.global_retry_policy.clone())
    }

    /// Engine kinds in chain order (primary first).
    #[must_use]
    pub fn engine_kinds(&self) -> Vec<EngineKind> {
        std::iter::once(self.primary.kind)
            .chain(self.fallbacks.iter().map(|e| e.kind))
            .collect()
    }

    /// Validate the workflow invariants:
    ///
    /// - no fallback shares an engine kind with the primary;
    /// - `max_parallel_engines` is at least 1 and at most `1 + fallbacks`;
    /// - thresholds are within range.
    pub fn validate(&self) -> Result<()> {
        for fallback in &self.fallbacks {
            if fallback.kind == self.primary.kind {
                return Err(OcrFlowError::configuration(format!(
                    "fallback engine {} duplicates the primary engine",
                    fallback.kind
                )));
            }
        }

        if self.max_parallel_engines < 1 {
            return Err(OcrFlowError::configuration(
                "max_parallel_engines must be at least 1",
            ));
        }
        let available = 1 + self.fallbacks.len() as u32;
        if self.max_parallel_engines > available {
            return Err(OcrFlowError::configuration(format!(
                "max_parallel_engines {} exceeds available engines {}",
                self.max_parallel_engines, available
            )));
        }

        self.global_quality_thresholds.validate()?;
        if let Some(thresholds) = &self.primary.quality_thresholds {
            thresholds.validate()?;
        }
        for fallback in &self.fallbacks {
            if let Some(thresholds) = &fallback.quality_thresholds {
                thresholds.validate()?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine(kind: EngineKind, name: &str) -> EngineConfig {
        EngineConfig::new(kind, name)
    }

    fn config() -> WorkflowConfig {
        WorkflowConfig::new(
            "test",
            "Test Workflow",
            engine(EngineKind::Azure, "Azure Document Intelligence"),
        )
        .with_fallbacks(vec![
            engine(EngineKind::Google, "Google Document AI"),
            engine(EngineKind::Tesseract, "Tesseract OCR"),
        ])
    }

    #[test]
    fn test_valid_config_passes() {
        assert!(config().validate().is_ok());
    }

    #[test]
    fn test_duplicate_primary_rejected() {
        let mut bad = config();
        bad.fallbacks
            .push(engine(EngineKind::Azure, "Azure again"));
        let err = bad.validate().unwrap_err();
        assert!(err.to_string().contains("duplicates the primary"));
    }

    #[test]
    fn test_parallel_bound_rejected() {
        let mut bad = config();
        bad.max_parallel_engines = 9;
        assert!(bad.validate().is_err());

        bad.max_parallel_engines = 0;
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_with_fallbacks_clamps_parallelism() {
        let config = WorkflowConfig::new(
            "t",
            "t",
            engine(EngineKind::Tesseract, "Tesseract OCR"),
        )
        .with_fallbacks(vec![engine(EngineKind::Paddle, "PaddleOCR")]);
        assert_eq!(config.max_parallel_engines, 2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_effective_overrides() {
        let mut config = config();
        let strict = QualityThresholds {
            min_confidence: 0.95,
            ..QualityThresholds::default()
        };
        config.primary.quality_thresholds = Some(strict.clone());

        assert_eq!(config.effective_thresholds(&config.primary), strict);
        assert_eq!(
            config.effective_thresholds(&config.fallbacks[0]),
            QualityThresholds::default()
        );
    }

    #[test]
    fn test_selection_strategy_values_parse() {
        for raw in [
            "highest_confidence",
            "consensus",
            "weighted_average",
            "first_success",
        ] {
            let json = format!("\"{raw}\"");
            assert!(serde_json::from_str::<SelectionStrategy>(&json).is_ok(), "{raw}");
        }
    }

    #[test]
    fn test_engine_kinds_order() {
        assert_eq!(
            config().engine_kinds(),
            vec![EngineKind::Azure, EngineKind::Google, EngineKind::Tesseract]
        );
    }
}
