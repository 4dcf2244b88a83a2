//! ABOUTME: Per-request overrides merged into a named preset once at entry
//! ABOUTME: Only fields present in the override replace the preset values

use serde::{Deserialize, Serialize};

use ocrflow_core::Result;

use crate::engine::EngineConfig;
use crate::quality::QualityThresholds;
use crate::retry::RetryPolicy;
use crate::workflow::{SelectionStrategy, WorkflowConfig};

/// Optional per-request overrides. Every field is optional; absent fields
/// leave the preset untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowOverrides {
    pub primary: Option<EngineConfig>,
    pub fallbacks: Option<Vec<EngineConfig>>,
    pub stop_on_success: Option<bool>,
    pub parallel_fallbacks: Option<bool>,
    pub max_parallel_engines: Option<u32>,
    pub total_timeout_seconds: Option<u64>,
    pub result_selection_strategy: Option<SelectionStrategy>,
    pub global_quality_thresholds: Option<QualityThresholds>,
    pub global_retry_policy: Option<RetryPolicy>,
}

impl WorkflowOverrides {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.primary.is_none()
            && self.fallbacks.is_none()
            && self.stop_on_success.is_none()
            && self.parallel_fallbacks.is_none()
            && self.max_parallel_engines.is_none()
            && self.total_timeout_seconds.is_none()
            && self.result_selection_strategy.is_none()
            && self.global_quality_thresholds.is_none()
            && self.global_retry_policy.is_none()
    }

    /// Merge into `base`, validating the result. Invalid merged configs
    /// are rejected with a configuration error before any engine runs.
    pub fn apply(self, mut base: WorkflowConfig) -> Result<WorkflowConfig> {
        if let Some(primary) = self.primary {
            base.primary = primary;
        }
        if let Some(fallbacks) = self.fallbacks {
            base.fallbacks = fallbacks;
        }
        if let Some(stop_on_success) = self.stop_on_success {
            base.stop_on_success = stop_on_success;
        }
        if let Some(parallel_fallbacks) = self.parallel_fallbacks {
            base.parallel_fallbacks = parallel_fallbacks;
        }
        if let Some(max_parallel_engines) = self.max_parallel_engines {
            base.max_parallel_engines = max_parallel_engines;
        }
        if let Some(total_timeout_seconds) = self.total_timeout_seconds {
            base.total_timeout_seconds = total_timeout_seconds;
        }
        if let Some(strategy) = self.result_selection_strategy {
            base.result_selection_strategy = strategy;
        }
        if let Some(thresholds) = self.global_quality_thresholds {
            base.global_quality_thresholds = thresholds;
        }
        if let Some(policy) = self.global_retry_policy {
            base.global_retry_policy = policy;
        }

        base.validate()?;
        Ok(base)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::presets::preset;
    use ocrflow_core::EngineKind;

    #[test]
    fn test_empty_overrides_leave_preset_unchanged() {
        let base = preset("azure_primary").unwrap();
        let merged = WorkflowOverrides::default().apply(base.clone()).unwrap();
        assert_eq!(merged.stop_on_success, base.stop_on_success);
        assert_eq!(merged.engine_kinds(), base.engine_kinds());
        assert!(WorkflowOverrides::default().is_empty());
    }

    #[test]
    fn test_flag_overrides_apply() {
        let overrides = WorkflowOverrides {
            stop_on_success: Some(false),
            parallel_fallbacks: Some(true),
            total_timeout_seconds: Some(60),
            ..WorkflowOverrides::default()
        };
        let merged = overrides.apply(preset("azure_primary").unwrap()).unwrap();
        assert!(!merged.stop_on_success);
        assert!(merged.parallel_fallbacks);
        assert_eq!(merged.total_timeout_seconds, 60);
    }

    #[test]
    fn test_invalid_merge_rejected() {
        // Overriding the primary to duplicate a fallback kind must fail.
        let overrides = WorkflowOverrides {
            primary: Some(EngineConfig::new(EngineKind::Google, "Google Document AI")),
            ..WorkflowOverrides::default()
        };
        assert!(overrides.apply(preset("azure_primary").unwrap()).is_err());
    }

    #[test]
    fn test_threshold_override_applies_globally() {
        let overrides = WorkflowOverrides {
            global_quality_thresholds: Some(QualityThresholds {
                min_confidence: 0.9,
                ..QualityThresholds::default()
            }),
            ..WorkflowOverrides::default()
        };
        let merged = overrides.apply(preset("opensource").unwrap()).unwrap();
        assert_eq!(merged.global_quality_thresholds.min_confidence, 0.9);
    }
}
