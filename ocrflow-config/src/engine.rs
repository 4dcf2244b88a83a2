//! ABOUTME: Per-engine configuration including preprocessing and policy overrides
//! ABOUTME: The driver-specific params bag carries endpoints, models, and language codes

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use ocrflow_core::EngineKind;

use crate::quality::QualityThresholds;
use crate::retry::RetryPolicy;

/// Image preprocessing options. Ordering is fixed:
/// grayscale → denoise → adaptive-threshold → skew-correct → DPI uplift.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreprocessOptions {
    pub grayscale: bool,
    pub denoise: bool,
    pub adaptive_threshold: bool,
    pub skew_correction: bool,
    pub dpi_optimization: bool,
    /// DPI uplift target; applied only when the current DPI is below it.
    pub min_dpi: u32,
}

impl Default for PreprocessOptions {
    fn default() -> Self {
        Self {
            grayscale: true,
            denoise: true,
            adaptive_threshold: true,
            skew_correction: true,
            dpi_optimization: true,
            min_dpi: 300,
        }
    }
}

/// Configuration for a specific OCR engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Driver family.
    pub kind: EngineKind,
    /// Human-readable name for logs and run records.
    pub display_name: String,
    /// Disabled engines are skipped by the registry.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Per-engine wall-clock timeout including retries, in seconds.
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,

    /// Whether to preprocess the document before invocation.
    #[serde(default = "default_enabled")]
    pub preprocess_enabled: bool,
    #[serde(default)]
    pub preprocess: PreprocessOptions,

    /// Engine-specific quality thresholds (overrides global).
    #[serde(default)]
    pub quality_thresholds: Option<QualityThresholds>,
    /// Engine-specific retry policy (overrides global).
    #[serde(default)]
    pub retry_policy: Option<RetryPolicy>,

    /// Driver-specific parameters: endpoint names, model identifiers,
    /// language codes, GPU flags, rate limits.
    #[serde(default)]
    pub params: HashMap<String, serde_json::Value>,
}

fn default_enabled() -> bool {
    true
}

fn default_timeout_seconds() -> u64 {
    300
}

impl EngineConfig {
    pub fn new(kind: EngineKind, display_name: impl Into<String>) -> Self {
        Self {
            kind,
            display_name: display_name.into(),
            enabled: true,
            timeout_seconds: default_timeout_seconds(),
            preprocess_enabled: true,
            preprocess: PreprocessOptions::default(),
            quality_thresholds: None,
            retry_policy: None,
            params: HashMap::new(),
        }
    }

    #[must_use]
    pub fn with_timeout_seconds(mut self, seconds: u64) -> Self {
        self.timeout_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_param(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.params.insert(key.into(), value);
        self
    }

    #[must_use]
    pub fn with_preprocess_enabled(mut self, enabled: bool) -> Self {
        self.preprocess_enabled = enabled;
        self
    }

    /// The per-engine timeout as a `Duration`.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    /// A string-valued param, if present.
    #[must_use]
    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.params.get(key).and_then(|v| v.as_str())
    }

    /// A numeric param, if present.
    #[must_use]
    pub fn param_u64(&self, key: &str) -> Option<u64> {
        self.params.get(key).and_then(serde_json::Value::as_u64)
    }

    /// A boolean param, if present.
    #[must_use]
    pub fn param_bool(&self, key: &str) -> Option<bool> {
        self.params.get(key).and_then(serde_json::Value::as_bool)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        let config = EngineConfig::new(EngineKind::Azure, "Azure Document Intelligence");
        assert!(config.enabled);
        assert!(config.preprocess_enabled);
        assert_eq!(config.timeout(), Duration::from_secs(300));
        assert!(config.quality_thresholds.is_none());
    }

    #[test]
    fn test_param_accessors() {
        let config = EngineConfig::new(EngineKind::Tesseract, "Tesseract OCR")
            .with_param("languages", serde_json::json!("eng+deu"))
            .with_param("requests_per_minute", serde_json::json!(30))
            .with_param("use_gpu", serde_json::json!(false));
        assert_eq!(config.param_str("languages"), Some("eng+deu"));
        assert_eq!(config.param_u64("requests_per_minute"), Some(30));
        assert_eq!(config.param_bool("use_gpu"), Some(false));
        assert_eq!(config.param_str("missing"), None);
    }

    #[test]
    fn test_serde_defaults_fill_in() {
        let config: EngineConfig = serde_json::from_str(
            r#"{"kind": "google", "display_name": "Google Document AI"}"#,
        )
        .unwrap();
        assert!(config.enabled);
        assert_eq!(config.timeout_seconds, 300);
        assert_eq!(config.preprocess.min_dpi, 300);
    }
}
