//! ABOUTME: Named workflow presets recognized by the orchestrator
//! ABOUTME: azure_primary, google_primary, and opensource engine chains

use ocrflow_core::{EngineKind, OcrFlowError, Result};

use crate::engine::EngineConfig;
use crate::workflow::WorkflowConfig;

/// Names of the built-in presets.
#[must_use]
pub fn preset_names() -> &'static [&'static str] {
    &["azure_primary", "google_primary", "opensource"]
}

/// Resolve a named preset. Unknown names are a configuration error.
pub fn preset(name: &str) -> Result<WorkflowConfig> {
    match name {
        "azure_primary" => Ok(azure_primary()),
        "google_primary" => Ok(google_primary()),
        "opensource" => Ok(opensource()),
        other => Err(OcrFlowError::configuration(format!(
            "unknown workflow preset: {other} (available: {})",
            preset_names().join(", ")
        ))),
    }
}

/// Azure primary with Google and Tesseract fallbacks.
fn azure_primary() -> WorkflowConfig {
    WorkflowConfig::new(
        "azure_primary",
        "Azure Primary with Google Fallback",
        EngineConfig::new(EngineKind::Azure, "Azure Document Intelligence")
            .with_timeout_seconds(300),
    )
    .with_fallbacks(vec![
        EngineConfig::new(EngineKind::Google, "Google Document AI").with_timeout_seconds(300),
        EngineConfig::new(EngineKind::Tesseract, "Tesseract OCR").with_timeout_seconds(180),
    ])
}

/// Google primary with Azure and Tesseract fallbacks.
fn google_primary() -> WorkflowConfig {
    WorkflowConfig::new(
        "google_primary",
        "Google Primary with Azure Fallback",
        EngineConfig::new(EngineKind::Google, "Google Document AI").with_timeout_seconds(300),
    )
    .with_fallbacks(vec![
        EngineConfig::new(EngineKind::Azure, "Azure Document Intelligence")
            .with_timeout_seconds(300),
        EngineConfig::new(EngineKind::Tesseract, "Tesseract OCR").with_timeout_seconds(180),
    ])
}

/// Local engines only: Tesseract primary, PaddleOCR fallback.
fn opensource() -> WorkflowConfig {
    WorkflowConfig::new(
        "opensource",
        "Open Source OCR Engines",
        EngineConfig::new(EngineKind::Tesseract, "Tesseract OCR").with_timeout_seconds(300),
    )
    .with_fallbacks(vec![
        EngineConfig::new(EngineKind::Paddle, "PaddleOCR").with_timeout_seconds(300),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_presets_resolve_and_validate() {
        for name in preset_names() {
            let config = preset(name).unwrap();
            assert_eq!(config.id, *name);
            config.validate().unwrap();
        }
    }

    #[test]
    fn test_unknown_preset_is_configuration_error() {
        let err = preset("abbyy_primary").unwrap_err();
        assert_eq!(err.category(), ocrflow_core::ErrorCategory::Configuration);
        assert!(err.to_string().contains("abbyy_primary"));
    }

    #[test]
    fn test_azure_primary_chain() {
        let config = preset("azure_primary").unwrap();
        assert_eq!(
            config.engine_kinds(),
            vec![EngineKind::Azure, EngineKind::Google, EngineKind::Tesseract]
        );
        assert_eq!(config.fallbacks[1].timeout_seconds, 180);
    }

    #[test]
    fn test_opensource_chain() {
        let config = preset("opensource").unwrap();
        assert_eq!(
            config.engine_kinds(),
            vec![EngineKind::Tesseract, EngineKind::Paddle]
        );
        // Parallelism clamped to the chain length.
        assert_eq!(config.max_parallel_engines, 2);
    }
}
