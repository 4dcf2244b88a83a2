//! ABOUTME: The OcrEngine driver contract implemented by every provider wrapper
//! ABOUTME: One trait, six variants; analyze, health check, and cost estimation

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use crate::error::Result;
use crate::types::{AnalyzeFeature, EngineKind, OcrResult};

/// Result of an engine health check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineHealth {
    pub healthy: bool,
    /// Free-form diagnostics: versions, endpoints, missing prerequisites.
    pub details: HashMap<String, String>,
}

impl EngineHealth {
    #[must_use]
    pub fn healthy() -> Self {
        Self {
            healthy: true,
            details: HashMap::new(),
        }
    }

    #[must_use]
    pub fn unhealthy(reason: impl Into<String>) -> Self {
        let mut details = HashMap::new();
        details.insert("reason".to_string(), reason.into());
        Self {
            healthy: false,
            details,
        }
    }

    #[must_use]
    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }
}

/// The uniform driver contract.
///
/// Implementations wrap one OCR provider (commercial API or local engine)
/// and are responsible for:
///
/// - populating every [`OcrResult`] field, normalizing percent confidences;
/// - classifying failures into routing categories (network/5xx/rate-limit
///   → transient, auth/bad-input → permanent);
/// - retrying transient failures with exponential backoff and jitter,
///   bounded by the configured per-engine timeout including retries;
/// - running the preprocessor when enabled and deleting the preprocessed
///   artifact on every exit path.
#[async_trait]
pub trait OcrEngine: Send + Sync {
    /// The stable driver-family tag.
    fn kind(&self) -> EngineKind;

    /// Human-readable engine name from the engine config.
    fn name(&self) -> &str;

    /// Features this driver supports. `analyze` ignores requested
    /// features outside this set.
    fn supported_features(&self) -> &[AnalyzeFeature];

    /// Analyze a document and return a canonical result.
    async fn analyze(
        &self,
        document_path: &Path,
        features: &[AnalyzeFeature],
    ) -> Result<OcrResult>;

    /// Check that the driver's prerequisites (credentials, endpoint,
    /// binary) are in place.
    async fn health_check(&self) -> EngineHealth;

    /// Estimated cost in cents for a document of `page_count` pages.
    /// `None` for engines without a declared pricing function.
    fn estimate_cost(&self, page_count: u64) -> Option<f64>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_builders() {
        let ok = EngineHealth::healthy().with_detail("version", "5.3.0");
        assert!(ok.healthy);
        assert_eq!(ok.details["version"], "5.3.0");

        let bad = EngineHealth::unhealthy("AZURE_AI_KEY not set");
        assert!(!bad.healthy);
        assert!(bad.details["reason"].contains("AZURE_AI_KEY"));
    }
}
