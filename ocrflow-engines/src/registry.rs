//! ABOUTME: Driver registry constructing ready, health-checked engines from engine configs
//! ABOUTME: Thread-safe cloud clients are process-wide singletons; local engines are recreated per call

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::OnceCell;
use tracing::{debug, info};

use ocrflow_config::{EngineConfig, RetryPolicy};
use ocrflow_core::{EngineKind, OcrEngine, OcrFlowError, Result};

use crate::drivers::{
    AzureDocumentIntelligence, GoogleDocumentAi, MistralDocumentAi, PaddleOcrEngine,
    TesseractEngine, TextractEngine,
};

/// Successful health probes are reused for this long, so one slow
/// upstream probe is not paid per document.
const HEALTH_CACHE_TTL: Duration = Duration::from_secs(60);

/// Source of ready drivers. The workflow engine depends on this seam,
/// which lets tests substitute scripted engines.
#[async_trait]
pub trait EngineProvider: Send + Sync {
    /// Build a ready driver for `config`, or fail with a configuration
    /// error naming the missing prerequisite.
    async fn acquire(
        &self,
        config: &EngineConfig,
        retry_policy: &RetryPolicy,
    ) -> Result<Arc<dyn OcrEngine>>;
}

/// The production driver registry.
///
/// The underlying HTTP client and AWS configuration are thread-safe and
/// shared across all drivers and invocations; driver values themselves
/// are cheap wrappers rebuilt per call, which also gives the local
/// engines (tesseract, paddle) fresh state every time.
pub struct EngineRegistry {
    http: reqwest::Client,
    aws: OnceCell<aws_config::SdkConfig>,
    healthy_since: DashMap<EngineKind, Instant>,
}

impl EngineRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
            aws: OnceCell::new(),
            healthy_since: DashMap::new(),
        }
    }

    async fn aws_config(&self) -> &aws_config::SdkConfig {
        self.aws
            .get_or_init(|| async {
                aws_config::defaults(aws_config::BehaviorVersion::latest())
                    .load()
                    .await
            })
            .await
    }

    fn build_driver(
        &self,
        config: &EngineConfig,
        retry_policy: &RetryPolicy,
        aws: Option<&aws_config::SdkConfig>,
    ) -> Result<Arc<dyn OcrEngine>> {
        let driver: Arc<dyn OcrEngine> = match config.kind {
            EngineKind::Azure => Arc::new(AzureDocumentIntelligence::new(
                self.http.clone(),
                config.clone(),
                retry_policy.clone(),
            )?),
            EngineKind::Google => Arc::new(GoogleDocumentAi::new(
                self.http.clone(),
                config.clone(),
                retry_policy.clone(),
            )?),
            EngineKind::Mistral => Arc::new(MistralDocumentAi::new(
                self.http.clone(),
                config.clone(),
                retry_policy.clone(),
            )?),
            EngineKind::Textract => {
                let aws = aws.ok_or_else(|| {
                    OcrFlowError::configuration("AWS configuration was not resolved")
                })?;
                Arc::new(TextractEngine::new(
                    aws,
                    config.clone(),
                    retry_policy.clone(),
                ))
            }
            EngineKind::Tesseract => Arc::new(TesseractEngine::new(
                config.clone(),
                retry_policy.clone(),
            )),
            EngineKind::Paddle => Arc::new(PaddleOcrEngine::new(
                config.clone(),
                retry_policy.clone(),
            )),
        };
        Ok(driver)
    }

    fn health_cached(&self, kind: EngineKind) -> bool {
        self.healthy_since
            .get(&kind)
            .is_some_and(|checked| checked.elapsed() < HEALTH_CACHE_TTL)
    }
}

impl Default for EngineRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EngineProvider for EngineRegistry {
    async fn acquire(
        &self,
        config: &EngineConfig,
        retry_policy: &RetryPolicy,
    ) -> Result<Arc<dyn OcrEngine>> {
        if !config.enabled {
            return Err(OcrFlowError::configuration(format!(
                "engine {} ({}) is disabled",
                config.kind, config.display_name
            )));
        }

        let aws = if config.kind == EngineKind::Textract {
            Some(self.aws_config().await.clone())
        } else {
            None
        };
        let driver = self.build_driver(config, retry_policy, aws.as_ref())?;

        if !self.health_cached(config.kind) {
            let health = driver.health_check().await;
            if !health.healthy {
                let reason = health
                    .details
                    .get("reason")
                    .cloned()
                    .unwrap_or_else(|| "health check failed".to_string());
                return Err(OcrFlowError::configuration(format!(
                    "engine {} is not ready: {reason}",
                    config.kind
                )));
            }
            debug!(engine = %config.kind, details = ?health.details, "engine health check passed");
            self.healthy_since.insert(config.kind, Instant::now());
            info!(engine = %config.kind, "driver ready");
        }

        Ok(driver)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_disabled_engine_rejected() {
        let registry = EngineRegistry::new();
        let mut config = EngineConfig::new(EngineKind::Azure, "Azure Document Intelligence");
        config.enabled = false;
        let err = registry
            .acquire(&config, &RetryPolicy::default())
            .await
            .err()
            .unwrap();
        assert!(err.to_string().contains("disabled"));
    }

    #[tokio::test]
    async fn test_missing_credentials_named_in_error() {
        if std::env::var("MISTRAL_API_KEY").is_ok() {
            return;
        }
        let registry = EngineRegistry::new();
        let config = EngineConfig::new(EngineKind::Mistral, "Mistral Document AI");
        let err = registry
            .acquire(&config, &RetryPolicy::default())
            .await
            .err()
            .unwrap();
        assert_eq!(err.category(), ocrflow_core::ErrorCategory::Configuration);
        assert!(err.to_string().contains("MISTRAL_API_KEY"));
    }

    #[tokio::test]
    async fn test_missing_local_binary_fails_health() {
        let registry = EngineRegistry::new();
        let config = EngineConfig::new(EngineKind::Tesseract, "Tesseract OCR")
            .with_param("binary", serde_json::json!("definitely-not-a-real-binary"));
        let err = registry
            .acquire(&config, &RetryPolicy::default())
            .await
            .err()
            .unwrap();
        assert!(err.to_string().contains("not ready"));
    }
}
