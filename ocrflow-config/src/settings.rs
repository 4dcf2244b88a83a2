//! ABOUTME: Process-level settings loaded from the environment or a TOML file
//! ABOUTME: Storage backend selection, metadata store location, and worker concurrency

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use ocrflow_core::{OcrFlowError, Result};

/// Which blob-storage backend to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    #[default]
    Local,
    S3,
}

/// Blob storage settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    pub kind: StorageKind,
    /// Root directory for the local backend.
    pub local_path: String,
    pub s3_bucket: Option<String>,
    pub s3_region: Option<String>,
    /// Custom endpoint (MinIO and friends).
    pub s3_endpoint: Option<String>,
    pub s3_key_prefix: String,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            kind: StorageKind::Local,
            local_path: "./storage".to_string(),
            s3_bucket: None,
            s3_region: None,
            s3_endpoint: None,
            s3_key_prefix: String::new(),
        }
    }
}

/// Process settings for the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrFlowSettings {
    /// SQLite database URL for the metadata store.
    pub database_url: String,
    pub storage: StorageSettings,
    /// Per-queue worker concurrency; unlisted queues get `default_concurrency`.
    pub queue_concurrency: HashMap<String, usize>,
    pub default_concurrency: usize,
    /// Per-engine requests-per-minute caps; unlisted engines are uncapped.
    pub engine_rate_limits: HashMap<String, u32>,
    /// Seconds between metrics-collector flushes.
    pub metrics_flush_interval_seconds: u64,
}

impl Default for OcrFlowSettings {
    fn default() -> Self {
        Self {
            database_url: "sqlite://ocrflow.db?mode=rwc".to_string(),
            storage: StorageSettings::default(),
            queue_concurrency: HashMap::new(),
            default_concurrency: 4,
            engine_rate_limits: HashMap::new(),
            metrics_flush_interval_seconds: 60,
        }
    }
}

impl OcrFlowSettings {
    /// Load settings from `OCRFLOW_*` environment variables on top of the
    /// defaults.
    pub fn from_env() -> Result<Self> {
        let mut settings = Self::default();

        if let Ok(url) = std::env::var("OCRFLOW_DATABASE_URL") {
            settings.database_url = url;
        }
        if let Ok(kind) = std::env::var("OCRFLOW_STORAGE_TYPE") {
            settings.storage.kind = match kind.to_ascii_lowercase().as_str() {
                "local" => StorageKind::Local,
                "s3" => StorageKind::S3,
                other => {
                    return Err(OcrFlowError::configuration(format!(
                        "OCRFLOW_STORAGE_TYPE must be 'local' or 's3', got '{other}'"
                    )))
                }
            };
        }
        if let Ok(path) = std::env::var("OCRFLOW_LOCAL_STORAGE_PATH") {
            settings.storage.local_path = path;
        }
        settings.storage.s3_bucket = std::env::var("OCRFLOW_S3_BUCKET").ok();
        settings.storage.s3_region = std::env::var("OCRFLOW_S3_REGION").ok();
        settings.storage.s3_endpoint = std::env::var("OCRFLOW_S3_ENDPOINT").ok();
        if let Ok(prefix) = std::env::var("OCRFLOW_S3_KEY_PREFIX") {
            settings.storage.s3_key_prefix = prefix;
        }
        if let Ok(value) = std::env::var("OCRFLOW_WORKER_CONCURRENCY") {
            settings.default_concurrency = value.parse().map_err(|_| {
                OcrFlowError::configuration("OCRFLOW_WORKER_CONCURRENCY must be an integer")
            })?;
        }
        if let Ok(value) = std::env::var("OCRFLOW_METRICS_FLUSH_SECONDS") {
            settings.metrics_flush_interval_seconds = value.parse().map_err(|_| {
                OcrFlowError::configuration("OCRFLOW_METRICS_FLUSH_SECONDS must be an integer")
            })?;
        }

        settings.validate()?;
        Ok(settings)
    }

    /// Load settings from a TOML file.
    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            OcrFlowError::configuration(format!("cannot read settings file {}", path.display()))
                .with_source(e)
        })?;
        let settings: Self = toml::from_str(&raw).map_err(|e| {
            OcrFlowError::configuration(format!("invalid settings file {}", path.display()))
                .with_source(e)
        })?;
        settings.validate()?;
        Ok(settings)
    }

    /// Concurrency for a named queue.
    #[must_use]
    pub fn concurrency_for(&self, queue: &str) -> usize {
        self.queue_concurrency
            .get(queue)
            .copied()
            .unwrap_or(self.default_concurrency)
            .max(1)
    }

    fn validate(&self) -> Result<()> {
        if self.storage.kind == StorageKind::S3 && self.storage.s3_bucket.is_none() {
            return Err(OcrFlowError::configuration(
                "S3 storage selected but OCRFLOW_S3_BUCKET is not set",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let settings = OcrFlowSettings::default();
        assert_eq!(settings.storage.kind, StorageKind::Local);
        assert_eq!(settings.concurrency_for("document_processing"), 4);
    }

    #[test]
    fn test_queue_concurrency_lookup() {
        let mut settings = OcrFlowSettings::default();
        settings
            .queue_concurrency
            .insert("document_processing".into(), 8);
        assert_eq!(settings.concurrency_for("document_processing"), 8);
        assert_eq!(settings.concurrency_for("email_ingestion"), 4);
    }

    #[test]
    fn test_toml_round_trip() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
database_url = "sqlite://test.db"
default_concurrency = 2

[storage]
kind = "local"
local_path = "/tmp/blobs"
"#
        )
        .unwrap();
        let settings = OcrFlowSettings::from_toml_file(file.path()).unwrap();
        assert_eq!(settings.database_url, "sqlite://test.db");
        assert_eq!(settings.storage.local_path, "/tmp/blobs");
        assert_eq!(settings.default_concurrency, 2);
    }

    #[test]
    fn test_s3_requires_bucket() {
        let mut settings = OcrFlowSettings::default();
        settings.storage.kind = StorageKind::S3;
        assert!(settings.validate().is_err());
        settings.storage.s3_bucket = Some("ocr-artifacts".into());
        assert!(settings.validate().is_ok());
    }
}
