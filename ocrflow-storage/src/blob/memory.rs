//! ABOUTME: In-memory blob storage used by tests and local development
//! ABOUTME: DashMap-backed; supports injected upload failures for fault testing

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use ocrflow_core::{BlobStorage, OcrFlowError, Result};

use super::sha256_hex;

/// In-memory blob store. Cheap to clone-by-Arc and safe for concurrent
/// writers keyed by distinct keys.
#[derive(Debug, Default)]
pub struct MemoryBlobStorage {
    objects: DashMap<String, (Vec<u8>, String)>,
    fail_uploads: AtomicBool,
}

impl MemoryBlobStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent uploads fail, for exercising the blob-write-failure
    /// path (runs stay completed with a null pointer).
    pub fn fail_uploads(&self, fail: bool) {
        self.fail_uploads.store(fail, Ordering::SeqCst);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

#[async_trait]
impl BlobStorage for MemoryBlobStorage {
    async fn upload(&self, key: &str, bytes: &[u8], content_type: &str) -> Result<()> {
        if self.fail_uploads.load(Ordering::SeqCst) {
            return Err(OcrFlowError::storage("injected upload failure"));
        }
        self.objects
            .insert(key.to_string(), (bytes.to_vec(), content_type.to_string()));
        Ok(())
    }

    async fn download(&self, key: &str) -> Result<Vec<u8>> {
        self.objects
            .get(key)
            .map(|entry| entry.0.clone())
            .ok_or_else(|| OcrFlowError::storage(format!("blob not found: {key}")))
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.objects.contains_key(key))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.objects.remove(key);
        Ok(())
    }

    async fn content_hash(&self, key: &str) -> Result<String> {
        let bytes = self.download(key).await?;
        Ok(sha256_hex(&bytes))
    }
}
