//! ABOUTME: Filesystem-backed blob storage rooted at a configured directory
//! ABOUTME: Keys map to relative paths; parent directories are created on demand

use async_trait::async_trait;
use std::path::PathBuf;
use tracing::debug;

use ocrflow_core::{BlobStorage, OcrFlowError, Result};

use super::sha256_hex;

/// Blob storage over a local directory tree. Keys become relative paths
/// under the root; path traversal outside the root is rejected.
pub struct LocalBlobStorage {
    root: PathBuf,
}

impl LocalBlobStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, key: &str) -> Result<PathBuf> {
        if key.is_empty() || key.split('/').any(|part| part == ".." || part.is_empty()) {
            return Err(OcrFlowError::storage(format!("invalid blob key: {key}")));
        }
        Ok(self.root.join(key))
    }

    async fn read(&self, key: &str) -> Result<Vec<u8>> {
        let path = self.resolve(key)?;
        tokio::fs::read(&path).await.map_err(|e| {
            OcrFlowError::storage(format!("blob not readable: {key}")).with_source(e)
        })
    }
}

#[async_trait]
impl BlobStorage for LocalBlobStorage {
    async fn upload(&self, key: &str, bytes: &[u8], _content_type: &str) -> Result<()> {
        let path = self.resolve(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                OcrFlowError::storage(format!("cannot create blob directory for {key}"))
                    .with_source(e)
            })?;
        }
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| OcrFlowError::storage(format!("blob write failed: {key}")).with_source(e))?;
        debug!(key, bytes = bytes.len(), "stored local blob");
        Ok(())
    }

    async fn download(&self, key: &str) -> Result<Vec<u8>> {
        self.read(key).await
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let path = self.resolve(key)?;
        Ok(tokio::fs::try_exists(&path).await.unwrap_or(false))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = self.resolve(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => {
                Err(OcrFlowError::storage(format!("blob delete failed: {key}")).with_source(e))
            }
        }
    }

    async fn content_hash(&self, key: &str) -> Result<String> {
        let bytes = self.read(key).await?;
        Ok(sha256_hex(&bytes))
    }
}

impl std::fmt::Debug for LocalBlobStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalBlobStorage")
            .field("root", &self.root)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_round_trip_and_hash() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalBlobStorage::new(dir.path());

        let key = "ocr-runs/azure/1/raw_response.json";
        storage
            .upload(key, br#"{"pages": []}"#, "application/json")
            .await
            .unwrap();

        assert!(storage.exists(key).await.unwrap());
        let bytes = storage.download(key).await.unwrap();
        assert_eq!(bytes, br#"{"pages": []}"#);
        assert_eq!(
            storage.content_hash(key).await.unwrap(),
            sha256_hex(br#"{"pages": []}"#)
        );

        storage.delete(key).await.unwrap();
        assert!(!storage.exists(key).await.unwrap());
        // Double delete is fine.
        storage.delete(key).await.unwrap();
    }

    #[tokio::test]
    async fn test_traversal_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalBlobStorage::new(dir.path());
        assert!(storage.download("../etc/passwd").await.is_err());
        assert!(storage.upload("", b"x", "text/plain").await.is_err());
    }
}
