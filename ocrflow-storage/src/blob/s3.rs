//! ABOUTME: S3-backed blob storage for production deployments
//! ABOUTME: Works against AWS or any S3-compatible endpoint (MinIO, localstack)

use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;
use tracing::debug;

use ocrflow_core::{BlobStorage, OcrFlowError, Result};

use super::sha256_hex;

/// Blob storage over an S3 bucket. An optional key prefix namespaces all
/// objects, so one bucket can serve several deployments.
pub struct S3BlobStorage {
    client: aws_sdk_s3::Client,
    bucket: String,
    key_prefix: String,
}

impl S3BlobStorage {
    pub fn new(client: aws_sdk_s3::Client, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
            key_prefix: String::new(),
        }
    }

    /// Build a storage from ambient AWS configuration.
    pub async fn from_env(
        bucket: impl Into<String>,
        region: Option<String>,
        endpoint: Option<String>,
    ) -> Self {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
        if let Some(region) = region {
            loader = loader.region(aws_config::Region::new(region));
        }
        if let Some(endpoint) = endpoint {
            loader = loader.endpoint_url(endpoint);
        }
        let sdk_config = loader.load().await;
        Self::new(aws_sdk_s3::Client::new(&sdk_config), bucket)
    }

    #[must_use]
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    fn full_key(&self, key: &str) -> String {
        if self.key_prefix.is_empty() {
            key.to_string()
        } else {
            format!("{}/{}", self.key_prefix.trim_end_matches('/'), key)
        }
    }
}

#[async_trait]
impl BlobStorage for S3BlobStorage {
    async fn upload(&self, key: &str, bytes: &[u8], content_type: &str) -> Result<()> {
        let full_key = self.full_key(key);
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&full_key)
            .content_type(content_type)
            .body(ByteStream::from(bytes.to_vec()))
            .send()
            .await
            .map_err(|e| {
                OcrFlowError::storage(format!("s3 put failed: {full_key}")).with_source(e)
            })?;
        debug!(key = %full_key, bytes = bytes.len(), "stored s3 blob");
        Ok(())
    }

    async fn download(&self, key: &str) -> Result<Vec<u8>> {
        let full_key = self.full_key(key);
        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&full_key)
            .send()
            .await
            .map_err(|e| {
                OcrFlowError::storage(format!("s3 get failed: {full_key}")).with_source(e)
            })?;
        let bytes = output.body.collect().await.map_err(|e| {
            OcrFlowError::storage(format!("s3 body read failed: {full_key}")).with_source(e)
        })?;
        Ok(bytes.into_bytes().to_vec())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let full_key = self.full_key(key);
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(&full_key)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(err) => {
                let not_found = err
                    .as_service_error()
                    .map(|e| e.is_not_found())
                    .unwrap_or(false);
                if not_found {
                    Ok(false)
                } else {
                    Err(OcrFlowError::storage(format!("s3 head failed: {full_key}"))
                        .with_source(err))
                }
            }
        }
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let full_key = self.full_key(key);
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(&full_key)
            .send()
            .await
            .map_err(|e| {
                OcrFlowError::storage(format!("s3 delete failed: {full_key}")).with_source(e)
            })?;
        Ok(())
    }

    async fn content_hash(&self, key: &str) -> Result<String> {
        let bytes = self.download(key).await?;
        Ok(sha256_hex(&bytes))
    }
}

impl std::fmt::Debug for S3BlobStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3BlobStorage")
            .field("bucket", &self.bucket)
            .field("key_prefix", &self.key_prefix)
            .finish_non_exhaustive()
    }
}
