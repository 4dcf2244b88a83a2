//! Blob storage trait
//!
//! Abstraction over the object store holding document payloads and raw
//! provider responses. Keys are opaque to implementations; the run store
//! uses the schema `ocr-runs/<engine>/<runId>/raw_response.json`.

use async_trait::async_trait;

use crate::error::Result;

/// Object-store abstraction.
///
/// # Implementation notes
///
/// - Content hashes are SHA-256 hex strings over the stored bytes.
/// - Stored payloads must round-trip byte-for-byte.
/// - Implementations must tolerate concurrent writes to distinct keys.
#[async_trait]
pub trait BlobStorage: Send + Sync {
    /// Store `bytes` under `key`, overwriting any existing object.
    async fn upload(&self, key: &str, bytes: &[u8], content_type: &str) -> Result<()>;

    /// Fetch the object at `key`.
    async fn download(&self, key: &str) -> Result<Vec<u8>>;

    /// Whether an object exists at `key`.
    async fn exists(&self, key: &str) -> Result<bool>;

    /// Delete the object at `key`. Deleting a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Hex-encoded SHA-256 of the object at `key`.
    async fn content_hash(&self, key: &str) -> Result<String>;
}
