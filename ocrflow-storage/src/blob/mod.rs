//! ABOUTME: Blob storage backends implementing the BlobStorage trait
//! ABOUTME: Local filesystem for development, S3 for production, in-memory for tests

mod local;
mod memory;
mod s3;

pub use local::LocalBlobStorage;
pub use memory::MemoryBlobStorage;
pub use s3::S3BlobStorage;

use sha2::{Digest, Sha256};

/// Hex-encoded SHA-256 of a byte slice.
#[must_use]
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{b:02x}")).collect()
}
