//! ABOUTME: Driver implementations behind the OcrEngine contract
//! ABOUTME: Cloud REST drivers, the AWS SDK driver, and local subprocess engines

pub mod azure;
pub mod google;
pub mod mistral;
pub mod paddle;
pub mod tesseract;
pub mod textract;

pub use azure::AzureDocumentIntelligence;
pub use google::GoogleDocumentAi;
pub use mistral::MistralDocumentAi;
pub use paddle::PaddleOcrEngine;
pub use tesseract::TesseractEngine;
pub use textract::TextractEngine;

use std::path::Path;

use ocrflow_core::{OcrFlowError, Result};

/// Read the document payload for inline submission.
pub(crate) async fn read_document_bytes(path: &Path, engine: &str) -> Result<Vec<u8>> {
    tokio::fs::read(path).await.map_err(|e| {
        OcrFlowError::permanent(
            format!("cannot read document {}", path.display()),
            engine,
        )
        .with_source(e)
    })
}

/// Best-effort mime type from the file extension.
pub(crate) fn guess_mime(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("pdf") => "application/pdf",
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("tif" | "tiff") => "image/tiff",
        Some("bmp") => "image/bmp",
        Some("webp") => "image/webp",
        _ => "application/octet-stream",
    }
}

/// Environment lookup with a params-bag override: explicit config wins
/// over ambient environment.
pub(crate) fn param_or_env(
    config: &ocrflow_config::EngineConfig,
    param: &str,
    env_key: &str,
) -> Option<String> {
    config
        .param_str(param)
        .map(str::to_string)
        .or_else(|| std::env::var(env_key).ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guess_mime() {
        assert_eq!(guess_mime(Path::new("a/b/scan.PDF")), "application/pdf");
        assert_eq!(guess_mime(Path::new("x.jpeg")), "image/jpeg");
        assert_eq!(guess_mime(Path::new("x.tiff")), "image/tiff");
        assert_eq!(guess_mime(Path::new("mystery")), "application/octet-stream");
    }
}
