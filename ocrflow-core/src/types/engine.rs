//! ABOUTME: Engine kind tags and advisory analysis features
//! ABOUTME: Stable identifiers for the six supported OCR driver families

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::OcrFlowError;

/// Stable tag identifying a driver family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    /// Azure Document Intelligence
    Azure,
    /// Google Document AI
    Google,
    /// AWS Textract
    Textract,
    /// Mistral Document AI
    Mistral,
    /// Tesseract OCR (local)
    Tesseract,
    /// PaddleOCR (local)
    Paddle,
}

impl EngineKind {
    /// All known engine kinds, in declaration order.
    pub const ALL: [EngineKind; 6] = [
        Self::Azure,
        Self::Google,
        Self::Textract,
        Self::Mistral,
        Self::Tesseract,
        Self::Paddle,
    ];

    /// Stable lowercase tag used in config, blob keys, and run records.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Azure => "azure",
            Self::Google => "google",
            Self::Textract => "textract",
            Self::Mistral => "mistral",
            Self::Tesseract => "tesseract",
            Self::Paddle => "paddle",
        }
    }

    /// Whether the underlying client is thread-safe and may be shared
    /// process-wide. Local engines carry mutable state and are recreated
    /// per invocation.
    #[must_use]
    pub const fn is_cloud(&self) -> bool {
        matches!(self, Self::Azure | Self::Google | Self::Textract | Self::Mistral)
    }
}

impl std::fmt::Display for EngineKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EngineKind {
    type Err = OcrFlowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "azure" => Ok(Self::Azure),
            "google" | "documentai" => Ok(Self::Google),
            "textract" => Ok(Self::Textract),
            "mistral" | "mistralai" => Ok(Self::Mistral),
            "tesseract" | "pytesseract" => Ok(Self::Tesseract),
            "paddle" | "paddleocr" => Ok(Self::Paddle),
            other => Err(OcrFlowError::configuration(format!(
                "unsupported engine kind: {other}"
            ))),
        }
    }
}

/// Advisory analysis features a caller may request. Drivers ignore
/// features they do not support.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalyzeFeature {
    /// Table structure extraction
    Tables,
    /// Key-value pair / form field extraction
    Forms,
    /// Layout elements (paragraphs, reading order)
    Layout,
    /// Targeted query extraction
    Queries,
    /// Signature detection
    Signatures,
    /// Language detection
    Languages,
}
