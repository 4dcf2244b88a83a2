//! ABOUTME: Per-page cost estimators for the cloud engines
//! ABOUTME: Public page pricing; local engines have no declared pricing function

use ocrflow_core::EngineKind;

/// Estimated cost in cents for `page_count` pages on `engine`.
///
/// Cloud prices are the published per-1000-page rates for the default
/// feature set each driver requests (layout/tables/forms where the
/// provider bills per feature). Local engines return `None`.
#[must_use]
pub fn estimate_cents(engine: EngineKind, page_count: u64) -> Option<f64> {
    let per_page_cents = match engine {
        // Document Intelligence prebuilt-layout: $10 / 1,000 pages.
        EngineKind::Azure => 1.0,
        // Document AI document OCR processor: $1.50 / 1,000 pages.
        EngineKind::Google => 0.15,
        // Textract AnalyzeDocument with tables + forms: $65 / 1,000 pages.
        EngineKind::Textract => 6.5,
        // Mistral OCR: $1 / 1,000 pages.
        EngineKind::Mistral => 0.1,
        EngineKind::Tesseract | EngineKind::Paddle => return None,
    };
    Some(per_page_cents * page_count as f64)
}
