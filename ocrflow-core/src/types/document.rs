//! ABOUTME: Document record as seen by the orchestrator
//! ABOUTME: The orchestrator reads identity fields and writes the canonical-text fields

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A persisted document. The orchestrator does not own documents; it
/// reads `storage_path`/`mime_type`/`page_count` and, once a winning run
/// exists, writes the extracted-text fields in a single transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: i64,
    /// Pointer into the blob store.
    pub storage_path: String,
    pub mime_type: String,
    /// May be learned during processing.
    pub page_count: Option<i64>,

    // Written when a winning run exists.
    pub extracted_text: Option<String>,
    pub selected_engine: Option<String>,
    pub selected_run_id: Option<i64>,
    pub last_ocr_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
}

impl Document {
    /// Whether the document payload is a PDF (preprocessing is image-only).
    #[must_use]
    pub fn is_pdf(&self) -> bool {
        self.mime_type.eq_ignore_ascii_case("application/pdf")
            || self.storage_path.to_ascii_lowercase().ends_with(".pdf")
    }
}
