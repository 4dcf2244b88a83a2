//! ABOUTME: Canonical OCR result produced by every driver
//! ABOUTME: Engine tag, timing, metrics, extracted content, and raw-response pointer

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use super::EngineKind;

/// One cell of an extracted table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableCell {
    pub row: u32,
    pub column: u32,
    pub text: String,
    /// Cell-level confidence in [0,1], when the provider reports one.
    pub confidence: Option<f64>,
}

/// An extracted table with its cells.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OcrTable {
    pub row_count: u32,
    pub column_count: u32,
    pub cells: Vec<TableCell>,
}

/// An extracted key-value pair (form field).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyValuePair {
    pub key: String,
    pub value: String,
    pub key_confidence: Option<f64>,
    pub value_confidence: Option<f64>,
}

/// Canonical OCR result. Constructed once by a driver and never mutated
/// after return.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrResult {
    /// Driver family that produced this result.
    pub engine_kind: EngineKind,
    /// Human-readable engine name.
    pub engine_name: String,

    /// Wall-clock time the driver spent processing.
    #[serde(with = "super::duration_ms")]
    pub processing_time: Duration,
    /// When processing completed.
    pub processed_at: DateTime<Utc>,

    /// Overall confidence in [0,1] (normalized if reported as a percent).
    pub confidence: f64,
    /// Total words extracted.
    pub word_count: u64,
    /// Pages processed.
    pub page_count: u64,
    /// Tables detected.
    pub table_count: u64,

    /// Full concatenated text content.
    pub text: String,
    /// Extracted tables.
    pub tables: Vec<OcrTable>,
    /// Extracted key-value pairs.
    pub key_value_pairs: Vec<KeyValuePair>,
    /// Detected document language, when reported.
    pub language_detected: Option<String>,

    /// Raw provider response, persisted verbatim by the run store.
    #[serde(skip_serializing_if = "serde_json::Value::is_null", default)]
    pub raw_response: serde_json::Value,
    /// Blob-store pointer set by the run store after persistence.
    pub raw_response_path: Option<String>,

    /// Diagnostic quality metrics (text length, average word length, ...).
    pub quality_metrics: HashMap<String, serde_json::Value>,
}

impl OcrResult {
    /// Build a result with content-derived metrics filled in. The driver
    /// supplies the provider-reported confidence (percent or fraction) and
    /// the raw response; derived diagnostics are computed here.
    pub fn new(
        engine_kind: EngineKind,
        engine_name: impl Into<String>,
        text: String,
        confidence: f64,
        page_count: u64,
        processing_time: Duration,
    ) -> Self {
        let word_count = text.split_whitespace().count() as u64;
        let mut result = Self {
            engine_kind,
            engine_name: engine_name.into(),
            processing_time,
            processed_at: Utc::now(),
            confidence: normalize_confidence(confidence),
            word_count,
            page_count,
            table_count: 0,
            text,
            tables: Vec::new(),
            key_value_pairs: Vec::new(),
            language_detected: None,
            raw_response: serde_json::Value::Null,
            raw_response_path: None,
            quality_metrics: HashMap::new(),
        };
        result.recompute_quality_metrics();
        result
    }

    /// Attach extracted tables, updating `table_count`.
    #[must_use]
    pub fn with_tables(mut self, tables: Vec<OcrTable>) -> Self {
        self.table_count = tables.len() as u64;
        self.tables = tables;
        self.recompute_quality_metrics();
        self
    }

    /// Attach extracted key-value pairs.
    #[must_use]
    pub fn with_key_value_pairs(mut self, pairs: Vec<KeyValuePair>) -> Self {
        self.key_value_pairs = pairs;
        self
    }

    /// Attach the detected language.
    #[must_use]
    pub fn with_language(mut self, language: Option<String>) -> Self {
        self.language_detected = language;
        self
    }

    /// Attach the raw provider response.
    #[must_use]
    pub fn with_raw_response(mut self, raw: serde_json::Value) -> Self {
        self.raw_response = raw;
        self
    }

    /// Recompute the derived diagnostic metrics from current content.
    fn recompute_quality_metrics(&mut self) {
        let text_length = self.text.len() as u64;
        let average_word_length = if self.word_count > 0 {
            text_length as f64 / self.word_count as f64
        } else {
            0.0
        };
        self.quality_metrics
            .insert("confidence".into(), self.confidence.into());
        self.quality_metrics
            .insert("word_count".into(), self.word_count.into());
        self.quality_metrics
            .insert("page_count".into(), self.page_count.into());
        self.quality_metrics
            .insert("table_count".into(), self.table_count.into());
        self.quality_metrics
            .insert("text_length".into(), text_length.into());
        self.quality_metrics
            .insert("average_word_length".into(), average_word_length.into());
    }
}

/// Normalize a provider-reported confidence into [0,1]. Values above 1
/// are treated as percentages.
#[must_use]
pub fn normalize_confidence(confidence: f64) -> f64 {
    let value = if confidence > 1.0 {
        confidence / 100.0
    } else {
        confidence
    };
    value.clamp(0.0, 1.0)
}
