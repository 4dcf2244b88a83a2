//! ABOUTME: Google Document AI driver over the processor :process REST endpoint
//! ABOUTME: Resolves text anchors into document text for tables and form fields

use async_trait::async_trait;
use base64::Engine as _;
use std::path::Path;
use std::time::Instant;
use tracing::debug;

use ocrflow_config::{EngineConfig, RetryPolicy};
use ocrflow_core::{
    AnalyzeFeature, EngineHealth, EngineKind, KeyValuePair, OcrEngine, OcrFlowError, OcrResult,
    OcrTable, Result, TableCell,
};

use crate::cost::estimate_cents;
use crate::preprocess::{preprocess, PreprocessedDocument};
use crate::retry::retry_with_policy;

use super::{guess_mime, param_or_env, read_document_bytes};

const SUPPORTED_FEATURES: &[AnalyzeFeature] = &[
    AnalyzeFeature::Tables,
    AnalyzeFeature::Forms,
    AnalyzeFeature::Layout,
    AnalyzeFeature::Languages,
];

/// Google Document AI driver.
///
/// Required configuration: the full processor endpoint
/// (`processor_endpoint` param or `GOOGLE_DOCUMENT_AI_ENDPOINT`, e.g.
/// `https://us-documentai.googleapis.com/v1/projects/p/locations/us/processors/x`)
/// and an OAuth access token (`access_token` param or
/// `GOOGLE_DOCUMENT_AI_ACCESS_TOKEN`). Token refresh belongs to the
/// deployment platform, not the driver.
#[derive(Debug)]
pub struct GoogleDocumentAi {
    client: reqwest::Client,
    config: EngineConfig,
    retry_policy: RetryPolicy,
    processor_endpoint: String,
    access_token: String,
}

impl GoogleDocumentAi {
    pub fn new(
        client: reqwest::Client,
        config: EngineConfig,
        retry_policy: RetryPolicy,
    ) -> Result<Self> {
        let processor_endpoint =
            param_or_env(&config, "processor_endpoint", "GOOGLE_DOCUMENT_AI_ENDPOINT")
                .ok_or_else(|| {
                    OcrFlowError::configuration(
                        "Google Document AI requires a processor endpoint (param 'processor_endpoint' or GOOGLE_DOCUMENT_AI_ENDPOINT)",
                    )
                })?;
        let access_token = param_or_env(&config, "access_token", "GOOGLE_DOCUMENT_AI_ACCESS_TOKEN")
            .ok_or_else(|| {
                OcrFlowError::configuration(
                    "Google Document AI requires an access token (param 'access_token' or GOOGLE_DOCUMENT_AI_ACCESS_TOKEN)",
                )
            })?;

        Ok(Self {
            client,
            config,
            retry_policy,
            processor_endpoint: processor_endpoint.trim_end_matches('/').to_string(),
            access_token,
        })
    }

    async fn process(&self, payload: &serde_json::Value) -> Result<serde_json::Value> {
        let url = format!("{}:process", self.processor_endpoint);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.access_token)
            .json(payload)
            .send()
            .await
            .map_err(|e| {
                OcrFlowError::transient("google process request failed", "google").with_source(e)
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let snippet: String = body.chars().take(200).collect();
            let message = format!("google returned {status}: {snippet}");
            return Err(match status.as_u16() {
                401 | 403 => OcrFlowError::permanent(message, "google"),
                400 | 404 => OcrFlowError::permanent(message, "google"),
                408 | 429 => OcrFlowError::transient(message, "google"),
                _ if status.is_server_error() => OcrFlowError::transient(message, "google"),
                _ => OcrFlowError::permanent(message, "google"),
            });
        }

        response.json().await.map_err(|e| {
            OcrFlowError::transient("google response body not json", "google").with_source(e)
        })
    }

    fn to_canonical(&self, body: serde_json::Value, elapsed: std::time::Duration) -> OcrResult {
        let document = body.get("document").cloned().unwrap_or_default();
        let text = document
            .get("text")
            .and_then(|t| t.as_str())
            .unwrap_or_default()
            .to_string();

        let empty = Vec::new();
        let pages = document
            .get("pages")
            .and_then(|p| p.as_array())
            .unwrap_or(&empty);

        let mut page_confidences = Vec::new();
        let mut tables = Vec::new();
        let mut key_value_pairs = Vec::new();
        let mut language: Option<String> = None;

        for page in pages {
            if let Some(confidence) = page.pointer("/layout/confidence").and_then(|c| c.as_f64()) {
                page_confidences.push(confidence);
            }
            if language.is_none() {
                language = page
                    .pointer("/detectedLanguages/0/languageCode")
                    .and_then(|l| l.as_str())
                    .map(str::to_string);
            }

            for table in page.get("tables").and_then(|t| t.as_array()).unwrap_or(&empty) {
                tables.push(parse_table(table, &text));
            }

            for field in page
                .get("formFields")
                .and_then(|f| f.as_array())
                .unwrap_or(&empty)
            {
                let key = anchor_text(&text, field.pointer("/fieldName/textAnchor"));
                let value = anchor_text(&text, field.pointer("/fieldValue/textAnchor"));
                if key.is_empty() {
                    continue;
                }
                key_value_pairs.push(KeyValuePair {
                    key,
                    value,
                    key_confidence: field
                        .pointer("/fieldName/confidence")
                        .and_then(|c| c.as_f64()),
                    value_confidence: field
                        .pointer("/fieldValue/confidence")
                        .and_then(|c| c.as_f64()),
                });
            }
        }

        let confidence = if page_confidences.is_empty() {
            0.0
        } else {
            page_confidences.iter().sum::<f64>() / page_confidences.len() as f64
        };

        OcrResult::new(
            EngineKind::Google,
            self.config.display_name.clone(),
            text,
            confidence,
            pages.len().max(1) as u64,
            elapsed,
        )
        .with_tables(tables)
        .with_key_value_pairs(key_value_pairs)
        .with_language(language)
        .with_raw_response(body)
    }
}

/// Resolve a Document AI text anchor against the full document text.
/// Anchors are UTF-8 byte ranges; out-of-range segments resolve empty.
fn anchor_text(document_text: &str, anchor: Option<&serde_json::Value>) -> String {
    let Some(anchor) = anchor else {
        return String::new();
    };
    let empty = Vec::new();
    let segments = anchor
        .get("textSegments")
        .and_then(|s| s.as_array())
        .unwrap_or(&empty);
    let mut out = String::new();
    for segment in segments {
        // startIndex is omitted when zero.
        let start = segment
            .get("startIndex")
            .and_then(index_as_usize)
            .unwrap_or(0);
        let Some(end) = segment.get("endIndex").and_then(index_as_usize) else {
            continue;
        };
        if let Some(slice) = document_text.get(start..end) {
            out.push_str(slice);
        }
    }
    out.trim().to_string()
}

/// Indexes arrive as JSON numbers or decimal strings depending on codec.
fn index_as_usize(value: &serde_json::Value) -> Option<usize> {
    value
        .as_u64()
        .or_else(|| value.as_str().and_then(|s| s.parse().ok()))
        .map(|v| v as usize)
}

fn parse_table(table: &serde_json::Value, document_text: &str) -> OcrTable {
    let empty = Vec::new();
    let mut cells = Vec::new();
    let mut row_index: u32 = 0;
    let mut column_count: u32 = 0;

    for rows_key in ["headerRows", "bodyRows"] {
        for row in table.get(rows_key).and_then(|r| r.as_array()).unwrap_or(&empty) {
            let row_cells = row.get("cells").and_then(|c| c.as_array()).unwrap_or(&empty);
            column_count = column_count.max(row_cells.len() as u32);
            for (column, cell) in row_cells.iter().enumerate() {
                cells.push(TableCell {
                    row: row_index,
                    column: column as u32,
                    text: anchor_text(document_text, cell.pointer("/layout/textAnchor")),
                    confidence: cell.pointer("/layout/confidence").and_then(|c| c.as_f64()),
                });
            }
            row_index += 1;
        }
    }

    OcrTable {
        row_count: row_index,
        column_count,
        cells,
    }
}

#[async_trait]
impl OcrEngine for GoogleDocumentAi {
    fn kind(&self) -> EngineKind {
        EngineKind::Google
    }

    fn name(&self) -> &str {
        &self.config.display_name
    }

    fn supported_features(&self) -> &[AnalyzeFeature] {
        SUPPORTED_FEATURES
    }

    async fn analyze(
        &self,
        document_path: &Path,
        _features: &[AnalyzeFeature],
    ) -> Result<OcrResult> {
        let started = Instant::now();

        let prepared = if self.config.preprocess_enabled {
            preprocess(document_path, &self.config.preprocess).await?
        } else {
            PreprocessedDocument::passthrough_for(document_path)
        };

        let bytes = read_document_bytes(prepared.path(), "google").await?;
        debug!(bytes = bytes.len(), "submitting document to google");
        let payload = serde_json::json!({
            "rawDocument": {
                "content": base64::engine::general_purpose::STANDARD.encode(&bytes),
                "mimeType": guess_mime(prepared.path()),
            },
        });

        let body = retry_with_policy(
            &self.retry_policy,
            self.config.timeout(),
            "google.process",
            |_| self.process(&payload),
        )
        .await?;

        Ok(self.to_canonical(body, started.elapsed()))
    }

    async fn health_check(&self) -> EngineHealth {
        // The processor metadata endpoint answers a bare GET when the
        // endpoint and token are valid.
        match self
            .client
            .get(&self.processor_endpoint)
            .bearer_auth(&self.access_token)
            .send()
            .await
        {
            Ok(response) if response.status().is_success() => {
                EngineHealth::healthy().with_detail("processor", &self.processor_endpoint)
            }
            Ok(response) => {
                EngineHealth::unhealthy(format!("google processor returned {}", response.status()))
            }
            Err(e) => EngineHealth::unhealthy(format!("google processor unreachable: {e}")),
        }
    }

    fn estimate_cost(&self, page_count: u64) -> Option<f64> {
        estimate_cents(EngineKind::Google, page_count)
    }
}
