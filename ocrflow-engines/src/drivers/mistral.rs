//! ABOUTME: Mistral Document AI driver over the /v1/ocr endpoint
//! ABOUTME: Submits data-URL payloads and maps per-page markdown into the canonical result

use async_trait::async_trait;
use base64::Engine as _;
use std::path::Path;
use std::time::Instant;
use tracing::debug;

use ocrflow_config::{EngineConfig, RetryPolicy};
use ocrflow_core::{
    AnalyzeFeature, EngineHealth, EngineKind, OcrEngine, OcrFlowError, OcrResult, Result,
};

use crate::cost::estimate_cents;
use crate::preprocess::{preprocess, PreprocessedDocument};
use crate::retry::retry_with_policy;

use super::{guess_mime, param_or_env, read_document_bytes};

const DEFAULT_BASE_URL: &str = "https://api.mistral.ai";
const DEFAULT_MODEL: &str = "mistral-ocr-latest";

/// Mistral reports no per-word confidence; results that parse cleanly get
/// this nominal score, matching how the upstream service is treated.
const NOMINAL_CONFIDENCE: f64 = 0.8;

const SUPPORTED_FEATURES: &[AnalyzeFeature] = &[AnalyzeFeature::Tables, AnalyzeFeature::Layout];

/// Mistral Document AI driver.
///
/// Required configuration: an API key (`api_key` param or
/// `MISTRAL_API_KEY`).
#[derive(Debug)]
pub struct MistralDocumentAi {
    client: reqwest::Client,
    config: EngineConfig,
    retry_policy: RetryPolicy,
    base_url: String,
    api_key: String,
    model: String,
}

impl MistralDocumentAi {
    pub fn new(
        client: reqwest::Client,
        config: EngineConfig,
        retry_policy: RetryPolicy,
    ) -> Result<Self> {
        let api_key = param_or_env(&config, "api_key", "MISTRAL_API_KEY").ok_or_else(|| {
            OcrFlowError::configuration(
                "Mistral Document AI requires an API key (param 'api_key' or MISTRAL_API_KEY)",
            )
        })?;
        let base_url = config
            .param_str("base_url")
            .unwrap_or(DEFAULT_BASE_URL)
            .trim_end_matches('/')
            .to_string();
        let model = config
            .param_str("model")
            .unwrap_or(DEFAULT_MODEL)
            .to_string();

        Ok(Self {
            client,
            config,
            retry_policy,
            base_url,
            api_key,
            model,
        })
    }

    async fn submit(&self, payload: &serde_json::Value) -> Result<serde_json::Value> {
        let url = format!("{}/v1/ocr", self.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(payload)
            .send()
            .await
            .map_err(|e| {
                OcrFlowError::transient("mistral ocr request failed", "mistral").with_source(e)
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let snippet: String = body.chars().take(200).collect();
            let message = format!("mistral returned {status}: {snippet}");
            return Err(match status.as_u16() {
                401 | 403 => OcrFlowError::permanent(message, "mistral"),
                400 | 404 | 422 => OcrFlowError::permanent(message, "mistral"),
                408 | 429 => OcrFlowError::transient(message, "mistral"),
                _ if status.is_server_error() => OcrFlowError::transient(message, "mistral"),
                _ => OcrFlowError::permanent(message, "mistral"),
            });
        }

        response.json().await.map_err(|e| {
            OcrFlowError::transient("mistral response body not json", "mistral").with_source(e)
        })
    }

    fn to_canonical(&self, body: serde_json::Value, elapsed: std::time::Duration) -> OcrResult {
        let empty = Vec::new();
        let pages = body.get("pages").and_then(|p| p.as_array()).unwrap_or(&empty);

        let mut text = String::new();
        for page in pages {
            if let Some(markdown) = page.get("markdown").and_then(|m| m.as_str()) {
                if !text.is_empty() {
                    text.push('\n');
                }
                text.push_str(markdown);
            }
        }

        let page_count = body
            .pointer("/usage_info/pages_processed")
            .and_then(|p| p.as_u64())
            .unwrap_or(pages.len() as u64)
            .max(1);

        let table_count = count_markdown_tables(&text);
        let confidence = if text.trim().is_empty() {
            0.0
        } else {
            NOMINAL_CONFIDENCE
        };

        let mut result = OcrResult::new(
            EngineKind::Mistral,
            self.config.display_name.clone(),
            text,
            confidence,
            page_count,
            elapsed,
        )
        .with_raw_response(body);
        // Markdown tables are counted, not structurally extracted.
        result.table_count = table_count;
        result
    }
}

/// Count markdown table blocks: runs of consecutive `|`-prefixed lines
/// containing a separator row.
fn count_markdown_tables(markdown: &str) -> u64 {
    let mut tables = 0;
    let mut in_block = false;
    let mut block_has_separator = false;

    for line in markdown.lines().map(str::trim) {
        let is_table_line = line.starts_with('|') && line.len() > 1;
        if is_table_line {
            if !in_block {
                in_block = true;
                block_has_separator = false;
            }
            if line
                .chars()
                .all(|c| matches!(c, '|' | '-' | ':' | ' '))
                && line.contains('-')
            {
                block_has_separator = true;
            }
        } else if in_block {
            if block_has_separator {
                tables += 1;
            }
            in_block = false;
        }
    }
    if in_block && block_has_separator {
        tables += 1;
    }
    tables
}

#[async_trait]
impl OcrEngine for MistralDocumentAi {
    fn kind(&self) -> EngineKind {
        EngineKind::Mistral
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

        let bytes = read_document_bytes(prepared.path(), "mistral").await?;
        let mime = guess_mime(prepared.path());
        debug!(bytes = bytes.len(), mime, "submitting document to mistral");

        let data_url = format!(
            "data:{mime};base64,{}",
            base64::engine::general_purpose::STANDARD.encode(&bytes)
        );
        let document = if mime.starts_with("image/") {
            serde_json::json!({"type": "image_url", "image_url": data_url})
        } else {
            serde_json::json!({"type": "document_url", "document_url": data_url})
        };
        let payload = serde_json::json!({
            "model": self.model,
            "document": document,
        });

        let body = retry_with_policy(
            &self.retry_policy,
            self.config.timeout(),
            "mistral.ocr",
            |_| self.submit(&payload),
        )
        .await?;

        Ok(self.to_canonical(body, started.elapsed()))
    }

    async fn health_check(&self) -> EngineHealth {
        let url = format!("{}/v1/models", self.base_url);
        match self.client.get(&url).bearer_auth(&self.api_key).send().await {
            Ok(response) if response.status().is_success() => {
                EngineHealth::healthy().with_detail("model", &self.model)
            }
            Ok(response) => {
                EngineHealth::unhealthy(format!("mistral api returned {}", response.status()))
            }
            Err(e) => EngineHealth::unhealthy(format!("mistral api unreachable: {e}")),
        }
    }

    fn estimate_cost(&self, page_count: u64) -> Option<f64> {
        estimate_cents(EngineKind::Mistral, page_count)
    }
}
