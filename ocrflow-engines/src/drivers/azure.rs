//! ABOUTME: Azure Document Intelligence driver over the REST analyze/poll API
//! ABOUTME: Submits base64 payloads, polls the operation location, maps analyzeResult

use async_trait::async_trait;
use base64::Engine as _;
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use ocrflow_config::{EngineConfig, RetryPolicy};
use ocrflow_core::{
    AnalyzeFeature, EngineHealth, EngineKind, KeyValuePair, OcrEngine, OcrFlowError, OcrResult,
    OcrTable, Result, TableCell,
};

use crate::cost::estimate_cents;
use crate::preprocess::preprocess;
use crate::retry::retry_with_policy;

use super::{guess_mime, param_or_env, read_document_bytes};

const DEFAULT_API_VERSION: &str = "2024-02-29-preview";
const DEFAULT_MODEL_ID: &str = "prebuilt-layout";
const POLL_INTERVAL: Duration = Duration::from_secs(2);

const SUPPORTED_FEATURES: &[AnalyzeFeature] = &[
    AnalyzeFeature::Tables,
    AnalyzeFeature::Forms,
    AnalyzeFeature::Layout,
    AnalyzeFeature::Languages,
];

/// Azure Document Intelligence driver.
///
/// Required configuration: an endpoint (`endpoint` param or
/// `AZURE_AI_ENDPOINT`) and a key (`api_key` param or `AZURE_AI_KEY`).
#[derive(Debug)]
pub struct AzureDocumentIntelligence {
    client: reqwest::Client,
    config: EngineConfig,
    retry_policy: RetryPolicy,
    endpoint: String,
    api_key: String,
    model_id: String,
    api_version: String,
}

impl AzureDocumentIntelligence {
    pub fn new(
        client: reqwest::Client,
        config: EngineConfig,
        retry_policy: RetryPolicy,
    ) -> Result<Self> {
        let endpoint = param_or_env(&config, "endpoint", "AZURE_AI_ENDPOINT").ok_or_else(|| {
            OcrFlowError::configuration(
                "Azure Document Intelligence requires an endpoint (param 'endpoint' or AZURE_AI_ENDPOINT)",
            )
        })?;
        let api_key = param_or_env(&config, "api_key", "AZURE_AI_KEY").ok_or_else(|| {
            OcrFlowError::configuration(
                "Azure Document Intelligence requires a key (param 'api_key' or AZURE_AI_KEY)",
            )
        })?;
        let model_id = config
            .param_str("model_id")
            .unwrap_or(DEFAULT_MODEL_ID)
            .to_string();
        let api_version = config
            .param_str("api_version")
            .unwrap_or(DEFAULT_API_VERSION)
            .to_string();

        Ok(Self {
            client,
            config,
            retry_policy,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            api_key,
            model_id,
            api_version,
        })
    }

    fn analyze_url(&self) -> String {
        format!(
            "{}/documentintelligence/documentModels/{}:analyze?api-version={}",
            self.endpoint, self.model_id, self.api_version
        )
    }

    /// Submit the payload and return the operation-location to poll.
    async fn submit(&self, payload: &serde_json::Value) -> Result<String> {
        let response = self
            .client
            .post(self.analyze_url())
            .header("Ocp-Apim-Subscription-Key", &self.api_key)
            .json(payload)
            .send()
            .await
            .map_err(|e| {
                OcrFlowError::transient("azure analyze request failed", "azure").with_source(e)
            })?;

        let status = response.status();
        if !(status.is_success() || status.as_u16() == 202) {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_http_failure(status, &body));
        }

        response
            .headers()
            .get("operation-location")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| {
                OcrFlowError::transient("azure response missing operation-location", "azure")
            })
    }

    /// Poll the analyze operation until it succeeds or fails. The overall
    /// driver timeout bounds this loop.
    async fn poll(&self, operation_url: &str, deadline: Instant) -> Result<serde_json::Value> {
        loop {
            let response = self
                .client
                .get(operation_url)
                .header("Ocp-Apim-Subscription-Key", &self.api_key)
                .send()
                .await
                .map_err(|e| {
                    OcrFlowError::transient("azure poll request failed", "azure").with_source(e)
                })?;

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(classify_http_failure(status, &body));
            }

            let body: serde_json::Value = response.json().await.map_err(|e| {
                OcrFlowError::transient("azure poll body not json", "azure").with_source(e)
            })?;

            match body.get("status").and_then(|s| s.as_str()) {
                Some("succeeded") => return Ok(body),
                Some("failed") => {
                    let detail = body
                        .pointer("/error/message")
                        .and_then(|m| m.as_str())
                        .unwrap_or("analyze operation failed");
                    return Err(OcrFlowError::permanent(
                        format!("azure analysis failed: {detail}"),
                        "azure",
                    ));
                }
                _ => {
                    if Instant::now() + POLL_INTERVAL >= deadline {
                        return Err(OcrFlowError::transient(
                            "azure analysis did not finish within the engine timeout",
                            "azure",
                        ));
                    }
                    tokio::time::sleep(POLL_INTERVAL).await;
                }
            }
        }
    }

    fn to_canonical(&self, body: serde_json::Value, elapsed: Duration) -> OcrResult {
        let analyze = body.get("analyzeResult").cloned().unwrap_or_default();

        let text = analyze
            .get("content")
            .and_then(|c| c.as_str())
            .unwrap_or_default()
            .to_string();

        let empty = Vec::new();
        let pages = analyze
            .get("pages")
            .and_then(|p| p.as_array())
            .unwrap_or(&empty);
        let mut confidences = Vec::new();
        for page in pages {
            for word in page.get("words").and_then(|w| w.as_array()).unwrap_or(&empty) {
                if let Some(confidence) = word.get("confidence").and_then(|c| c.as_f64()) {
                    confidences.push(confidence);
                }
            }
        }
        let confidence = if confidences.is_empty() {
            0.0
        } else {
            confidences.iter().sum::<f64>() / confidences.len() as f64
        };

        let tables = analyze
            .get("tables")
            .and_then(|t| t.as_array())
            .unwrap_or(&empty)
            .iter()
            .map(|table| OcrTable {
                row_count: table.get("rowCount").and_then(|v| v.as_u64()).unwrap_or(0) as u32,
                column_count: table
                    .get("columnCount")
                    .and_then(|v| v.as_u64())
                    .unwrap_or(0) as u32,
                cells: table
                    .get("cells")
                    .and_then(|c| c.as_array())
                    .unwrap_or(&empty)
                    .iter()
                    .map(|cell| TableCell {
                        row: cell.get("rowIndex").and_then(|v| v.as_u64()).unwrap_or(0) as u32,
                        column: cell
                            .get("columnIndex")
                            .and_then(|v| v.as_u64())
                            .unwrap_or(0) as u32,
                        text: cell
                            .get("content")
                            .and_then(|v| v.as_str())
                            .unwrap_or_default()
                            .to_string(),
                        confidence: cell.get("confidence").and_then(|v| v.as_f64()),
                    })
                    .collect(),
            })
            .collect::<Vec<_>>();

        let key_value_pairs = analyze
            .get("keyValuePairs")
            .and_then(|k| k.as_array())
            .unwrap_or(&empty)
            .iter()
            .filter_map(|pair| {
                let key = pair.pointer("/key/content")?.as_str()?.to_string();
                let value = pair
                    .pointer("/value/content")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string();
                let confidence = pair.get("confidence").and_then(|v| v.as_f64());
                Some(KeyValuePair {
                    key,
                    value,
                    key_confidence: confidence,
                    value_confidence: confidence,
                })
            })
            .collect::<Vec<_>>();

        let language = analyze
            .pointer("/languages/0/locale")
            .and_then(|l| l.as_str())
            .map(str::to_string);

        OcrResult::new(
            EngineKind::Azure,
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

fn classify_http_failure(status: reqwest::StatusCode, body: &str) -> OcrFlowError {
    let snippet: String = body.chars().take(200).collect();
    let message = format!("azure returned {status}: {snippet}");
    match status.as_u16() {
        401 | 403 => OcrFlowError::permanent(message, "azure"),
        400 | 404 | 415 | 422 => OcrFlowError::permanent(message, "azure"),
        408 | 429 => OcrFlowError::transient(message, "azure"),
        _ if status.is_server_error() => OcrFlowError::transient(message, "azure"),
        _ => OcrFlowError::permanent(message, "azure"),
    }
}

#[async_trait]
impl OcrEngine for AzureDocumentIntelligence {
    fn kind(&self) -> EngineKind {
        EngineKind::Azure
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
        let deadline = started + self.config.timeout();

        let prepared = if self.config.preprocess_enabled {
            preprocess(document_path, &self.config.preprocess).await?
        } else {
            crate::preprocess::PreprocessedDocument::passthrough_for(document_path)
        };

        let bytes = read_document_bytes(prepared.path(), "azure").await?;
        debug!(
            bytes = bytes.len(),
            mime = guess_mime(prepared.path()),
            "submitting document to azure"
        );
        let payload = serde_json::json!({
            "base64Source": base64::engine::general_purpose::STANDARD.encode(&bytes),
        });

        let operation_url = retry_with_policy(
            &self.retry_policy,
            self.config.timeout(),
            "azure.submit",
            |_| self.submit(&payload),
        )
        .await?;

        let body = self.poll(&operation_url, deadline).await?;
        Ok(self.to_canonical(body, started.elapsed()))
    }

    async fn health_check(&self) -> EngineHealth {
        let url = format!(
            "{}/documentintelligence/info?api-version={}",
            self.endpoint, self.api_version
        );
        match self
            .client
            .get(&url)
            .header("Ocp-Apim-Subscription-Key", &self.api_key)
            .send()
            .await
        {
            Ok(response) if response.status().is_success() => EngineHealth::healthy()
                .with_detail("endpoint", &self.endpoint)
                .with_detail("model", &self.model_id),
            Ok(response) => {
                warn!(status = %response.status(), "azure health probe rejected");
                EngineHealth::unhealthy(format!("azure endpoint returned {}", response.status()))
            }
            Err(e) => EngineHealth::unhealthy(format!("azure endpoint unreachable: {e}")),
        }
    }

    fn estimate_cost(&self, page_count: u64) -> Option<f64> {
        estimate_cents(EngineKind::Azure, page_count)
    }
}
