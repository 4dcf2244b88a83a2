//! ABOUTME: AWS Textract driver with synchronous and asynchronous analysis paths
//! ABOUTME: Large files are staged in a scratch S3 bucket and polled to completion

use async_trait::async_trait;
use aws_credential_types::provider::ProvideCredentials;
use aws_sdk_textract::error::{ProvideErrorMetadata, SdkError};
use aws_sdk_textract::primitives::Blob;
use aws_sdk_textract::types::{
    Block, BlockType, Document, DocumentLocation, EntityType, FeatureType, JobStatus,
    RelationshipType, S3Object,
};
use std::collections::HashMap;
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use uuid::Uuid;

use ocrflow_config::{EngineConfig, RetryPolicy};
use ocrflow_core::{
    AnalyzeFeature, EngineHealth, EngineKind, ErrorCategory, KeyValuePair, OcrEngine, OcrFlowError,
    OcrResult, OcrTable, Result, TableCell,
};

use crate::cost::estimate_cents;
use crate::preprocess::{preprocess, PreprocessedDocument};
use crate::retry::retry_with_policy;

use super::read_document_bytes;

/// Payloads above this size go through the asynchronous S3 path.
const MAX_SYNC_BYTES: u64 = 5 * 1024 * 1024;
const POLL_INTERVAL: Duration = Duration::from_secs(3);
const DEFAULT_S3_PREFIX: &str = "textract/";

const SUPPORTED_FEATURES: &[AnalyzeFeature] = &[
    AnalyzeFeature::Tables,
    AnalyzeFeature::Forms,
    AnalyzeFeature::Layout,
    AnalyzeFeature::Queries,
    AnalyzeFeature::Signatures,
];

/// AWS Textract driver.
///
/// Credentials come from the ambient AWS configuration chain. The async
/// path additionally needs a scratch bucket (`s3_bucket` param or
/// `TEXTRACT_S3_BUCKET`).
pub struct TextractEngine {
    textract: aws_sdk_textract::Client,
    s3: aws_sdk_s3::Client,
    sdk_config: aws_config::SdkConfig,
    config: EngineConfig,
    retry_policy: RetryPolicy,
    scratch_bucket: Option<String>,
    scratch_prefix: String,
}

impl TextractEngine {
    pub fn new(
        sdk_config: &aws_config::SdkConfig,
        config: EngineConfig,
        retry_policy: RetryPolicy,
    ) -> Self {
        let scratch_bucket = super::param_or_env(&config, "s3_bucket", "TEXTRACT_S3_BUCKET");
        let scratch_prefix = super::param_or_env(&config, "s3_prefix", "TEXTRACT_S3_PREFIX")
            .unwrap_or_else(|| DEFAULT_S3_PREFIX.to_string());

        Self {
            textract: aws_sdk_textract::Client::new(sdk_config),
            s3: aws_sdk_s3::Client::new(sdk_config),
            sdk_config: sdk_config.clone(),
            config,
            retry_policy,
            scratch_bucket,
            scratch_prefix,
        }
    }

    fn feature_types(features: &[AnalyzeFeature]) -> Vec<FeatureType> {
        let mut out: Vec<FeatureType> = features
            .iter()
            .filter_map(|feature| match feature {
                AnalyzeFeature::Tables => Some(FeatureType::Tables),
                AnalyzeFeature::Forms => Some(FeatureType::Forms),
                AnalyzeFeature::Layout => Some(FeatureType::Layout),
                AnalyzeFeature::Queries => Some(FeatureType::Queries),
                AnalyzeFeature::Signatures => Some(FeatureType::Signatures),
                AnalyzeFeature::Languages => None,
            })
            .collect();
        if out.is_empty() {
            out = vec![FeatureType::Tables, FeatureType::Forms];
        }
        out
    }

    /// Synchronous path: the payload travels inline.
    async fn analyze_sync(
        &self,
        bytes: Vec<u8>,
        features: Vec<FeatureType>,
    ) -> Result<Vec<Block>> {
        let document = Document::builder().bytes(Blob::new(bytes)).build();
        let output = self
            .textract
            .analyze_document()
            .document(document)
            .set_feature_types(Some(features))
            .send()
            .await
            .map_err(|e| classify_aws_error("textract", "analyze_document", &e))?;
        Ok(output.blocks().to_vec())
    }

    /// Asynchronous path: stage in the scratch bucket, start an analysis
    /// job, poll to completion, and clean up the staged object.
    async fn analyze_async(
        &self,
        input_path: &Path,
        bytes: Vec<u8>,
        features: Vec<FeatureType>,
        deadline: Instant,
    ) -> Result<Vec<Block>> {
        let bucket = self.scratch_bucket.clone().ok_or_else(|| {
            OcrFlowError::configuration(
                "Textract async path requires a scratch bucket (param 's3_bucket' or TEXTRACT_S3_BUCKET)",
            )
        })?;

        let file_name = input_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("document");
        let key = format!(
            "{}{}/{}",
            self.scratch_prefix,
            Uuid::new_v4(),
            file_name
        );

        self.s3
            .put_object()
            .bucket(&bucket)
            .key(&key)
            .body(aws_sdk_s3::primitives::ByteStream::from(bytes))
            .send()
            .await
            .map_err(|e| classify_aws_error("textract", "stage to s3", &e))?;
        debug!(bucket, key, "staged document for async textract analysis");

        let job = async {
            let location = DocumentLocation::builder()
                .s3_object(S3Object::builder().bucket(&bucket).name(&key).build())
                .build();
            let start = self
                .textract
                .start_document_analysis()
                .document_location(location)
                .set_feature_types(Some(features))
                .send()
                .await
                .map_err(|e| classify_aws_error("textract", "start_document_analysis", &e))?;
            let job_id = start.job_id().ok_or_else(|| {
                OcrFlowError::transient("textract did not return a job id", "textract")
            })?;
            self.poll_job(job_id, deadline).await
        }
        .await;

        // Best-effort cleanup of the staged object on every outcome.
        if let Err(e) = self.s3.delete_object().bucket(&bucket).key(&key).send().await {
            warn!(bucket, key, error = %DisplayAwsError(&e), "failed to delete staged textract object");
        }

        job
    }

    async fn poll_job(&self, job_id: &str, deadline: Instant) -> Result<Vec<Block>> {
        loop {
            let mut blocks = Vec::new();
            let mut next_token: Option<String> = None;
            let status = loop {
                let mut request = self.textract.get_document_analysis().job_id(job_id);
                if let Some(token) = &next_token {
                    request = request.next_token(token);
                }
                let output = request
                    .send()
                    .await
                    .map_err(|e| classify_aws_error("textract", "get_document_analysis", &e))?;

                let status = output.job_status().cloned();
                blocks.extend(output.blocks().iter().cloned());
                next_token = output.next_token().map(str::to_string);
                if next_token.is_none() {
                    break status;
                }
            };

            match status {
                Some(JobStatus::Succeeded | JobStatus::PartialSuccess) => return Ok(blocks),
                Some(JobStatus::Failed) => {
                    return Err(OcrFlowError::permanent(
                        format!("textract job {job_id} failed"),
                        "textract",
                    ))
                }
                _ => {
                    if Instant::now() + POLL_INTERVAL >= deadline {
                        return Err(OcrFlowError::transient(
                            "textract job did not finish within the engine timeout",
                            "textract",
                        ));
                    }
                    tokio::time::sleep(POLL_INTERVAL).await;
                }
            }
        }
    }

    fn to_canonical(&self, blocks: Vec<Block>, elapsed: Duration) -> OcrResult {
        let by_id: HashMap<&str, &Block> = blocks
            .iter()
            .filter_map(|b| b.id().map(|id| (id, b)))
            .collect();

        let mut page_count: u64 = 0;
        let mut lines = Vec::new();
        let mut word_confidences = Vec::new();
        let mut tables = Vec::new();
        let mut key_value_pairs = Vec::new();

        for block in &blocks {
            match block.block_type() {
                Some(BlockType::Page) => page_count += 1,
                Some(BlockType::Line) => {
                    if let Some(text) = block.text() {
                        lines.push(text.to_string());
                    }
                }
                Some(BlockType::Word) => {
                    if let Some(confidence) = block.confidence() {
                        word_confidences.push(f64::from(confidence));
                    }
                }
                Some(BlockType::Table) => {
                    tables.push(parse_table(block, &by_id));
                }
                Some(BlockType::KeyValueSet) => {
                    let is_key = block
                        .entity_types()
                        .iter()
                        .any(|e| *e == EntityType::Key);
                    if is_key {
                        if let Some(pair) = parse_key_value(block, &by_id) {
                            key_value_pairs.push(pair);
                        }
                    }
                }
                _ => {}
            }
        }

        // Textract reports percent confidences.
        let confidence = if word_confidences.is_empty() {
            0.0
        } else {
            word_confidences.iter().sum::<f64>() / word_confidences.len() as f64
        };

        let raw = serde_json::Value::Array(blocks.iter().map(block_to_json).collect());

        OcrResult::new(
            EngineKind::Textract,
            self.config.display_name.clone(),
            lines.join("\n"),
            confidence,
            page_count.max(1),
            elapsed,
        )
        .with_tables(tables)
        .with_key_value_pairs(key_value_pairs)
        .with_raw_response(raw)
    }
}

/// Collect child block ids for a relationship type.
fn related_ids<'a>(block: &'a Block, relation: RelationshipType) -> Vec<&'a str> {
    block
        .relationships()
        .iter()
        .filter(|r| r.r#type() == Some(&relation))
        .flat_map(|r| r.ids().iter().map(String::as_str))
        .collect()
}

/// Text of a block resolved through its child words.
fn child_text(block: &Block, by_id: &HashMap<&str, &Block>) -> String {
    let mut words = Vec::new();
    for id in related_ids(block, RelationshipType::Child) {
        if let Some(child) = by_id.get(id) {
            if child.block_type() == Some(&BlockType::Word) {
                if let Some(text) = child.text() {
                    words.push(text.to_string());
                }
            }
        }
    }
    words.join(" ")
}

fn parse_table(table: &Block, by_id: &HashMap<&str, &Block>) -> OcrTable {
    let mut cells = Vec::new();
    let mut row_count: u32 = 0;
    let mut column_count: u32 = 0;

    for id in related_ids(table, RelationshipType::Child) {
        let Some(cell) = by_id.get(id) else { continue };
        if cell.block_type() != Some(&BlockType::Cell) {
            continue;
        }
        let row = cell.row_index().unwrap_or(1).max(1) as u32;
        let column = cell.column_index().unwrap_or(1).max(1) as u32;
        row_count = row_count.max(row);
        column_count = column_count.max(column);
        cells.push(TableCell {
            row: row - 1,
            column: column - 1,
            text: child_text(cell, by_id),
            confidence: cell.confidence().map(|c| f64::from(c) / 100.0),
        });
    }

    OcrTable {
        row_count,
        column_count,
        cells,
    }
}

fn parse_key_value(key_block: &Block, by_id: &HashMap<&str, &Block>) -> Option<KeyValuePair> {
    let key = child_text(key_block, by_id);
    if key.is_empty() {
        return None;
    }
    let value = related_ids(key_block, RelationshipType::Value)
        .iter()
        .filter_map(|id| by_id.get(id))
        .map(|value_block| child_text(value_block, by_id))
        .collect::<Vec<_>>()
        .join(" ");

    Some(KeyValuePair {
        key,
        value: value.trim().to_string(),
        key_confidence: key_block.confidence().map(|c| f64::from(c) / 100.0),
        value_confidence: None,
    })
}

/// The raw-response payload: a compact JSON projection of each block.
fn block_to_json(block: &Block) -> serde_json::Value {
    serde_json::json!({
        "block_type": block.block_type().map(|b| b.as_str()),
        "id": block.id(),
        "text": block.text(),
        "confidence": block.confidence(),
        "page": block.page(),
        "row_index": block.row_index(),
        "column_index": block.column_index(),
        "entity_types": block.entity_types().iter().map(|e| e.as_str()).collect::<Vec<_>>(),
        "relationships": block.relationships().iter().map(|r| serde_json::json!({
            "type": r.r#type().map(|t| t.as_str()),
            "ids": r.ids(),
        })).collect::<Vec<_>>(),
    })
}

/// Map an AWS SDK failure onto an error category by its service code;
/// dispatch-level failures (connect, TLS, timeout) are transient.
fn classify_aws_error<E, R>(engine: &str, operation: &str, err: &SdkError<E, R>) -> OcrFlowError
where
    E: ProvideErrorMetadata,
{
    let code = err.code().unwrap_or_default().to_string();
    let message = err
        .message()
        .map(str::to_string)
        .unwrap_or_else(|| format!("{operation} dispatch failure"));
    let category = match code.as_str() {
        "" => ErrorCategory::Transient,
        "ThrottlingException"
        | "ProvisionedThroughputExceededException"
        | "InternalServerError"
        | "LimitExceededException"
        | "ServiceUnavailable"
        | "SlowDown" => ErrorCategory::Transient,
        "AccessDeniedException"
        | "UnrecognizedClientException"
        | "InvalidSignatureException"
        | "ExpiredTokenException"
        | "MissingAuthenticationToken" => ErrorCategory::Permanent,
        "InvalidParameterException"
        | "UnsupportedDocumentException"
        | "BadDocumentException"
        | "DocumentTooLargeException"
        | "InvalidS3ObjectException"
        | "NoSuchBucket" => ErrorCategory::Permanent,
        _ => ErrorCategory::Transient,
    };
    OcrFlowError::engine(
        format!("{operation} failed ({code}): {message}"),
        engine,
        category,
    )
}

/// Display helper for SDK errors outside the classification path.
struct DisplayAwsError<'a, E, R>(&'a SdkError<E, R>);

impl<E: ProvideErrorMetadata, R> std::fmt::Display for DisplayAwsError<'_, E, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}: {}",
            self.0.code().unwrap_or("dispatch"),
            self.0.message().unwrap_or("no message")
        )
    }
}

#[async_trait]
impl OcrEngine for TextractEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::Textract
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
        features: &[AnalyzeFeature],
    ) -> Result<OcrResult> {
        let started = Instant::now();
        let deadline = started + self.config.timeout();

        let prepared = if self.config.preprocess_enabled {
            preprocess(document_path, &self.config.preprocess).await?
        } else {
            PreprocessedDocument::passthrough_for(document_path)
        };

        let bytes = read_document_bytes(prepared.path(), "textract").await?;
        let feature_types = Self::feature_types(features);
        let use_async = bytes.len() as u64 > MAX_SYNC_BYTES;
        debug!(
            bytes = bytes.len(),
            use_async,
            features = feature_types.len(),
            "submitting document to textract"
        );

        let blocks = if use_async {
            self.analyze_async(prepared.path(), bytes, feature_types, deadline)
                .await?
        } else {
            retry_with_policy(
                &self.retry_policy,
                self.config.timeout(),
                "textract.analyze_document",
                |_| self.analyze_sync(bytes.clone(), feature_types.clone()),
            )
            .await?
        };

        Ok(self.to_canonical(blocks, started.elapsed()))
    }

    async fn health_check(&self) -> EngineHealth {
        let Some(provider) = self.sdk_config.credentials_provider() else {
            return EngineHealth::unhealthy("no AWS credentials provider configured");
        };
        match provider.provide_credentials().await {
            Ok(_) => {
                let mut health = EngineHealth::healthy();
                if let Some(region) = self.sdk_config.region() {
                    health = health.with_detail("region", region.to_string());
                }
                if let Some(bucket) = &self.scratch_bucket {
                    health = health.with_detail("scratch_bucket", bucket);
                }
                health
            }
            Err(e) => EngineHealth::unhealthy(format!("AWS credentials not resolvable: {e}")),
        }
    }

    fn estimate_cost(&self, page_count: u64) -> Option<f64> {
        estimate_cents(EngineKind::Textract, page_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aws_sdk_textract::types::Relationship;

    async fn driver() -> TextractEngine {
        let sdk_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_config::Region::new("us-east-1"))
            .load()
            .await;
        TextractEngine::new(
            &sdk_config,
            EngineConfig::new(EngineKind::Textract, "AWS Textract"),
            RetryPolicy::default(),
        )
    }

    fn word(id: &str, text: &str, confidence: f32) -> Block {
        Block::builder()
            .block_type(BlockType::Word)
            .id(id)
            .text(text)
            .confidence(confidence)
            .build()
    }

    fn child_rel(ids: &[&str]) -> Relationship {
        let mut builder = Relationship::builder().r#type(RelationshipType::Child);
        for id in ids {
            builder = builder.ids((*id).to_string());
        }
        builder.build()
    }

    #[tokio::test]
    async fn test_feature_mapping_defaults() {
        let features = TextractEngine::feature_types(&[]);
        assert_eq!(features, vec![FeatureType::Tables, FeatureType::Forms]);

        let features = TextractEngine::feature_types(&[AnalyzeFeature::Tables]);
        assert_eq!(features, vec![FeatureType::Tables]);
    }

    #[tokio::test]
    async fn test_canonical_mapping_from_blocks() {
        let blocks = vec![
            Block::builder().block_type(BlockType::Page).id("p1").build(),
            Block::builder()
                .block_type(BlockType::Line)
                .id("l1")
                .text("Invoice 42")
                .build(),
            word("w1", "Invoice", 99.0),
            word("w2", "42", 97.0),
            Block::builder()
                .block_type(BlockType::Table)
                .id("t1")
                .relationships(child_rel(&["c1"]))
                .build(),
            Block::builder()
                .block_type(BlockType::Cell)
                .id("c1")
                .row_index(1)
                .column_index(1)
                .confidence(90.0)
                .relationships(child_rel(&["w2"]))
                .build(),
        ];

        let result = driver().await.to_canonical(blocks, Duration::from_millis(800));
        assert_eq!(result.page_count, 1);
        assert_eq!(result.text, "Invoice 42");
        // Percent word confidences normalized.
        assert!((result.confidence - 0.98).abs() < 1e-9);
        assert_eq!(result.table_count, 1);
        assert_eq!(result.tables[0].cells[0].text, "42");
        assert_eq!(result.tables[0].cells[0].confidence, Some(0.9));
        assert!(result.raw_response.as_array().unwrap().len() == 6);
    }

    #[tokio::test]
    async fn test_key_value_parsing() {
        let value_block = Block::builder()
            .block_type(BlockType::KeyValueSet)
            .id("v1")
            .entity_types(EntityType::Value)
            .relationships(child_rel(&["w2"]))
            .build();
        let key_block = Block::builder()
            .block_type(BlockType::KeyValueSet)
            .id("k1")
            .entity_types(EntityType::Key)
            .confidence(88.0)
            .relationships(child_rel(&["w1"]))
            .relationships(
                Relationship::builder()
                    .r#type(RelationshipType::Value)
                    .ids("v1".to_string())
                    .build(),
            )
            .build();
        let blocks = vec![
            key_block,
            value_block,
            word("w1", "Total", 95.0),
            word("w2", "10.00", 93.0),
        ];

        let result = driver().await.to_canonical(blocks, Duration::from_millis(10));
        assert_eq!(result.key_value_pairs.len(), 1);
        assert_eq!(result.key_value_pairs[0].key, "Total");
        assert_eq!(result.key_value_pairs[0].value, "10.00");
    }

    #[tokio::test]
    async fn test_empty_blocks() {
        let result = driver().await.to_canonical(Vec::new(), Duration::ZERO);
        assert_eq!(result.page_count, 1);
        assert_eq!(result.word_count, 0);
        assert_eq!(result.confidence, 0.0);
    }
}
