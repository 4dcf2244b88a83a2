//! End-to-end workflow scenarios over scripted engines and in-memory stores.

use async_trait::async_trait;
use sqlx::sqlite::SqlitePoolOptions;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use ocrflow_config::{preset, BreakerSettings, EngineConfig, RetryPolicy};
use ocrflow_core::{
    AnalyzeFeature, BlobStorage, EngineHealth, EngineKind, ErrorCategory, ExecutionStatus,
    OcrEngine, OcrFlowError, OcrResult, RunStatus,
};
use ocrflow_engines::EngineProvider;
use ocrflow_storage::{MemoryBlobStorage, MetricsCollector, RunStore};
use ocrflow_workflows::{BreakerRegistry, WorkflowEngine, WorkflowEngineBuilder};

/// Scripted engine behavior.
#[derive(Debug, Clone)]
enum Behavior {
    Succeed {
        confidence: f64,
        words: usize,
        pages: u64,
        tables: u64,
        reported_time: Duration,
        delay: Duration,
    },
    Fail {
        category: ErrorCategory,
        message: &'static str,
    },
}

impl Behavior {
    fn ok(confidence: f64, words: usize, pages: u64) -> Self {
        Behavior::Succeed {
            confidence,
            words,
            pages,
            tables: 0,
            reported_time: Duration::from_millis(500),
            delay: Duration::from_millis(10),
        }
    }
}

struct MockEngine {
    kind: EngineKind,
    name: String,
    behavior: Behavior,
}

#[async_trait]
impl OcrEngine for MockEngine {
    fn kind(&self) -> EngineKind {
        self.kind
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn supported_features(&self) -> &[AnalyzeFeature] {
        &[AnalyzeFeature::Tables]
    }

    async fn analyze(
        &self,
        _document_path: &Path,
        _features: &[AnalyzeFeature],
    ) -> ocrflow_core::Result<OcrResult> {
        match &self.behavior {
            Behavior::Succeed {
                confidence,
                words,
                pages,
                tables,
                reported_time,
                delay,
            } => {
                tokio::time::sleep(*delay).await;
                let text = vec!["word"; *words].join(" ");
                let mut result = OcrResult::new(
                    self.kind,
                    self.name.clone(),
                    text,
                    *confidence,
                    *pages,
                    *reported_time,
                )
                .with_raw_response(serde_json::json!({
                    "engine": self.kind.as_str(),
                    "pages": *pages,
                }));
                result.table_count = *tables;
                Ok(result)
            }
            Behavior::Fail { category, message } => Err(OcrFlowError::engine(
                *message,
                self.kind.as_str(),
                *category,
            )),
        }
    }

    async fn health_check(&self) -> EngineHealth {
        EngineHealth::healthy()
    }

    fn estimate_cost(&self, page_count: u64) -> Option<f64> {
        match self.kind {
            EngineKind::Tesseract | EngineKind::Paddle => None,
            _ => Some(page_count as f64),
        }
    }
}

struct MockProvider {
    behaviors: HashMap<EngineKind, Behavior>,
}

#[async_trait]
impl EngineProvider for MockProvider {
    async fn acquire(
        &self,
        config: &EngineConfig,
        _retry_policy: &RetryPolicy,
    ) -> ocrflow_core::Result<Arc<dyn OcrEngine>> {
        let behavior = self.behaviors.get(&config.kind).ok_or_else(|| {
            OcrFlowError::configuration(format!("engine {} not configured", config.kind))
        })?;
        Ok(Arc::new(MockEngine {
            kind: config.kind,
            name: config.display_name.clone(),
            behavior: behavior.clone(),
        }))
    }
}

struct Harness {
    engine: WorkflowEngine,
    run_store: Arc<RunStore>,
    blobs: Arc<MemoryBlobStorage>,
    breakers: Arc<BreakerRegistry>,
    document_id: i64,
    document_path: PathBuf,
}

async fn harness(behaviors: Vec<(EngineKind, Behavior)>) -> Harness {
    let blobs = Arc::new(MemoryBlobStorage::new());
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    let run_store = Arc::new(RunStore::new(pool, blobs.clone()));
    run_store.init_schema().await.unwrap();
    let document = run_store
        .insert_document("documents/sample.png", "image/png", Some(3))
        .await
        .unwrap();

    let breakers = Arc::new(BreakerRegistry::new(BreakerSettings::default()));
    let provider = Arc::new(MockProvider {
        behaviors: behaviors.into_iter().collect(),
    });
    let engine = WorkflowEngineBuilder::new(
        provider,
        run_store.clone(),
        Arc::new(MetricsCollector::new()),
        breakers.clone(),
    )
    .build();

    Harness {
        engine,
        run_store,
        blobs,
        breakers,
        document_id: document.id,
        document_path: PathBuf::from("documents/sample.png"),
    }
}

#[tokio::test]
async fn primary_wins_immediately() {
    let harness = harness(vec![(
        EngineKind::Azure,
        Behavior::Succeed {
            confidence: 0.92,
            words: 450,
            pages: 3,
            tables: 0,
            reported_time: Duration::from_secs(15),
            delay: Duration::from_millis(5),
        },
    )])
    .await;
    let config = preset("azure_primary").unwrap();

    let execution = harness
        .engine
        .run_workflow(harness.document_id, &harness.document_path, &config)
        .await
        .unwrap();

    assert_eq!(execution.status, ExecutionStatus::Completed);
    assert_eq!(execution.attempts.len(), 1);
    assert_eq!(execution.selected_engine, Some(EngineKind::Azure));

    // Exactly one run, completed; no fallback runs were created.
    let runs = harness
        .run_store
        .runs_for_document(harness.document_id)
        .await
        .unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].status, RunStatus::Completed);
    assert_eq!(runs[0].engine_kind, EngineKind::Azure);
    assert_eq!(execution.selected_run_id, Some(runs[0].id));

    // Blob integrity: the stored pointer resolves and the payload exists.
    let path = runs[0].raw_response_path.clone().unwrap();
    assert!(harness.blobs.exists(&path).await.unwrap());

    // Document updated in the same execution.
    let document = harness
        .run_store
        .get_document(harness.document_id)
        .await
        .unwrap();
    assert_eq!(document.selected_engine.as_deref(), Some("azure"));
    assert_eq!(document.selected_run_id, Some(runs[0].id));
    assert!(document.last_ocr_at.is_some());
    assert!(document.extracted_text.unwrap().starts_with("word"));
}

#[tokio::test]
async fn low_confidence_primary_rescued_by_fallback() {
    let harness = harness(vec![
        (EngineKind::Azure, Behavior::ok(0.55, 120, 3)),
        (EngineKind::Google, Behavior::ok(0.91, 460, 3)),
    ])
    .await;
    let config = preset("azure_primary").unwrap();

    let execution = harness
        .engine
        .run_workflow(harness.document_id, &harness.document_path, &config)
        .await
        .unwrap();

    assert_eq!(execution.status, ExecutionStatus::Completed);
    assert_eq!(execution.selected_engine, Some(EngineKind::Google));

    let runs = harness
        .run_store
        .runs_for_document(harness.document_id)
        .await
        .unwrap();
    assert_eq!(runs.len(), 2);
    assert!(runs.iter().all(|r| r.status == RunStatus::Completed));

    // The azure attempt completed but did not pass quality.
    let azure_attempt = execution
        .attempts
        .iter()
        .find(|a| a.engine_kind == EngineKind::Azure)
        .unwrap();
    assert_eq!(azure_attempt.passed_quality, Some(false));
    let google_attempt = execution
        .attempts
        .iter()
        .find(|a| a.engine_kind == EngineKind::Google)
        .unwrap();
    assert_eq!(google_attempt.passed_quality, Some(true));
}

#[tokio::test]
async fn all_engines_fail() {
    let harness = harness(vec![
        (
            EngineKind::Azure,
            Behavior::Fail {
                category: ErrorCategory::Permanent,
                message: "invalid document",
            },
        ),
        (
            EngineKind::Google,
            Behavior::Fail {
                category: ErrorCategory::Permanent,
                message: "auth rejected",
            },
        ),
        (
            EngineKind::Tesseract,
            Behavior::Fail {
                category: ErrorCategory::Permanent,
                message: "binary exploded",
            },
        ),
    ])
    .await;
    let config = preset("azure_primary").unwrap();

    let execution = harness
        .engine
        .run_workflow(harness.document_id, &harness.document_path, &config)
        .await
        .unwrap();

    assert_eq!(execution.status, ExecutionStatus::Failed);
    assert!(execution.selected_run_id.is_none());

    let runs = harness
        .run_store
        .runs_for_document(harness.document_id)
        .await
        .unwrap();
    assert_eq!(runs.len(), 3);
    assert!(runs.iter().all(|r| r.status == RunStatus::Failed));

    let composite = execution.error.unwrap();
    for engine in ["azure", "google", "tesseract"] {
        assert!(composite.contains(engine), "missing {engine} in {composite}");
    }
    assert!(composite.contains("PERMANENT"));

    // Document untouched.
    let document = harness
        .run_store
        .get_document(harness.document_id)
        .await
        .unwrap();
    assert!(document.selected_engine.is_none());
    assert!(document.extracted_text.is_none());
}

#[tokio::test]
async fn breaker_trip_short_circuits_primary() {
    let harness = harness(vec![
        (EngineKind::Azure, Behavior::ok(0.95, 500, 3)),
        (EngineKind::Google, Behavior::ok(0.91, 460, 3)),
    ])
    .await;
    harness.breakers.trip(EngineKind::Azure);
    let config = preset("azure_primary").unwrap();

    let execution = harness
        .engine
        .run_workflow(harness.document_id, &harness.document_path, &config)
        .await
        .unwrap();

    assert_eq!(execution.status, ExecutionStatus::Completed);
    assert_eq!(execution.selected_engine, Some(EngineKind::Google));

    let runs = harness
        .run_store
        .runs_for_document(harness.document_id)
        .await
        .unwrap();
    assert_eq!(runs.len(), 2);

    let azure_run = runs
        .iter()
        .find(|r| r.engine_kind == EngineKind::Azure)
        .unwrap();
    assert_eq!(azure_run.status, RunStatus::Failed);
    assert!(azure_run
        .error_message
        .as_deref()
        .unwrap()
        .contains("circuit breaker open"));

    let azure_attempt = execution
        .attempts
        .iter()
        .find(|a| a.engine_kind == EngineKind::Azure)
        .unwrap();
    assert_eq!(azure_attempt.category, Some(ErrorCategory::BreakerOpen));

    // Breaker isolation: google's breaker is untouched.
    assert!(harness.breakers.allow(EngineKind::Google).is_ok());
}

#[tokio::test]
async fn total_timeout_cancels_inflight_and_skips_rest() {
    let harness = harness(vec![
        (
            EngineKind::Azure,
            Behavior::Succeed {
                confidence: 0.40,
                words: 200,
                pages: 3,
                tables: 0,
                reported_time: Duration::from_millis(300),
                delay: Duration::from_millis(300),
            },
        ),
        (
            // Hangs past the total budget.
            EngineKind::Google,
            Behavior::Succeed {
                confidence: 0.95,
                words: 900,
                pages: 3,
                tables: 0,
                reported_time: Duration::from_secs(5),
                delay: Duration::from_secs(30),
            },
        ),
        (EngineKind::Tesseract, Behavior::ok(0.9, 400, 3)),
    ])
    .await;

    let mut config = preset("azure_primary").unwrap();
    config.total_timeout_seconds = 1;

    let started = std::time::Instant::now();
    let execution = harness
        .engine
        .run_workflow(harness.document_id, &harness.document_path, &config)
        .await
        .unwrap();
    // Budget respect: wall clock stays within the budget plus grace.
    assert!(started.elapsed() < Duration::from_secs(3));

    assert_eq!(execution.status, ExecutionStatus::Completed);
    assert_eq!(execution.selected_engine, Some(EngineKind::Azure));
    assert!(!execution.warnings.is_empty());

    let runs = harness
        .run_store
        .runs_for_document(harness.document_id)
        .await
        .unwrap();
    // Primary completed, google cancelled, tesseract never started.
    assert_eq!(runs.len(), 2);
    let azure_run = runs
        .iter()
        .find(|r| r.engine_kind == EngineKind::Azure)
        .unwrap();
    assert_eq!(azure_run.status, RunStatus::Completed);
    let google_run = runs
        .iter()
        .find(|r| r.engine_kind == EngineKind::Google)
        .unwrap();
    assert_eq!(google_run.status, RunStatus::Cancelled);
}

#[tokio::test]
async fn selector_tie_breaks_by_latency_end_to_end() {
    let harness = harness(vec![
        (
            EngineKind::Azure,
            Behavior::Succeed {
                confidence: 0.50,
                words: 1000,
                pages: 5,
                tables: 0,
                reported_time: Duration::from_millis(1200),
                delay: Duration::from_millis(5),
            },
        ),
        (
            EngineKind::Google,
            Behavior::Succeed {
                confidence: 0.52,
                words: 1000,
                pages: 5,
                tables: 0,
                reported_time: Duration::from_millis(800),
                delay: Duration::from_millis(5),
            },
        ),
    ])
    .await;

    let mut config = preset("azure_primary").unwrap();
    config.fallbacks.truncate(1); // azure + google only
    config.stop_on_success = false;

    let execution = harness
        .engine
        .run_workflow(harness.document_id, &harness.document_path, &config)
        .await
        .unwrap();

    // Equal pages and words; the run with latency 800 wins.
    assert_eq!(execution.selected_engine, Some(EngineKind::Google));
    let winner = harness
        .run_store
        .get_run(execution.selected_run_id.unwrap())
        .await
        .unwrap();
    assert_eq!(winner.latency_ms, Some(800));
}

#[tokio::test]
async fn parallel_fallbacks_all_run() {
    let harness = harness(vec![
        (
            EngineKind::Azure,
            Behavior::Fail {
                category: ErrorCategory::Transient,
                message: "503",
            },
        ),
        (EngineKind::Google, Behavior::ok(0.85, 400, 3)),
        (EngineKind::Tesseract, Behavior::ok(0.75, 300, 3)),
    ])
    .await;

    let mut config = preset("azure_primary").unwrap();
    config.parallel_fallbacks = true;
    // No driver retries so the transient primary fails fast.
    config.global_retry_policy = RetryPolicy::none();

    let execution = harness
        .engine
        .run_workflow(harness.document_id, &harness.document_path, &config)
        .await
        .unwrap();

    assert_eq!(execution.status, ExecutionStatus::Completed);
    assert_eq!(execution.attempts.len(), 3);
    // Both fallbacks ran despite stop_on_success: parallel dispatch waits
    // for the whole completion set.
    let runs = harness
        .run_store
        .runs_for_document(harness.document_id)
        .await
        .unwrap();
    assert_eq!(runs.len(), 3);
    assert_eq!(
        runs.iter()
            .filter(|r| r.status == RunStatus::Completed)
            .count(),
        2
    );
    assert_eq!(execution.selected_engine, Some(EngineKind::Google));
}

#[tokio::test]
async fn unknown_document_is_rejected_before_any_run() {
    let harness = harness(vec![(EngineKind::Azure, Behavior::ok(0.9, 100, 1))]).await;
    let config = preset("azure_primary").unwrap();
    let err = harness
        .engine
        .run_workflow(9999, &harness.document_path, &config)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("not found"));
}

#[tokio::test]
async fn invalid_config_is_rejected() {
    let harness = harness(vec![(EngineKind::Azure, Behavior::ok(0.9, 100, 1))]).await;
    let mut config = preset("azure_primary").unwrap();
    config.fallbacks.push(EngineConfig::new(
        EngineKind::Azure,
        "Azure again",
    ));
    let err = harness
        .engine
        .run_workflow(harness.document_id, &harness.document_path, &config)
        .await
        .unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Configuration);

    let runs = harness
        .run_store
        .runs_for_document(harness.document_id)
        .await
        .unwrap();
    assert!(runs.is_empty());
}

#[tokio::test]
async fn split_phase_primary_produces_same_run_shape() {
    let harness = harness(vec![(EngineKind::Azure, Behavior::ok(0.92, 450, 3))]).await;
    let config = preset("azure_primary").unwrap();

    let execution = harness
        .engine
        .run_primary_phase(harness.document_id, &harness.document_path, &config)
        .await
        .unwrap();
    assert_eq!(execution.status, ExecutionStatus::PrimaryPassedStopping);

    let runs = harness
        .run_store
        .runs_for_document(harness.document_id)
        .await
        .unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].status, RunStatus::Completed);
    assert_eq!(runs[0].engine_kind, EngineKind::Azure);
}

#[tokio::test]
async fn workflow_config_must_name_known_preset() {
    let err = preset("nope").unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Configuration);
}
