//! ABOUTME: Composition root: every shared dependency is constructed exactly once here
//! ABOUTME: Storage backend selection, run store, breakers, metrics flush, engine, runner

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use ocrflow_config::{BreakerSettings, OcrFlowSettings, StorageKind};
use ocrflow_core::BlobStorage;
use ocrflow_engines::rate_limit::RateLimiterRegistry;
use ocrflow_engines::EngineRegistry;
use ocrflow_storage::{
    LocalBlobStorage, MetricsCollector, RunStore, S3BlobStorage, TracingMetricsSink,
};
use ocrflow_tasks::{OrchestratorHandle, TaskRunner};
use ocrflow_workflows::{BreakerRegistry, WorkflowEngine, WorkflowEngineBuilder};

/// Everything a CLI command may need, wired once.
pub struct App {
    pub run_store: Arc<RunStore>,
    pub engine: Arc<WorkflowEngine>,
    pub runner: Arc<TaskRunner>,
    pub handle: OrchestratorHandle,
}

pub async fn build(settings: OcrFlowSettings) -> Result<App> {
    let blobs: Arc<dyn BlobStorage> = match settings.storage.kind {
        StorageKind::Local => {
            info!(path = %settings.storage.local_path, "using local blob storage");
            Arc::new(LocalBlobStorage::new(settings.storage.local_path.clone()))
        }
        StorageKind::S3 => {
            let bucket = settings
                .storage
                .s3_bucket
                .clone()
                .unwrap_or_default();
            info!(bucket, "using s3 blob storage");
            Arc::new(
                S3BlobStorage::from_env(
                    bucket,
                    settings.storage.s3_region.clone(),
                    settings.storage.s3_endpoint.clone(),
                )
                .await
                .with_key_prefix(settings.storage.s3_key_prefix.clone()),
            )
        }
    };

    let run_store = Arc::new(RunStore::connect(&settings.database_url, blobs).await?);

    let metrics = Arc::new(MetricsCollector::new());
    let _flush = ocrflow_storage::metrics::spawn_flush_task(
        metrics.clone(),
        Arc::new(TracingMetricsSink),
        Duration::from_secs(settings.metrics_flush_interval_seconds.max(1)),
    );

    let rate_limits = Arc::new(RateLimiterRegistry::new());
    for (engine, limit) in &settings.engine_rate_limits {
        if let Ok(kind) = engine.parse() {
            rate_limits.set_limit(kind, *limit);
        }
    }

    let breakers = Arc::new(BreakerRegistry::new(BreakerSettings::default()));
    let registry = Arc::new(EngineRegistry::new());

    let engine: Arc<WorkflowEngine> = Arc::new(
        WorkflowEngineBuilder::new(registry, run_store.clone(), metrics.clone(), breakers)
            .with_rate_limits(rate_limits)
            .build(),
    );

    let runner = TaskRunner::start(engine.clone(), run_store.clone(), &settings);
    let handle = OrchestratorHandle::new(runner.clone(), run_store.clone(), metrics);

    Ok(App {
        run_store,
        engine,
        runner,
        handle,
    })
}
