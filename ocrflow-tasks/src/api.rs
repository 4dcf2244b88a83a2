//! ABOUTME: The surface the core exposes to HTTP and CLI collaborators
//! ABOUTME: Enqueue orchestrations, read task status and run history, reset metrics

use std::sync::Arc;
use uuid::Uuid;

use ocrflow_config::WorkflowOverrides;
use ocrflow_core::{EngineKind, Result};
use ocrflow_storage::{EngineMetricsSnapshot, MetricsCollector, RunStore};

use crate::runner::{resolve_config, TaskRunner};
use crate::types::{queues, RunSummary, TaskPayload, TaskStatus};

/// Facade wiring the task runner, run store, and metrics together for
/// callers outside the core.
pub struct OrchestratorHandle {
    runner: Arc<TaskRunner>,
    run_store: Arc<RunStore>,
    metrics: Arc<MetricsCollector>,
}

impl OrchestratorHandle {
    pub fn new(
        runner: Arc<TaskRunner>,
        run_store: Arc<RunStore>,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            runner,
            run_store,
            metrics,
        }
    }

    /// Enqueue a workflow orchestration for a document. The preset name
    /// and overrides are validated here, so configuration errors surface
    /// to the caller instead of a task worker.
    pub async fn enqueue_orchestration(
        &self,
        document_id: i64,
        workflow_name: &str,
        overrides: Option<WorkflowOverrides>,
    ) -> Result<Uuid> {
        resolve_config(workflow_name, overrides.clone())?;
        let document = self.run_store.get_document(document_id).await?;

        self.runner.enqueue(
            queues::DOCUMENT_PROCESSING,
            TaskPayload::OrchestrateOcrWorkflow {
                document_id,
                document_path: document.storage_path,
                workflow_name: workflow_name.to_string(),
                overrides,
            },
        )
    }

    /// Enqueue a reprocess of an already-ingested document.
    pub async fn enqueue_reprocess(
        &self,
        document_id: i64,
        workflow_name: &str,
        overrides: Option<WorkflowOverrides>,
    ) -> Result<Uuid> {
        resolve_config(workflow_name, overrides.clone())?;
        self.run_store.get_document(document_id).await?;
        self.runner.enqueue(
            queues::DOCUMENT_PROCESSING,
            TaskPayload::ReprocessDocumentOcr {
                document_id,
                workflow_name: workflow_name.to_string(),
                overrides,
            },
        )
    }

    /// Current state, progress, and final snapshot of a task.
    #[must_use]
    pub fn get_execution_status(&self, task_id: Uuid) -> Option<TaskStatus> {
        self.runner.status(task_id)
    }

    /// Run history for a document, ordered by start time.
    pub async fn get_document_runs(&self, document_id: i64) -> Result<Vec<RunSummary>> {
        let runs = self.run_store.runs_for_document(document_id).await?;
        Ok(runs.iter().map(RunSummary::from).collect())
    }

    /// Reset one engine's metrics, or all of them.
    pub fn reset_engine_metrics(&self, engine: Option<EngineKind>) {
        self.metrics.reset(engine);
    }

    /// Snapshot of per-engine metrics.
    #[must_use]
    pub fn engine_metrics(&self) -> Vec<EngineMetricsSnapshot> {
        self.metrics.snapshot()
    }
}
