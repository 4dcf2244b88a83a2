//! ABOUTME: Task payloads, envelopes, statuses, and dead-letter records
//! ABOUTME: Queue names are contracts shared with the surrounding deployment

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use ocrflow_config::WorkflowOverrides;
use ocrflow_core::{Run, WorkflowExecution};

/// Named queues with independent concurrency caps.
pub mod queues {
    pub const DEFAULT: &str = "default";
    pub const EMAIL_INGESTION: &str = "email_ingestion";
    pub const DOCUMENT_PROCESSING: &str = "document_processing";
    pub const HIGH_PRIORITY: &str = "high_priority";
    pub const LONG_RUNNING: &str = "long_running";
    pub const FAILED_TASKS: &str = "failed_tasks";
    pub const RETRY_TASKS: &str = "retry_tasks";

    /// Every queue the runner serves.
    pub const ALL: &[&str] = &[
        DEFAULT,
        EMAIL_INGESTION,
        DOCUMENT_PROCESSING,
        HIGH_PRIORITY,
        LONG_RUNNING,
        FAILED_TASKS,
        RETRY_TASKS,
    ];
}

/// The background tasks the shell exposes. Names are contracts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "task", rename_all = "snake_case")]
pub enum TaskPayload {
    /// Full workflow in one task.
    OrchestrateOcrWorkflow {
        document_id: i64,
        document_path: String,
        workflow_name: String,
        #[serde(default)]
        overrides: Option<WorkflowOverrides>,
    },
    /// Primary phase only, for split deployments.
    ProcessPrimaryOcr {
        document_id: i64,
        document_path: String,
        workflow_name: String,
        #[serde(default)]
        overrides: Option<WorkflowOverrides>,
    },
    /// Fallback phase plus selection, for split deployments.
    ProcessFallbackOcr {
        document_id: i64,
        document_path: String,
        workflow_name: String,
        #[serde(default)]
        overrides: Option<WorkflowOverrides>,
    },
    /// Replay the workflow for an already-persisted document.
    ReprocessDocumentOcr {
        document_id: i64,
        workflow_name: String,
        #[serde(default)]
        overrides: Option<WorkflowOverrides>,
    },
}

impl TaskPayload {
    /// Stable task name for logs and dead letters.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::OrchestrateOcrWorkflow { .. } => "orchestrate_ocr_workflow",
            Self::ProcessPrimaryOcr { .. } => "process_primary_ocr",
            Self::ProcessFallbackOcr { .. } => "process_fallback_ocr",
            Self::ReprocessDocumentOcr { .. } => "reprocess_document_ocr",
        }
    }
}

/// One enqueued task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskEnvelope {
    pub id: Uuid,
    pub queue: String,
    pub payload: TaskPayload,
    pub retry_count: u32,
    pub max_retries: u32,
    pub enqueued_at: DateTime<Utc>,
}

impl TaskEnvelope {
    pub fn new(queue: impl Into<String>, payload: TaskPayload, max_retries: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            queue: queue.into(),
            payload,
            retry_count: 0,
            max_retries,
            enqueued_at: Utc::now(),
        }
    }
}

/// Task lifecycle states surfaced to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Queued,
    Running,
    Retrying,
    Succeeded,
    Failed,
}

/// Caller-visible view of a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskStatus {
    pub state: TaskState,
    /// Fraction of work finished, in [0,1].
    pub progress: f64,
    pub message: String,
    /// Final execution snapshot, once available.
    pub snapshot: Option<WorkflowExecution>,
    pub error: Option<String>,
}

impl TaskStatus {
    #[must_use]
    pub fn queued() -> Self {
        Self {
            state: TaskState::Queued,
            progress: 0.0,
            message: "queued".to_string(),
            snapshot: None,
            error: None,
        }
    }
}

/// A task whose retries are exhausted, parked for operator inspection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetter {
    pub original_task_id: Uuid,
    pub task_name: String,
    /// Original arguments, verbatim.
    pub payload: TaskPayload,
    pub error_category: String,
    pub error_message: String,
    /// The source chain, outermost first.
    pub error_chain: Vec<String>,
    pub retries: u32,
    pub failed_at: DateTime<Utc>,
}

/// Caller-facing run summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub id: i64,
    pub engine: String,
    pub status: String,
    pub confidence_mean: Option<f64>,
    pub pages_parsed: Option<i64>,
    pub word_count: Option<i64>,
    pub table_count: Option<i64>,
    pub latency_ms: Option<i64>,
    pub cost_cents: Option<f64>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub raw_response_path: Option<String>,
    pub error_message: Option<String>,
}

impl From<&Run> for RunSummary {
    fn from(run: &Run) -> Self {
        Self {
            id: run.id,
            engine: run.engine_kind.to_string(),
            status: run.status.as_str().to_string(),
            confidence_mean: run.confidence_mean,
            pages_parsed: run.pages_parsed,
            word_count: run.word_count,
            table_count: run.table_count,
            latency_ms: run.latency_ms,
            cost_cents: run.cost_cents,
            started_at: run.started_at,
            completed_at: run.completed_at,
            raw_response_path: run.raw_response_path.clone(),
            error_message: run.error_message.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_names_are_contracts() {
        let payload = TaskPayload::OrchestrateOcrWorkflow {
            document_id: 1,
            document_path: "p".into(),
            workflow_name: "azure_primary".into(),
            overrides: None,
        };
        assert_eq!(payload.name(), "orchestrate_ocr_workflow");
        let payload = TaskPayload::ReprocessDocumentOcr {
            document_id: 1,
            workflow_name: "opensource".into(),
            overrides: None,
        };
        assert_eq!(payload.name(), "reprocess_document_ocr");
    }

    #[test]
    fn test_payload_serde_round_trip() {
        let payload = TaskPayload::ProcessFallbackOcr {
            document_id: 7,
            document_path: "documents/7.png".into(),
            workflow_name: "google_primary".into(),
            overrides: None,
        };
        let json = serde_json::to_string(&payload).unwrap();
        assert!(json.contains("\"task\":\"process_fallback_ocr\""));
        let back: TaskPayload = serde_json::from_str(&json).unwrap();
        assert_eq!(back.name(), "process_fallback_ocr");
    }

    #[test]
    fn test_all_queues_listed() {
        assert_eq!(queues::ALL.len(), 7);
        assert!(queues::ALL.contains(&queues::DOCUMENT_PROCESSING));
        assert!(queues::ALL.contains(&queues::FAILED_TASKS));
    }
}
