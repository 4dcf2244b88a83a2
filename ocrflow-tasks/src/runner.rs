//! ABOUTME: Task runner serving named queues with per-queue concurrency caps
//! ABOUTME: Bounded retries with backoff; exhausted tasks move to the dead-letter store

use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use ocrflow_config::{preset, OcrFlowSettings, WorkflowConfig, WorkflowOverrides};
use ocrflow_core::{ErrorCategory, OcrFlowError, Result, WorkflowExecution};
use ocrflow_workflows::WorkflowEngine;

use crate::types::{queues, DeadLetter, TaskEnvelope, TaskPayload, TaskState, TaskStatus};

/// Delay before a retried task re-enters a queue, scaled by the retry
/// number. Kept short; the driver layer already absorbed upstream
/// backoff.
const RETRY_BASE_DELAY: Duration = Duration::from_secs(2);

/// Headroom added to the workflow total timeout for the per-task hard
/// limit, so the worker can record cancellation state before the task is
/// killed.
const TASK_HARD_LIMIT_GRACE: Duration = Duration::from_secs(300);

/// How long a cancelled workflow gets to finish its bookkeeping after
/// the hard limit fires.
const HARD_LIMIT_CANCEL_GRACE: Duration = Duration::from_secs(30);

/// Executes background tasks against the workflow engine.
///
/// Each named queue has its own channel and worker with a concurrency
/// cap. A task slot is released only after the task reaches a terminal
/// state, giving acks-late semantics within the process.
pub struct TaskRunner {
    engine: Arc<WorkflowEngine>,
    run_store: Arc<ocrflow_storage::RunStore>,
    senders: HashMap<String, mpsc::UnboundedSender<TaskEnvelope>>,
    statuses: Arc<DashMap<Uuid, TaskStatus>>,
    dead_letters: Arc<Mutex<Vec<DeadLetter>>>,
    default_max_retries: u32,
}

impl TaskRunner {
    /// Start workers for every known queue.
    pub fn start(
        engine: Arc<WorkflowEngine>,
        run_store: Arc<ocrflow_storage::RunStore>,
        settings: &OcrFlowSettings,
    ) -> Arc<Self> {
        let statuses = Arc::new(DashMap::new());
        let dead_letters = Arc::new(Mutex::new(Vec::new()));
        let mut senders = HashMap::new();
        let mut receivers = Vec::new();

        for queue in queues::ALL {
            let (tx, rx) = mpsc::unbounded_channel::<TaskEnvelope>();
            senders.insert((*queue).to_string(), tx);
            receivers.push(((*queue).to_string(), rx, settings.concurrency_for(queue)));
        }

        let runner = Arc::new(Self {
            engine,
            run_store,
            senders,
            statuses,
            dead_letters,
            default_max_retries: 3,
        });

        for (queue, rx, concurrency) in receivers {
            let worker = Arc::clone(&runner);
            tokio::spawn(async move {
                worker.serve_queue(queue, rx, concurrency).await;
            });
        }

        runner
    }

    /// Enqueue a task, returning its id.
    pub fn enqueue(&self, queue: &str, payload: TaskPayload) -> Result<Uuid> {
        let envelope = TaskEnvelope::new(queue, payload, self.default_max_retries);
        let id = envelope.id;
        self.statuses.insert(id, TaskStatus::queued());
        self.submit(envelope)?;
        Ok(id)
    }

    fn submit(&self, envelope: TaskEnvelope) -> Result<()> {
        let sender = self.senders.get(&envelope.queue).ok_or_else(|| {
            OcrFlowError::configuration(format!("unknown queue: {}", envelope.queue))
        })?;
        sender
            .send(envelope)
            .map_err(|_| OcrFlowError::task("queue worker has shut down"))
    }

    /// Current status of a task.
    #[must_use]
    pub fn status(&self, task_id: Uuid) -> Option<TaskStatus> {
        self.statuses.get(&task_id).map(|entry| entry.clone())
    }

    /// Dead letters accumulated so far.
    #[must_use]
    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.dead_letters.lock().clone()
    }

    async fn serve_queue(
        self: Arc<Self>,
        queue: String,
        mut rx: mpsc::UnboundedReceiver<TaskEnvelope>,
        concurrency: usize,
    ) {
        info!(%queue, concurrency, "queue worker started");
        let semaphore = Arc::new(Semaphore::new(concurrency));
        while let Some(envelope) = rx.recv().await {
            let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
                break;
            };
            let runner = Arc::clone(&self);
            tokio::spawn(async move {
                runner.run_task(envelope).await;
                drop(permit);
            });
        }
    }

    async fn run_task(&self, envelope: TaskEnvelope) {
        let task_id = envelope.id;
        let name = envelope.payload.name();
        self.update_status(task_id, |status| {
            status.state = TaskState::Running;
            status.message = format!("{name} running");
            status.progress = 0.1;
        });
        info!(task = name, %task_id, queue = %envelope.queue, retry = envelope.retry_count, "task started");

        // The hard limit sits above the workflow total timeout. When it
        // fires, the workflow is cancelled cooperatively and given a
        // grace period to record cancellation state before the task is
        // abandoned.
        let hard_limit = task_hard_limit(&envelope.payload);
        let cancel = CancellationToken::new();
        let outcome = {
            let execute = self.execute(&envelope.payload, &cancel);
            tokio::pin!(execute);
            tokio::select! {
                outcome = &mut execute => outcome,
                () = tokio::time::sleep(hard_limit) => {
                    warn!(task = name, %task_id, "hard time limit reached, cancelling");
                    cancel.cancel();
                    match tokio::time::timeout(HARD_LIMIT_CANCEL_GRACE, &mut execute).await {
                        Ok(outcome) => outcome,
                        Err(_) => Err(OcrFlowError::cancelled(format!(
                            "task hard time limit of {}s exceeded",
                            hard_limit.as_secs()
                        ))),
                    }
                }
            }
        };

        match outcome {
            Ok(execution) => {
                let failed = execution.status == ocrflow_core::ExecutionStatus::Failed;
                self.update_status(task_id, |status| {
                    status.state = if failed {
                        TaskState::Failed
                    } else {
                        TaskState::Succeeded
                    };
                    status.progress = 1.0;
                    status.message = format!("{name} finished: {:?}", execution.status);
                    status.error = execution.error.clone();
                    status.snapshot = Some(execution.clone());
                });
                info!(task = name, %task_id, status = ?execution.status, "task finished");
            }
            Err(e) => self.handle_task_failure(envelope, e).await,
        }
    }

    async fn handle_task_failure(&self, mut envelope: TaskEnvelope, error: OcrFlowError) {
        let task_id = envelope.id;
        let name = envelope.payload.name();
        let category = error.category();
        let retryable =
            category == ErrorCategory::Transient && envelope.retry_count < envelope.max_retries;

        if retryable {
            envelope.retry_count += 1;
            let delay = RETRY_BASE_DELAY * envelope.retry_count;
            warn!(
                task = name,
                %task_id,
                retry = envelope.retry_count,
                max = envelope.max_retries,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "task failed, retrying"
            );
            self.update_status(task_id, |status| {
                status.state = TaskState::Retrying;
                status.message = format!("retry {} of {}", envelope.retry_count, envelope.max_retries);
                status.error = Some(error.to_string());
            });

            // Retried tasks route through the retry queue after a backoff.
            envelope.queue = queues::RETRY_TASKS.to_string();
            tokio::time::sleep(delay).await;
            if let Err(e) = self.submit(envelope) {
                error!(%task_id, error = %e, "failed to re-enqueue task");
            }
            return;
        }

        error!(task = name, %task_id, category = %category, error = %error, "task failed terminally");
        let dead_letter = DeadLetter {
            original_task_id: task_id,
            task_name: name.to_string(),
            payload: envelope.payload.clone(),
            error_category: category.as_str().to_string(),
            error_message: error.to_string(),
            error_chain: error_chain(&error),
            retries: envelope.retry_count,
            failed_at: chrono::Utc::now(),
        };
        self.dead_letters.lock().push(dead_letter);
        self.update_status(task_id, |status| {
            status.state = TaskState::Failed;
            status.message = format!("{name} failed: {category}");
            status.error = Some(error.to_string());
        });
    }

    async fn execute(
        &self,
        payload: &TaskPayload,
        cancel: &CancellationToken,
    ) -> Result<WorkflowExecution> {
        match payload {
            TaskPayload::OrchestrateOcrWorkflow {
                document_id,
                document_path,
                workflow_name,
                overrides,
            } => {
                let config = resolve_config(workflow_name, overrides.clone())?;
                self.engine
                    .run_workflow_with_cancel(
                        *document_id,
                        &PathBuf::from(document_path),
                        &config,
                        cancel.child_token(),
                    )
                    .await
            }
            TaskPayload::ProcessPrimaryOcr {
                document_id,
                document_path,
                workflow_name,
                overrides,
            } => {
                let config = resolve_config(workflow_name, overrides.clone())?;
                self.engine
                    .run_primary_phase(*document_id, &PathBuf::from(document_path), &config)
                    .await
            }
            TaskPayload::ProcessFallbackOcr {
                document_id,
                document_path,
                workflow_name,
                overrides,
            } => {
                let config = resolve_config(workflow_name, overrides.clone())?;
                self.engine
                    .run_fallback_phase(*document_id, &PathBuf::from(document_path), &config)
                    .await
            }
            TaskPayload::ReprocessDocumentOcr {
                document_id,
                workflow_name,
                overrides,
            } => {
                let config = resolve_config(workflow_name, overrides.clone())?;
                // Replays use the persisted storage path; all runs are new.
                let document = self.run_store.get_document(*document_id).await?;
                self.engine
                    .run_workflow_with_cancel(
                        *document_id,
                        &PathBuf::from(&document.storage_path),
                        &config,
                        cancel.child_token(),
                    )
                    .await
            }
        }
    }

    fn update_status(&self, task_id: Uuid, update: impl FnOnce(&mut TaskStatus)) {
        let mut entry = self
            .statuses
            .entry(task_id)
            .or_insert_with(TaskStatus::queued);
        update(entry.value_mut());
    }
}

/// Per-task hard time limit: the workflow total timeout plus grace, so
/// cancellation bookkeeping always finishes before the task is killed.
fn task_hard_limit(payload: &TaskPayload) -> Duration {
    let workflow_name = match payload {
        TaskPayload::OrchestrateOcrWorkflow { workflow_name, .. }
        | TaskPayload::ProcessPrimaryOcr { workflow_name, .. }
        | TaskPayload::ProcessFallbackOcr { workflow_name, .. }
        | TaskPayload::ReprocessDocumentOcr { workflow_name, .. } => workflow_name,
    };
    let total = preset(workflow_name)
        .map(|config| config.total_timeout())
        .unwrap_or(Duration::from_secs(1800));
    total + TASK_HARD_LIMIT_GRACE
}

/// Resolve a named preset and merge per-request overrides once at entry.
pub fn resolve_config(
    workflow_name: &str,
    overrides: Option<WorkflowOverrides>,
) -> Result<WorkflowConfig> {
    let base = preset(workflow_name)?;
    match overrides {
        Some(overrides) => overrides.apply(base),
        None => Ok(base),
    }
}

/// Flatten an error's source chain for the dead-letter record.
fn error_chain(error: &OcrFlowError) -> Vec<String> {
    let mut chain = vec![error.to_string()];
    let mut source = std::error::Error::source(error);
    while let Some(cause) = source {
        chain.push(cause.to_string());
        source = cause.source();
    }
    chain
}
