//! ABOUTME: The workflow engine: primary attempt, fallback fan-out, selection, document update
//! ABOUTME: Enforces the total-timeout budget with cooperative cancellation across attempts

use chrono::Utc;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use ocrflow_config::{EngineConfig, WorkflowConfig};
use ocrflow_core::{
    AnalyzeFeature, EngineAttempt, ErrorCategory, ExecutionStatus, OcrFlowError, Result, Run,
    WorkflowExecution,
};
use ocrflow_engines::rate_limit::RateLimiterRegistry;
use ocrflow_engines::EngineProvider;
use ocrflow_storage::{MetricsCollector, RunMetrics, RunStore};

use crate::breaker::BreakerRegistry;
use crate::progress::{ProgressEvent, ProgressSender, WorkflowState};
use crate::quality::evaluate;
use crate::selector::select_best_run;

/// Advisory feature set requested from every driver.
const DEFAULT_FEATURES: &[AnalyzeFeature] = &[AnalyzeFeature::Tables, AnalyzeFeature::Forms];

/// Outcome of one engine attempt.
struct AttemptResult {
    attempt: EngineAttempt,
    run_id: Option<i64>,
    passed_quality: bool,
    deadline_hit: bool,
    /// Canonical text of a completed result, kept in memory so the
    /// document update does not depend on the blob store.
    extracted_text: Option<String>,
}

impl AttemptResult {
    fn failed(attempt: EngineAttempt, run_id: Option<i64>) -> Self {
        Self {
            attempt,
            run_id,
            passed_quality: false,
            deadline_hit: false,
            extracted_text: None,
        }
    }
}

/// The orchestrator. Dependencies are explicit and wired once by the
/// composition root.
pub struct WorkflowEngine {
    engines: Arc<dyn EngineProvider>,
    run_store: Arc<RunStore>,
    metrics: Arc<MetricsCollector>,
    breakers: Arc<BreakerRegistry>,
    rate_limits: Arc<RateLimiterRegistry>,
    progress: ProgressSender,
}

/// Builder for [`WorkflowEngine`].
pub struct WorkflowEngineBuilder {
    engines: Arc<dyn EngineProvider>,
    run_store: Arc<RunStore>,
    metrics: Arc<MetricsCollector>,
    breakers: Arc<BreakerRegistry>,
    rate_limits: Option<Arc<RateLimiterRegistry>>,
    progress: ProgressSender,
}

impl WorkflowEngineBuilder {
    pub fn new(
        engines: Arc<dyn EngineProvider>,
        run_store: Arc<RunStore>,
        metrics: Arc<MetricsCollector>,
        breakers: Arc<BreakerRegistry>,
    ) -> Self {
        Self {
            engines,
            run_store,
            metrics,
            breakers,
            rate_limits: None,
            progress: ProgressSender::disabled(),
        }
    }

    #[must_use]
    pub fn with_rate_limits(mut self, rate_limits: Arc<RateLimiterRegistry>) -> Self {
        self.rate_limits = Some(rate_limits);
        self
    }

    #[must_use]
    pub fn with_progress(mut self, progress: ProgressSender) -> Self {
        self.progress = progress;
        self
    }

    #[must_use]
    pub fn build(self) -> WorkflowEngine {
        WorkflowEngine {
            engines: self.engines,
            run_store: self.run_store,
            metrics: self.metrics,
            breakers: self.breakers,
            rate_limits: self
                .rate_limits
                .unwrap_or_else(|| Arc::new(RateLimiterRegistry::new())),
            progress: self.progress,
        }
    }
}

impl WorkflowEngine {
    /// Run the full workflow for one document.
    ///
    /// Configuration errors are returned as `Err` before any engine runs.
    /// Engine-level failures never abort the orchestration; they surface
    /// in the returned execution, whose terminal status is `Failed` when
    /// no engine produced a completed run (with a composite error naming
    /// every failed engine), `PartiallyCompleted` when a winner exists but
    /// the document update failed, and `Completed` otherwise.
    pub async fn run_workflow(
        &self,
        document_id: i64,
        document_path: &Path,
        config: &WorkflowConfig,
    ) -> Result<WorkflowExecution> {
        self.run_workflow_with_cancel(document_id, document_path, config, CancellationToken::new())
            .await
    }

    /// [`run_workflow`](Self::run_workflow) with an externally owned
    /// cancellation token. The task shell cancels it on revocation;
    /// in-flight driver calls abort, their runs are marked cancelled, and
    /// the execution proceeds to selection with whatever completed.
    pub async fn run_workflow_with_cancel(
        &self,
        document_id: i64,
        document_path: &Path,
        config: &WorkflowConfig,
        cancel: CancellationToken,
    ) -> Result<WorkflowExecution> {
        config.validate()?;
        // Fail fast on unknown documents before creating any run.
        let document = self.run_store.get_document(document_id).await?;

        let mut execution = WorkflowExecution::new(&config.id, document_id);
        let deadline = Instant::now() + config.total_timeout();

        info!(
            execution_id = %execution.execution_id,
            workflow = %config.id,
            document_id,
            engines = config.fallbacks.len() + 1,
            "workflow started"
        );

        // Primary phase.
        execution.transition_to(ExecutionStatus::RunningPrimary);
        self.emit_progress(&execution, WorkflowState::RunningPrimary, Some(&config.primary), "primary engine running");
        let mut texts: HashMap<i64, String> = HashMap::new();
        let primary = self
            .run_engine_attempt(document_id, document_path, config, &config.primary, &cancel, deadline)
            .await;
        let primary_passed = primary.passed_quality;
        if primary.deadline_hit {
            self.note_budget_exceeded(&mut execution);
        }
        if let (Some(run_id), Some(text)) = (primary.run_id, primary.extracted_text.clone()) {
            texts.insert(run_id, text);
        }
        execution.record_attempt(primary.attempt.clone());

        // Decision + fallback phase.
        if primary_passed && config.stop_on_success {
            execution.transition_to(ExecutionStatus::PrimaryPassedStopping);
        } else if config.fallbacks.is_empty() {
            // Nothing to fan out to.
        } else {
            execution.transition_to(ExecutionStatus::RunningFallbacks);
            self.emit_progress(&execution, WorkflowState::RunningFallbacks, None, "running fallback engines");
            if config.parallel_fallbacks {
                self.run_fallbacks_parallel(document_id, document_path, config, &cancel, deadline, &mut execution, &mut texts)
                    .await;
            } else {
                self.run_fallbacks_sequential(document_id, document_path, config, &cancel, deadline, &mut execution, &mut texts)
                    .await;
            }
        }

        // Selection phase.
        execution.transition_to(ExecutionStatus::Selecting);
        self.emit_progress(&execution, WorkflowState::Selecting, None, "selecting winning run");

        let run_ids: Vec<i64> = execution.attempts.iter().filter_map(|a| a.run_id).collect();
        let all_runs = self.run_store.runs_for_document(document_id).await?;
        let execution_runs: Vec<Run> = all_runs
            .into_iter()
            .filter(|r| run_ids.contains(&r.id))
            .collect();

        // Page count may have been learned during processing.
        let document = self
            .run_store
            .get_document(document_id)
            .await
            .unwrap_or(document);

        let winner = select_best_run(
            &execution_runs,
            document.page_count,
            config.result_selection_strategy,
        )
        .cloned();

        match winner {
            None => {
                let composite = composite_failure(&execution);
                warn!(execution_id = %execution.execution_id, error = %composite, "workflow failed");
                execution.error = Some(composite);
                execution.transition_to(ExecutionStatus::Failed);
            }
            Some(run) => {
                execution.selected_run_id = Some(run.id);
                execution.selected_engine = Some(run.engine_kind);

                let text = self.winning_text(&run, &texts).await;
                match self
                    .run_store
                    .update_document_selection(document_id, &text, run.engine_kind, run.id, Utc::now())
                    .await
                {
                    Ok(()) => {
                        execution.transition_to(ExecutionStatus::Completed);
                        info!(
                            execution_id = %execution.execution_id,
                            run_id = run.id,
                            engine = %run.engine_kind,
                            "workflow completed"
                        );
                    }
                    Err(e) => {
                        warn!(execution_id = %execution.execution_id, error = %e, "document update failed");
                        execution.error = Some(format!("document update failed: {e}"));
                        execution.transition_to(ExecutionStatus::PartiallyCompleted);
                    }
                }
            }
        }

        self.emit_progress(&execution, WorkflowState::Finished, None, "workflow finished");
        Ok(execution)
    }

    /// Primary phase as a standalone step, for deployments that split the
    /// workflow across tasks. Produces the same run rows as the in-process
    /// path.
    pub async fn run_primary_phase(
        &self,
        document_id: i64,
        document_path: &Path,
        config: &WorkflowConfig,
    ) -> Result<WorkflowExecution> {
        config.validate()?;
        self.run_store.get_document(document_id).await?;

        let mut execution = WorkflowExecution::new(&config.id, document_id);
        let deadline = Instant::now() + config.total_timeout();
        let cancel = CancellationToken::new();

        execution.transition_to(ExecutionStatus::RunningPrimary);
        let primary = self
            .run_engine_attempt(document_id, document_path, config, &config.primary, &cancel, deadline)
            .await;
        let passed = primary.passed_quality;
        execution.record_attempt(primary.attempt);
        if passed && config.stop_on_success {
            execution.transition_to(ExecutionStatus::PrimaryPassedStopping);
        }
        Ok(execution)
    }

    /// Fallback phase plus selection as a standalone step, for
    /// deployments that split the workflow across tasks. Selection runs
    /// over every completed run of the document, so a primary run created
    /// by an earlier task participates.
    pub async fn run_fallback_phase(
        &self,
        document_id: i64,
        document_path: &Path,
        config: &WorkflowConfig,
    ) -> Result<WorkflowExecution> {
        config.validate()?;
        let document = self.run_store.get_document(document_id).await?;

        let mut execution = WorkflowExecution::new(&config.id, document_id);
        let deadline = Instant::now() + config.total_timeout();
        let cancel = CancellationToken::new();
        let mut texts: HashMap<i64, String> = HashMap::new();

        execution.transition_to(ExecutionStatus::RunningFallbacks);
        if config.parallel_fallbacks {
            self.run_fallbacks_parallel(document_id, document_path, config, &cancel, deadline, &mut execution, &mut texts)
                .await;
        } else {
            self.run_fallbacks_sequential(document_id, document_path, config, &cancel, deadline, &mut execution, &mut texts)
                .await;
        }

        execution.transition_to(ExecutionStatus::Selecting);
        let all_runs = self.run_store.runs_for_document(document_id).await?;
        let document = self
            .run_store
            .get_document(document_id)
            .await
            .unwrap_or(document);
        let winner = select_best_run(
            &all_runs,
            document.page_count,
            config.result_selection_strategy,
        )
        .cloned();

        match winner {
            None => {
                execution.error = Some(composite_failure(&execution));
                execution.transition_to(ExecutionStatus::Failed);
            }
            Some(run) => {
                execution.selected_run_id = Some(run.id);
                execution.selected_engine = Some(run.engine_kind);
                let text = self.winning_text(&run, &texts).await;
                match self
                    .run_store
                    .update_document_selection(document_id, &text, run.engine_kind, run.id, Utc::now())
                    .await
                {
                    Ok(()) => execution.transition_to(ExecutionStatus::Completed),
                    Err(e) => {
                        execution.error = Some(format!("document update failed: {e}"));
                        execution.transition_to(ExecutionStatus::PartiallyCompleted);
                    }
                }
            }
        }
        Ok(execution)
    }

    async fn run_fallbacks_sequential(
        &self,
        document_id: i64,
        document_path: &Path,
        config: &WorkflowConfig,
        cancel: &CancellationToken,
        deadline: Instant,
        execution: &mut WorkflowExecution,
        texts: &mut HashMap<i64, String>,
    ) {
        for fallback in &config.fallbacks {
            if cancel.is_cancelled() {
                break;
            }
            if Instant::now() >= deadline {
                self.note_budget_exceeded(execution);
                break;
            }
            self.emit_progress(
                execution,
                WorkflowState::RunningFallbacks,
                Some(fallback),
                "fallback engine running",
            );
            let result = self
                .run_engine_attempt(document_id, document_path, config, fallback, cancel, deadline)
                .await;
            let passed = result.passed_quality;
            if result.deadline_hit {
                self.note_budget_exceeded(execution);
            }
            if let (Some(run_id), Some(text)) = (result.run_id, result.extracted_text) {
                texts.insert(run_id, text);
            }
            execution.record_attempt(result.attempt);
            if passed && config.stop_on_success {
                break;
            }
        }
    }

    async fn run_fallbacks_parallel(
        &self,
        document_id: i64,
        document_path: &Path,
        config: &WorkflowConfig,
        cancel: &CancellationToken,
        deadline: Instant,
        execution: &mut WorkflowExecution,
        texts: &mut HashMap<i64, String>,
    ) {
        let permits = (config.max_parallel_engines.saturating_sub(1)).max(1) as usize;
        let semaphore = Arc::new(Semaphore::new(permits));

        let attempts = config.fallbacks.iter().map(|fallback| {
            let semaphore = Arc::clone(&semaphore);
            async move {
                let _permit = semaphore.acquire().await.ok()?;
                if cancel.is_cancelled() || Instant::now() >= deadline {
                    return None;
                }
                Some(
                    self.run_engine_attempt(
                        document_id,
                        document_path,
                        config,
                        fallback,
                        cancel,
                        deadline,
                    )
                    .await,
                )
            }
        });

        let results = futures::future::join_all(attempts).await;
        for result in results {
            match result {
                Some(result) => {
                    if result.deadline_hit {
                        self.note_budget_exceeded(execution);
                    }
                    if let (Some(run_id), Some(text)) = (result.run_id, result.extracted_text) {
                        texts.insert(run_id, text);
                    }
                    execution.record_attempt(result.attempt);
                }
                None => {
                    if Instant::now() >= deadline {
                        self.note_budget_exceeded(execution);
                    }
                }
            }
        }
    }

    /// One driver invocation: gate, create the run, invoke under the
    /// engine timeout and the shared deadline, finalize the run, and
    /// evaluate quality.
    async fn run_engine_attempt(
        &self,
        document_id: i64,
        document_path: &Path,
        config: &WorkflowConfig,
        engine_config: &EngineConfig,
        cancel: &CancellationToken,
        deadline: Instant,
    ) -> AttemptResult {
        let mut attempt = EngineAttempt::started(engine_config.kind, &engine_config.display_name);
        let retry_policy = config.effective_retry_policy(engine_config);

        // Driver construction failures are configuration errors with no
        // run row: no driver invocation ever started.
        let driver = match self.engines.acquire(engine_config, &retry_policy).await {
            Ok(driver) => driver,
            Err(e) => {
                warn!(engine = %engine_config.kind, error = %e, "driver unavailable");
                attempt.category = Some(e.category());
                attempt.error = Some(e.to_string());
                attempt.completed_at = Some(Utc::now());
                return AttemptResult::failed(attempt, None);
            }
        };

        let snapshot = serde_json::to_value(engine_config).unwrap_or(serde_json::Value::Null);
        let run_id = match self
            .run_store
            .create_run(document_id, engine_config.kind, &snapshot)
            .await
        {
            Ok(run_id) => run_id,
            Err(e) => {
                attempt.category = Some(e.category());
                attempt.error = Some(e.to_string());
                attempt.completed_at = Some(Utc::now());
                return AttemptResult::failed(attempt, None);
            }
        };
        attempt.run_id = Some(run_id);

        // Gates: breaker, then the per-engine rate cap. Gated calls still
        // leave a terminal run row.
        let gate_result = if config.circuit_breaker.enabled {
            self.breakers.allow(engine_config.kind)
        } else {
            Ok(())
        };
        let gate_result = gate_result.and_then(|()| self.rate_limits.check(engine_config.kind));
        if let Err(e) = gate_result {
            let category = e.category();
            let _ = self.run_store.fail_run(run_id, &e.to_string()).await;
            self.metrics
                .record_failure(engine_config.kind, std::time::Duration::ZERO);
            self.breakers.record_failure(engine_config.kind, category);
            attempt.category = Some(category);
            attempt.error = Some(e.to_string());
            attempt.completed_at = Some(Utc::now());
            return AttemptResult::failed(attempt, Some(run_id));
        }

        if let Err(e) = self.run_store.mark_running(run_id).await {
            attempt.category = Some(e.category());
            attempt.error = Some(e.to_string());
            attempt.completed_at = Some(Utc::now());
            return AttemptResult::failed(attempt, Some(run_id));
        }

        let invocation_started = Instant::now();
        let mut deadline_hit = false;
        let outcome = tokio::select! {
            result = tokio::time::timeout(engine_config.timeout(), driver.analyze(document_path, DEFAULT_FEATURES)) => {
                match result {
                    Ok(inner) => inner,
                    Err(_) => Err(OcrFlowError::transient(
                        format!("engine timeout of {}s exceeded", engine_config.timeout_seconds),
                        engine_config.kind.as_str(),
                    )),
                }
            }
            () = cancel.cancelled() => Err(OcrFlowError::cancelled("workflow cancelled")),
            () = tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)) => {
                deadline_hit = true;
                cancel.cancel();
                Err(OcrFlowError::cancelled("total workflow timeout reached"))
            }
        };
        let latency = invocation_started.elapsed();

        match outcome {
            Ok(result) => {
                let cost = driver.estimate_cost(result.page_count);
                let metrics = RunMetrics::from_result(&result, cost);
                let thresholds = config.effective_thresholds(engine_config);
                let evaluation = evaluate(&result, &thresholds);

                if result.page_count > 0 {
                    let _ = self
                        .run_store
                        .update_document_page_count(document_id, result.page_count as i64)
                        .await;
                }

                match self.run_store.complete_run(run_id, &result, &metrics).await {
                    Ok(_) => {
                        self.metrics.record_success(
                            engine_config.kind,
                            latency,
                            result.confidence,
                            cost,
                        );
                        self.breakers.record_success(engine_config.kind);
                        attempt.passed_quality = Some(evaluation.passed);
                        attempt.completed_at = Some(Utc::now());
                        info!(
                            engine = %engine_config.kind,
                            run_id,
                            passed = evaluation.passed,
                            quality_score = evaluation.quality_score,
                            "engine attempt finished"
                        );
                        AttemptResult {
                            attempt,
                            run_id: Some(run_id),
                            passed_quality: evaluation.passed,
                            deadline_hit,
                            extracted_text: Some(result.text.clone()),
                        }
                    }
                    Err(e) => {
                        attempt.category = Some(e.category());
                        attempt.error = Some(e.to_string());
                        attempt.completed_at = Some(Utc::now());
                        AttemptResult {
                            attempt,
                            run_id: Some(run_id),
                            passed_quality: false,
                            deadline_hit,
                            extracted_text: None,
                        }
                    }
                }
            }
            Err(e) => {
                let category = e.category();
                let message = e.to_string();
                if category == ErrorCategory::Cancelled {
                    let _ = self.run_store.cancel_run(run_id, &message).await;
                } else {
                    let _ = self.run_store.fail_run(run_id, &message).await;
                }
                self.metrics.record_failure(engine_config.kind, latency);
                self.breakers.record_failure(engine_config.kind, category);
                attempt.category = Some(category);
                attempt.error = Some(message.clone());
                attempt.completed_at = Some(Utc::now());
                warn!(engine = %engine_config.kind, run_id, category = %category, error = %message, "engine attempt failed");
                AttemptResult {
                    attempt,
                    run_id: Some(run_id),
                    passed_quality: false,
                    deadline_hit,
                    extracted_text: None,
                }
            }
        }
    }

    /// Extracted text for the winning run: the in-memory canonical text
    /// when this execution produced it, else recovered from the persisted
    /// raw response. Selection metadata never depends on it.
    async fn winning_text(&self, run: &Run, texts: &HashMap<i64, String>) -> String {
        if let Some(text) = texts.get(&run.id) {
            return text.clone();
        }
        let Some(path) = &run.raw_response_path else {
            return String::new();
        };
        match self.run_store.blobs().download(path).await {
            Ok(bytes) => extract_text_from_raw(&bytes),
            Err(e) => {
                warn!(run_id = run.id, error = %e, "cannot read winning raw response");
                String::new()
            }
        }
    }

    fn note_budget_exceeded(&self, execution: &mut WorkflowExecution) {
        const WARNING: &str = "total timeout budget reached; remaining engines skipped";
        if !execution.warnings.iter().any(|w| w == WARNING) {
            warn!(execution_id = %execution.execution_id, "{WARNING}");
            execution.add_warning(WARNING);
        }
    }

    fn emit_progress(
        &self,
        execution: &WorkflowExecution,
        state: WorkflowState,
        current: Option<&EngineConfig>,
        message: &str,
    ) {
        let total = execution.attempts.len().max(1) as f64;
        let finished = execution
            .attempts
            .iter()
            .filter(|a| a.completed_at.is_some())
            .count() as f64;
        self.progress.emit(ProgressEvent {
            state,
            current_engine: current.map(|c| c.kind.to_string()),
            engines_completed: execution
                .engines_completed()
                .iter()
                .map(ToString::to_string)
                .collect(),
            engines_failed: execution
                .engines_failed()
                .iter()
                .map(|(engine, _)| engine.to_string())
                .collect(),
            progress: (finished / total).clamp(0.0, 1.0),
            message: message.to_string(),
        });
    }
}

/// Composite failure naming each failed engine and its category.
fn composite_failure(execution: &WorkflowExecution) -> String {
    let mut parts = Vec::new();
    for attempt in &execution.attempts {
        if attempt.succeeded() {
            continue;
        }
        let category = attempt
            .category
            .map_or("UNKNOWN", |category| category.as_str());
        let error = attempt.error.as_deref().unwrap_or("no detail");
        parts.push(format!("{} [{category}]: {error}", attempt.engine_kind));
    }
    if parts.is_empty() {
        "no engine produced a usable result".to_string()
    } else {
        format!("all engines failed: {}", parts.join("; "))
    }
}

/// Pull the canonical text back out of a persisted raw response. Knows
/// the shapes the drivers store; anything else yields empty text.
fn extract_text_from_raw(bytes: &[u8]) -> String {
    let Ok(value) = serde_json::from_slice::<serde_json::Value>(bytes) else {
        return String::new();
    };
    // Azure: analyzeResult.content. Google: document.text.
    for pointer in ["/analyzeResult/content", "/document/text"] {
        if let Some(text) = value.pointer(pointer).and_then(|t| t.as_str()) {
            return text.to_string();
        }
    }
    // Mistral: pages[].markdown.
    if let Some(pages) = value.get("pages").and_then(|p| p.as_array()) {
        let texts: Vec<&str> = pages
            .iter()
            .filter_map(|p| p.get("markdown").and_then(|m| m.as_str()))
            .collect();
        if !texts.is_empty() {
            return texts.join("\n");
        }
    }
    // Tesseract/paddle wrappers: words[].text or regions[].text.
    for key in ["words", "regions"] {
        if let Some(items) = value.get(key).and_then(|w| w.as_array()) {
            let texts: Vec<&str> = items
                .iter()
                .filter_map(|w| w.get("text").and_then(|t| t.as_str()))
                .collect();
            if !texts.is_empty() {
                return texts.join(" ");
            }
        }
    }
    // Textract projection: array of blocks with LINE text.
    if let Some(blocks) = value.as_array() {
        let texts: Vec<&str> = blocks
            .iter()
            .filter(|b| b.get("block_type").and_then(|t| t.as_str()) == Some("LINE"))
            .filter_map(|b| b.get("text").and_then(|t| t.as_str()))
            .collect();
        if !texts.is_empty() {
            return texts.join("\n");
        }
    }
    String::new()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ocrflow_core::EngineKind;

    #[test]
    fn test_composite_failure_names_engines_and_categories() {
        let mut execution = WorkflowExecution::new("azure_primary", 1);
        let mut a = EngineAttempt::started(EngineKind::Azure, "Azure Document Intelligence");
        a.category = Some(ErrorCategory::Permanent);
        a.error = Some("bad credentials".into());
        execution.record_attempt(a);
        let mut b = EngineAttempt::started(EngineKind::Google, "Google Document AI");
        b.category = Some(ErrorCategory::Transient);
        b.error = Some("503".into());
        execution.record_attempt(b);

        let composite = composite_failure(&execution);
        assert!(composite.contains("azure [PERMANENT]: bad credentials"));
        assert!(composite.contains("google [TRANSIENT]: 503"));
    }

    #[test]
    fn test_extract_text_known_shapes() {
        let azure = serde_json::json!({"analyzeResult": {"content": "azure text"}});
        assert_eq!(
            extract_text_from_raw(&serde_json::to_vec(&azure).unwrap()),
            "azure text"
        );

        let google = serde_json::json!({"document": {"text": "google text"}});
        assert_eq!(
            extract_text_from_raw(&serde_json::to_vec(&google).unwrap()),
            "google text"
        );

        let mistral = serde_json::json!({"pages": [{"markdown": "m1"}, {"markdown": "m2"}]});
        assert_eq!(
            extract_text_from_raw(&serde_json::to_vec(&mistral).unwrap()),
            "m1\nm2"
        );

        let tesseract = serde_json::json!({"words": [{"text": "a"}, {"text": "b"}]});
        assert_eq!(
            extract_text_from_raw(&serde_json::to_vec(&tesseract).unwrap()),
            "a b"
        );

        assert_eq!(extract_text_from_raw(b"not json"), "");
    }
}
