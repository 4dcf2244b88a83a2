//! ABOUTME: Transient workflow-execution snapshot aggregating the runs of one orchestration
//! ABOUTME: Execution state machine plus the per-engine attempt timeline

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::EngineKind;
use crate::error::ErrorCategory;

/// Execution states for one orchestration.
///
/// `initialized → running_primary → (primary_passed_stopping | running_fallbacks)
/// → selecting → (completed | partially_completed | failed)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Initialized,
    RunningPrimary,
    PrimaryPassedStopping,
    RunningFallbacks,
    Selecting,
    Completed,
    PartiallyCompleted,
    Failed,
}

impl ExecutionStatus {
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::PartiallyCompleted | Self::Failed
        )
    }

    /// Whether a transition to `next` is legal.
    #[must_use]
    pub const fn can_transition_to(&self, next: ExecutionStatus) -> bool {
        matches!(
            (self, next),
            (Self::Initialized, Self::RunningPrimary)
                | (Self::RunningPrimary, Self::PrimaryPassedStopping)
                | (Self::RunningPrimary, Self::RunningFallbacks)
                | (Self::RunningPrimary, Self::Selecting)
                | (Self::PrimaryPassedStopping, Self::Selecting)
                | (Self::RunningFallbacks, Self::Selecting)
                | (Self::Selecting, Self::Completed)
                | (Self::Selecting, Self::PartiallyCompleted)
                | (Self::Selecting, Self::Failed)
                // Configuration rejection fails before the primary starts.
                | (Self::Initialized, Self::Failed)
                // Split-task deployments run the fallback phase alone.
                | (Self::Initialized, Self::RunningFallbacks)
        )
    }
}

/// Outcome of one engine attempt inside an execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineAttempt {
    pub engine_kind: EngineKind,
    pub engine_name: String,
    /// Run row created for this attempt, if the attempt got that far.
    pub run_id: Option<i64>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Failure category, when the attempt did not complete.
    pub category: Option<ErrorCategory>,
    /// Quality verdict, when the driver returned a result.
    pub passed_quality: Option<bool>,
    pub error: Option<String>,
}

impl EngineAttempt {
    pub fn started(engine_kind: EngineKind, engine_name: impl Into<String>) -> Self {
        Self {
            engine_kind,
            engine_name: engine_name.into(),
            run_id: None,
            started_at: Utc::now(),
            completed_at: None,
            category: None,
            passed_quality: None,
            error: None,
        }
    }

    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.category.is_none() && self.error.is_none()
    }
}

/// Snapshot of one orchestration: the attempt timeline, terminal status,
/// and the selected run. Derived from run records plus an in-memory log;
/// the task shell serializes this as its task result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowExecution {
    pub execution_id: Uuid,
    pub workflow_id: String,
    pub document_id: i64,
    pub status: ExecutionStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub attempts: Vec<EngineAttempt>,
    pub selected_run_id: Option<i64>,
    pub selected_engine: Option<EngineKind>,
    /// Non-fatal conditions, e.g. the total-timeout budget being reached.
    pub warnings: Vec<String>,
    /// Terminal error description when the execution failed.
    pub error: Option<String>,
}

impl WorkflowExecution {
    pub fn new(workflow_id: impl Into<String>, document_id: i64) -> Self {
        Self {
            execution_id: Uuid::new_v4(),
            workflow_id: workflow_id.into(),
            document_id,
            status: ExecutionStatus::Initialized,
            started_at: Utc::now(),
            completed_at: None,
            attempts: Vec::new(),
            selected_run_id: None,
            selected_engine: None,
            warnings: Vec::new(),
            error: None,
        }
    }

    /// Advance the state machine, rejecting illegal transitions loudly in
    /// debug builds and tolerating them in release (the snapshot is
    /// advisory; runs are the durable record).
    pub fn transition_to(&mut self, next: ExecutionStatus) {
        debug_assert!(
            self.status.can_transition_to(next),
            "illegal execution transition {:?} -> {:?}",
            self.status,
            next
        );
        self.status = next;
        if next.is_terminal() {
            self.completed_at = Some(Utc::now());
        }
    }

    pub fn record_attempt(&mut self, attempt: EngineAttempt) {
        self.attempts.push(attempt);
    }

    pub fn add_warning(&mut self, warning: impl Into<String>) {
        self.warnings.push(warning.into());
    }

    /// Engines whose attempts completed without failure.
    #[must_use]
    pub fn engines_completed(&self) -> Vec<EngineKind> {
        self.attempts
            .iter()
            .filter(|a| a.succeeded())
            .map(|a| a.engine_kind)
            .collect()
    }

    /// Engines whose attempts failed, with their categories.
    #[must_use]
    pub fn engines_failed(&self) -> Vec<(EngineKind, Option<ErrorCategory>)> {
        self.attempts
            .iter()
            .filter(|a| !a.succeeded())
            .map(|a| (a.engine_kind, a.category))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_transitions() {
        let mut execution = WorkflowExecution::new("azure_primary", 1);
        execution.transition_to(ExecutionStatus::RunningPrimary);
        execution.transition_to(ExecutionStatus::PrimaryPassedStopping);
        execution.transition_to(ExecutionStatus::Selecting);
        execution.transition_to(ExecutionStatus::Completed);
        assert!(execution.status.is_terminal());
        assert!(execution.completed_at.is_some());
    }

    #[test]
    fn test_fallback_path_transitions() {
        assert!(ExecutionStatus::RunningPrimary.can_transition_to(ExecutionStatus::RunningFallbacks));
        assert!(ExecutionStatus::RunningFallbacks.can_transition_to(ExecutionStatus::Selecting));
        assert!(ExecutionStatus::Selecting.can_transition_to(ExecutionStatus::Failed));
        assert!(!ExecutionStatus::Completed.can_transition_to(ExecutionStatus::Selecting));
        assert!(!ExecutionStatus::Initialized.can_transition_to(ExecutionStatus::Selecting));
    }

    #[test]
    fn test_attempt_bookkeeping() {
        let mut execution = WorkflowExecution::new("azure_primary", 7);
        let mut ok = EngineAttempt::started(EngineKind::Azure, "Azure Document Intelligence");
        ok.run_id = Some(1);
        ok.passed_quality = Some(true);
        execution.record_attempt(ok);

        let mut failed = EngineAttempt::started(EngineKind::Google, "Google Document AI");
        failed.category = Some(ErrorCategory::Transient);
        failed.error = Some("503".into());
        execution.record_attempt(failed);

        assert_eq!(execution.engines_completed(), vec![EngineKind::Azure]);
        assert_eq!(
            execution.engines_failed(),
            vec![(EngineKind::Google, Some(ErrorCategory::Transient))]
        );
    }
}
