//! ABOUTME: Progress events emitted while an execution advances
//! ABOUTME: Consumed by the task shell to report state to callers

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::debug;

/// Coarse workflow state for progress reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowState {
    Starting,
    RunningPrimary,
    RunningFallbacks,
    Selecting,
    Finished,
}

/// One progress update.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub state: WorkflowState,
    pub current_engine: Option<String>,
    pub engines_completed: Vec<String>,
    pub engines_failed: Vec<String>,
    /// Fraction of engine attempts finished, in [0,1].
    pub progress: f64,
    pub message: String,
}

/// Fire-and-forget progress emitter. A closed receiver never blocks the
/// workflow.
#[derive(Debug, Clone)]
pub struct ProgressSender {
    tx: Option<mpsc::UnboundedSender<ProgressEvent>>,
}

impl ProgressSender {
    /// An emitter that drops every event.
    #[must_use]
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    /// An emitter feeding a channel.
    #[must_use]
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ProgressEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    pub fn emit(&self, event: ProgressEvent) {
        debug!(state = ?event.state, progress = event.progress, "{}", event.message);
        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_sender_never_fails() {
        let sender = ProgressSender::disabled();
        sender.emit(ProgressEvent {
            state: WorkflowState::Starting,
            current_engine: None,
            engines_completed: vec![],
            engines_failed: vec![],
            progress: 0.0,
            message: "starting".into(),
        });
    }

    #[tokio::test]
    async fn test_channel_delivers_events() {
        let (sender, mut rx) = ProgressSender::channel();
        sender.emit(ProgressEvent {
            state: WorkflowState::RunningPrimary,
            current_engine: Some("azure".into()),
            engines_completed: vec![],
            engines_failed: vec![],
            progress: 0.25,
            message: "primary started".into(),
        });
        let event = rx.recv().await.unwrap();
        assert_eq!(event.state, WorkflowState::RunningPrimary);
        assert_eq!(event.current_engine.as_deref(), Some("azure"));
    }
}
