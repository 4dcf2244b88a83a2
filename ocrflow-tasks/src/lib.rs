//! ABOUTME: Background task shell for ocrflow
//! ABOUTME: Named queues, bounded retries, dead-letter handoff, and the caller surface

pub mod api;
pub mod runner;
pub mod types;

pub use api::OrchestratorHandle;
pub use runner::TaskRunner;
pub use types::{
    queues, DeadLetter, RunSummary, TaskEnvelope, TaskPayload, TaskState, TaskStatus,
};
