//! ABOUTME: Workflow orchestration for ocrflow
//! ABOUTME: Quality evaluation, deterministic selection, circuit breaking, and the engine

pub mod breaker;
pub mod engine;
pub mod progress;
pub mod quality;
pub mod selector;

pub use breaker::{BreakerRegistry, BreakerState};
pub use engine::{WorkflowEngine, WorkflowEngineBuilder};
pub use progress::{ProgressEvent, ProgressSender, WorkflowState};
pub use quality::{evaluate, QualityEvaluation};
pub use selector::select_best_run;
