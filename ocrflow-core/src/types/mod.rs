//! ABOUTME: Canonical value types shared across the orchestrator
//! ABOUTME: Engine tags, OCR results, run records, documents, and execution snapshots

mod document;
mod engine;
mod execution;
mod result;
mod run;

pub use document::Document;
pub use engine::{AnalyzeFeature, EngineKind};
pub use execution::{EngineAttempt, ExecutionStatus, WorkflowExecution};
pub use result::{KeyValuePair, OcrResult, OcrTable, TableCell};
pub use run::{Run, RunStatus};

/// Serde helper for `std::time::Duration` represented as whole milliseconds.
pub mod duration_ms {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        (value.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let ms = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(ms))
    }
}
