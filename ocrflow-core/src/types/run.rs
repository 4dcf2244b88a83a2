//! ABOUTME: Durable run records, one per driver invocation against a document
//! ABOUTME: Status lifecycle plus summary metrics surfaced to the selector

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::EngineKind;
use crate::error::OcrFlowError;

/// Lifecycle status of a run. Every run ends in exactly one of
/// `Completed`, `Failed`, or `Cancelled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl std::str::FromStr for RunStatus {
    type Err = OcrFlowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(OcrFlowError::validation(
                format!("unknown run status: {other}"),
                "status",
            )),
        }
    }
}

/// A persistent record of one driver invocation against one document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub id: i64,
    pub document_id: i64,
    pub engine_kind: EngineKind,
    /// Snapshot of the engine config at invocation time.
    pub engine_config_snapshot: serde_json::Value,
    pub status: RunStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub latency_ms: Option<i64>,
    pub confidence_mean: Option<f64>,
    pub pages_parsed: Option<i64>,
    pub word_count: Option<i64>,
    pub table_count: Option<i64>,
    /// Estimated cost; null for engines without a declared pricing function.
    pub cost_cents: Option<f64>,
    pub error_message: Option<String>,
    /// Blob pointer; null if the driver failed before producing a response
    /// or the blob write failed.
    pub raw_response_path: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Run {
    /// Confidence with missing values treated as zero, for selection math.
    #[must_use]
    pub fn confidence_or_zero(&self) -> f64 {
        self.confidence_mean.unwrap_or(0.0)
    }

    /// Pages parsed with missing values treated as zero.
    #[must_use]
    pub fn pages_or_zero(&self) -> i64 {
        self.pages_parsed.unwrap_or(0)
    }

    /// Word count with missing values treated as zero.
    #[must_use]
    pub fn words_or_zero(&self) -> i64 {
        self.word_count.unwrap_or(0)
    }

    /// Table count with missing values treated as zero.
    #[must_use]
    pub fn tables_or_zero(&self) -> i64 {
        self.table_count.unwrap_or(0)
    }
}
