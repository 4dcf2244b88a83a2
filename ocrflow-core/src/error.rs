//! ABOUTME: Error types and handling for ocrflow
//! ABOUTME: Provides the OcrFlowError enum, ErrorCategory routing tags, and Result alias

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Routing category attached to every failure the orchestrator emits.
///
/// Categories drive retry and fallback decisions: drivers retry `Transient`
/// failures under their retry policy, the workflow engine routes across
/// engines on any failure, and the task shell retries whole-task errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCategory {
    /// Bad workflow config, missing credentials, duplicate engines. Fatal to the execution.
    Configuration,
    /// Network, rate-limit, 5xx, provider timeout. Retried by the driver.
    Transient,
    /// Invalid input, auth failure, unsupported format. Not retried.
    Permanent,
    /// The driver succeeded but the result did not meet thresholds.
    QualityFail,
    /// Total-timeout budget exceeded or task revocation.
    Cancelled,
    /// Short-circuited by the circuit breaker. Routed like a transient
    /// failure but never retried by the driver.
    BreakerOpen,
}

impl ErrorCategory {
    /// Whether a driver may retry a failure of this category internally.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient)
    }

    /// Stable tag used in logs and run records.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Configuration => "CONFIGURATION",
            Self::Transient => "TRANSIENT",
            Self::Permanent => "PERMANENT",
            Self::QualityFail => "QUALITY_FAIL",
            Self::Cancelled => "CANCELLED",
            Self::BreakerOpen => "BREAKER_OPEN",
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Comprehensive error enum for all ocrflow operations
#[derive(Debug, Error)]
pub enum OcrFlowError {
    #[error("Configuration error: {message}")]
    Configuration {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Engine error ({category}): {message}")]
    Engine {
        message: String,
        /// Engine kind tag, when the failure is attributable to one driver.
        engine: Option<String>,
        category: ErrorCategory,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Preprocessing error: {message}")]
    Preprocess {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Storage error: {message}")]
    Storage {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Workflow execution error: {message}")]
    Workflow {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Task error: {message}")]
    Task {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Validation error: {message}")]
    Validation {
        message: String,
        /// Field that failed validation, if known.
        field: Option<String>,
    },

    #[error("Operation cancelled: {message}")]
    Cancelled { message: String },
}

impl OcrFlowError {
    /// Build a configuration error from a message.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
            source: None,
        }
    }

    /// Build an engine error with an explicit category.
    pub fn engine(
        message: impl Into<String>,
        engine: impl Into<String>,
        category: ErrorCategory,
    ) -> Self {
        Self::Engine {
            message: message.into(),
            engine: Some(engine.into()),
            category,
            source: None,
        }
    }

    /// Build a transient engine error.
    pub fn transient(message: impl Into<String>, engine: impl Into<String>) -> Self {
        Self::engine(message, engine, ErrorCategory::Transient)
    }

    /// Build a permanent engine error.
    pub fn permanent(message: impl Into<String>, engine: impl Into<String>) -> Self {
        Self::engine(message, engine, ErrorCategory::Permanent)
    }

    /// Build a storage error from a message.
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
            source: None,
        }
    }

    /// Build a workflow error from a message.
    pub fn workflow(message: impl Into<String>) -> Self {
        Self::Workflow {
            message: message.into(),
            source: None,
        }
    }

    /// Build a task error from a message.
    pub fn task(message: impl Into<String>) -> Self {
        Self::Task {
            message: message.into(),
            source: None,
        }
    }

    /// Build a validation error naming the failing field.
    pub fn validation(message: impl Into<String>, field: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Build a cancellation error.
    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::Cancelled {
            message: message.into(),
        }
    }

    /// Attach an underlying cause.
    #[must_use]
    pub fn with_source(mut self, cause: impl std::error::Error + Send + Sync + 'static) -> Self {
        match &mut self {
            Self::Configuration { source, .. }
            | Self::Engine { source, .. }
            | Self::Preprocess { source, .. }
            | Self::Storage { source, .. }
            | Self::Workflow { source, .. }
            | Self::Task { source, .. } => *source = Some(Box::new(cause)),
            Self::Validation { .. } | Self::Cancelled { .. } => {}
        }
        self
    }

    /// Routing category of this error.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Configuration { .. } | Self::Validation { .. } => ErrorCategory::Configuration,
            Self::Engine { category, .. } => *category,
            Self::Cancelled { .. } => ErrorCategory::Cancelled,
            // Infrastructure failures are worth another attempt.
            Self::Preprocess { .. } | Self::Storage { .. } | Self::Workflow { .. } | Self::Task { .. } => {
                ErrorCategory::Transient
            }
        }
    }

    /// Whether a driver may retry this error internally.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.category().is_retryable()
    }
}

/// Convenience Result type alias
pub type Result<T> = std::result::Result<T, OcrFlowError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_tags() {
        assert_eq!(ErrorCategory::Transient.as_str(), "TRANSIENT");
        assert_eq!(ErrorCategory::BreakerOpen.as_str(), "BREAKER_OPEN");
        assert_eq!(ErrorCategory::QualityFail.as_str(), "QUALITY_FAIL");
    }

    #[test]
    fn test_only_transient_is_retryable() {
        assert!(ErrorCategory::Transient.is_retryable());
        assert!(!ErrorCategory::Permanent.is_retryable());
        assert!(!ErrorCategory::BreakerOpen.is_retryable());
        assert!(!ErrorCategory::Cancelled.is_retryable());
        assert!(!ErrorCategory::Configuration.is_retryable());
    }

    #[test]
    fn test_error_category_mapping() {
        let err = OcrFlowError::transient("503 from upstream", "azure");
        assert_eq!(err.category(), ErrorCategory::Transient);
        assert!(err.is_retryable());

        let err = OcrFlowError::permanent("bad credentials", "google");
        assert_eq!(err.category(), ErrorCategory::Permanent);
        assert!(!err.is_retryable());

        let err = OcrFlowError::configuration("unknown preset: foo");
        assert_eq!(err.category(), ErrorCategory::Configuration);

        let err = OcrFlowError::cancelled("budget exceeded");
        assert_eq!(err.category(), ErrorCategory::Cancelled);
    }

    #[test]
    fn test_with_source_preserves_message() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err = OcrFlowError::storage("blob read failed").with_source(io);
        assert!(err.to_string().contains("blob read failed"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_category_serde_round_trip() {
        let json = serde_json::to_string(&ErrorCategory::BreakerOpen).unwrap();
        assert_eq!(json, "\"BREAKER_OPEN\"");
        let back: ErrorCategory = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ErrorCategory::BreakerOpen);
    }
}
