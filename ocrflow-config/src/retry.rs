//! ABOUTME: Retry policy value governing driver-internal retries
//! ABOUTME: Exponential backoff parameters and the categories eligible for retry

use serde::{Deserialize, Serialize};
use std::time::Duration;

use ocrflow_core::ErrorCategory;

/// Retry policy for driver invocations. Classification of retryable
/// errors is a function on the typed error category, not on error text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Maximum number of retries after the initial attempt.
    pub max_retries: u32,
    /// Exponential backoff factor.
    pub backoff_factor: f64,
    /// Maximum backoff between attempts, in seconds.
    pub backoff_max_seconds: u64,
    /// Categories eligible for retry.
    pub retryable_categories: Vec<ErrorCategory>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_factor: 2.0,
            backoff_max_seconds: 300,
            retryable_categories: vec![ErrorCategory::Transient],
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    #[must_use]
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// The backoff ceiling as a `Duration`.
    #[must_use]
    pub fn backoff_max(&self) -> Duration {
        Duration::from_secs(self.backoff_max_seconds)
    }

    /// Whether a failure of `category` may be retried under this policy.
    #[must_use]
    pub fn retries(&self, category: ErrorCategory) -> bool {
        self.max_retries > 0 && self.retryable_categories.contains(&category)
    }

    /// Backoff before retry number `attempt` (1-based), without jitter.
    #[must_use]
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        let base = Duration::from_secs(1);
        let factor = self.backoff_factor.max(1.0).powi(attempt.saturating_sub(1) as i32);
        let raw = base.mul_f64(factor);
        raw.min(self.backoff_max())
    }
}
