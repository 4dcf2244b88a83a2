//! ABOUTME: Explicit retry helper with exponential backoff and full jitter
//! ABOUTME: Retry eligibility is a function of the typed error category, never of message text

use rand::Rng;
use std::future::Future;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use ocrflow_config::RetryPolicy;
use ocrflow_core::Result;

/// Run `operation` under `policy`, bounded by `budget` of wall-clock time
/// including backoff sleeps. The closure receives the 1-based attempt
/// number.
///
/// Retries stop when the error category is not retryable under the
/// policy, the retry count is exhausted, or the next backoff would
/// overrun the budget. The last error is returned.
pub async fn retry_with_policy<F, Fut, T>(
    policy: &RetryPolicy,
    budget: Duration,
    operation_name: &str,
    mut operation: F,
) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let started = Instant::now();
    let mut attempt: u32 = 1;

    loop {
        match operation(attempt).await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(operation = operation_name, attempt, "retry succeeded");
                }
                return Ok(value);
            }
            Err(error) => {
                let category = error.category();
                let retries_used = attempt - 1;
                if !policy.retries(category) || retries_used >= policy.max_retries {
                    return Err(error);
                }

                let delay = jittered(policy.backoff_for_attempt(attempt));
                let elapsed = started.elapsed();
                if elapsed + delay >= budget {
                    warn!(
                        operation = operation_name,
                        attempt,
                        ?delay,
                        "retry budget exhausted"
                    );
                    return Err(error);
                }

                warn!(
                    operation = operation_name,
                    attempt,
                    category = %category,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "transient failure, backing off"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

/// Full jitter: uniform in (0, delay]. Prevents retry stampedes across
/// workers hammering the same recovering upstream.
fn jittered(delay: Duration) -> Duration {
    if delay.is_zero() {
        return delay;
    }
    let millis = delay.as_millis().max(1) as u64;
    let jittered = rand::thread_rng().gen_range(1..=millis);
    Duration::from_millis(jittered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ocrflow_core::{ErrorCategory, OcrFlowError};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            backoff_factor: 1.0,
            backoff_max_seconds: 1,
            retryable_categories: vec![ErrorCategory::Transient],
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_retried_until_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result = retry_with_policy(&fast_policy(3), Duration::from_secs(60), "test", |_| {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(OcrFlowError::transient("503", "azure"))
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: Result<()> =
            retry_with_policy(&fast_policy(3), Duration::from_secs(60), "test", |_| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(OcrFlowError::permanent("bad creds", "azure"))
                }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_bounded_by_policy() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: Result<()> =
            retry_with_policy(&fast_policy(2), Duration::from_secs(60), "test", |_| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(OcrFlowError::transient("503", "azure"))
                }
            })
            .await;

        assert!(result.is_err());
        // 1 initial + 2 retries.
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_budget_stops_retries() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        // Budget shorter than any backoff sleep: the first failure is final.
        let result: Result<()> = retry_with_policy(
            &fast_policy(5),
            Duration::from_millis(0),
            "test",
            |_| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(OcrFlowError::transient("503", "azure"))
                }
            },
        )
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_breaker_open_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: Result<()> =
            retry_with_policy(&fast_policy(3), Duration::from_secs(60), "test", |_| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(OcrFlowError::engine(
                        "breaker open",
                        "azure",
                        ErrorCategory::BreakerOpen,
                    ))
                }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
