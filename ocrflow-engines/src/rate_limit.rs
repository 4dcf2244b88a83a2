//! ABOUTME: Per-engine requests-per-minute rate limiting
//! ABOUTME: Token-bucket acquisition fails fast; callers treat it as a transient failure

use dashmap::DashMap;
use parking_lot::Mutex;
use std::time::Instant;

use ocrflow_core::{EngineKind, OcrFlowError, Result};

/// Token bucket refilled continuously at `requests_per_minute / 60` per
/// second, with burst capacity equal to one minute's quota.
#[derive(Debug)]
struct TokenBucket {
    capacity: f64,
    refill_per_second: f64,
    state: Mutex<BucketState>,
}

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(requests_per_minute: u32) -> Self {
        let capacity = f64::from(requests_per_minute.max(1));
        Self {
            capacity,
            refill_per_second: capacity / 60.0,
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    fn try_acquire(&self) -> bool {
        let mut state = self.state.lock();
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.refill_per_second).min(self.capacity);
        state.last_refill = now;

        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

/// Rate limiters keyed by engine kind. Engines without a configured cap
/// are uncapped.
#[derive(Debug, Default)]
pub struct RateLimiterRegistry {
    buckets: DashMap<EngineKind, TokenBucket>,
}

impl RateLimiterRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Configure a requests-per-minute cap for an engine.
    pub fn set_limit(&self, engine: EngineKind, requests_per_minute: u32) {
        self.buckets.insert(engine, TokenBucket::new(requests_per_minute));
    }

    /// Acquire a slot for a driver call, failing immediately with a
    /// transient error when the cap is exceeded. The failure is not
    /// retried by the driver; the breaker still counts it.
    pub fn check(&self, engine: EngineKind) -> Result<()> {
        if let Some(bucket) = self.buckets.get(&engine) {
            if !bucket.try_acquire() {
                return Err(OcrFlowError::transient(
                    format!("rate limit exceeded for engine {engine}"),
                    engine.as_str(),
                ));
            }
        }
        Ok(())
    }
}
