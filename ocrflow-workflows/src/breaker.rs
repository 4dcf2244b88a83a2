//! ABOUTME: Per-engine circuit breakers protecting failing OCR upstreams
//! ABOUTME: Consecutive-failure threshold opens; a single half-open probe closes or reopens

use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use ocrflow_config::BreakerSettings;
use ocrflow_core::{EngineKind, ErrorCategory, OcrFlowError, Result};

/// Breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    /// Normal operation.
    Closed,
    /// Short-circuiting calls until the recovery timeout elapses.
    Open,
    /// One probe call is allowed through.
    HalfOpen,
}

#[derive(Debug)]
struct BreakerInner {
    state: BreakerState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
}

/// Breaker for a single engine kind.
#[derive(Debug)]
struct EngineBreaker {
    engine: EngineKind,
    failure_threshold: u32,
    recovery_timeout: Duration,
    inner: Mutex<BreakerInner>,
}

impl EngineBreaker {
    fn new(engine: EngineKind, failure_threshold: u32, recovery_timeout: Duration) -> Self {
        Self {
            engine,
            failure_threshold,
            recovery_timeout,
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                opened_at: None,
            }),
        }
    }

    /// Gate a driver invocation. In `Open`, transitions to `HalfOpen`
    /// once the recovery timeout has elapsed and admits a single probe.
    fn allow(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        match inner.state {
            BreakerState::Closed | BreakerState::HalfOpen => Ok(()),
            BreakerState::Open => {
                let elapsed = inner
                    .opened_at
                    .map(|at| at.elapsed())
                    .unwrap_or(Duration::ZERO);
                if elapsed >= self.recovery_timeout {
                    inner.state = BreakerState::HalfOpen;
                    info!(engine = %self.engine, "breaker half-open, admitting probe");
                    Ok(())
                } else {
                    Err(OcrFlowError::engine(
                        format!(
                            "circuit breaker open for engine {} ({}s until probe)",
                            self.engine,
                            self.recovery_timeout
                                .saturating_sub(elapsed)
                                .as_secs()
                        ),
                        self.engine.as_str(),
                        ErrorCategory::BreakerOpen,
                    ))
                }
            }
        }
    }

    fn record_success(&self) {
        let mut inner = self.inner.lock();
        if inner.state != BreakerState::Closed {
            info!(engine = %self.engine, "breaker closed after successful probe");
        }
        inner.state = BreakerState::Closed;
        inner.consecutive_failures = 0;
        inner.opened_at = None;
    }

    fn record_failure(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            BreakerState::HalfOpen => {
                inner.state = BreakerState::Open;
                inner.opened_at = Some(Instant::now());
                warn!(engine = %self.engine, "probe failed, breaker reopened");
            }
            BreakerState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.failure_threshold {
                    inner.state = BreakerState::Open;
                    inner.opened_at = Some(Instant::now());
                    warn!(
                        engine = %self.engine,
                        failures = inner.consecutive_failures,
                        "breaker opened"
                    );
                }
            }
            BreakerState::Open => {}
        }
    }

    fn state(&self) -> BreakerState {
        self.inner.lock().state
    }
}

/// Process-wide breakers, one per engine kind. With `enabled = false`
/// every call is admitted and nothing is recorded.
pub struct BreakerRegistry {
    settings: BreakerSettings,
    breakers: DashMap<EngineKind, Arc<EngineBreaker>>,
}

impl BreakerRegistry {
    #[must_use]
    pub fn new(settings: BreakerSettings) -> Self {
        Self {
            settings,
            breakers: DashMap::new(),
        }
    }

    fn breaker(&self, engine: EngineKind) -> Arc<EngineBreaker> {
        self.breakers
            .entry(engine)
            .or_insert_with(|| {
                Arc::new(EngineBreaker::new(
                    engine,
                    self.settings.failure_threshold,
                    self.settings.recovery_timeout(),
                ))
            })
            .clone()
    }

    /// Gate a driver invocation for `engine`.
    pub fn allow(&self, engine: EngineKind) -> Result<()> {
        if !self.settings.enabled {
            return Ok(());
        }
        self.breaker(engine).allow()
    }

    pub fn record_success(&self, engine: EngineKind) {
        if self.settings.enabled {
            self.breaker(engine).record_success();
        }
    }

    /// Record a driver failure. Cancellations and breaker short-circuits
    /// do not count against the upstream.
    pub fn record_failure(&self, engine: EngineKind, category: ErrorCategory) {
        if !self.settings.enabled {
            return;
        }
        if matches!(
            category,
            ErrorCategory::Cancelled | ErrorCategory::BreakerOpen
        ) {
            return;
        }
        self.breaker(engine).record_failure();
    }

    /// Current state for reporting.
    #[must_use]
    pub fn state(&self, engine: EngineKind) -> BreakerState {
        if !self.settings.enabled {
            return BreakerState::Closed;
        }
        self.breakers
            .get(&engine)
            .map_or(BreakerState::Closed, |b| b.state())
    }

    /// Force a breaker open (tests and operator tooling).
    pub fn trip(&self, engine: EngineKind) {
        let breaker = self.breaker(engine);
        let mut inner = breaker.inner.lock();
        inner.state = BreakerState::Open;
        inner.opened_at = Some(Instant::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry(threshold: u32, recovery_secs: u64) -> BreakerRegistry {
        BreakerRegistry::new(BreakerSettings {
            enabled: true,
            failure_threshold: threshold,
            recovery_timeout_seconds: recovery_secs,
        })
    }

    #[test]
    fn test_opens_after_consecutive_failures() {
        let registry = registry(3, 300);
        for _ in 0..2 {
            registry.record_failure(EngineKind::Azure, ErrorCategory::Transient);
        }
        assert_eq!(registry.state(EngineKind::Azure), BreakerState::Closed);
        registry.record_failure(EngineKind::Azure, ErrorCategory::Transient);
        assert_eq!(registry.state(EngineKind::Azure), BreakerState::Open);

        let err = registry.allow(EngineKind::Azure).unwrap_err();
        assert_eq!(err.category(), ErrorCategory::BreakerOpen);
    }

    #[test]
    fn test_success_resets_failure_streak() {
        let registry = registry(3, 300);
        registry.record_failure(EngineKind::Azure, ErrorCategory::Transient);
        registry.record_failure(EngineKind::Azure, ErrorCategory::Transient);
        registry.record_success(EngineKind::Azure);
        registry.record_failure(EngineKind::Azure, ErrorCategory::Transient);
        registry.record_failure(EngineKind::Azure, ErrorCategory::Transient);
        assert_eq!(registry.state(EngineKind::Azure), BreakerState::Closed);
    }

    #[test]
    fn test_breaker_isolation_between_engines() {
        let registry = registry(1, 300);
        registry.record_failure(EngineKind::Azure, ErrorCategory::Transient);
        assert_eq!(registry.state(EngineKind::Azure), BreakerState::Open);
        assert_eq!(registry.state(EngineKind::Google), BreakerState::Closed);
        assert!(registry.allow(EngineKind::Google).is_ok());
    }

    #[test]
    fn test_half_open_after_recovery_then_close_on_success() {
        let registry = registry(1, 0);
        registry.record_failure(EngineKind::Azure, ErrorCategory::Transient);
        assert_eq!(registry.state(EngineKind::Azure), BreakerState::Open);

        // Zero recovery timeout: the next gate admits a probe.
        assert!(registry.allow(EngineKind::Azure).is_ok());
        assert_eq!(registry.state(EngineKind::Azure), BreakerState::HalfOpen);

        registry.record_success(EngineKind::Azure);
        assert_eq!(registry.state(EngineKind::Azure), BreakerState::Closed);
    }

    #[test]
    fn test_half_open_reopens_on_failure() {
        let registry = registry(1, 0);
        registry.record_failure(EngineKind::Azure, ErrorCategory::Transient);
        assert!(registry.allow(EngineKind::Azure).is_ok());
        registry.record_failure(EngineKind::Azure, ErrorCategory::Transient);
        assert_eq!(registry.state(EngineKind::Azure), BreakerState::Open);
    }

    #[test]
    fn test_cancellations_do_not_count() {
        let registry = registry(1, 300);
        registry.record_failure(EngineKind::Azure, ErrorCategory::Cancelled);
        registry.record_failure(EngineKind::Azure, ErrorCategory::BreakerOpen);
        assert_eq!(registry.state(EngineKind::Azure), BreakerState::Closed);
    }

    #[test]
    fn test_disabled_breaker_is_noop() {
        let registry = BreakerRegistry::new(BreakerSettings {
            enabled: false,
            failure_threshold: 1,
            recovery_timeout_seconds: 300,
        });
        for _ in 0..10 {
            registry.record_failure(EngineKind::Azure, ErrorCategory::Transient);
        }
        assert!(registry.allow(EngineKind::Azure).is_ok());
        assert_eq!(registry.state(EngineKind::Azure), BreakerState::Closed);
    }
}
