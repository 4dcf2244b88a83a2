//! ABOUTME: In-process per-engine metrics collection with periodic flushing
//! ABOUTME: Counters over atomics; readers take snapshots, flush failures are never fatal

use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use ocrflow_core::EngineKind;

/// Latency histogram bucket upper bounds, in milliseconds.
const LATENCY_BUCKETS_MS: [u64; 8] = [250, 500, 1_000, 2_500, 5_000, 15_000, 60_000, 300_000];

/// Mutable per-engine counters.
#[derive(Debug, Default)]
struct EngineMetrics {
    requests: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
    total_latency_ms: AtomicU64,
    latency_buckets: [AtomicU64; 8],
    // Floating-point accumulators take the lock; everything else is atomic.
    confidence_sum: RwLock<f64>,
    cost_cents_sum: RwLock<f64>,
}

impl EngineMetrics {
    fn observe_latency(&self, latency_ms: u64) {
        self.total_latency_ms.fetch_add(latency_ms, Ordering::Relaxed);
        for (i, bound) in LATENCY_BUCKETS_MS.iter().enumerate() {
            if latency_ms <= *bound {
                self.latency_buckets[i].fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

/// Read-only snapshot of one engine's counters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EngineMetricsSnapshot {
    pub engine: EngineKind,
    pub requests: u64,
    pub successes: u64,
    pub failures: u64,
    pub average_latency_ms: f64,
    /// Cumulative counts per latency bucket (bounds in ms).
    pub latency_buckets: Vec<(u64, u64)>,
    pub average_confidence: f64,
    pub total_cost_cents: f64,
}

/// Per-engine metrics collector shared by every worker. Mutations are
/// cheap; a periodic task flushes snapshots to a side sink.
#[derive(Debug, Default)]
pub struct MetricsCollector {
    engines: DashMap<EngineKind, Arc<EngineMetrics>>,
}

impl MetricsCollector {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn engine(&self, engine: EngineKind) -> Arc<EngineMetrics> {
        self.engines
            .entry(engine)
            .or_insert_with(|| Arc::new(EngineMetrics::default()))
            .clone()
    }

    /// Record a successful driver invocation.
    pub fn record_success(
        &self,
        engine: EngineKind,
        latency: Duration,
        confidence: f64,
        cost_cents: Option<f64>,
    ) {
        let metrics = self.engine(engine);
        metrics.requests.fetch_add(1, Ordering::Relaxed);
        metrics.successes.fetch_add(1, Ordering::Relaxed);
        metrics.observe_latency(latency.as_millis() as u64);
        *metrics.confidence_sum.write() += confidence;
        if let Some(cost) = cost_cents {
            *metrics.cost_cents_sum.write() += cost;
        }
    }

    /// Record a failed driver invocation.
    pub fn record_failure(&self, engine: EngineKind, latency: Duration) {
        let metrics = self.engine(engine);
        metrics.requests.fetch_add(1, Ordering::Relaxed);
        metrics.failures.fetch_add(1, Ordering::Relaxed);
        metrics.observe_latency(latency.as_millis() as u64);
    }

    /// Snapshot all engines with recorded activity.
    #[must_use]
    pub fn snapshot(&self) -> Vec<EngineMetricsSnapshot> {
        let mut snapshots: Vec<_> = self
            .engines
            .iter()
            .map(|entry| {
                let metrics = entry.value();
                let requests = metrics.requests.load(Ordering::Relaxed);
                let successes = metrics.successes.load(Ordering::Relaxed);
                let total_latency = metrics.total_latency_ms.load(Ordering::Relaxed);
                EngineMetricsSnapshot {
                    engine: *entry.key(),
                    requests,
                    successes,
                    failures: metrics.failures.load(Ordering::Relaxed),
                    average_latency_ms: if requests > 0 {
                        total_latency as f64 / requests as f64
                    } else {
                        0.0
                    },
                    latency_buckets: LATENCY_BUCKETS_MS
                        .iter()
                        .zip(metrics.latency_buckets.iter())
                        .map(|(bound, count)| (*bound, count.load(Ordering::Relaxed)))
                        .collect(),
                    average_confidence: if successes > 0 {
                        *metrics.confidence_sum.read() / successes as f64
                    } else {
                        0.0
                    },
                    total_cost_cents: *metrics.cost_cents_sum.read(),
                }
            })
            .collect();
        snapshots.sort_by_key(|s| s.engine.as_str());
        snapshots
    }

    /// Reset one engine's counters, or all when `engine` is `None`.
    pub fn reset(&self, engine: Option<EngineKind>) {
        match engine {
            Some(engine) => {
                self.engines.remove(&engine);
                info!(%engine, "engine metrics reset");
            }
            None => {
                self.engines.clear();
                info!("all engine metrics reset");
            }
        }
    }
}

/// Destination for periodic metrics flushes.
#[async_trait::async_trait]
pub trait MetricsSink: Send + Sync {
    async fn flush(&self, snapshots: &[EngineMetricsSnapshot]) -> ocrflow_core::Result<()>;
}

/// Default sink: structured log lines.
#[derive(Debug, Default)]
pub struct TracingMetricsSink;

#[async_trait::async_trait]
impl MetricsSink for TracingMetricsSink {
    async fn flush(&self, snapshots: &[EngineMetricsSnapshot]) -> ocrflow_core::Result<()> {
        for snapshot in snapshots {
            info!(
                engine = %snapshot.engine,
                requests = snapshot.requests,
                successes = snapshot.successes,
                failures = snapshot.failures,
                avg_latency_ms = snapshot.average_latency_ms,
                avg_confidence = snapshot.average_confidence,
                cost_cents = snapshot.total_cost_cents,
                "engine metrics"
            );
        }
        Ok(())
    }
}

/// Spawn the periodic flush task. Flush failures are logged and never
/// propagate.
pub fn spawn_flush_task(
    collector: Arc<MetricsCollector>,
    sink: Arc<dyn MetricsSink>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            let snapshots = collector.snapshot();
            if snapshots.is_empty() {
                continue;
            }
            debug!(engines = snapshots.len(), "flushing engine metrics");
            if let Err(e) = sink.flush(&snapshots).await {
                warn!(error = %e, "metrics flush failed");
            }
        }
    })
}
