//! ABOUTME: Storage layer for ocrflow
//! ABOUTME: Blob backends (local, S3, in-memory), the run store, and engine metrics

pub mod blob;
pub mod metrics;
pub mod run_store;

pub use blob::{LocalBlobStorage, MemoryBlobStorage, S3BlobStorage};
pub use metrics::{EngineMetricsSnapshot, MetricsCollector, MetricsSink, TracingMetricsSink};
pub use run_store::{RunMetrics, RunStore};
