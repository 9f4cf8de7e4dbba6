//! # Metrics
//!
//! Prometheus metrics for the mirror pipeline.
//!
//! ## Metrics exposed
//!
//! - `configbutler_events_ingested_total{operation,source}` - events accepted into the pipeline
//! - `configbutler_enrichment_hits_total` / `configbutler_enrichment_misses_total` - correlation lookups
//! - `configbutler_correlation_ttl_evictions_total` / `configbutler_correlation_lru_evictions_total`
//! - `configbutler_commits_pushed_total` - commits successfully pushed
//! - `configbutler_commit_bytes_total` - bytes written across all commits
//! - `configbutler_push_retries_total` - non-fast-forward replay attempts
//! - `configbutler_encryption_failures_total` - envelope-encryption failures
//! - `configbutler_active_informers` / `configbutler_active_workers` - gauges
//! - `configbutler_stream_queue_depth{stream}` - per-destination buffered event count
//! - `configbutler_flush_batch_size` - histogram of events per flush
//! - `configbutler_commit_duration_seconds` / `configbutler_push_duration_seconds`
//! - `configbutler_reconciliations_total` / `configbutler_reconciliation_errors_total`
//! - `configbutler_requeues_total{reason}`

use anyhow::Result;
use prometheus::{Histogram, HistogramVec, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Registry};
use std::sync::LazyLock;

pub(crate) static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

static EVENTS_INGESTED_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new("configbutler_events_ingested_total", "Total events accepted into the mirror pipeline"),
        &["operation", "source"],
    )
    .expect("failed to create EVENTS_INGESTED_TOTAL metric")
});

static ENRICHMENT_HITS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new("configbutler_enrichment_hits_total", "Correlation store lookups that found an admitted identity")
        .expect("failed to create ENRICHMENT_HITS_TOTAL metric")
});

static ENRICHMENT_MISSES_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new("configbutler_enrichment_misses_total", "Correlation store lookups that fell back to the system actor")
        .expect("failed to create ENRICHMENT_MISSES_TOTAL metric")
});

static CORRELATION_TTL_EVICTIONS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new("configbutler_correlation_ttl_evictions_total", "Correlation entries dropped for exceeding their TTL")
        .expect("failed to create CORRELATION_TTL_EVICTIONS_TOTAL metric")
});

static CORRELATION_LRU_EVICTIONS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new("configbutler_correlation_lru_evictions_total", "Correlation keys evicted for exceeding the store's key bound")
        .expect("failed to create CORRELATION_LRU_EVICTIONS_TOTAL metric")
});

static COMMITS_PUSHED_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new("configbutler_commits_pushed_total", "Total commits successfully pushed")
        .expect("failed to create COMMITS_PUSHED_TOTAL metric")
});

static COMMIT_BYTES_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new("configbutler_commit_bytes_total", "Total bytes written to the working tree across all commits")
        .expect("failed to create COMMIT_BYTES_TOTAL metric")
});

static PUSH_RETRIES_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new("configbutler_push_retries_total", "Non-fast-forward push replay attempts")
        .expect("failed to create PUSH_RETRIES_TOTAL metric")
});

static ENCRYPTION_FAILURES_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new("configbutler_encryption_failures_total", "Envelope-encryption tool invocations that failed")
        .expect("failed to create ENCRYPTION_FAILURES_TOTAL metric")
});

static ACTIVE_INFORMERS: LazyLock<IntGauge> = LazyLock::new(|| {
    IntGauge::new("configbutler_active_informers", "Number of dynamic informers currently running")
        .expect("failed to create ACTIVE_INFORMERS metric")
});

static ACTIVE_WORKERS: LazyLock<IntGauge> = LazyLock::new(|| {
    IntGauge::new("configbutler_active_workers", "Number of branch workers currently running")
        .expect("failed to create ACTIVE_WORKERS metric")
});

static STREAM_QUEUE_DEPTH: LazyLock<IntGaugeVec> = LazyLock::new(|| {
    IntGaugeVec::new(
        prometheus::Opts::new("configbutler_stream_queue_depth", "Buffered event count for a destination stream"),
        &["stream"],
    )
    .expect("failed to create STREAM_QUEUE_DEPTH metric")
});

static FLUSH_BATCH_SIZE: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        prometheus::HistogramOpts::new("configbutler_flush_batch_size", "Number of events included in a single flush")
            .buckets(vec![1.0, 2.0, 5.0, 10.0, 25.0, 50.0, 100.0, 200.0]),
    )
    .expect("failed to create FLUSH_BATCH_SIZE metric")
});

static COMMIT_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        prometheus::HistogramOpts::new("configbutler_commit_duration_seconds", "Duration of a commit operation")
            .buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 2.0, 5.0]),
    )
    .expect("failed to create COMMIT_DURATION metric")
});

static PUSH_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        prometheus::HistogramOpts::new("configbutler_push_duration_seconds", "Duration of a push operation")
            .buckets(vec![0.05, 0.1, 0.5, 1.0, 2.0, 5.0, 10.0]),
    )
    .expect("failed to create PUSH_DURATION metric")
});

static RECONCILIATIONS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new("configbutler_reconciliations_total", "Total number of CRD reconciliations")
        .expect("failed to create RECONCILIATIONS_TOTAL metric")
});

static RECONCILIATION_ERRORS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new("configbutler_reconciliation_errors_total", "Total reconciliation errors by kind"),
        &["kind"],
    )
    .expect("failed to create RECONCILIATION_ERRORS_TOTAL metric")
});

static REQUEUES_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new("configbutler_requeues_total", "Total controller requeues by reason"),
        &["reason"],
    )
    .expect("failed to create REQUEUES_TOTAL metric")
});

#[allow(clippy::missing_errors_doc, reason = "error documentation is provided in doc comments")]
pub fn register_metrics() -> Result<()> {
    REGISTRY.register(Box::new(EVENTS_INGESTED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(ENRICHMENT_HITS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(ENRICHMENT_MISSES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(CORRELATION_TTL_EVICTIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(CORRELATION_LRU_EVICTIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(COMMITS_PUSHED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(COMMIT_BYTES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(PUSH_RETRIES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(ENCRYPTION_FAILURES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(ACTIVE_INFORMERS.clone()))?;
    REGISTRY.register(Box::new(ACTIVE_WORKERS.clone()))?;
    REGISTRY.register(Box::new(STREAM_QUEUE_DEPTH.clone()))?;
    REGISTRY.register(Box::new(FLUSH_BATCH_SIZE.clone()))?;
    REGISTRY.register(Box::new(COMMIT_DURATION.clone()))?;
    REGISTRY.register(Box::new(PUSH_DURATION.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATION_ERRORS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(REQUEUES_TOTAL.clone()))?;
    Ok(())
}

/// Renders the registry in the Prometheus text exposition format, for the
/// `/metrics` HTTP handler.
pub fn gather() -> Vec<prometheus::proto::MetricFamily> {
    REGISTRY.gather()
}

pub fn increment_events_ingested(operation: &str, source: &str) {
    EVENTS_INGESTED_TOTAL.with_label_values(&[operation, source]).inc();
}

pub fn increment_enrichment_hits() {
    ENRICHMENT_HITS_TOTAL.inc();
}

pub fn increment_enrichment_misses() {
    ENRICHMENT_MISSES_TOTAL.inc();
}

pub fn increment_correlation_ttl_evictions_by(count: u64) {
    CORRELATION_TTL_EVICTIONS_TOTAL.inc_by(count);
}

pub fn increment_correlation_lru_evictions_by(count: u64) {
    CORRELATION_LRU_EVICTIONS_TOTAL.inc_by(count);
}

pub fn increment_commits_pushed() {
    COMMITS_PUSHED_TOTAL.inc();
}

pub fn increment_commit_bytes(bytes: u64) {
    COMMIT_BYTES_TOTAL.inc_by(bytes);
}

pub fn increment_push_retries() {
    PUSH_RETRIES_TOTAL.inc();
}

pub fn increment_encryption_failures() {
    ENCRYPTION_FAILURES_TOTAL.inc();
}

pub fn set_active_informers(count: i64) {
    ACTIVE_INFORMERS.set(count);
}

pub fn set_active_workers(count: i64) {
    ACTIVE_WORKERS.set(count);
}

pub fn set_stream_queue_depth(stream: &str, depth: i64) {
    STREAM_QUEUE_DEPTH.with_label_values(&[stream]).set(depth);
}

pub fn observe_flush_batch_size(size: usize) {
    #[allow(clippy::cast_precision_loss, reason = "batch sizes are small and exactness is not required for a histogram bucket")]
    FLUSH_BATCH_SIZE.observe(size as f64);
}

pub fn observe_commit_duration(seconds: f64) {
    COMMIT_DURATION.observe(seconds);
}

pub fn observe_push_duration(seconds: f64) {
    PUSH_DURATION.observe(seconds);
}

pub fn increment_reconciliations() {
    RECONCILIATIONS_TOTAL.inc();
}

pub fn increment_reconciliation_errors(kind: &str) {
    RECONCILIATION_ERRORS_TOTAL.with_label_values(&[kind]).inc();
}

pub fn increment_requeues(reason: &str) {
    REQUEUES_TOTAL.with_label_values(&[reason]).inc();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_metrics_does_not_panic() {
        assert!(register_metrics().is_ok());
    }

    #[test]
    fn events_ingested_increments_the_labeled_series() {
        let before = EVENTS_INGESTED_TOTAL.with_label_values(&["Create", "watch"]).get();
        increment_events_ingested("Create", "watch");
        let after = EVENTS_INGESTED_TOTAL.with_label_values(&["Create", "watch"]).get();
        assert_eq!(after, before + 1);
    }

    #[test]
    fn enrichment_hits_and_misses_are_independent_counters() {
        let hits_before = ENRICHMENT_HITS_TOTAL.get();
        let misses_before = ENRICHMENT_MISSES_TOTAL.get();
        increment_enrichment_hits();
        assert_eq!(ENRICHMENT_HITS_TOTAL.get(), hits_before + 1);
        assert_eq!(ENRICHMENT_MISSES_TOTAL.get(), misses_before);
    }

    #[test]
    fn active_gauges_reflect_latest_set_value() {
        set_active_workers(3);
        assert_eq!(ACTIVE_WORKERS.get(), 3);
        set_active_workers(5);
        assert_eq!(ACTIVE_WORKERS.get(), 5);
    }

    #[test]
    fn requeues_total_tracks_reason_label() {
        let before = REQUEUES_TOTAL.with_label_values(&["GitOperationFailed"]).get();
        increment_requeues("GitOperationFailed");
        let after = REQUEUES_TOTAL.with_label_values(&["GitOperationFailed"]).get();
        assert_eq!(after, before + 1);
    }
}
