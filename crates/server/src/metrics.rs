//! Prometheus metrics for the pasta server.
//!
//! Counters cover record creation and deletion, ingested bytes, throttled
//! requests and the expiration sweeper. The `/metrics` route is only mounted
//! when `server.metrics_enabled` is set, and it is unauthenticated: restrict
//! it at the network level.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{
    self, Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry,
    TextEncoder,
};
use std::sync::{LazyLock, Once};

/// Global Prometheus registry for all metrics.
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

pub static RECORDS_CREATED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "pasta_records_created_total",
        "Total number of records created",
    )
    .expect("metric creation failed")
});

pub static RECORDS_DELETED: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "pasta_records_deleted_total",
            "Total number of records deleted, by reason",
        ),
        &["reason"], // token, expired, sweep
    )
    .expect("metric creation failed")
});

pub static BYTES_INGESTED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "pasta_bytes_ingested_total",
        "Total payload bytes stored",
    )
    .expect("metric creation failed")
});

pub static REQUESTS_THROTTLED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "pasta_requests_throttled_total",
        "Total number of requests delayed by the throttle",
    )
    .expect("metric creation failed")
});

pub static SWEEP_RUNS: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new("pasta_sweep_runs_total", "Total number of sweep cycles")
        .expect("metric creation failed")
});

pub static SWEEP_FAILURES: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "pasta_sweep_failures_total",
        "Total number of sweep cycles that failed or skipped records",
    )
    .expect("metric creation failed")
});

pub static SWEEP_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        HistogramOpts::new(
            "pasta_sweep_duration_seconds",
            "Time spent in one sweep cycle",
        )
        .buckets(vec![0.001, 0.01, 0.1, 0.5, 1.0, 5.0, 30.0]),
    )
    .expect("metric creation failed")
});

/// Guard to ensure metrics are only registered once.
static REGISTER_ONCE: Once = Once::new();

/// Register all metrics with the global registry.
///
/// Idempotent, so tests can build several routers in one process.
pub fn register_metrics() {
    REGISTER_ONCE.call_once(|| {
        REGISTRY
            .register(Box::new(RECORDS_CREATED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(RECORDS_DELETED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(BYTES_INGESTED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(REQUESTS_THROTTLED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(SWEEP_RUNS.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(SWEEP_FAILURES.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(SWEEP_DURATION.clone()))
            .expect("metric registration failed");
    });
}

/// GET /metrics - Prometheus metrics endpoint.
pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();

    let mut buffer = Vec::new();
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            buffer,
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "text/plain; charset=utf-8")],
            format!("Failed to encode metrics: {e}").into_bytes(),
        ),
    }
}

/// Count a deleted record. `reason` is one of `token`, `expired`, `sweep`.
pub fn record_deletion(reason: &str, count: u64) {
    RECORDS_DELETED.with_label_values(&[reason]).inc_by(count);
}
