//! Prometheus metrics for the batch gateway
//!
//! - Batch queue throughput and flush latency
//! - Ledger round trips and per-job failures
//! - Notification forwarding outcomes
//! - Runtime health (stalls, dropped telemetry)

use anyhow::Result;
use once_cell::sync::Lazy;
use prometheus::{
    Encoder, Histogram, HistogramVec, IntCounter, IntCounterVec, TextEncoder, opts,
    register_histogram, register_histogram_vec, register_int_counter, register_int_counter_vec,
};

// ============================================================================
// Batch Metrics
// ============================================================================

pub static JOBS_SUBMITTED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        opts!(
            "gateway_jobs_submitted_total",
            "Jobs accepted into the batch queue"
        ),
        &["kind"]
    )
    .expect("Failed to register JOBS_SUBMITTED_TOTAL metric")
});

pub static BATCHES_FLUSHED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        opts!("gateway_batches_flushed_total", "Batches handed to the ledger"),
        &["kind", "trigger"]
    )
    .expect("Failed to register BATCHES_FLUSHED_TOTAL metric")
});

pub static BATCH_SIZE: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "gateway_batch_size",
        "Number of jobs per flushed batch",
        &["kind"],
        vec![1.0, 2.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 1000.0, 8190.0]
    )
    .expect("Failed to register BATCH_SIZE metric")
});

/// Time between the first job of a batch and its flush
pub static BATCH_WAIT_SECONDS: Lazy<Histogram> = Lazy::new(|| {
    register_histogram!(
        "gateway_batch_wait_seconds",
        "Time from first job to flush",
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.15, 0.25, 0.5, 1.0]
    )
    .expect("Failed to register BATCH_WAIT_SECONDS metric")
});

// ============================================================================
// Ledger Metrics
// ============================================================================

pub static LEDGER_ROUND_TRIP_SECONDS: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "gateway_ledger_round_trip_seconds",
        "Latency of one batch round trip to the ledger",
        &["kind"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]
    )
    .expect("Failed to register LEDGER_ROUND_TRIP_SECONDS metric")
});

/// Jobs whose batch failed as a whole
pub static JOBS_FAILED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        opts!(
            "gateway_jobs_failed_total",
            "Jobs failed because their batch could not be executed"
        ),
        &["kind"]
    )
    .expect("Failed to register JOBS_FAILED_TOTAL metric")
});

/// Jobs the ledger executed but answered with a non-ok result code
pub static JOBS_REJECTED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        opts!(
            "gateway_jobs_rejected_total",
            "Jobs rejected by the ledger with a non-ok result"
        ),
        &["kind"]
    )
    .expect("Failed to register JOBS_REJECTED_TOTAL metric")
});

// ============================================================================
// Notification Metrics
// ============================================================================

pub static NOTIFICATIONS_DELIVERED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(opts!(
        "gateway_notifications_delivered_total",
        "Notifications answered by the downstream consumer"
    ))
    .expect("Failed to register NOTIFICATIONS_DELIVERED_TOTAL metric")
});

pub static NOTIFICATIONS_FAILED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(opts!(
        "gateway_notifications_failed_total",
        "Notifications that failed in transport or were rejected downstream"
    ))
    .expect("Failed to register NOTIFICATIONS_FAILED_TOTAL metric")
});

// ============================================================================
// Runtime Health Metrics
// ============================================================================

pub static STALLS_DETECTED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(opts!(
        "gateway_scheduler_stalls_total",
        "Probe ticks that overran the stall threshold"
    ))
    .expect("Failed to register STALLS_DETECTED_TOTAL metric")
});

pub static TELEMETRY_EVENTS_DROPPED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(opts!(
        "gateway_telemetry_events_dropped_total",
        "Diagnostic events dropped because the sink queue was full or closed"
    ))
    .expect("Failed to register TELEMETRY_EVENTS_DROPPED_TOTAL metric")
});

pub fn gather_metrics() -> Result<String> {
    let mut buffer = vec![];
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder.encode(&metric_families, &mut buffer)?;

    Ok(String::from_utf8(buffer)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_are_exported() {
        JOBS_SUBMITTED_TOTAL.with_label_values(&["CREATE"]).inc();
        STALLS_DETECTED_TOTAL.inc();

        let text = gather_metrics().unwrap();
        assert!(text.contains("gateway_jobs_submitted_total"));
        assert!(text.contains("gateway_scheduler_stalls_total"));
    }
}
