//! Prometheus metrics for observability.
//!
//! This module provides metrics for monitoring the StreamVault server:
//! - HTTP request metrics (latency, counts)
//! - WebSocket connection metrics
//! - Job counts by state (collected from the statistics snapshot)

use once_cell::sync::Lazy;
use prometheus::{
    self, Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, IntGaugeVec,
    Opts, Registry, TextEncoder,
};

/// Global metrics registry.
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let registry = Registry::new();
    register_metrics(&registry);
    registry
});

// =============================================================================
// HTTP Request Metrics
// =============================================================================

/// HTTP request duration in seconds.
pub static HTTP_REQUEST_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "streamvault_http_request_duration_seconds",
            "HTTP request duration in seconds",
        )
        .buckets(vec![
            0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
        ]),
        &["method", "path", "status"],
    )
    .unwrap()
});

/// HTTP requests total count.
pub static HTTP_REQUESTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("streamvault_http_requests_total", "Total HTTP requests"),
        &["method", "path", "status"],
    )
    .unwrap()
});

// =============================================================================
// WebSocket Metrics
// =============================================================================

/// Active WebSocket connections.
pub static WS_CONNECTIONS_ACTIVE: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "streamvault_ws_connections_active",
        "Number of active WebSocket connections",
    )
    .unwrap()
});

/// Total WebSocket connections (cumulative).
pub static WS_CONNECTIONS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "streamvault_ws_connections_total",
        "Total WebSocket connections since startup",
    )
    .unwrap()
});

/// WebSocket messages sent.
pub static WS_MESSAGES_SENT: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("streamvault_ws_messages_sent_total", "WebSocket messages sent"),
        &["type"],
    )
    .unwrap()
});

/// WebSocket lag events (when client falls behind).
pub static WS_LAG_EVENTS: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "streamvault_ws_lag_events_total",
        "WebSocket lag events (client fell behind)",
    )
    .unwrap()
});

// =============================================================================
// Job Metrics
// =============================================================================

/// Jobs by current state (refreshed from each statistics snapshot).
pub static JOBS_BY_STATE: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(
        Opts::new("streamvault_jobs_by_state", "Current job count by state"),
        &["state"],
    )
    .unwrap()
});

/// Jobs submitted total.
pub static JOBS_SUBMITTED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "streamvault_jobs_submitted_total",
        "Total jobs submitted since startup",
    )
    .unwrap()
});

/// Downloads currently held by workers.
pub static DOWNLOADS_ACTIVE: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "streamvault_downloads_active",
        "Downloads currently held by workers",
    )
    .unwrap()
});

/// Bytes downloaded over completed jobs.
pub static DOWNLOADED_BYTES_TOTAL: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "streamvault_downloaded_bytes_total",
        "Sum of file sizes over completed jobs",
    )
    .unwrap()
});

fn register_metrics(registry: &Registry) {
    registry
        .register(Box::new(HTTP_REQUEST_DURATION.clone()))
        .unwrap();
    registry
        .register(Box::new(HTTP_REQUESTS_TOTAL.clone()))
        .unwrap();
    registry
        .register(Box::new(WS_CONNECTIONS_ACTIVE.clone()))
        .unwrap();
    registry
        .register(Box::new(WS_CONNECTIONS_TOTAL.clone()))
        .unwrap();
    registry
        .register(Box::new(WS_MESSAGES_SENT.clone()))
        .unwrap();
    registry.register(Box::new(WS_LAG_EVENTS.clone())).unwrap();
    registry.register(Box::new(JOBS_BY_STATE.clone())).unwrap();
    registry
        .register(Box::new(JOBS_SUBMITTED_TOTAL.clone()))
        .unwrap();
    registry
        .register(Box::new(DOWNLOADS_ACTIVE.clone()))
        .unwrap();
    registry
        .register(Box::new(DOWNLOADED_BYTES_TOTAL.clone()))
        .unwrap();
}

/// Refresh gauges from a statistics snapshot.
pub fn update_job_gauges(stats: &streamvault_core::Statistics) {
    JOBS_BY_STATE.with_label_values(&["queued"]).set(stats.queued);
    JOBS_BY_STATE
        .with_label_values(&["scheduled"])
        .set(stats.scheduled);
    JOBS_BY_STATE
        .with_label_values(&["downloading"])
        .set(stats.downloading);
    JOBS_BY_STATE
        .with_label_values(&["completed"])
        .set(stats.completed);
    JOBS_BY_STATE.with_label_values(&["failed"]).set(stats.failed);
    JOBS_BY_STATE
        .with_label_values(&["cancelled"])
        .set(stats.cancelled);
    DOWNLOADED_BYTES_TOTAL.set(stats.total_downloaded_bytes.min(i64::MAX as u64) as i64);
}

/// Render all metrics in Prometheus text format.
pub fn render() -> String {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&REGISTRY.gather(), &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", e);
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_render() {
        JOBS_SUBMITTED_TOTAL.inc();
        let output = render();
        assert!(output.contains("streamvault_jobs_submitted_total"));
    }

    #[test]
    fn test_update_job_gauges() {
        let stats = streamvault_core::Statistics {
            total: 3,
            queued: 1,
            completed: 2,
            total_downloaded_bytes: 4096,
            ..Default::default()
        };
        update_job_gauges(&stats);
        assert_eq!(JOBS_BY_STATE.with_label_values(&["queued"]).get(), 1);
        assert_eq!(JOBS_BY_STATE.with_label_values(&["completed"]).get(), 2);
        assert_eq!(DOWNLOADED_BYTES_TOTAL.get(), 4096);
    }
}
