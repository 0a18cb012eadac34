//! Prometheus metrics for the Tulpar server.
//!
//! Exposes metrics for admission decisions, download streams and tracked clients.
//!
//! # Security Note
//!
//! The `/metrics` endpoint is unauthenticated to allow Prometheus scraping.
//! Metrics contain no client addresses or package names, but they do expose
//! aggregate traffic (downloads, bytes sent, blocked client counts).
//!
//! **Deployment Requirement**: The `/metrics` endpoint MUST be network-restricted
//! to authorized Prometheus scraper IPs only. This should be enforced at the
//! infrastructure level (firewall, load balancer, or reverse proxy rules).

use crate::clients::ClientStats;
use crate::state::AppState;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{
    self, Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::sync::{LazyLock, Once};
use std::time::{Duration, Instant};

/// Global Prometheus registry for all metrics.
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

// Admission metrics
pub static REQUESTS_ADMITTED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "tulpar_requests_admitted_total",
        "Total number of package requests admitted",
    )
    .expect("metric creation failed")
});

pub static REQUESTS_REJECTED: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "tulpar_requests_rejected_total",
            "Total number of package requests rejected by reason",
        ),
        &["reason"],
    )
    .expect("metric creation failed")
});

// Download metrics
pub static ACTIVE_DOWNLOADS: LazyLock<IntGauge> = LazyLock::new(|| {
    IntGauge::new(
        "tulpar_active_downloads",
        "Number of download streams currently open",
    )
    .expect("metric creation failed")
});

pub static DOWNLOADS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "tulpar_downloads_total",
            "Total number of finished downloads by outcome",
        ),
        &["outcome"],
    )
    .expect("metric creation failed")
});

pub static BYTES_SENT: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "tulpar_bytes_sent_total",
        "Total artifact bytes sent to clients",
    )
    .expect("metric creation failed")
});

pub static DOWNLOAD_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        HistogramOpts::new(
            "tulpar_download_duration_seconds",
            "Time spent streaming an artifact",
        )
        .buckets(vec![
            0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0, 300.0, 900.0, 3600.0,
        ]),
    )
    .expect("metric creation failed")
});

// Client tracking metrics
pub static TRACKED_CLIENTS: LazyLock<IntGauge> = LazyLock::new(|| {
    IntGauge::new(
        "tulpar_tracked_clients",
        "Number of clients currently tracked",
    )
    .expect("metric creation failed")
});

pub static BLOCKED_CLIENTS: LazyLock<IntGauge> = LazyLock::new(|| {
    IntGauge::new(
        "tulpar_blocked_clients",
        "Number of clients currently blocked",
    )
    .expect("metric creation failed")
});

pub static CLIENTS_EVICTED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "tulpar_clients_evicted_total",
        "Total number of idle clients evicted by cleanup",
    )
    .expect("metric creation failed")
});

static REGISTER_ONCE: Once = Once::new();

/// Register all metrics with the global registry.
pub fn register_metrics() {
    REGISTER_ONCE.call_once(|| {
        REGISTRY
            .register(Box::new(REQUESTS_ADMITTED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(REQUESTS_REJECTED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(ACTIVE_DOWNLOADS.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(DOWNLOADS.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(BYTES_SENT.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(DOWNLOAD_DURATION.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(TRACKED_CLIENTS.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(BLOCKED_CLIENTS.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(CLIENTS_EVICTED.clone()))
            .expect("metric registration failed");
    });
}

/// Handler for the /metrics endpoint.
pub async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    record_client_stats(&state.clients.stats_at(Instant::now()));

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

/// Refresh the client gauges from a registry snapshot.
pub fn record_client_stats(stats: &ClientStats) {
    TRACKED_CLIENTS.set(i64::try_from(stats.tracked).unwrap_or(i64::MAX));
    BLOCKED_CLIENTS.set(i64::try_from(stats.blocked).unwrap_or(i64::MAX));
}

/// Helper to record a finished download.
pub fn record_download(outcome: &str, bytes_sent: u64, elapsed: Duration) {
    DOWNLOADS.with_label_values(&[outcome]).inc();
    BYTES_SENT.inc_by(bytes_sent);
    DOWNLOAD_DURATION.observe(elapsed.as_secs_f64());
}
