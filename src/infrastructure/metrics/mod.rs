//! Prometheus Metrics Module
//!
//! Provides process-wide metrics collection using Prometheus.
//!
//! # Metrics Collected
//! - HTTP request counts by method, path, and status
//! - Active rooms and open collaboration sockets
//! - Relayed envelopes by type, dropped envelopes by reason
//! - Grader lock outcomes
//! - Client reconnect attempts

use once_cell::sync::Lazy;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};

const NAMESPACE: &str = "grading_collab";

/// Global metrics registry
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let registry = Registry::new();
    register_metrics(&registry);
    registry
});

/// HTTP request counter - tracks total requests by method, path, and status code
pub static HTTP_REQUESTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("http_requests_total", "Total number of HTTP requests").namespace(NAMESPACE),
        &["method", "path", "status"],
    )
    .expect("Failed to create HTTP_REQUESTS_TOTAL metric")
});

/// HTTP request latency histogram - tracks request duration in seconds
pub static HTTP_REQUEST_DURATION_SECONDS: Lazy<HistogramVec> = Lazy::new(|| {
    let buckets = vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0];
    HistogramVec::new(
        HistogramOpts::new(
            "http_request_duration_seconds",
            "HTTP request latency in seconds",
        )
        .namespace(NAMESPACE)
        .buckets(buckets),
        &["method", "path"],
    )
    .expect("Failed to create HTTP_REQUEST_DURATION_SECONDS metric")
});

/// Rooms with a running actor
pub static ROOMS_ACTIVE: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::with_opts(
        Opts::new("rooms_active", "Number of live collaboration rooms").namespace(NAMESPACE),
    )
    .expect("Failed to create ROOMS_ACTIVE metric")
});

/// Open collaboration sockets across all rooms
pub static SOCKETS_OPEN: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::with_opts(
        Opts::new("sockets_open", "Number of open collaboration sockets").namespace(NAMESPACE),
    )
    .expect("Failed to create SOCKETS_OPEN metric")
});

/// Envelopes fanned out to room members, by envelope type
pub static ENVELOPES_RELAYED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("envelopes_relayed_total", "Envelopes delivered to sockets")
            .namespace(NAMESPACE),
        &["type"],
    )
    .expect("Failed to create ENVELOPES_RELAYED_TOTAL metric")
});

/// Inbound frames that never reached a room
pub static ENVELOPES_DROPPED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("envelopes_dropped_total", "Inbound frames dropped").namespace(NAMESPACE),
        &["reason"],
    )
    .expect("Failed to create ENVELOPES_DROPPED_TOTAL metric")
});

/// Grader lock outcomes
pub static LOCK_EVENTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("lock_events_total", "Grader lock requests and releases by outcome")
            .namespace(NAMESPACE),
        &["outcome"], // "granted", "denied", "released", "expired", ...
    )
    .expect("Failed to create LOCK_EVENTS_TOTAL metric")
});

/// Reconnect attempts scheduled by the client core
pub static CLIENT_RECONNECT_ATTEMPTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("client_reconnect_attempts_total", "Client reconnect attempts")
            .namespace(NAMESPACE),
        &["result"], // "scheduled", "exhausted"
    )
    .expect("Failed to create CLIENT_RECONNECT_ATTEMPTS_TOTAL metric")
});

/// Register all metrics with the registry
fn register_metrics(registry: &Registry) {
    registry
        .register(Box::new(HTTP_REQUESTS_TOTAL.clone()))
        .expect("Failed to register HTTP_REQUESTS_TOTAL");
    registry
        .register(Box::new(HTTP_REQUEST_DURATION_SECONDS.clone()))
        .expect("Failed to register HTTP_REQUEST_DURATION_SECONDS");
    registry
        .register(Box::new(ROOMS_ACTIVE.clone()))
        .expect("Failed to register ROOMS_ACTIVE");
    registry
        .register(Box::new(SOCKETS_OPEN.clone()))
        .expect("Failed to register SOCKETS_OPEN");
    registry
        .register(Box::new(ENVELOPES_RELAYED_TOTAL.clone()))
        .expect("Failed to register ENVELOPES_RELAYED_TOTAL");
    registry
        .register(Box::new(ENVELOPES_DROPPED_TOTAL.clone()))
        .expect("Failed to register ENVELOPES_DROPPED_TOTAL");
    registry
        .register(Box::new(LOCK_EVENTS_TOTAL.clone()))
        .expect("Failed to register LOCK_EVENTS_TOTAL");
    registry
        .register(Box::new(CLIENT_RECONNECT_ATTEMPTS_TOTAL.clone()))
        .expect("Failed to register CLIENT_RECONNECT_ATTEMPTS_TOTAL");
}

/// Collect and encode all metrics as Prometheus text format
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %e, "Failed to encode metrics");
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

/// Helper to record HTTP request metrics
pub fn record_http_request(method: &str, path: &str, status: u16, duration_secs: f64) {
    HTTP_REQUESTS_TOTAL
        .with_label_values(&[method, path, &status.to_string()])
        .inc();
    HTTP_REQUEST_DURATION_SECONDS
        .with_label_values(&[method, path])
        .observe(duration_secs);
}

pub fn room_opened() {
    ROOMS_ACTIVE.inc();
}

pub fn room_closed() {
    ROOMS_ACTIVE.dec();
}

pub fn socket_opened() {
    SOCKETS_OPEN.inc();
}

pub fn socket_closed() {
    SOCKETS_OPEN.dec();
}

/// Count one envelope delivered to `recipients` sockets.
pub fn record_relay(kind: &str, recipients: usize) {
    ENVELOPES_RELAYED_TOTAL
        .with_label_values(&[kind])
        .inc_by(recipients as u64);
}

pub fn record_dropped(reason: &str) {
    ENVELOPES_DROPPED_TOTAL.with_label_values(&[reason]).inc();
}

pub fn record_lock(outcome: &str) {
    LOCK_EVENTS_TOTAL.with_label_values(&[outcome]).inc();
}

pub fn record_reconnect(result: &str) {
    CLIENT_RECONNECT_ATTEMPTS_TOTAL
        .with_label_values(&[result])
        .inc();
}
