//! Serving metrics registered in the Prometheus default registry.
//!
//! Groups mirror the serving pipeline so the health server's `/metrics`
//! endpoint exposes them without per-service wiring.

use once_cell::sync::Lazy;
use prometheus::{
    register_histogram_vec, register_int_counter, register_int_counter_vec, register_int_gauge_vec, HistogramVec,
    IntCounter, IntCounterVec, IntGaugeVec,
};

use crate::alert::AlertStatus;

pub struct ServingMetrics {
    pub requests_total: IntCounterVec,
    pub inference_latency_ms: HistogramVec,
    pub model_loaded: IntGaugeVec,
    pub alert_evaluations_total: IntCounterVec,
}

pub struct RemoteMetrics {
    pub retries_total: IntCounter,
    pub breaker_open_total: IntCounter,
}

const LATENCY_BUCKETS_MS: &[f64] = &[1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0];

pub static SERVING_METRICS: Lazy<ServingMetrics> = Lazy::new(|| ServingMetrics {
    requests_total: register_int_counter_vec!(
        "agri_serving_requests_total",
        "Serving requests by task and outcome",
        &["task", "outcome"]
    )
    .expect("agri_serving_requests_total definition"),
    inference_latency_ms: register_histogram_vec!(
        "agri_serving_inference_latency_ms",
        "Normalize + forward + decode latency per task (ms)",
        &["task"],
        LATENCY_BUCKETS_MS.to_vec()
    )
    .expect("agri_serving_inference_latency_ms definition"),
    model_loaded: register_int_gauge_vec!(
        "agri_model_loaded",
        "1 when the model slot is loaded, 0 when unavailable",
        &["kind"]
    )
    .expect("agri_model_loaded definition"),
    alert_evaluations_total: register_int_counter_vec!(
        "agri_alert_evaluations_total",
        "Alert evaluations by resulting status",
        &["status"]
    )
    .expect("agri_alert_evaluations_total definition"),
});

pub static REMOTE_METRICS: Lazy<RemoteMetrics> = Lazy::new(|| RemoteMetrics {
    retries_total: register_int_counter!("agri_remote_retries_total", "Transport retries issued by the remote adapter")
        .expect("agri_remote_retries_total definition"),
    breaker_open_total: register_int_counter!(
        "agri_remote_breaker_open_total",
        "Circuit breaker transitions to open"
    )
    .expect("agri_remote_breaker_open_total definition"),
});

impl ServingMetrics {
    pub fn record_alert(&self, status: AlertStatus) {
        self.alert_evaluations_total.with_label_values(&[status.as_str()]).inc();
    }
}

/// Forces registration so every series shows up on the first scrape.
pub fn register_all() {
    Lazy::force(&SERVING_METRICS);
    Lazy::force(&REMOTE_METRICS);
}
