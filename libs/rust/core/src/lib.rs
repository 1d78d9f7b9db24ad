//! Core shared pieces for the agri inference services: model lifecycle,
//! payload normalization, prediction decoding, field alerts and the
//! ambient process plumbing (tracing, health, metrics, config).

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Result;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::{routing::get, Router};
use once_cell::sync::{Lazy, OnceCell};
use parking_lot::RwLock;
use prometheus::{Encoder, TextEncoder};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub mod alert;
pub mod config;
pub mod error;
pub mod inference;
pub mod metrics;
pub mod model_registry;
pub mod normalize;
pub mod onnx;
pub mod remote;
pub mod resilience;
pub mod sensor;
pub mod serving;

pub use alert::{evaluate, evaluate_latest, AlertStatus, Severity};
pub use config::{load_config, AgriConfig};
pub use error::{ErrorBody, ErrorKind, ServingError, StatusHint};
pub use inference::{CropPrediction, DiseaseClasses, DiseasePrediction, InferenceEngine, DISEASE_CLASSES};
pub use model_registry::{ArtifactLoader, ModelArtifact, ModelKind, ModelRegistry, ModelSlot, ModelSource, SlotStatus};
pub use normalize::{FeatureVector, ImageTensor};
pub use onnx::OnnxLoader;
pub use remote::RemoteServing;
pub use resilience::{retry_async, BreakerError, BreakerState, CircuitBreaker, RetryConfig};
pub use sensor::{SensorLog, SensorRecord};
pub use serving::{LocalServing, Serving, ServingFacade};

static TRACING_INIT: OnceCell<()> = OnceCell::new();
static NODE_LIVENESS: AtomicBool = AtomicBool::new(true);
static NODE_READINESS: AtomicBool = AtomicBool::new(false);
static STATUS_DETAIL: Lazy<RwLock<serde_json::Map<String, serde_json::Value>>> = Lazy::new(Default::default);

pub fn mark_ready() { NODE_READINESS.store(true, Ordering::SeqCst); }
pub fn clear_ready() { NODE_READINESS.store(false, Ordering::SeqCst); }

/// Adds or replaces a field reported by the health server's `/status`.
pub fn publish_status(key: &str, value: serde_json::Value) { STATUS_DETAIL.write().insert(key.to_string(), value); }

/// `RUST_LOG` filter, else `default_level` (configured `log_level`);
/// `AGRI_JSON_LOG=1` switches to JSON lines.
pub fn init_tracing(service: &str, default_level: &str) -> Result<()> {
    TRACING_INIT.get_or_try_init(|| -> Result<()> {
        let json = std::env::var("AGRI_JSON_LOG").ok().map(|v| v == "1" || v.eq_ignore_ascii_case("true")).unwrap_or(false);
        let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| fallback_filter(default_level));
        let registry = tracing_subscriber::registry().with(env_filter);
        if json {
            registry
                .with(tracing_subscriber::fmt::layer().json().flatten_event(true).with_current_span(true).with_span_list(false))
                .try_init()?;
        } else {
            registry
                .with(tracing_subscriber::fmt::layer().with_target(true).with_thread_ids(false).with_line_number(true))
                .try_init()?;
        }
        Ok(())
    })?;
    info!(target: "agri_core", service, "tracing initialized");
    Ok(())
}

/// An unparsable level falls back to `info` rather than failing startup.
fn fallback_filter(level: &str) -> EnvFilter {
    EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"))
}

pub fn init_metrics() { metrics::register_all(); }

/// Binds `/live`, `/ready`, `/status` and `/metrics` and serves them in the background.
pub async fn start_health_server(port: u16) -> Result<SocketAddr> {
    let app = Router::new()
        .route("/live", get(|| async { axum::Json(serde_json::json!({"live": NODE_LIVENESS.load(Ordering::SeqCst)})) }))
        .route("/ready", get(|| async { axum::Json(serde_json::json!({"ready": NODE_READINESS.load(Ordering::SeqCst)})) }))
        .route("/status", get(|| async {
            let mut body = STATUS_DETAIL.read().clone();
            body.insert("live".into(), NODE_LIVENESS.load(Ordering::SeqCst).into());
            body.insert("ready".into(), NODE_READINESS.load(Ordering::SeqCst).into());
            axum::Json(serde_json::Value::Object(body))
        }))
        .route("/metrics", get(metrics_handler));
    let listener = tokio::net::TcpListener::bind(SocketAddr::from(([0, 0, 0, 0], port))).await?;
    let addr = listener.local_addr()?;
    info!(?addr, "health server listening");
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error=?e, "health server failed");
        }
    });
    Ok(addr)
}

async fn metrics_handler() -> axum::response::Response {
    let metric_families = prometheus::default_registry().gather();
    let mut buf = Vec::new();
    if let Err(e) = TextEncoder::new().encode(&metric_families, &mut buf) {
        return (StatusCode::INTERNAL_SERVER_ERROR, format!("encode error: {e}")).into_response();
    }
    (StatusCode::OK, [(header::CONTENT_TYPE, "text/plain; version=0.0.4")], buf).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configured_level_is_the_filter_fallback() {
        assert_eq!(fallback_filter("warn").to_string(), "warn");
        assert_eq!(fallback_filter("agri_core=debug").to_string(), "agri_core=debug");
        assert_eq!(fallback_filter("agri_core=bogus").to_string(), "info");
    }
}
