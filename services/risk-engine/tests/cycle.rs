use std::time::Duration;

use agri_core::{AgriConfig, AlertStatus, CircuitBreaker, RemoteServing, RetryConfig, ServingError};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use risk_engine::run_cycle;
use serde_json::json;

async fn stub_gateway(disease_available: bool) -> String {
    let app = Router::new()
        .route("/sensor", get(|| async {
            Json(json!([
                {"timestamp": "2024-06-01 05:00", "soil_moisture": 24.0, "temp": 19.0, "humidity": 60.0, "leaf_wetness": 0.0},
                {"timestamp": "2024-06-01 06:00", "soil_moisture": 21.0, "temp": 18.5, "humidity": 84.0, "leaf_wetness": 1.0}
            ]))
        }))
        .route("/detect_disease/raw", post(move || async move {
            if disease_available {
                (StatusCode::OK, Json(json!({"prediction": "Early_blight", "confidence": 0.91})))
            } else {
                (StatusCode::SERVICE_UNAVAILABLE, Json(json!({
                    "error": "disease model not available", "kind": "model_not_available",
                    "status_hint": "unavailable", "model": "disease"
                })))
            }
        }));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
    format!("http://{addr}")
}

fn remote(base: String) -> RemoteServing {
    let retry = RetryConfig { max_retries: 0, base_delay: Duration::from_millis(1), max_delay: Duration::from_millis(1), jitter: 0.0 };
    RemoteServing::new(base, Duration::from_secs(5), retry, CircuitBreaker::new(3, Duration::from_secs(30), 1)).unwrap()
}

#[tokio::test]
async fn cycle_raises_alert_and_diagnoses_leaf() {
    let dir = tempfile::tempdir().unwrap();
    let leaf = dir.path().join("leaf.jpg");
    std::fs::write(&leaf, b"bytes are opaque to the console").unwrap();
    let cfg = AgriConfig { leaf_image_path: Some(leaf), ..AgriConfig::default() };

    let report = run_cycle(&remote(stub_gateway(true).await), &cfg).await.unwrap();
    assert_eq!(report.records, 2);
    assert_eq!(report.alert, Some(AlertStatus::PestDiseaseRisk));
    let diagnosis = report.diagnosis.unwrap();
    assert_eq!(diagnosis.label, "Early_blight");
    assert!(!diagnosis.is_healthy());
}

#[tokio::test]
async fn unavailable_model_only_skips_diagnosis() {
    let dir = tempfile::tempdir().unwrap();
    let leaf = dir.path().join("leaf.png");
    std::fs::write(&leaf, b"x").unwrap();
    let cfg = AgriConfig { leaf_image_path: Some(leaf), ..AgriConfig::default() };

    let report = run_cycle(&remote(stub_gateway(false).await), &cfg).await.unwrap();
    assert_eq!(report.alert, Some(AlertStatus::PestDiseaseRisk));
    assert!(report.diagnosis.is_none());
}

#[tokio::test]
async fn unreachable_gateway_fails_the_cycle() {
    let err = run_cycle(&remote("http://127.0.0.1:9".into()), &AgriConfig::default()).await.unwrap_err();
    assert!(matches!(err, ServingError::Unreachable(_)));
}
