use agri_core::model_registry::SlotInfo;
use agri_core::{
    AlertStatus, CropPrediction, DiseasePrediction, ModelKind, SensorRecord, Serving, ServingError, Severity,
};
use axum::body::Bytes;
use axum::extract::{Multipart, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::AppState;

/// Errors leaving the HTTP surface.
#[derive(Debug)]
pub enum ApiError {
    Serving(ServingError),
    NoSensorData,
}

impl From<ServingError> for ApiError {
    fn from(e: ServingError) -> Self { ApiError::Serving(e) }
}

pub fn status_for(err: &ServingError) -> StatusCode {
    match err {
        ServingError::ModelNotAvailable(_) | ServingError::Unreachable(_) => StatusCode::SERVICE_UNAVAILABLE,
        ServingError::MalformedInput(_) | ServingError::UndecodableImage(_) => StatusCode::BAD_REQUEST,
        ServingError::PredictionFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Serving(err) => {
                let status = status_for(&err);
                if status.is_server_error() && !matches!(err, ServingError::ModelNotAvailable(_)) {
                    warn!(error = %err, "request failed");
                } else {
                    debug!(error = %err, "request rejected");
                }
                (status, Json(err.to_body())).into_response()
            }
            ApiError::NoSensorData => {
                (StatusCode::NOT_FOUND, Json(serde_json::json!({"error": "no sensor records yet"}))).into_response()
            }
        }
    }
}

pub async fn root() -> Json<serde_json::Value> {
    Json(serde_json::json!({"message": "Agri Prototype Backend Running"}))
}

#[derive(Debug, Deserialize)]
pub struct TailQuery {
    pub n: Option<usize>,
}

pub async fn sensor_tail(State(state): State<AppState>, Query(q): Query<TailQuery>) -> Json<Vec<SensorRecord>> {
    Json(state.sensors.tail(q.n.unwrap_or(state.cfg.sensor_tail_default)))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AlertView {
    pub status: AlertStatus,
    pub message: String,
    pub severity: Severity,
    pub record: SensorRecord,
}

pub async fn latest_alert(State(state): State<AppState>) -> Result<Json<AlertView>, ApiError> {
    let record = state.sensors.latest().ok_or(ApiError::NoSensorData)?;
    let status = state
        .serving
        .facade()
        .evaluate_latest_alert(std::slice::from_ref(&record))
        .ok_or(ApiError::NoSensorData)?;
    Ok(Json(AlertView { status, message: status.message().to_string(), severity: status.severity(), record }))
}

pub async fn models(State(state): State<AppState>) -> Json<Vec<SlotInfo>> { Json(state.registry().describe()) }

#[derive(Debug, Deserialize)]
pub struct PredictQuery {
    pub features: Option<String>,
}

/// A missing `features` parameter is treated as an empty string so availability still dominates.
pub async fn predict_crop(State(state): State<AppState>, Query(q): Query<PredictQuery>) -> Result<Json<CropPrediction>, ApiError> {
    let raw = q.features.unwrap_or_default();
    Ok(Json(state.serving.predict_crop(&raw).await?))
}

/// Availability is checked before the upload is read, so an absent model
/// answers 503 whatever the form contains.
pub async fn detect_disease(State(state): State<AppState>, mut multipart: Multipart) -> Result<Json<DiseasePrediction>, ApiError> {
    if state.registry().get(ModelKind::Disease).is_none() {
        return Err(ServingError::ModelNotAvailable(ModelKind::Disease).into());
    }
    let mut upload = None;
    while let Some(field) = multipart.next_field().await.map_err(|e| ServingError::MalformedInput(e.body_text()))? {
        if field.name() == Some("file") {
            upload = Some(field.bytes().await.map_err(|e| ServingError::MalformedInput(e.body_text()))?);
            break;
        }
    }
    let bytes = upload.ok_or_else(|| ServingError::MalformedInput("missing multipart field \"file\"".into()))?;
    Ok(Json(state.serving.predict_disease(bytes.to_vec()).await?))
}

pub async fn detect_disease_raw(State(state): State<AppState>, body: Bytes) -> Result<Json<DiseasePrediction>, ApiError> {
    Ok(Json(state.serving.predict_disease(body.to_vec()).await?))
}
