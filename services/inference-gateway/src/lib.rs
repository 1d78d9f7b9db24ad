//! HTTP transport for the serving facade.

use std::sync::Arc;

use agri_core::{
    clear_ready, init_metrics, init_tracing, load_config, mark_ready, publish_status, start_health_server, AgriConfig,
    ArtifactLoader, InferenceEngine, LocalServing, ModelRegistry, OnnxLoader, SensorLog, ServingFacade,
};
use anyhow::{Context, Result};
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

pub mod routes;

#[derive(Clone)]
pub struct AppState {
    pub serving: LocalServing,
    pub sensors: SensorLog,
    pub cfg: Arc<AgriConfig>,
}

impl AppState {
    pub fn new(facade: ServingFacade, sensors: SensorLog, cfg: AgriConfig) -> Self {
        Self { serving: LocalServing::new(Arc::new(facade)), sensors, cfg: Arc::new(cfg) }
    }

    /// Loads both models once and the sensor history. A missing model or CSV
    /// is tolerated; an unreadable class file or malformed CSV is not.
    pub fn from_config(cfg: AgriConfig, loader: &dyn ArtifactLoader) -> Result<Self> {
        let registry = ModelRegistry::initialize(&cfg.model_sources(), loader);
        let engine = InferenceEngine::new(cfg.disease_classes()?);
        let sensors = if cfg.sensor_csv_path.exists() {
            SensorLog::from_csv_path(&cfg.sensor_csv_path)
                .with_context(|| format!("reading sensor log {:?}", cfg.sensor_csv_path))?
        } else {
            warn!(path=?cfg.sensor_csv_path, "sensor log not found, starting empty");
            SensorLog::new()
        };
        info!(records = sensors.len(), "sensor log ready");
        Ok(Self::new(ServingFacade::new(Arc::new(registry), engine), sensors, cfg))
    }

    pub fn registry(&self) -> &ModelRegistry { self.serving.facade().registry() }
}

pub fn router(state: AppState) -> Router {
    let limit = state.cfg.max_upload_bytes;
    Router::new()
        .route("/", get(routes::root))
        .route("/sensor", get(routes::sensor_tail))
        .route("/alert", get(routes::latest_alert))
        .route("/models", get(routes::models))
        .route("/predict", get(routes::predict_crop))
        .route("/detect_disease", post(routes::detect_disease))
        .route("/detect_disease/", post(routes::detect_disease))
        .route("/detect_disease/raw", post(routes::detect_disease_raw))
        .layer(DefaultBodyLimit::max(limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn run() -> Result<()> {
    let cfg = load_config("inference-gateway")?;
    init_tracing("inference-gateway", &cfg.log_level)?;
    init_metrics();
    start_health_server(cfg.health_port).await?;

    let bind_addr = cfg.bind_addr.clone();
    let state = AppState::from_config(cfg, &OnnxLoader)?;
    publish_status("service", "inference-gateway".into());
    publish_status("models", serde_json::to_value(state.registry().describe())?);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await.with_context(|| format!("binding {bind_addr}"))?;
    info!(addr=?listener.local_addr()?, "inference gateway listening");
    mark_ready();
    axum::serve(listener, router(state)).with_graceful_shutdown(shutdown_signal()).await?;
    info!("inference gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error=?e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    clear_ready();
}
