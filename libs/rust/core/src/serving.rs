//! Serving Facade: the single entry point transports call into.
//!
//! Availability is checked before any input is touched, so a missing model
//! reports `ModelNotAvailable` regardless of what the caller sent.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tracing::{debug, instrument};

use crate::alert::{self, AlertStatus};
use crate::error::ServingError;
use crate::inference::{CropPrediction, DiseasePrediction, InferenceEngine};
use crate::metrics::SERVING_METRICS;
use crate::model_registry::{ModelKind, ModelRegistry};
use crate::normalize::{decode_image, parse_features};
use crate::sensor::SensorRecord;

#[derive(Debug, Clone)]
pub struct ServingFacade {
    registry: Arc<ModelRegistry>,
    engine: InferenceEngine,
}

impl ServingFacade {
    pub fn new(registry: Arc<ModelRegistry>, engine: InferenceEngine) -> Self { Self { registry, engine } }

    pub fn registry(&self) -> &ModelRegistry { &self.registry }

    #[instrument(skip_all, fields(task = "crop"))]
    pub fn predict_crop(&self, raw: &str) -> Result<CropPrediction, ServingError> {
        observe(ModelKind::Crop, || {
            let model = self.registry.get(ModelKind::Crop).ok_or(ServingError::ModelNotAvailable(ModelKind::Crop))?;
            let features = parse_features(raw)?;
            self.engine.predict_crop(model.as_ref(), &features)
        })
    }

    #[instrument(skip_all, fields(task = "disease", bytes = bytes.len()))]
    pub fn predict_disease(&self, bytes: &[u8]) -> Result<DiseasePrediction, ServingError> {
        observe(ModelKind::Disease, || {
            let model = self.registry.get(ModelKind::Disease).ok_or(ServingError::ModelNotAvailable(ModelKind::Disease))?;
            let tensor = decode_image(bytes)?;
            self.engine.predict_disease(model.as_ref(), &tensor)
        })
    }

    pub fn evaluate_latest_alert(&self, tail: &[SensorRecord]) -> Option<AlertStatus> {
        let status = alert::evaluate_latest(tail)?;
        SERVING_METRICS.record_alert(status);
        Some(status)
    }
}

fn observe<T>(kind: ModelKind, f: impl FnOnce() -> Result<T, ServingError>) -> Result<T, ServingError> {
    let start = Instant::now();
    let res = f();
    let elapsed = start.elapsed().as_secs_f64() * 1000.0;
    let outcome = match &res { Ok(_) => "ok", Err(e) => e.outcome() };
    SERVING_METRICS.requests_total.with_label_values(&[kind.as_str(), outcome]).inc();
    SERVING_METRICS.inference_latency_ms.with_label_values(&[kind.as_str()]).observe(elapsed);
    match &res {
        Ok(_) => debug!(elapsed_ms = elapsed, "prediction served"),
        Err(e) => debug!(elapsed_ms = elapsed, error = %e, "prediction rejected"),
    }
    res
}

/// Transport seam: both adapters answer with the same taxonomy.
#[async_trait]
pub trait Serving: Send + Sync {
    async fn predict_crop(&self, raw: &str) -> Result<CropPrediction, ServingError>;
    async fn predict_disease(&self, image: Vec<u8>) -> Result<DiseasePrediction, ServingError>;
}

/// In-process adapter; decode and forward run on the blocking pool.
#[derive(Debug, Clone)]
pub struct LocalServing {
    facade: Arc<ServingFacade>,
}

impl LocalServing {
    pub fn new(facade: Arc<ServingFacade>) -> Self { Self { facade } }
    pub fn facade(&self) -> &ServingFacade { &self.facade }
}

#[async_trait]
impl Serving for LocalServing {
    async fn predict_crop(&self, raw: &str) -> Result<CropPrediction, ServingError> {
        let facade = self.facade.clone();
        let raw = raw.to_string();
        tokio::task::spawn_blocking(move || facade.predict_crop(&raw)).await.unwrap_or_else(|e| Err(task_failed(e)))
    }

    async fn predict_disease(&self, image: Vec<u8>) -> Result<DiseasePrediction, ServingError> {
        let facade = self.facade.clone();
        tokio::task::spawn_blocking(move || facade.predict_disease(&image)).await.unwrap_or_else(|e| Err(task_failed(e)))
    }
}

fn task_failed(e: tokio::task::JoinError) -> ServingError {
    ServingError::PredictionFailed(format!("inference task failed: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model_registry::{ModelArtifact, ModelSlot};

    #[derive(Debug)]
    struct Panics;
    impl ModelArtifact for Panics {
        fn input_shape(&self) -> Option<&[usize]> { None }
        fn forward(&self, _input: &[f32], _shape: &[usize]) -> anyhow::Result<Vec<f32>> { panic!("graph exploded") }
    }

    #[derive(Debug)]
    struct Class(f32);
    impl ModelArtifact for Class {
        fn input_shape(&self) -> Option<&[usize]> { None }
        fn forward(&self, _input: &[f32], _shape: &[usize]) -> anyhow::Result<Vec<f32>> { Ok(vec![self.0]) }
    }

    fn facade(slots: Vec<ModelSlot>) -> Arc<ServingFacade> {
        Arc::new(ServingFacade::new(Arc::new(ModelRegistry::from_slots(slots)), InferenceEngine::default()))
    }

    #[test]
    fn unavailable_short_circuits_before_parsing() {
        let f = facade(vec![]);
        assert_eq!(f.predict_crop("not,numbers").unwrap_err(), ServingError::ModelNotAvailable(ModelKind::Crop));
        assert_eq!(f.predict_disease(b"junk").unwrap_err(), ServingError::ModelNotAvailable(ModelKind::Disease));
    }

    #[tokio::test]
    async fn local_adapter_runs_on_blocking_pool() {
        let f = facade(vec![ModelSlot::loaded(ModelKind::Crop, Arc::new(Class(4.0)))]);
        let local = LocalServing::new(f);
        assert_eq!(local.predict_crop("1, 2").await.unwrap().label, 4);
        assert!(matches!(local.predict_crop("1,x").await, Err(ServingError::MalformedInput(_))));
    }

    #[test]
    fn latest_alert_is_counted_by_status() {
        let counter = SERVING_METRICS.alert_evaluations_total.with_label_values(&["drought_risk"]);
        let before = counter.get();
        let dry = SensorRecord { timestamp: "t".into(), soil_moisture: 9.0, temperature: 20.0, humidity: 40.0, leaf_wetness: 0.0 };
        assert_eq!(facade(vec![]).evaluate_latest_alert(&[dry]), Some(AlertStatus::DroughtRisk));
        assert_eq!(facade(vec![]).evaluate_latest_alert(&[]), None);
        assert_eq!(counter.get(), before + 1);
    }

    #[tokio::test]
    async fn panic_in_forward_is_prediction_failure() {
        let f = facade(vec![ModelSlot::loaded(ModelKind::Crop, Arc::new(Panics))]);
        let err = LocalServing::new(f).predict_crop("1").await.unwrap_err();
        assert!(matches!(err, ServingError::PredictionFailed(_)));
    }
}
