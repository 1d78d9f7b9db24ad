//! Layered service configuration: defaults, optional file, `AGRI__*` environment.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::inference::DiseaseClasses;
use crate::model_registry::{ModelKind, ModelSource};
use crate::normalize::ImageTensor;
use crate::resilience::RetryConfig;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgriConfig {
    pub service_name: String,
    pub log_level: String,
    pub bind_addr: String,
    pub health_port: u16,

    pub crop_model_path: PathBuf,
    pub crop_model_sha256: Option<String>,
    /// Pins the crop graph's input width when the exported graph leaves it symbolic.
    pub crop_feature_count: Option<usize>,
    pub disease_model_path: PathBuf,
    pub disease_model_sha256: Option<String>,
    pub disease_classes_path: Option<PathBuf>,

    pub sensor_csv_path: PathBuf,
    pub sensor_tail_default: usize,
    pub max_upload_bytes: usize,

    // remote consumers (risk-engine)
    pub gateway_url: String,
    pub request_timeout_ms: u64,
    pub max_retries: usize,
    pub breaker_failures: usize,
    pub breaker_open_secs: u64,
    pub poll_interval_secs: u64,
    pub run_once: bool,
    pub leaf_image_path: Option<PathBuf>,
}

impl Default for AgriConfig {
    fn default() -> Self {
        Self {
            service_name: "agri".into(),
            log_level: "info".into(),
            bind_addr: "0.0.0.0:8000".into(),
            health_port: 9090,
            crop_model_path: "models/crop_model.onnx".into(),
            crop_model_sha256: None,
            crop_feature_count: None,
            disease_model_path: "models/plant_disease_model.onnx".into(),
            disease_model_sha256: None,
            disease_classes_path: None,
            sensor_csv_path: "data/sensor_data.csv".into(),
            sensor_tail_default: 10,
            max_upload_bytes: 10 * 1024 * 1024,
            gateway_url: "http://127.0.0.1:8000".into(),
            request_timeout_ms: 5000,
            max_retries: 3,
            breaker_failures: 5,
            breaker_open_secs: 30,
            poll_interval_secs: 30,
            run_once: false,
            leaf_image_path: None,
        }
    }
}

impl AgriConfig {
    pub fn model_sources(&self) -> Vec<(ModelKind, ModelSource)> {
        vec![
            (
                ModelKind::Crop,
                ModelSource::new(&self.crop_model_path)
                    .with_sha256(self.crop_model_sha256.clone())
                    .with_input_shape(self.crop_feature_count.map(|n| vec![n])),
            ),
            (
                ModelKind::Disease,
                ModelSource::new(&self.disease_model_path)
                    .with_sha256(self.disease_model_sha256.clone())
                    .with_input_shape(Some(ImageTensor::SHAPE.to_vec())),
            ),
        ]
    }

    /// Built-in class order unless a class file is configured; an unreadable file is an error.
    pub fn disease_classes(&self) -> Result<DiseaseClasses> {
        match &self.disease_classes_path {
            Some(path) => DiseaseClasses::from_file(path).with_context(|| format!("reading disease classes {path:?}")),
            None => Ok(DiseaseClasses::default()),
        }
    }

    pub fn retry(&self) -> RetryConfig {
        RetryConfig { max_retries: self.max_retries, ..RetryConfig::default() }
    }

    pub fn request_timeout(&self) -> Duration { Duration::from_millis(self.request_timeout_ms) }
    pub fn poll_interval(&self) -> Duration { Duration::from_secs(self.poll_interval_secs.max(1)) }
}

/// Defaults, then the file named by `AGRI_CONFIG_FILE`, then `AGRI__*` variables.
pub fn load_config(service: &str) -> Result<AgriConfig> {
    let file = std::env::var("AGRI_CONFIG_FILE").ok();
    load_config_from(service, file.as_deref())
}

pub fn load_config_from(service: &str, file: Option<&str>) -> Result<AgriConfig> {
    let mut builder = config::Config::builder().set_default("service_name", service)?;
    if let Some(file) = file {
        builder = builder.add_source(config::File::with_name(file).required(false));
    }
    builder = builder.add_source(config::Environment::with_prefix("AGRI").separator("__").try_parsing(true));
    let cfg: AgriConfig = builder.build()?.try_deserialize().context("invalid configuration")?;
    tracing::debug!(service, ?file, "configuration loaded");
    Ok(cfg)
}
